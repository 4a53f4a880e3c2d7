//! Response grammar - layered parsing of free-form model replies.
//!
//! Replies are read in layers, tried in order until one yields a value:
//! 1. **Strict**: tag lines (`<|ACTION|>:<reference>`) and assignment lines
//!    (`WORLD=YES; CHARACTER=NO`)
//! 2. **Structured**: any balanced JSON object or array embedded in the reply,
//!    a lone object standing in for a one-element array
//!
//! When both layers come up empty the caller falls back to scanning the narrative
//! itself (see [`crate::context_assembler::scan_narrative`]). Nothing in this
//! module fails loudly: an unreadable reply is simply `None`.

mod intents;
mod replies;
mod resolver;

pub use intents::*;
pub use replies::*;
pub use resolver::*;

use regex_lite::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Which parsing layer produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Strict,
    Structured,
}

/// A parsed value tagged with the layer that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed<T> {
    pub value: T,
    pub layer: Layer,
}

/// Run the strict layer, then the structured layer over the reply's JSON fragments.
pub fn interpret<T>(
    reply: &str,
    strict: impl FnOnce(&str) -> Option<T>,
    structured: impl FnOnce(&[Value]) -> Option<T>,
) -> Option<Parsed<T>> {
    if let Some(value) = strict(reply) {
        return Some(Parsed {
            value,
            layer: Layer::Strict,
        });
    }
    let fragments = json_fragments(reply);
    structured(&fragments).map(|value| Parsed {
        value,
        layer: Layer::Structured,
    })
}

/// One `<|TAG|>:argument` occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagLine {
    /// Upper-cased tag name.
    pub tag: String,
    /// Text after the tag on the same line.
    pub argument: String,
    /// The argument plus any following untagged lines.
    pub body: String,
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<\|\s*([A-Za-z_]+)\s*\|>").expect("tag pattern is valid"))
}

fn assignment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b([A-Za-z_]+)\s*[=＝]\s*([^;；\n]*)").expect("assignment pattern is valid")
    })
}

/// Every tag occurrence in the reply, in order.
pub fn tag_lines(reply: &str) -> Vec<TagLine> {
    let mut out: Vec<TagLine> = Vec::new();

    for line in reply.lines() {
        let found: Vec<_> = tag_regex().captures_iter(line).collect();

        if found.is_empty() {
            let text = line.trim();
            if let Some(last) = out.last_mut().filter(|_| !text.is_empty()) {
                if !last.body.is_empty() {
                    last.body.push('\n');
                }
                last.body.push_str(text);
            }
            continue;
        }

        for (i, caps) in found.iter().enumerate() {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let stop = found
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map_or(line.len(), |m| m.start());
            let argument = line[whole.end()..stop]
                .trim()
                .trim_start_matches(&[':', '：'][..])
                .trim()
                .to_string();

            out.push(TagLine {
                tag: caps[1].to_ascii_uppercase(),
                body: argument.clone(),
                argument,
            });
        }
    }

    out
}

/// The first `KEY=value` assignment whose key matches one of `keys` (case-insensitive).
pub fn assignment(reply: &str, keys: &[&str]) -> Option<String> {
    assignment_regex()
        .captures_iter(reply)
        .find(|caps| keys.iter().any(|k| caps[1].eq_ignore_ascii_case(k)))
        .map(|caps| caps[2].trim().to_string())
}

/// Every balanced top-level JSON object or array that parses.
pub fn json_fragments(reply: &str) -> Vec<Value> {
    let mut out = Vec::new();
    let mut from = 0;

    while let Some(offset) = reply[from..].find(|c| c == '{' || c == '[') {
        let start = from + offset;
        if let Some(len) = balanced_len(&reply[start..]) {
            if let Ok(value) = serde_json::from_str::<Value>(&reply[start..start + len]) {
                out.push(value);
                from = start + len;
                continue;
            }
        }
        from = start + 1;
    }

    out
}

fn balanced_len(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }

    None
}

/// Objects among the fragments, with arrays flattened one level.
pub fn objects(fragments: &[Value]) -> Vec<&Map<String, Value>> {
    let mut out = Vec::new();
    for fragment in fragments {
        match fragment {
            Value::Object(map) => out.push(map),
            Value::Array(items) => out.extend(items.iter().filter_map(Value::as_object)),
            _ => {}
        }
    }
    out
}

/// The first present field among `names`.
pub fn field<'a>(object: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| object.get(*name))
}

/// A JSON value rendered as plain reference text.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Yes/no words, including the forms models tend to produce.
pub fn parse_bool_word(text: &str) -> Option<bool> {
    let word = clean_reference(text).to_lowercase();
    match word.as_str() {
        "true" | "yes" | "y" | "1" | "是" => Some(true),
        "false" | "no" | "n" | "0" | "否" => Some(false),
        _ => None,
    }
}

pub fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(s) => parse_bool_word(s),
        _ => None,
    }
}

/// Strip whitespace, quotes, brackets and trailing punctuation from a reference.
///
/// Wrappers and punctuation may nest in any order (`"micro.r1".`), so both trims
/// repeat until the text stops changing.
pub fn clean_reference(raw: &str) -> String {
    let mut text = raw.trim();
    loop {
        let next = text
            .trim_matches(|c: char| {
                c.is_whitespace()
                    || matches!(
                        c,
                        '"' | '\'' | '`' | '“' | '”' | '‘' | '’' | '[' | ']' | '(' | ')' | '<'
                            | '>' | '{' | '}' | '*'
                    )
            })
            .trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | '。' | '，'));
        if next == text {
            return text.to_string();
        }
        text = next;
    }
}

/// Words models use to say "nothing".
pub fn is_none_word(text: &str) -> bool {
    matches!(
        clean_reference(text).to_lowercase().as_str(),
        "none" | "null" | "nil" | "n/a" | "-" | "nothing" | "无" | "没有"
    )
}

/// Split a list of references written on one line.
pub fn split_references(text: &str) -> Vec<String> {
    text.split(|c| matches!(c, ',' | '，' | '、' | ';' | '；' | '|' | '\n'))
        .map(clean_reference)
        .filter(|r| !r.is_empty() && !is_none_word(r))
        .collect()
}

/// References held by a JSON value: a list, or a single delimited string.
pub fn value_references(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(value_text)
            .map(|t| clean_reference(&t))
            .filter(|r| !r.is_empty() && !is_none_word(r))
            .collect(),
        other => value_text(other)
            .map(|t| split_references(&t))
            .unwrap_or_default(),
    }
}

/// Whether the reply's first meaningful line says "nothing".
pub fn declares_nothing(reply: &str) -> bool {
    reply
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .is_some_and(is_none_word)
}
