//! Parsers for the single-answer replies: scope, search picks, verdicts and the like.

use serde_json::{Map, Value};
use world_bible::PROFILE_FIELDS;

use super::{
    assignment, coerce_bool, declares_nothing, field, interpret, is_none_word, objects,
    parse_bool_word, split_references, tag_lines, value_references, value_text, Parsed,
};

/// The model's answer to "what does this narrative touch?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeAnswer {
    pub update_world: bool,
    pub update_characters: bool,
    pub reason: String,
}

fn reason_of(reply: &str) -> String {
    assignment(reply, &["REASON"])
        .or_else(|| {
            objects(&super::json_fragments(reply))
                .into_iter()
                .find_map(|o| o.get("reason").and_then(value_text))
        })
        .unwrap_or_default()
}

pub fn parse_scope(reply: &str) -> Option<Parsed<ScopeAnswer>> {
    interpret(
        reply,
        |r| {
            let world = assignment(r, &["WORLD"]).and_then(|v| parse_bool_word(&v))?;
            let characters = assignment(r, &["CHARACTER", "CHARACTERS"])
                .and_then(|v| parse_bool_word(&v))?;
            Some(ScopeAnswer {
                update_world: world,
                update_characters: characters,
                reason: reason_of(r),
            })
        },
        |fragments| {
            objects(fragments).into_iter().find_map(|o| {
                let world = o.get("update_world").and_then(coerce_bool);
                let characters = o.get("update_characters").and_then(coerce_bool);
                if world.is_none() && characters.is_none() {
                    return None;
                }
                Some(ScopeAnswer {
                    update_world: world.unwrap_or(false),
                    update_characters: characters.unwrap_or(false),
                    reason: o.get("reason").and_then(value_text).unwrap_or_default(),
                })
            })
        },
    )
}

/// References the model picked for reading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPick {
    pub world: Vec<String>,
    pub characters: Vec<String>,
}

pub fn parse_search_pick(reply: &str) -> Option<Parsed<SearchPick>> {
    interpret(
        reply,
        |r| {
            let world = assignment(r, &["WORLD", "NODES"]);
            let characters = assignment(r, &["CHARACTER", "CHARACTERS"]);
            if world.is_none() && characters.is_none() {
                return None;
            }
            Some(SearchPick {
                world: world.map(|w| split_references(&w)).unwrap_or_default(),
                characters: characters.map(|c| split_references(&c)).unwrap_or_default(),
            })
        },
        |fragments| {
            objects(fragments).into_iter().find_map(|o| {
                let world = field(o, &["world", "nodes"]);
                let characters = field(o, &["characters", "character"]);
                if world.is_none() && characters.is_none() {
                    return None;
                }
                Some(SearchPick {
                    world: world.map(value_references).unwrap_or_default(),
                    characters: characters.map(value_references).unwrap_or_default(),
                })
            })
        },
    )
}

fn parse_flag(reply: &str, tag: &str, keys: &[&str]) -> Option<Parsed<bool>> {
    interpret(
        reply,
        |r| assignment(r, &[tag]).and_then(|v| parse_bool_word(&v)),
        |fragments| {
            objects(fragments)
                .into_iter()
                .find_map(|o| field(o, keys).and_then(coerce_bool))
        },
    )
}

pub fn parse_continue(reply: &str) -> Option<Parsed<bool>> {
    parse_flag(reply, "CONTINUE", &["continue"])
}

pub fn parse_children_flag(reply: &str) -> Option<Parsed<bool>> {
    parse_flag(reply, "CHILDREN", &["update_children", "children"])
}

/// A validation verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub valid: bool,
    pub reason: String,
}

pub fn parse_verdict(reply: &str) -> Option<Parsed<Verdict>> {
    interpret(
        reply,
        |r| {
            let valid = assignment(r, &["VALID"]).and_then(|v| parse_bool_word(&v))?;
            Some(Verdict {
                valid,
                reason: reason_of(r),
            })
        },
        |fragments| {
            objects(fragments).into_iter().find_map(|o| {
                let valid = o.get("valid").and_then(coerce_bool)?;
                Some(Verdict {
                    valid,
                    reason: o.get("reason").and_then(value_text).unwrap_or_default(),
                })
            })
        },
    )
}

/// The model's choice of surviving polity and of the polities it absorbs.
///
/// `absorbed` is empty when the reply names no removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergePick {
    Keep { survivor: String, absorbed: Vec<String> },
    Decline,
}

pub fn parse_merge_pick(reply: &str) -> Option<Parsed<MergePick>> {
    interpret(
        reply,
        |r| {
            if let Some(keep) = assignment(r, &["KEEP", "SURVIVOR", "KEEP_ID"])
                .filter(|k| !k.is_empty() && !is_none_word(k))
            {
                let removed = assignment(r, &["REMOVE", "REMOVE_ID", "ABSORBED"])
                    .map(|list| split_references(&list))
                    .unwrap_or_default();
                return Some(MergePick::Keep {
                    survivor: keep,
                    absorbed: removed,
                });
            }
            let merge = assignment(r, &["MERGE"])?;
            match parse_bool_word(&merge) {
                Some(false) => Some(MergePick::Decline),
                Some(true) => None,
                // MERGE=<keep>,<remove>
                None => {
                    let mut parts = split_references(&merge).into_iter();
                    let keep = parts.next()?;
                    Some(MergePick::Keep {
                        survivor: keep,
                        absorbed: parts.collect(),
                    })
                }
            }
        },
        |fragments| {
            objects(fragments).into_iter().find_map(|o| {
                if o.get("merge").and_then(coerce_bool) == Some(false) {
                    return Some(MergePick::Decline);
                }
                let keep = field(o, &["keep", "keep_id", "survivor", "target"])
                    .and_then(value_text)
                    .filter(|k| !k.is_empty() && !is_none_word(k))?;
                let removed = field(o, &["remove", "remove_id", "absorbed", "source"])
                    .map(value_references)
                    .unwrap_or_default();
                Some(MergePick::Keep {
                    survivor: keep,
                    absorbed: removed,
                })
            })
        },
    )
}

/// A list of fresh names, e.g. `NAMES=Ashreach, Thornwood` or `["Ashreach", "Thornwood"]`.
///
/// Duplicates (case-insensitive) are dropped; order is kept.
pub fn parse_name_list(reply: &str) -> Option<Parsed<Vec<String>>> {
    let dedup = |names: Vec<String>| {
        let mut seen: Vec<String> = Vec::new();
        let mut out = Vec::new();
        for name in names {
            let folded = name.to_lowercase();
            if !seen.contains(&folded) {
                seen.push(folded);
                out.push(name);
            }
        }
        Some(out).filter(|o: &Vec<String>| !o.is_empty())
    };

    interpret(
        reply,
        |r| assignment(r, &["NAMES", "NAME_LIST"]).and_then(|list| dedup(split_references(&list))),
        |fragments| {
            fragments.iter().find_map(|fragment| match fragment {
                Value::Array(_) => dedup(value_references(fragment)),
                Value::Object(o) => field(o, &["names", "regions", "polities"])
                    .map(value_references)
                    .and_then(dedup),
                _ => None,
            })
        },
    )
}

/// An identifier list answer such as `UPDATE=c1,c2`. `NONE` yields an empty list.
pub fn parse_reference_list(reply: &str, tag: &str, keys: &[&str]) -> Option<Parsed<Vec<String>>> {
    interpret(
        reply,
        |r| match assignment(r, &[tag]) {
            Some(list) => Some(split_references(&list)),
            None if declares_nothing(r) => Some(Vec::new()),
            None => None,
        },
        |fragments| {
            objects(fragments)
                .into_iter()
                .find_map(|o| field(o, keys).map(value_references))
        },
    )
}

/// A polity founded or dissolved by the narrative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolityIntent {
    Found { region: String, name: String },
    Dissolve { polity: String },
}

/// Parse a polity-intent answer. The inner `None` is an explicit "no polity change".
pub fn parse_polity_intent(reply: &str) -> Option<Parsed<Option<PolityIntent>>> {
    interpret(
        reply,
        |r| {
            let kind = assignment(r, &["POLITY"])?;
            let region = assignment(r, &["REGION"]).unwrap_or_default();
            let name = assignment(r, &["NAME"]).unwrap_or_default();
            Some(polity_intent(&kind, region, name))
        },
        |fragments| {
            objects(fragments).into_iter().find_map(|o| {
                let kind = field(o, &["polity", "intent", "action"]).and_then(value_text)?;
                let region = o.get("region").and_then(value_text).unwrap_or_default();
                let name = field(o, &["name", "polity_name"])
                    .and_then(value_text)
                    .unwrap_or_default();
                Some(polity_intent(&kind, region, name))
            })
        },
    )
}

fn polity_intent(kind: &str, region: String, name: String) -> Option<PolityIntent> {
    let region = super::clean_reference(&region);
    let name = super::clean_reference(&name);

    match kind.trim().to_ascii_lowercase().as_str() {
        "add" | "found" | "create" if !region.is_empty() && !name.is_empty() => {
            Some(PolityIntent::Found { region, name })
        }
        "remove" | "dissolve" | "delete" if !name.is_empty() => {
            Some(PolityIntent::Dissolve { polity: name })
        }
        _ => None,
    }
}

/// Title and content for a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Option<String>,
    pub value: Option<String>,
}

pub fn parse_key_value(reply: &str) -> Option<Parsed<KeyValue>> {
    interpret(
        reply,
        |r| {
            let tags = tag_lines(r);
            let pick = |name: &str| {
                tags.iter()
                    .find(|t| t.tag == name)
                    .map(|t| t.body.trim().to_string())
                    .filter(|text| !text.is_empty())
            };
            let parsed = KeyValue {
                key: pick("KEY"),
                value: pick("VALUE"),
            };
            (parsed.key.is_some() || parsed.value.is_some()).then_some(parsed)
        },
        |fragments| {
            objects(fragments).into_iter().find_map(|o| {
                let text = |names: &[&str]| {
                    field(o, names)
                        .and_then(value_text)
                        .filter(|t| !t.is_empty())
                };
                let parsed = KeyValue {
                    key: text(&["key", "title", "name"]),
                    value: text(&["value", "content", "description"]),
                };
                (parsed.key.is_some() || parsed.value.is_some()).then_some(parsed)
            })
        },
    )
}

/// The first JSON object in the reply that looks like a character profile.
pub fn parse_profile_object(reply: &str) -> Option<Map<String, Value>> {
    let fragments = super::json_fragments(reply);
    let candidates = objects(&fragments);
    candidates
        .iter()
        .find(|o| PROFILE_FIELDS.iter().any(|f| o.contains_key(*f)))
        .or_else(|| candidates.first())
        .map(|o| (*o).clone())
}
