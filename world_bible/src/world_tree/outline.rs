//! Macro outlines - the numbered skeleton a world's macro subtree is built from.

use serde::{Deserialize, Serialize};

/// Outline used when a world is created without one.
pub const DEFAULT_OUTLINE: &str = "\
1 Cosmology and Foundations
1.1 Origin of the World
1.2 Natural Laws
1.3 Magic and Technology Baseline
2 Geography
2.1 Continents and Seas
2.2 Climate
2.3 Landmarks
3 History
3.1 Ancient Era
3.2 Great Conflicts
3.3 Recent Events
4 Societies
4.1 Peoples and Species
4.2 Faiths
4.3 Languages
5 Power Structures
5.1 Major Powers
5.2 Factions and Orders
5.3 Trade and Wealth
6 Themes and Tone
6.1 Central Conflict
6.2 Mood
6.3 Story Hooks
";

/// A single numbered heading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineEntry {
    /// Dotted number such as `2` or `2.3`.
    pub number: String,
    pub title: String,
    /// Guidance text from the lines following the heading.
    pub hint: String,
}

/// Parsed outline, entries in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroOutline {
    entries: Vec<OutlineEntry>,
}

impl Default for MacroOutline {
    fn default() -> Self {
        Self::parse(DEFAULT_OUTLINE)
    }
}

impl MacroOutline {
    /// Parse outline text.
    ///
    /// Heading lines start with a dotted number (`1`, `1.`, `1.2`). Any other
    /// non-blank line is appended to the previous heading's hint; text before the
    /// first heading is ignored.
    pub fn parse(text: &str) -> Self {
        let mut entries: Vec<OutlineEntry> = Vec::new();

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some((number, title)) = split_heading(line) {
                entries.push(OutlineEntry {
                    number,
                    title,
                    hint: String::new(),
                });
            } else if let Some(last) = entries.last_mut() {
                let hint = line.trim_start_matches(&['-', '*'][..]).trim();
                if !last.hint.is_empty() {
                    last.hint.push(' ');
                }
                last.hint.push_str(hint);
            }
        }

        Self { entries }
    }

    pub fn entries(&self) -> &[OutlineEntry] {
        &self.entries
    }
}

fn split_heading(line: &str) -> Option<(String, String)> {
    let (head, rest) = line.split_once(char::is_whitespace)?;
    let number = head.trim_end_matches('.');
    let is_number = !number.is_empty()
        && number
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()));
    let title = rest.trim();

    if is_number && !title.is_empty() {
        Some((number.to_string(), title.to_string()))
    } else {
        None
    }
}
