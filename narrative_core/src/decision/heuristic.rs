//! Keyword classifier used when the scope reply cannot be parsed.

use world_bible::{CharacterRecord, NodeRole, WorldNode};

use super::GameUpdateDecision;
use crate::config::HeuristicConfig;
use crate::context_assembler::contains_term;

/// The first keyword (or its plural) present in the lower-cased text.
pub fn keyword_hit<'a>(text: &str, keywords: &'a [String]) -> Option<&'a str> {
    keywords
        .iter()
        .map(String::as_str)
        .find(|keyword| {
            let keyword = keyword.to_lowercase();
            if contains_term(text, &keyword) {
                return true;
            }
            keyword.is_ascii()
                && (contains_term(text, &format!("{}s", keyword))
                    || contains_term(text, &format!("{}es", keyword)))
        })
}

/// Infer the update scope from the narrative text alone.
///
/// World and character signals flip their flags independently. A long narrative
/// with no signal at all updates both.
pub fn classify(
    narrative: &str,
    nodes: &[WorldNode],
    records: &[CharacterRecord],
    config: &HeuristicConfig,
) -> GameUpdateDecision {
    let text = narrative.to_lowercase();
    let mut reasons = Vec::new();
    let mut world = false;
    let mut characters = false;

    if let Some(keyword) = keyword_hit(&text, &config.world_keywords) {
        world = true;
        reasons.push(format!("world keyword '{}'", keyword));
    }
    if let Some(keyword) = keyword_hit(&text, &config.character_keywords) {
        characters = true;
        reasons.push(format!("character keyword '{}'", keyword));
    }

    if !characters {
        let named = records.iter().find(|r| {
            contains_term(&text, &r.identifier.as_str().to_lowercase())
                || contains_term(&text, &r.name().to_lowercase())
        });
        if let Some(record) = named {
            characters = true;
            reasons.push(format!("mentions {}", record.identifier));
        }
    }

    if !world {
        let named = nodes
            .iter()
            .filter(|n| {
                !matches!(
                    n.role,
                    NodeRole::Root | NodeRole::MacroRoot | NodeRole::MicroRoot
                )
            })
            .take(config.key_scan_limit)
            .find(|n| contains_term(&text, &n.key.to_lowercase()));
        if let Some(node) = named {
            world = true;
            reasons.push(format!("mentions {}", node.id));
        }
    }

    if !world && !characters && narrative.chars().count() > config.long_text_threshold {
        world = true;
        characters = true;
        reasons.push("long narrative without recognised signals".to_string());
    }

    let reason = if reasons.is_empty() {
        "heuristic: no signal".to_string()
    } else {
        format!("heuristic: {}", reasons.join("; "))
    };

    GameUpdateDecision {
        update_world: world,
        update_characters: characters,
        reason,
        raw: String::new(),
    }
}
