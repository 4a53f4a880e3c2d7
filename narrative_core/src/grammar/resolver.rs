//! Reference resolution - free-text references to canonical identifiers.
//!
//! Resolution order:
//! 1. Exact identifier (also the `id` in `id/key` and `id key` shapes)
//! 2. Unique case-insensitive key or name match
//!
//! A reference matching several candidates is never guessed at.

use std::collections::HashMap;
use world_bible::{CharacterId, CharacterRecord, NodeId, WorldNode};

use super::clean_reference;

/// Why a reference could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unresolved {
    Blank,
    NotFound(String),
    Ambiguous {
        reference: String,
        candidates: Vec<String>,
    },
}

impl std::fmt::Display for Unresolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unresolved::Blank => write!(f, "empty reference"),
            Unresolved::NotFound(reference) => write!(f, "no match for '{}'", reference),
            Unresolved::Ambiguous {
                reference,
                candidates,
            } => write!(
                f,
                "'{}' matches {} candidates: {}",
                reference,
                candidates.len(),
                candidates.join(", ")
            ),
        }
    }
}

/// Identifier-shaped readings of a reference, most literal first.
fn id_forms(cleaned: &str) -> Vec<String> {
    let mut forms = vec![cleaned.to_string()];
    if let Some((head, _)) = cleaned.split_once('/') {
        forms.push(clean_reference(head));
    }
    if let Some(token) = cleaned.split_whitespace().next() {
        forms.push(clean_reference(token));
    }
    forms.dedup();
    forms
}

/// Name-shaped readings of a reference, lower-cased.
fn name_forms(cleaned: &str) -> Vec<String> {
    let lowered = cleaned.to_lowercase();
    let mut forms = vec![lowered.clone()];
    if let Some((_, tail)) = lowered.split_once('/') {
        forms.push(clean_reference(tail));
    }
    if let Some(rest) = lowered.strip_prefix("the ") {
        forms.push(rest.trim().to_string());
    }
    forms.retain(|f| !f.is_empty());
    forms.dedup();
    forms
}

fn resolve_by<'a, T, Id: Clone + 'a>(
    reference: &str,
    items: &'a [T],
    id_of: impl Fn(&'a T) -> &'a Id,
    id_text: impl Fn(&Id) -> &str,
    name_of: impl Fn(&'a T) -> &'a str,
    ids_ignore_case: bool,
) -> Result<Id, Unresolved> {
    let cleaned = clean_reference(reference);
    if cleaned.is_empty() {
        return Err(Unresolved::Blank);
    }

    for form in id_forms(&cleaned) {
        let hit = items.iter().map(&id_of).find(|id| {
            let text = id_text(*id);
            text == form || (ids_ignore_case && text.eq_ignore_ascii_case(&form))
        });
        if let Some(id) = hit {
            return Ok(id.clone());
        }
    }

    let mut names: HashMap<String, Vec<&Id>> = HashMap::new();
    for item in items {
        let name = name_of(item).trim().to_lowercase();
        if !name.is_empty() {
            names.entry(name).or_default().push(id_of(item));
        }
    }

    for form in name_forms(&cleaned) {
        match names.get(&form).map(Vec::as_slice) {
            Some([only]) => return Ok((*only).clone()),
            Some(many) if many.len() > 1 => {
                return Err(Unresolved::Ambiguous {
                    reference: cleaned,
                    candidates: many.iter().map(|id| id_text(*id).to_string()).collect(),
                })
            }
            _ => {}
        }
    }

    Err(Unresolved::NotFound(cleaned))
}

/// Resolve a world-node reference against a node set.
pub fn resolve_node(reference: &str, nodes: &[WorldNode]) -> Result<NodeId, Unresolved> {
    resolve_by(
        reference,
        nodes,
        |n| &n.id,
        NodeId::as_str,
        |n| n.key.as_str(),
        false,
    )
}

/// Resolve a character reference by identifier, then by unique name.
pub fn resolve_character(
    reference: &str,
    records: &[CharacterRecord],
) -> Result<CharacterId, Unresolved> {
    resolve_by(
        reference,
        records,
        |r| &r.identifier,
        CharacterId::as_str,
        |r| r.profile.name.as_str(),
        true,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use world_bible::{CharacterProfile, CharacterRoster, TreeStore, WorldTree, MICRO_ID};

    fn sample_nodes() -> Vec<WorldNode> {
        let mut tree = WorldTree::new();
        let r1 = tree.add_child(MICRO_ID, "Ashreach").unwrap();
        tree.add_child(r1.as_str(), "Kingdom of Veyra").unwrap();
        let r2 = tree.add_child(MICRO_ID, "Thornwood").unwrap();
        tree.add_child(r2.as_str(), "Thornwood Confederacy").unwrap();
        TreeStore::nodes(&tree)
    }

    fn sample_records() -> Vec<CharacterRecord> {
        let mut roster = CharacterRoster::new();
        roster.insert(CharacterProfile::named("Ilsa Maren"), None, None).unwrap();
        roster.insert(CharacterProfile::named("Oren"), None, None).unwrap();
        roster.insert(CharacterProfile::named("Oren"), None, None).unwrap();
        roster.records().to_vec()
    }

    #[test]
    fn test_exact_identifier_wins() {
        let nodes = sample_nodes();
        assert_eq!(resolve_node("micro.r1", &nodes), Ok(NodeId::new("micro.r1")));
        assert_eq!(
            resolve_node("micro.r2.p1/Thornwood Confederacy", &nodes),
            Ok(NodeId::new("micro.r2.p1"))
        );
        assert_eq!(
            resolve_node("\"micro.r1.p1 Veyra\"", &nodes),
            Ok(NodeId::new("micro.r1.p1"))
        );
    }

    #[test]
    fn test_unique_key_case_insensitive() {
        let nodes = sample_nodes();
        assert_eq!(
            resolve_node("the kingdom of veyra", &nodes),
            Ok(NodeId::new("micro.r1.p1"))
        );
        assert_eq!(resolve_node("THORNWOOD", &nodes), Ok(NodeId::new("micro.r2")));
    }

    #[test]
    fn test_ambiguous_key_is_unresolved() {
        let nodes = sample_nodes();
        match resolve_node("Culture", &nodes) {
            Err(Unresolved::Ambiguous { candidates, .. }) => assert_eq!(candidates.len(), 2),
            other => panic!("expected ambiguity, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_and_blank() {
        let nodes = sample_nodes();
        assert_eq!(
            resolve_node("Glasswater", &nodes),
            Err(Unresolved::NotFound("Glasswater".into()))
        );
        assert_eq!(resolve_node("  ''  ", &nodes), Err(Unresolved::Blank));
    }

    #[test]
    fn test_character_by_id_and_name() {
        let records = sample_records();
        assert_eq!(resolve_character("C1", &records), Ok(CharacterId::new("c1")));
        assert_eq!(
            resolve_character("ilsa maren", &records),
            Ok(CharacterId::new("c1"))
        );
    }

    #[test]
    fn test_duplicate_character_name_is_ambiguous() {
        let records = sample_records();
        assert!(matches!(
            resolve_character("Oren", &records),
            Err(Unresolved::Ambiguous { .. })
        ));
    }
}
