//! Search context - the read set accumulated during one pipeline run.

use std::collections::BTreeMap;
use world_bible::{CharacterId, CharacterRecord, NodeId, WorldNode};

use crate::prompts::clip;

const VALUE_PREVIEW: usize = 240;

/// World nodes and character records read so far, plus the rounds spent reading them.
///
/// Only grows during a run; dropped with the run.
#[derive(Debug, Clone, Default)]
pub struct SearchContext {
    world: BTreeMap<NodeId, WorldNode>,
    characters: BTreeMap<CharacterId, CharacterRecord>,
    rounds: u32,
}

impl SearchContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.world.is_empty() && self.characters.is_empty()
    }

    /// Total search rounds run against this context, across accumulation passes.
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub(crate) fn finish_round(&mut self) {
        self.rounds += 1;
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.world.contains_key(id)
    }

    pub fn has_character(&self, id: &str) -> bool {
        self.characters.contains_key(id)
    }

    /// Add a node. Returns `false` if it was already read.
    pub fn insert_node(&mut self, node: WorldNode) -> bool {
        if self.world.contains_key(&node.id) {
            return false;
        }
        self.world.insert(node.id.clone(), node);
        true
    }

    /// Add a character record. Returns `false` if it was already read.
    pub fn insert_character(&mut self, record: CharacterRecord) -> bool {
        if self.characters.contains_key(&record.identifier) {
            return false;
        }
        self.characters.insert(record.identifier.clone(), record);
        true
    }

    pub fn world(&self) -> impl Iterator<Item = &WorldNode> {
        self.world.values()
    }

    pub fn characters(&self) -> impl Iterator<Item = &CharacterRecord> {
        self.characters.values()
    }

    /// One line per read item, identifiers only.
    pub fn read_summary(&self) -> String {
        if self.is_empty() {
            return "nothing yet".to_string();
        }
        let world: Vec<&str> = self.world.keys().map(NodeId::as_str).collect();
        let characters: Vec<&str> = self.characters.keys().map(CharacterId::as_str).collect();
        format!("W: {}\nC: {}", world.join(", "), characters.join(", "))
    }

    /// Format the context as a prompt section.
    pub fn to_prompt_string(&self) -> String {
        let mut prompt = String::new();

        if !self.world.is_empty() {
            prompt.push_str("### World\n");
            for node in self.world.values() {
                prompt.push_str(&format!(
                    "- {} [{}]: {}\n",
                    node.id,
                    node.key,
                    clip(&node.value, VALUE_PREVIEW)
                ));
            }
        }

        if !self.characters.is_empty() {
            prompt.push_str("### Characters\n");
            for record in self.characters.values() {
                prompt.push_str(&format!(
                    "- {} [{}] region={} polity={}: {}\n",
                    record.identifier,
                    record.name(),
                    record.region_id.as_ref().map_or("-", NodeId::as_str),
                    record.polity_id.as_ref().map_or("-", NodeId::as_str),
                    clip(&record.profile.summary, VALUE_PREVIEW)
                ));
            }
        }

        prompt
    }
}

/// Identifier and title of every node and record, for prompts that run without
/// an accumulated context.
pub fn inventory(nodes: &[WorldNode], records: &[CharacterRecord]) -> String {
    let mut out = String::from("### World\n");
    for node in nodes {
        out.push_str(&format!("- {} [{}]\n", node.id, node.key));
    }
    out.push_str("### Characters\n");
    if records.is_empty() {
        out.push_str("- none\n");
    }
    for record in records {
        out.push_str(&format!("- {} [{}]\n", record.identifier, record.name()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use world_bible::{CharacterProfile, CharacterRoster, WorldTree, MICRO_ID};

    #[test]
    fn test_insert_is_idempotent() {
        let tree = WorldTree::new();
        let micro = tree.get(MICRO_ID).unwrap().clone();

        let mut ctx = SearchContext::new();
        assert!(ctx.is_empty());
        assert!(ctx.insert_node(micro.clone()));
        assert!(!ctx.insert_node(micro));
        assert!(ctx.has_node(MICRO_ID));
        assert_eq!(ctx.world().count(), 1);
    }

    #[test]
    fn test_prompt_string_lists_both_sections() {
        let mut tree = WorldTree::new();
        let region = tree.add_child(MICRO_ID, "Ashreach").unwrap();
        tree.set_value(region.as_str(), "Windswept uplands").unwrap();

        let mut roster = CharacterRoster::new();
        let mut profile = CharacterProfile::named("Ilsa");
        profile.summary = "A courier".into();
        roster.insert(profile, Some(region.clone()), None).unwrap();

        let mut ctx = SearchContext::new();
        ctx.insert_node(tree.get(region.as_str()).unwrap().clone());
        ctx.insert_character(roster.records()[0].clone());

        let prompt = ctx.to_prompt_string();
        assert!(prompt.contains("- micro.r1 [Ashreach]: Windswept uplands"));
        assert!(prompt.contains("- c1 [Ilsa] region=micro.r1 polity=-: A courier"));
        assert_eq!(ctx.read_summary(), "W: micro.r1\nC: c1");
    }
}
