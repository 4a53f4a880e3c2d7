//! Polity merge transaction.
//!
//! A merge runs when the narrative uses merge vocabulary and names at least two
//! existing polities. The model picks the survivor and the polities it absorbs,
//! both from among the named ones; a polity the narrative merely mentions is
//! never removed. Every piece of content is generated before anything is
//! written:
//!
//! 1. Rewrite the survivor and its aspects
//! 2. Remove every absorbed polity with its subtree
//! 3. Rebind characters of absorbed polities to the survivor
//! 4. Revise reassigned characters and those already living under the survivor

use serde::Serialize;
use tracing::{debug, info, warn};
use world_bible::{
    CharacterId, CharacterProfile, CharacterRecord, NodeId, NodeRole, RecordStore, TreeStore,
    WorldNode,
};

use crate::character_engine::{AppliedCharacterAction, CharacterEngine};
use crate::completion::ModelChannel;
use crate::config::HeuristicConfig;
use crate::context_assembler::contains_term;
use crate::decision::keyword_hit;
use crate::error::Result;
use crate::grammar::{parse_merge_pick, resolve_node, ActionFlag, CharacterFlag, MergePick};
use crate::prompts::{self, Stage};
use crate::world_engine::{read_key_value, AppliedWorldAction, WorldEngine};

/// What a committed merge changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub survivor: NodeId,
    pub absorbed: Vec<NodeId>,
    pub removed: Vec<NodeId>,
    pub reassigned: Vec<CharacterId>,
    pub world_actions: Vec<AppliedWorldAction>,
    pub character_actions: Vec<AppliedCharacterAction>,
}

/// Polities named by a narrative that talks about merging, if at least two.
pub fn detect_merge(narrative: &str, nodes: &[WorldNode], heuristics: &HeuristicConfig) -> Option<Vec<NodeId>> {
    let text = narrative.to_lowercase();
    keyword_hit(&text, &heuristics.merge_keywords)?;

    let named: Vec<NodeId> = nodes
        .iter()
        .filter(|n| n.role == NodeRole::Polity)
        .filter(|n| {
            contains_term(&text, &n.key.to_lowercase())
                || contains_term(&text, &n.id.as_str().to_lowercase())
        })
        .map(|n| n.id.clone())
        .collect();

    (named.len() >= 2).then_some(named)
}

pub struct PolityMerge<'a> {
    channel: &'a ModelChannel<'a>,
    world: &'a WorldEngine<'a>,
    characters: &'a CharacterEngine<'a>,
    heuristics: &'a HeuristicConfig,
}

impl<'a> PolityMerge<'a> {
    pub fn new(
        channel: &'a ModelChannel<'a>,
        world: &'a WorldEngine<'a>,
        characters: &'a CharacterEngine<'a>,
        heuristics: &'a HeuristicConfig,
    ) -> Self {
        Self {
            channel,
            world,
            characters,
            heuristics,
        }
    }

    /// Detect and run a merge. `None` means the narrative is not a merge, or the
    /// model declined or named no usable survivor and absorbed polity.
    pub fn run(
        &self,
        tree: &mut dyn TreeStore,
        roster: &mut dyn RecordStore,
        narrative: &str,
    ) -> Result<Option<MergeOutcome>> {
        let nodes = tree.nodes();
        let Some(candidate_ids) = detect_merge(narrative, &nodes, self.heuristics) else {
            return Ok(None);
        };
        let candidates: Vec<WorldNode> = nodes
            .into_iter()
            .filter(|n| candidate_ids.contains(&n.id))
            .collect();

        let Some((survivor, absorbed)) = self.pick_survivor(narrative, &candidates) else {
            return Ok(None);
        };
        let absorbed_ids: Vec<NodeId> = absorbed.iter().map(|n| n.id.clone()).collect();
        let absorbed_keys: Vec<String> = absorbed.iter().map(|n| format!("{} ({})", n.key, n.id)).collect();
        info!(survivor = %survivor.id, absorbed = ?absorbed_ids, "Merging polities");

        // Prepare: every model call happens before the first write.
        let body = prompts::merge_update(narrative, &survivor, &absorbed_keys);
        let survivor_content = read_key_value(&self.channel.ask(Stage::NodeContent, &body));
        let aspect_contents = self.world.aspect_contents(tree, narrative, &survivor)?;
        let survivor_region = tree
            .enclosing(survivor.id.as_str(), NodeRole::Region)
            .map(|r| r.id);

        let mut rebinds: Vec<CharacterId> = Vec::new();
        let mut revisions: Vec<(CharacterId, Option<CharacterProfile>)> = Vec::new();
        for record in roster.list() {
            let moving = record
                .polity_id
                .as_ref()
                .is_some_and(|p| absorbed_ids.contains(p));
            let staying = record.polity_id.as_ref() == Some(&survivor.id);
            if !moving && !staying {
                continue;
            }

            let (view, reason) = if moving {
                let moved = CharacterRecord {
                    region_id: survivor_region.clone(),
                    polity_id: Some(survivor.id.clone()),
                    ..record.clone()
                };
                rebinds.push(record.identifier.clone());
                (
                    moved,
                    format!("Their polity was absorbed into {}.", survivor.key),
                )
            } else {
                (
                    record.clone(),
                    format!("Their polity absorbed {}.", absorbed_keys.join(", ")),
                )
            };
            let revised = self.characters.revise(tree, &view, narrative, &reason);
            revisions.push((record.identifier, revised));
        }

        // Commit.
        self.world.write_content(tree, &survivor, survivor_content)?;
        for (aspect, value) in &aspect_contents {
            tree.update(aspect.as_str(), value)?;
        }

        let mut outcome = MergeOutcome {
            survivor: survivor.id.clone(),
            absorbed: absorbed_ids.clone(),
            removed: Vec::new(),
            reassigned: rebinds.clone(),
            world_actions: vec![AppliedWorldAction {
                flag: ActionFlag::Update,
                target: survivor.id.clone(),
                created: Vec::new(),
                removed: Vec::new(),
                note: Some("merge survivor".to_string()),
            }],
            character_actions: Vec::new(),
        };

        for id in &absorbed_ids {
            let removed = tree.remove(id.as_str())?;
            debug!(%id, count = removed.len(), "Removed absorbed polity");
            outcome.removed.extend(removed.iter().cloned());
            outcome.world_actions.push(AppliedWorldAction {
                flag: ActionFlag::Remove,
                target: id.clone(),
                created: Vec::new(),
                removed,
                note: Some(format!("absorbed by {}", survivor.id)),
            });
        }

        for id in &rebinds {
            roster.rebind(id.as_str(), survivor_region.clone(), Some(survivor.id.clone()))?;
        }

        for (id, revised) in revisions {
            let note = match revised {
                Some(profile) => {
                    roster.update(id.as_str(), profile)?;
                    None
                }
                None => Some("no usable revision, profile kept".to_string()),
            };
            outcome.character_actions.push(AppliedCharacterAction {
                flag: CharacterFlag::Update,
                identifier: id,
                note,
            });
        }

        Ok(Some(outcome))
    }

    /// The survivor and the polities it absorbs. Absorbed references must name
    /// other candidates. A reply without one is only usable when exactly two
    /// polities are involved.
    fn pick_survivor<'c>(
        &self,
        narrative: &str,
        candidates: &'c [WorldNode],
    ) -> Option<(WorldNode, Vec<&'c WorldNode>)> {
        let lines: Vec<String> = candidates.iter().map(|c| format!("{} {}", c.id, c.key)).collect();
        let reply = self.channel.ask(Stage::MergeSurvivor, &prompts::merge_survivor(narrative, &lines));

        let (keep, removals) = match parse_merge_pick(&reply).map(|p| p.value) {
            Some(MergePick::Keep { survivor, absorbed }) => (survivor, absorbed),
            Some(MergePick::Decline) => {
                info!("Model declined the merge");
                return None;
            }
            None => {
                warn!("Merge survivor reply unreadable");
                return None;
            }
        };

        let survivor = match resolve_node(&keep, candidates) {
            Ok(id) => candidates.iter().find(|c| c.id == id)?.clone(),
            Err(reason) => {
                warn!(%reason, "Merge survivor not among candidates");
                return None;
            }
        };
        let others: Vec<WorldNode> = candidates
            .iter()
            .filter(|c| c.id != survivor.id)
            .cloned()
            .collect();

        let mut absorbed: Vec<&WorldNode> = Vec::new();
        for reference in &removals {
            match resolve_node(reference, &others) {
                Ok(id) => {
                    if let Some(node) = candidates.iter().find(|c| c.id == id) {
                        if !absorbed.iter().any(|a| a.id == node.id) {
                            absorbed.push(node);
                        }
                    }
                }
                Err(reason) => warn!(%reason, "Ignoring absorbed polity"),
            }
        }

        if absorbed.is_empty() {
            if others.len() != 1 {
                warn!(candidates = candidates.len(), "Merge reply names no absorbed polity");
                return None;
            }
            absorbed.extend(candidates.iter().filter(|c| c.id != survivor.id));
        }
        Some((survivor, absorbed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompletionConfig;
    use crate::testing::ScriptedCompletion;
    use world_bible::{CharacterRoster, WorldTree, MICRO_ID, POLITY_ASPECTS};

    fn setup() -> (WorldTree, CharacterRoster) {
        let mut tree = WorldTree::new();
        let r1 = tree.add_child(MICRO_ID, "Ashreach").unwrap();
        let veyra = tree.add_child(r1.as_str(), "Kingdom of Veyra").unwrap();
        let r2 = tree.add_child(MICRO_ID, "Thornwood").unwrap();
        let thorn = tree.add_child(r2.as_str(), "Thornwood Confederacy").unwrap();

        let mut roster = CharacterRoster::new();
        roster.insert(CharacterProfile::named("Ilsa"), Some(r1), Some(veyra)).unwrap();
        roster.insert(CharacterProfile::named("Oren"), Some(r2), Some(thorn)).unwrap();
        roster.insert(CharacterProfile::named("Pell"), None, None).unwrap();
        (tree, roster)
    }

    fn run(
        service: &ScriptedCompletion,
        tree: &mut WorldTree,
        roster: &mut CharacterRoster,
        narrative: &str,
    ) -> Option<MergeOutcome> {
        let channel = ModelChannel::new(service, 0);
        let heuristics = HeuristicConfig::default();
        let completion = CompletionConfig::default();
        let world = WorldEngine::new(&channel, &heuristics);
        let characters = CharacterEngine::new(&channel, &completion);
        PolityMerge::new(&channel, &world, &characters, &heuristics)
            .run(tree, roster, narrative)
            .unwrap()
    }

    #[test]
    fn test_detect_needs_vocabulary_and_two_polities() {
        let (tree, _) = setup();
        let nodes = TreeStore::nodes(&tree);
        let heuristics = HeuristicConfig::default();

        assert!(detect_merge(
            "The Kingdom of Veyra is absorbed by the Thornwood Confederacy",
            &nodes,
            &heuristics
        )
        .is_some());
        assert!(detect_merge(
            "The Kingdom of Veyra trades with the Thornwood Confederacy",
            &nodes,
            &heuristics
        )
        .is_none());
        assert!(detect_merge("The Kingdom of Veyra is absorbed", &nodes, &heuristics).is_none());
    }

    #[test]
    fn test_merge_removes_absorbed_and_rebinds_characters() {
        let service = ScriptedCompletion::new()
            .reply(Stage::MergeSurvivor, "KEEP=micro.r2.p1")
            .reply(Stage::NodeContent, "<|VALUE|>:Now spans both valleys")
            .reply(Stage::AspectContent, "<|VALUE|>:Merged")
            .reply(Stage::CharacterRevision, "{\"faction\": \"Thornwood Confederacy\"}");
        let (mut tree, mut roster) = setup();
        let before = tree.len();

        let outcome = run(
            &service,
            &mut tree,
            &mut roster,
            "The Kingdom of Veyra is absorbed by the Thornwood Confederacy",
        )
        .unwrap();

        assert_eq!(outcome.survivor, NodeId::new("micro.r2.p1"));
        assert!(!tree.contains("micro.r1.p1"));
        assert_eq!(tree.len(), before - 1 - POLITY_ASPECTS.len());
        assert_eq!(outcome.removed.len(), 1 + POLITY_ASPECTS.len());
        assert_eq!(tree.get("micro.r2.p1").unwrap().value, "Now spans both valleys");

        let ilsa = roster.get("c1").unwrap();
        assert_eq!(ilsa.polity_id, Some(NodeId::new("micro.r2.p1")));
        assert_eq!(ilsa.region_id, Some(NodeId::new("micro.r2")));
        assert_eq!(ilsa.profile.faction, "Thornwood Confederacy");
        assert_eq!(roster.get("c2").unwrap().profile.faction, "Thornwood Confederacy");
        assert_eq!(roster.get("c3").unwrap().profile.faction, "");
        assert_eq!(outcome.reassigned, vec![CharacterId::new("c1")]);
        assert_eq!(outcome.character_actions.len(), 2);
    }

    #[test]
    fn test_bystander_polity_survives_annexation() {
        let service = ScriptedCompletion::new()
            .reply(Stage::MergeSurvivor, "KEEP=micro.r1.p1; REMOVE=micro.r3.p1")
            .reply(Stage::NodeContent, "<|VALUE|>:Veyra now holds the salt roads")
            .reply(Stage::AspectContent, "<|VALUE|>:Merged")
            .reply(Stage::CharacterRevision, "{\"faction\": \"Kingdom of Veyra\"}");
        let (mut tree, mut roster) = setup();
        let r3 = tree.add_child(MICRO_ID, "Saltmarsh").unwrap();
        let league = tree.add_child(r3.as_str(), "Salt League").unwrap();
        roster.insert(CharacterProfile::named("Quill"), Some(r3), Some(league)).unwrap();

        let outcome = run(
            &service,
            &mut tree,
            &mut roster,
            "The Kingdom of Veyra annexes the Salt League while the Thornwood Confederacy watches",
        )
        .unwrap();

        assert_eq!(outcome.survivor, NodeId::new("micro.r1.p1"));
        assert_eq!(outcome.absorbed, vec![NodeId::new("micro.r3.p1")]);
        assert!(!tree.contains("micro.r3.p1"));
        assert!(tree.contains("micro.r2.p1"));
        assert_eq!(tree.get("micro.r2.p1").unwrap().children.len(), POLITY_ASPECTS.len());
        assert_eq!(roster.get("c2").unwrap().polity_id, Some(NodeId::new("micro.r2.p1")));
        assert_eq!(roster.get("c4").unwrap().polity_id, Some(NodeId::new("micro.r1.p1")));
        assert_eq!(outcome.reassigned, vec![CharacterId::new("c4")]);
    }

    #[test]
    fn test_three_polities_without_removal_is_declined() {
        let service = ScriptedCompletion::new().reply(Stage::MergeSurvivor, "KEEP=micro.r1.p1");
        let (mut tree, mut roster) = setup();
        let r3 = tree.add_child(MICRO_ID, "Saltmarsh").unwrap();
        tree.add_child(r3.as_str(), "Salt League").unwrap();
        let before = tree.snapshot();

        let outcome = run(
            &service,
            &mut tree,
            &mut roster,
            "The Kingdom of Veyra annexes the Salt League while the Thornwood Confederacy watches",
        );
        assert!(outcome.is_none());
        assert_eq!(tree.snapshot(), before);
        assert_eq!(service.call_count(Stage::NodeContent), 0);
    }

    #[test]
    fn test_declined_merge_changes_nothing() {
        let service = ScriptedCompletion::new().reply(Stage::MergeSurvivor, "MERGE=NO");
        let (mut tree, mut roster) = setup();
        let before = tree.snapshot();

        let outcome = run(
            &service,
            &mut tree,
            &mut roster,
            "Veyra wishes it could absorb the Thornwood Confederacy and the Kingdom of Veyra",
        );
        assert!(outcome.is_none());
        assert_eq!(tree.snapshot(), before);
    }
}
