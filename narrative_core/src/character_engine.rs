//! Character record mutation engine.

use serde::Serialize;
use tracing::{debug, info, warn};
use world_bible::{
    CharacterId, CharacterProfile, CharacterRecord, MountPoint, RecordStore, TreeStore,
};

use crate::completion::ModelChannel;
use crate::config::CompletionConfig;
use crate::context_assembler::{contains_term, scan_narrative};
use crate::error::Result;
use crate::grammar::{
    parse_character_actions, parse_profile_object, resolve_character, CharacterActionDecision,
    CharacterFlag, CharacterIntent, Target,
};
use crate::prompts::{self, clip, Stage};
use crate::world_engine::micro_outline;

/// One committed character action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedCharacterAction {
    pub flag: CharacterFlag,
    pub identifier: CharacterId,
    pub note: Option<String>,
}

/// Mount points the narrative points at: polities it names, else regions it
/// names, else none (the character stays unanchored).
pub fn select_mounts(points: &[MountPoint], narrative: &str) -> Vec<MountPoint> {
    let text = narrative.to_lowercase();

    let by_polity: Vec<MountPoint> = points
        .iter()
        .filter(|p| {
            p.polity_key
                .as_ref()
                .is_some_and(|k| contains_term(&text, &k.to_lowercase()))
        })
        .cloned()
        .collect();
    if !by_polity.is_empty() {
        return by_polity;
    }

    let by_region: Vec<MountPoint> = points
        .iter()
        .filter(|p| contains_term(&text, &p.region_key.to_lowercase()))
        .cloned()
        .collect();
    if !by_region.is_empty() {
        return by_region;
    }

    Vec::new()
}

/// Placement of one character of the initial roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CharacterBlueprint {
    pub slot: usize,
    pub mount: Option<MountPoint>,
}

/// `total` placements cycling over `points`; all unanchored when there are none.
pub fn build_blueprints(points: &[MountPoint], total: usize) -> Vec<CharacterBlueprint> {
    (0..total)
        .map(|slot| CharacterBlueprint {
            slot,
            mount: (!points.is_empty()).then(|| points[slot % points.len()].clone()),
        })
        .collect()
}

/// Human-readable home of a record.
pub fn home_of(tree: &dyn TreeStore, record: &CharacterRecord) -> String {
    let key = |id: &Option<world_bible::NodeId>| {
        id.as_ref()
            .and_then(|id| tree.view(id.as_str()).ok())
            .map(|n| format!("{} ({})", n.key, n.id))
    };
    match (key(&record.region_id), key(&record.polity_id)) {
        (Some(region), Some(polity)) => format!("{} / {}", region, polity),
        (Some(region), None) => region,
        (None, Some(polity)) => polity,
        (None, None) => "unanchored".to_string(),
    }
}

/// One line per planned action, for validation prompts.
pub fn summarize(actions: &[CharacterActionDecision]) -> String {
    actions
        .iter()
        .map(|action| match &action.intent {
            CharacterIntent::Add { pitch } => {
                format!("ADD character: {}", pitch.as_deref().unwrap_or("(unspecified)"))
            }
            CharacterIntent::Update { target } => format!("UPDATE {}", target),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn roster_listing(records: &[CharacterRecord]) -> String {
    if records.is_empty() {
        return "none".to_string();
    }
    records
        .iter()
        .map(|r| format!("- {} {}: {}", r.identifier, r.name(), clip(&r.profile.summary, 120)))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct CharacterEngine<'a> {
    channel: &'a ModelChannel<'a>,
    config: &'a CompletionConfig,
}

impl<'a> CharacterEngine<'a> {
    pub fn new(channel: &'a ModelChannel<'a>, config: &'a CompletionConfig) -> Self {
        Self { channel, config }
    }

    /// Propose character actions. UPDATE targets are resolved; ambiguous or
    /// unknown ones are dropped.
    pub fn plan(
        &self,
        roster: &dyn RecordStore,
        narrative: &str,
        context: &str,
    ) -> Vec<CharacterActionDecision> {
        let records = roster.list();
        let body = prompts::plan_characters(narrative, context, &roster_listing(&records));
        let reply = self.channel.ask(Stage::PlanCharacters, &body);

        let mut actions = match parse_character_actions(&reply) {
            Some(parsed) => {
                debug!(layer = ?parsed.layer, count = parsed.value.len(), "Character actions parsed");
                parsed.value
            }
            None => {
                let mentioned = scan_narrative(narrative, &[], &records).characters;
                info!(
                    count = mentioned.len(),
                    "Character plan unreadable, revising characters the narrative names"
                );
                mentioned
                    .into_iter()
                    .map(|id| CharacterActionDecision::update(id, reply.trim()))
                    .collect()
            }
        };

        actions.retain_mut(|action| {
            let CharacterIntent::Update {
                target: Target::Unresolved(reference),
            } = &action.intent
            else {
                return true;
            };
            match resolve_character(reference, &records) {
                Ok(id) => {
                    action.intent = CharacterIntent::Update {
                        target: Target::Resolved(id),
                    };
                    true
                }
                Err(reason) => {
                    warn!(%reason, "Dropping character update");
                    false
                }
            }
        });

        let mut unique: Vec<CharacterActionDecision> = Vec::new();
        for action in actions {
            let duplicate = matches!(action.intent, CharacterIntent::Update { .. })
                && unique.iter().any(|u| u.intent == action.intent);
            if !duplicate {
                unique.push(action);
            }
        }
        unique
    }

    /// Commit planned actions. New characters are spread round-robin over the
    /// mount points the narrative points at.
    pub fn apply(
        &self,
        tree: &dyn TreeStore,
        roster: &mut dyn RecordStore,
        narrative: &str,
        actions: &[CharacterActionDecision],
    ) -> Result<Vec<AppliedCharacterAction>> {
        let mounts = select_mounts(&tree.mount_points(), narrative);
        let outline = micro_outline(&tree.nodes());
        let mut next_mount = 0;
        let mut applied = Vec::new();

        for action in actions {
            match &action.intent {
                CharacterIntent::Add { pitch } => {
                    let mount = (!mounts.is_empty()).then(|| &mounts[next_mount % mounts.len()]);
                    next_mount += 1;

                    let profile = self.generate_profile(narrative, mount, pitch.as_deref(), &outline);
                    let identifier = roster.add(
                        profile,
                        mount.map(|m| m.region_id.clone()),
                        mount.and_then(|m| m.polity_id.clone()),
                    )?;
                    info!(%identifier, anchor = ?mount.map(|m| m.anchor()), "Created character");
                    applied.push(AppliedCharacterAction {
                        flag: CharacterFlag::Add,
                        identifier,
                        note: None,
                    });
                }
                CharacterIntent::Update { target } => {
                    let Some(id) = target.resolved() else {
                        continue;
                    };
                    let record = roster.get(id.as_str())?;
                    let revised = self.revise(tree, &record, narrative, "The narrative involves this character.");
                    let note = match revised {
                        Some(profile) => {
                            roster.update(id.as_str(), profile)?;
                            None
                        }
                        None => Some("no usable revision, profile kept".to_string()),
                    };
                    applied.push(AppliedCharacterAction {
                        flag: CharacterFlag::Update,
                        identifier: id.clone(),
                        note,
                    });
                }
            }
        }

        Ok(applied)
    }

    /// Populate an empty roster with `total` characters spread round-robin over
    /// the world's mount points. A roster that already holds records is left
    /// alone and nothing is returned.
    pub fn generate_characters(
        &self,
        tree: &dyn TreeStore,
        roster: &mut dyn RecordStore,
        premise: &str,
        total: usize,
    ) -> Result<Vec<CharacterId>> {
        if !roster.list().is_empty() {
            info!("Roster already populated, no initial characters generated");
            return Ok(Vec::new());
        }

        let outline = micro_outline(&tree.nodes());
        let mut created = Vec::new();
        for blueprint in build_blueprints(&tree.mount_points(), total) {
            let mount = blueprint.mount.as_ref();
            let profile = self.generate_profile(premise, mount, None, &outline);
            let identifier = roster.add(
                profile,
                mount.map(|m| m.region_id.clone()),
                mount.and_then(|m| m.polity_id.clone()),
            )?;
            debug!(%identifier, slot = blueprint.slot, "Initial character created");
            created.push(identifier);
        }

        info!(count = created.len(), "Initial characters generated");
        Ok(created)
    }

    /// Generate a profile for a new character.
    ///
    /// Falls back to a profile holding the pitch as name and the last reply as
    /// summary when no attempt yields a JSON object.
    pub fn generate_profile(
        &self,
        narrative: &str,
        mount: Option<&MountPoint>,
        pitch: Option<&str>,
        outline: &str,
    ) -> CharacterProfile {
        let home = mount.map(MountPoint::display_key);
        let body = prompts::character_profile(narrative, home.as_deref(), pitch, outline);
        let mut last_reply = String::new();

        for attempt in 0..=self.config.profile_retries {
            let reply = self.channel.ask(Stage::CharacterProfile, &body);
            if let Some(fields) = parse_profile_object(&reply) {
                let mut profile = CharacterProfile::from_fields(&fields);
                if profile.name.is_empty() {
                    profile.name = pitch.map(|p| clip(p, 60)).unwrap_or_else(|| "Unnamed".to_string());
                }
                return profile;
            }
            debug!(attempt, "Profile reply has no JSON object");
            if !reply.trim().is_empty() {
                last_reply = reply;
            }
        }

        warn!("Storing best-effort profile from unstructured reply");
        let mut profile = CharacterProfile::named(pitch.map(|p| clip(p, 60)).unwrap_or_else(|| "Unnamed".to_string()));
        profile.summary = if last_reply.trim().is_empty() {
            clip(narrative, 240)
        } else {
            last_reply.trim().to_string()
        };
        profile
    }

    /// A revised profile for `record`, or `None` when no attempt yields a JSON
    /// object. Fields the reply leaves out keep their current values.
    pub fn revise(
        &self,
        tree: &dyn TreeStore,
        record: &CharacterRecord,
        narrative: &str,
        reason: &str,
    ) -> Option<CharacterProfile> {
        let body = prompts::character_revision(narrative, record, &home_of(tree, record), reason);

        for attempt in 0..=self.config.profile_retries {
            let reply = self.channel.ask(Stage::CharacterRevision, &body);
            if let Some(fields) = parse_profile_object(&reply) {
                let mut profile = record.profile.clone();
                let written = profile.merge_fields(&fields);
                debug!(identifier = %record.identifier, written, "Profile revised");
                return Some(profile);
            }
            debug!(identifier = %record.identifier, attempt, "Revision reply has no JSON object");
        }

        warn!(identifier = %record.identifier, "No usable revision");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedCompletion;
    use world_bible::{CharacterRoster, NodeId, WorldTree, MICRO_ID};

    fn setup() -> (WorldTree, CharacterRoster) {
        let mut tree = WorldTree::new();
        let r1 = tree.add_child(MICRO_ID, "Ashreach").unwrap();
        let veyra = tree.add_child(r1.as_str(), "Kingdom of Veyra").unwrap();
        let r2 = tree.add_child(MICRO_ID, "Thornwood").unwrap();
        tree.add_child(r2.as_str(), "Thornwood Confederacy").unwrap();

        let mut roster = CharacterRoster::new();
        let mut ilsa = CharacterProfile::named("Ilsa");
        ilsa.summary = "A courier".into();
        ilsa.species = "Human".into();
        roster.insert(ilsa, Some(r1), Some(veyra)).unwrap();
        (tree, roster)
    }

    fn run(
        service: &ScriptedCompletion,
        tree: &WorldTree,
        roster: &mut CharacterRoster,
        narrative: &str,
    ) -> Vec<AppliedCharacterAction> {
        let channel = ModelChannel::new(service, 0);
        let config = CompletionConfig::default();
        let engine = CharacterEngine::new(&channel, &config);
        let actions = engine.plan(roster, narrative, "");
        engine.apply(tree, roster, narrative, &actions).unwrap()
    }

    #[test]
    fn test_add_anchors_to_named_polity() {
        let service = ScriptedCompletion::new()
            .reply(Stage::PlanCharacters, "<|ADD_CHARACTER|>:a border scout")
            .reply(
                Stage::CharacterProfile,
                "{\"name\": \"Mara\", \"summary\": \"Scout\", \"abilities\": [\"tracking\", \"archery\"]}",
            );
        let (tree, mut roster) = setup();
        let applied = run(&service, &tree, &mut roster, "A scout from the Thornwood Confederacy appears.");

        assert_eq!(applied[0].identifier, "c2");
        let record = roster.get("c2").unwrap();
        assert_eq!(record.profile.name, "Mara");
        assert_eq!(record.profile.abilities, "tracking, archery");
        assert_eq!(record.polity_id, Some(NodeId::new("micro.r2.p1")));
        assert_eq!(record.region_id, Some(NodeId::new("micro.r2")));
    }

    #[test]
    fn test_adds_round_robin_over_mounts() {
        let service = ScriptedCompletion::new()
            .reply(Stage::PlanCharacters, "<|ADD_CHARACTER|>:one\n<|ADD_CHARACTER|>:two")
            .reply(Stage::CharacterProfile, "{\"name\": \"Twin\"}");
        let (tree, mut roster) = setup();
        run(
            &service,
            &tree,
            &mut roster,
            "Two wanderers arrive, one out of Ashreach and one out of Thornwood.",
        );

        let anchors: Vec<Option<NodeId>> = ["c2", "c3"]
            .iter()
            .map(|id| roster.get(id).unwrap().polity_id.clone())
            .collect();
        assert_eq!(
            anchors,
            vec![Some(NodeId::new("micro.r1.p1")), Some(NodeId::new("micro.r2.p1"))]
        );
    }

    #[test]
    fn test_add_without_named_home_stays_unanchored() {
        let service = ScriptedCompletion::new()
            .reply(Stage::PlanCharacters, "<|ADD_CHARACTER|>:a wandering hermit")
            .reply(Stage::CharacterProfile, "{\"name\": \"Tobin\"}");
        let (tree, mut roster) = setup();
        run(
            &service,
            &tree,
            &mut roster,
            "A wandering hermit arrives from nowhere in particular.",
        );

        let record = roster.get("c2").unwrap();
        assert_eq!(record.profile.name, "Tobin");
        assert_eq!(record.region_id, None);
        assert_eq!(record.polity_id, None);
        assert!(service.calls_for(Stage::CharacterProfile)[0].contains("## Home\nunanchored"));
    }

    #[test]
    fn test_blueprints_cycle_over_mounts() {
        let (tree, _) = setup();
        let blueprints = build_blueprints(&tree.mount_points(), 3);
        let anchors: Vec<Option<&NodeId>> = blueprints
            .iter()
            .map(|b| b.mount.as_ref().map(|m| m.anchor()))
            .collect();
        let p1 = NodeId::new("micro.r1.p1");
        let p2 = NodeId::new("micro.r2.p1");
        assert_eq!(anchors, vec![Some(&p1), Some(&p2), Some(&p1)]);

        let unanchored = build_blueprints(&[], 2);
        assert_eq!(unanchored.len(), 2);
        assert!(unanchored.iter().all(|b| b.mount.is_none()));
        assert!(build_blueprints(&tree.mount_points(), 0).is_empty());
    }

    #[test]
    fn test_generate_initial_characters() {
        let service = ScriptedCompletion::new()
            .reply(Stage::CharacterProfile, "{\"name\": \"Mara\", \"profession\": \"Scout\"}")
            .reply(Stage::CharacterProfile, "{\"name\": \"Tobin\"}")
            .reply(Stage::CharacterProfile, "{\"name\": \"Wren\"}");
        let (tree, _) = setup();
        let mut roster = CharacterRoster::new();
        let channel = ModelChannel::new(&service, 0);
        let config = CompletionConfig::default();
        let engine = CharacterEngine::new(&channel, &config);

        let created = engine
            .generate_characters(&tree, &mut roster, "A drowned empire", 3)
            .unwrap();

        assert_eq!(
            created,
            vec![CharacterId::new("c1"), CharacterId::new("c2"), CharacterId::new("c3")]
        );
        let mara = roster.get("c1").unwrap();
        assert_eq!(mara.profile.profession, "Scout");
        assert_eq!(mara.polity_id, Some(NodeId::new("micro.r1.p1")));
        assert_eq!(roster.get("c2").unwrap().region_id, Some(NodeId::new("micro.r2")));
        assert_eq!(roster.get("c3").unwrap().polity_id, Some(NodeId::new("micro.r1.p1")));
        let second = &service.calls_for(Stage::CharacterProfile)[1];
        assert!(second.contains("Thornwood / Thornwood Confederacy"));

        let again = engine
            .generate_characters(&tree, &mut roster, "A drowned empire", 3)
            .unwrap();
        assert!(again.is_empty());
        assert_eq!(roster.len(), 3);
    }

    #[test]
    fn test_profile_retry_then_best_effort() {
        let service = ScriptedCompletion::new()
            .reply(Stage::PlanCharacters, "<|ADD_CHARACTER|>:a wandering monk")
            .reply(Stage::CharacterProfile, "The monk is quiet and old.");
        let (tree, mut roster) = setup();
        run(&service, &tree, &mut roster, "A monk arrives.");

        assert_eq!(service.call_count(Stage::CharacterProfile), 2);
        let record = roster.get("c2").unwrap();
        assert_eq!(record.profile.name, "a wandering monk");
        assert_eq!(record.profile.summary, "The monk is quiet and old.");
    }

    #[test]
    fn test_update_keeps_unspecified_fields() {
        let service = ScriptedCompletion::new()
            .reply(Stage::PlanCharacters, "<|UPDATE_CHARACTER|>:Ilsa")
            .reply(Stage::CharacterRevision, "{\"summary\": \"A wounded courier\", \"hooks\": null}");
        let (tree, mut roster) = setup();
        run(&service, &tree, &mut roster, "Ilsa is wounded.");

        let profile = &roster.get("c1").unwrap().profile;
        assert_eq!(profile.summary, "A wounded courier");
        assert_eq!(profile.species, "Human");
        assert_eq!(profile.name, "Ilsa");
    }

    #[test]
    fn test_unusable_revision_keeps_profile() {
        let service = ScriptedCompletion::new()
            .reply(Stage::PlanCharacters, "<|UPDATE_CHARACTER|>:c1")
            .reply(Stage::CharacterRevision, "She is wounded.");
        let (tree, mut roster) = setup();
        let before = roster.get("c1").unwrap().profile.clone();
        let applied = run(&service, &tree, &mut roster, "Ilsa is wounded.");

        assert_eq!(roster.get("c1").unwrap().profile, before);
        assert!(applied[0].note.is_some());
    }

    #[test]
    fn test_unknown_target_is_never_created() {
        let service =
            ScriptedCompletion::new().reply(Stage::PlanCharacters, "<|UPDATE_CHARACTER|>:Nobody");
        let (tree, mut roster) = setup();
        let applied = run(&service, &tree, &mut roster, "Nobody moves.");
        assert!(applied.is_empty());
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_select_mounts_prefers_polity_then_region() {
        let (tree, _) = setup();
        let points = tree.mount_points();
        assert_eq!(select_mounts(&points, "in Thornwood").len(), 1);
        assert_eq!(
            select_mounts(&points, "near the Kingdom of Veyra")[0].polity_id,
            Some(NodeId::new("micro.r1.p1"))
        );
        assert!(select_mounts(&points, "somewhere").is_empty());
    }
}
