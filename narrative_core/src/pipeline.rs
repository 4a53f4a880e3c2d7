//! The narrative update pipeline.
//!
//! One call runs to completion against the stores it is handed:
//!
//! 1. **Merge**: a narrative merging two named polities runs the merge transaction
//!    and nothing else
//! 2. **Search**: accumulate the nodes and records relevant to the narrative
//! 3. **Scope**: decide which stores change
//! 4. **Plan and validate**: synthesize actions, let the model judge them, and on
//!    rejection search again with the reason as a hint (bounded rounds)
//! 5. **Execute**: commit world actions, rebind characters whose home was removed,
//!    commit character actions, then offer characters of changed polities for
//!    revision
//!
//! No state survives between calls; every run builds its own [`SearchContext`].

use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};
use world_bible::{
    CharacterId, CharacterRecord, NodeId, RecordStore, TreeStore, WorldNode, WorldSnapshot,
};

use crate::character_engine::{self, AppliedCharacterAction, CharacterEngine};
use crate::completion::{CompletionService, ModelChannel};
use crate::config::PipelineConfig;
use crate::context_assembler::{ContextAssembler, SearchContext};
use crate::decision::{self, context_or_inventory, GameUpdateDecision};
use crate::error::Result;
use crate::grammar::{parse_reference_list, resolve_character, CharacterFlag};
use crate::history::{
    diff_characters, diff_world, summarize_changes, ChangeRecord, HistoryEntry, HistoryJournal,
};
use crate::merge::{MergeOutcome, PolityMerge};
use crate::prompts::{self, Stage};
use crate::world_engine::{self, AppliedWorldAction, WorldEngine, WorldGeneration};

/// What one pipeline run did, and the state it left behind.
#[derive(Debug, Clone, Serialize)]
pub struct GameUpdateResult {
    pub decision: GameUpdateDecision,
    pub world_actions: Vec<AppliedWorldAction>,
    pub character_actions: Vec<AppliedCharacterAction>,
    pub merge: Option<MergeOutcome>,
    /// Propose/judge cycles run; zero when no plan was validated at all.
    pub validation_rounds: u32,
    /// Whether the executed plan was accepted (or empty).
    pub validated: bool,
    pub nodes: Vec<WorldNode>,
    pub characters: Vec<CharacterRecord>,
    pub world_changes: Vec<ChangeRecord>,
    pub character_changes: Vec<ChangeRecord>,
}

impl GameUpdateResult {
    fn new(decision: GameUpdateDecision) -> Self {
        Self {
            decision,
            world_actions: Vec::new(),
            character_actions: Vec::new(),
            merge: None,
            validation_rounds: 0,
            validated: false,
            nodes: Vec::new(),
            characters: Vec::new(),
            world_changes: Vec::new(),
            character_changes: Vec::new(),
        }
    }

    fn capture(
        mut self,
        tree: &dyn TreeStore,
        roster: &dyn RecordStore,
        world_before: &WorldSnapshot,
        characters_before: &[CharacterRecord],
    ) -> Self {
        self.world_changes = diff_world(world_before, &tree.snapshot());
        self.characters = roster.list();
        self.character_changes = diff_characters(characters_before, &self.characters);
        self.nodes = tree.nodes();
        self
    }

    pub fn is_unchanged(&self) -> bool {
        self.world_changes.is_empty() && self.character_changes.is_empty()
    }

    pub fn summary(&self) -> String {
        summarize_changes(&self.world_changes, &self.character_changes)
    }

    /// A journal entry for this run.
    pub fn history_entry(&self, narrative: &str) -> HistoryEntry {
        HistoryEntry::new(
            narrative,
            self.decision.clone(),
            self.world_changes.clone(),
            self.character_changes.clone(),
        )
    }
}

/// Plan text shown to the validator.
fn plan_summary(world: &str, characters: &str) -> String {
    let none = |text: &str| if text.is_empty() { "(none)".to_string() } else { text.to_string() };
    format!("World:\n{}\n\nCharacters:\n{}", none(world), none(characters))
}

pub struct NarrativePipeline<'a> {
    completion: &'a dyn CompletionService,
    config: PipelineConfig,
    assembler: ContextAssembler,
}

impl<'a> NarrativePipeline<'a> {
    pub fn new(completion: &'a dyn CompletionService, config: PipelineConfig) -> Self {
        let assembler = ContextAssembler::new(config.search.clone());
        Self {
            completion,
            config,
            assembler,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn channel(&self) -> ModelChannel<'a> {
        ModelChannel::new(self.completion, self.config.completion.empty_reply_retries)
    }

    /// Fill the world from a premise: macro topics, then regions and polities
    /// when the micro level is empty, then any empty values and aspects.
    pub fn generate_world(
        &self,
        tree: &mut dyn TreeStore,
        premise: &str,
    ) -> Result<WorldGeneration> {
        let channel = self.channel();
        let world = WorldEngine::new(&channel, &self.config.heuristics);
        let generation = world.generate_world(tree, premise, &self.config.generation)?;
        info!(
            written = generation.written.len(),
            regions = generation.regions.len(),
            polities = generation.polities.len(),
            "World generated"
        );
        Ok(generation)
    }

    /// Seed an empty roster with characters spread over the mount points.
    pub fn generate_characters(
        &self,
        tree: &dyn TreeStore,
        roster: &mut dyn RecordStore,
        premise: &str,
    ) -> Result<Vec<CharacterId>> {
        let channel = self.channel();
        let characters = CharacterEngine::new(&channel, &self.config.completion);
        characters.generate_characters(
            tree,
            roster,
            premise,
            self.config.generation.initial_characters,
        )
    }

    /// [`Self::apply_update`], then record the run in `journal`. Empty
    /// narratives are not recorded.
    pub fn apply_and_record(
        &self,
        tree: &mut dyn TreeStore,
        roster: &mut dyn RecordStore,
        narrative: &str,
        journal: &mut HistoryJournal,
    ) -> Result<GameUpdateResult> {
        let result = self.apply_update(tree, roster, narrative)?;
        if !narrative.trim().is_empty() {
            journal.record(result.history_entry(narrative))?;
        }
        Ok(result)
    }

    /// A model-written summary of the last `limit` journal entries.
    pub fn summarize_history(&self, journal: &HistoryJournal, limit: usize) -> String {
        journal.summarize_recent_with(&self.channel(), limit)
    }

    /// Decide which stores a narrative should change, without changing anything.
    pub fn decide_scope(
        &self,
        tree: &dyn TreeStore,
        roster: &dyn RecordStore,
        narrative: &str,
    ) -> GameUpdateDecision {
        if narrative.trim().is_empty() {
            return GameUpdateDecision::unchanged("empty narrative");
        }
        let channel = self.channel();
        let mut ctx = SearchContext::new();
        self.assembler
            .accumulate(&channel, tree, roster, narrative, &mut ctx, None);
        self.decide(&channel, tree, roster, narrative, &ctx)
    }

    fn decide(
        &self,
        channel: &ModelChannel<'_>,
        tree: &dyn TreeStore,
        roster: &dyn RecordStore,
        narrative: &str,
        ctx: &SearchContext,
    ) -> GameUpdateDecision {
        let nodes = tree.nodes();
        let records = roster.list();
        let context = context_or_inventory(ctx, &nodes, &records);
        decision::decide_scope(
            channel,
            narrative,
            &context,
            &nodes,
            &records,
            &self.config.heuristics,
        )
    }

    /// Run the full pipeline and commit its actions.
    ///
    /// Only store failures are returned as errors; unreadable replies, unresolved
    /// references and rejected plans are all recovered.
    pub fn apply_update(
        &self,
        tree: &mut dyn TreeStore,
        roster: &mut dyn RecordStore,
        narrative: &str,
    ) -> Result<GameUpdateResult> {
        let world_before = tree.snapshot();
        let characters_before = roster.list();

        if narrative.trim().is_empty() {
            return Ok(GameUpdateResult::new(GameUpdateDecision::unchanged("empty narrative"))
                .capture(tree, roster, &world_before, &characters_before));
        }

        let channel = self.channel();
        let world = WorldEngine::new(&channel, &self.config.heuristics);
        let characters = CharacterEngine::new(&channel, &self.config.completion);

        let merge = PolityMerge::new(&channel, &world, &characters, &self.config.heuristics);
        if let Some(outcome) = merge.run(tree, roster, narrative)? {
            let mut result = GameUpdateResult::new(GameUpdateDecision {
                update_world: true,
                update_characters: true,
                reason: format!("polity merge into {}", outcome.survivor),
                raw: String::new(),
            });
            result.world_actions = outcome.world_actions.clone();
            result.character_actions = outcome.character_actions.clone();
            result.merge = Some(outcome);
            let result = result.capture(tree, roster, &world_before, &characters_before);
            info!(summary = %result.summary(), "Merge applied");
            return Ok(result);
        }

        let mut ctx = SearchContext::new();
        self.assembler
            .accumulate(&channel, tree, roster, narrative, &mut ctx, None);
        let mut decision = self.decide(&channel, tree, roster, narrative, &ctx);

        let max_rounds = self.config.validation.max_rounds;
        let mut world_plan = Vec::new();
        let mut character_plan = Vec::new();
        let mut validated = false;
        let mut rounds = 0;

        for round in 1..=max_rounds {
            rounds = round;
            let context = context_or_inventory(&ctx, &tree.nodes(), &roster.list());

            world_plan = if decision.update_world {
                world.plan(tree, narrative, &context)
            } else {
                Vec::new()
            };
            character_plan = if decision.update_characters {
                characters.plan(roster, narrative, &context)
            } else {
                Vec::new()
            };

            if world_plan.is_empty() && character_plan.is_empty() {
                debug!(round, "Nothing to validate");
                validated = true;
                break;
            }

            let plan = plan_summary(
                &world_engine::summarize(&world_plan),
                &character_engine::summarize(&character_plan),
            );
            let verdict = decision::validate(&channel, narrative, &context, &plan);
            if verdict.valid {
                validated = true;
                break;
            }

            info!(round, reason = %verdict.reason, "Plan rejected");
            if round < max_rounds {
                let hint = Some(verdict.reason.trim()).filter(|r| !r.is_empty());
                self.assembler
                    .accumulate(&channel, tree, roster, narrative, &mut ctx, hint);
                decision = self.decide(&channel, tree, roster, narrative, &ctx);
            }
        }

        if !validated {
            warn!(rounds, "Validation rounds exhausted, executing last plan");
        }

        let mut result = GameUpdateResult::new(decision);
        result.validation_rounds = rounds;
        result.validated = validated;

        let outcome = world.apply(tree, narrative, &world_plan)?;
        let mut handled: BTreeSet<CharacterId> = BTreeSet::new();

        let reassigned = self.reassign_removed(
            &characters,
            tree,
            roster,
            narrative,
            &world_before,
            &outcome.removed,
        )?;
        handled.extend(reassigned.iter().map(|a| a.identifier.clone()));
        result.character_actions.extend(reassigned);

        let applied = characters.apply(tree, roster, narrative, &character_plan)?;
        handled.extend(applied.iter().map(|a| a.identifier.clone()));
        result.character_actions.extend(applied);

        let followups = self.polity_followups(
            &channel,
            &characters,
            tree,
            roster,
            narrative,
            &outcome.touched_polities,
            &mut handled,
        )?;
        if !followups.is_empty() {
            result.decision.update_characters = true;
        }
        result.character_actions.extend(followups);
        result.world_actions = outcome.applied;

        let result = result.capture(tree, roster, &world_before, &characters_before);
        info!(
            validated = result.validated,
            rounds = result.validation_rounds,
            summary = %result.summary(),
            "Narrative applied"
        );
        Ok(result)
    }

    /// Clear bindings that point at removed nodes and revise those characters.
    fn reassign_removed(
        &self,
        characters: &CharacterEngine<'_>,
        tree: &dyn TreeStore,
        roster: &mut dyn RecordStore,
        narrative: &str,
        world_before: &WorldSnapshot,
        removed: &BTreeSet<NodeId>,
    ) -> Result<Vec<AppliedCharacterAction>> {
        let mut applied = Vec::new();
        if removed.is_empty() {
            return Ok(applied);
        }

        for record in roster.list() {
            let lost_polity = record.polity_id.as_ref().filter(|p| removed.contains(*p));
            let lost_region = record.region_id.as_ref().filter(|r| removed.contains(*r));
            let Some(lost) = lost_polity.or(lost_region).cloned() else {
                continue;
            };

            let region_id = if lost_region.is_some() {
                None
            } else {
                record.region_id.clone()
            };
            roster.rebind(record.identifier.as_str(), region_id.clone(), None)?;

            let lost_key = world_before
                .get(lost.as_str())
                .map(|n| n.key.clone())
                .unwrap_or_else(|| lost.to_string());
            let view = CharacterRecord {
                region_id,
                polity_id: None,
                ..record.clone()
            };
            let reason = format!("Their home {} no longer exists.", lost_key);
            let note = match characters.revise(tree, &view, narrative, &reason) {
                Some(profile) => {
                    roster.update(record.identifier.as_str(), profile)?;
                    format!("unbound from removed {}", lost)
                }
                None => format!("unbound from removed {}, profile kept", lost),
            };
            info!(identifier = %record.identifier, %lost, "Character lost their home");
            applied.push(AppliedCharacterAction {
                flag: CharacterFlag::Update,
                identifier: record.identifier,
                note: Some(note),
            });
        }

        Ok(applied)
    }

    /// Offer the characters of every changed polity for revision.
    #[allow(clippy::too_many_arguments)]
    fn polity_followups(
        &self,
        channel: &ModelChannel<'_>,
        characters: &CharacterEngine<'_>,
        tree: &dyn TreeStore,
        roster: &mut dyn RecordStore,
        narrative: &str,
        touched: &BTreeSet<NodeId>,
        handled: &mut BTreeSet<CharacterId>,
    ) -> Result<Vec<AppliedCharacterAction>> {
        let mut applied = Vec::new();

        for polity_id in touched {
            let Ok(polity) = tree.view(polity_id.as_str()) else {
                continue;
            };
            let bound: Vec<CharacterRecord> = roster
                .list()
                .into_iter()
                .filter(|r| r.polity_id.as_ref() == Some(polity_id))
                .filter(|r| !handled.contains(&r.identifier))
                .collect();
            if bound.is_empty() {
                continue;
            }

            let lines: Vec<String> = bound
                .iter()
                .map(|r| format!("{} {}: {}", r.identifier, r.name(), prompts::clip(&r.profile.summary, 120)))
                .collect();
            let reply = channel.ask(
                Stage::PolityCharacters,
                &prompts::polity_characters(narrative, &polity, &lines),
            );
            let Some(parsed) = parse_reference_list(&reply, "UPDATE", &["update", "characters"]) else {
                debug!(polity = %polity_id, "Polity follow-up reply unreadable, skipping");
                continue;
            };

            for reference in parsed.value {
                let id = match resolve_character(&reference, &bound) {
                    Ok(id) => id,
                    Err(reason) => {
                        warn!(polity = %polity_id, %reason, "Dropping polity follow-up");
                        continue;
                    }
                };
                if !handled.insert(id.clone()) {
                    continue;
                }
                let Some(record) = bound.iter().find(|r| r.identifier == id) else {
                    continue;
                };

                let reason = format!("Their polity {} changed.", polity.key);
                let note = match characters.revise(tree, record, narrative, &reason) {
                    Some(profile) => {
                        roster.update(id.as_str(), profile)?;
                        format!("follows polity {}", polity_id)
                    }
                    None => "no usable revision, profile kept".to_string(),
                };
                applied.push(AppliedCharacterAction {
                    flag: CharacterFlag::Update,
                    identifier: id,
                    note: Some(note),
                });
            }
        }

        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedCompletion;
    use world_bible::{CharacterProfile, CharacterRoster, WorldTree, MICRO_ID};

    fn setup() -> (WorldTree, CharacterRoster) {
        let mut tree = WorldTree::new();
        let r1 = tree.add_child(MICRO_ID, "Ashreach").unwrap();
        let veyra = tree.add_child(r1.as_str(), "Kingdom of Veyra").unwrap();

        let mut roster = CharacterRoster::new();
        roster.insert(CharacterProfile::named("Ilsa"), Some(r1.clone()), Some(veyra)).unwrap();
        roster.insert(CharacterProfile::named("Oren"), Some(r1), None).unwrap();
        (tree, roster)
    }

    #[test]
    fn test_empty_narrative_changes_nothing() {
        let service = ScriptedCompletion::new();
        let pipeline = NarrativePipeline::new(&service, PipelineConfig::default());
        let (mut tree, mut roster) = setup();

        let result = pipeline.apply_update(&mut tree, &mut roster, "   ").unwrap();
        assert!(result.decision.is_noop());
        assert!(result.is_unchanged());
        assert_eq!(result.summary(), "no changes");
        assert_eq!(service.total_calls(), 0);
    }

    #[test]
    fn test_decide_scope_does_not_mutate() {
        let service = ScriptedCompletion::new()
            .reply(Stage::Search, "WORLD=NONE; CHARACTER=NONE")
            .reply(Stage::Scope, "WORLD=YES; CHARACTER=NO; REASON=border shift");
        let pipeline = NarrativePipeline::new(&service, PipelineConfig::default());
        let (tree, roster) = setup();
        let before = tree.snapshot();

        let decision = pipeline.decide_scope(&tree, &roster, "The border of Ashreach shifts.");
        assert!(decision.update_world);
        assert!(!decision.update_characters);
        assert_eq!(tree.snapshot(), before);
        assert_eq!(service.call_count(Stage::PlanWorld), 0);
    }

    #[test]
    fn test_rejection_feeds_hint_back_into_search() {
        let service = ScriptedCompletion::new()
            .reply(Stage::Search, "WORLD=NONE; CHARACTER=NONE")
            .reply(Stage::Scope, "WORLD=YES; CHARACTER=NO; REASON=drought")
            .reply(Stage::PlanWorld, "<|UPDATE_NODE|>:micro.r1")
            .reply(Stage::Validate, "VALID=NO; REASON=the drought hits Veyra")
            .reply(Stage::Validate, "VALID=YES")
            .reply(Stage::NodeContent, "<|VALUE|>:Parched")
            .reply(Stage::RegionCascade, "CHILDREN=NO");
        let pipeline = NarrativePipeline::new(&service, PipelineConfig::default());
        let (mut tree, mut roster) = setup();

        let result = pipeline
            .apply_update(&mut tree, &mut roster, "A drought settles over Ashreach.")
            .unwrap();

        assert!(result.validated);
        assert_eq!(result.validation_rounds, 2);
        assert!(service
            .calls_for(Stage::Search)
            .iter()
            .any(|p| p.contains("the drought hits Veyra")));
        assert_eq!(tree.get("micro.r1").unwrap().value, "Parched");
    }

    #[test]
    fn test_exhausted_validation_executes_best_effort() {
        let service = ScriptedCompletion::new()
            .reply(Stage::Search, "WORLD=NONE; CHARACTER=NONE")
            .reply(Stage::Scope, "WORLD=YES; CHARACTER=NO; REASON=drought")
            .reply(Stage::PlanWorld, "<|UPDATE_NODE|>:micro.r1")
            .reply(Stage::Validate, "VALID=NO; REASON=unconvinced")
            .reply(Stage::NodeContent, "<|VALUE|>:Parched")
            .reply(Stage::RegionCascade, "CHILDREN=NO");
        let pipeline = NarrativePipeline::new(&service, PipelineConfig::default());
        let (mut tree, mut roster) = setup();

        let result = pipeline
            .apply_update(&mut tree, &mut roster, "A drought settles over Ashreach.")
            .unwrap();

        assert!(!result.validated);
        assert_eq!(result.validation_rounds, 2);
        assert_eq!(service.call_count(Stage::Validate), 2);
        assert_eq!(tree.get("micro.r1").unwrap().value, "Parched");
        assert_eq!(result.summary(), "world: UPDATE micro.r1");
    }

    #[test]
    fn test_removed_polity_unbinds_characters() {
        let service = ScriptedCompletion::new()
            .reply(Stage::Search, "WORLD=NONE; CHARACTER=NONE")
            .reply(Stage::Scope, "WORLD=YES; CHARACTER=NO; REASON=collapse")
            .reply(Stage::PlanWorld, "<|REMOVE_NODE|>:micro.r1.p1")
            .reply(Stage::Validate, "VALID=YES")
            .reply(Stage::CharacterRevision, "{\"faction\": \"Exiles\"}");
        let pipeline = NarrativePipeline::new(&service, PipelineConfig::default());
        let (mut tree, mut roster) = setup();

        let result = pipeline
            .apply_update(&mut tree, &mut roster, "The throne is empty and the realm dissolves.")
            .unwrap();

        assert!(!tree.contains("micro.r1.p1"));
        let ilsa = roster.get("c1").unwrap();
        assert_eq!(ilsa.polity_id, None);
        assert_eq!(ilsa.region_id, Some(NodeId::new("micro.r1")));
        assert_eq!(ilsa.profile.faction, "Exiles");
        assert_eq!(roster.get("c2").unwrap().profile.faction, "");
        assert_eq!(result.character_actions.len(), 1);
        assert!(result
            .character_changes
            .iter()
            .any(|c| c.identifier == "c1"));
    }

    #[test]
    fn test_polity_update_offers_bound_characters() {
        let service = ScriptedCompletion::new()
            .reply(Stage::Search, "WORLD=NONE; CHARACTER=NONE")
            .reply(Stage::Scope, "WORLD=YES; CHARACTER=NO; REASON=new law")
            .reply(Stage::PlanWorld, "<|UPDATE_NODE|>:micro.r1.p1")
            .reply(Stage::Validate, "VALID=YES")
            .reply(Stage::NodeContent, "<|VALUE|>:Ruled by a council now")
            .reply(Stage::PolityCharacters, "UPDATE=Ilsa")
            .reply(Stage::CharacterRevision, "{\"profession\": \"Councillor\"}");
        let pipeline = NarrativePipeline::new(&service, PipelineConfig::default());
        let (mut tree, mut roster) = setup();

        let result = pipeline
            .apply_update(&mut tree, &mut roster, "Veyra's crown passes to a ruling council.")
            .unwrap();

        assert!(result.decision.update_characters);
        assert_eq!(roster.get("c1").unwrap().profile.profession, "Councillor");
        assert_eq!(service.call_count(Stage::PolityCharacters), 1);
        assert_eq!(
            result.character_actions[0].note.as_deref(),
            Some("follows polity micro.r1.p1")
        );
    }

    #[test]
    fn test_history_entry_from_result() {
        let service = ScriptedCompletion::new()
            .reply(Stage::Search, "WORLD=NONE; CHARACTER=NONE")
            .reply(Stage::Scope, "WORLD=NO; CHARACTER=NO; REASON=idle chatter");
        let pipeline = NarrativePipeline::new(&service, PipelineConfig::default());
        let (mut tree, mut roster) = setup();

        let result = pipeline
            .apply_update(&mut tree, &mut roster, "They talk about the weather.")
            .unwrap();
        let entry = result.history_entry("They talk about the weather.");
        assert_eq!(entry.summary, "no changes");
        assert_eq!(entry.decision.reason, "idle chatter");
        assert_eq!(service.call_count(Stage::Validate), 0);
    }

    #[test]
    fn test_apply_and_record_journals_each_run() {
        let service = ScriptedCompletion::new()
            .reply(Stage::Search, "WORLD=NONE; CHARACTER=NONE")
            .reply(Stage::Scope, "WORLD=NO; CHARACTER=NO; REASON=idle chatter")
            .reply(Stage::HistorySummary, "Nothing happened but talk.");
        let pipeline = NarrativePipeline::new(&service, PipelineConfig::default());
        let (mut tree, mut roster) = setup();
        let mut journal = HistoryJournal::in_memory();

        pipeline
            .apply_and_record(&mut tree, &mut roster, "They talk about the weather.", &mut journal)
            .unwrap();
        pipeline
            .apply_and_record(&mut tree, &mut roster, "  ", &mut journal)
            .unwrap();

        assert_eq!(journal.len(), 1);
        assert_eq!(journal.entries()[0].narrative, "They talk about the weather.");
        assert_eq!(journal.entries()[0].summary, "no changes");
        assert_eq!(pipeline.summarize_history(&journal, 5), "Nothing happened but talk.");
        assert!(service.calls_for(Stage::HistorySummary)[0]
            .contains("Story: They talk about the weather."));
    }
}
