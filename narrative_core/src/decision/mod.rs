//! Scope decision and plan validation.
//!
//! Both steps ask the model first and only fall back when the reply is unreadable:
//! scope falls back to the keyword classifier in [`heuristic`], an unreadable
//! verdict counts as a rejection.

mod heuristic;

pub use heuristic::*;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use world_bible::{CharacterRecord, WorldNode};

use crate::completion::ModelChannel;
use crate::config::HeuristicConfig;
use crate::context_assembler::{inventory, SearchContext};
use crate::grammar::{parse_scope, parse_verdict, Verdict};
use crate::prompts::{self, Stage};

/// Which stores a narrative should change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameUpdateDecision {
    pub update_world: bool,
    pub update_characters: bool,
    pub reason: String,
    /// The model reply the decision was read from.
    pub raw: String,
}

impl GameUpdateDecision {
    /// A decision that changes nothing.
    pub fn unchanged(reason: impl Into<String>) -> Self {
        Self {
            update_world: false,
            update_characters: false,
            reason: reason.into(),
            raw: String::new(),
        }
    }

    pub fn is_noop(&self) -> bool {
        !self.update_world && !self.update_characters
    }
}

/// The accumulated context as prompt text, or the full inventory when nothing
/// has been read.
pub fn context_or_inventory(
    ctx: &SearchContext,
    nodes: &[WorldNode],
    records: &[CharacterRecord],
) -> String {
    if ctx.is_empty() {
        inventory(nodes, records)
    } else {
        ctx.to_prompt_string()
    }
}

/// Ask the model which stores the narrative touches.
pub fn decide_scope(
    channel: &ModelChannel<'_>,
    narrative: &str,
    context: &str,
    nodes: &[WorldNode],
    records: &[CharacterRecord],
    heuristics: &HeuristicConfig,
) -> GameUpdateDecision {
    let reply = channel.ask(Stage::Scope, &prompts::scope(narrative, context));

    match parse_scope(&reply) {
        Some(parsed) => {
            debug!(
                layer = ?parsed.layer,
                update_world = parsed.value.update_world,
                update_characters = parsed.value.update_characters,
                "Scope decided"
            );
            GameUpdateDecision {
                update_world: parsed.value.update_world,
                update_characters: parsed.value.update_characters,
                reason: parsed.value.reason,
                raw: reply,
            }
        }
        None => {
            let mut decision = heuristic::classify(narrative, nodes, records, heuristics);
            info!(
                update_world = decision.update_world,
                update_characters = decision.update_characters,
                reason = %decision.reason,
                "Scope reply unreadable, classified heuristically"
            );
            decision.raw = reply;
            decision
        }
    }
}

/// Ask the model whether a proposed plan is consistent with the narrative.
pub fn validate(channel: &ModelChannel<'_>, narrative: &str, context: &str, plan: &str) -> Verdict {
    let reply = channel.ask(Stage::Validate, &prompts::validate(narrative, context, plan));

    match parse_verdict(&reply) {
        Some(parsed) => parsed.value,
        None => {
            warn!("Validation reply unreadable, treating as rejection");
            Verdict {
                valid: false,
                reason: String::new(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedCompletion;

    fn decide(service: &ScriptedCompletion, narrative: &str) -> GameUpdateDecision {
        let channel = ModelChannel::new(service, 0);
        decide_scope(
            &channel,
            narrative,
            "",
            &[],
            &[],
            &HeuristicConfig::default(),
        )
    }

    #[test]
    fn test_strict_scope_line() {
        let service = ScriptedCompletion::new()
            .reply(Stage::Scope, "WORLD=YES; CHARACTER=NO; REASON=a region is founded");
        let decision = decide(&service, "A region named Ashreach is founded.");
        assert!(decision.update_world);
        assert!(!decision.update_characters);
        assert_eq!(decision.reason, "a region is founded");
        assert!(decision.raw.starts_with("WORLD=YES"));
    }

    #[test]
    fn test_structured_scope_object() {
        let service = ScriptedCompletion::new().reply(
            Stage::Scope,
            "Here you go:\n{\"update_world\": \"no\", \"update_characters\": true, \"reason\": \"new face\"}",
        );
        let decision = decide(&service, "A stranger arrives.");
        assert!(!decision.update_world);
        assert!(decision.update_characters);
        assert_eq!(decision.reason, "new face");
    }

    #[test]
    fn test_unreadable_scope_uses_heuristic() {
        let service = ScriptedCompletion::new().reply(Stage::Scope, "not sure");
        let decision = decide(&service, "A war breaks out.");
        assert!(decision.update_world);
        assert!(!decision.update_characters);
        assert!(decision.reason.starts_with("heuristic"));
        assert_eq!(decision.raw, "not sure");
    }

    #[test]
    fn test_unreadable_verdict_rejects() {
        let service = ScriptedCompletion::new().reply(Stage::Validate, "looks plausible");
        let channel = ModelChannel::new(&service, 0);
        let verdict = validate(&channel, "n", "c", "p");
        assert!(!verdict.valid);
        assert!(verdict.reason.is_empty());

        let service = ScriptedCompletion::new()
            .reply(Stage::Validate, "VALID=NO; REASON=Veyra is missing");
        let channel = ModelChannel::new(&service, 0);
        let verdict = validate(&channel, "n", "c", "p");
        assert!(!verdict.valid);
        assert_eq!(verdict.reason, "Veyra is missing");
    }

    #[test]
    fn test_empty_context_uses_inventory() {
        let ctx = SearchContext::new();
        let text = context_or_inventory(&ctx, &[], &[]);
        assert!(text.contains("### Characters"));
        assert!(text.contains("- none"));
    }
}
