//! # Narrative Core (The Cortex)
//!
//! Turns free-form narrative text into structured mutations of the world tree and
//! the character roster. Every decision is delegated to a text-completion service
//! whose replies carry no structural guarantee; this crate reads them defensively,
//! resolves what they name against the stores, and commits only what the
//! structural rules of the world allow.
//!
//! ## Core Components
//!
//! - **context_assembler**: Bounded search/read loop building the per-run context
//! - **decision**: Scope decision, keyword heuristics and plan validation
//! - **grammar**: Layered reply parsing and reference resolution
//! - **world_engine**: ADD/UPDATE/REMOVE against the world tree, and world
//!   generation from a premise
//! - **character_engine**: ADD/UPDATE against the character roster, and the
//!   initial cast
//! - **merge**: The polity merge transaction
//! - **pipeline**: `decide_scope` / `apply_update` / `generate_world` /
//!   `generate_characters` entry points
//! - **history**: Change records, the run journal and its summaries
//!
//! ## Design Philosophy
//!
//! - **Stores are injected**: every operation takes the `TreeStore` / `RecordStore`
//!   it works on; nothing is global
//! - **Bounded loops**: every ask-again loop has an explicit cap
//! - **Recover, don't fail**: only store failures surface as errors

pub mod character_engine;
pub mod completion;
pub mod config;
pub mod context_assembler;
pub mod decision;
pub mod error;
pub mod grammar;
pub mod history;
pub mod merge;
pub mod pipeline;
pub mod prompts;
pub mod testing;
pub mod world_engine;

pub use character_engine::{
    build_blueprints, AppliedCharacterAction, CharacterBlueprint, CharacterEngine,
};
pub use completion::{CompletionService, ModelChannel};
pub use config::{GenerationConfig, PipelineConfig};
pub use context_assembler::{AccumulationReport, ContextAssembler, SearchContext, SearchStop};
pub use decision::GameUpdateDecision;
pub use error::{PipelineError, Result};
pub use history::{ChangeAction, ChangeKind, ChangeRecord, HistoryEntry, HistoryJournal};
pub use merge::{MergeOutcome, PolityMerge};
pub use pipeline::{GameUpdateResult, NarrativePipeline};
pub use prompts::Stage;
pub use world_engine::{AppliedWorldAction, WorldEngine, WorldGeneration, WorldOutcome};
