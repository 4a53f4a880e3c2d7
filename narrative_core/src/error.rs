//! Error types for the narrative pipeline.
//!
//! Unparseable replies, unresolved references and invariant corrections are all
//! recovered inside the pipeline. Only the failures below reach callers.

use thiserror::Error;
use world_bible::StoreError;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The stores lost or refused ground truth the pipeline was reasoning over.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using [`PipelineError`].
pub type Result<T> = std::result::Result<T, PipelineError>;
