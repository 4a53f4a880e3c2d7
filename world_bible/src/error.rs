//! Error types for the world bible stores.

use thiserror::Error;

/// Failures raised by the tree and record stores.
///
/// Structural refusals (`FrozenStructure`, `ForbiddenRemoval`) exist so a store never
/// silently breaks its own invariants; callers are expected to check node roles first.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Character not found: {0}")]
    CharacterNotFound(String),

    #[error("Node {0} is structurally frozen")]
    FrozenStructure(String),

    #[error("Node {0} cannot be removed")]
    ForbiddenRemoval(String),

    #[error("No identifier left after {0}")]
    IdentifierExhausted(String),

    #[error("Invalid outline: {0}")]
    InvalidOutline(String),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using [`StoreError`].
pub type Result<T> = std::result::Result<T, StoreError>;
