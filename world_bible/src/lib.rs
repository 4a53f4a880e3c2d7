//! # World Bible
//!
//! The persistent side of the narrative engine: the world-setting tree, the
//! character roster, and the store interfaces the pipeline mutates them through.
//! This crate is the single source of truth for world state and contains no
//! model-facing logic.
//!
//! ## Core Components
//!
//! - **world_tree**: Root/macro/micro hierarchy with regions, polities and polity aspects
//! - **characters**: Fixed-schema character profiles and the `c<N>` roster
//! - **store**: `TreeStore` / `RecordStore` seams with in-memory implementations
//! - **snapshot**: JSON snapshot files for both stores

pub mod characters;
pub mod error;
pub mod snapshot;
pub mod store;
pub mod world_tree;

pub use characters::*;
pub use error::StoreError;
pub use store::*;
pub use world_tree::*;
