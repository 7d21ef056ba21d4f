//! # agent-index
//!
//! Index orchestrator for the vector agent.
//!
//! The [`IndexOrchestrator`] owns an ANN engine, the uuid ⇄ id map and the
//! mutation queue, and drives their lifecycle:
//! - insert/update/delete are validated and buffered in the queue
//! - [`IndexOrchestrator::create_index`] commits buffered mutations
//! - [`IndexOrchestrator::save_index`] snapshots engine and map to disk,
//!   rotating `origin`/`backup`/`tmp-*` directories in copy-on-write mode
//! - startup recovery walks origin, backup and the legacy layout before
//!   falling back to an empty index
//! - [`IndexOrchestrator::start`] runs the background commit/save loop
//!
//! Commit and save are mutually exclusive process-wide; search is rejected
//! while a commit is in flight.

pub mod commit;
pub mod config;
pub mod daemon;
pub mod error;
pub mod kvsdb;
pub mod metadata;
pub mod phase;
pub mod recovery;
pub mod save;
pub mod service;
pub mod snapshot;

mod atomic;
#[cfg(test)]
mod testing;

pub use config::{EngineKind, IndexConfig};
pub use error::IndexError;
pub use metadata::{IndexMetadata, Metadata, METADATA_FILE_NAME};
pub use phase::Phase;
pub use service::{Distance, IndexOrchestrator, IndexOrchestratorBuilder, IndexStats};
pub use snapshot::{SnapshotArena, SnapshotFs, Slot, StdFs};
