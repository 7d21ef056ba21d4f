//! Error types for the index orchestrator.
//!
//! Variants group into:
//! - the expected no-op [`IndexError::UncommittedIndexNotFound`]
//! - client input errors, returned directly and never retried
//! - [`IndexError::CreateIndexingInProgress`], a transient busy signal
//! - per-directory load failures that drive recovery to the next candidate
//! - persistence failures surfaced by save and close

use std::path::PathBuf;
use std::time::Duration;

use agent_engine::EngineError;
use agent_kvs::KvsError;
use agent_vqueue::QueueError;
use thiserror::Error;

/// Errors that can occur in the index orchestrator
#[derive(Debug, Error)]
pub enum IndexError {
    /// Nothing is buffered; callers treat this as a no-op
    #[error("Uncommitted index not found")]
    UncommittedIndexNotFound,

    /// Request carried an empty uuid
    #[error("Uuid is empty")]
    UuidEmpty,

    /// Vector length does not match the configured dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Uuid is already indexed or queued for insertion
    #[error("Uuid already exists: {0}")]
    UuidAlreadyExists(String),

    /// Uuid is neither indexed nor queued
    #[error("Object id not found: {0}")]
    ObjectIdNotFound(String),

    /// Engine returned no usable rows
    #[error("Empty search result")]
    EmptySearchResult,

    /// A commit is running; retry later
    #[error("Create indexing is in progress")]
    CreateIndexingInProgress,

    /// Snapshot directory or one of its files is missing or empty
    #[error("Index file not found: {}", .0.display())]
    IndexFileNotFound(PathBuf),

    /// Snapshot directory is not readable
    #[error("Invalid permission on {}", .0.display())]
    InvalidPermission(PathBuf),

    /// Metadata record is missing fields, undecodable, or marked invalid
    #[error("Invalid metadata at {}: {reason}", .path.display())]
    InvalidMetadata { path: PathBuf, reason: String },

    /// Loaded map holds fewer than half the entries recorded in metadata
    #[error(
        "Indices are too few compared to metadata at {}: loaded {loaded}, recorded {recorded}",
        .path.display()
    )]
    IndicesAreTooFewComparedToMetadata {
        path: PathBuf,
        loaded: usize,
        recorded: u64,
    },

    /// Snapshot load did not finish in time
    #[error("Index load timed out after {timeout:?} at {}", .path.display())]
    IndexLoadTimeout { path: PathBuf, timeout: Duration },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Moving the fresh snapshot into place failed; backup was restored
    #[error("Snapshot rotation failed: {0}")]
    RotationFailed(String),

    /// Rotation failed and restoring the backup failed too
    #[error("Snapshot rollback failed: {rollback} (after rotation error: {rotation})")]
    RollbackFailed { rotation: String, rollback: String },

    /// ANN engine error
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Mutation queue error
    #[error("Queue error: {0}")]
    Queue(QueueError),

    /// Identifier map error
    #[error("Identifier map error: {0}")]
    Kvs(KvsError),

    /// Blocking task panicked or was aborted
    #[error("Task error: {0}")]
    Task(String),

    /// Operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Operation ran past its deadline
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Several independent failures, e.g. from close
    #[error("{}", join_errors(.0))]
    Multiple(Vec<IndexError>),
}

fn join_errors(errors: &[IndexError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl IndexError {
    /// Whether this is the "nothing to commit" signal.
    pub fn is_noop(&self) -> bool {
        matches!(self, IndexError::UncommittedIndexNotFound)
    }

    /// Whether close and the daemon should swallow this error.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            IndexError::UncommittedIndexNotFound
                | IndexError::Cancelled
                | IndexError::DeadlineExceeded
        )
    }

    /// Collapse a list of errors into one, if any.
    pub fn join(mut errors: Vec<IndexError>) -> Option<IndexError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(IndexError::Multiple(errors)),
        }
    }
}

impl From<QueueError> for IndexError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Cancelled { .. } => IndexError::Cancelled,
            other => IndexError::Queue(other),
        }
    }
}

impl From<KvsError> for IndexError {
    fn from(err: KvsError) -> Self {
        match err {
            KvsError::Cancelled { .. } => IndexError::Cancelled,
            other => IndexError::Kvs(other),
        }
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        IndexError::Serialization(err.to_string())
    }
}

impl From<tokio::task::JoinError> for IndexError {
    fn from(err: tokio::task::JoinError) -> Self {
        IndexError::Task(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for IndexError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        IndexError::DeadlineExceeded
    }
}
