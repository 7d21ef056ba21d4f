//! Index engine trait and types.
//!
//! Defines the batch-oriented interface the orchestrator drives: vectors are
//! passed as one contiguous `count * dimension` buffer, the way ANN engines
//! consume them natively.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Dense identifier the engine stores alongside each vector.
pub type InternalId = u32;

/// Distance metric used by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// Squared euclidean distance (lower = closer)
    #[default]
    L2,
    /// Inner product (higher = closer)
    InnerProduct,
    /// Cosine distance, `1 - cos` (lower = closer)
    Cosine,
}

impl MetricType {
    /// Whether larger scores rank first for this metric.
    pub fn higher_is_better(&self) -> bool {
        matches!(self, MetricType::InnerProduct)
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricType::L2 => write!(f, "l2"),
            MetricType::InnerProduct => write!(f, "inner_product"),
            MetricType::Cosine => write!(f, "cosine"),
        }
    }
}

/// One row of a search response.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Internal id of the neighbor
    pub id: InternalId,
    /// Distance (or score for inner product) to the query
    pub distance: f32,
    /// Per-row failure reported by the engine
    pub error: Option<String>,
}

impl SearchHit {
    pub fn new(id: InternalId, distance: f32) -> Self {
        Self {
            id,
            distance,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            id: 0,
            distance: f32::MAX,
            error: Some(error.into()),
        }
    }
}

/// Trait for ANN engines.
///
/// Implementations are `Send + Sync` so they can be shared behind a lock, but
/// they do not synchronise writers against readers themselves.
pub trait IndexEngine: Send + Sync {
    /// Get the vector dimension
    fn dimension(&self) -> usize;

    /// Get the number of vectors stored
    fn len(&self) -> usize;

    /// Check if the engine holds no vectors
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the engine accepts `add` calls without a prior `train`.
    fn is_trained(&self) -> bool;

    /// Calibrate the engine on `count` vectors.
    fn train(&mut self, count: usize, vectors: &[f32]) -> Result<(), EngineError>;

    /// Add `count` vectors with their ids. Returns the total stored afterwards.
    fn add(
        &mut self,
        count: usize,
        vectors: &[f32],
        ids: &[InternalId],
    ) -> Result<usize, EngineError>;

    /// Remove `count` ids. Returns the total stored afterwards.
    fn remove(&mut self, count: usize, ids: &[InternalId]) -> Result<usize, EngineError>;

    /// Search `nq` queries for `k` neighbors each.
    ///
    /// Rows are returned query by query, best first within a query.
    fn search(&self, k: usize, nq: usize, queries: &[f32]) -> Result<Vec<SearchHit>, EngineError>;

    /// Persist the engine into the directory `path`.
    fn save_index_with_path(&self, path: &Path) -> Result<(), EngineError>;

    /// Release engine resources. Further calls fail with `EngineError::Closed`.
    fn close(&mut self);
}

/// Creates and loads engines of one kind.
pub trait EngineFactory: Send + Sync {
    /// Engine kind, for logging
    fn name(&self) -> &'static str;

    /// Build an empty engine, optionally rooted at `path`.
    fn create(&self, path: Option<&Path>) -> Result<Box<dyn IndexEngine>, EngineError>;

    /// Load an engine previously saved into the directory `path`.
    fn load(&self, path: &Path) -> Result<Box<dyn IndexEngine>, EngineError>;
}

/// Validate a contiguous batch of `count` vectors of `dimension` values.
pub fn check_batch(dimension: usize, count: usize, vectors: &[f32]) -> Result<(), EngineError> {
    if vectors.len() == count * dimension {
        return Ok(());
    }
    if count == 1 {
        return Err(EngineError::DimensionMismatch {
            expected: dimension,
            actual: vectors.len(),
        });
    }
    Err(EngineError::InvalidBatch {
        count,
        values: vectors.len(),
    })
}
