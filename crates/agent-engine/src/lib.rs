//! # agent-engine
//!
//! ANN index engines used by the vector agent.
//!
//! The orchestrator in `agent-index` only talks to the [`IndexEngine`] trait.
//! Two implementations ship with this crate:
//! - [`FlatEngine`]: exact brute-force search over a contiguous buffer
//! - `HnswEngine`: usearch-powered HNSW graph (feature `hnsw`, on by default)
//!
//! Engines are not internally synchronised between writers and readers; the
//! caller provides exclusion (see `agent-index`).

pub mod error;
pub mod flat;
#[cfg(feature = "hnsw")]
pub mod hnsw;
pub mod index;

pub use error::EngineError;
pub use flat::{FlatConfig, FlatEngine, FlatEngineFactory, FLAT_INDEX_FILE_NAME};
#[cfg(feature = "hnsw")]
pub use hnsw::{HnswConfig, HnswEngine, HnswEngineFactory, HNSW_INDEX_FILE_NAME};
pub use index::{check_batch, EngineFactory, IndexEngine, InternalId, MetricType, SearchHit};
