//! HNSW engine implementation using usearch.
//!
//! Parameters tuned for quality over speed:
//! - M = 16 (connections per layer)
//! - ef_construction = 200 (build-time quality)
//! - ef_search = 100 (search-time quality)

use std::path::Path;

use tracing::{debug, info};
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use crate::error::EngineError;
use crate::index::{check_batch, EngineFactory, IndexEngine, InternalId, MetricType, SearchHit};

/// File name of the usearch graph inside an index directory
pub const HNSW_INDEX_FILE_NAME: &str = "hnsw.usearch";

/// HNSW engine configuration
#[derive(Debug, Clone)]
pub struct HnswConfig {
    /// Vector dimension
    pub dimension: usize,
    /// Distance metric
    pub metric: MetricType,
    /// Number of connections per layer (M parameter)
    pub connectivity: usize,
    /// Build-time search depth (ef_construction)
    pub expansion_add: usize,
    /// Query-time search depth (ef_search)
    pub expansion_search: usize,
    /// Initial capacity (for pre-allocation)
    pub capacity: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            metric: MetricType::L2,
            connectivity: 16,
            expansion_add: 200,
            expansion_search: 100,
            capacity: 10_000,
        }
    }
}

impl HnswConfig {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ..Default::default()
        }
    }

    pub fn with_metric(mut self, metric: MetricType) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_connectivity(mut self, m: usize) -> Self {
        self.connectivity = m;
        self
    }

    pub fn with_expansion(mut self, ef_add: usize, ef_search: usize) -> Self {
        self.expansion_add = ef_add;
        self.expansion_search = ef_search;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    fn options(&self) -> IndexOptions {
        let metric = match self.metric {
            MetricType::L2 => MetricKind::L2sq,
            MetricType::InnerProduct => MetricKind::IP,
            MetricType::Cosine => MetricKind::Cos,
        };
        IndexOptions {
            dimensions: self.dimension,
            metric,
            quantization: ScalarKind::F32,
            connectivity: self.connectivity,
            expansion_add: self.expansion_add,
            expansion_search: self.expansion_search,
            multi: false, // Single vector per key
        }
    }
}

fn index_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::Index(e.to_string())
}

fn path_str(path: &Path) -> Result<&str, EngineError> {
    path.to_str()
        .ok_or_else(|| EngineError::Index("Invalid path encoding".to_string()))
}

/// HNSW engine wrapper around usearch.
pub struct HnswEngine {
    index: Option<Index>,
    config: HnswConfig,
}

impl HnswEngine {
    /// Create an empty engine with capacity reserved.
    pub fn create(config: HnswConfig) -> Result<Self, EngineError> {
        let index = Index::new(&config.options()).map_err(index_err)?;
        index.reserve(config.capacity).map_err(index_err)?;
        info!(dim = config.dimension, "Created new HNSW index");
        Ok(Self {
            index: Some(index),
            config,
        })
    }

    /// Load an engine from `dir/hnsw.usearch`.
    pub fn load(config: HnswConfig, dir: &Path) -> Result<Self, EngineError> {
        let index_file = dir.join(HNSW_INDEX_FILE_NAME);
        if !index_file.exists() {
            return Err(EngineError::FileNotFound(index_file.display().to_string()));
        }

        let index = Index::new(&config.options()).map_err(index_err)?;
        index
            .load(path_str(&index_file)?)
            .map_err(|e| EngineError::Index(format!("Failed to load: {}", e)))?;
        if index.dimensions() != config.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: config.dimension,
                actual: index.dimensions(),
            });
        }
        let reserve = config.capacity.max(index.size() * 2);
        index.reserve(reserve).map_err(index_err)?;

        info!(path = ?index_file, vectors = index.size(), "Opened existing HNSW index");
        Ok(Self {
            index: Some(index),
            config,
        })
    }

    fn index(&self) -> Result<&Index, EngineError> {
        self.index.as_ref().ok_or(EngineError::Closed)
    }

    fn ensure_capacity(&self, additional: usize) -> Result<(), EngineError> {
        let index = self.index()?;
        let needed = index.size() + additional;
        if needed > index.capacity() {
            let grown = needed.max(index.capacity() * 2);
            index.reserve(grown).map_err(index_err)?;
            debug!(capacity = grown, "Grew HNSW capacity");
        }
        Ok(())
    }
}

impl IndexEngine for HnswEngine {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn len(&self) -> usize {
        self.index.as_ref().map(|i| i.size()).unwrap_or(0)
    }

    fn is_trained(&self) -> bool {
        true
    }

    fn train(&mut self, count: usize, vectors: &[f32]) -> Result<(), EngineError> {
        self.index()?;
        check_batch(self.config.dimension, count, vectors)
    }

    fn add(
        &mut self,
        count: usize,
        vectors: &[f32],
        ids: &[InternalId],
    ) -> Result<usize, EngineError> {
        check_batch(self.config.dimension, count, vectors)?;
        if ids.len() != count {
            return Err(EngineError::InvalidBatch {
                count,
                values: ids.len(),
            });
        }
        self.ensure_capacity(count)?;

        let index = self.index()?;
        for (id, vector) in ids.iter().zip(vectors.chunks_exact(self.config.dimension)) {
            let key = u64::from(*id);
            if index.contains(key) {
                index.remove(key).map_err(index_err)?;
            }
            index.add(key, vector).map_err(index_err)?;
        }

        debug!(added = count, total = index.size(), "Added vectors");
        Ok(index.size())
    }

    fn remove(&mut self, count: usize, ids: &[InternalId]) -> Result<usize, EngineError> {
        let index = self.index()?;
        for id in ids.iter().take(count) {
            index.remove(u64::from(*id)).map_err(index_err)?;
        }
        Ok(index.size())
    }

    fn search(&self, k: usize, nq: usize, queries: &[f32]) -> Result<Vec<SearchHit>, EngineError> {
        check_batch(self.config.dimension, nq, queries)?;
        let index = self.index()?;

        let mut hits = Vec::with_capacity(nq * k);
        for query in queries.chunks_exact(self.config.dimension) {
            let results = index.search(query, k).map_err(index_err)?;
            for (key, distance) in results.keys.iter().zip(results.distances.iter()) {
                match InternalId::try_from(*key) {
                    Ok(id) => hits.push(SearchHit::new(id, *distance)),
                    Err(_) => hits.push(SearchHit::failed(format!("key {} out of range", key))),
                }
            }
        }

        debug!(k = k, nq = nq, found = hits.len(), "Search complete");
        Ok(hits)
    }

    fn save_index_with_path(&self, path: &Path) -> Result<(), EngineError> {
        let index = self.index()?;
        std::fs::create_dir_all(path)?;
        let index_file = path.join(HNSW_INDEX_FILE_NAME);
        index
            .save(path_str(&index_file)?)
            .map_err(|e| EngineError::Index(format!("Failed to save: {}", e)))?;

        info!(path = ?index_file, vectors = index.size(), "Saved HNSW index");
        Ok(())
    }

    fn close(&mut self) {
        self.index = None;
    }
}

/// Factory for [`HnswEngine`].
#[derive(Debug, Clone)]
pub struct HnswEngineFactory {
    config: HnswConfig,
}

impl HnswEngineFactory {
    pub fn new(config: HnswConfig) -> Self {
        Self { config }
    }
}

impl EngineFactory for HnswEngineFactory {
    fn name(&self) -> &'static str {
        "hnsw"
    }

    fn create(&self, _path: Option<&Path>) -> Result<Box<dyn IndexEngine>, EngineError> {
        Ok(Box::new(HnswEngine::create(self.config.clone())?))
    }

    fn load(&self, path: &Path) -> Result<Box<dyn IndexEngine>, EngineError> {
        Ok(Box::new(HnswEngine::load(self.config.clone(), path)?))
    }
}
