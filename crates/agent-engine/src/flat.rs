//! Exact brute-force engine.
//!
//! Stores vectors in one contiguous buffer and scans all of them per query.
//! Needs no training, so it is the default for small collections and tests.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::EngineError;
use crate::index::{check_batch, EngineFactory, IndexEngine, InternalId, MetricType, SearchHit};

/// File name of the flat engine snapshot inside an index directory
pub const FLAT_INDEX_FILE_NAME: &str = "flat.index";

/// Flat engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatConfig {
    /// Vector dimension
    pub dimension: usize,
    /// Distance metric
    pub metric: MetricType,
}

impl FlatConfig {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            metric: MetricType::default(),
        }
    }

    pub fn with_metric(mut self, metric: MetricType) -> Self {
        self.metric = metric;
        self
    }
}

#[derive(Serialize, Deserialize)]
struct FlatSnapshot {
    dimension: usize,
    metric: MetricType,
    ids: Vec<InternalId>,
    vectors: Vec<f32>,
}

/// Brute-force engine over a contiguous vector buffer.
pub struct FlatEngine {
    config: FlatConfig,
    ids: Vec<InternalId>,
    vectors: Vec<f32>,
    positions: HashMap<InternalId, usize>,
    closed: bool,
}

impl FlatEngine {
    /// Create an empty engine.
    pub fn new(config: FlatConfig) -> Self {
        Self {
            config,
            ids: Vec::new(),
            vectors: Vec::new(),
            positions: HashMap::new(),
            closed: false,
        }
    }

    /// Load an engine saved by [`IndexEngine::save_index_with_path`].
    pub fn load(config: FlatConfig, dir: &Path) -> Result<Self, EngineError> {
        let file_path = dir.join(FLAT_INDEX_FILE_NAME);
        if !file_path.exists() {
            return Err(EngineError::FileNotFound(file_path.display().to_string()));
        }
        let reader = BufReader::new(File::open(&file_path)?);
        let snapshot: FlatSnapshot = serde_json::from_reader(reader)?;

        if snapshot.dimension != config.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: config.dimension,
                actual: snapshot.dimension,
            });
        }
        check_batch(snapshot.dimension, snapshot.ids.len(), &snapshot.vectors)?;

        let positions = snapshot
            .ids
            .iter()
            .enumerate()
            .map(|(pos, id)| (*id, pos))
            .collect();

        info!(path = ?file_path, vectors = snapshot.ids.len(), "Loaded flat index");
        Ok(Self {
            config: FlatConfig {
                dimension: snapshot.dimension,
                metric: snapshot.metric,
            },
            ids: snapshot.ids,
            vectors: snapshot.vectors,
            positions,
            closed: false,
        })
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.closed {
            return Err(EngineError::Closed);
        }
        Ok(())
    }

    fn vector_at(&self, pos: usize) -> &[f32] {
        let dim = self.config.dimension;
        &self.vectors[pos * dim..(pos + 1) * dim]
    }

    fn distance(&self, query: &[f32], candidate: &[f32]) -> f32 {
        match self.config.metric {
            MetricType::L2 => query
                .iter()
                .zip(candidate)
                .map(|(a, b)| (a - b) * (a - b))
                .sum(),
            MetricType::InnerProduct => query.iter().zip(candidate).map(|(a, b)| a * b).sum(),
            MetricType::Cosine => {
                let dot: f32 = query.iter().zip(candidate).map(|(a, b)| a * b).sum();
                let qn: f32 = query.iter().map(|a| a * a).sum::<f32>().sqrt();
                let cn: f32 = candidate.iter().map(|a| a * a).sum::<f32>().sqrt();
                if qn == 0.0 || cn == 0.0 {
                    1.0
                } else {
                    1.0 - dot / (qn * cn)
                }
            }
        }
    }

    fn upsert(&mut self, id: InternalId, vector: &[f32]) {
        let dim = self.config.dimension;
        match self.positions.get(&id) {
            Some(&pos) => {
                self.vectors[pos * dim..(pos + 1) * dim].copy_from_slice(vector);
            }
            None => {
                self.positions.insert(id, self.ids.len());
                self.ids.push(id);
                self.vectors.extend_from_slice(vector);
            }
        }
    }

    fn remove_one(&mut self, id: InternalId) -> bool {
        let Some(pos) = self.positions.remove(&id) else {
            return false;
        };
        let dim = self.config.dimension;
        let last = self.ids.len() - 1;
        if pos != last {
            let moved = self.ids[last];
            self.ids.swap(pos, last);
            let (head, tail) = self.vectors.split_at_mut(last * dim);
            head[pos * dim..(pos + 1) * dim].copy_from_slice(&tail[..dim]);
            self.positions.insert(moved, pos);
        }
        self.ids.truncate(last);
        self.vectors.truncate(last * dim);
        true
    }
}

impl IndexEngine for FlatEngine {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn is_trained(&self) -> bool {
        true
    }

    fn train(&mut self, count: usize, vectors: &[f32]) -> Result<(), EngineError> {
        self.ensure_open()?;
        check_batch(self.config.dimension, count, vectors)?;
        debug!(count = count, "Flat index needs no training");
        Ok(())
    }

    fn add(
        &mut self,
        count: usize,
        vectors: &[f32],
        ids: &[InternalId],
    ) -> Result<usize, EngineError> {
        self.ensure_open()?;
        check_batch(self.config.dimension, count, vectors)?;
        if ids.len() != count {
            return Err(EngineError::InvalidBatch {
                count,
                values: ids.len(),
            });
        }

        for (id, vector) in ids.iter().zip(vectors.chunks_exact(self.config.dimension)) {
            self.upsert(*id, vector);
        }

        debug!(added = count, total = self.ids.len(), "Added vectors");
        Ok(self.ids.len())
    }

    fn remove(&mut self, count: usize, ids: &[InternalId]) -> Result<usize, EngineError> {
        self.ensure_open()?;
        let removed = ids.iter().take(count).filter(|id| self.remove_one(**id)).count();
        debug!(removed = removed, total = self.ids.len(), "Removed vectors");
        Ok(self.ids.len())
    }

    fn search(&self, k: usize, nq: usize, queries: &[f32]) -> Result<Vec<SearchHit>, EngineError> {
        self.ensure_open()?;
        check_batch(self.config.dimension, nq, queries)?;

        let higher_is_better = self.config.metric.higher_is_better();
        let mut hits = Vec::with_capacity(nq * k.min(self.ids.len()));

        for query in queries.chunks_exact(self.config.dimension) {
            let mut scored: Vec<(f32, InternalId)> = (0..self.ids.len())
                .map(|pos| (self.distance(query, self.vector_at(pos)), self.ids[pos]))
                .collect();
            scored.sort_by(|a, b| {
                let ord = a.0.total_cmp(&b.0);
                if higher_is_better {
                    ord.reverse()
                } else {
                    ord
                }
            });
            hits.extend(
                scored
                    .into_iter()
                    .take(k)
                    .map(|(distance, id)| SearchHit::new(id, distance)),
            );
        }

        Ok(hits)
    }

    fn save_index_with_path(&self, path: &Path) -> Result<(), EngineError> {
        self.ensure_open()?;
        fs::create_dir_all(path)?;
        let file_path = path.join(FLAT_INDEX_FILE_NAME);

        let snapshot = FlatSnapshot {
            dimension: self.config.dimension,
            metric: self.config.metric,
            ids: self.ids.clone(),
            vectors: self.vectors.clone(),
        };

        let file = File::create(&file_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &snapshot)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        info!(path = ?file_path, vectors = self.ids.len(), "Saved flat index");
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
        self.ids = Vec::new();
        self.vectors = Vec::new();
        self.positions = HashMap::new();
    }
}

/// Factory for [`FlatEngine`].
#[derive(Debug, Clone)]
pub struct FlatEngineFactory {
    config: FlatConfig,
}

impl FlatEngineFactory {
    pub fn new(config: FlatConfig) -> Self {
        Self { config }
    }
}

impl EngineFactory for FlatEngineFactory {
    fn name(&self) -> &'static str {
        "flat"
    }

    fn create(&self, path: Option<&Path>) -> Result<Box<dyn IndexEngine>, EngineError> {
        if let Some(path) = path {
            debug!(path = ?path, dim = self.config.dimension, "Creating new flat index");
        }
        Ok(Box::new(FlatEngine::new(self.config.clone())))
    }

    fn load(&self, path: &Path) -> Result<Box<dyn IndexEngine>, EngineError> {
        Ok(Box::new(FlatEngine::load(self.config.clone(), path)?))
    }
}
