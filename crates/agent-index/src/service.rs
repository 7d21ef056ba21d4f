//! The index orchestrator and its public service contract.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_engine::{check_batch, EngineFactory, FlatConfig, FlatEngineFactory, IndexEngine};
use agent_kvs::{BidiMap, IdentifierMap, InternalId};
use agent_vqueue::{MutationQueue, VQueue};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{EngineKind, IndexConfig};
use crate::error::IndexError;
use crate::phase::PhaseState;
use crate::recovery;
use crate::snapshot::{SnapshotArena, SnapshotFs, StdFs};

/// Engine shared between the orchestrator and its blocking tasks.
pub(crate) type SharedEngine = Arc<RwLock<Box<dyn IndexEngine>>>;

/// Current time in nanoseconds since the epoch.
pub(crate) fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Run `f` on the blocking pool, folding a join failure into [`IndexError`].
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, IndexError>
where
    F: FnOnce() -> Result<T, IndexError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// One search result row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Distance {
    pub id: String,
    pub distance: f32,
}

/// Point-in-time view of the orchestrator counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub len: usize,
    pub insert_queue_len: usize,
    pub delete_queue_len: usize,
    pub number_of_create_index_execution: u64,
    pub number_of_proactive_gc_execution: u64,
    pub dimension: usize,
    pub train_size: usize,
    pub is_trained: bool,
    pub is_indexing: bool,
    pub is_saving: bool,
    pub is_in_memory: bool,
    pub broken_entries: usize,
}

/// Vectors committed to the queue side but not yet added to the engine.
#[derive(Debug, Default)]
pub(crate) struct PendingBatch {
    pub vectors: Vec<f32>,
    pub ids: Vec<InternalId>,
}

impl PendingBatch {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn push(&mut self, vector: &[f32], id: InternalId) {
        self.vectors.extend_from_slice(vector);
        self.ids.push(id);
    }

    /// Drop a staged id and its vector. Returns false when `id` is not staged.
    pub fn remove(&mut self, id: InternalId, dimension: usize) -> bool {
        let Some(pos) = self.ids.iter().position(|&staged| staged == id) else {
            return false;
        };
        self.ids.remove(pos);
        let start = pos * dimension;
        self.vectors.drain(start..start + dimension);
        true
    }

    pub fn clear(&mut self) {
        self.vectors.clear();
        self.ids.clear();
    }

    pub fn shrink_to_fit(&mut self) {
        self.vectors.shrink_to_fit();
        self.ids.shrink_to_fit();
    }
}

/// Owns the engine, identifier map and mutation queue, and coordinates
/// commits, saves and searches over them.
pub struct IndexOrchestrator {
    pub(crate) config: IndexConfig,
    pub(crate) engine: SharedEngine,
    pub(crate) kvs: Arc<dyn IdentifierMap>,
    pub(crate) queue: Arc<dyn MutationQueue>,
    pub(crate) failures: Arc<Mutex<HashMap<String, i64>>>,
    pub(crate) arena: Option<SnapshotArena>,
    pub(crate) phase: PhaseState,
    pub(crate) pending: tokio::sync::Mutex<PendingBatch>,
    pub(crate) pending_len: AtomicUsize,
    pub(crate) save_lock: tokio::sync::Mutex<()>,
    pub(crate) nocie: AtomicU64,
    pub(crate) nogce: AtomicU64,
    pub(crate) last_nocie: AtomicU64,
    pub(crate) icnt: AtomicU32,
    pub(crate) is_trained: AtomicBool,
    pub(crate) train_size: AtomicUsize,
}

impl IndexOrchestrator {
    pub fn builder(config: IndexConfig) -> IndexOrchestratorBuilder {
        IndexOrchestratorBuilder::new(config)
    }

    /// Queue `vector` for insertion under `uuid`, stamped now.
    pub fn insert(&self, uuid: &str, vector: Vec<f32>) -> Result<(), IndexError> {
        self.insert_with_time(uuid, vector, 0)
    }

    /// Queue `vector` for insertion at `ts` (≤ 0 means now).
    pub fn insert_with_time(&self, uuid: &str, vector: Vec<f32>, ts: i64) -> Result<(), IndexError> {
        self.validate_vector(uuid, &vector)?;
        if self.exists(uuid).is_some() {
            return Err(IndexError::UuidAlreadyExists(uuid.to_string()));
        }
        self.queue.push_insert(uuid, vector, stamp(ts))?;
        Ok(())
    }

    /// Replace the vector stored under `uuid`.
    pub fn update(&self, uuid: &str, vector: Vec<f32>) -> Result<(), IndexError> {
        self.update_with_time(uuid, vector, 0)
    }

    /// Delete at `ts` and reinsert at `ts + 1` so the new vector is strictly
    /// newer than the delete it follows.
    pub fn update_with_time(&self, uuid: &str, vector: Vec<f32>, ts: i64) -> Result<(), IndexError> {
        self.validate_vector(uuid, &vector)?;
        let ts = stamp(ts);
        self.delete_with_time(uuid, ts)?;
        self.queue.push_insert(uuid, vector, ts.saturating_add(1))?;
        Ok(())
    }

    /// Queue a delete of `uuid`, stamped now.
    pub fn delete(&self, uuid: &str) -> Result<(), IndexError> {
        self.delete_with_time(uuid, 0)
    }

    /// Queue a delete of `uuid` at `ts` (≤ 0 means now).
    pub fn delete_with_time(&self, uuid: &str, ts: i64) -> Result<(), IndexError> {
        if uuid.is_empty() {
            return Err(IndexError::UuidEmpty);
        }
        if self.kvs.get(uuid).is_none() && self.queue.iv_exists(uuid).is_none() {
            return Err(IndexError::ObjectIdNotFound(uuid.to_string()));
        }
        self.queue.push_delete(uuid, stamp(ts))?;
        Ok(())
    }

    /// Resolve `uuid` without touching the engine.
    ///
    /// A queued insert is visible as `Some(0)` before it has an internal id;
    /// an indexed entry with a pending delete is invisible.
    pub fn exists(&self, uuid: &str) -> Option<InternalId> {
        if self.queue.iv_exists(uuid).is_some() {
            return Some(0);
        }
        let (id, _) = self.kvs.get(uuid)?;
        if self.queue.dv_exists(uuid).is_some() {
            return None;
        }
        Some(id)
    }

    /// Search `nq` queries for their `k` nearest neighbors.
    pub fn search(&self, k: usize, nq: usize, queries: &[f32]) -> Result<Vec<Distance>, IndexError> {
        if self.is_indexing() {
            return Err(IndexError::CreateIndexingInProgress);
        }
        let dimension = self.config.dimension;
        if queries.len() != nq * dimension {
            return Err(IndexError::DimensionMismatch {
                expected: nq * dimension,
                actual: queries.len(),
            });
        }

        let hits = self.engine.read().search(k, nq, queries)?;
        if self.is_indexing() {
            return Err(IndexError::CreateIndexingInProgress);
        }

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            if let Some(err) = hit.error {
                warn!(error = %err, "Engine reported a failed search row");
                continue;
            }
            match self.kvs.get_inverse(hit.id) {
                Some((uuid, _)) => results.push(Distance {
                    id: uuid,
                    distance: hit.distance,
                }),
                None => warn!(id = hit.id, "Search hit has no uuid, dropped"),
            }
        }

        if results.is_empty() {
            return Err(IndexError::EmptySearchResult);
        }
        Ok(results)
    }

    /// Train the engine on `count` vectors.
    pub fn train(&self, count: usize, vectors: &[f32]) -> Result<(), IndexError> {
        check_batch(self.config.dimension, count, vectors)?;
        self.engine.write().train(count, vectors)?;
        self.is_trained.store(true, Ordering::Release);
        self.train_size.store(count, Ordering::Release);
        info!(count = count, "Trained index engine");
        Ok(())
    }

    /// Final commit and save, then release the identifier map and engine.
    pub async fn close(&self, token: &CancellationToken) -> Result<(), IndexError> {
        let mut errors = Vec::new();
        if !self.is_in_memory() {
            errors.extend(self.flush(token).await);
        }
        errors.extend(self.release());
        IndexError::join(errors).map_or(Ok(()), Err)
    }

    /// Like [`IndexOrchestrator::close`], but gives the final commit and save
    /// at most `deadline`.
    pub async fn close_within(&self, deadline: Duration) -> Result<(), IndexError> {
        let mut errors = Vec::new();
        if !self.is_in_memory() {
            let token = CancellationToken::new();
            match tokio::time::timeout(deadline, self.flush(&token)).await {
                Ok(flush_errors) => errors.extend(flush_errors),
                Err(_) => {
                    token.cancel();
                    warn!(deadline = ?deadline, "Final commit and save did not finish in time");
                    errors.push(IndexError::DeadlineExceeded);
                }
            }
        }
        errors.extend(self.release());
        IndexError::join(errors).map_or(Ok(()), Err)
    }

    async fn flush(&self, token: &CancellationToken) -> Vec<IndexError> {
        let mut errors = Vec::new();
        if let Err(e) = self.create_index(token).await {
            if !e.is_benign() {
                errors.push(e);
            }
        }
        if let Err(e) = self.save_index(token).await {
            if !e.is_benign() {
                errors.push(e);
            }
        }
        errors
    }

    fn release(&self) -> Option<IndexError> {
        let result = self.kvs.close();
        self.engine.write().close();
        info!("Closed index orchestrator");
        result.err().map(IndexError::from)
    }

    pub fn is_indexing(&self) -> bool {
        self.phase.is_committing()
    }

    pub fn is_saving(&self) -> bool {
        self.phase.is_saving()
    }

    /// Number of entries in the identifier map.
    pub fn len(&self) -> usize {
        self.kvs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert_vqueue_buffer_len(&self) -> usize {
        self.queue.ivq_len()
    }

    pub fn delete_vqueue_buffer_len(&self) -> usize {
        self.queue.dvq_len()
    }

    pub fn number_of_create_index_execution(&self) -> u64 {
        self.nocie.load(Ordering::Acquire)
    }

    pub fn number_of_proactive_gc_execution(&self) -> u64 {
        self.nogce.load(Ordering::Acquire)
    }

    pub fn dimension_size(&self) -> usize {
        self.config.dimension
    }

    pub fn train_size(&self) -> usize {
        self.train_size.load(Ordering::Acquire)
    }

    pub fn is_trained(&self) -> bool {
        self.is_trained.load(Ordering::Acquire)
    }

    pub fn is_in_memory(&self) -> bool {
        self.arena.is_none()
    }

    /// Size of the failure map.
    pub fn broken_entries_len(&self) -> usize {
        self.failures.lock().len()
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            len: self.len(),
            insert_queue_len: self.insert_vqueue_buffer_len(),
            delete_queue_len: self.delete_vqueue_buffer_len(),
            number_of_create_index_execution: self.number_of_create_index_execution(),
            number_of_proactive_gc_execution: self.number_of_proactive_gc_execution(),
            dimension: self.dimension_size(),
            train_size: self.train_size(),
            is_trained: self.is_trained(),
            is_indexing: self.is_indexing(),
            is_saving: self.is_saving(),
            is_in_memory: self.is_in_memory(),
            broken_entries: self.broken_entries_len(),
        }
    }

    /// Inserts, deletes and staged vectors not yet in the engine.
    pub(crate) fn uncommitted(&self) -> usize {
        self.queue.ivq_len() + self.queue.dvq_len() + self.pending_len.load(Ordering::Acquire)
    }

    fn validate_vector(&self, uuid: &str, vector: &[f32]) -> Result<(), IndexError> {
        if uuid.is_empty() {
            return Err(IndexError::UuidEmpty);
        }
        if vector.len() != self.config.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.config.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

fn stamp(ts: i64) -> i64 {
    if ts <= 0 {
        now_nanos()
    } else {
        ts
    }
}

/// Wires collaborators into an [`IndexOrchestrator`]; anything not supplied
/// gets the in-memory default.
pub struct IndexOrchestratorBuilder {
    config: IndexConfig,
    factory: Option<Arc<dyn EngineFactory>>,
    kvs: Option<Arc<dyn IdentifierMap>>,
    queue: Option<Arc<dyn MutationQueue>>,
    fs: Option<Arc<dyn SnapshotFs>>,
}

impl IndexOrchestratorBuilder {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            config,
            factory: None,
            kvs: None,
            queue: None,
            fs: None,
        }
    }

    pub fn engine_factory(mut self, factory: Arc<dyn EngineFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn identifier_map(mut self, kvs: Arc<dyn IdentifierMap>) -> Self {
        self.kvs = Some(kvs);
        self
    }

    pub fn mutation_queue(mut self, queue: Arc<dyn MutationQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn snapshot_fs(mut self, fs: Arc<dyn SnapshotFs>) -> Self {
        self.fs = Some(fs);
        self
    }

    /// Build the orchestrator, recovering a persisted snapshot if configured.
    pub async fn build(self) -> Result<IndexOrchestrator, IndexError> {
        self.config.validate()?;
        let config = self.config;
        let factory = match self.factory {
            Some(factory) => factory,
            None => default_factory(&config)?,
        };
        let kvs = self.kvs.unwrap_or_else(|| Arc::new(BidiMap::new()));
        let queue = self.queue.unwrap_or_else(|| Arc::new(VQueue::new()));
        let fs = self.fs.unwrap_or_else(|| Arc::new(StdFs));

        let mut failures = HashMap::new();
        let mut next_id: InternalId = 0;
        let (engine, arena) = match &config.index_path {
            None => {
                info!(engine = factory.name(), dim = config.dimension, "Starting in-memory index");
                (factory.create(None)?, None)
            }
            Some(base) => {
                let arena = SnapshotArena::open(base, config.enable_copy_on_write, fs)?;
                let recovered = recovery::recover(&config, &arena, &factory).await?;
                for (uuid, id, ts) in &recovered.map.entries {
                    kvs.set(uuid, *id, *ts);
                }
                next_id = recovered.map.max_id().map_or(0, |id| id.saturating_add(1));
                failures = recovered.map.failures;
                (recovered.engine, Some(arena))
            }
        };

        if engine.dimension() != config.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: config.dimension,
                actual: engine.dimension(),
            });
        }

        let trained = engine.is_trained();
        debug!(
            entries = kvs.len(),
            next_id = next_id,
            trained = trained,
            broken = failures.len(),
            "Index orchestrator state restored"
        );

        Ok(IndexOrchestrator {
            config,
            engine: Arc::new(RwLock::new(engine)),
            kvs,
            queue,
            failures: Arc::new(Mutex::new(failures)),
            arena,
            phase: PhaseState::new(),
            pending: tokio::sync::Mutex::new(PendingBatch::default()),
            pending_len: AtomicUsize::new(0),
            save_lock: tokio::sync::Mutex::new(()),
            nocie: AtomicU64::new(0),
            nogce: AtomicU64::new(0),
            last_nocie: AtomicU64::new(0),
            icnt: AtomicU32::new(next_id),
            is_trained: AtomicBool::new(trained),
            train_size: AtomicUsize::new(0),
        })
    }
}

fn default_factory(config: &IndexConfig) -> Result<Arc<dyn EngineFactory>, IndexError> {
    match config.engine {
        EngineKind::Flat => Ok(Arc::new(FlatEngineFactory::new(
            FlatConfig::new(config.dimension).with_metric(config.metric_type),
        ))),
        #[cfg(feature = "hnsw")]
        EngineKind::Hnsw => Ok(Arc::new(agent_engine::HnswEngineFactory::new(
            agent_engine::HnswConfig::new(config.dimension).with_metric(config.metric_type),
        ))),
        #[cfg(not(feature = "hnsw"))]
        EngineKind::Hnsw => Err(IndexError::Config(
            "hnsw engine requires the `hnsw` feature".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn flat(dimension: usize) -> IndexOrchestrator {
        IndexOrchestrator::builder(IndexConfig::new(dimension).with_engine(EngineKind::Flat))
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_insert_validation() {
        let index = flat(4).await;

        assert!(matches!(
            index.insert("", vec![0.0; 4]),
            Err(IndexError::UuidEmpty)
        ));
        assert!(matches!(
            index.insert("a", vec![0.0; 3]),
            Err(IndexError::DimensionMismatch { expected: 4, actual: 3 })
        ));
        assert_eq!(index.insert_vqueue_buffer_len(), 0);

        index.insert("a", vec![0.0; 4]).unwrap();
        assert!(matches!(
            index.insert("a", vec![1.0; 4]),
            Err(IndexError::UuidAlreadyExists(_))
        ));
        assert_eq!(index.insert_vqueue_buffer_len(), 1);
    }

    #[tokio::test]
    async fn test_update_dimension_checked_before_delete() {
        let index = flat(4).await;
        index.insert("a", vec![0.0; 4]).unwrap();

        assert!(matches!(
            index.update("a", vec![0.0; 5]),
            Err(IndexError::DimensionMismatch { .. })
        ));
        assert_eq!(index.delete_vqueue_buffer_len(), 0);
    }

    #[tokio::test]
    async fn test_delete_unknown() {
        let index = flat(4).await;
        assert!(matches!(index.delete(""), Err(IndexError::UuidEmpty)));
        assert!(matches!(
            index.delete("ghost"),
            Err(IndexError::ObjectIdNotFound(_))
        ));
        assert!(matches!(
            index.update("ghost", vec![0.0; 4]),
            Err(IndexError::ObjectIdNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_search_dimension_and_empty() {
        let index = flat(4).await;
        assert!(matches!(
            index.search(1, 1, &[0.0; 3]),
            Err(IndexError::DimensionMismatch { expected: 4, actual: 3 })
        ));
        assert!(matches!(
            index.search(1, 1, &[0.0; 4]),
            Err(IndexError::EmptySearchResult)
        ));
    }

    #[tokio::test]
    async fn test_search_rejected_while_committing() {
        let index = flat(4).await;
        let _guard = index.phase.try_enter(crate::Phase::Committing).unwrap();
        assert!(matches!(
            index.search(1, 1, &[0.0; 4]),
            Err(IndexError::CreateIndexingInProgress)
        ));
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let index = flat(8).await;
        index.insert("a", vec![0.0; 8]).unwrap();

        let stats = index.stats();
        assert_eq!(stats.dimension, 8);
        assert_eq!(stats.insert_queue_len, 1);
        assert_eq!(stats.len, 0);
        assert!(stats.is_in_memory);
        assert!(stats.is_trained);
        assert!(!stats.is_indexing);
    }

    #[tokio::test]
    async fn test_in_memory_close() {
        let index = flat(4).await;
        index.insert("a", vec![0.0; 4]).unwrap();
        index.close(&CancellationToken::new()).await.unwrap();
        assert_eq!(index.len(), 0);
    }
}
