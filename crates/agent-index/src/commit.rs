//! Commit protocol: drain the mutation queue into the engine and map.
//!
//! Deletes due by now are applied before inserts due by now, so the
//! delete-then-reinsert of an update lands in order even within one commit.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use agent_kvs::InternalId;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::IndexError;
use crate::phase::Phase;
use crate::service::{blocking, now_nanos, IndexOrchestrator, PendingBatch};

impl IndexOrchestrator {
    /// Commit buffered mutations.
    ///
    /// Returns [`IndexError::UncommittedIndexNotFound`] when nothing is
    /// buffered, and `Ok(())` without doing anything when another caller is
    /// already waiting to commit.
    pub async fn create_index(&self, token: &CancellationToken) -> Result<(), IndexError> {
        if self.uncommitted() == 0 {
            return Err(IndexError::UncommittedIndexNotFound);
        }

        let Some(ticket) = self.phase.admit() else {
            debug!("Concurrent create index request ignored, another caller is waiting");
            return Ok(());
        };
        let guard = self.phase.enter(Phase::Committing, token).await?;
        drop(ticket);

        let result = self.commit().await;
        drop(guard);
        self.gc();
        result
    }

    /// Runs once the phase is held. The drain uses its own token so a caller
    /// cancelling after entry cannot leave the queue half applied.
    async fn commit(&self) -> Result<(), IndexError> {
        let mut pending = self.pending.lock().await;
        if self.uncommitted() == 0 {
            return Err(IndexError::UncommittedIndexNotFound);
        }

        let drain = CancellationToken::new();
        let now = now_nanos();
        let deleted = self.apply_deletes(&drain, now, &mut pending).await;
        let staged = self.stage_inserts(&drain, now, &mut pending);
        self.pending_len.store(pending.len(), Ordering::Release);
        let deleted = deleted?;
        let staged = staged?;

        if !self.is_trained() && pending.len() >= self.config.train_threshold() {
            self.train_pending(&mut pending).await?;
        }

        let mut added = 0;
        if self.is_trained() && !pending.is_empty() {
            added = pending.len();
            self.add_pending(&mut pending).await?;
        }

        let nocie = self.nocie.fetch_add(1, Ordering::AcqRel) + 1;
        info!(
            deleted = deleted,
            staged = staged,
            added = added,
            pending = pending.len(),
            total = self.engine.read().len(),
            nocie = nocie,
            "Create index completed"
        );
        Ok(())
    }

    /// Remove deletes due by `now` from the map, then from the pending batch
    /// or the engine. Failed engine removals are recorded in the failure map.
    async fn apply_deletes(
        &self,
        token: &CancellationToken,
        now: i64,
        pending: &mut PendingBatch,
    ) -> Result<usize, IndexError> {
        let dimension = self.config.dimension;
        let mut deleted = 0;
        let mut committed = Vec::new();
        let popped = self.queue.range_pop_delete(token, now, &mut |uuid| {
            let Some(id) = self.kvs.delete(uuid) else {
                warn!(uuid = uuid, "Delete target not in identifier map, skipped");
                return true;
            };
            if !pending.remove(id, dimension) {
                committed.push((uuid.to_string(), id));
            }
            deleted += 1;
            true
        });

        if !committed.is_empty() {
            let engine = Arc::clone(&self.engine);
            let failed = blocking(move || {
                let mut engine = engine.write();
                let failed: Vec<(String, InternalId)> = committed
                    .into_iter()
                    .filter(|(uuid, id)| match engine.remove(1, &[*id]) {
                        Ok(_) => false,
                        Err(e) => {
                            warn!(uuid = %uuid, id = id, error = %e, "Engine remove failed");
                            true
                        }
                    })
                    .collect();
                Ok(failed)
            })
            .await?;
            let mut failures = self.failures.lock();
            for (uuid, id) in failed {
                failures.insert(uuid, i64::from(id));
            }
        }
        popped?;
        Ok(deleted)
    }

    /// Assign ids to inserts due by `now` and stage their vectors.
    fn stage_inserts(
        &self,
        token: &CancellationToken,
        now: i64,
        pending: &mut PendingBatch,
    ) -> Result<usize, IndexError> {
        let mut staged = 0;
        self.queue.range_pop_insert(token, now, &mut |uuid, vector, ts| {
            let id = self.icnt.fetch_add(1, Ordering::AcqRel);
            pending.push(vector, id);
            self.kvs.set(uuid, id, ts);
            self.failures.lock().remove(uuid);
            staged += 1;
            true
        })?;
        Ok(staged)
    }

    async fn train_pending(&self, pending: &mut PendingBatch) -> Result<(), IndexError> {
        let engine = Arc::clone(&self.engine);
        let batch = std::mem::take(pending);
        let (batch, result) = tokio::task::spawn_blocking(move || {
            let result = engine.write().train(batch.len(), &batch.vectors);
            (batch, result)
        })
        .await?;

        let count = batch.len();
        *pending = batch;
        result?;
        self.is_trained.store(true, Ordering::Release);
        self.train_size.store(count, Ordering::Release);
        info!(count = count, "Trained index engine on pending vectors");
        Ok(())
    }

    async fn add_pending(&self, pending: &mut PendingBatch) -> Result<(), IndexError> {
        let engine = Arc::clone(&self.engine);
        let batch = std::mem::take(pending);
        let (mut batch, result) = tokio::task::spawn_blocking(move || {
            let result = engine.write().add(batch.len(), &batch.vectors, &batch.ids);
            (batch, result)
        })
        .await?;

        if result.is_ok() {
            batch.clear();
        }
        *pending = batch;
        self.pending_len.store(pending.len(), Ordering::Release);
        result?;
        Ok(())
    }

    /// Release spare buffer capacity when proactive GC is enabled.
    pub(crate) fn gc(&self) {
        if !self.config.enable_proactive_gc {
            return;
        }
        if let Ok(mut pending) = self.pending.try_lock() {
            pending.shrink_to_fit();
        }
        self.failures.lock().shrink_to_fit();
        let nogce = self.nogce.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(nogce = nogce, "Proactive GC completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineKind, IndexConfig};
    use crate::testing::CountingFactory;
    use agent_kvs::{BidiMap, IdentifierMap, KvsError};
    use pretty_assertions::assert_eq;

    /// Identifier map that cancels `token` on its first delete.
    struct CancelOnDelete {
        inner: BidiMap,
        token: CancellationToken,
    }

    impl IdentifierMap for CancelOnDelete {
        fn get(&self, uuid: &str) -> Option<(InternalId, i64)> {
            self.inner.get(uuid)
        }

        fn get_inverse(&self, id: InternalId) -> Option<(String, i64)> {
            self.inner.get_inverse(id)
        }

        fn set(&self, uuid: &str, id: InternalId, timestamp: i64) {
            self.inner.set(uuid, id, timestamp)
        }

        fn delete(&self, uuid: &str) -> Option<InternalId> {
            self.token.cancel();
            self.inner.delete(uuid)
        }

        fn len(&self) -> usize {
            self.inner.len()
        }

        fn range(
            &self,
            token: &CancellationToken,
            f: &mut dyn FnMut(&str, InternalId, i64) -> bool,
        ) -> Result<(), KvsError> {
            self.inner.range(token, f)
        }

        fn close(&self) -> Result<(), KvsError> {
            self.inner.close()
        }
    }

    async fn flat(dimension: usize) -> Arc<IndexOrchestrator> {
        let config = IndexConfig::new(dimension).with_engine(EngineKind::Flat);
        Arc::new(IndexOrchestrator::builder(config).build().await.unwrap())
    }

    #[tokio::test]
    async fn test_second_commit_is_noop() {
        let index = flat(4).await;
        let token = CancellationToken::new();
        index.insert("a", vec![1.0; 4]).unwrap();

        index.create_index(&token).await.unwrap();
        assert!(matches!(
            index.create_index(&token).await,
            Err(IndexError::UncommittedIndexNotFound)
        ));
        assert_eq!(index.number_of_create_index_execution(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_commits_run_once() {
        let index = flat(4).await;
        for i in 0..50 {
            index.insert(&format!("u{}", i), vec![i as f32; 4]).unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..16 {
            let index = Arc::clone(&index);
            handles.push(tokio::spawn(async move {
                index.create_index(&CancellationToken::new()).await
            }));
        }
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) | Err(IndexError::UncommittedIndexNotFound) => {}
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(index.number_of_create_index_execution(), 1);
        assert_eq!(index.len(), 50);
        assert_eq!(index.insert_vqueue_buffer_len(), 0);
    }

    #[tokio::test]
    async fn test_exists_priority() {
        let index = flat(4).await;
        let token = CancellationToken::new();

        index.insert("a", vec![1.0; 4]).unwrap();
        assert_eq!(index.exists("a"), Some(0));
        assert_eq!(index.len(), 0);

        index.create_index(&token).await.unwrap();
        let id = index.exists("a").unwrap();
        assert_eq!(index.kvs.get("a").map(|(id, _)| id), Some(id));

        index.delete("a").unwrap();
        assert_eq!(index.exists("a"), None);
        assert_eq!(index.len(), 1);

        index.create_index(&token).await.unwrap();
        assert_eq!(index.exists("a"), None);
        assert_eq!(index.len(), 0);
    }

    #[tokio::test]
    async fn test_update_reinserts_after_delete() {
        let index = flat(4).await;
        let token = CancellationToken::new();
        index.insert_with_time("a", vec![1.0; 4], 1_000).unwrap();
        index.create_index(&token).await.unwrap();
        let (old_id, old_ts) = index.kvs.get("a").unwrap();

        index.update_with_time("a", vec![2.0; 4], 5_000).unwrap();
        assert_eq!(index.queue.dv_exists("a"), None);
        assert_eq!(index.queue.iv_exists("a"), Some(5_001));

        index.create_index(&token).await.unwrap();
        let (new_id, new_ts) = index.kvs.get("a").unwrap();
        assert_ne!(old_id, new_id);
        assert!(new_ts > old_ts);
        assert_eq!(new_ts, 5_001);
        assert_eq!(index.len(), 1);

        let hits = index.search(1, 1, &[2.0; 4]).unwrap();
        assert_eq!(hits[0].id, "a");
    }

    #[tokio::test]
    async fn test_update_of_uncommitted_insert() {
        let index = flat(4).await;
        let token = CancellationToken::new();
        index.insert_with_time("a", vec![1.0; 4], 1_000).unwrap();
        index.update_with_time("a", vec![3.0; 4], 2_000).unwrap();

        index.create_index(&token).await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.kvs.get("a").map(|(_, ts)| ts), Some(2_001));
        let hits = index.search(1, 1, &[3.0; 4]).unwrap();
        assert_eq!(hits[0].distance, 0.0);
    }

    #[tokio::test]
    async fn test_future_mutations_wait() {
        let index = flat(4).await;
        let token = CancellationToken::new();
        let future = now_nanos() + 3_600_000_000_000;
        index.insert_with_time("later", vec![1.0; 4], future).unwrap();

        index.create_index(&token).await.unwrap();
        assert_eq!(index.len(), 0);
        assert_eq!(index.insert_vqueue_buffer_len(), 1);
    }

    #[tokio::test]
    async fn test_training_gate() {
        let factory = CountingFactory::untrained(4);
        let config = IndexConfig {
            nlist: 1,
            nbits_per_idx: 1,
            ..IndexConfig::new(4)
        };
        let threshold = config.train_threshold();
        assert_eq!(threshold, 78);
        let index = IndexOrchestrator::builder(config)
            .engine_factory(Arc::new(factory.clone()))
            .build()
            .await
            .unwrap();
        let token = CancellationToken::new();
        assert!(!index.is_trained());

        for i in 0..threshold - 1 {
            index.insert(&format!("u{}", i), vec![i as f32; 4]).unwrap();
        }
        index.create_index(&token).await.unwrap();
        assert!(!index.is_trained());
        assert_eq!(factory.counters().adds(), 0);
        assert_eq!(index.len(), threshold - 1);
        assert!(index.exists("u0").is_some());

        index.insert("last", vec![0.5; 4]).unwrap();
        index.create_index(&token).await.unwrap();
        assert!(index.is_trained());
        assert_eq!(index.train_size(), threshold);
        assert_eq!(factory.counters().adds(), 1);
        assert_eq!(index.engine.read().len(), threshold);
    }

    #[tokio::test]
    async fn test_failed_remove_is_recorded() {
        let factory = CountingFactory::trained(4).failing_removes();
        let index = IndexOrchestrator::builder(IndexConfig::new(4))
            .engine_factory(Arc::new(factory))
            .build()
            .await
            .unwrap();
        let token = CancellationToken::new();

        index.insert("a", vec![1.0; 4]).unwrap();
        index.create_index(&token).await.unwrap();
        index.delete("a").unwrap();
        index.create_index(&token).await.unwrap();

        assert_eq!(index.broken_entries_len(), 1);
        assert_eq!(index.len(), 0);

        // reinserting clears the stale failure
        index.insert("a", vec![2.0; 4]).unwrap();
        index.create_index(&token).await.unwrap();
        assert_eq!(index.broken_entries_len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_wait_restores_waiter() {
        let index = flat(4).await;
        index.insert("a", vec![1.0; 4]).unwrap();
        let _busy = index.phase.try_enter(Phase::Saving).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        assert!(matches!(
            index.create_index(&token).await,
            Err(IndexError::Cancelled)
        ));
        assert_eq!(index.phase.waiters(), 0);
        assert_eq!(index.insert_vqueue_buffer_len(), 1);
    }

    #[tokio::test]
    async fn test_proactive_gc_counts() {
        let config = IndexConfig {
            enable_proactive_gc: true,
            ..IndexConfig::new(4).with_engine(EngineKind::Flat)
        };
        let index = IndexOrchestrator::builder(config).build().await.unwrap();
        index.insert("a", vec![1.0; 4]).unwrap();
        index.create_index(&CancellationToken::new()).await.unwrap();
        assert_eq!(index.number_of_proactive_gc_execution(), 1);
    }

    #[tokio::test]
    async fn test_delete_of_staged_vector_drops_it_from_pending() {
        let factory = CountingFactory::untrained(4);
        let config = IndexConfig {
            nlist: 1,
            nbits_per_idx: 1,
            ..IndexConfig::new(4)
        };
        let threshold = config.train_threshold();
        let index = IndexOrchestrator::builder(config)
            .engine_factory(Arc::new(factory))
            .build()
            .await
            .unwrap();
        let token = CancellationToken::new();

        index.insert("ghost", vec![9.0; 4]).unwrap();
        index.create_index(&token).await.unwrap();
        index.delete("ghost").unwrap();
        index.create_index(&token).await.unwrap();
        assert_eq!(index.pending.lock().await.len(), 0);

        for i in 0..threshold {
            index.insert(&format!("u{}", i), vec![0.0; 4]).unwrap();
        }
        index.create_index(&token).await.unwrap();
        assert!(index.is_trained());
        assert_eq!(index.len(), threshold);
        assert_eq!(index.engine.read().len(), threshold);

        let hits = index.search(1, 1, &[9.0; 4]).unwrap();
        assert_eq!(hits.len(), 1);
        assert_ne!(hits[0].id, "ghost");
    }

    #[tokio::test]
    async fn test_cancel_after_entry_still_applies_whole_commit() {
        let token = CancellationToken::new();
        let kvs = Arc::new(CancelOnDelete {
            inner: BidiMap::new(),
            token: token.clone(),
        });
        let config = IndexConfig::new(4).with_engine(EngineKind::Flat);
        let index = IndexOrchestrator::builder(config)
            .identifier_map(kvs)
            .build()
            .await
            .unwrap();

        index.insert("a", vec![1.0; 4]).unwrap();
        index.insert("b", vec![2.0; 4]).unwrap();
        index.create_index(&token).await.unwrap();
        assert!(!token.is_cancelled());

        index.delete("a").unwrap();
        index.delete("b").unwrap();
        index.insert("c", vec![3.0; 4]).unwrap();
        index.create_index(&token).await.unwrap();

        assert!(token.is_cancelled());
        assert_eq!(index.len(), 1);
        assert!(index.exists("c").is_some());
        assert_eq!(index.exists("a"), None);
        assert_eq!(index.insert_vqueue_buffer_len(), 0);
        assert_eq!(index.delete_vqueue_buffer_len(), 0);
        assert_eq!(index.engine.read().len(), 1);
    }
}
