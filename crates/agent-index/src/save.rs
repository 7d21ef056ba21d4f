//! Snapshot protocol: persist the engine and identifier map.
//!
//! The identifier map, the failure map and the engine are written by three
//! concurrent blocking tasks. Metadata is only written once all three
//! succeed, and in copy-on-write mode the finished temp directory is then
//! rotated into `origin`.

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::IndexError;
use crate::kvsdb;
use crate::metadata::Metadata;
use crate::phase::Phase;
use crate::service::{blocking, IndexOrchestrator};
use crate::snapshot::SnapshotArena;

impl IndexOrchestrator {
    /// Persist the current state.
    ///
    /// Skipped without error when running in memory, when no commit has
    /// happened since the last successful save, or when the engine was never
    /// trained.
    pub async fn save_index(&self, token: &CancellationToken) -> Result<(), IndexError> {
        let Some(arena) = self.arena.as_ref() else {
            debug!("In-memory index, save skipped");
            return Ok(());
        };
        if self.last_nocie.load(Ordering::Acquire) == self.nocie.load(Ordering::Acquire) {
            debug!("No commit since last save, save skipped");
            return Ok(());
        }
        if !self.is_trained() {
            debug!("Index not trained, save skipped");
            return Ok(());
        }

        let guard = self.phase.enter(Phase::Saving, token).await?;
        let _save = self.save_lock.lock().await;
        let nocie = self.nocie.load(Ordering::Acquire);

        let result = self.write_snapshot(arena, token).await;
        drop(guard);
        if result.is_ok() {
            self.last_nocie.store(nocie, Ordering::Release);
        }
        self.gc();
        result
    }

    /// Commit, then save. A no-op or cancelled commit still saves.
    pub async fn create_and_save_index(&self, token: &CancellationToken) -> Result<(), IndexError> {
        match self.create_index(token).await {
            Ok(()) => {}
            Err(e) if e.is_noop() || matches!(e, IndexError::Cancelled) => {
                debug!(reason = %e, "Commit skipped before save");
            }
            Err(e) => return Err(e),
        }
        self.save_index(token).await
    }

    async fn write_snapshot(
        &self,
        arena: &SnapshotArena,
        token: &CancellationToken,
    ) -> Result<(), IndexError> {
        let target = arena.write_target();
        std::fs::create_dir_all(&target)?;

        if let Err(e) = self.write_files(&target, token).await {
            warn!(path = ?target, error = %e, "Snapshot write failed");
            if arena.copy_on_write() {
                if let Err(reset) = arena.reset_temp() {
                    warn!(error = %reset, "Failed to reset temp snapshot directory");
                }
            }
            return Err(e);
        }

        if arena.copy_on_write() {
            arena.rotate()?;
        }
        Ok(())
    }

    async fn write_files(&self, target: &Path, token: &CancellationToken) -> Result<(), IndexError> {
        let kvs_unit = {
            let kvs = Arc::clone(&self.kvs);
            let dir = target.to_path_buf();
            let token = token.clone();
            blocking(move || kvsdb::write_identifier_map(&dir, kvs.as_ref(), &token))
        };
        let failure_unit = {
            let failures = self.failures.lock().clone();
            let dir = target.to_path_buf();
            blocking(move || kvsdb::write_failure_map(&dir, &failures))
        };
        let engine_unit = {
            let engine = Arc::clone(&self.engine);
            let dir = target.to_path_buf();
            blocking(move || Ok(engine.read().save_index_with_path(&dir)?))
        };

        let (count, (), ()) = tokio::try_join!(kvs_unit, failure_unit, engine_unit)?;
        Metadata::valid(count as u64).store(target)?;
        info!(path = ?target, entries = count, "Saved index snapshot");
        Ok(())
    }
}
