//! In-memory bidirectional identifier map.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::KvsError;
use crate::map::{IdentifierMap, InternalId};

/// [`IdentifierMap`] backed by a forward and an inverse `DashMap`.
#[derive(Debug, Default)]
pub struct BidiMap {
    forward: DashMap<String, (InternalId, i64)>,
    inverse: DashMap<InternalId, (String, i64)>,
    closed: AtomicBool,
}

impl BidiMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            forward: DashMap::with_capacity(capacity),
            inverse: DashMap::with_capacity(capacity),
            closed: AtomicBool::new(false),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl IdentifierMap for BidiMap {
    fn get(&self, uuid: &str) -> Option<(InternalId, i64)> {
        if self.is_closed() {
            return None;
        }
        self.forward.get(uuid).map(|entry| *entry.value())
    }

    fn get_inverse(&self, id: InternalId) -> Option<(String, i64)> {
        if self.is_closed() {
            return None;
        }
        self.inverse.get(&id).map(|entry| entry.value().clone())
    }

    fn set(&self, uuid: &str, id: InternalId, timestamp: i64) {
        if self.is_closed() {
            return;
        }
        if let Some((old_id, _)) = self.forward.insert(uuid.to_string(), (id, timestamp)) {
            if old_id != id {
                self.inverse.remove_if(&old_id, |_, (owner, _)| owner == uuid);
            }
        }
        if let Some((old_uuid, _)) = self.inverse.insert(id, (uuid.to_string(), timestamp)) {
            if old_uuid != uuid {
                self.forward
                    .remove_if(old_uuid.as_str(), |_, (owned, _)| *owned == id);
            }
        }
    }

    fn delete(&self, uuid: &str) -> Option<InternalId> {
        if self.is_closed() {
            return None;
        }
        let (_, (id, _)) = self.forward.remove(uuid)?;
        self.inverse.remove_if(&id, |_, (owner, _)| owner == uuid);
        Some(id)
    }

    fn len(&self) -> usize {
        self.forward.len()
    }

    fn range(
        &self,
        token: &CancellationToken,
        f: &mut dyn FnMut(&str, InternalId, i64) -> bool,
    ) -> Result<(), KvsError> {
        if self.is_closed() {
            return Err(KvsError::Closed);
        }

        // Snapshot first so callbacks never run under a shard lock.
        let entries: Vec<(String, InternalId, i64)> = self
            .forward
            .iter()
            .map(|entry| {
                let (id, ts) = *entry.value();
                (entry.key().clone(), id, ts)
            })
            .collect();

        for (visited, (uuid, id, ts)) in entries.iter().enumerate() {
            if token.is_cancelled() {
                return Err(KvsError::Cancelled { visited });
            }
            if !f(uuid, *id, *ts) {
                break;
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<(), KvsError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!(entries = self.forward.len(), "Closing identifier map");
        self.forward.clear();
        self.inverse.clear();
        Ok(())
    }
}
