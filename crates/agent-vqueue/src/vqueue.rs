//! In-memory mutation queue.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::QueueError;
use crate::queue::MutationQueue;

#[derive(Debug, Clone)]
struct QueuedInsert {
    vector: Arc<[f32]>,
    timestamp: i64,
}

/// [`MutationQueue`] keyed by uuid, one `DashMap` per side.
///
/// On equal timestamps the insert wins.
#[derive(Debug, Default)]
pub struct VQueue {
    inserts: DashMap<String, QueuedInsert>,
    deletes: DashMap<String, i64>,
}

fn validate(uuid: &str) -> Result<(), QueueError> {
    if uuid.trim().is_empty() {
        return Err(QueueError::InvalidUuid(uuid.to_string()));
    }
    Ok(())
}

impl VQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn delete_ts(&self, uuid: &str) -> Option<i64> {
        self.deletes.get(uuid).map(|ts| *ts)
    }

    fn insert_ts(&self, uuid: &str) -> Option<i64> {
        self.inserts.get(uuid).map(|entry| entry.timestamp)
    }
}

impl MutationQueue for VQueue {
    fn push_insert(&self, uuid: &str, vector: Vec<f32>, timestamp: i64) -> Result<(), QueueError> {
        validate(uuid)?;
        if let Some(dts) = self.delete_ts(uuid) {
            if dts > timestamp {
                debug!(uuid = uuid, "Insert older than pending delete, discarded");
                return Ok(());
            }
        }

        let queued = QueuedInsert {
            vector: vector.into(),
            timestamp,
        };
        match self.inserts.entry(uuid.to_string()) {
            Entry::Occupied(mut occupied) => {
                if timestamp > occupied.get().timestamp {
                    occupied.insert(queued);
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(queued);
            }
        }
        Ok(())
    }

    fn push_delete(&self, uuid: &str, timestamp: i64) -> Result<(), QueueError> {
        validate(uuid)?;
        match self.deletes.entry(uuid.to_string()) {
            Entry::Occupied(mut occupied) => {
                if timestamp > *occupied.get() {
                    occupied.insert(timestamp);
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(timestamp);
            }
        }
        Ok(())
    }

    fn ivq_len(&self) -> usize {
        self.inserts.len()
    }

    fn dvq_len(&self) -> usize {
        self.deletes.len()
    }

    fn iv_exists(&self, uuid: &str) -> Option<i64> {
        let its = self.insert_ts(uuid)?;
        match self.delete_ts(uuid) {
            Some(dts) if dts > its => None,
            _ => Some(its),
        }
    }

    fn dv_exists(&self, uuid: &str) -> Option<i64> {
        let dts = self.delete_ts(uuid)?;
        match self.insert_ts(uuid) {
            Some(its) if its >= dts => None,
            _ => Some(dts),
        }
    }

    fn range_pop_insert(
        &self,
        token: &CancellationToken,
        before: i64,
        f: &mut dyn FnMut(&str, &[f32], i64) -> bool,
    ) -> Result<(), QueueError> {
        let mut due: Vec<(String, QueuedInsert)> = Vec::new();
        let mut superseded: Vec<(String, i64)> = Vec::new();
        for entry in self.inserts.iter() {
            let queued = entry.value();
            if queued.timestamp > before {
                continue;
            }
            match self.delete_ts(entry.key()) {
                Some(dts) if dts > queued.timestamp => {
                    superseded.push((entry.key().clone(), queued.timestamp));
                }
                _ => due.push((entry.key().clone(), queued.clone())),
            }
        }

        for (uuid, ts) in superseded {
            self.inserts.remove_if(&uuid, |_, queued| queued.timestamp == ts);
        }

        due.sort_by_key(|(_, queued)| queued.timestamp);
        for (popped, (uuid, queued)) in due.iter().enumerate() {
            if token.is_cancelled() {
                return Err(QueueError::Cancelled { popped });
            }
            if !f(uuid, &queued.vector, queued.timestamp) {
                break;
            }
            // A push that landed during the walk keeps its newer entry.
            self.inserts
                .remove_if(uuid, |_, current| current.timestamp == queued.timestamp);
        }
        Ok(())
    }

    fn range_pop_delete(
        &self,
        token: &CancellationToken,
        before: i64,
        f: &mut dyn FnMut(&str) -> bool,
    ) -> Result<(), QueueError> {
        let mut due: Vec<(String, i64)> = self
            .deletes
            .iter()
            .filter(|entry| *entry.value() <= before)
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();

        due.sort_by_key(|(_, ts)| *ts);
        for (popped, (uuid, dts)) in due.iter().enumerate() {
            if token.is_cancelled() {
                return Err(QueueError::Cancelled { popped });
            }
            if !f(uuid) {
                break;
            }
            self.deletes.remove_if(uuid, |_, current| current == dts);
            self.inserts
                .remove_if(uuid, |_, queued| queued.timestamp < *dts);
        }
        Ok(())
    }
}
