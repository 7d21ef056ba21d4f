//! Mutation queue contract.

use tokio_util::sync::CancellationToken;

use crate::error::QueueError;

/// Per-uuid buffer of pending inserts and deletes.
///
/// Timestamps are nanoseconds since the epoch and decide which side wins when
/// both hold an entry for the same uuid.
pub trait MutationQueue: Send + Sync {
    /// Queue `vector` for insertion under `uuid`.
    fn push_insert(&self, uuid: &str, vector: Vec<f32>, timestamp: i64) -> Result<(), QueueError>;

    /// Queue a delete of `uuid`.
    fn push_delete(&self, uuid: &str, timestamp: i64) -> Result<(), QueueError>;

    /// Number of queued inserts
    fn ivq_len(&self) -> usize;

    /// Number of queued deletes
    fn dvq_len(&self) -> usize;

    /// Timestamp of the queued insert for `uuid`, if it is newer than any
    /// queued delete.
    fn iv_exists(&self, uuid: &str) -> Option<i64>;

    /// Timestamp of the queued delete for `uuid`, if no newer insert
    /// supersedes it.
    fn dv_exists(&self, uuid: &str) -> Option<i64>;

    /// Pop inserts stamped at or before `before`, oldest first.
    ///
    /// An entry is removed once `f` has returned for it; returning false stops
    /// the walk and leaves that entry queued.
    fn range_pop_insert(
        &self,
        token: &CancellationToken,
        before: i64,
        f: &mut dyn FnMut(&str, &[f32], i64) -> bool,
    ) -> Result<(), QueueError>;

    /// Pop deletes stamped at or before `before`, oldest first, with the same
    /// stop rules as [`MutationQueue::range_pop_insert`].
    fn range_pop_delete(
        &self,
        token: &CancellationToken,
        before: i64,
        f: &mut dyn FnMut(&str) -> bool,
    ) -> Result<(), QueueError>;
}
