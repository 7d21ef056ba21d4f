//! Identifier map contract.

use tokio_util::sync::CancellationToken;

use crate::error::KvsError;

/// Dense identifier stored by the ANN engine.
pub type InternalId = u32;

/// Bidirectional UUID ⇄ internal id map.
///
/// Implementations must be safe to call from many threads at once. A uuid and
/// an id are each bound to at most one entry.
pub trait IdentifierMap: Send + Sync {
    /// Look up the id and timestamp for `uuid`.
    fn get(&self, uuid: &str) -> Option<(InternalId, i64)>;

    /// Look up the uuid and timestamp for `id`.
    fn get_inverse(&self, id: InternalId) -> Option<(String, i64)>;

    /// Bind `uuid` to `id`, replacing any previous binding of either side.
    fn set(&self, uuid: &str, id: InternalId, timestamp: i64);

    /// Remove `uuid`, returning the id it was bound to.
    fn delete(&self, uuid: &str) -> Option<InternalId>;

    /// Number of live entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit every entry until `f` returns false or `token` is cancelled.
    fn range(
        &self,
        token: &CancellationToken,
        f: &mut dyn FnMut(&str, InternalId, i64) -> bool,
    ) -> Result<(), KvsError>;

    /// Release the map. Later writes are ignored and reads return nothing.
    fn close(&self) -> Result<(), KvsError>;
}
