//! Identifier map error types.

use thiserror::Error;

/// Errors that can occur in the identifier map
#[derive(Error, Debug)]
pub enum KvsError {
    /// Map was closed
    #[error("Identifier map is closed")]
    Closed,

    /// Range walk was cancelled
    #[error("Range cancelled after {visited} entries")]
    Cancelled { visited: usize },
}
