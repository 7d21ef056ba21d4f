//! Error types for the mutation queue.

use thiserror::Error;

/// Errors that can occur in the mutation queue
#[derive(Error, Debug)]
pub enum QueueError {
    /// The uuid is empty or blank
    #[error("Invalid uuid: {0:?}")]
    InvalidUuid(String),

    /// A range pop was cancelled before completing
    #[error("Queue range cancelled after {popped} entries")]
    Cancelled { popped: usize },
}
