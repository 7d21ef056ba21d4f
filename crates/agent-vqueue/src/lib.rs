//! Mutation queue for the vector agent.
//!
//! Buffers insert and delete requests between commits. Each side keeps at most
//! one entry per uuid, and timestamps arbitrate between the two sides:
//!
//! - an insert older than a pending delete is discarded
//! - a newer entry replaces an older one on the same side
//! - popping a delete also pops any older insert for the same uuid
//!
//! ## Key Components
//!
//! - [`MutationQueue`]: the contract the orchestrator consumes
//! - [`VQueue`]: in-memory implementation over two `DashMap`s
//! - [`QueueError`]: error types for queue operations

pub mod error;
pub mod queue;
pub mod vqueue;

pub use error::QueueError;
pub use queue::MutationQueue;
pub use vqueue::VQueue;
