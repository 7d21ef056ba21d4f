//! Identifier map for the vector agent.
//!
//! Maps caller UUIDs to the dense internal ids an ANN engine stores, and back:
//! - [`IdentifierMap`]: the contract the orchestrator consumes
//! - [`BidiMap`]: in-memory bidirectional implementation over two `DashMap`s
//!
//! Every entry carries the nanosecond timestamp of the mutation that wrote it.

pub mod bidi;
pub mod error;
pub mod map;

pub use bidi::BidiMap;
pub use error::KvsError;
pub use map::{IdentifierMap, InternalId};
