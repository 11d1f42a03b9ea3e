//! Memory state for the engine
//!
//! The document (observation log plus short fields), the pending buffer of
//! unobserved transcript, and the scoped persistence layer.

mod document;
mod pending;
mod store;

pub use document::{MemoryDocument, ReflectionEntry};
pub use pending::{PendingBuffer, PendingSegment, PendingSnapshot};
pub use store::MemoryStore;
