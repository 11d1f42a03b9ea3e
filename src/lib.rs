//! Engram - durable session memory for conversational coding agents
//!
//! An engine that keeps a compact, append-only memory of a coding session
//! whose raw transcript no longer fits in the model's context window:
//! - Buffers unobserved turns and compresses them into observation lines
//! - Periodically re-condenses the whole observation log
//! - Injects a budgeted, relevance-ranked subset back into every prompt

pub mod config;
pub mod engine;
pub mod memory;
pub mod observer;
pub mod parser;
pub mod protocol;
pub mod reflector;
pub mod retrieval;
pub mod summarizer;
pub mod temporal;
pub mod tokens;

pub use config::EngramConfig;
pub use engine::MemoryEngine;
pub use memory::{MemoryDocument, MemoryStore, PendingBuffer};
pub use protocol::{ChatMessage, CompactionDirective, MemoryStatus, Role};
pub use summarizer::Summarizer;

/// Result type for engram operations
pub type Result<T> = std::result::Result<T, EngramError>;

/// Errors that can occur in the memory engine
#[derive(Debug, thiserror::Error)]
pub enum EngramError {
    #[error("No summarization channel available")]
    SummarizerUnavailable,

    #[error("Summarization call failed: {0}")]
    SummarizerCall(String),

    #[error("Model output had no observations section")]
    ParseFailure,

    #[error("A {0} run is already in flight for this scope")]
    AlreadyRunning(&'static str),

    #[error("Nothing to do: {0}")]
    NothingToDo(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
