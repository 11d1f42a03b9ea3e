//! Host-facing types
//!
//! The engine never talks to the agent host directly; it consumes hook
//! payloads and returns directives in these shapes. Everything here is plain
//! serde data so the host can move it across whatever boundary it owns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// One transcript message as delivered by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Host-assigned entry id, used by the pre-compaction hook
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Answer returned from the pre-compaction hook: what the host should keep
/// and the summary message to splice in for everything it drops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionDirective {
    /// Replacement summary for the dropped messages, if memory has content
    pub summary: Option<String>,
    /// Entry id marking the first message the host should keep
    pub keep_from_id: Option<String>,
}

/// Snapshot of one scope's memory state for the status command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStatus {
    pub scope: String,
    pub observation_lines: usize,
    pub observation_tokens: usize,
    pub observation_runs: u64,
    pub reflection_runs: u64,
    pub pending_segments: usize,
    pub pending_tokens: usize,
    pub last_observed_at: Option<DateTime<Utc>>,
    pub last_compression_ratio: Option<f64>,
    pub is_observing: bool,
    pub is_reflecting: bool,
}

impl MemoryStatus {
    /// Human-readable status block, one field per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("scope: {}\n", self.scope));
        out.push_str(&format!(
            "observations: {} lines, ~{} tokens\n",
            self.observation_lines, self.observation_tokens
        ));
        out.push_str(&format!(
            "runs: {} observe / {} reflect\n",
            self.observation_runs, self.reflection_runs
        ));
        out.push_str(&format!(
            "pending: {} segments, ~{} tokens\n",
            self.pending_segments, self.pending_tokens
        ));
        if let Some(at) = self.last_observed_at {
            out.push_str(&format!("last observed: {}\n", at.format("%Y-%m-%d %H:%M:%S UTC")));
        }
        if let Some(ratio) = self.last_compression_ratio {
            out.push_str(&format!("last compression: {:.1}x\n", ratio));
        }
        if self.is_observing {
            out.push_str("observer run in flight\n");
        }
        if self.is_reflecting {
            out.push_str("reflector run in flight\n");
        }
        out
    }
}
