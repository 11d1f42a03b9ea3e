//! Pending buffer of unobserved transcript segments
//!
//! Segments accumulate as turns complete (or as the host prepares to drop
//! messages) and are consumed only by a successful observer run. Appends may
//! interleave with an in-flight run, so consumption is by the exact ids that
//! were in the snapshot that was sent, never a blanket clear.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Separator between segment texts in a snapshot transcript
const SEGMENT_DELIMITER: &str = "\n\n---\n\n";

/// One unobserved unit of transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSegment {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub tokens: usize,
}

/// A snapshot handed to the observer: the concatenated transcript plus the
/// ids it covers, so exactly those segments can be cleared on success.
#[derive(Debug, Clone)]
pub struct PendingSnapshot {
    pub transcript: String,
    pub segment_ids: Vec<String>,
    pub tokens: usize,
}

/// Ordered queue of unobserved segments with a running token total.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingBuffer {
    segments: Vec<PendingSegment>,
    total_tokens: usize,
    next_id: u64,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one segment, returning its id.
    pub fn append(&mut self, text: impl Into<String>, tokens: usize) -> String {
        let id = format!("seg-{}", self.next_id);
        self.next_id += 1;
        self.segments.push(PendingSegment {
            id: id.clone(),
            created_at: Utc::now(),
            text: text.into(),
            tokens,
        });
        self.recompute_total();
        id
    }

    /// Snapshot the current queue for an observer run.
    pub fn snapshot(&self) -> PendingSnapshot {
        let transcript = self
            .segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(SEGMENT_DELIMITER);
        PendingSnapshot {
            transcript,
            segment_ids: self.segments.iter().map(|s| s.id.clone()).collect(),
            tokens: self.total_tokens,
        }
    }

    /// Remove exactly the segments named by `ids`. Segments appended after
    /// the snapshot was taken survive untouched.
    pub fn clear_consumed(&mut self, ids: &[String]) {
        self.segments.retain(|s| !ids.contains(&s.id));
        self.recompute_total();
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.segments.clear();
        self.recompute_total();
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Recomputed from the segments, never drifted incrementally.
    fn recompute_total(&mut self) {
        self.total_tokens = self.segments.iter().map(|s| s.tokens).sum();
    }
}
