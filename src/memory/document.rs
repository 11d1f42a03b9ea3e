//! The memory document
//!
//! One evolving document per scope: a newline-delimited observation log in
//! recency order plus two short last-write-wins fields. Observer runs append
//! (merge), reflector runs replace, nothing else touches the log.

use crate::tokens::estimate_tokens;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum retained reflection-history entries
const REFLECTION_HISTORY_CAP: usize = 15;

/// Preview length for reflection-history entries
const REFLECTION_PREVIEW_CHARS: usize = 120;

/// One entry of the reflection diagnostic ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionEntry {
    pub timestamp: DateTime<Utc>,
    pub before_tokens: usize,
    pub after_tokens: usize,
    pub preview: String,
}

/// The per-scope memory document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryDocument {
    /// Newline-delimited observation lines, oldest first
    pub observations: String,

    /// Current task, last write wins
    pub current_task: Option<String>,

    /// Suggested response, last write wins
    pub suggested_response: Option<String>,

    /// Cached token estimate, recomputed on every mutation
    pub observation_tokens: usize,

    /// Completed observer runs
    pub observation_runs: u64,

    /// Completed reflector runs
    pub reflection_runs: u64,

    /// When the last observer run committed
    pub last_observed_at: Option<DateTime<Utc>>,

    /// Input tokens / output tokens of the last observer run
    pub last_compression_ratio: Option<f64>,

    /// Bounded diagnostics of past reflections
    #[serde(default)]
    pub reflection_history: Vec<ReflectionEntry>,
}

impl MemoryDocument {
    /// Observation lines in order, trimmed and non-empty.
    pub fn lines(&self) -> Vec<&str> {
        self.observations
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect()
    }

    pub fn line_count(&self) -> usize {
        self.lines().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines().is_empty()
    }

    /// Merge new observation text into the log.
    ///
    /// Existing lines come first, new lines after; only the last `max_items`
    /// survive, so the oldest lines are dropped on overflow. Merging empty
    /// text is a no-op.
    pub fn merge_observations(&mut self, new_text: &str, max_items: usize, model_hint: Option<&str>) {
        let incoming: Vec<&str> = new_text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if incoming.is_empty() {
            return;
        }

        let mut merged: Vec<String> = self.lines().iter().map(|l| l.to_string()).collect();
        merged.extend(incoming.iter().map(|l| l.to_string()));

        if max_items > 0 && merged.len() > max_items {
            merged.drain(..merged.len() - max_items);
        }

        self.observations = merged.join("\n");
        self.recompute_tokens(model_hint);
    }

    /// Replace the entire log. Anything not in `new_text` is gone.
    pub fn replace_observations(&mut self, new_text: &str, model_hint: Option<&str>) {
        let lines: Vec<&str> = new_text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        self.observations = lines.join("\n");
        self.recompute_tokens(model_hint);
    }

    /// Apply optional task/response updates from a parsed run.
    pub fn apply_updates(&mut self, current_task: Option<String>, suggested_response: Option<String>) {
        if current_task.is_some() {
            self.current_task = current_task;
        }
        if suggested_response.is_some() {
            self.suggested_response = suggested_response;
        }
    }

    /// Push a reflection-history entry, keeping the buffer bounded.
    pub fn record_reflection(&mut self, before_tokens: usize, after_tokens: usize) {
        let preview: String = self
            .observations
            .chars()
            .take(REFLECTION_PREVIEW_CHARS)
            .collect();
        self.reflection_history.push(ReflectionEntry {
            timestamp: Utc::now(),
            before_tokens,
            after_tokens,
            preview,
        });
        if self.reflection_history.len() > REFLECTION_HISTORY_CAP {
            let excess = self.reflection_history.len() - REFLECTION_HISTORY_CAP;
            self.reflection_history.drain(..excess);
        }
    }

    /// Recompute the cached token estimate.
    pub fn recompute_tokens(&mut self, model_hint: Option<&str>) {
        self.observation_tokens = estimate_tokens(&self.observations, model_hint);
    }

    /// Reset to the empty document.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_merge_appends_in_order() {
        let mut doc = MemoryDocument::default();
        doc.merge_observations("A\nB", 10, None);
        doc.merge_observations("C", 10, None);
        assert_eq!(doc.lines(), vec!["A", "B", "C"]);
        assert!(doc.observation_tokens > 0);
    }

    #[test]
    fn test_merge_cap_drops_oldest() {
        let mut doc = MemoryDocument::default();
        doc.merge_observations("A\nB\nC", 3, None);
        doc.merge_observations("D", 3, None);
        assert_eq!(doc.lines(), vec!["B", "C", "D"]);
    }

    #[test]
    fn test_merge_empty_is_noop() {
        let mut doc = MemoryDocument::default();
        doc.merge_observations("A", 10, None);
        let before = doc.clone();
        doc.merge_observations("", 10, None);
        doc.merge_observations("   \n  \n", 10, None);
        assert_eq!(doc.observations, before.observations);
        assert_eq!(doc.observation_tokens, before.observation_tokens);
    }

    #[test]
    fn test_replace_is_destructive() {
        let mut doc = MemoryDocument::default();
        doc.merge_observations("A\nB\nC", 10, None);
        doc.replace_observations("X\nY", None);
        assert_eq!(doc.lines(), vec!["X", "Y"]);
    }

    #[test]
    fn test_updates_are_last_write_wins() {
        let mut doc = MemoryDocument::default();
        doc.apply_updates(Some("task one".into()), None);
        doc.apply_updates(Some("task two".into()), Some("reply".into()));
        doc.apply_updates(None, None);
        assert_eq!(doc.current_task.as_deref(), Some("task two"));
        assert_eq!(doc.suggested_response.as_deref(), Some("reply"));
    }

    #[test]
    fn test_reflection_history_is_bounded() {
        let mut doc = MemoryDocument::default();
        for i in 0..20 {
            doc.record_reflection(i * 100, i * 50);
        }
        assert_eq!(doc.reflection_history.len(), 15);
        // Oldest entries were dropped
        assert_eq!(doc.reflection_history[0].before_tokens, 500);
    }
}
