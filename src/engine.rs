//! Memory lifecycle engine
//!
//! Owns the per-scope state and reacts to host events: turns completing,
//! prompts being built, compaction about to run, sessions loading. External
//! summarization calls are the only suspension points; single-flight per
//! mutation kind is enforced with an atomic flag per scope, cleared by an
//! RAII guard so it survives early returns. State locks are held only for
//! synchronous mutation, never across an external call.

use crate::config::EngramConfig;
use crate::memory::{MemoryDocument, MemoryStore, PendingBuffer};
use crate::observer;
use crate::parser;
use crate::protocol::{ChatMessage, CompactionDirective, MemoryStatus, Role};
use crate::reflector::{self, Aggressiveness};
use crate::retrieval;
use crate::summarizer::Summarizer;
use crate::tokens::estimate_tokens;
use crate::{EngramError, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Mutable memory state for one scope.
#[derive(Default)]
struct ScopeState {
    doc: MemoryDocument,
    pending: PendingBuffer,
}

/// Per-scope handle: state plus the two single-flight flags.
struct ScopeHandle {
    state: Mutex<ScopeState>,
    observing: AtomicBool,
    reflecting: AtomicBool,
}

impl ScopeHandle {
    fn new(doc: MemoryDocument) -> Self {
        Self {
            state: Mutex::new(ScopeState {
                doc,
                pending: PendingBuffer::new(),
            }),
            observing: AtomicBool::new(false),
            reflecting: AtomicBool::new(false),
        }
    }

    fn run_in_flight(&self) -> bool {
        self.observing.load(Ordering::Acquire) || self.reflecting.load(Ordering::Acquire)
    }
}

/// Clears its flag on drop, so a failed run never wedges the scope.
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// The memory lifecycle engine.
pub struct MemoryEngine {
    config: RwLock<EngramConfig>,
    config_path: Option<PathBuf>,
    store: MemoryStore,
    summarizer: RwLock<Arc<Summarizer>>,
    scopes: Mutex<HashMap<String, Arc<ScopeHandle>>>,
}

impl MemoryEngine {
    /// Create an engine over a state directory. Scope documents live in a
    /// `scopes/` subdirectory so they never collide with the config file.
    pub async fn new(config: EngramConfig, state_dir: PathBuf) -> Result<Self> {
        let store = MemoryStore::new(&state_dir.join("scopes")).await?;
        let summarizer = Arc::new(Summarizer::from_config(&config));
        Ok(Self {
            config: RwLock::new(config),
            config_path: None,
            store,
            summarizer: RwLock::new(summarizer),
            scopes: Mutex::new(HashMap::new()),
        })
    }

    /// Remember where the config came from so `reload_config` can re-read it.
    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    pub async fn config(&self) -> EngramConfig {
        self.config.read().await.clone()
    }

    /// Re-read configuration from disk and rebuild the summarization
    /// channels. A missing or malformed file falls back to defaults.
    pub async fn reload_config(&self) {
        let Some(path) = &self.config_path else {
            debug!("No config path registered, nothing to reload");
            return;
        };
        let fresh = EngramConfig::load(path).await;
        *self.summarizer.write().await = Arc::new(Summarizer::from_config(&fresh));
        *self.config.write().await = fresh;
        info!("Configuration reloaded from {:?}", path);
    }

    /// Get or create the handle for a scope, restoring persisted state on
    /// first access.
    async fn scope(&self, scope: &str) -> Arc<ScopeHandle> {
        let mut scopes = self.scopes.lock().await;
        if let Some(handle) = scopes.get(scope) {
            return Arc::clone(handle);
        }
        let doc = self.store.load(scope).await.unwrap_or_default();
        let handle = Arc::new(ScopeHandle::new(doc));
        scopes.insert(scope.to_string(), Arc::clone(&handle));
        handle
    }

    // ─── Host hooks ─────────────────────────────────────────────────

    /// A turn finished: buffer its messages and auto-trigger an observer run
    /// when the pending total crosses the configured threshold.
    pub async fn on_turn_completed(&self, scope: &str, messages: &[ChatMessage]) {
        let config = self.config().await;
        let hint = config.model_hint.clone();
        let text = render_transcript(messages);
        if text.trim().is_empty() {
            return;
        }
        let tokens = estimate_tokens(&text, hint.as_deref());

        let handle = self.scope(scope).await;
        let should_trigger = {
            let mut state = handle.state.lock().await;
            state.pending.append(text, tokens);
            let threshold = config.auto_observe_pending_token_threshold;
            threshold > 0
                && state.pending.total_tokens() >= threshold
                && !handle.observing.load(Ordering::Acquire)
        };

        if should_trigger {
            debug!("Pending token threshold crossed for scope {}, observing", scope);
            if let Err(e) = self.observe(scope, None).await {
                warn!("Auto-triggered observation failed: {}", e);
            }
        }
    }

    /// The host is about to drop messages: fold them into memory and hand
    /// back the replacement summary.
    pub async fn on_pre_compaction(
        &self,
        scope: &str,
        dropped: &[ChatMessage],
        keep_from_id: Option<String>,
        deadline: Option<Duration>,
    ) -> CompactionDirective {
        let config = self.config().await;
        let text = render_transcript(dropped);
        if !text.trim().is_empty() {
            let tokens = estimate_tokens(&text, config.model_hint.as_deref());
            let handle = self.scope(scope).await;
            handle.state.lock().await.pending.append(text, tokens);
        }

        // Observe first so the dropped turns are committed before anything
        // destructive happens; failures leave the segments pending
        if let Err(e) = self.observe(scope, deadline).await {
            warn!("Pre-compaction observation skipped: {}", e);
        }
        if config.enable_reflection && config.reflect_before_compaction {
            if let Err(e) = self
                .reflect_inner(scope, Aggressiveness::Aggressive, deadline)
                .await
            {
                warn!("Pre-compaction reflection skipped: {}", e);
            }
        }

        CompactionDirective {
            summary: self.render_memory(scope).await,
            keep_from_id,
        }
    }

    /// A prompt is being built: trim the live tail to budget and prepend the
    /// injected memory payload.
    pub async fn on_prompt_build(&self, scope: &str, messages: &[ChatMessage]) -> Vec<ChatMessage> {
        let config = self.config().await;
        let hint = config.model_hint.as_deref().map(str::to_owned);
        let start = retrieval::recent_tail_start(
            messages,
            config.recent_turn_budget_tokens,
            hint.as_deref(),
        );
        let tail = &messages[start..];

        let handle = self.scope(scope).await;
        let payload = {
            let state = handle.state.lock().await;
            retrieval::render_payload(&state.doc, &config, tail, Utc::now().date_naive())
        };

        let mut result = Vec::with_capacity(tail.len() + 2);
        if let Some(payload) = payload {
            result.push(ChatMessage::new(Role::System, payload));
            // The tail no longer starts at a user message: tell the consumer
            // this is a continuation, not a fresh conversation
            if tail.first().is_some_and(|m| m.role != Role::User) {
                result.push(ChatMessage::new(Role::System, retrieval::CONTINUATION_NOTICE));
            }
        }
        result.extend(tail.iter().cloned());
        result
    }

    /// Session (re)load: discard any cached handle and restore from the
    /// durable store.
    ///
    /// Skipped while a run is in flight for the scope: the run would finish
    /// against the orphaned handle and save over the restored document.
    pub async fn on_session_load(&self, scope: &str) {
        let doc = self.store.load(scope).await.unwrap_or_default();
        let mut scopes = self.scopes.lock().await;
        if scopes.get(scope).is_some_and(|h| h.run_in_flight()) {
            warn!("Skipping session reload for scope {}: a run is in flight", scope);
            return;
        }
        scopes.insert(scope.to_string(), Arc::new(ScopeHandle::new(doc)));
    }

    /// Session fork: copy the current document into a new scope.
    pub async fn fork_scope(&self, from: &str, to: &str) {
        let source = self.scope(from).await;
        let doc = source.state.lock().await.doc.clone();
        self.store.save(to, &doc).await;
        let mut scopes = self.scopes.lock().await;
        if scopes.get(to).is_some_and(|h| h.run_in_flight()) {
            warn!("Not replacing scope {}: a run is in flight", to);
            return;
        }
        scopes.insert(to.to_string(), Arc::new(ScopeHandle::new(doc)));
        info!("Forked memory scope {} -> {}", from, to);
    }

    // ─── Observer / reflector runs ──────────────────────────────────

    /// Run one observation pass over the pending buffer.
    ///
    /// Single-flight per scope: a second call while one is in flight returns
    /// `AlreadyRunning` without touching anything.
    pub async fn observe(&self, scope: &str, deadline: Option<Duration>) -> Result<()> {
        let config = self.config().await;
        let handle = self.scope(scope).await;
        let _guard = RunGuard::acquire(&handle.observing)
            .ok_or(EngramError::AlreadyRunning("observer"))?;

        let (snapshot, prior) = {
            let state = handle.state.lock().await;
            (state.pending.snapshot(), state.doc.observations.clone())
        };
        if snapshot.segment_ids.is_empty() {
            return Err(EngramError::NothingToDo("no pending segments"));
        }

        let prompt = observer::build_observer_prompt(
            &prior,
            &snapshot.transcript,
            config.max_observer_transcript_chars,
        );
        let summarizer = Arc::clone(&*self.summarizer.read().await);
        let raw = summarizer.summarize(&prompt, deadline).await?;

        let parsed = parser::parse_sections(&raw).ok_or(EngramError::ParseFailure)?;
        let hint = config.model_hint.as_deref();
        let output_tokens = estimate_tokens(&parsed.observations, hint).max(1);

        let (doc_copy, run_count) = {
            let mut state = handle.state.lock().await;
            state
                .doc
                .merge_observations(&parsed.observations, config.max_observation_items, hint);
            state
                .doc
                .apply_updates(parsed.current_task, parsed.suggested_response);
            state.doc.observation_runs += 1;
            state.doc.last_observed_at = Some(Utc::now());
            state.doc.last_compression_ratio =
                Some(snapshot.tokens.max(1) as f64 / output_tokens as f64);
            // Only the segments that were in the snapshot are consumed;
            // anything appended mid-run stays for the next cycle
            state.pending.clear_consumed(&snapshot.segment_ids);
            (state.doc.clone(), state.doc.observation_runs)
        };
        self.store.save(scope, &doc_copy).await;

        info!(
            "Observation run {} committed for scope {}: {} lines, ~{} tokens",
            run_count,
            scope,
            doc_copy.line_count(),
            doc_copy.observation_tokens
        );

        if periodic_reflection_due(&config, &doc_copy) {
            if let Err(e) = self
                .reflect_inner(scope, Aggressiveness::Moderate, deadline)
                .await
            {
                warn!("Periodic reflection failed: {}", e);
            }
        }
        Ok(())
    }

    /// Manual reflection: observe any pending segments first so they are not
    /// orphaned behind a destructive rewrite, then recompress the log.
    pub async fn reflect(
        &self,
        scope: &str,
        aggressiveness: Aggressiveness,
        deadline: Option<Duration>,
    ) -> Result<()> {
        let handle = self.scope(scope).await;
        let has_pending = !handle.state.lock().await.pending.is_empty();
        if has_pending {
            if let Err(e) = self.observe(scope, deadline).await {
                warn!("Observe-before-reflect failed, reflecting committed state: {}", e);
            }
        }
        self.reflect_inner(scope, aggressiveness, deadline).await
    }

    async fn reflect_inner(
        &self,
        scope: &str,
        aggressiveness: Aggressiveness,
        deadline: Option<Duration>,
    ) -> Result<()> {
        let config = self.config().await;
        let handle = self.scope(scope).await;
        let _guard = RunGuard::acquire(&handle.reflecting)
            .ok_or(EngramError::AlreadyRunning("reflector"))?;

        let observations = handle.state.lock().await.doc.observations.clone();
        if observations.trim().is_empty() {
            return Err(EngramError::NothingToDo("no observations to reflect"));
        }

        let prompt = reflector::build_reflector_prompt(
            &observations,
            aggressiveness,
            config.max_reflector_observations_chars,
        );
        let summarizer = Arc::clone(&*self.summarizer.read().await);
        let raw = summarizer.summarize(&prompt, deadline).await?;
        let parsed = parser::parse_sections(&raw).ok_or(EngramError::ParseFailure)?;

        let hint = config.model_hint.as_deref();
        let doc_copy = {
            let mut state = handle.state.lock().await;
            let before_tokens = state.doc.observation_tokens;
            state.doc.replace_observations(&parsed.observations, hint);
            state
                .doc
                .apply_updates(parsed.current_task, parsed.suggested_response);
            state.doc.reflection_runs += 1;
            let after_tokens = state.doc.observation_tokens;
            state.doc.record_reflection(before_tokens, after_tokens);
            info!(
                "Reflection committed for scope {}: ~{} -> ~{} tokens",
                scope, before_tokens, after_tokens
            );
            state.doc.clone()
        };
        self.store.save(scope, &doc_copy).await;
        Ok(())
    }

    // ─── Command surface ────────────────────────────────────────────

    /// Manual observation command. Returns whether the host should follow up
    /// with its own compaction pass.
    pub async fn observe_now(&self, scope: &str) -> Result<bool> {
        self.observe(scope, None).await?;
        Ok(self.config().await.force_observe_auto_compact)
    }

    /// Current memory rendered as the injection payload, without a query.
    pub async fn render_memory(&self, scope: &str) -> Option<String> {
        let config = self.config().await;
        let handle = self.scope(scope).await;
        let state = handle.state.lock().await;
        retrieval::render_payload(&state.doc, &config, &[], Utc::now().date_naive())
    }

    /// Status snapshot for one scope.
    pub async fn status(&self, scope: &str) -> MemoryStatus {
        let handle = self.scope(scope).await;
        let state = handle.state.lock().await;
        MemoryStatus {
            scope: scope.to_string(),
            observation_lines: state.doc.line_count(),
            observation_tokens: state.doc.observation_tokens,
            observation_runs: state.doc.observation_runs,
            reflection_runs: state.doc.reflection_runs,
            pending_segments: state.pending.len(),
            pending_tokens: state.pending.total_tokens(),
            last_observed_at: state.doc.last_observed_at,
            last_compression_ratio: state.doc.last_compression_ratio,
            is_observing: handle.observing.load(Ordering::Acquire),
            is_reflecting: handle.reflecting.load(Ordering::Acquire),
        }
    }

    /// Reset one scope: in-memory state and the persisted document.
    pub async fn reset(&self, scope: &str) {
        let handle = self.scope(scope).await;
        {
            let mut state = handle.state.lock().await;
            state.doc.clear();
            state.pending.clear();
        }
        self.store.delete(scope).await;
        info!("Memory reset for scope {}", scope);
    }

    /// All scopes with persisted state.
    pub async fn list_scopes(&self) -> Result<Vec<String>> {
        self.store.list_scopes().await
    }
}

/// Whether the committed document has earned an automatic reflection pass.
fn periodic_reflection_due(config: &EngramConfig, doc: &MemoryDocument) -> bool {
    if !config.enable_reflection {
        return false;
    }
    let by_count = config.reflect_every_n_observations > 0
        && doc.observation_runs % config.reflect_every_n_observations == 0;
    let by_tokens = config.reflect_when_observation_tokens_over > 0
        && doc.observation_tokens >= config.reflect_when_observation_tokens_over;
    by_count || by_tokens
}

/// Flatten a batch of messages into transcript text.
fn render_transcript(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => "system",
                Role::Tool => "tool",
            };
            format!("[{}] {}", role, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_guard_single_flight() {
        let flag = AtomicBool::new(false);
        let guard = RunGuard::acquire(&flag).unwrap();
        assert!(RunGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(RunGuard::acquire(&flag).is_some());
    }

    #[test]
    fn test_run_guard_clears_on_drop() {
        let flag = AtomicBool::new(false);
        {
            let _guard = RunGuard::acquire(&flag).unwrap();
            assert!(flag.load(Ordering::Acquire));
        }
        assert!(!flag.load(Ordering::Acquire));
    }

    #[test]
    fn test_transcript_rendering() {
        let messages = vec![
            ChatMessage::new(Role::User, "fix the bug"),
            ChatMessage::new(Role::Assistant, "on it"),
        ];
        let text = render_transcript(&messages);
        assert!(text.contains("[user] fix the bug"));
        assert!(text.contains("[assistant] on it"));
    }

    fn doc_with(runs: u64, tokens: usize) -> MemoryDocument {
        let mut doc = MemoryDocument::default();
        doc.observation_runs = runs;
        doc.observation_tokens = tokens;
        doc
    }

    #[test]
    fn test_periodic_reflection_by_run_count() {
        let config = EngramConfig::default();
        assert!(periodic_reflection_due(&config, &doc_with(5, 100)));
        assert!(periodic_reflection_due(&config, &doc_with(10, 100)));
        assert!(!periodic_reflection_due(&config, &doc_with(3, 100)));
    }

    #[test]
    fn test_periodic_reflection_by_token_threshold() {
        let config = EngramConfig::default();
        assert!(periodic_reflection_due(&config, &doc_with(3, 7_000)));
    }

    #[test]
    fn test_periodic_reflection_disabled() {
        let mut config = EngramConfig::default();
        config.enable_reflection = false;
        assert!(!periodic_reflection_due(&config, &doc_with(5, 10_000)));
    }
}
