//! Engine configuration
//!
//! The host exposes a single JSON object; keys are camelCase to match it.
//! Every field carries its own default so an unknown or missing key never
//! blocks startup, and a file that fails to parse at all falls back to the
//! full default set rather than partially applying.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// How observations are injected into the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InjectionMode {
    /// Inject every observation line verbatim
    #[default]
    All,
    /// Inject a recency-bounded core plus a query-ranked relevant subset
    CoreRelevant,
}

/// Configuration for the memory engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngramConfig {
    /// Token budget for live recent messages kept alongside injected memory
    pub recent_turn_budget_tokens: usize,

    /// Cap on retained observation lines after a merge
    pub max_observation_items: usize,

    /// Character cap on the transcript sent to the observer
    pub max_observer_transcript_chars: usize,

    /// Character cap on the observations sent to the reflector
    pub max_reflector_observations_chars: usize,

    /// Whether a manual full-observe also asks the host to compact
    pub force_observe_auto_compact: bool,

    /// Injection mode: `all` or `core_relevant`
    pub memory_injection_mode: InjectionMode,

    /// Token budget for the always-included core subset
    pub core_memory_max_tokens: usize,

    /// Item cap for the query-ranked relevant subset
    pub relevant_observation_max_items: usize,

    /// Token budget for the query-ranked relevant subset
    pub relevant_observation_max_tokens: usize,

    /// Master switch for the reflector
    pub enable_reflection: bool,

    /// Reflect after every N successful observer runs (0 disables)
    pub reflect_every_n_observations: u64,

    /// Reflect when the observation log exceeds this many tokens (0 disables)
    pub reflect_when_observation_tokens_over: usize,

    /// Run an aggressive reflection before the host compacts
    pub reflect_before_compaction: bool,

    /// Pending-token threshold that auto-triggers an observer run (0 disables)
    pub auto_observe_pending_token_threshold: usize,

    /// Model identifier used for token estimation
    pub model_hint: Option<String>,

    /// Command-line summarization channel, e.g. ["claude", "-p"].
    /// Empty disables the CLI channel.
    pub observer_cli_command: Vec<String>,

    /// Base URL for the hosted-model channel
    pub api_base_url: String,

    /// Model for the hosted-model channel
    pub api_model: String,

    /// Environment variable holding the API key for the hosted channel
    pub api_key_env: String,
}

impl Default for EngramConfig {
    fn default() -> Self {
        Self {
            recent_turn_budget_tokens: 20_000,
            max_observation_items: 200,
            max_observer_transcript_chars: 60_000,
            max_reflector_observations_chars: 60_000,
            force_observe_auto_compact: false,
            memory_injection_mode: InjectionMode::All,
            core_memory_max_tokens: 1_500,
            relevant_observation_max_items: 20,
            relevant_observation_max_tokens: 1_500,
            enable_reflection: true,
            reflect_every_n_observations: 5,
            reflect_when_observation_tokens_over: 6_000,
            reflect_before_compaction: true,
            auto_observe_pending_token_threshold: 8_000,
            model_hint: None,
            observer_cli_command: Vec::new(),
            api_base_url: "https://api.openai.com/v1".to_string(),
            api_model: "gpt-4.1-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

impl EngramConfig {
    /// Load configuration from a JSON file.
    ///
    /// A missing file is normal (defaults). A file that is not valid JSON
    /// falls back to defaults entirely; within a valid JSON object each
    /// recognized key is applied on its own, so one bad value only loses
    /// that key.
    pub async fn load(path: &Path) -> Self {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(_) => {
                info!("No config file at {:?}, using defaults", path);
                return Self::default();
            }
        };

        match serde_json::from_str::<serde_json::Value>(&content) {
            Ok(serde_json::Value::Object(map)) => Self::from_map(&map),
            Ok(_) => {
                warn!("Config at {:?} is not a JSON object, using defaults", path);
                Self::default()
            }
            Err(e) => {
                warn!("Malformed config at {:?} ({}), using defaults", path, e);
                Self::default()
            }
        }
    }

    /// Apply recognized keys one at a time over the defaults.
    fn from_map(map: &serde_json::Map<String, serde_json::Value>) -> Self {
        let mut config = Self::default();
        set_field(map, "recentTurnBudgetTokens", &mut config.recent_turn_budget_tokens);
        set_field(map, "maxObservationItems", &mut config.max_observation_items);
        set_field(map, "maxObserverTranscriptChars", &mut config.max_observer_transcript_chars);
        set_field(
            map,
            "maxReflectorObservationsChars",
            &mut config.max_reflector_observations_chars,
        );
        set_field(map, "forceObserveAutoCompact", &mut config.force_observe_auto_compact);
        set_field(map, "memoryInjectionMode", &mut config.memory_injection_mode);
        set_field(map, "coreMemoryMaxTokens", &mut config.core_memory_max_tokens);
        set_field(map, "relevantObservationMaxItems", &mut config.relevant_observation_max_items);
        set_field(
            map,
            "relevantObservationMaxTokens",
            &mut config.relevant_observation_max_tokens,
        );
        set_field(map, "enableReflection", &mut config.enable_reflection);
        set_field(map, "reflectEveryNObservations", &mut config.reflect_every_n_observations);
        set_field(
            map,
            "reflectWhenObservationTokensOver",
            &mut config.reflect_when_observation_tokens_over,
        );
        set_field(map, "reflectBeforeCompaction", &mut config.reflect_before_compaction);
        set_field(
            map,
            "autoObservePendingTokenThreshold",
            &mut config.auto_observe_pending_token_threshold,
        );
        set_field(map, "modelHint", &mut config.model_hint);
        set_field(map, "observerCliCommand", &mut config.observer_cli_command);
        set_field(map, "apiBaseUrl", &mut config.api_base_url);
        set_field(map, "apiModel", &mut config.api_model);
        set_field(map, "apiKeyEnv", &mut config.api_key_env);
        config
    }

    /// Render the active configuration as pretty JSON for the show command.
    pub fn render(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Overwrite `slot` from a map entry when present and well-typed; a bad
/// value is logged and the field keeps its default.
fn set_field<T: serde::de::DeserializeOwned>(
    map: &serde_json::Map<String, serde_json::Value>,
    key: &str,
    slot: &mut T,
) {
    let Some(value) = map.get(key) else {
        return;
    };
    match serde_json::from_value::<T>(value.clone()) {
        Ok(parsed) => *slot = parsed,
        Err(e) => warn!("Invalid value for config key '{}' ({}), keeping default", key, e),
    }
}
