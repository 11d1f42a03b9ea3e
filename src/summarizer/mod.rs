//! External summarization capability
//!
//! The engine needs exactly one thing from the outside world: send a prompt,
//! get text back, or fail. Two channels provide it, tried in fixed priority
//! order — a local command-line tool first, a hosted-model API as fallback.
//! Per-channel availability is probed once and cached for the process
//! lifetime, and "nothing available" is warned about once per process.

mod api;
mod cli;

pub use api::ApiChannel;
pub use cli::CliChannel;

use crate::config::EngramConfig;
use crate::{EngramError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// One way of turning a prompt into text.
pub enum Channel {
    Cli(CliChannel),
    Api(ApiChannel),
}

impl Channel {
    fn name(&self) -> &'static str {
        match self {
            Channel::Cli(_) => "cli",
            Channel::Api(_) => "api",
        }
    }

    fn available(&self) -> bool {
        match self {
            Channel::Cli(c) => c.available(),
            Channel::Api(c) => c.available(),
        }
    }

    async fn summarize(&self, prompt: &str) -> Result<String> {
        match self {
            Channel::Cli(c) => c.summarize(prompt).await,
            Channel::Api(c) => c.summarize(prompt).await,
        }
    }
}

/// Ordered list of summarization channels with fallback.
pub struct Summarizer {
    channels: Vec<Channel>,
    warned_unavailable: AtomicBool,
}

impl Summarizer {
    /// Build the default channel order from configuration: CLI first when a
    /// command is configured, hosted API second.
    pub fn from_config(config: &EngramConfig) -> Self {
        let mut channels = Vec::new();
        if !config.observer_cli_command.is_empty() {
            channels.push(Channel::Cli(CliChannel::new(
                config.observer_cli_command.clone(),
            )));
        }
        channels.push(Channel::Api(ApiChannel::new(
            config.api_base_url.clone(),
            config.api_model.clone(),
            config.api_key_env.clone(),
        )));
        Self::new(channels)
    }

    pub fn new(channels: Vec<Channel>) -> Self {
        Self {
            channels,
            warned_unavailable: AtomicBool::new(false),
        }
    }

    /// Whether any channel can take a call right now.
    pub fn any_available(&self) -> bool {
        self.channels.iter().any(|c| c.available())
    }

    /// Send `prompt` through the channels in order, returning the first
    /// non-empty successful result. A per-call deadline bounds the whole
    /// attempt; hitting it counts as a call failure for that channel.
    pub async fn summarize(&self, prompt: &str, deadline: Option<Duration>) -> Result<String> {
        let mut tried_any = false;

        for channel in &self.channels {
            if !channel.available() {
                debug!("Summarization channel '{}' unavailable, skipping", channel.name());
                continue;
            }
            tried_any = true;

            let attempt = match deadline {
                Some(limit) => match tokio::time::timeout(limit, channel.summarize(prompt)).await {
                    Ok(result) => result,
                    Err(_) => Err(EngramError::SummarizerCall(format!(
                        "channel '{}' hit the {}s deadline",
                        channel.name(),
                        limit.as_secs()
                    ))),
                },
                None => channel.summarize(prompt).await,
            };

            match attempt {
                Ok(text) if !text.trim().is_empty() => return Ok(text),
                Ok(_) => {
                    warn!("Summarization channel '{}' returned empty output", channel.name());
                }
                Err(e) => {
                    warn!(
                        "Summarization channel '{}' failed: {}, falling through",
                        channel.name(),
                        e
                    );
                }
            }
        }

        if !tried_any {
            self.warn_unavailable_once();
        }
        Err(EngramError::SummarizerUnavailable)
    }

    fn warn_unavailable_once(&self) {
        if !self.warned_unavailable.swap(true, Ordering::Relaxed) {
            warn!(
                "No summarization channel available; memory will not be \
                 updated until a CLI tool or API key is configured"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_channels_is_unavailable() {
        let summarizer = Summarizer::new(Vec::new());
        assert!(!summarizer.any_available());
        let result = summarizer.summarize("prompt", None).await;
        assert!(matches!(result, Err(EngramError::SummarizerUnavailable)));
    }

    #[tokio::test]
    async fn test_unavailable_channels_are_skipped() {
        // A CLI channel whose binary does not exist, and an API channel whose
        // key env var is unset: both unavailable, no call attempted.
        let summarizer = Summarizer::new(vec![
            Channel::Cli(CliChannel::new(vec![
                "definitely-not-a-real-binary-640f".to_string(),
            ])),
            Channel::Api(ApiChannel::new(
                "http://localhost:9".to_string(),
                "m".to_string(),
                "ENGRAM_TEST_UNSET_KEY_640F".to_string(),
            )),
        ]);
        assert!(!summarizer.any_available());
        let result = summarizer.summarize("prompt", None).await;
        assert!(matches!(result, Err(EngramError::SummarizerUnavailable)));
    }
}
