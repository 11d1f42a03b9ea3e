//! Hosted-model summarization channel
//!
//! Chat Completions over HTTP with streaming collection, retry with
//! exponential backoff and jitter on transient failures. Availability means
//! the configured API-key environment variable is set; that check is cached
//! for the process lifetime.

use crate::{EngramError, Result};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 200;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_COMPLETION_TOKENS: u32 = 4096;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatRequestMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatRequestMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

pub struct ApiChannel {
    client: Client,
    base_url: String,
    model: String,
    api_key_env: String,
    availability: OnceLock<bool>,
}

impl ApiChannel {
    pub fn new(base_url: String, model: String, api_key_env: String) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(Duration::from_secs(15))
            .user_agent(concat!("engram/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url,
            model,
            api_key_env,
            availability: OnceLock::new(),
        }
    }

    /// Whether the API key environment variable is set. Probed once.
    pub fn available(&self) -> bool {
        *self.availability.get_or_init(|| {
            std::env::var(&self.api_key_env)
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false)
        })
    }

    /// Send the prompt as a single user message and collect the streamed
    /// completion, retrying transient failures with backoff.
    pub async fn summarize(&self, prompt: &str) -> Result<String> {
        let mut last_err = None;
        for attempt in 0..MAX_RETRY_ATTEMPTS {
            if attempt > 0 {
                let delay = retry_backoff(attempt);
                warn!(
                    "API summarization failed (attempt {}/{}), retrying in {:?}",
                    attempt, MAX_RETRY_ATTEMPTS, delay
                );
                tokio::time::sleep(delay).await;
            }

            match self.send_once(prompt).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    let msg = e.to_string();
                    if is_retryable(&msg) && attempt + 1 < MAX_RETRY_ATTEMPTS {
                        last_err = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| EngramError::SummarizerCall("all retry attempts exhausted".into())))
    }

    async fn send_once(&self, prompt: &str) -> Result<String> {
        let api_key = std::env::var(&self.api_key_env)
            .map_err(|_| EngramError::SummarizerCall(format!("{} not set", self.api_key_env)))?;

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatRequestMessage {
                role: "user",
                content: prompt.to_string(),
            }],
            max_tokens: MAX_COMPLETION_TOKENS,
            temperature: 0.1,
            stream: true,
        };

        debug!("API summarization call: model={}, prompt {} chars", self.model, prompt.len());

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let response = check_status(response).await?;
        collect_stream(response).await
    }
}

/// Drain a Chat Completions SSE stream into the full text.
async fn collect_stream(response: reqwest::Response) -> Result<String> {
    let mut stream = response.bytes_stream();
    let mut result = String::new();
    let mut line_buffer = String::new();

    while let Some(chunk_result) = stream.next().await {
        let bytes =
            chunk_result.map_err(|e| EngramError::SummarizerCall(format!("stream error: {e}")))?;
        line_buffer.push_str(&String::from_utf8_lossy(&bytes));

        while let Some(newline_pos) = line_buffer.find('\n') {
            let line = line_buffer[..newline_pos].trim().to_string();
            line_buffer = line_buffer[newline_pos + 1..].to_string();

            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            if data == "[DONE]" {
                return Ok(result);
            }
            if let Ok(chunk) = serde_json::from_str::<StreamChunk>(data) {
                if let Some(choice) = chunk.choices.first() {
                    if let Some(content) = &choice.delta.content {
                        result.push_str(content);
                    }
                    if choice.finish_reason.is_some() {
                        return Ok(result);
                    }
                }
            }
        }
    }

    Ok(result)
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = extract_error_detail(&body);
    let prefix = if status.is_server_error() { "retryable " } else { "" };
    if detail.is_empty() {
        Err(EngramError::SummarizerCall(format!("{prefix}API error {status}")))
    } else {
        Err(EngramError::SummarizerCall(format!(
            "{prefix}API error {status}: {detail}"
        )))
    }
}

/// Pull a human-readable message out of an error body when it is JSON.
fn extract_error_detail(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(msg) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return msg.to_string();
        }
        if let Some(msg) = value.get("message").and_then(|m| m.as_str()) {
            return msg.to_string();
        }
    }
    trimmed.chars().take(300).collect()
}

fn map_reqwest_error(e: reqwest::Error) -> EngramError {
    if e.is_timeout() {
        EngramError::SummarizerCall(format!("timeout: {e}"))
    } else if e.is_connect() {
        EngramError::SummarizerCall(format!("network: {e}"))
    } else {
        EngramError::SummarizerCall(e.to_string())
    }
}

fn is_retryable(msg: &str) -> bool {
    msg.contains("timeout")
        || msg.contains("network")
        || msg.contains("retryable")
        || msg.contains("connection")
        || msg.contains("error sending request")
}

/// Exponential backoff with a small deterministic jitter.
fn retry_backoff(attempt: u32) -> Duration {
    let exp = 2u64.saturating_pow(attempt.saturating_sub(1));
    let base_ms = RETRY_BASE_DELAY_MS.saturating_mul(exp);
    let jitter = 1.0 + ((attempt as f64 * 0.37).sin() * 0.1);
    Duration::from_millis((base_ms as f64 * jitter) as u64)
}
