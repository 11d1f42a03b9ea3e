//! Command-line summarization channel
//!
//! Runs a local agent CLI (e.g. `claude -p`) with the prompt on stdin and
//! takes stdout as the summary. Availability is a PATH probe for the binary,
//! done once and cached for the process lifetime.

use crate::{EngramError, Result};
use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Hard cap on a single CLI invocation
const CLI_TIMEOUT: Duration = Duration::from_secs(300);

pub struct CliChannel {
    /// Program plus fixed arguments, e.g. ["claude", "-p"]
    command: Vec<String>,
    availability: OnceLock<bool>,
}

impl CliChannel {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            availability: OnceLock::new(),
        }
    }

    /// Whether the configured binary exists on PATH. Probed once.
    pub fn available(&self) -> bool {
        *self.availability.get_or_init(|| {
            let Some(program) = self.command.first() else {
                return false;
            };
            let found = binary_on_path(program);
            debug!("CLI channel probe: '{}' on PATH = {}", program, found);
            found
        })
    }

    /// Run the command with the prompt on stdin and collect stdout.
    pub async fn summarize(&self, prompt: &str) -> Result<String> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| EngramError::SummarizerCall("empty CLI command".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngramError::SummarizerCall(format!("spawn {}: {}", program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| EngramError::SummarizerCall(format!("write stdin: {}", e)))?;
            drop(stdin);
        }

        let output = tokio::time::timeout(CLI_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| {
                EngramError::SummarizerCall(format!(
                    "'{}' timed out after {}s",
                    program,
                    CLI_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| EngramError::SummarizerCall(format!("wait {}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail: String = stderr.trim().chars().take(300).collect();
            return Err(EngramError::SummarizerCall(format!(
                "'{}' exited with {}: {}",
                program, output.status, detail
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Look the program up on PATH without spawning it. Absolute and relative
/// paths are checked directly.
fn binary_on_path(program: &str) -> bool {
    if program.contains(std::path::MAIN_SEPARATOR) {
        return Path::new(program).is_file();
    }
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| dir.join(program).is_file())
}
