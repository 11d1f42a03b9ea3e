//! Scoped persistence for memory documents
//!
//! One JSON file per scope under the state directory. Saves are best-effort:
//! a failed write is logged and swallowed, and the in-memory document stays
//! authoritative for the rest of the process lifetime.

use super::document::MemoryDocument;
use crate::Result;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Manages per-scope memory document files.
///
/// Directory layout:
///   {state_dir}/{scope}.json
pub struct MemoryStore {
    state_dir: PathBuf,
}

impl MemoryStore {
    /// Create a store rooted at `state_dir`, creating it if needed.
    pub async fn new(state_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir).await?;
        Ok(Self {
            state_dir: state_dir.to_path_buf(),
        })
    }

    /// Persist a document for a scope. Never propagates failure.
    pub async fn save(&self, scope: &str, doc: &MemoryDocument) {
        let path = self.scope_path(scope);
        match self.write_document(&path, doc).await {
            Ok(()) => debug!("Persisted memory for scope {}", scope),
            Err(e) => warn!("Failed to persist memory for scope {}: {}", scope, e),
        }
    }

    async fn write_document(&self, path: &Path, doc: &MemoryDocument) -> Result<()> {
        let content = serde_json::to_string_pretty(doc)?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Load a previously saved document. Returns `None` when the file is
    /// missing or unparseable; a corrupt file never blocks session load.
    pub async fn load(&self, scope: &str) -> Option<MemoryDocument> {
        let path = self.scope_path(scope);
        let content = fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str::<MemoryDocument>(&content) {
            Ok(doc) => {
                info!("Restored memory for scope {}", scope);
                Some(doc)
            }
            Err(e) => {
                warn!("Unparseable memory file for scope {}: {}", scope, e);
                None
            }
        }
    }

    /// Remove the persisted document for a scope (explicit reset).
    pub async fn delete(&self, scope: &str) {
        let path = self.scope_path(scope);
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to delete memory for scope {}: {}", scope, e);
            }
        }
    }

    /// List all scopes with a persisted document.
    pub async fn list_scopes(&self) -> Result<Vec<String>> {
        let mut scopes = Vec::new();
        let mut entries = fs::read_dir(&self.state_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(scope) = name.strip_suffix(".json") {
                    scopes.push(scope.to_string());
                }
            }
        }
        scopes.sort();
        Ok(scopes)
    }

    fn scope_path(&self, scope: &str) -> PathBuf {
        // Sanitize scope for use as a filename
        let safe: String = scope
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.state_dir.join(format!("{}.json", safe))
    }
}
