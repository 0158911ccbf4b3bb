//! Durable conversation store — one negotiation record per email thread.
//!
//! The whole store is a single keyed JSON document: loaded at the start of
//! a processing batch, mutated in memory, written back atomically at the
//! end (temp file + rename). A missing or unreadable file initializes to
//! an empty store; partial writes can never be observed.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ConversationState;
use crate::util::atomic_write_str;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// The persisted document: all conversations keyed by thread id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationStore {
    #[serde(default)]
    pub conversations: HashMap<String, ConversationState>,
    #[serde(default)]
    pub last_processed_at: Option<String>,
}

/// Persistence seam for the negotiation engine.
///
/// Production uses [`FileStore`]; tests inject [`MemoryStore`] so the
/// engine runs without touching disk.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn load(&self) -> Result<ConversationStore, StoreError>;
    async fn save(&self, store: &ConversationStore) -> Result<(), StoreError>;

    /// Fetch a single conversation by thread id.
    async fn get(&self, thread_id: &str) -> Result<Option<ConversationState>, StoreError> {
        Ok(self.load().await?.conversations.get(thread_id).cloned())
    }

    /// Insert or replace a single conversation.
    ///
    /// Batch processing mutates a loaded snapshot and saves once; this is
    /// for one-off updates (manual fixes, incremental callers).
    async fn upsert(&self, state: ConversationState) -> Result<(), StoreError> {
        let mut store = self.load().await?;
        store
            .conversations
            .insert(state.thread_id.clone(), state);
        self.save(&store).await
    }
}

// =============================================================================
// File-backed store
// =============================================================================

/// JSON document store at `~/.slotwise/conversations.json`.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Default location under the user's home directory.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_default()
            .join(".slotwise")
            .join("conversations.json")
    }
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new(Self::default_path())
    }
}

#[async_trait]
impl ConversationRepository for FileStore {
    async fn load(&self) -> Result<ConversationStore, StoreError> {
        if !self.path.exists() {
            return Ok(ConversationStore::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        match serde_json::from_str(&content) {
            Ok(store) => Ok(store),
            Err(e) => {
                // First-run tolerance: a corrupt document starts fresh
                // rather than wedging every subsequent batch.
                log::warn!(
                    "Conversation store at {} is unreadable ({}), starting empty",
                    self.path.display(),
                    e
                );
                Ok(ConversationStore::default())
            }
        }
    }

    async fn save(&self, store: &ConversationStore) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(store)?;
        atomic_write_str(&self.path, &content)?;
        Ok(())
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// In-memory repository for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    inner: std::sync::Mutex<ConversationStore>,
}

impl MemoryStore {
    pub fn new(store: ConversationStore) -> Self {
        Self {
            inner: std::sync::Mutex::new(store),
        }
    }

    /// Snapshot of the current document.
    pub fn snapshot(&self) -> ConversationStore {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ConversationRepository for MemoryStore {
    async fn load(&self) -> Result<ConversationStore, StoreError> {
        Ok(self.snapshot())
    }

    async fn save(&self, store: &ConversationStore) -> Result<(), StoreError> {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = store.clone();
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
