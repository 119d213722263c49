//! Chat State Persistence
//!
//! A small key/value store holding JSON blobs. The chat session keeps one
//! blob under [`STATE_KEY`]; its camelCase shape is compatible with state
//! written by the editor extension this client grew out of.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::messages::ChatMessage;

/// Key the chat state is stored under
pub const STATE_KEY: &str = "chatState";

/// Default state file location
///
/// Returns `$XDG_DATA_HOME/deepseek-assistant/state.json`.
#[must_use]
pub fn default_state_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("deepseek-assistant").join("state.json"))
}

/// Key/value store for persisted state
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fetch a value, `None` if absent
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, PersistenceError>;

    /// Store a value, replacing any previous one
    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), PersistenceError>;
}

/// In-process store, lost on exit
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, serde_json::Value>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, PersistenceError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), PersistenceError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// Store backed by one JSON object in a file
///
/// Writes go to a sibling temp file first and are renamed into place.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    /// Create a store at `path` (the file is created on first write)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }

    async fn read_all(&self) -> Result<serde_json::Map<String, serde_json::Value>, PersistenceError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(serde_json::Map::new());
            }
            Err(e) => return Err(self.io_error(e)),
        };

        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::Map::new());
        }
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, PersistenceError> {
        let mut entries = self.read_all().await?;
        Ok(entries.remove(key))
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock().await;

        let mut entries = self.read_all().await?;
        entries.insert(key.to_string(), value);
        let encoded = serde_json::to_vec_pretty(&entries)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.io_error(e))?;
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &encoded)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        tracing::trace!(path = %self.path.display(), key, "State written");
        Ok(())
    }
}

/// Panel layout and toggle state
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct UiState {
    /// Whether the reasoning pane is expanded
    pub is_reasoning_expanded: bool,
    /// Chat pane height
    pub chat_height: Option<f64>,
    /// Input box height
    pub input_height: Option<f64>,
}

/// Partial update to [`UiState`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiStatePatch {
    /// New reasoning pane toggle
    pub is_reasoning_expanded: Option<bool>,
    /// New chat pane height
    pub chat_height: Option<f64>,
    /// New input box height
    pub input_height: Option<f64>,
}

impl UiState {
    /// Merge the fields present in `patch`
    pub fn apply(&mut self, patch: UiStatePatch) {
        if let Some(expanded) = patch.is_reasoning_expanded {
            self.is_reasoning_expanded = expanded;
        }
        if patch.chat_height.is_some() {
            self.chat_height = patch.chat_height;
        }
        if patch.input_height.is_some() {
            self.input_height = patch.input_height;
        }
    }
}

/// Persisted chat state
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatState {
    /// Reasoning pane toggle
    pub is_reasoning_expanded: bool,
    /// Full history, system message included
    pub conversation_history: Vec<ChatMessage>,
    /// Pinned project files
    pub project_files: Vec<String>,
    /// Active editor file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file_context: Option<String>,
    /// Chat pane height
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_height: Option<f64>,
    /// Input box height
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_height: Option<f64>,
}

impl ChatState {
    /// UI portion of the state
    #[must_use]
    pub fn ui(&self) -> UiState {
        UiState {
            is_reasoning_expanded: self.is_reasoning_expanded,
            chat_height: self.chat_height,
            input_height: self.input_height,
        }
    }

    /// Load from a store
    ///
    /// # Errors
    ///
    /// Fails if the store fails or the blob does not have the expected shape.
    pub async fn load(store: &dyn StateStore) -> Result<Option<Self>, PersistenceError> {
        match store.get(STATE_KEY).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Save to a store
    ///
    /// # Errors
    ///
    /// Fails if the store fails.
    pub async fn save(&self, store: &dyn StateStore) -> Result<(), PersistenceError> {
        store.set(STATE_KEY, serde_json::to_value(self)?).await
    }
}
