//! Chat Messages
//!
//! The message types that flow through the assistant: conversation entries
//! sent to the model, and the events sent from the core to whatever renders
//! the chat (an editor panel, a terminal, a test harness).
//!
//! # Design Philosophy
//!
//! The core never touches a UI. It tells the sink what happened through
//! [`SinkMessage`] and the sink decides how to draw it. A sink may coalesce
//! rapid updates; the core only guarantees ordering.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Who sent a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Context and instructions for the model
    System,
    /// User input
    User,
    /// Model response
    Assistant,
}

impl MessageRole {
    /// Wire name of the role
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single conversation entry, exactly as it goes over the wire
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who sent this message
    pub role: MessageRole,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// Create a message with the given role
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// Identifier of one streaming request
///
/// Transport callbacks are addressed by this id so that a late callback from
/// a replaced session can be told apart from the active one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(pub u64);

impl StreamId {
    /// Generate a new unique stream id
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream_{}", self.0)
    }
}

/// Notification levels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyLevel {
    /// Informational
    Info,
    /// Warning
    Warning,
    /// Error
    Error,
}

/// Messages from the core to the rendering surface
///
/// Serialized with a `command` tag matching the commands a webview panel
/// listens for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum SinkMessage {
    /// A request is in flight, show progress
    StartLoading,

    /// Loading has ended (stream finished, failed, or a bad line forced a stop)
    EndLoading,

    /// Incremental response text
    #[serde(rename = "streamResponse")]
    StreamDelta {
        /// Ordinary answer text
        #[serde(rename = "text")]
        content: String,
        /// Reasoning side-channel text
        reasoning: String,
        /// Whether this is the closing delta of the stream
        #[serde(rename = "isFinal")]
        is_final: bool,
    },

    /// History was cleared
    #[serde(rename = "clearHistory")]
    Cleared,

    /// User-visible notification
    Notify {
        /// Notification level
        level: NotifyLevel,
        /// Message content
        message: String,
    },

    /// The list of files in context changed
    #[serde(rename = "updateFiles")]
    FilesUpdated {
        /// Normalized paths, current file first
        files: Vec<String>,
    },

    /// Presentable history (system messages and duplicates removed)
    #[serde(rename = "loadHistory")]
    History {
        /// Messages oldest first
        history: Vec<ChatMessage>,
    },
}

impl SinkMessage {
    /// Build a non-final delta
    pub fn delta(content: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self::StreamDelta {
            content: content.into(),
            reasoning: reasoning.into(),
            is_final: false,
        }
    }

    /// The closing delta sent when the transport ends
    #[must_use]
    pub fn final_delta() -> Self {
        Self::StreamDelta {
            content: String::new(),
            reasoning: String::new(),
            is_final: true,
        }
    }

    /// Build an error notification
    pub fn error(message: impl Into<String>) -> Self {
        Self::Notify {
            level: NotifyLevel::Error,
            message: message.into(),
        }
    }
}

/// Receiver of [`SinkMessage`]s
///
/// Emission is synchronous so that every event produced while handling one
/// chunk is delivered before the handler returns.
pub trait EventSink: Send + Sync {
    /// Deliver one message
    fn emit(&self, message: SinkMessage);
}

impl EventSink for mpsc::UnboundedSender<SinkMessage> {
    fn emit(&self, message: SinkMessage) {
        if let Err(e) = self.send(message) {
            tracing::warn!("Failed to send message to sink: {}", e);
        }
    }
}

/// Sink that records every message, for tests and headless use
#[derive(Debug, Default)]
pub struct RecordingSink {
    messages: parking_lot::Mutex<Vec<SinkMessage>>,
}

impl RecordingSink {
    /// Create an empty recording sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far
    #[must_use]
    pub fn messages(&self) -> Vec<SinkMessage> {
        self.messages.lock().clone()
    }

    /// Remove and return everything emitted so far
    pub fn take(&self) -> Vec<SinkMessage> {
        std::mem::take(&mut *self.messages.lock())
    }

    /// Deltas only, in arrival order
    #[must_use]
    pub fn deltas(&self) -> Vec<SinkMessage> {
        self.messages
            .lock()
            .iter()
            .filter(|m| matches!(m, SinkMessage::StreamDelta { .. }))
            .cloned()
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, message: SinkMessage) {
        self.messages.lock().push(message);
    }
}
