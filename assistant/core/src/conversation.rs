//! Conversation Store
//!
//! Holds the ordered message history sent to the model with every turn.
//!
//! # Invariants
//!
//! - At most one system message exists and it lives at index 0.
//! - The history never grows past `max_len`; the oldest non-system entries
//!   go first.
//! - A new user turn replaces an unanswered trailing user turn, so a retry
//!   never sends the same question twice.

use std::collections::HashSet;

use crate::messages::{ChatMessage, MessageRole};

/// Default maximum number of retained messages
pub const DEFAULT_MAX_HISTORY: usize = 200;

/// Ordered conversation history, oldest first
#[derive(Clone, Debug)]
pub struct ConversationStore {
    messages: Vec<ChatMessage>,
    max_len: usize,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl ConversationStore {
    /// Create an empty store retaining at most `max_len` messages
    ///
    /// A `max_len` of 0 is treated as 1.
    #[must_use]
    pub fn new(max_len: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_len: max_len.max(1),
        }
    }

    /// Clear all history
    pub fn reset(&mut self) {
        self.messages.clear();
    }

    /// Append a user turn, replacing a trailing unanswered one
    pub fn append_user(&mut self, text: impl Into<String>) {
        if self
            .messages
            .last()
            .is_some_and(|m| m.role == MessageRole::User)
        {
            self.messages.pop();
        }
        self.messages.push(ChatMessage::user(text));
        self.trim();
    }

    /// Append an assistant turn; empty text is ignored
    pub fn append_assistant(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            tracing::debug!("Ignoring empty assistant turn");
            return;
        }
        self.messages.push(ChatMessage::assistant(text));
        self.trim();
    }

    /// Replace the system message, placing it at index 0
    pub fn set_system_message(&mut self, text: impl Into<String>) {
        self.messages.retain(|m| m.role != MessageRole::System);
        self.messages.insert(0, ChatMessage::system(text));
        self.trim();
    }

    /// Enforce the length cap
    ///
    /// Keeps a leading system message plus the most recent `max_len - 1`
    /// entries, or just the most recent `max_len` when there is no system
    /// message at index 0.
    pub fn trim(&mut self) {
        let len = self.messages.len();
        if len <= self.max_len {
            return;
        }

        let leading_system = self.messages[0].role == MessageRole::System;
        if leading_system {
            let keep_tail = self.max_len - 1;
            self.messages.drain(1..len - keep_tail);
        } else {
            self.messages.drain(..len - self.max_len);
        }

        tracing::debug!(
            removed = len - self.messages.len(),
            remaining = self.messages.len(),
            "Trimmed conversation history"
        );
    }

    /// Presentable history: no system messages, `(role, content)` duplicates
    /// collapsed to their first occurrence
    pub fn deduped_view(&self) -> impl Iterator<Item = &ChatMessage> + '_ {
        let mut seen: HashSet<(MessageRole, &str)> = HashSet::new();
        self.messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .filter(move |m| seen.insert((m.role, m.content.as_str())))
    }

    /// Replace the history with persisted messages
    ///
    /// Empty entries are dropped and `(role, content)` duplicates collapse to
    /// the first occurrence before the length cap is applied.
    pub fn restore(&mut self, messages: Vec<ChatMessage>) {
        let before = messages.len();
        let mut seen: HashSet<(MessageRole, String)> = HashSet::new();
        self.messages = messages
            .into_iter()
            .filter(|m| !m.content.is_empty())
            .filter(|m| seen.insert((m.role, m.content.clone())))
            .collect();
        self.trim();

        tracing::debug!(
            restored = self.messages.len(),
            dropped = before - self.messages.len(),
            "Restored conversation history"
        );
    }

    /// All stored messages, oldest first
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// The active system message, if any
    #[must_use]
    pub fn system_message(&self) -> Option<&ChatMessage> {
        self.messages
            .first()
            .filter(|m| m.role == MessageRole::System)
    }

    /// Number of stored messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the history is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Configured length cap
    #[must_use]
    pub fn max_len(&self) -> usize {
        self.max_len
    }
}
