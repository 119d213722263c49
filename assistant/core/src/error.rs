//! Error Types
//!
//! Stream failures are split by how they propagate: a malformed line is
//! recovered locally, a cancellation is silent, and timeouts or transport
//! failures end the session with one user-visible notification.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can end (or, for malformed lines, interrupt) a stream
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    /// No data line arrived within the watchdog window
    #[error("no data received within the watchdog window")]
    Timeout,

    /// Network failure before or during the response body
    #[error("transport error: {0}")]
    Transport(String),

    /// The API answered with a non-success status
    #[error("API returned {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message from the response body (or the status text)
        message: String,
    },

    /// One event line could not be parsed
    #[error("malformed event line: {line}")]
    MalformedEvent {
        /// The offending line, without the data prefix
        line: String,
    },

    /// The request was aborted by the operator
    #[error("request cancelled")]
    Cancelled,
}

impl StreamError {
    /// Whether this error is an operator-initiated cancellation
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Text shown to the user when this error ends a stream
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Timeout => "Request timed out. Please try again.".to_string(),
            Self::Api { message, .. } | Self::Transport(message) => {
                format!("DeepSeek API Error: {message}")
            }
            Self::MalformedEvent { .. } => "Received a malformed response line".to_string(),
            Self::Cancelled => "Request cancelled".to_string(),
        }
    }

    /// Replace every occurrence of `secret` in the message with `***`
    #[must_use]
    pub fn redacted(self, secret: &str) -> Self {
        match self {
            Self::Transport(message) => Self::Transport(redact(&message, secret)),
            Self::Api { status, message } => Self::Api {
                status,
                message: redact(&message, secret),
            },
            other => other,
        }
    }
}

/// Replace every occurrence of `secret` in `text` with `***`
///
/// Empty secrets leave the text unchanged.
#[must_use]
pub fn redact(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        return text.to_string();
    }
    text.replace(secret, "***")
}

/// Errors from the state store
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Reading or writing the backing file failed
    #[error("state file I/O failed at {path}: {source}")]
    Io {
        /// The file involved
        path: std::path::PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// The stored blob could not be encoded or decoded
    #[error("state blob is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Crate-level error
#[derive(Debug, Error)]
pub enum Error {
    /// Streaming request failed
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// State could not be saved or restored
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Crate-level result
pub type Result<T> = std::result::Result<T, Error>;
