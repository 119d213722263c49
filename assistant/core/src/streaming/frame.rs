//! Event Line Framing
//!
//! Splits a chunked response body into complete lines and classifies each
//! line of the `data: <json>` event format.
//!
//! Chunks can end anywhere, including inside a multi-byte character. The
//! buffer therefore holds raw bytes and only decodes a line once its
//! terminating `\n` has arrived.

use serde::Deserialize;

/// Prefix of every event line
pub const DATA_PREFIX: &str = "data: ";

/// Line that terminates the stream
pub const DONE_SENTINEL: &str = "data: [DONE]";

/// Byte buffer holding the incomplete tail of the stream
#[derive(Clone, Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, in order
    ///
    /// The fragment after the last `\n` stays buffered for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);

        complete[..last_newline]
            .split(|&b| b == b'\n')
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }

    /// Bytes waiting for their line to complete
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Drop any buffered bytes
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Classification of one complete line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventLine {
    /// A delta with at least one non-empty field
    Delta {
        /// Ordinary answer text (may be empty)
        content: String,
        /// Reasoning side-channel text (may be empty)
        reasoning: String,
    },
    /// A well-formed event that carries no text (keep-alive, role header)
    KeepAlive,
    /// The terminating sentinel
    Done,
    /// A data line whose payload is not valid JSON
    Malformed {
        /// Payload after the data prefix
        payload: String,
        /// Parser error
        error: String,
    },
    /// Empty or unrelated line
    Ignored,
}

impl EventLine {
    /// Whether this line was an event line (data prefix present)
    #[must_use]
    pub fn is_event(&self) -> bool {
        !matches!(self, Self::Ignored)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

/// Classify one complete line
///
/// Surrounding whitespace (including a trailing `\r`) is ignored.
#[must_use]
pub fn parse_line(raw: &str) -> EventLine {
    let line = raw.trim();

    if line == DONE_SENTINEL {
        return EventLine::Done;
    }

    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return EventLine::Ignored;
    };

    match serde_json::from_str::<ChunkPayload>(payload) {
        Ok(chunk) => {
            let delta = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta)
                .unwrap_or_default();
            let content = delta.content.unwrap_or_default();
            let reasoning = delta.reasoning_content.unwrap_or_default();

            if content.is_empty() && reasoning.is_empty() {
                EventLine::KeepAlive
            } else {
                EventLine::Delta { content, reasoning }
            }
        }
        Err(e) => EventLine::Malformed {
            payload: payload.to_string(),
            error: e.to_string(),
        },
    }
}
