//! Stream Aggregator
//!
//! Synchronous state machine for one conversation's streaming responses.
//! The async driver feeds it transport callbacks; it turns them into sink
//! events and, on completion, commits the assembled answer to the
//! conversation store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::frame::{parse_line, EventLine, LineBuffer};
use crate::conversation::ConversationStore;
use crate::error::StreamError;
use crate::messages::{EventSink, SinkMessage, StreamId};

/// Lifecycle of the most recent stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    /// No stream has been started
    Idle,
    /// Request issued, no response yet
    Connecting,
    /// Response body is arriving
    Streaming,
    /// Body ended and the answer was committed
    Completed,
    /// Timed out or failed at the transport level
    Failed,
    /// Aborted by the operator or replaced by a newer stream
    Cancelled,
}

/// Handle given to the driver for one started stream
#[derive(Clone, Debug)]
pub struct StreamTicket {
    /// Session this ticket addresses
    pub id: StreamId,
    /// Cancelled when the session is aborted or replaced
    pub cancel: CancellationToken,
}

/// Result of feeding one chunk
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkOutcome {
    /// The chunk belonged to the active session
    pub accepted: bool,
    /// At least one data line has been seen in this session
    pub data_seen: bool,
}

/// Summary of a terminated session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamSummary {
    /// Which session
    pub id: StreamId,
    /// Terminal state
    pub state: StreamState,
    /// Bytes of answer text accumulated
    pub content_bytes: usize,
    /// Bytes of reasoning text accumulated
    pub reasoning_bytes: usize,
    /// Time from start to termination
    pub elapsed: Duration,
}

/// Per-request state, owned by the aggregator
#[derive(Debug)]
struct StreamSession {
    id: StreamId,
    cancel: CancellationToken,
    accumulated_content: String,
    accumulated_reasoning: String,
    line_buffer: LineBuffer,
    started_at: Instant,
    has_received_any_data: bool,
    done_seen: bool,
}

impl StreamSession {
    fn new() -> Self {
        Self {
            id: StreamId::new(),
            cancel: CancellationToken::new(),
            accumulated_content: String::new(),
            accumulated_reasoning: String::new(),
            line_buffer: LineBuffer::new(),
            started_at: Instant::now(),
            has_received_any_data: false,
            done_seen: false,
        }
    }

    fn summary(&self, state: StreamState) -> StreamSummary {
        StreamSummary {
            id: self.id,
            state,
            content_bytes: self.accumulated_content.len(),
            reasoning_bytes: self.accumulated_reasoning.len(),
            elapsed: self.started_at.elapsed(),
        }
    }
}

/// Aggregates one conversation's streaming responses
///
/// At most one session is active; [`start`](Self::start) cancels any
/// previous one. Every callback names the session it belongs to and is
/// ignored when that session is no longer active.
pub struct StreamAggregator {
    sink: Arc<dyn EventSink>,
    conversation: Arc<Mutex<ConversationStore>>,
    session: Option<StreamSession>,
    state: StreamState,
    last_summary: Option<StreamSummary>,
}

impl StreamAggregator {
    /// Create an idle aggregator emitting to `sink` and committing to
    /// `conversation`
    pub fn new(sink: Arc<dyn EventSink>, conversation: Arc<Mutex<ConversationStore>>) -> Self {
        Self {
            sink,
            conversation,
            session: None,
            state: StreamState::Idle,
            last_summary: None,
        }
    }

    /// Current state of the most recent session
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Id of the active session, if any
    #[must_use]
    pub fn active_id(&self) -> Option<StreamId> {
        self.session.as_ref().map(|s| s.id)
    }

    /// Whether a session is in flight
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Whether `id` has seen a data line (false for inactive sessions)
    #[must_use]
    pub fn has_received_data(&self, id: StreamId) -> bool {
        self.session_for(id).is_some_and(|s| s.has_received_any_data)
    }

    /// Answer text accumulated so far by the active session
    #[must_use]
    pub fn accumulated_content(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.accumulated_content.as_str())
    }

    /// Reasoning text accumulated so far by the active session
    #[must_use]
    pub fn accumulated_reasoning(&self) -> Option<&str> {
        self.session
            .as_ref()
            .map(|s| s.accumulated_reasoning.as_str())
    }

    /// Summary of the last session that reached a terminal state
    #[must_use]
    pub fn last_summary(&self) -> Option<&StreamSummary> {
        self.last_summary.as_ref()
    }

    /// Begin a new session, cancelling any active one
    pub fn start(&mut self) -> StreamTicket {
        if self.session.is_some() {
            tracing::debug!("Replacing active stream");
            self.cancel();
        }

        let session = StreamSession::new();
        let ticket = StreamTicket {
            id: session.id,
            cancel: session.cancel.clone(),
        };

        tracing::debug!(stream_id = %session.id, "Stream connecting");
        self.session = Some(session);
        self.state = StreamState::Connecting;
        ticket
    }

    /// The transport began delivering the response body
    pub fn on_connected(&mut self, id: StreamId) {
        if self.session_for(id).is_none() {
            tracing::trace!(stream_id = %id, "Ignoring connect for stale stream");
            return;
        }
        if self.state == StreamState::Connecting {
            self.state = StreamState::Streaming;
            tracing::debug!(stream_id = %id, "Stream connected");
        }
    }

    /// Feed one chunk of the response body
    ///
    /// Complete lines are processed in order; the trailing fragment waits
    /// for the next chunk. All resulting events are emitted before this
    /// returns.
    pub fn on_bytes_received(&mut self, id: StreamId, chunk: &[u8]) -> ChunkOutcome {
        let sink = &self.sink;
        let Some(session) = self.session.as_mut().filter(|s| s.id == id) else {
            tracing::trace!(stream_id = %id, bytes = chunk.len(), "Ignoring chunk for stale stream");
            return ChunkOutcome::default();
        };

        if self.state == StreamState::Connecting {
            self.state = StreamState::Streaming;
        }

        for line in session.line_buffer.push(chunk) {
            let event = parse_line(&line);
            if event.is_event() {
                session.has_received_any_data = true;
            }

            match event {
                EventLine::Done => {
                    if session.done_seen {
                        tracing::debug!(stream_id = %id, "Ignoring repeated terminator");
                        continue;
                    }
                    session.done_seen = true;
                    tracing::debug!(stream_id = %id, "Stream terminator received");
                    sink.emit(SinkMessage::EndLoading);
                }
                EventLine::Delta { content, reasoning } => {
                    session.accumulated_content.push_str(&content);
                    session.accumulated_reasoning.push_str(&reasoning);
                    sink.emit(SinkMessage::delta(content, reasoning));
                }
                EventLine::Malformed { payload, error } => {
                    let err = StreamError::MalformedEvent { line: payload };
                    tracing::warn!(stream_id = %id, parse_error = %error, "{}", err);
                    sink.emit(SinkMessage::EndLoading);
                }
                EventLine::KeepAlive | EventLine::Ignored => {}
            }
        }

        ChunkOutcome {
            accepted: true,
            data_seen: session.has_received_any_data,
        }
    }

    /// The response body ended
    ///
    /// Flushes the closing delta, then commits the accumulated answer.
    pub fn on_stream_end(&mut self, id: StreamId) -> Option<StreamSummary> {
        let Some(session) = self.take_session(id) else {
            tracing::trace!(stream_id = %id, "Ignoring end for stale stream");
            return None;
        };

        if !session.line_buffer.pending().is_empty() {
            tracing::debug!(
                stream_id = %id,
                bytes = session.line_buffer.pending().len(),
                "Discarding unterminated trailing line"
            );
        }

        self.sink.emit(SinkMessage::final_delta());
        self.conversation
            .lock()
            .append_assistant(session.accumulated_content.clone());

        Some(self.finish(&session, StreamState::Completed))
    }

    /// The transport failed
    ///
    /// A cancellation this aggregator requested is silent; anything else ends
    /// the session and is surfaced once.
    pub fn on_transport_error(&mut self, id: StreamId, error: StreamError) -> Option<StreamSummary> {
        let Some(session) = self.take_session(id) else {
            tracing::trace!(stream_id = %id, error = %error, "Ignoring error for stale stream");
            return None;
        };

        if error.is_cancelled() || session.cancel.is_cancelled() {
            tracing::debug!(stream_id = %id, "Stream cancelled");
            return Some(self.finish(&session, StreamState::Cancelled));
        }

        session.cancel.cancel();
        tracing::warn!(stream_id = %id, error = %error, "Stream failed");
        self.sink.emit(SinkMessage::EndLoading);
        self.sink.emit(SinkMessage::error(error.user_message()));
        Some(self.finish(&session, StreamState::Failed))
    }

    /// The watchdog fired
    ///
    /// Fails the session with [`StreamError::Timeout`] unless a data line has
    /// already arrived.
    pub fn on_watchdog_expired(&mut self, id: StreamId) -> Option<StreamSummary> {
        if self.session_for(id)?.has_received_any_data {
            return None;
        }
        self.on_transport_error(id, StreamError::Timeout)
    }

    /// Abort the active session without committing anything
    pub fn cancel(&mut self) -> Option<StreamSummary> {
        let session = self.session.take()?;
        session.cancel.cancel();
        tracing::debug!(
            stream_id = %session.id,
            discarded_bytes = session.accumulated_content.len(),
            "Stream cancelled by operator"
        );
        Some(self.finish(&session, StreamState::Cancelled))
    }

    fn session_for(&self, id: StreamId) -> Option<&StreamSession> {
        self.session.as_ref().filter(|s| s.id == id)
    }

    fn take_session(&mut self, id: StreamId) -> Option<StreamSession> {
        if self.session_for(id).is_some() {
            self.session.take()
        } else {
            None
        }
    }

    fn finish(&mut self, session: &StreamSession, state: StreamState) -> StreamSummary {
        self.state = state;
        let summary = session.summary(state);
        tracing::debug!(
            stream_id = %summary.id,
            state = ?state,
            content_bytes = summary.content_bytes,
            reasoning_bytes = summary.reasoning_bytes,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Stream finished"
        );
        self.last_summary = Some(summary.clone());
        summary
    }
}

impl std::fmt::Debug for StreamAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamAggregator")
            .field("state", &self.state)
            .field("active", &self.active_id())
            .finish_non_exhaustive()
    }
}
