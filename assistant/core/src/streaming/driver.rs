//! Stream Driver
//!
//! Pumps one transport response into the aggregator. Three things can
//! happen next at any point: the operator cancels, the watchdog fires, or
//! the body yields. The driver waits on all three and forwards whichever
//! comes first as a callback addressed by the session id.

use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;

use super::aggregator::{StreamAggregator, StreamState, StreamSummary, StreamTicket};
use crate::backend::{HttpStreamRequest, Transport};
use crate::error::StreamError;

/// Default watchdog window before the first data line
pub const DEFAULT_WATCHDOG: Duration = Duration::from_secs(20);

/// Terminal state of a session the driver was told about
///
/// `None` means the session had already been replaced or cancelled.
fn terminal_state(summary: Option<StreamSummary>) -> StreamState {
    summary.map_or(StreamState::Cancelled, |s| s.state)
}

/// Run one started stream to a terminal state
///
/// The aggregator lock is only taken for the duration of each callback,
/// never across an await.
pub async fn drive_stream<T: Transport + ?Sized>(
    transport: &T,
    aggregator: &Mutex<StreamAggregator>,
    ticket: StreamTicket,
    request: &HttpStreamRequest,
    watchdog: Duration,
) -> StreamState {
    let StreamTicket { id, cancel } = ticket;

    let watchdog_timer = tokio::time::sleep(watchdog);
    tokio::pin!(watchdog_timer);
    let mut armed = true;

    tracing::debug!(stream_id = %id, transport = transport.name(), url = %request.url, "Issuing request");

    let mut body = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            return terminal_state(aggregator.lock().on_transport_error(id, StreamError::Cancelled));
        }
        () = &mut watchdog_timer => {
            return terminal_state(aggregator.lock().on_watchdog_expired(id));
        }
        result = transport.post_streaming(request, &cancel) => match result {
            Ok(body) => body,
            Err(e) => return terminal_state(aggregator.lock().on_transport_error(id, e)),
        },
    };

    aggregator.lock().on_connected(id);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return terminal_state(aggregator.lock().on_transport_error(id, StreamError::Cancelled));
            }
            () = &mut watchdog_timer, if armed => {
                if let Some(summary) = aggregator.lock().on_watchdog_expired(id) {
                    return summary.state;
                }
                armed = false;
            }
            chunk = body.next() => match chunk {
                Some(Ok(bytes)) => {
                    let outcome = aggregator.lock().on_bytes_received(id, &bytes);
                    if !outcome.accepted {
                        return StreamState::Cancelled;
                    }
                    if outcome.data_seen {
                        armed = false;
                    }
                }
                Some(Err(e)) => {
                    return terminal_state(aggregator.lock().on_transport_error(id, e));
                }
                None => {
                    return terminal_state(aggregator.lock().on_stream_end(id));
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::{data_line, ChatRequest, ScriptedResponse, ScriptedTransport};
    use crate::conversation::ConversationStore;
    use crate::messages::{MessageRole, RecordingSink, SinkMessage};
    use pretty_assertions::assert_eq;

    struct Harness {
        sink: Arc<RecordingSink>,
        conversation: Arc<Mutex<ConversationStore>>,
        aggregator: Mutex<StreamAggregator>,
        request: HttpStreamRequest,
    }

    impl Harness {
        fn new() -> Self {
            let sink = Arc::new(RecordingSink::new());
            let conversation = Arc::new(Mutex::new(ConversationStore::default()));
            let aggregator = Mutex::new(StreamAggregator::new(sink.clone(), conversation.clone()));
            let request = HttpStreamRequest::new("http://test", ChatRequest::new("m", Vec::new()));
            Self {
                sink,
                conversation,
                aggregator,
                request,
            }
        }

        async fn run(&self, transport: &ScriptedTransport) -> StreamState {
            let ticket = self.aggregator.lock().start();
            drive_stream(transport, &self.aggregator, ticket, &self.request, DEFAULT_WATCHDOG).await
        }

        fn notifications(&self) -> Vec<SinkMessage> {
            self.sink
                .messages()
                .into_iter()
                .filter(|m| matches!(m, SinkMessage::Notify { .. }))
                .collect()
        }
    }

    #[tokio::test]
    async fn test_drives_to_completion() {
        let harness = Harness::new();
        let body = format!("{}{}data: [DONE]\n", data_line("Hel", ""), data_line("lo", ""));
        let transport = ScriptedTransport::new().with_response(ScriptedResponse::split(&body, 7));

        let state = harness.run(&transport).await;

        assert_eq!(state, StreamState::Completed);
        assert_eq!(
            harness.sink.messages(),
            vec![
                SinkMessage::delta("Hel", ""),
                SinkMessage::delta("lo", ""),
                SinkMessage::EndLoading,
                SinkMessage::final_delta(),
            ]
        );
        let conversation = harness.conversation.lock();
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation.messages()[0].role, MessageRole::Assistant);
        assert_eq!(conversation.messages()[0].content, "Hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_fires_while_connecting() {
        let harness = Harness::new();
        let transport = ScriptedTransport::new().with_response(ScriptedResponse::ConnectHang);

        let started = tokio::time::Instant::now();
        let state = harness.run(&transport).await;

        assert_eq!(state, StreamState::Failed);
        assert!(started.elapsed() >= DEFAULT_WATCHDOG);
        assert_eq!(
            harness.sink.messages(),
            vec![
                SinkMessage::EndLoading,
                SinkMessage::error("Request timed out. Please try again."),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_ignores_comment_lines() {
        let harness = Harness::new();
        let transport = ScriptedTransport::new().with_response(ScriptedResponse::ChunksThenHang(
            vec![b": keep-alive\n\n".to_vec()],
        ));

        let state = harness.run(&transport).await;

        assert_eq!(state, StreamState::Failed);
        assert_eq!(harness.notifications().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_data_line_disarms_watchdog() {
        let harness = Harness::new();
        let transport = ScriptedTransport::new().with_response(ScriptedResponse::ChunksThenHang(
            vec![data_line("partial", "").into_bytes()],
        ));

        let run = harness.run(&transport);
        let cancel_later = async {
            tokio::time::sleep(DEFAULT_WATCHDOG * 3).await;
            harness.aggregator.lock().cancel();
        };
        let (state, ()) = tokio::join!(run, cancel_later);

        assert_eq!(state, StreamState::Cancelled);
        assert!(harness.notifications().is_empty());
        assert_eq!(harness.sink.messages(), vec![SinkMessage::delta("partial", "")]);
        assert!(harness.conversation.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_data_line_disarms_watchdog() {
        let harness = Harness::new();
        let transport = ScriptedTransport::new().with_response(ScriptedResponse::ChunksThenHang(
            vec![b"data: {bad\n".to_vec()],
        ));

        let run = harness.run(&transport);
        let cancel_later = async {
            tokio::time::sleep(DEFAULT_WATCHDOG * 5).await;
            harness.aggregator.lock().cancel();
        };
        let (state, ()) = tokio::join!(run, cancel_later);

        // The provider answered, so only the operator ends this stream
        assert_eq!(state, StreamState::Cancelled);
        assert!(harness.notifications().is_empty());
        assert_eq!(harness.sink.messages(), vec![SinkMessage::EndLoading]);
    }

    #[tokio::test]
    async fn test_body_error_surfaces_once() {
        let harness = Harness::new();
        let transport = ScriptedTransport::new().with_response(ScriptedResponse::ChunksThenError(
            vec![data_line("Hi", "").into_bytes()],
            StreamError::Transport("connection reset".to_string()),
        ));

        let state = harness.run(&transport).await;

        assert_eq!(state, StreamState::Failed);
        assert_eq!(
            harness.sink.messages(),
            vec![
                SinkMessage::delta("Hi", ""),
                SinkMessage::EndLoading,
                SinkMessage::error("DeepSeek API Error: connection reset"),
            ]
        );
        assert!(harness.conversation.lock().is_empty());
    }

    #[tokio::test]
    async fn test_connect_error_maps_api_message() {
        let harness = Harness::new();
        let transport = ScriptedTransport::new().with_response(ScriptedResponse::Fail(
            StreamError::Api {
                status: 402,
                message: "Insufficient Balance".to_string(),
            },
        ));

        let state = harness.run(&transport).await;

        assert_eq!(state, StreamState::Failed);
        assert_eq!(
            harness.notifications(),
            vec![SinkMessage::error("DeepSeek API Error: Insufficient Balance")]
        );
    }
}
