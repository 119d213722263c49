//! Scripted Transport
//!
//! Replays canned responses in order. Lets streaming behaviour be exercised
//! without a network.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::traits::{ByteStream, HttpStreamRequest, Transport};
use crate::error::StreamError;

/// One canned response
#[derive(Clone, Debug)]
pub enum ScriptedResponse {
    /// Deliver these chunks, then end the body
    Chunks(Vec<Vec<u8>>),
    /// Deliver these chunks, then fail the body
    ChunksThenError(Vec<Vec<u8>>, StreamError),
    /// Deliver these chunks, then never yield again
    ChunksThenHang(Vec<Vec<u8>>),
    /// Fail before the body starts
    Fail(StreamError),
    /// Never connect (resolves only on cancellation)
    ConnectHang,
}

impl ScriptedResponse {
    /// Split `text` into chunks of at most `chunk_size` bytes
    #[must_use]
    pub fn split(text: &str, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self::Chunks(
            text.as_bytes()
                .chunks(chunk_size)
                .map(<[u8]>::to_vec)
                .collect(),
        )
    }
}

/// Render one `data:` event line (with trailing newline)
#[must_use]
pub fn data_line(content: &str, reasoning: &str) -> String {
    let payload = serde_json::json!({
        "choices": [{"delta": {"content": content, "reasoning_content": reasoning}}]
    });
    format!("data: {payload}\n")
}

/// Transport that replays [`ScriptedResponse`]s
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<HttpStreamRequest>>,
}

impl ScriptedTransport {
    /// Create a transport with no responses queued
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response
    #[must_use]
    pub fn with_response(self, response: ScriptedResponse) -> Self {
        self.push(response);
        self
    }

    /// Queue a response on a shared transport
    pub fn push(&self, response: ScriptedResponse) {
        self.responses.lock().push_back(response);
    }

    /// Requests received so far
    #[must_use]
    pub fn requests(&self) -> Vec<HttpStreamRequest> {
        self.requests.lock().clone()
    }
}

fn chunk_stream(chunks: Vec<Vec<u8>>) -> impl futures::Stream<Item = Result<Vec<u8>, StreamError>> {
    stream::iter(chunks.into_iter().map(Ok))
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &'static str {
        "Scripted"
    }

    async fn post_streaming(
        &self,
        request: &HttpStreamRequest,
        cancel: &CancellationToken,
    ) -> Result<ByteStream, StreamError> {
        self.requests.lock().push(request.clone());
        let response = self.responses.lock().pop_front();

        match response {
            None => Err(StreamError::Transport("no scripted response left".to_string())),
            Some(ScriptedResponse::Fail(error)) => Err(error),
            Some(ScriptedResponse::ConnectHang) => {
                cancel.cancelled().await;
                Err(StreamError::Cancelled)
            }
            Some(ScriptedResponse::Chunks(chunks)) => Ok(chunk_stream(chunks).boxed()),
            Some(ScriptedResponse::ChunksThenError(chunks, error)) => Ok(chunk_stream(chunks)
                .chain(stream::once(async move { Err(error) }))
                .boxed()),
            Some(ScriptedResponse::ChunksThenHang(chunks)) => {
                Ok(chunk_stream(chunks).chain(stream::pending()).boxed())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ChatRequest;

    fn request() -> HttpStreamRequest {
        HttpStreamRequest::new("http://scripted", ChatRequest::new("m", Vec::new()))
    }

    #[tokio::test]
    async fn test_replays_in_order() {
        let transport = ScriptedTransport::new()
            .with_response(ScriptedResponse::split("abcdef", 4))
            .with_response(ScriptedResponse::Fail(StreamError::Timeout));
        let cancel = CancellationToken::new();

        let body = transport.post_streaming(&request(), &cancel).await.unwrap();
        let chunks: Vec<_> = body.collect().await;
        assert_eq!(chunks, vec![Ok(b"abcd".to_vec()), Ok(b"ef".to_vec())]);

        let second = transport.post_streaming(&request(), &cancel).await;
        assert!(matches!(second, Err(StreamError::Timeout)));
        assert_eq!(transport.requests().len(), 2);
    }

    #[test]
    fn test_data_line_shape() {
        let line = data_line("Hi", "");
        assert!(line.starts_with("data: {"));
        assert!(line.ends_with("}\n"));
        assert!(line.contains(r#""content":"Hi""#));
    }
}
