//! Transport Traits
//!
//! The stream aggregator needs exactly one thing from the network: post a
//! JSON body and hand back the response body as a stream of byte chunks.
//! Implementations own connection handling, status mapping and secret
//! redaction; the aggregator owns framing.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::StreamError;
use crate::messages::ChatMessage;

/// Response body as it arrives, one network chunk at a time
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, StreamError>>;

/// Chat completions request body
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    /// Model identifier
    pub model: String,
    /// Full conversation, system message first
    pub messages: Vec<ChatMessage>,
    /// Maximum tokens in the response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Always true for this client
    pub stream: bool,
}

impl ChatRequest {
    /// Create a streaming request
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: None,
            stream: true,
        }
    }

    /// Set max tokens (0 leaves the provider default)
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = (max_tokens > 0).then_some(max_tokens);
        self
    }
}

/// Everything needed to issue one streaming POST
#[derive(Clone, Debug)]
pub struct HttpStreamRequest {
    /// Endpoint URL
    pub url: String,
    /// JSON body
    pub body: ChatRequest,
    /// Extra request headers
    pub headers: Vec<(String, String)>,
    /// API key used for the bearer header, kept for redaction
    api_key: Option<String>,
}

impl HttpStreamRequest {
    /// Create a request with JSON content type and no auth
    pub fn new(url: impl Into<String>, body: ChatRequest) -> Self {
        Self {
            url: url.into(),
            body,
            headers: Vec::new(),
            api_key: None,
        }
        .with_header("Content-Type", "application/json")
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Authenticate with a bearer token
    #[must_use]
    pub fn with_bearer(mut self, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        self = self.with_header("Authorization", format!("Bearer {api_key}"));
        self.api_key = Some(api_key);
        self
    }

    /// The secret that must never appear in surfaced errors
    #[must_use]
    pub fn secret(&self) -> &str {
        self.api_key.as_deref().unwrap_or_default()
    }
}

/// Streaming transport
///
/// Implement this to talk to a different HTTP stack, or to script a
/// response in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for logs
    fn name(&self) -> &str;

    /// Issue the request and return the response body
    ///
    /// Must return [`StreamError::Cancelled`] if `cancel` fires before the
    /// response starts. Non-success statuses map to [`StreamError::Api`].
    async fn post_streaming(
        &self,
        request: &HttpStreamRequest,
        cancel: &CancellationToken,
    ) -> Result<ByteStream, StreamError>;

    /// Check that an API key is usable
    ///
    /// The default accepts any non-empty key.
    async fn check_api_key(&self, balance_url: &str, api_key: &str) -> bool {
        let _ = balance_url;
        !api_key.is_empty()
    }
}
