//! HTTP Transport
//!
//! `reqwest`-based transport for OpenAI-compatible chat completion
//! endpoints that stream `data: <json>` lines.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::traits::{ByteStream, HttpStreamRequest, Transport};
use crate::error::StreamError;

/// HTTP transport client
#[derive(Clone, Debug)]
pub struct HttpTransport {
    http_client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a connect timeout
    ///
    /// No overall request timeout is set; streaming responses run as long as
    /// the provider keeps sending.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Transport`] if the TLS backend cannot be
    /// initialised.
    pub fn new(connect_timeout: Duration) -> Result<Self, StreamError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| StreamError::Transport(e.to_string()))?;
        Ok(Self { http_client })
    }

    /// Wrap an existing client
    #[must_use]
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

/// Pull `error.message` out of an API error body
fn api_error_message(body: &str) -> Option<String> {
    let data: serde_json::Value = serde_json::from_str(body).ok()?;
    data.get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(String::from)
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "HTTP"
    }

    async fn post_streaming(
        &self,
        request: &HttpStreamRequest,
        cancel: &CancellationToken,
    ) -> Result<ByteStream, StreamError> {
        let secret = request.secret().to_string();

        // Headers first so `json` keeps an explicit Content-Type
        let mut builder = self.http_client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let builder = builder.json(&request.body);

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(StreamError::Cancelled),
            result = builder.send() => {
                result.map_err(|e| StreamError::Transport(e.to_string()).redacted(&secret))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = api_error_message(&body).unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            });
            return Err(StreamError::Api {
                status: status.as_u16(),
                message,
            }
            .redacted(&secret));
        }

        tracing::debug!(url = %request.url, status = status.as_u16(), "Streaming response started");

        let stream = response.bytes_stream().map(move |chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| StreamError::Transport(e.to_string()).redacted(&secret))
        });

        Ok(stream.boxed())
    }

    async fn check_api_key(&self, balance_url: &str, api_key: &str) -> bool {
        if api_key.is_empty() {
            return false;
        }

        let response = match self
            .http_client
            .get(balance_url)
            .bearer_auth(api_key)
            .header("Content-Type", "application/json")
            .timeout(Duration::from_secs(10))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %crate::error::redact(&e.to_string(), api_key), "API key check failed");
                return false;
            }
        };

        if response.status() != reqwest::StatusCode::OK {
            return false;
        }

        response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|data| data.get("is_available").and_then(serde_json::Value::as_bool))
            .unwrap_or(false)
    }
}
