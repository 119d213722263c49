//! Transport Integration
//!
//! Abstracted access to the chat completions API through a common trait.
//!
//! # Available Transports
//!
//! - **HTTP**: `reqwest` client for OpenAI-compatible streaming endpoints
//! - **Scripted**: replays canned bodies, for tests and offline runs
//!
//! # Usage
//!
//! ```ignore
//! use assistant_core::backend::{ChatRequest, HttpStreamRequest, HttpTransport, Transport};
//!
//! let transport = HttpTransport::new(Duration::from_secs(10))?;
//! let request = HttpStreamRequest::new(endpoint, ChatRequest::new("deepseek-chat", messages))
//!     .with_bearer(api_key);
//! let body = transport.post_streaming(&request, &cancel).await?;
//! ```

mod http;
mod scripted;
mod traits;

pub use http::HttpTransport;
pub use scripted::{data_line, ScriptedResponse, ScriptedTransport};
pub use traits::{ByteStream, ChatRequest, HttpStreamRequest, Transport};
