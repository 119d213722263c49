//! Assistant Core - Headless Streaming Chat for DeepSeek-compatible APIs
//!
//! This crate holds the conversation and streaming logic of the assistant,
//! independent of any UI. A front end submits text and renders the
//! [`SinkMessage`]s it gets back; an editor panel, a terminal or a test
//! harness all look the same from here.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Front Ends                               │
//! │   ┌──────────────┐   ┌──────────────┐   ┌─────────────────────┐  │
//! │   │ assistant-cli│   │ editor panel │   │  tests / headless   │  │
//! │   └──────┬───────┘   └──────┬───────┘   └──────────┬──────────┘  │
//! │          └───── submit / files / abort ────────────┘             │
//! │                          ▲  SinkMessage                          │
//! └──────────────────────────┼───────────────────────────────────────┘
//!                            │
//! ┌──────────────────────────┼───────────────────────────────────────┐
//! │                    ASSISTANT CORE                                │
//! │  ┌───────────────────────┴─────────────────────────────────────┐ │
//! │  │                       ChatSession                           │ │
//! │  │ ┌──────────────┐ ┌──────────────────┐ ┌───────────────────┐ │ │
//! │  │ │ Conversation │ │ StreamAggregator │ │ FileContext       │ │ │
//! │  │ │ Store        │◀│ + drive_stream   │ │ + ContextProvider │ │ │
//! │  │ └──────────────┘ └────────┬─────────┘ └───────────────────┘ │ │
//! │  │        StateStore         │ Transport                       │ │
//! │  └───────────────────────────┼─────────────────────────────────┘ │
//! └──────────────────────────────┼───────────────────────────────────┘
//!                                ▼
//!                     chat completions endpoint
//! ```
//!
//! # Key Types
//!
//! - [`ChatSession`]: owns one conversation and everything around it
//! - [`ConversationStore`]: bounded history with the system message pinned
//! - [`StreamAggregator`]: turns `data:` lines into ordered sink events
//! - [`Transport`]: where streaming bodies come from
//! - [`SinkMessage`]: what front ends render
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use assistant_core::{
//!     backend::HttpTransport, load_config, ChatSession, FsContextProvider,
//!     JsonFileStore, SessionSettings,
//! };
//! use tokio::sync::mpsc;
//!
//! let config = load_config()?;
//! let (tx, mut rx) = mpsc::unbounded_channel();
//! let mut session = ChatSession::new(
//!     HttpTransport::new(Duration::from_secs(10))?,
//!     Arc::new(FsContextProvider::new()),
//!     Arc::new(JsonFileStore::new(state_path)),
//!     Arc::new(tx),
//!     SessionSettings::from_config(&config),
//! );
//!
//! session.restore().await?;
//! session.submit("Explain this function").await?;
//! while let Ok(msg) = rx.try_recv() {
//!     // Render message
//! }
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod chat;
pub mod config;
pub mod context;
pub mod conversation;
pub mod error;
pub mod messages;
pub mod persistence;
pub mod streaming;

// Re-exports for convenience
pub use backend::{ChatRequest, HttpStreamRequest, HttpTransport, Transport};
pub use chat::{ChatSession, SessionSettings, StreamHandle};
pub use context::{ContextProvider, FileContext, FileText, FsContextProvider};
pub use conversation::{ConversationStore, DEFAULT_MAX_HISTORY};
pub use error::{Error, PersistenceError, Result, StreamError};
pub use messages::{
    ChatMessage, EventSink, MessageRole, NotifyLevel, RecordingSink, SinkMessage, StreamId,
};
pub use persistence::{ChatState, JsonFileStore, MemoryStore, StateStore, UiState, UiStatePatch};
pub use streaming::{drive_stream, StreamAggregator, StreamState, StreamSummary, StreamTicket};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, AssistantConfig, ConfigError,
    ConfigOverrides, ConfigSource,
};
