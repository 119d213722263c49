//! Streaming Response Aggregation
//!
//! Turns a chunked `data: <json>` response body into ordered sink events.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  chunks   ┌──────────────┐  callbacks(id)  ┌──────────────────┐
//! │ Transport  │ ────────▶ │ drive_stream │ ──────────────▶ │ StreamAggregator │
//! └────────────┘           │  select! on  │                 │  LineBuffer      │
//!                          │  cancel      │                 │  parse_line      │
//!                          │  watchdog    │                 └───────┬──────────┘
//!                          │  body.next() │                         │
//!                          └──────────────┘            SinkMessage  │  append_assistant
//!                                                          ▼        ▼
//!                                                       EventSink  ConversationStore
//! ```
//!
//! # Features
//!
//! - **Chunk-boundary independence**: lines are only parsed once complete,
//!   so any split of the same bytes yields the same events
//! - **Bad-line isolation**: an unparsable line stops the loading indicator
//!   but the session keeps going
//! - **Single active session**: starting a stream cancels the previous one,
//!   and callbacks are matched by [`StreamId`](crate::StreamId) so late
//!   callbacks from a replaced session are dropped
//! - **Watchdog**: a stream that produces no data line in time fails with a
//!   timeout

mod aggregator;
mod driver;
mod frame;

pub use aggregator::{ChunkOutcome, StreamAggregator, StreamState, StreamSummary, StreamTicket};
pub use driver::{drive_stream, DEFAULT_WATCHDOG};
pub use frame::{parse_line, EventLine, LineBuffer, DATA_PREFIX, DONE_SENTINEL};
