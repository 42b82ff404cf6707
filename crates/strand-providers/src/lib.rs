//! Wire plumbing for streamed generation.
//!
//! - `sse`: byte-level SSE frame parser
//! - `transport`: HTTP/SSE client with auth retry, unbounded buffering and cancellation
//! - `error_map`: HTTP status and stream error classification
//! - `adapter`: SSE event to transcript update decoding

pub mod adapter;
pub mod error_map;
pub mod sse;
pub mod transport;

pub use adapter::{EntryEventAdapter, EventAdapter, TurnUpdate};
pub use error_map::{
    StatusOverride, classify_reqwest_error, classify_stream_error, map_status, map_stream_error,
};
pub use sse::{SseEvent, SseParser};
pub use transport::{
    AuthInterceptor, BearerAuth, EventStream, EventStreamClient, StreamRequest, TransportOptions,
};
