//! Conversation runtime.
//!
//! - `schema`: static registration of tools, structured outputs and groundings
//! - `correlate`: tool call ↔ tool output matching
//! - `resolve`: raw transcript → application-typed transcript
//! - `pipeline`: throttled snapshot stream for one turn
//! - `session`: long-lived transcript, usage and turn entry points
//! - `tools`: tool execution into transcript entries
//! - `config` / `logging`: ambient setup

pub mod config;
pub mod correlate;
pub mod logging;
pub mod pipeline;
pub mod resolve;
pub mod schema;
pub mod session;
pub mod tools;

pub use config::Config;
pub use logging::LoggingConfig;
pub use pipeline::{PipelineOptions, Response, Snapshot, Turn, TurnOutcome, TurnState};
pub use resolve::{DecodedEntry, DecodedPrompt, DecodedResponse, DecodedSegment, DecodedTranscript};
pub use schema::{NoGrounding, Schema, SchemaBuilder, SchemaTypes};
pub use session::{Session, SessionView};
pub use tools::{ToolBox, ToolDescriptor};
