//! Provider-agnostic data model for streamed conversation turns.
//!
//! - `transcript`: ordered, ID-addressed log of entries with upsert semantics
//! - `phase`: partial/final lifecycle for streamed schema-shaped payloads
//! - `value`: the value parser boundary (strict and partial JSON decoding)
//! - `tool`: tool and structured-output descriptors and the `ToolRun` record
//! - `content`: response content extraction (plain text or structured)
//! - `usage`: additive token counters
//! - `error`: the closed `GenerationError` taxonomy

pub mod content;
pub mod error;
pub mod phase;
pub mod tool;
pub mod transcript;
pub mod usage;
pub mod value;

pub use content::ResponseContent;
pub use error::{
    EntryError, GenerationError, ProviderErrorCategory, ProviderFailure, RequestFailure,
    StreamingFailure,
};
pub use phase::{Phase, Streamed};
pub use tool::{StructuredOutput, Tool, ToolRejection, ToolRun, ToolRunError, UnknownToolRun};
pub use transcript::{
    Entry, EntryStatus, PromptEntry, ReasoningEntry, ResponseEntry, Segment, ToolCall,
    ToolCallsEntry, ToolOutputEntry, Transcript, new_id,
};
pub use usage::TokenUsage;
pub use value::{Generable, ValueError, parse_final, parse_partial, repair_json};
