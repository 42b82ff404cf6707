//! Decodes raw SSE events into transcript updates.
//!
//! The concrete wire schema belongs to the backend; an [`EventAdapter`] is
//! the seam where it is translated. [`EntryEventAdapter`] understands a
//! canonical wire where every `entry` event carries a whole serialized
//! [`Entry`], so upserting it is enough to keep the transcript current.

use serde::Deserialize;
use strand_types::{Entry, GenerationError, TokenUsage};
use tracing::trace;

use crate::error_map::map_stream_error;
use crate::sse::SseEvent;

/// One decoded update to apply to a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnUpdate {
    /// Upsert this entry into the transcript.
    Entry(Entry),
    /// Merge this usage delta into the counters.
    Usage(TokenUsage),
}

pub trait EventAdapter: Send {
    /// Translates one event into zero or more updates.
    ///
    /// Errors end the turn.
    fn decode(&mut self, event: &SseEvent) -> Result<Vec<TurnUpdate>, GenerationError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EntryEventAdapter;

#[derive(Deserialize)]
struct RefusalPayload {
    #[serde(default)]
    reason: Option<String>,
}

impl EventAdapter for EntryEventAdapter {
    fn decode(&mut self, event: &SseEvent) -> Result<Vec<TurnUpdate>, GenerationError> {
        match event.kind() {
            "entry" => {
                let entry: Entry = serde_json::from_str(&event.data).map_err(|e| {
                    GenerationError::stream_decoding(format!("Failed to parse entry event: {e}"))
                })?;
                Ok(vec![TurnUpdate::Entry(entry)])
            }
            "usage" => {
                let usage: TokenUsage = serde_json::from_str(&event.data).map_err(|e| {
                    GenerationError::stream_decoding(format!("Failed to parse usage event: {e}"))
                })?;
                Ok(vec![TurnUpdate::Usage(usage)])
            }
            "error" => Err(map_stream_error(&event.data)),
            "refusal" => {
                let reason = serde_json::from_str::<RefusalPayload>(&event.data)
                    .ok()
                    .and_then(|payload| payload.reason)
                    .or_else(|| {
                        let text = event.data.trim();
                        (!text.is_empty() && !text.starts_with('{')).then(|| text.to_string())
                    });
                Err(GenerationError::ContentRefusal { reason })
            }
            "done" => Ok(Vec::new()),
            _ if event.data.trim() == "[DONE]" => Ok(Vec::new()),
            other => {
                trace!(event = other, "Ignoring unrecognized event");
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use strand_types::ProviderErrorCategory;

    use super::*;

    fn event(name: &str, data: &str) -> SseEvent {
        SseEvent {
            name: Some(name.to_string()),
            data: data.to_string(),
            id: None,
        }
    }

    #[test]
    fn test_entry_event_decodes() {
        let updates = EntryEventAdapter
            .decode(&event(
                "entry",
                r#"{"type":"reasoning","id":"r1","summary":["Adding"]}"#,
            ))
            .unwrap();
        let [TurnUpdate::Entry(entry)] = updates.as_slice() else {
            panic!("expected one entry");
        };
        assert_eq!(entry.id(), "r1");
    }

    #[test]
    fn test_usage_event_decodes() {
        let updates = EntryEventAdapter
            .decode(&event("usage", r#"{"input_tokens":3,"output_tokens":1}"#))
            .unwrap();
        assert_eq!(
            updates,
            vec![TurnUpdate::Usage(TokenUsage {
                input_tokens: 3,
                output_tokens: 1,
                ..TokenUsage::default()
            })]
        );
    }

    #[test]
    fn test_malformed_entry_is_decoding_failure() {
        let err = EntryEventAdapter.decode(&event("entry", "{")).unwrap_err();
        assert!(matches!(err, GenerationError::StreamingFailure { .. }));
    }

    #[test]
    fn test_error_and_refusal_events() {
        let err = EntryEventAdapter
            .decode(&event("error", r#"{"error":{"code":"server_error","message":"boom"}}"#))
            .unwrap_err();
        assert_eq!(err.provider_category(), Some(ProviderErrorCategory::Server));

        let err = EntryEventAdapter
            .decode(&event("refusal", r#"{"reason":"unsafe"}"#))
            .unwrap_err();
        assert!(matches!(
            err,
            GenerationError::ContentRefusal { reason: Some(ref r) } if r == "unsafe"
        ));
    }

    #[test]
    fn test_terminators_and_unknown_events_are_ignored() {
        let mut adapter = EntryEventAdapter;
        assert!(adapter.decode(&event("done", "")).unwrap().is_empty());
        assert!(adapter.decode(&event("message", "[DONE]")).unwrap().is_empty());
        assert!(adapter.decode(&event("ping", "{}")).unwrap().is_empty());
    }
}
