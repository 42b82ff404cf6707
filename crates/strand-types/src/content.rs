//! Response content extraction.
//!
//! A turn produces either plain text or a single structured value. The
//! pipeline projects the live transcript through [`ResponseContent`] on every
//! snapshot and extracts the settled value once the stream ends.

use std::fmt;

use crate::error::GenerationError;
use crate::phase::Streamed;
use crate::tool::StructuredOutput;
use crate::transcript::{Entry, EntryStatus, Segment, Transcript};

pub trait ResponseContent: Sized + Send + Sync + 'static {
    /// What snapshots expose while the turn is streaming.
    type Projection: Clone + fmt::Debug + PartialEq + Send + Sync + 'static;

    /// Structured type tag when the content is not plain text.
    const STRUCTURED_TYPE: Option<&'static str>;

    fn project(transcript: &Transcript) -> Option<Self::Projection>;

    /// True once the content cannot change any more.
    fn settled(transcript: &Transcript) -> bool;

    fn extract(transcript: &Transcript) -> Result<Self, GenerationError>;
}

fn text_segments(transcript: &Transcript) -> impl Iterator<Item = &str> {
    transcript
        .iter()
        .filter_map(|entry| match entry {
            Entry::Response(response) => Some(&response.segments),
            _ => None,
        })
        .flatten()
        .filter_map(|segment| match segment {
            Segment::Text { text, .. } => Some(text.as_str()),
            Segment::Structured { .. } => None,
        })
}

impl ResponseContent for String {
    type Projection = String;

    const STRUCTURED_TYPE: Option<&'static str> = None;

    fn project(transcript: &Transcript) -> Option<String> {
        let mut segments = text_segments(transcript).peekable();
        segments.peek()?;
        Some(segments.collect::<Vec<_>>().join("\n"))
    }

    fn settled(_transcript: &Transcript) -> bool {
        // Text may continue in a later response segment.
        false
    }

    fn extract(transcript: &Transcript) -> Result<String, GenerationError> {
        Ok(text_segments(transcript).collect::<Vec<_>>().join("\n"))
    }
}

/// The structured segment of type `type_name`, with its entry's status.
fn structured_segment<'a>(
    transcript: &'a Transcript,
    type_name: &str,
) -> Option<(&'a str, &'a str, EntryStatus)> {
    transcript.iter().find_map(|entry| {
        let Entry::Response(response) = entry else {
            return None;
        };
        response.segments.iter().find_map(|segment| match segment {
            Segment::Structured {
                id,
                type_name: tag,
                content,
            } if tag == type_name => Some((id.as_str(), content.as_str(), response.status)),
            _ => None,
        })
    })
}

impl<T: StructuredOutput> ResponseContent for T {
    type Projection = Streamed<T>;

    const STRUCTURED_TYPE: Option<&'static str> = Some(T::TYPE_NAME);

    fn project(transcript: &Transcript) -> Option<Streamed<T>> {
        let (id, content, status) = structured_segment(transcript, T::TYPE_NAME)?;
        Some(Streamed::decode(id, content, status.is_completed()))
    }

    fn settled(transcript: &Transcript) -> bool {
        Self::project(transcript).is_some_and(|streamed| streamed.is_final())
    }

    fn extract(transcript: &Transcript) -> Result<T, GenerationError> {
        let (id, content, status) = structured_segment(transcript, T::TYPE_NAME).ok_or_else(
            || {
                GenerationError::unexpected_structured(format!(
                    "no '{}' segment in response",
                    T::TYPE_NAME
                ))
            },
        )?;
        if !status.is_completed() {
            return Err(GenerationError::unexpected_structured(format!(
                "'{}' segment {id} did not complete",
                T::TYPE_NAME
            )));
        }
        Streamed::<T>::decode_final(id, content)
            .ok()
            .and_then(|streamed| streamed.value().cloned())
            .ok_or_else(|| {
                GenerationError::unexpected_structured(format!(
                    "'{}' segment {id} is not a valid value",
                    T::TYPE_NAME
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::transcript::ResponseEntry;
    use crate::value::Generable;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Verdict {
        ok: bool,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct PartialVerdict {
        ok: Option<bool>,
    }

    impl Generable for Verdict {
        type Partial = PartialVerdict;

        fn to_partial(&self) -> PartialVerdict {
            PartialVerdict { ok: Some(self.ok) }
        }
    }

    impl StructuredOutput for Verdict {
        const TYPE_NAME: &'static str = "Verdict";
    }

    fn response(id: &str, segments: Vec<Segment>, status: EntryStatus) -> Entry {
        Entry::Response(ResponseEntry {
            id: id.to_string(),
            segments,
            status,
        })
    }

    #[test]
    fn test_text_joins_segments_across_responses() {
        let mut transcript = Transcript::new();
        assert_eq!(String::project(&transcript), None);
        transcript.append(response("a", vec![Segment::text("Hello")], EntryStatus::Completed));
        transcript.append(response(
            "b",
            vec![Segment::text("world"), Segment::structured("Verdict", "{}")],
            EntryStatus::Completed,
        ));
        assert_eq!(String::extract(&transcript).unwrap(), "Hello\nworld");
        assert_eq!(String::project(&transcript).as_deref(), Some("Hello\nworld"));
    }

    #[test]
    fn test_structured_requires_completed_segment() {
        let mut transcript = Transcript::new();
        assert!(matches!(
            Verdict::extract(&transcript),
            Err(GenerationError::UnexpectedStructuredResponse { .. })
        ));

        transcript.upsert(response(
            "r",
            vec![Segment::Structured {
                id: "s".to_string(),
                type_name: "Verdict".to_string(),
                content: r#"{"ok": tr"#.to_string(),
            }],
            EntryStatus::InProgress,
        ));
        assert!(!Verdict::settled(&transcript));
        assert!(Verdict::extract(&transcript).is_err());

        transcript.upsert(response(
            "r",
            vec![Segment::Structured {
                id: "s".to_string(),
                type_name: "Verdict".to_string(),
                content: r#"{"ok": true}"#.to_string(),
            }],
            EntryStatus::Completed,
        ));
        assert!(Verdict::settled(&transcript));
        assert_eq!(Verdict::extract(&transcript).unwrap(), Verdict { ok: true });
    }

    #[test]
    fn test_structured_ignores_other_type_tags() {
        let mut transcript = Transcript::new();
        transcript.append(response(
            "r",
            vec![Segment::structured("Other", r#"{"ok": true}"#)],
            EntryStatus::Completed,
        ));
        assert!(Verdict::project(&transcript).is_none());
    }
}
