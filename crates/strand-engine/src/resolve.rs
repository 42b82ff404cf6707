//! Resolution pass: raw transcript → application-typed transcript.

use strand_types::{
    Entry, EntryError, EntryStatus, GenerationError, PromptEntry, ReasoningEntry, ResponseEntry,
    Segment, ToolCallsEntry, Transcript, UnknownToolRun,
};
use tracing::warn;

use crate::correlate::find_output;
use crate::schema::{Schema, SchemaTypes};

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTranscript<K: SchemaTypes> {
    pub entries: Vec<DecodedEntry<K>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEntry<K: SchemaTypes> {
    Prompt(DecodedPrompt<K>),
    Reasoning(ReasoningEntry),
    /// One per call in a tool-calls batch, with its output folded in.
    ToolRun(K::ToolRun),
    Response(DecodedResponse<K>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPrompt<K: SchemaTypes> {
    pub id: String,
    pub input: String,
    pub prompt: String,
    pub groundings: Vec<K::Grounding>,
    /// Set when the grounding payload could not be decoded.
    pub error: Option<EntryError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedResponse<K: SchemaTypes> {
    pub id: String,
    pub segments: Vec<DecodedSegment<K>>,
    pub status: EntryStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedSegment<K: SchemaTypes> {
    Text { id: String, text: String },
    Structured(K::Output),
}

impl<K: SchemaTypes> DecodedResponse<K> {
    /// Text segments joined with newlines.
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                DecodedSegment::Text { text, .. } => Some(text.as_str()),
                DecodedSegment::Structured(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn structured(&self) -> impl Iterator<Item = &K::Output> {
        self.segments.iter().filter_map(|segment| match segment {
            DecodedSegment::Structured(output) => Some(output),
            DecodedSegment::Text { .. } => None,
        })
    }
}

impl<K: SchemaTypes> DecodedTranscript<K> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DecodedEntry<K>> {
        self.entries.iter()
    }

    /// The last response in the transcript.
    pub fn response(&self) -> Option<&DecodedResponse<K>> {
        self.entries.iter().rev().find_map(|entry| match entry {
            DecodedEntry::Response(response) => Some(response),
            _ => None,
        })
    }

    pub fn tool_runs(&self) -> impl Iterator<Item = &K::ToolRun> {
        self.entries.iter().filter_map(|entry| match entry {
            DecodedEntry::ToolRun(run) => Some(run),
            _ => None,
        })
    }
}

impl<K: SchemaTypes> Default for DecodedTranscript<K> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

/// Decodes every entry of `transcript` against `schema`.
///
/// Grounding failures, unknown tools and unknown structured types are
/// recovered per entry. Only tool payloads that cannot be decoded at all
/// fail the pass.
pub fn resolve<K: SchemaTypes>(
    schema: &Schema<K>,
    transcript: &Transcript,
) -> Result<DecodedTranscript<K>, GenerationError> {
    let mut entries = Vec::with_capacity(transcript.len());
    for (position, entry) in transcript.iter().enumerate() {
        match entry {
            Entry::Prompt(prompt) => {
                entries.push(DecodedEntry::Prompt(decode_prompt(schema, prompt)));
            }
            Entry::Reasoning(reasoning) => {
                entries.push(DecodedEntry::Reasoning(reasoning.clone()));
            }
            Entry::ToolCalls(batch) => {
                entries.extend(
                    decode_calls(schema, transcript, position, batch)?
                        .into_iter()
                        .map(DecodedEntry::ToolRun),
                );
            }
            // Folded into the run of the call it answers.
            Entry::ToolOutput(_) => {}
            Entry::Response(response) => {
                entries.push(DecodedEntry::Response(decode_response(schema, response)));
            }
        }
    }
    Ok(DecodedTranscript { entries })
}

fn decode_prompt<K: SchemaTypes>(schema: &Schema<K>, prompt: &PromptEntry) -> DecodedPrompt<K> {
    let (groundings, error) = match prompt.grounding.as_deref() {
        None => (Vec::new(), None),
        Some(raw) => match schema.decode_groundings(raw) {
            Ok(groundings) => (groundings, None),
            Err(error) => (Vec::new(), Some(error)),
        },
    };
    DecodedPrompt {
        id: prompt.id.clone(),
        input: prompt.input.clone(),
        prompt: prompt.prompt.clone(),
        groundings,
        error,
    }
}

fn decode_calls<K: SchemaTypes>(
    schema: &Schema<K>,
    transcript: &Transcript,
    position: usize,
    batch: &ToolCallsEntry,
) -> Result<Vec<K::ToolRun>, GenerationError> {
    batch
        .calls
        .iter()
        .map(|call| {
            let output = find_output(transcript, position, &call.call_id);
            match schema.decode_tool(call, output) {
                Some(run) => run,
                None => {
                    warn!(
                        tool = %call.tool_name,
                        call_id = %call.call_id,
                        "Unknown tool in transcript"
                    );
                    Ok(schema.unknown_tool(UnknownToolRun {
                        call: call.clone(),
                        raw_output: output.map(|output| output.segment.clone()),
                    }))
                }
            }
        })
        .collect()
}

fn decode_response<K: SchemaTypes>(
    schema: &Schema<K>,
    response: &ResponseEntry,
) -> DecodedResponse<K> {
    let complete = response.status.is_completed();
    let segments = response
        .segments
        .iter()
        .map(|segment| match segment {
            Segment::Text { id, text } => DecodedSegment::Text {
                id: id.clone(),
                text: text.clone(),
            },
            Segment::Structured {
                id,
                type_name,
                content,
            } => DecodedSegment::Structured(
                schema
                    .decode_output(type_name, id, content, complete)
                    .unwrap_or_else(|| {
                        warn!(type_name = %type_name, "Unknown structured type in transcript");
                        schema.unknown_output(segment.clone())
                    }),
            ),
        })
        .collect();
    DecodedResponse {
        id: response.id.clone(),
        segments,
        status: response.status,
    }
}
