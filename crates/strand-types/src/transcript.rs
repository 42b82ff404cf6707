//! Transcript data model.
//!
//! A [`Transcript`] is an ordered log of [`Entry`] values addressed by a
//! stable string ID. Entries are appended in arrival order; [`Transcript::upsert`]
//! replaces the entry sharing an ID in place, or appends when none exists.
//! Entries are never mutated partially: every write swaps a whole value.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Completion status shared by tool calls, tool outputs and responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    #[default]
    InProgress,
    Completed,
    Failed,
}

impl EntryStatus {
    pub fn is_completed(self) -> bool {
        matches!(self, EntryStatus::Completed)
    }
}

/// A piece of response or tool output content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    Text {
        id: String,
        text: String,
    },
    /// Raw structured payload tagged with the type it claims to be.
    Structured {
        id: String,
        type_name: String,
        content: String,
    },
}

impl Segment {
    pub fn text(text: impl Into<String>) -> Self {
        Segment::Text {
            id: new_id(),
            text: text.into(),
        }
    }

    pub fn structured(type_name: impl Into<String>, content: impl Into<String>) -> Self {
        Segment::Structured {
            id: new_id(),
            type_name: type_name.into(),
            content: content.into(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Segment::Text { id, .. } | Segment::Structured { id, .. } => id,
        }
    }

    /// Raw bytes of the segment: the text itself, or the structured payload.
    pub fn raw(&self) -> &str {
        match self {
            Segment::Text { text, .. } => text,
            Segment::Structured { content, .. } => content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptEntry {
    pub id: String,
    pub input: String,
    /// Encoded grounding payload, decoded by the schema's grounding codec.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounding: Option<String>,
    /// The rendered prompt text sent to the model.
    pub prompt: String,
}

impl PromptEntry {
    pub fn new(input: impl Into<String>) -> Self {
        let input = input.into();
        Self {
            id: new_id(),
            prompt: input.clone(),
            input,
            grounding: None,
        }
    }

    #[must_use]
    pub fn with_grounding(mut self, grounding: impl Into<String>) -> Self {
        self.grounding = Some(grounding.into());
        self
    }

    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningEntry {
    pub id: String,
    #[serde(default)]
    pub summary: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub call_id: String,
    pub tool_name: String,
    /// Raw argument JSON as streamed so far.
    #[serde(default)]
    pub arguments: String,
    #[serde(default)]
    pub status: EntryStatus,
}

/// A batch of tool calls emitted together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallsEntry {
    pub id: String,
    pub calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutputEntry {
    pub id: String,
    pub call_id: String,
    pub tool_name: String,
    pub segment: Segment,
    #[serde(default)]
    pub status: EntryStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEntry {
    pub id: String,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub status: EntryStatus,
}

/// One item in a transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entry {
    Prompt(PromptEntry),
    Reasoning(ReasoningEntry),
    ToolCalls(ToolCallsEntry),
    ToolOutput(ToolOutputEntry),
    Response(ResponseEntry),
}

impl Entry {
    pub fn id(&self) -> &str {
        match self {
            Entry::Prompt(e) => &e.id,
            Entry::Reasoning(e) => &e.id,
            Entry::ToolCalls(e) => &e.id,
            Entry::ToolOutput(e) => &e.id,
            Entry::Response(e) => &e.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Entry::Prompt(_) => "prompt",
            Entry::Reasoning(_) => "reasoning",
            Entry::ToolCalls(_) => "tool_calls",
            Entry::ToolOutput(_) => "tool_output",
            Entry::Response(_) => "response",
        }
    }
}

impl From<PromptEntry> for Entry {
    fn from(entry: PromptEntry) -> Self {
        Entry::Prompt(entry)
    }
}

impl From<ToolOutputEntry> for Entry {
    fn from(entry: ToolOutputEntry) -> Self {
        Entry::ToolOutput(entry)
    }
}

/// Ordered, ID-addressed log of entries.
///
/// Keeps an ID index alongside the entries so lookups and upserts are O(1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Entry>", into = "Vec<Entry>")]
pub struct Transcript {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    ///
    /// IDs are unique within a transcript, so an entry whose ID is already
    /// present replaces the existing one instead.
    pub fn append(&mut self, entry: Entry) {
        if self.index.contains_key(entry.id()) {
            warn!(id = entry.id(), kind = entry.kind(), "Duplicate entry id on append, replacing");
        }
        self.upsert(entry);
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = Entry>) {
        for entry in entries {
            self.append(entry);
        }
    }

    /// Replaces the entry with the same ID in place, or appends it.
    ///
    /// Returns the position the entry now occupies.
    pub fn upsert(&mut self, entry: Entry) -> usize {
        if let Some(&pos) = self.index.get(entry.id()) {
            self.entries[pos] = entry;
            return pos;
        }
        let pos = self.entries.len();
        self.index.insert(entry.id().to_string(), pos);
        self.entries.push(entry);
        pos
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn get(&self, pos: usize) -> Option<&Entry> {
        self.entries.get(pos)
    }

    pub fn entry(&self, id: &str) -> Option<&Entry> {
        self.position(id).and_then(|pos| self.entries.get(pos))
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PartialEq for Transcript {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl From<Vec<Entry>> for Transcript {
    fn from(entries: Vec<Entry>) -> Self {
        let mut transcript = Transcript::new();
        transcript.extend(entries);
        transcript
    }
}

impl From<Transcript> for Vec<Entry> {
    fn from(transcript: Transcript) -> Self {
        transcript.entries
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Generates a fresh entry or segment ID.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(id: &str, text: &str, status: EntryStatus) -> Entry {
        Entry::Response(ResponseEntry {
            id: id.to_string(),
            segments: vec![Segment::Text {
                id: format!("{id}-seg"),
                text: text.to_string(),
            }],
            status,
        })
    }

    fn reasoning(id: &str, lines: &[&str]) -> Entry {
        Entry::Reasoning(ReasoningEntry {
            id: id.to_string(),
            summary: lines.iter().map(|s| (*s).to_string()).collect(),
        })
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut transcript = Transcript::new();
        transcript.append(reasoning("r1", &["Thinking"]));
        transcript.append(response("a", "Hel", EntryStatus::InProgress));
        transcript.append(reasoning("r2", &[]));

        let pos = transcript.upsert(response("a", "Hello", EntryStatus::Completed));

        assert_eq!(pos, 1);
        assert_eq!(transcript.len(), 3);
        assert_eq!(
            transcript.entry("a"),
            Some(&response("a", "Hello", EntryStatus::Completed))
        );
        let ids: Vec<&str> = transcript.iter().map(Entry::id).collect();
        assert_eq!(ids, vec!["r1", "a", "r2"]);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut transcript = Transcript::new();
        transcript.append(reasoning("r1", &["a"]));
        let entry = response("resp", "4", EntryStatus::Completed);

        transcript.upsert(entry.clone());
        let once = transcript.clone();
        transcript.upsert(entry);

        assert_eq!(transcript, once);
        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn test_upsert_appends_unknown_id() {
        let mut transcript = Transcript::new();
        assert!(transcript.is_empty());
        let pos = transcript.upsert(reasoning("r1", &[]));
        assert_eq!(pos, 0);
        assert_eq!(transcript.position("r1"), Some(0));
        assert_eq!(transcript.position("missing"), None);
    }

    #[test]
    fn test_append_duplicate_id_keeps_ids_unique() {
        let mut transcript = Transcript::new();
        transcript.append(reasoning("r1", &["first"]));
        transcript.append(reasoning("r1", &["second"]));
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.get(0), Some(&reasoning("r1", &["second"])));
    }

    #[test]
    fn test_serde_rebuilds_index() {
        let mut transcript = Transcript::new();
        transcript.append(Entry::Prompt(PromptEntry::new("2+2?")));
        transcript.append(response("resp", "4", EntryStatus::Completed));

        let json = serde_json::to_string(&transcript).unwrap();
        let restored: Transcript = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, transcript);
        assert_eq!(restored.position("resp"), Some(1));
    }

    #[test]
    fn test_entry_wire_shape() {
        let entry: Entry = serde_json::from_str(
            r#"{"type":"tool_calls","id":"tc","calls":[{"id":"c1","call_id":"call_1","tool_name":"get_weather","arguments":"{\"location\":"}]}"#,
        )
        .unwrap();
        let Entry::ToolCalls(batch) = entry else {
            panic!("expected tool calls");
        };
        assert_eq!(batch.calls[0].status, EntryStatus::InProgress);
        assert_eq!(batch.calls[0].arguments, "{\"location\":");
    }
}
