//! Long-lived conversation state.
//!
//! A [`Session`] owns the cumulative transcript and token usage across
//! turns. Turns write into it while they stream; observers follow along via
//! [`Session::subscribe`].

use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use strand_providers::{
    EntryEventAdapter, EventAdapter, EventStreamClient, SseEvent, StreamRequest,
};
use strand_types::{Entry, GenerationError, PromptEntry, ResponseContent, TokenUsage, Transcript};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::pipeline::{PipelineOptions, Turn};
use crate::resolve::DecodedTranscript;
use crate::schema::{Schema, SchemaTypes};

/// What subscribers observe after every write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionView {
    pub transcript: Transcript,
    pub usage: TokenUsage,
}

pub struct Session<K: SchemaTypes> {
    schema: Arc<Schema<K>>,
    transcript: Transcript,
    usage: TokenUsage,
    options: PipelineOptions,
    updates: watch::Sender<SessionView>,
}

impl<K: SchemaTypes> std::fmt::Debug for Session<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("schema", &self.schema)
            .field("entries", &self.transcript.len())
            .field("usage", &self.usage)
            .field("options", &self.options)
            .finish()
    }
}

impl<K: SchemaTypes> Session<K> {
    pub fn new(schema: Arc<Schema<K>>, options: PipelineOptions) -> Self {
        let (updates, _) = watch::channel(SessionView::default());
        Self {
            schema,
            transcript: Transcript::new(),
            usage: TokenUsage::default(),
            options,
            updates,
        }
    }

    /// Resumes a session from an earlier transcript.
    #[must_use]
    pub fn with_transcript(mut self, transcript: Transcript) -> Self {
        self.transcript = transcript;
        self
    }

    pub fn schema(&self) -> &Schema<K> {
        &self.schema
    }

    pub fn options(&self) -> PipelineOptions {
        self.options
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Cumulative usage over every turn.
    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    /// Receives the transcript and usage after every write.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        let updates = self.updates.subscribe();
        self.publish();
        updates
    }

    pub fn resolve(&self) -> Result<DecodedTranscript<K>, GenerationError> {
        self.schema.resolve(&self.transcript)
    }

    /// Upserts an entry produced outside a turn, such as a tool output.
    pub fn record(&mut self, entry: Entry) {
        self.upsert(entry);
        self.publish();
    }

    /// Starts a turn over an already-open event source.
    ///
    /// The prompt is recorded before anything streams, so a cancelled turn
    /// still shows what was asked.
    pub fn begin_turn<C, S>(
        &mut self,
        prompt: PromptEntry,
        events: S,
        adapter: impl EventAdapter + 'static,
    ) -> Turn<'_, K, C>
    where
        C: ResponseContent,
        S: Stream<Item = Result<SseEvent, GenerationError>> + Send + 'static,
    {
        debug!(prompt_id = %prompt.id, "Starting turn");
        self.record(prompt.into());
        Turn::new(
            self,
            events.boxed(),
            Box::new(adapter),
            CancellationToken::new(),
        )
    }

    /// Records the prompt, opens `request` and starts a turn reading it with
    /// the canonical entry adapter.
    pub async fn respond<C: ResponseContent>(
        &mut self,
        client: &EventStreamClient,
        request: StreamRequest,
        prompt: PromptEntry,
    ) -> Result<Turn<'_, K, C>, GenerationError> {
        debug!(prompt_id = %prompt.id, path = %request.path, "Opening turn");
        self.record(prompt.into());
        let cancel = CancellationToken::new();
        let events = client.open_with_cancel(request, &cancel).await?;
        Ok(Turn::new(
            self,
            events.boxed(),
            Box::new(EntryEventAdapter),
            cancel,
        ))
    }

    pub(crate) fn upsert(&mut self, entry: Entry) {
        self.transcript.upsert(entry);
    }

    pub(crate) fn add_usage(&mut self, usage: TokenUsage) {
        self.usage += usage;
    }

    /// Publishes current state. Skipped while nobody listens.
    pub(crate) fn publish(&self) {
        if self.updates.receiver_count() == 0 {
            return;
        }
        self.updates.send_replace(SessionView {
            transcript: self.transcript.clone(),
            usage: self.usage,
        });
    }
}

#[cfg(test)]
mod tests {
    use strand_types::{EntryStatus, ResponseEntry, Segment, UnknownToolRun};

    use super::*;
    use crate::schema::NoGrounding;

    #[derive(Debug, Clone, PartialEq)]
    struct Plain;

    impl SchemaTypes for Plain {
        type ToolRun = UnknownToolRun;
        type Output = Segment;
        type Grounding = NoGrounding;
    }

    fn session() -> Session<Plain> {
        Session::new(
            Arc::new(Schema::builder(|run| run, |segment| segment).build()),
            PipelineOptions::default(),
        )
    }

    #[test]
    fn test_record_publishes_to_subscribers() {
        let mut session = session();
        let mut updates = session.subscribe();
        assert!(updates.borrow_and_update().transcript.is_empty());

        session.record(Entry::Response(ResponseEntry {
            id: "r1".to_string(),
            segments: vec![Segment::text("hi")],
            status: EntryStatus::Completed,
        }));

        assert!(updates.has_changed().unwrap());
        assert_eq!(updates.borrow_and_update().transcript.len(), 1);
        assert_eq!(session.resolve().unwrap().response().unwrap().text(), "hi");
    }

    #[test]
    fn test_subscribe_sees_current_state() {
        let mut session = session();
        session.record(PromptEntry::new("hello").into());
        session.add_usage(TokenUsage {
            input_tokens: 4,
            ..TokenUsage::default()
        });

        let updates = session.subscribe();
        let view = updates.borrow();
        assert_eq!(view.transcript.len(), 1);
        assert_eq!(view.usage.input_tokens, 4);
    }
}
