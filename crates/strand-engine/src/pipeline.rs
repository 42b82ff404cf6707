//! Streaming update pipeline.
//!
//! A [`Turn`] consumes decoded transport events, applies them to a
//! turn-local transcript and to the owning session, and yields throttled
//! snapshots. The throttle is latest-wins: events that land inside one
//! interval collapse into the next emitted snapshot and nothing queues up.
//!
//! Lifecycle: `Idle → Streaming → {Completed | Failed | Cancelled}`.

use std::fmt;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use strand_providers::{EventAdapter, SseEvent, TurnUpdate};
use strand_types::{GenerationError, ResponseContent, TokenUsage, Transcript};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::resolve::DecodedTranscript;
use crate::schema::SchemaTypes;
use crate::session::Session;

pub const DEFAULT_EMIT_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Minimum spacing between snapshots. Zero emits on every event.
    pub emit_interval: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            emit_interval: DEFAULT_EMIT_INTERVAL,
        }
    }
}

pub type EventSource = BoxStream<'static, Result<SseEvent, GenerationError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl TurnState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Point-in-time view of a streaming turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<K: SchemaTypes, C: ResponseContent> {
    pub content: Option<C::Projection>,
    pub transcript: DecodedTranscript<K>,
    pub usage: TokenUsage,
}

/// Settled result of a completed turn.
#[derive(Debug, Clone)]
pub struct Response<K: SchemaTypes, C> {
    pub content: C,
    pub transcript: DecodedTranscript<K>,
    /// The entries this turn produced, undecoded.
    pub raw: Transcript,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone)]
pub enum TurnOutcome<K: SchemaTypes, C> {
    Completed(Response<K, C>),
    /// The turn was cancelled. Carries whatever it had produced so far.
    Cancelled { transcript: Transcript },
}

enum Step {
    Event(Result<SseEvent, GenerationError>),
    End,
    Cancelled,
}

/// One streaming turn against a session.
///
/// Holding the session mutably for the whole turn keeps a single writer per
/// session.
pub struct Turn<'s, K: SchemaTypes, C: ResponseContent> {
    session: &'s mut Session<K>,
    events: Option<EventSource>,
    adapter: Box<dyn EventAdapter>,
    transcript: Transcript,
    usage: TokenUsage,
    cancel: CancellationToken,
    interval: Duration,
    deadline: Instant,
    state: TurnState,
    content: Option<C>,
    /// Error seen on the stream, held back until the settled snapshot is out.
    pending: Option<GenerationError>,
    error: Option<GenerationError>,
}

impl<K: SchemaTypes, C: ResponseContent> fmt::Debug for Turn<'_, K, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Turn")
            .field("state", &self.state)
            .field("entries", &self.transcript.len())
            .field("usage", &self.usage)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl<'s, K: SchemaTypes, C: ResponseContent> Turn<'s, K, C> {
    pub(crate) fn new(
        session: &'s mut Session<K>,
        events: EventSource,
        adapter: Box<dyn EventAdapter>,
        cancel: CancellationToken,
    ) -> Self {
        let interval = session.options().emit_interval;
        Self {
            session,
            events: Some(events),
            adapter,
            transcript: Transcript::new(),
            usage: TokenUsage::default(),
            cancel,
            interval,
            deadline: Instant::now() + interval,
            state: TurnState::Idle,
            content: None,
            pending: None,
            error: None,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Entries produced by this turn so far.
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A handle that cancels this turn from another task.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Resolves the turn-local transcript into a snapshot.
    pub fn snapshot(&self) -> Result<Snapshot<K, C>, GenerationError> {
        Ok(Snapshot {
            content: C::project(&self.transcript),
            transcript: self.session.schema().resolve(&self.transcript)?,
            usage: self.usage,
        })
    }

    /// Waits for the next snapshot.
    ///
    /// Returns `None` once the turn is over. The last item before that is
    /// either the settled snapshot or the error that ended the turn; a
    /// stream error is preceded by a snapshot of everything applied so far.
    /// Cancellation ends the sequence without an item; check
    /// [`Turn::state`] to tell it apart from completion.
    pub async fn next(&mut self) -> Option<Result<Snapshot<K, C>, GenerationError>> {
        match self.state {
            TurnState::Idle => self.state = TurnState::Streaming,
            TurnState::Streaming => {
                if let Some(error) = self.pending.take() {
                    return Some(Err(self.fail(error)));
                }
            }
            TurnState::Completed => {
                self.drain().await;
                return None;
            }
            TurnState::Failed | TurnState::Cancelled => return None,
        }

        loop {
            let step = match self.events.as_mut() {
                None => Step::End,
                Some(events) => tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => Step::Cancelled,
                    item = events.next() => item.map_or(Step::End, Step::Event),
                },
            };
            // A cancelled source just stops, so look again before settling.
            if self.cancel.is_cancelled() {
                self.mark_cancelled();
                return None;
            }

            let event = match step {
                Step::Cancelled => {
                    self.mark_cancelled();
                    return None;
                }
                Step::End => {
                    self.events = None;
                    return Some(self.settle());
                }
                Step::Event(Err(error)) => return Some(self.settle_on_error(error)),
                Step::Event(Ok(event)) => event,
            };

            let updates = match self.adapter.decode(&event) {
                Ok(updates) => updates,
                Err(error) => return Some(self.settle_on_error(error)),
            };
            if updates.is_empty() {
                continue;
            }
            for update in updates {
                self.apply(update);
            }
            self.session.publish();

            if C::STRUCTURED_TYPE.is_some() && C::settled(&self.transcript) {
                debug!(
                    type_name = C::STRUCTURED_TYPE.unwrap_or_default(),
                    "Structured response final, settling early"
                );
                return Some(self.settle());
            }

            let now = Instant::now();
            if now < self.deadline {
                trace!("Snapshot throttled");
                continue;
            }
            self.deadline = now + self.interval;
            return Some(self.snapshot().map_err(|error| self.fail(error)));
        }
    }

    /// Drives the turn to its end and returns the outcome.
    ///
    /// Remaining events are still applied after an early structured settle
    /// so usage is fully accounted.
    pub async fn finish(mut self) -> Result<TurnOutcome<K, C>, GenerationError> {
        while let Some(item) = self.next().await {
            item?;
        }
        match self.state {
            TurnState::Cancelled => Ok(TurnOutcome::Cancelled {
                transcript: self.transcript,
            }),
            TurnState::Failed => Err(self.error.take().unwrap_or_else(|| {
                GenerationError::Unknown {
                    message: "turn failed".to_string(),
                }
            })),
            TurnState::Completed => {
                let content = self.content.take().ok_or_else(|| GenerationError::Unknown {
                    message: "turn completed without content".to_string(),
                })?;
                Ok(TurnOutcome::Completed(Response {
                    content,
                    transcript: self.session.schema().resolve(&self.transcript)?,
                    raw: self.transcript,
                    usage: self.usage,
                }))
            }
            TurnState::Idle | TurnState::Streaming => Err(GenerationError::Unknown {
                message: "turn ended while still streaming".to_string(),
            }),
        }
    }

    /// Dual-write: the turn-local copy and the session see every update.
    fn apply(&mut self, update: TurnUpdate) {
        match update {
            TurnUpdate::Entry(entry) => {
                self.transcript.upsert(entry.clone());
                self.session.upsert(entry);
            }
            TurnUpdate::Usage(usage) => {
                self.usage += usage;
                self.session.add_usage(usage);
            }
        }
    }

    fn settle(&mut self) -> Result<Snapshot<K, C>, GenerationError> {
        let content = match C::extract(&self.transcript) {
            Ok(content) => content,
            Err(error) => return Err(self.fail(error)),
        };
        let snapshot = match self.snapshot() {
            Ok(snapshot) => snapshot,
            Err(error) => return Err(self.fail(error)),
        };
        self.content = Some(content);
        self.state = TurnState::Completed;
        Ok(snapshot)
    }

    /// Emits the state reached before a stream error; the error follows on
    /// the next call.
    fn settle_on_error(
        &mut self,
        error: GenerationError,
    ) -> Result<Snapshot<K, C>, GenerationError> {
        self.events = None;
        match self.snapshot() {
            Ok(snapshot) => {
                self.pending = Some(error);
                Ok(snapshot)
            }
            Err(resolve_error) => {
                debug!(%resolve_error, "No snapshot before the stream error");
                Err(self.fail(error))
            }
        }
    }

    /// Applies whatever the source still delivers without emitting.
    async fn drain(&mut self) {
        let Some(mut events) = self.events.take() else {
            return;
        };
        loop {
            let item = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                item = events.next() => item,
            };
            let Some(item) = item else {
                break;
            };
            let updates = match item.and_then(|event| self.adapter.decode(&event)) {
                Ok(updates) => updates,
                Err(error) => {
                    debug!(%error, "Ignoring error after the response settled");
                    break;
                }
            };
            for update in updates {
                self.apply(update);
            }
            self.session.publish();
        }
    }

    fn fail(&mut self, error: GenerationError) -> GenerationError {
        debug!(%error, "Turn failed");
        self.state = TurnState::Failed;
        self.events = None;
        self.error = Some(error.clone());
        error
    }

    fn mark_cancelled(&mut self) {
        debug!(entries = self.transcript.len(), "Turn cancelled");
        self.state = TurnState::Cancelled;
        self.events = None;
    }
}
