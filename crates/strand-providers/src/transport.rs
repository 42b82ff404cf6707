//! Streaming HTTP transport for one long-lived SSE request.
//!
//! [`EventStreamClient::open`] sends the request, applies the auth
//! interceptor (with a single retry on 401), maps bad statuses to
//! [`GenerationError`], and hands the response body to a producer task that
//! parses SSE frames into an unbounded channel. The consumer side is an
//! [`EventStream`]; dropping or cancelling it stops the producer and
//! releases the connection.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{Stream, StreamExt};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Response, StatusCode};
use serde_json::Value;
use strand_types::GenerationError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

use crate::error_map::{StatusOverride, classify_reqwest_error, map_status};
use crate::sse::{SseEvent, SseParser};

/// User-Agent sent with every request.
pub const USER_AGENT: &str = concat!("strand/", env!("CARGO_PKG_VERSION"));

/// Default cap on how much of an error body is read for diagnostics.
pub const DEFAULT_BODY_PREVIEW_LIMIT: usize = 4096;

/// Appended to a body preview that hit the cap.
pub const TRUNCATION_MARKER: &str = " [truncated]";

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub base_url: Url,
    pub body_preview_limit: usize,
    /// Time allowed until response headers arrive. `None` waits forever.
    pub request_timeout: Option<Duration>,
}

impl TransportOptions {
    pub fn new(base_url: &str) -> Result<Self, GenerationError> {
        let base_url = Url::parse(base_url).map_err(|e| {
            GenerationError::invalid_config(format!("Invalid base URL {base_url}: {e}"))
        })?;
        Ok(Self {
            base_url,
            body_preview_limit: DEFAULT_BODY_PREVIEW_LIMIT,
            request_timeout: None,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, GenerationError> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined)
            .map_err(|e| GenerationError::invalid_config(format!("Invalid endpoint {joined}: {e}")))
    }
}

/// The request to open an event stream with.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub path: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl StreamRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Prepares outgoing requests and reacts to 401 responses.
///
/// Authorization context travels with the client; nothing is read from
/// ambient state.
pub trait AuthInterceptor: Send + Sync {
    /// Adds credentials to a request about to be sent.
    fn prepare<'a>(
        &'a self,
        request: &'a mut StreamRequest,
    ) -> BoxFuture<'a, Result<(), GenerationError>>;

    /// Called once on HTTP 401. Returning `true` re-prepares and retries the
    /// request exactly once.
    fn on_unauthorized<'a>(
        &'a self,
        response: &'a Response,
        request: &'a StreamRequest,
    ) -> BoxFuture<'a, bool>;
}

/// Static bearer token. Never retries.
#[derive(Clone)]
pub struct BearerAuth {
    token: String,
}

impl BearerAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerAuth").field("token", &"<redacted>").finish()
    }
}

impl AuthInterceptor for BearerAuth {
    fn prepare<'a>(
        &'a self,
        request: &'a mut StreamRequest,
    ) -> BoxFuture<'a, Result<(), GenerationError>> {
        Box::pin(async move {
            let value = HeaderValue::from_str(&format!("Bearer {}", self.token)).map_err(|e| {
                GenerationError::invalid_config(format!("Invalid API key header: {e}"))
            })?;
            request.headers.insert(AUTHORIZATION, value);
            Ok(())
        })
    }

    fn on_unauthorized<'a>(
        &'a self,
        _response: &'a Response,
        _request: &'a StreamRequest,
    ) -> BoxFuture<'a, bool> {
        Box::pin(async { false })
    }
}

/// HTTP client that opens SSE streams.
#[derive(Clone)]
pub struct EventStreamClient {
    http: reqwest::Client,
    options: TransportOptions,
    auth: Option<Arc<dyn AuthInterceptor>>,
    status_override: Option<Arc<dyn StatusOverride>>,
}

impl EventStreamClient {
    pub fn new(options: TransportOptions) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                GenerationError::invalid_config(format!("Failed to build HTTP client: {e}"))
            })?;
        Ok(Self {
            http,
            options,
            auth: None,
            status_override: None,
        })
    }

    #[must_use]
    pub fn with_auth(mut self, auth: Arc<dyn AuthInterceptor>) -> Self {
        self.auth = Some(auth);
        self
    }

    #[must_use]
    pub fn with_status_override(mut self, hook: Arc<dyn StatusOverride>) -> Self {
        self.status_override = Some(hook);
        self
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    pub async fn open(&self, request: StreamRequest) -> Result<EventStream, GenerationError> {
        self.open_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Opens the stream, giving up early when `cancel` fires.
    ///
    /// A cancelled open yields an already-finished stream rather than an
    /// error.
    pub async fn open_with_cancel(
        &self,
        request: StreamRequest,
        cancel: &CancellationToken,
    ) -> Result<EventStream, GenerationError> {
        let token = cancel.child_token();
        let response = tokio::select! {
            biased;
            () = token.cancelled() => {
                debug!(path = %request.path, "Stream cancelled before the response arrived");
                return Ok(EventStream::finished(token));
            }
            response = self.connect(&request) => response?,
        };
        Ok(EventStream::spawn(response.bytes_stream(), token))
    }

    async fn connect(&self, request: &StreamRequest) -> Result<Response, GenerationError> {
        let mut response = self.send(request).await?;

        if response.status() == StatusCode::UNAUTHORIZED
            && let Some(auth) = &self.auth
            && auth.on_unauthorized(&response, request).await
        {
            debug!(path = %request.path, "Retrying once after 401");
            response = self.send(request).await?;
        }

        let status = response.status();
        if !status.is_success() {
            let preview = read_body_preview(response, self.options.body_preview_limit).await;
            return Err(map_status(
                status.as_u16(),
                &preview,
                self.status_override.as_deref(),
            ));
        }
        Ok(response)
    }

    async fn send(&self, request: &StreamRequest) -> Result<Response, GenerationError> {
        let mut prepared = request.clone();
        if let Some(auth) = &self.auth {
            auth.prepare(&mut prepared).await?;
        }
        let url = self.options.endpoint(&prepared.path)?;
        prepared
            .headers
            .insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        let mut builder = self
            .http
            .request(prepared.method, url)
            .headers(prepared.headers);
        if let Some(body) = &prepared.body {
            builder = builder.json(body);
        }

        let sent = match self.options.request_timeout {
            Some(limit) => tokio::time::timeout(limit, builder.send())
                .await
                .map_err(|elapsed| {
                    GenerationError::network(format!("Request timed out ({elapsed})"))
                })?,
            None => builder.send().await,
        };
        sent.map_err(|e| classify_reqwest_error(&e))
    }
}

/// Reads at most `limit` bytes of an error body without draining the rest.
async fn read_body_preview(mut response: Response, limit: usize) -> String {
    let mut buf = Vec::new();
    let mut truncated = false;
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let room = limit.saturating_sub(buf.len());
                if chunk.len() > room {
                    buf.extend_from_slice(&chunk[..room]);
                    truncated = true;
                    break;
                }
                buf.extend_from_slice(&chunk);
            }
            Ok(None) => break,
            Err(e) => {
                trace!(error = %e, "Failed to read error body");
                break;
            }
        }
    }
    preview_text(&buf, truncated)
}

/// Decodes a capped body, dropping a multi-byte character cut by the cap.
pub fn preview_text(bytes: &[u8], truncated: bool) -> String {
    let mut text = match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(e) if e.error_len().is_none() => {
            String::from_utf8_lossy(&bytes[..e.valid_up_to()]).into_owned()
        }
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    };
    if truncated {
        text.push_str(TRUNCATION_MARKER);
    }
    text
}

type EventResult = Result<SseEvent, GenerationError>;

/// Consumer end of a streaming response.
///
/// Buffering is unbounded: the producer never waits on a slow consumer.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<EventResult>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl EventStream {
    /// Spawns a producer that parses `bytes` into events.
    pub fn spawn<S, E>(bytes: S, cancel: CancellationToken) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(produce(bytes, tx, cancel.clone()));
        Self {
            rx,
            cancel,
            task: Some(task),
        }
    }

    fn finished(cancel: CancellationToken) -> Self {
        let (_, rx) = mpsc::unbounded_channel();
        Self {
            rx,
            cancel,
            task: None,
        }
    }

    /// Stops the producer. No further events are yielded.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Stream for EventStream {
    type Item = EventResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn produce<S, E>(bytes: S, tx: mpsc::UnboundedSender<EventResult>, cancel: CancellationToken)
where
    S: Stream<Item = Result<Bytes, E>>,
    E: fmt::Display,
{
    let mut bytes = std::pin::pin!(bytes);
    let mut parser = SseParser::new();
    loop {
        let chunk = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Event stream cancelled, releasing connection");
                return;
            }
            chunk = bytes.next() => chunk,
        };
        match chunk {
            Some(Ok(chunk)) => parser.feed(&chunk),
            Some(Err(e)) => {
                let _ = tx.send(Err(GenerationError::stream_transport(format!(
                    "Stream read failed: {e}"
                ))));
                return;
            }
            None => {
                parser.finish();
                while let Some(event) = parser.next_event() {
                    let _ = tx.send(Ok(event));
                }
                debug!("Event stream finished");
                return;
            }
        }
        while let Some(event) = parser.next_event() {
            if tx.send(Ok(event)).is_err() {
                debug!("Event consumer dropped, stopping producer");
                return;
            }
        }
    }
}
