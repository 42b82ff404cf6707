//! Transport tests against a wiremock server.
//!
//! Covers event delivery, the single 401 retry, and bad-status previews.

mod fixtures;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use fixtures::{error_response, reasoning_sse, sse_response};
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use reqwest::Response;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde_json::json;
use strand_providers::transport::TRUNCATION_MARKER;
use strand_providers::{
    AuthInterceptor, EventStreamClient, SseEvent, StreamRequest, TransportOptions,
};
use strand_types::{GenerationError, ProviderErrorCategory};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer};

/// Hands out `token-N`, bumping N on every refresh.
struct RefreshingAuth {
    refresh: bool,
    generation: AtomicUsize,
    unauthorized_calls: AtomicUsize,
}

impl RefreshingAuth {
    fn new(refresh: bool) -> Arc<Self> {
        Arc::new(Self {
            refresh,
            generation: AtomicUsize::new(0),
            unauthorized_calls: AtomicUsize::new(0),
        })
    }
}

impl AuthInterceptor for RefreshingAuth {
    fn prepare<'a>(
        &'a self,
        request: &'a mut StreamRequest,
    ) -> BoxFuture<'a, Result<(), GenerationError>> {
        Box::pin(async move {
            let token = format!("Bearer token-{}", self.generation.load(Ordering::SeqCst));
            request
                .headers
                .insert(AUTHORIZATION, HeaderValue::from_str(&token).unwrap());
            Ok(())
        })
    }

    fn on_unauthorized<'a>(
        &'a self,
        response: &'a Response,
        _request: &'a StreamRequest,
    ) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            assert_eq!(response.status().as_u16(), 401);
            self.unauthorized_calls.fetch_add(1, Ordering::SeqCst);
            if self.refresh {
                self.generation.fetch_add(1, Ordering::SeqCst);
            }
            self.refresh
        })
    }
}

fn client(server: &MockServer) -> EventStreamClient {
    let options = TransportOptions::new(&format!("{}/v1", server.uri())).unwrap();
    EventStreamClient::new(options).unwrap()
}

async fn collect(client: &EventStreamClient) -> Result<Vec<SseEvent>, GenerationError> {
    let stream = client
        .open(StreamRequest::post("/turns").json(json!({"input": "2+2?"})))
        .await?;
    stream.collect::<Vec<_>>().await.into_iter().collect()
}

#[tokio::test]
async fn test_open_delivers_parsed_events() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/turns"))
        .and(header("accept", "text/event-stream"))
        .and(body_json(json!({"input": "2+2?"})))
        .respond_with(sse_response(&reasoning_sse("t1", "Adding", "4")))
        .expect(1)
        .mount(&server)
        .await;

    let events = collect(&client(&server)).await.unwrap();

    let kinds: Vec<&str> = events.iter().map(SseEvent::kind).collect();
    assert_eq!(kinds, vec!["entry", "entry", "usage", "done"]);
    assert!(events[1].data.contains(r#""text":"4""#));
}

#[tokio::test]
async fn test_401_retries_once_when_hook_allows() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer token-0"))
        .respond_with(error_response(401, r#"{"error":{"message":"expired"}}"#))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(sse_response(&reasoning_sse("t1", "Adding", "4")))
        .expect(1)
        .mount(&server)
        .await;

    let auth = RefreshingAuth::new(true);
    let client = client(&server).with_auth(auth.clone());
    let events = collect(&client).await.unwrap();

    assert_eq!(events.len(), 4);
    assert_eq!(auth.unauthorized_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_401_not_retried_when_hook_declines() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(error_response(401, r#"{"error":{"message":"bad key"}}"#))
        .expect(1)
        .mount(&server)
        .await;

    let auth = RefreshingAuth::new(false);
    let client = client(&server).with_auth(auth.clone());
    let err = collect(&client).await.unwrap_err();

    assert_eq!(
        err.provider_category(),
        Some(ProviderErrorCategory::Authentication)
    );
    assert_eq!(auth.unauthorized_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_second_401_is_final() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(error_response(401, r#"{"error":{"message":"still bad"}}"#))
        .expect(2)
        .mount(&server)
        .await;

    let auth = RefreshingAuth::new(true);
    let client = client(&server).with_auth(auth.clone());
    let err = collect(&client).await.unwrap_err();

    let GenerationError::ProviderError(failure) = err else {
        panic!("expected provider error, got {err:?}");
    };
    assert_eq!(failure.status_code, Some(401));
    assert_eq!(failure.message, "still bad");
    assert_eq!(auth.unauthorized_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_bad_status_body_preview_is_capped() {
    let server = MockServer::start().await;
    let body = "x".repeat(10_000);
    Mock::given(method("POST"))
        .respond_with(error_response(503, &body))
        .mount(&server)
        .await;

    let mut options = TransportOptions::new(&server.uri()).unwrap();
    options.body_preview_limit = 64;
    let client = EventStreamClient::new(options).unwrap();
    let err = collect(&client).await.unwrap_err();

    let GenerationError::ProviderError(failure) = err else {
        panic!("expected provider error, got {err:?}");
    };
    assert_eq!(failure.category, ProviderErrorCategory::Server);
    let details = failure.details.unwrap();
    assert!(details.ends_with(TRUNCATION_MARKER));
    assert_eq!(details.len(), 64 + TRUNCATION_MARKER.len());
}

#[tokio::test]
async fn test_408_maps_to_network_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(error_response(408, ""))
        .mount(&server)
        .await;

    let err = collect(&client(&server)).await.unwrap_err();
    assert!(matches!(
        err,
        GenerationError::RequestFailed {
            reason: strand_types::RequestFailure::NetworkFailure,
            ..
        }
    ));
}

#[tokio::test]
async fn test_cancelled_open_yields_empty_stream() {
    let server = MockServer::start().await;
    let token = CancellationToken::new();
    token.cancel();

    let stream = client(&server)
        .open_with_cancel(StreamRequest::post("/turns"), &token)
        .await
        .unwrap();
    assert!(stream.collect::<Vec<_>>().await.is_empty());
}
