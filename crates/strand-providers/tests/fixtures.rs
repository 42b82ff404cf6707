//! SSE fixture helpers for integration tests.

#![allow(dead_code)]

use wiremock::ResponseTemplate;

pub const SSE_REASONING: &str = include_str!("fixtures/sse_reasoning_response.sse");

/// A reasoning entry followed by a completed text response and usage.
pub fn reasoning_sse(id: &str, reasoning: &str, text: &str) -> String {
    SSE_REASONING
        .replace("{{ID}}", id)
        .replace("{{REASONING}}", &escape_json(reasoning))
        .replace("{{TEXT}}", &escape_json(text))
}

/// Wrap SSE body string in a ResponseTemplate.
pub fn sse_response(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body.to_string())
}

/// A JSON error body with the given status.
pub fn error_response(status: u16, body: &str) -> ResponseTemplate {
    ResponseTemplate::new(status)
        .insert_header("content-type", "application/json")
        .set_body_string(body.to_string())
}

/// Escape special characters for JSON string embedding.
fn escape_json(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
}
