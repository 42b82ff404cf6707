//! Normalizes HTTP statuses, stream error events and transport failures
//! into [`GenerationError`].

use serde::Deserialize;
use serde_json::Value;
use strand_types::{GenerationError, ProviderErrorCategory, ProviderFailure, RequestFailure};

/// Provider-specific status mapping, consulted before the generic table.
///
/// Never consulted for HTTP 408, which always maps to a network failure.
pub trait StatusOverride: Send + Sync {
    fn classify(&self, status: u16, body: &str) -> Option<GenerationError>;
}

/// Generic status table. `None` means the status is not a provider error.
pub fn status_category(status: u16) -> Option<ProviderErrorCategory> {
    match status {
        408 => None,
        401 => Some(ProviderErrorCategory::Authentication),
        403 => Some(ProviderErrorCategory::PermissionDenied),
        404 => Some(ProviderErrorCategory::ResourceMissing),
        // 400, 409, 422 and 429 along with every other client error
        400..=499 => Some(ProviderErrorCategory::RequestInvalid),
        500..=599 => Some(ProviderErrorCategory::Server),
        _ => Some(ProviderErrorCategory::Unknown),
    }
}

/// Maps a non-success HTTP status and its body preview to an error.
pub fn map_status(
    status: u16,
    body: &str,
    status_override: Option<&dyn StatusOverride>,
) -> GenerationError {
    if status == 408 {
        return GenerationError::network("HTTP 408: request timed out");
    }
    if let Some(err) = status_override.and_then(|hook| hook.classify(status, body)) {
        return err;
    }

    let category = status_category(status).unwrap_or(ProviderErrorCategory::Unknown);
    let fields = ErrorFields::parse(body);
    let message = fields.message.clone().unwrap_or_else(|| {
        let first_line = body.lines().next().unwrap_or("").trim();
        if first_line.is_empty() {
            format!("request failed with status {status}")
        } else {
            first_line.to_string()
        }
    });
    let details = (!body.trim().is_empty()).then(|| body.to_string());

    GenerationError::ProviderError(
        ProviderFailure::new(category, message)
            .with_status(status)
            .with_code(fields.code)
            .with_type(fields.error_type)
            .with_parameter(fields.parameter)
            .with_details(details),
    )
}

/// Maps a mid-stream `error` event payload to a provider error.
pub fn map_stream_error(data: &str) -> GenerationError {
    let fields = ErrorFields::parse(data);
    let category = classify_stream_error(
        fields.code.as_deref(),
        fields.error_type.as_deref(),
        fields.message.as_deref().unwrap_or(data),
    );
    let message = fields.message.clone().unwrap_or_else(|| {
        if data.trim().is_empty() {
            "stream reported an error".to_string()
        } else {
            data.trim().to_string()
        }
    });
    GenerationError::ProviderError(
        ProviderFailure::new(category, message)
            .with_code(fields.code)
            .with_type(fields.error_type)
            .with_parameter(fields.parameter),
    )
}

const AUTH_KEYWORDS: &[&str] = &[
    "unauthorized",
    "unauthenticated",
    "authentication",
    "api key",
    "api_key",
    "invalid token",
    "expired token",
    "credentials",
];
const PERMISSION_KEYWORDS: &[&str] = &[
    "permission",
    "forbidden",
    "not allowed",
    "access denied",
];
const MISSING_KEYWORDS: &[&str] = &["not found", "not_found", "does not exist", "no such"];
const INVALID_KEYWORDS: &[&str] = &[
    "invalid",
    "malformed",
    "bad request",
    "rate limit",
    "rate_limit",
    "too many",
    "too long",
    "exceed",
    "unsupported",
];
const SERVER_KEYWORDS: &[&str] = &[
    "server",
    "internal",
    "overloaded",
    "unavailable",
    "temporarily",
];

fn category_for_code(code: &str) -> Option<ProviderErrorCategory> {
    let category = match code.to_ascii_lowercase().as_str() {
        "authentication_error" | "invalid_api_key" | "unauthorized" | "unauthenticated" => {
            ProviderErrorCategory::Authentication
        }
        "permission_error" | "permission_denied" | "forbidden" => {
            ProviderErrorCategory::PermissionDenied
        }
        "not_found" | "not_found_error" | "model_not_found" => {
            ProviderErrorCategory::ResourceMissing
        }
        "invalid_request" | "invalid_request_error" | "rate_limit_error"
        | "rate_limit_exceeded" | "context_length_exceeded" | "invalid_argument" => {
            ProviderErrorCategory::RequestInvalid
        }
        "server_error" | "internal_error" | "internal_server_error" | "api_error"
        | "overloaded_error" | "service_unavailable" => ProviderErrorCategory::Server,
        _ => return None,
    };
    Some(category)
}

/// Classifies a stream error event.
///
/// Structured `code` and `type` strings win; otherwise the message is
/// matched case-insensitively against keyword sets.
pub fn classify_stream_error(
    code: Option<&str>,
    error_type: Option<&str>,
    message: &str,
) -> ProviderErrorCategory {
    if let Some(category) = code.and_then(category_for_code) {
        return category;
    }
    if let Some(category) = error_type.and_then(category_for_code) {
        return category;
    }

    let message = message.to_ascii_lowercase();
    let sets = [
        (AUTH_KEYWORDS, ProviderErrorCategory::Authentication),
        (PERMISSION_KEYWORDS, ProviderErrorCategory::PermissionDenied),
        (MISSING_KEYWORDS, ProviderErrorCategory::ResourceMissing),
        (INVALID_KEYWORDS, ProviderErrorCategory::RequestInvalid),
        (SERVER_KEYWORDS, ProviderErrorCategory::Server),
    ];
    sets.into_iter()
        .find(|(keywords, _)| keywords.iter().any(|keyword| message.contains(keyword)))
        .map_or(ProviderErrorCategory::Unknown, |(_, category)| category)
}

/// Classifies a reqwest error raised before streaming started.
pub fn classify_reqwest_error(e: &reqwest::Error) -> GenerationError {
    if e.is_timeout() {
        GenerationError::network(format!("Request timed out: {e}"))
    } else if e.is_connect() {
        GenerationError::network(format!("Connection failed: {e}"))
    } else if e.is_builder() {
        GenerationError::invalid_config(format!("Invalid request: {e}"))
    } else if e.is_decode() || e.is_body() {
        GenerationError::request(RequestFailure::DecodingFailure, format!("Body error: {e}"))
    } else if e.is_request() {
        GenerationError::network(format!("Request error: {e}"))
    } else {
        GenerationError::request(RequestFailure::InvalidResponse, format!("Network error: {e}"))
    }
}

/// Error fields found in a provider error body.
#[derive(Debug, Default, PartialEq)]
struct ErrorFields {
    message: Option<String>,
    code: Option<String>,
    error_type: Option<String>,
    parameter: Option<String>,
}

#[derive(Deserialize)]
struct RawFields {
    message: Option<String>,
    code: Option<Value>,
    #[serde(rename = "type")]
    error_type: Option<String>,
    #[serde(alias = "parameter")]
    param: Option<String>,
}

impl ErrorFields {
    /// Accepts `{"error": {...}}`, a bare `{...}`, or `{"error": "message"}`.
    fn parse(body: &str) -> Self {
        let Ok(value) = serde_json::from_str::<Value>(body) else {
            return Self::default();
        };
        let inner = match value.get("error") {
            Some(Value::String(message)) => {
                return Self {
                    message: Some(message.clone()),
                    ..Self::default()
                };
            }
            Some(inner @ Value::Object(_)) => inner.clone(),
            _ => value.clone(),
        };
        let Ok(raw) = serde_json::from_value::<RawFields>(inner) else {
            return Self::default();
        };
        Self {
            message: raw.message.filter(|m| !m.trim().is_empty()),
            code: raw.code.and_then(|code| match code {
                Value::String(code) => Some(code),
                Value::Number(code) => Some(code.to_string()),
                _ => None,
            }),
            error_type: raw.error_type,
            parameter: raw.param,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(err: &GenerationError) -> Option<ProviderErrorCategory> {
        err.provider_category()
    }

    #[test]
    fn test_status_table() {
        let cases = [
            (401, ProviderErrorCategory::Authentication),
            (403, ProviderErrorCategory::PermissionDenied),
            (404, ProviderErrorCategory::ResourceMissing),
            (400, ProviderErrorCategory::RequestInvalid),
            (409, ProviderErrorCategory::RequestInvalid),
            (422, ProviderErrorCategory::RequestInvalid),
            (429, ProviderErrorCategory::RequestInvalid),
            (418, ProviderErrorCategory::RequestInvalid),
            (500, ProviderErrorCategory::Server),
            (503, ProviderErrorCategory::Server),
            (302, ProviderErrorCategory::Unknown),
        ];
        for (status, expected) in cases {
            assert_eq!(category(&map_status(status, "", None)), Some(expected), "{status}");
        }
    }

    #[test]
    fn test_408_is_network_failure() {
        let err = map_status(408, "", None);
        assert!(matches!(
            err,
            GenerationError::RequestFailed {
                reason: RequestFailure::NetworkFailure,
                ..
            }
        ));
    }

    struct Everything;

    impl StatusOverride for Everything {
        fn classify(&self, status: u16, _body: &str) -> Option<GenerationError> {
            Some(GenerationError::Unknown {
                message: format!("override {status}"),
            })
        }
    }

    #[test]
    fn test_override_skipped_for_408() {
        let hook = Everything;
        assert!(matches!(
            map_status(500, "", Some(&hook)),
            GenerationError::Unknown { ref message } if message == "override 500"
        ));
        assert!(matches!(
            map_status(408, "", Some(&hook)),
            GenerationError::RequestFailed { .. }
        ));
    }

    #[test]
    fn test_status_body_fields_are_extracted() {
        let body = r#"{"error":{"message":"max_tokens too large","type":"invalid_request_error","param":"max_tokens","code":"too_large"}}"#;
        let GenerationError::ProviderError(failure) = map_status(400, body, None) else {
            panic!("expected provider error");
        };
        assert_eq!(failure.message, "max_tokens too large");
        assert_eq!(failure.status_code, Some(400));
        assert_eq!(failure.error_type.as_deref(), Some("invalid_request_error"));
        assert_eq!(failure.parameter.as_deref(), Some("max_tokens"));
        assert_eq!(failure.code.as_deref(), Some("too_large"));
        assert_eq!(failure.details.as_deref(), Some(body));
    }

    #[test]
    fn test_plain_text_body_becomes_message() {
        let GenerationError::ProviderError(failure) = map_status(502, "Bad Gateway\n<html>", None)
        else {
            panic!("expected provider error");
        };
        assert_eq!(failure.message, "Bad Gateway");
        assert_eq!(failure.category, ProviderErrorCategory::Server);
    }

    #[test]
    fn test_stream_error_prefers_code() {
        assert_eq!(
            classify_stream_error(Some("overloaded_error"), None, "invalid api key"),
            ProviderErrorCategory::Server
        );
        assert_eq!(
            classify_stream_error(Some("weird"), Some("permission_error"), ""),
            ProviderErrorCategory::PermissionDenied
        );
    }

    #[test]
    fn test_stream_error_keyword_fallback() {
        let cases = [
            ("Invalid API key provided", ProviderErrorCategory::Authentication),
            ("You are FORBIDDEN from this model", ProviderErrorCategory::PermissionDenied),
            ("model gpt-x does not exist", ProviderErrorCategory::ResourceMissing),
            ("Rate limit reached", ProviderErrorCategory::RequestInvalid),
            ("The server is overloaded", ProviderErrorCategory::Server),
            ("something odd happened", ProviderErrorCategory::Unknown),
        ];
        for (message, expected) in cases {
            assert_eq!(classify_stream_error(None, None, message), expected, "{message}");
        }
    }

    #[test]
    fn test_map_stream_error_payload() {
        let err = map_stream_error(r#"{"error":{"type":"authentication_error","message":"bad key"}}"#);
        let GenerationError::ProviderError(failure) = err else {
            panic!("expected provider error");
        };
        assert_eq!(failure.category, ProviderErrorCategory::Authentication);
        assert_eq!(failure.message, "bad key");
        assert_eq!(failure.status_code, None);

        let err = map_stream_error("upstream exploded: internal error");
        assert_eq!(category(&err), Some(ProviderErrorCategory::Server));
    }
}
