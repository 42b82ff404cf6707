//! Closed error taxonomy consumed by every layer.
//!
//! Transport, HTTP and provider failures are normalized into
//! [`GenerationError`] so callers never see a raw transport error.
//! Cancellation is not an error and has no variant here.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Why a request could not be completed before streaming started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestFailure {
    /// The request could not be built (bad URL, header, or missing credentials).
    InvalidConfig,
    /// Connection failure, timeout, or an HTTP 408.
    NetworkFailure,
    /// The server answered with something that is not an event stream.
    InvalidResponse,
    /// A response body could not be decoded.
    DecodingFailure,
}

impl fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestFailure::InvalidConfig => write!(f, "invalid_config"),
            RequestFailure::NetworkFailure => write!(f, "network_failure"),
            RequestFailure::InvalidResponse => write!(f, "invalid_response"),
            RequestFailure::DecodingFailure => write!(f, "decoding_failure"),
        }
    }
}

/// Why an already-open stream failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingFailure {
    /// The byte stream broke mid-transfer.
    TransportFailure,
    /// An event arrived that the adapter could not decode.
    DecodingFailure,
}

impl fmt::Display for StreamingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamingFailure::TransportFailure => write!(f, "transport_failure"),
            StreamingFailure::DecodingFailure => write!(f, "decoding_failure"),
        }
    }
}

/// Provider error categories derived from HTTP status or error payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorCategory {
    Authentication,
    PermissionDenied,
    ResourceMissing,
    RequestInvalid,
    Server,
    Unknown,
}

impl fmt::Display for ProviderErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderErrorCategory::Authentication => write!(f, "authentication"),
            ProviderErrorCategory::PermissionDenied => write!(f, "permission_denied"),
            ProviderErrorCategory::ResourceMissing => write!(f, "resource_missing"),
            ProviderErrorCategory::RequestInvalid => write!(f, "request_invalid"),
            ProviderErrorCategory::Server => write!(f, "server"),
            ProviderErrorCategory::Unknown => write!(f, "unknown"),
        }
    }
}

/// Structured provider failure (HTTP status or mid-stream error event).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFailure {
    /// One-line summary suitable for display
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub category: ProviderErrorCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
    /// Bounded preview of the raw error body, for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ProviderFailure {
    pub fn new(category: ProviderErrorCategory, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            category,
            status_code: None,
            error_type: None,
            parameter: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    #[must_use]
    pub fn with_code(mut self, code: Option<String>) -> Self {
        self.code = code;
        self
    }

    #[must_use]
    pub fn with_type(mut self, error_type: Option<String>) -> Self {
        self.error_type = error_type;
        self
    }

    #[must_use]
    pub fn with_parameter(mut self, parameter: Option<String>) -> Self {
        self.parameter = parameter;
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: Option<String>) -> Self {
        self.details = details;
        self
    }
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status_code, self.code.as_deref()) {
            (Some(status), _) => write!(f, "HTTP {status}: {}", self.message),
            (None, Some(code)) => write!(f, "{code}: {}", self.message),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

/// The closed set of failures a turn can end with.
#[derive(Debug, Clone)]
pub enum GenerationError {
    RequestFailed {
        reason: RequestFailure,
        message: String,
    },
    ProviderError(ProviderFailure),
    StreamingFailure {
        reason: StreamingFailure,
        message: String,
    },
    ToolExecutionFailed {
        tool_name: String,
        underlying: Arc<anyhow::Error>,
    },
    /// A structured response was expected but was absent, malformed, or not final.
    UnexpectedStructuredResponse {
        message: String,
    },
    UnsupportedToolCalled {
        tool_name: String,
    },
    ContentRefusal {
        reason: Option<String>,
    },
    Unknown {
        message: String,
    },
}

impl GenerationError {
    pub fn request(reason: RequestFailure, message: impl Into<String>) -> Self {
        GenerationError::RequestFailed {
            reason,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::request(RequestFailure::NetworkFailure, message)
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::request(RequestFailure::InvalidConfig, message)
    }

    pub fn stream_transport(message: impl Into<String>) -> Self {
        GenerationError::StreamingFailure {
            reason: StreamingFailure::TransportFailure,
            message: message.into(),
        }
    }

    pub fn stream_decoding(message: impl Into<String>) -> Self {
        GenerationError::StreamingFailure {
            reason: StreamingFailure::DecodingFailure,
            message: message.into(),
        }
    }

    pub fn tool_failed(tool_name: impl Into<String>, underlying: anyhow::Error) -> Self {
        GenerationError::ToolExecutionFailed {
            tool_name: tool_name.into(),
            underlying: Arc::new(underlying),
        }
    }

    pub fn unexpected_structured(message: impl Into<String>) -> Self {
        GenerationError::UnexpectedStructuredResponse {
            message: message.into(),
        }
    }

    /// Returns the provider category when this is a provider error.
    pub fn provider_category(&self) -> Option<ProviderErrorCategory> {
        match self {
            GenerationError::ProviderError(failure) => Some(failure.category),
            _ => None,
        }
    }
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationError::RequestFailed { reason, message } => {
                write!(f, "request failed ({reason}): {message}")
            }
            GenerationError::ProviderError(failure) => {
                write!(f, "provider error ({}): {failure}", failure.category)
            }
            GenerationError::StreamingFailure { reason, message } => {
                write!(f, "streaming failed ({reason}): {message}")
            }
            GenerationError::ToolExecutionFailed {
                tool_name,
                underlying,
            } => write!(f, "tool '{tool_name}' failed: {underlying}"),
            GenerationError::UnexpectedStructuredResponse { message } => {
                write!(f, "unexpected structured response: {message}")
            }
            GenerationError::UnsupportedToolCalled { tool_name } => {
                write!(f, "model called unsupported tool '{tool_name}'")
            }
            GenerationError::ContentRefusal { reason } => match reason {
                Some(reason) => write!(f, "model refused to respond: {reason}"),
                None => write!(f, "model refused to respond"),
            },
            GenerationError::Unknown { message } => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for GenerationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GenerationError::ToolExecutionFailed { underlying, .. } => Some(&***underlying),
            _ => None,
        }
    }
}

/// Recoverable, per-entry resolution failure.
///
/// Attached to a decoded entry instead of aborting the resolution pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryError {
    pub message: String,
}

impl EntryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for EntryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_provider_failure_display_prefers_status() {
        let failure = ProviderFailure::new(ProviderErrorCategory::Authentication, "bad key")
            .with_status(401)
            .with_code(Some("invalid_api_key".to_string()));
        assert_eq!(failure.to_string(), "HTTP 401: bad key");

        let failure = ProviderFailure::new(ProviderErrorCategory::Server, "overloaded")
            .with_code(Some("overloaded_error".to_string()));
        assert_eq!(failure.to_string(), "overloaded_error: overloaded");
    }

    #[test]
    fn test_tool_failure_keeps_name_and_source() {
        let err = GenerationError::tool_failed("get_weather", anyhow::anyhow!("timeout"));
        assert_eq!(err.to_string(), "tool 'get_weather' failed: timeout");
        assert!(err.source().is_some());
        assert!(matches!(
            err,
            GenerationError::ToolExecutionFailed { ref tool_name, .. } if tool_name == "get_weather"
        ));
    }

    #[test]
    fn test_provider_failure_serializes_type_field() {
        let failure = ProviderFailure::new(ProviderErrorCategory::RequestInvalid, "bad")
            .with_type(Some("invalid_request_error".to_string()));
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["type"], "invalid_request_error");
        assert_eq!(json["category"], "request_invalid");
        assert!(json.get("status_code").is_none());
    }
}
