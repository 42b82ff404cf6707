//! Tool and structured-output descriptors and the correlated `ToolRun` record.

use std::collections::BTreeMap;
use std::fmt;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::phase::Streamed;
use crate::transcript::{Segment, ToolCall};
use crate::value::Generable;

/// A tool the model may call.
///
/// `NAME` is the key the schema and the tool box dispatch on.
pub trait Tool: Send + Sync + 'static {
    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    type Arguments: Generable;
    type Output: Generable;

    fn call(&self, arguments: Self::Arguments) -> BoxFuture<'_, anyhow::Result<Self::Output>>;
}

/// A schema-validated response type, tagged by `TYPE_NAME` on the wire.
pub trait StructuredOutput: Generable {
    const TYPE_NAME: &'static str;
}

/// A recoverable rejection returned by a tool instead of its output.
///
/// Tools report one by returning it as their `anyhow::Error`; the tool box
/// stores it as an envelope the correlator reads back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRejection {
    pub reason: String,
    /// Every other envelope field, flattened to strings.
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl ToolRejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            details: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// The wire envelope: `{"reason": .., "error": true, ..details}`.
    pub fn envelope(&self) -> serde_json::Value {
        let mut object: serde_json::Map<String, serde_json::Value> = self
            .details
            .iter()
            .map(|(key, value)| (key.clone(), serde_json::Value::String(value.clone())))
            .collect();
        object.insert("reason".to_string(), self.reason.clone().into());
        object.insert("error".to_string(), true.into());
        serde_json::Value::Object(object)
    }
}

impl fmt::Display for ToolRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rejected: {}", self.reason)
    }
}

impl std::error::Error for ToolRejection {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRunError {
    pub message: String,
}

impl fmt::Display for ToolRunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// A tool call correlated with its eventual output.
///
/// At most one of `output`, `rejection` and `error` is set. The run is
/// pending while none of them is.
pub struct ToolRun<T: Tool> {
    pub id: String,
    pub call_id: String,
    pub raw_arguments: String,
    pub raw_output: Option<Segment>,
    pub arguments: Option<Streamed<T::Arguments>>,
    pub output: Option<T::Output>,
    pub rejection: Option<ToolRejection>,
    pub error: Option<ToolRunError>,
}

impl<T: Tool> ToolRun<T> {
    pub fn is_pending(&self) -> bool {
        self.output.is_none() && self.rejection.is_none() && self.error.is_none()
    }

    pub fn name(&self) -> &'static str {
        T::NAME
    }
}

impl<T: Tool> Clone for ToolRun<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            call_id: self.call_id.clone(),
            raw_arguments: self.raw_arguments.clone(),
            raw_output: self.raw_output.clone(),
            arguments: self.arguments.clone(),
            output: self.output.clone(),
            rejection: self.rejection.clone(),
            error: self.error.clone(),
        }
    }
}

impl<T: Tool> PartialEq for ToolRun<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.call_id == other.call_id
            && self.raw_arguments == other.raw_arguments
            && self.raw_output == other.raw_output
            && self.arguments == other.arguments
            && self.output == other.output
            && self.rejection == other.rejection
            && self.error == other.error
    }
}

impl<T: Tool> fmt::Debug for ToolRun<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRun")
            .field("tool", &T::NAME)
            .field("id", &self.id)
            .field("call_id", &self.call_id)
            .field("raw_arguments", &self.raw_arguments)
            .field("raw_output", &self.raw_output)
            .field("arguments", &self.arguments)
            .field("output", &self.output)
            .field("rejection", &self.rejection)
            .field("error", &self.error)
            .finish()
    }
}

/// A call to a tool the active schema does not register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownToolRun {
    pub call: ToolCall,
    pub raw_output: Option<Segment>,
}
