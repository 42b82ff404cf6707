//! Tool execution.
//!
//! A [`ToolBox`] runs the calls a turn produced and turns each result into a
//! `ToolOutput` entry the next turn can correlate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use futures_util::future::{BoxFuture, join_all};
use serde_json::Value;
use strand_types::{
    EntryStatus, GenerationError, Segment, Tool, ToolCall, ToolOutputEntry, ToolRejection, new_id,
    parse_final,
};
use tracing::debug;

/// Name and description advertised for a registered tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
}

trait ErasedTool: Send + Sync {
    fn invoke<'a>(&'a self, arguments: &'a str) -> BoxFuture<'a, Result<Segment, GenerationError>>;
}

struct Registered<T: Tool>(T);

impl<T: Tool> ErasedTool for Registered<T> {
    fn invoke<'a>(&'a self, arguments: &'a str) -> BoxFuture<'a, Result<Segment, GenerationError>> {
        Box::pin(async move {
            let arguments: T::Arguments = parse_final(arguments).map_err(|e| {
                GenerationError::tool_failed(T::NAME, anyhow!("Invalid arguments: {e}"))
            })?;
            match self.0.call(arguments).await {
                Ok(output) => output_segment(T::NAME, &output),
                Err(e) => match e.downcast_ref::<ToolRejection>() {
                    Some(rejection) => {
                        debug!(tool = T::NAME, reason = %rejection.reason, "Tool rejected call");
                        Ok(Segment::structured(T::NAME, rejection.envelope().to_string()))
                    }
                    None => Err(GenerationError::tool_failed(T::NAME, e)),
                },
            }
        })
    }
}

/// Plain strings become text segments; anything else is stored as JSON
/// tagged with the tool name.
fn output_segment<O: serde::Serialize>(
    tool_name: &'static str,
    output: &O,
) -> Result<Segment, GenerationError> {
    let value = serde_json::to_value(output).map_err(|e| {
        GenerationError::tool_failed(tool_name, anyhow!("Failed to serialize output: {e}"))
    })?;
    Ok(match value {
        Value::String(text) => Segment::text(text),
        other => Segment::structured(tool_name, other.to_string()),
    })
}

/// Tool registry (handlers + timeout).
#[derive(Clone, Default)]
pub struct ToolBox {
    tools: HashMap<&'static str, Arc<dyn ErasedTool>>,
    descriptors: Vec<ToolDescriptor>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for ToolBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBox")
            .field("descriptors", &self.descriptors)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ToolBox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-call timeout. `None` lets calls run indefinitely.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.register(tool);
        self
    }

    /// Registers `tool`, replacing any earlier tool with the same name.
    pub fn register<T: Tool>(&mut self, tool: T) {
        self.descriptors.retain(|d| d.name != T::NAME);
        self.descriptors.push(ToolDescriptor {
            name: T::NAME,
            description: T::DESCRIPTION,
        });
        self.tools.insert(T::NAME, Arc::new(Registered(tool)));
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    /// Runs one call and wraps the result as a completed output entry.
    ///
    /// # Errors
    /// `UnsupportedToolCalled` for unregistered names; `ToolExecutionFailed`
    /// for bad arguments, handler failures and timeouts. A handler error
    /// that is a [`ToolRejection`] is not a failure: it becomes the output.
    pub async fn execute(&self, call: &ToolCall) -> Result<ToolOutputEntry, GenerationError> {
        let Some(tool) = self.tools.get(call.tool_name.as_str()) else {
            return Err(GenerationError::UnsupportedToolCalled {
                tool_name: call.tool_name.clone(),
            });
        };
        debug!(tool = %call.tool_name, call_id = %call.call_id, "Executing tool");

        let segment = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, tool.invoke(&call.arguments))
                .await
                .map_err(|elapsed| {
                    GenerationError::tool_failed(
                        call.tool_name.clone(),
                        anyhow!("Timed out after {}s ({elapsed})", limit.as_secs_f64()),
                    )
                })??,
            None => tool.invoke(&call.arguments).await?,
        };

        Ok(ToolOutputEntry {
            id: new_id(),
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            segment,
            status: EntryStatus::Completed,
        })
    }

    /// Runs calls concurrently; results keep the order of `calls`.
    pub async fn execute_batch(
        &self,
        calls: &[ToolCall],
    ) -> Vec<Result<ToolOutputEntry, GenerationError>> {
        join_all(calls.iter().map(|call| self.execute(call))).await
    }
}
