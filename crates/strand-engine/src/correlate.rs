//! Tool-run correlation.
//!
//! Matches a tool call to the `ToolOutput` entry that answers it and
//! classifies the result as output, rejection, error, or still pending.

use std::collections::BTreeMap;

use serde_json::Value;
use strand_types::{
    Entry, EntryStatus, GenerationError, Segment, Streamed, Tool, ToolCall, ToolOutputEntry,
    ToolRejection, ToolRun, ToolRunError, Transcript,
};

/// Finds the output for `call_id` among the entries after `position`.
///
/// Every later entry is visited; when several outputs answer the same call
/// the last one wins.
pub fn find_output<'a>(
    transcript: &'a Transcript,
    position: usize,
    call_id: &str,
) -> Option<&'a ToolOutputEntry> {
    transcript
        .iter()
        .skip(position + 1)
        .filter_map(|entry| match entry {
            Entry::ToolOutput(output) if output.call_id == call_id => Some(output),
            _ => None,
        })
        .last()
}

/// Assembles the `ToolRun` for one call of tool `T`.
///
/// Fails only when completed arguments or a completed output cannot be
/// decoded and the output is not a rejection envelope either.
pub fn correlate<T: Tool>(
    call: &ToolCall,
    output: Option<&ToolOutputEntry>,
) -> Result<ToolRun<T>, GenerationError> {
    let arguments = match call.status {
        EntryStatus::Completed => Streamed::<T::Arguments>::decode_final(&call.id, &call.arguments)
            .map_err(|e| {
                GenerationError::stream_decoding(format!(
                    "Arguments of '{}' call {} do not match its schema: {e}",
                    T::NAME,
                    call.call_id
                ))
            })?,
        EntryStatus::InProgress | EntryStatus::Failed => {
            Streamed::decode(&call.id, &call.arguments, false)
        }
    };

    let mut run = ToolRun {
        id: call.id.clone(),
        call_id: call.call_id.clone(),
        raw_arguments: call.arguments.clone(),
        raw_output: output.map(|output| output.segment.clone()),
        arguments: Some(arguments),
        output: None,
        rejection: None,
        error: None,
    };

    if call.status == EntryStatus::Failed {
        run.error = Some(ToolRunError {
            message: "tool call failed before completing".to_string(),
        });
        return Ok(run);
    }

    let Some(output) = output else {
        return Ok(run);
    };
    match output.status {
        EntryStatus::InProgress => {}
        EntryStatus::Failed => {
            run.error = Some(ToolRunError {
                message: output.segment.raw().to_string(),
            });
        }
        EntryStatus::Completed => match decode_output::<T>(&output.segment) {
            Ok(value) => run.output = Some(value),
            Err(OutputError::Rejected(rejection)) => run.rejection = Some(rejection),
            Err(OutputError::Invalid(message)) => {
                return Err(GenerationError::stream_decoding(format!(
                    "Output of '{}' call {} does not match its schema: {message}",
                    T::NAME,
                    call.call_id
                )));
            }
        },
    }
    Ok(run)
}

enum OutputError {
    Rejected(ToolRejection),
    Invalid(String),
}

/// Text outputs decode as a JSON string; structured outputs as their payload.
fn segment_value(segment: &Segment) -> Result<Value, String> {
    match segment {
        Segment::Text { text, .. } => Ok(Value::String(text.clone())),
        Segment::Structured { content, .. } => {
            serde_json::from_str(content).map_err(|e| e.to_string())
        }
    }
}

fn decode_output<T: Tool>(segment: &Segment) -> Result<T::Output, OutputError> {
    let value = segment_value(segment).map_err(OutputError::Invalid)?;
    let error = match serde_json::from_value::<T::Output>(value.clone()) {
        Ok(output) => return Ok(output),
        Err(e) => e.to_string(),
    };
    // Text may still carry a JSON document.
    let value = match segment {
        Segment::Text { text, .. } => match serde_json::from_str::<Value>(text) {
            Ok(embedded) => match serde_json::from_value::<T::Output>(embedded.clone()) {
                Ok(output) => return Ok(output),
                Err(_) => embedded,
            },
            Err(_) => value,
        },
        Segment::Structured { .. } => value,
    };
    match rejection(&value) {
        Some(rejection) => Err(OutputError::Rejected(rejection)),
        None => Err(OutputError::Invalid(error)),
    }
}

/// Reads a `{reason, error: true, ...details}` rejection envelope.
pub fn rejection(value: &Value) -> Option<ToolRejection> {
    let object = value.as_object()?;
    if object.get("error") != Some(&Value::Bool(true)) {
        return None;
    }
    let reason = object.get("reason")?.as_str()?.to_string();
    let details = object
        .iter()
        .filter(|(key, _)| !matches!(key.as_str(), "reason" | "error"))
        .map(|(key, value)| (key.clone(), stringify(value)))
        .collect::<BTreeMap<_, _>>();
    Some(ToolRejection { reason, details })
}

/// Primitives render as themselves; containers as canonical JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => {
            let mut out = String::new();
            write_canonical(value, &mut out);
            out
        }
    }
}

/// Writes JSON with object keys sorted, independent of map ordering.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(item) = map.get(key) {
                    write_canonical(item, out);
                }
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
