//! Inbound protocol frame normalization.
//!
//! Binary frames from the provider are raw audio. Text frames are JSON
//! discriminated by a `type` field. The provider's tool-call encoding has
//! changed several times and live assistants still emit every historical
//! shape, so extraction runs an ordered list of strategies over the frame
//! (first match wins) instead of a growing conditional chain:
//!
//! 1. array under `tool_calls`
//! 2. single object under `tool_call`
//! 3. nested under a `function` key
//! 4. flat `name`/`arguments` on the frame itself
//!
//! Arguments may arrive as a JSON object or a string-encoded object; a
//! string that fails to parse yields an empty map, never an error.

use base64::prelude::*;
use bytes::Bytes;
use serde_json::{Map, Value};
use tracing::warn;

use crate::core::tools::ToolCall;

/// Normalized event from the AI leg.
#[derive(Debug, Clone, PartialEq)]
pub enum AiEvent {
    /// Raw audio for the carrier leg
    Audio(Bytes),
    /// Incremental assistant transcript text
    TextDelta(String),
    /// The assistant finished its spoken turn
    TurnComplete,
    /// Normalized side-effect requests
    ToolCalls(Vec<ToolCall>),
    /// Provider-reported error (non-fatal unless the socket also closes)
    ProviderError(String),
    /// The provider closed the session
    SessionClosed,
}

/// Parse one JSON text frame. `None` means the frame was malformed or of an
/// unknown type; callers log and drop it.
pub fn normalize_text_frame(text: &str) -> Option<AiEvent> {
    let frame: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!("Dropping unparseable control frame: {e}");
            return None;
        }
    };

    let frame_type = frame.get("type").and_then(Value::as_str)?;

    match frame_type {
        "audio" | "audio_delta" | "response.audio.delta" => {
            let encoded = frame
                .get("delta")
                .or_else(|| frame.get("payload"))
                .and_then(Value::as_str)?;
            match BASE64_STANDARD.decode(encoded) {
                Ok(audio) => Some(AiEvent::Audio(Bytes::from(audio))),
                Err(e) => {
                    warn!("Dropping audio delta with invalid base64: {e}");
                    None
                }
            }
        }
        "text_delta" | "response.text.delta" | "transcript_delta" => {
            let delta = frame
                .get("delta")
                .or_else(|| frame.get("text"))
                .and_then(Value::as_str)?;
            Some(AiEvent::TextDelta(delta.to_string()))
        }
        "turn_complete" | "response.done" | "turn.completed" => Some(AiEvent::TurnComplete),
        "error" => {
            let message = frame
                .get("message")
                .or_else(|| frame.get("error").and_then(|e| e.get("message")))
                .and_then(Value::as_str)
                .unwrap_or("unspecified provider error");
            Some(AiEvent::ProviderError(message.to_string()))
        }
        "session_closed" | "close" => Some(AiEvent::SessionClosed),
        "tool_call" | "tool_calls" | "function_call" => {
            extract_tool_calls(&frame).map(AiEvent::ToolCalls)
        }
        other => {
            warn!("Dropping control frame of unknown type: {other}");
            None
        }
    }
}

/// One extraction strategy: a historical wire shape that may hold the calls.
type Extractor = fn(&Value) -> Option<Vec<ToolCall>>;

/// Strategies in precedence order. Newer shapes first so a frame carrying
/// both a modern and a compatibility encoding resolves to the modern one.
const EXTRACTORS: &[Extractor] = &[
    extract_from_array,
    extract_from_single_object,
    extract_from_function_key,
    extract_from_flat_fields,
];

/// Run the strategies in order and return the first hit.
pub fn extract_tool_calls(frame: &Value) -> Option<Vec<ToolCall>> {
    EXTRACTORS
        .iter()
        .find_map(|extract| extract(frame))
        .filter(|calls| !calls.is_empty())
}

/// `{"tool_calls": [{...}, ...]}`
fn extract_from_array(frame: &Value) -> Option<Vec<ToolCall>> {
    let array = frame.get("tool_calls")?.as_array()?;
    Some(array.iter().filter_map(tool_call_from_object).collect())
}

/// `{"tool_call": {...}}`
fn extract_from_single_object(frame: &Value) -> Option<Vec<ToolCall>> {
    let object = frame.get("tool_call")?;
    tool_call_from_object(object).map(|call| vec![call])
}

/// `{"id": ..., "function": {"name": ..., "arguments": ...}}`
fn extract_from_function_key(frame: &Value) -> Option<Vec<ToolCall>> {
    let function = frame.get("function")?;
    let name = function.get("name")?.as_str()?;
    Some(vec![ToolCall {
        id: call_id(frame),
        name: name.to_string(),
        args: parse_args(function.get("arguments").or_else(|| function.get("args"))),
    }])
}

/// `{"id": ..., "name": ..., "arguments": ...}` directly on the frame.
fn extract_from_flat_fields(frame: &Value) -> Option<Vec<ToolCall>> {
    tool_call_from_object(frame).map(|call| vec![call])
}

/// Shared object shape: `name` plus optional `id` and arguments under
/// `arguments`, `args`, or `parameters`.
fn tool_call_from_object(object: &Value) -> Option<ToolCall> {
    // A nested `function` key means this object uses the nested shape and a
    // flat read would miss the name
    if let Some(calls) = extract_from_function_key(object) {
        return calls.into_iter().next();
    }

    let name = object.get("name")?.as_str()?;
    Some(ToolCall {
        id: call_id(object),
        name: name.to_string(),
        args: parse_args(
            object
                .get("arguments")
                .or_else(|| object.get("args"))
                .or_else(|| object.get("parameters")),
        ),
    })
}

/// Tool-call id, or a generated one when the shape predates ids.
fn call_id(object: &Value) -> String {
    object
        .get("id")
        .or_else(|| object.get("call_id"))
        .or_else(|| object.get("toolCallId"))
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| format!("generated-{}", uuid::Uuid::new_v4()))
}

/// Defensive argument parsing. Objects pass through; strings are parsed as
/// JSON objects; anything else, including a string that fails to parse,
/// becomes an empty map.
fn parse_args(value: Option<&Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(encoded)) => match serde_json::from_str::<Value>(encoded) {
            Ok(Value::Object(map)) => map,
            _ => {
                warn!("Tool-call arguments were not a JSON object, using empty args");
                Map::new()
            }
        },
        _ => Map::new(),
    }
}
