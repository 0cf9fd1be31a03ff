//! Defensive unwrapping of heterogeneous `tools/call` results.
//!
//! Servers return results in several shapes: a plain value, a container
//! exposing an explicit `value` field, or MCP content blocks whose first
//! text block carries the payload — sometimes as serialized JSON. The
//! unwrap is total: a parse failure keeps the textual form as-is.

use serde_json::Value;

/// The shapes a raw remote response can take.
#[derive(Debug)]
enum RawResponse {
    /// A container exposing an explicit `value` field.
    Extractable(Value),
    /// Text payload pulled out of MCP content blocks.
    Text(String),
    /// Anything else, kept as-is.
    Plain(Value),
}

impl RawResponse {
    fn classify(value: Value) -> Self {
        match value {
            Value::Object(mut map) if map.contains_key("value") => {
                Self::Extractable(map.remove("value").unwrap_or(Value::Null))
            }
            Value::Object(map) => match map.get("content").and_then(first_text) {
                Some(text) => Self::Text(text),
                None => Self::Plain(Value::Object(map)),
            },
            Value::Array(items) => {
                let value = Value::Array(items);
                match first_text(&value) {
                    Some(text) => Self::Text(text),
                    None => Self::Plain(value),
                }
            }
            other => Self::Plain(other),
        }
    }
}

/// Text of the first content block, if the value is a non-empty array of
/// blocks whose first element carries a `text` field.
fn first_text(value: &Value) -> Option<String> {
    let first = value.as_array()?.first()?;
    Some(first.get("text")?.as_str()?.to_string())
}

/// Unwrap a raw `tools/call` result into its payload.
///
/// Extracts the `value` field when present, pulls the text out of content
/// blocks, and prefers the parsed form when the textual payload is itself
/// serialized JSON. Never fails; unrecognized shapes pass through unchanged.
pub fn unwrap_response(value: Value) -> Value {
    let inner = match RawResponse::classify(value) {
        RawResponse::Extractable(inner) => inner,
        RawResponse::Text(text) => return parse_structured(text),
        RawResponse::Plain(value) => value,
    };
    // An extracted value may itself be content blocks or text.
    match RawResponse::classify(inner) {
        RawResponse::Extractable(nested) => refine_textual(nested),
        RawResponse::Text(text) => parse_structured(text),
        RawResponse::Plain(value) => refine_textual(value),
    }
}

fn refine_textual(value: Value) -> Value {
    match value {
        Value::String(text) => parse_structured(text),
        other => other,
    }
}

/// Parse text that looks like serialized JSON; keep the text otherwise.
fn parse_structured(text: String) -> Value {
    let trimmed = text.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        serde_json::from_str(trimmed).unwrap_or(Value::String(text))
    } else {
        Value::String(text)
    }
}

/// Extract the remote error message from a `tools/call` result whose
/// `isError` flag is set. Returns `None` for successful results.
pub fn remote_error(result: &Value) -> Option<String> {
    if !result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }
    let message = result
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();
    if message.is_empty() {
        Some("tool reported an error".to_string())
    } else {
        Some(message)
    }
}
