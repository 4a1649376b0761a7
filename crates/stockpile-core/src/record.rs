//! Record type and message payload decoding

use serde_json::{Map, Value};

/// One streamed unit of data: a flat mapping of field name to scalar value.
pub type Record = Map<String, Value>;

/// A single message payload could not be turned into a [`Record`]
#[derive(Debug)]
pub enum DecodeError {
    /// Payload is not valid JSON
    Json(serde_json::Error),
    /// Payload is JSON but not an object (e.g. an array or a bare number)
    NotAnObject { kind: &'static str },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(e) => write!(f, "invalid JSON: {e}"),
            Self::NotAnObject { kind } => write!(f, "expected a JSON object, got {kind}"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Decode a raw message payload into a [`Record`].
///
/// Producers that `json.dumps` an already-serialized document send a JSON
/// string whose content is the object; that layer is unwrapped once.
pub fn decode_record(payload: &[u8]) -> Result<Record, DecodeError> {
    match serde_json::from_slice::<Value>(payload)? {
        Value::Object(map) => Ok(map),
        Value::String(inner) => match serde_json::from_str::<Value>(&inner) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(DecodeError::NotAnObject { kind: "string" }),
        },
        other => Err(DecodeError::NotAnObject {
            kind: value_kind(&other),
        }),
    }
}
