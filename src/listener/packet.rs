//! Message packet decoding
//!
//! A message source delivers either JSON objects or strings. Three shapes
//! are accepted:
//!
//! - `{ "key": .., "label": .. }` or `{ "key": .., "text": .. }` - a label packet
//! - `{ "key": .., "value": .. }` - a value packet
//! - `"key=value"` - legacy value packet, exactly one `=`
//!
//! String payloads are tried as JSON first. Everything else is malformed.

use crate::types::OutputValue;
use serde_json::Value;
use thiserror::Error;

/// A raw payload as delivered by a pump source
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    Json(Value),
    Text(String),
}

impl From<Value> for RawPayload {
    fn from(value: Value) -> Self {
        RawPayload::Json(value)
    }
}

impl From<&str> for RawPayload {
    fn from(text: &str) -> Self {
        RawPayload::Text(text.to_string())
    }
}

impl From<String> for RawPayload {
    fn from(text: String) -> Self {
        RawPayload::Text(text)
    }
}

/// A decoded message packet
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Binds a human-readable name to `key` without touching its value
    Label { key: String, label: String },
    /// New value for `key`
    Value { key: String, value: OutputValue },
}

impl Packet {
    pub fn key(&self) -> &str {
        match self {
            Packet::Label { key, .. } | Packet::Value { key, .. } => key,
        }
    }

    pub fn is_value(&self) -> bool {
        matches!(self, Packet::Value { .. })
    }
}

/// Why a payload was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedPacket {
    #[error("object has no usable key")]
    MissingKey,

    #[error("object for '{0}' carries neither label, text nor value")]
    MissingPayload(String),

    #[error("unsupported value for '{0}'")]
    UnsupportedValue(String),

    #[error("unsupported JSON payload: {0}")]
    UnsupportedJson(String),

    #[error("unrecognized text payload: {0:?}")]
    UnrecognizedText(String),
}

/// Decode one raw payload
pub fn decode(payload: &RawPayload) -> Result<Packet, MalformedPacket> {
    match payload {
        RawPayload::Json(value) => decode_json(value),
        RawPayload::Text(text) => decode_text(text),
    }
}

/// Decode a JSON payload; only objects are accepted
pub fn decode_json(value: &Value) -> Result<Packet, MalformedPacket> {
    let Value::Object(object) = value else {
        return Err(MalformedPacket::UnsupportedJson(truncate(&value.to_string())));
    };

    let key = match object.get("key") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(MalformedPacket::MissingKey),
    };

    // A label binding takes precedence over a value in the same object
    for field in ["label", "text"] {
        if let Some(label) = object.get(field) {
            return match label {
                Value::String(s) => Ok(Packet::Label {
                    key,
                    label: s.clone(),
                }),
                Value::Number(n) => Ok(Packet::Label {
                    key,
                    label: n.to_string(),
                }),
                _ => Err(MalformedPacket::UnsupportedValue(key)),
            };
        }
    }

    match object.get("value") {
        Some(value) => OutputValue::from_json(value)
            .map(|value| Packet::Value {
                key: key.clone(),
                value,
            })
            .ok_or(MalformedPacket::UnsupportedValue(key)),
        None => Err(MalformedPacket::MissingPayload(key)),
    }
}

/// Decode a string payload: JSON object first, then `key=value`
pub fn decode_text(text: &str) -> Result<Packet, MalformedPacket> {
    let trimmed = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return decode_json(&value);
    }

    let mut parts = trimmed.split('=');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(key), Some(value), None) if !key.trim().is_empty() && !value.trim().is_empty() => {
            Ok(Packet::Value {
                key: key.trim().to_string(),
                value: OutputValue::coerce_text(value.trim()),
            })
        }
        _ => Err(MalformedPacket::UnrecognizedText(truncate(trimmed))),
    }
}

fn truncate(text: &str) -> String {
    const MAX: usize = 64;
    match text.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
