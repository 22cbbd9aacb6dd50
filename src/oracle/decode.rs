//! Tagged decoding of oracle responses.
//!
//! Oracle output is untrusted text. Decoding either yields a validated value
//! or a [`DecodeError`] naming why it was rejected; `serde_json` errors never
//! escape this module.

use serde::de::DeserializeOwned;
use std::sync::OnceLock;
use thiserror::Error;

/// Reason an oracle response could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The response contained no text.
    #[error("empty response")]
    Empty,

    /// The response is not syntactically valid JSON.
    #[error("response is not valid JSON: {0}")]
    Syntax(String),

    /// The response is JSON but does not match the expected shape.
    #[error("response does not match schema: {0}")]
    Schema(String),
}

fn fence_regex() -> &'static regex::Regex {
    static FENCE: OnceLock<regex::Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        regex::Regex::new(r"(?s)^```[A-Za-z0-9_-]*\s*\n(.*?)\n?\s*```$")
            .expect("code fence pattern is valid")
    })
}

/// Remove a single surrounding markdown code fence, if present.
///
/// Models asked for JSON sometimes still wrap it in a fence despite
/// `responseMimeType`.
#[must_use]
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    match fence_regex().captures(trimmed).and_then(|caps| caps.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    }
}

/// Decode a response into an untyped JSON value.
///
/// # Errors
///
/// [`DecodeError::Empty`] for blank input, [`DecodeError::Syntax`] otherwise.
pub fn decode_value(raw: &str) -> Result<serde_json::Value, DecodeError> {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return Err(DecodeError::Empty);
    }
    serde_json::from_str(body).map_err(|e| DecodeError::Syntax(e.to_string()))
}

/// Decode a response into `T`.
///
/// # Errors
///
/// Any [`DecodeError`]; shape mismatches are reported as
/// [`DecodeError::Schema`].
pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, DecodeError> {
    let value = decode_value(raw)?;
    serde_json::from_value(value).map_err(|e| DecodeError::Schema(e.to_string()))
}

/// Decode a response that must be a JSON object into `T`.
///
/// Derived struct deserializers also accept arrays by position, so the
/// object check comes first.
///
/// # Errors
///
/// Any [`DecodeError`]; non-object values are [`DecodeError::Schema`].
pub fn decode_object<T: DeserializeOwned>(raw: &str) -> Result<T, DecodeError> {
    object_from_value(decode_value(raw)?)
}

/// Convert an already decoded value that must be a JSON object into `T`.
///
/// # Errors
///
/// [`DecodeError::Schema`] if `value` is not an object or does not fit `T`.
pub fn object_from_value<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, DecodeError> {
    if !value.is_object() {
        return Err(DecodeError::Schema(format!(
            "expected a JSON object, got {}",
            json_kind(&value)
        )));
    }
    serde_json::from_value(value).map_err(|e| DecodeError::Schema(e.to_string()))
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
