//! Pluggable data desensitization
//!
//! Recorded payloads may be stored in a desensitized form. Responses pass
//! through [`DataDesensitization::decode`] before comparison. Loading a
//! third-party implementation is a deployment concern; the engine only sees
//! the trait.

use serde_json::Value;

/// Reversible payload transformation
pub trait DataDesensitization: Send + Sync {
    /// Transform a payload for storage
    fn encode(&self, data: &str) -> String;

    /// Restore a stored payload
    fn decode(&self, data: &str) -> String;
}

/// Identity transformation
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDataDesensitization;

impl DataDesensitization for DefaultDataDesensitization {
    fn encode(&self, data: &str) -> String {
        data.to_string()
    }

    fn decode(&self, data: &str) -> String {
        data.to_string()
    }
}

/// Decode a captured body.
///
/// String bodies are decoded and re-parsed as JSON when possible; structured
/// bodies are returned unchanged.
#[must_use]
pub fn decode_body(desensitization: &dyn DataDesensitization, body: Value) -> Value {
    match body {
        Value::String(raw) => {
            let decoded = desensitization.decode(&raw);
            serde_json::from_str(&decoded).unwrap_or(Value::String(decoded))
        }
        other => other,
    }
}
