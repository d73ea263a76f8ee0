//! JSON wire format for stream messages.
//!
//! Payloads are opaque JSON values; no schema is enforced here.

use serde_json::Value;

/// Serialize a message for the wire.
pub fn encode(message: &Value) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(message)
}

/// Decode a raw payload received from a broker.
pub fn decode(payload: &[u8]) -> Result<Value, serde_json::Error> {
    serde_json::from_slice(payload)
}
