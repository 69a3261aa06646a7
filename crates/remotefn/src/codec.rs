//! Argument and result encoding.
//!
//! Arguments travel as standalone JSON documents, one per file, so the worker
//! side can decode them without knowing anything about the caller's types.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{InvocationError, Result};

/// Encode a value as a JSON blob.
///
/// Fails with [`InvocationError::Serialization`] when the value has no JSON
/// form (maps keyed by non-strings, `Serialize` impls that error).
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| InvocationError::Serialization(e.to_string()))
}

/// Decode a JSON blob back into a dynamic value.
pub fn decode(bytes: &[u8]) -> Result<Value> {
    decode_as(bytes)
}

/// Decode a JSON blob into a concrete type.
pub fn decode_as<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| InvocationError::Deserialization(e.to_string()))
}
