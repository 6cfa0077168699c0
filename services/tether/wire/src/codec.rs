//! Default body codec.
//!
//! Message bodies are canonical CBOR produced by `ciborium`. A zero-length body
//! decodes to the type's `Default` value so that empty packets carry the
//! message's zero-value.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Body codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    /// Serialization failed
    #[error("body encode failed: {0}")]
    Encode(String),

    /// Deserialization failed
    #[error("body decode failed: {0}")]
    Decode(String),
}

/// Serialize `value` as CBOR, appending to `dst`
pub fn encode_body<T: Serialize>(value: &T, dst: &mut Vec<u8>) -> Result<(), CodecError> {
    ciborium::ser::into_writer(value, dst).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Deserialize a CBOR body; an empty body yields `T::default()`
pub fn decode_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, CodecError> {
    if body.is_empty() {
        return Ok(T::default());
    }
    ciborium::de::from_reader(body).map_err(|e| CodecError::Decode(e.to_string()))
}
