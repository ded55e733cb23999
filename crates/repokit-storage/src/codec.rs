//! String codecs for indices and records.
//!
//! The memory and file backends never hold typed values: every index and
//! record is encoded to a `String` on the way in and decoded on the way out.
//! A [`Codec`] must be deterministic (equal values encode to equal strings)
//! and must round-trip every value the application stores.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Failure to encode or decode a value.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct CodecError {
    message: String,
}

impl CodecError {
    /// Creates a codec error carrying the given message.
    pub fn new(message: impl Into<String>) -> Self {
        CodecError {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError::new(err.to_string())
    }
}

/// Converts typed values to and from their serialized string form.
pub trait Codec: Send + Sync {
    /// Encodes `value` to a string.
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, CodecError>;

    /// Decodes a value previously produced by [`Codec::encode`].
    fn decode<T: DeserializeOwned>(&self, encoded: &str) -> Result<T, CodecError>;
}

/// Compact JSON via serde_json. The default codec of every backend.
///
/// Keys of `HashMap` fields are emitted in iteration order, so types used as
/// indices should avoid them.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, CodecError> {
        Ok(serde_json::to_string(value)?)
    }

    fn decode<T: DeserializeOwned>(&self, encoded: &str) -> Result<T, CodecError> {
        Ok(serde_json::from_str(encoded)?)
    }
}
