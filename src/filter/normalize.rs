//! Conversion of arbitrary serializable values into plain JSON values.

use crate::error::{Error, Result};
use serde::Serialize;
use serde_json::Value;

/// An encode/decode pair used for the normalization round trip.
pub trait Codec: Send + Sync {
    /// Serializes `value` to bytes.
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> serde_json::Result<Vec<u8>>;

    /// Parses bytes produced by [`Codec::encode`] back into a [`Value`].
    fn decode(&self, bytes: &[u8]) -> serde_json::Result<Value>;
}

/// The standard `serde_json` codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(value)
    }

    fn decode(&self, bytes: &[u8]) -> serde_json::Result<Value> {
        serde_json::from_slice(bytes)
    }
}

/// Turns typed records and collections into a [`Value`] tree by encoding
/// and decoding them.
#[derive(Debug, Clone, Default)]
pub struct Normalizer<C = JsonCodec> {
    codec: C,
}

impl<C: Codec> Normalizer<C> {
    /// Wraps `codec`.
    pub fn new(codec: C) -> Self {
        Self { codec }
    }

    /// Returns the JSON form of `value`, or [`Error::Normalization`].
    pub fn normalize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Value> {
        let bytes = self
            .codec
            .encode(value)
            .map_err(|e| Error::Normalization(e.to_string()))?;
        self.codec
            .decode(&bytes)
            .map_err(|e| Error::Normalization(e.to_string()))
    }
}
