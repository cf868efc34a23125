//! Human-readable codec backed by JSON.

use crate::codec::{ensure_unique_ids, ObjectCodec};
use crate::error::{CodecError, CodecResult};
use crate::object::{Object, ObjectRef};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Pretty-printed JSON codec.
///
/// Slower and larger than [`crate::CborCodec`], but backing files can be read
/// and diffed by hand.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Creates the codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn to_bytes<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
        serde_json::to_vec_pretty(value).map_err(|e| CodecError::encoding_failed(e.to_string()))
    }

    fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<Vec<T>> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
    }
}

impl ObjectCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn extension(&self) -> &'static str {
        "json"
    }

    fn encode(&self, objects: &[Object]) -> CodecResult<Vec<u8>> {
        Self::to_bytes(objects)
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<Vec<Object>> {
        let objects: Vec<Object> = Self::from_bytes(bytes)?;
        ensure_unique_ids(&objects)?;
        Ok(objects)
    }

    fn encode_references(&self, refs: &[ObjectRef]) -> CodecResult<Vec<u8>> {
        Self::to_bytes(refs)
    }

    fn decode_references(&self, bytes: &[u8]) -> CodecResult<Vec<ObjectRef>> {
        Self::from_bytes(bytes)
    }
}
