//! Binary codec backed by CBOR.

use crate::codec::{ensure_unique_ids, ObjectCodec};
use crate::error::{CodecError, CodecResult};
use crate::object::{Object, ObjectRef};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// CBOR codec. The default codec for new stores.
#[derive(Debug, Default, Clone, Copy)]
pub struct CborCodec;

impl CborCodec {
    /// Creates the codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn to_bytes<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
        let mut buffer = Vec::new();
        ciborium::into_writer(value, &mut buffer)
            .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
        Ok(buffer)
    }

    fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<Vec<T>> {
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
    }
}

impl ObjectCodec for CborCodec {
    fn name(&self) -> &'static str {
        "cbor"
    }

    fn extension(&self) -> &'static str {
        "cbor"
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
