//! The codec boundary between resources and their backing files.

use crate::error::{CodecError, CodecResult};
use crate::object::{Object, ObjectRef};
use std::collections::HashSet;
use std::fmt::Debug;

/// Turns an object set into a byte stream and back.
///
/// A codec encodes one resource file at a time. It must round-trip the id and
/// every property of each object losslessly, including the empty set. The
/// reference variants encode bare `(class, id)` pairs for enumeration indexes.
pub trait ObjectCodec: Send + Sync + Debug {
    /// Short codec name (`cbor`, `json`).
    fn name(&self) -> &'static str;

    /// File extension for backing files written with this codec.
    fn extension(&self) -> &'static str;

    /// Encodes an ordered object set.
    ///
    /// # Errors
    ///
    /// Returns an error if the objects cannot be serialized.
    fn encode(&self, objects: &[Object]) -> CodecResult<Vec<u8>>;

    /// Decodes an object set. Empty input decodes as the empty set.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is malformed or repeats an id.
    fn decode(&self, bytes: &[u8]) -> CodecResult<Vec<Object>>;

    /// Encodes bare references.
    ///
    /// # Errors
    ///
    /// Returns an error if the references cannot be serialized.
    fn encode_references(&self, refs: &[ObjectRef]) -> CodecResult<Vec<u8>>;

    /// Decodes bare references. Empty input decodes as the empty set.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is malformed.
    fn decode_references(&self, bytes: &[u8]) -> CodecResult<Vec<ObjectRef>>;
}

/// Rejects streams in which two objects share an id.
pub(crate) fn ensure_unique_ids(objects: &[Object]) -> CodecResult<()> {
    let mut seen = HashSet::with_capacity(objects.len());
    for object in objects {
        if !seen.insert(&object.id) {
            return Err(CodecError::DuplicateId {
                id: object.id.to_string(),
            });
        }
    }
    Ok(())
}
