//! CLI command implementations.

pub mod dump;
pub mod inspect;
pub mod verify;

use shelfdb_codec::{Object, ObjectCodec};
use shelfdb_core::{ResourceKind, ResourceRole};

/// Decodes a resource file by the role its key implies. References come back
/// as property-less objects.
pub fn decode(
    codec: &dyn ObjectCodec,
    role: &ResourceRole,
    bytes: &[u8],
) -> Result<Vec<Object>, shelfdb_codec::CodecError> {
    match role.kind() {
        ResourceKind::Objects => codec.decode(bytes),
        ResourceKind::References => Ok(codec
            .decode_references(bytes)?
            .into_iter()
            .map(|r| Object::new(r.class, r.id))
            .collect()),
    }
}
