//! # shelfdb Codec
//!
//! Object data model and the file codecs for shelfdb.
//!
//! Every resource file holds an ordered set of [`Object`]s. A codec turns that
//! set into bytes and back; the store never looks inside the bytes.
//!
//! ## Codecs
//!
//! - [`CborCodec`] - compact binary files (default)
//! - [`JsonCodec`] - pretty-printed text files
//!
//! ## Usage
//!
//! ```
//! use shelfdb_codec::{CborCodec, Object, ObjectCodec};
//!
//! let codec = CborCodec::new();
//! let objects = vec![Object::new("Planet", "3").with("name", "Earth")];
//! let bytes = codec.encode(&objects).unwrap();
//! assert_eq!(codec.decode(&bytes).unwrap(), objects);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod codec;
mod error;
mod json;
mod object;
mod value;

pub use cbor::CborCodec;
pub use codec::ObjectCodec;
pub use error::{CodecError, CodecResult};
pub use json::JsonCodec;
pub use object::{Object, ObjectId, ObjectRef};
pub use value::Value;

/// Resolves a codec by its [`ObjectCodec::name`].
///
/// # Errors
///
/// Returns [`CodecError::UnknownCodec`] for unrecognised names.
pub fn codec_by_name(name: &str) -> CodecResult<Box<dyn ObjectCodec>> {
    match name {
        "cbor" => Ok(Box::new(CborCodec::new())),
        "json" => Ok(Box::new(JsonCodec::new())),
        other => Err(CodecError::UnknownCodec {
            name: other.to_string(),
        }),
    }
}
