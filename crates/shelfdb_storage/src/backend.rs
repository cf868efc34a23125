//! Storage backend trait definition.

use crate::error::{StorageError, StorageResult};

/// A key-addressed whole-file store.
///
/// Keys are relative, slash-separated paths (`Planet`, `Planet/Planet-42`,
/// `Planet-index`). Every key names one backing file whose content is always
/// read and written in full.
///
/// # Invariants
///
/// - `read` of a key never written (or removed) returns `Ok(None)`
/// - `write` replaces the previous content entirely
/// - `remove` of a missing key is not an error
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads the whole content stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Replaces the content stored under `key`.
    ///
    /// The previous file is removed before the new one is created, so a crash
    /// between the two steps loses the key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn write(&self, key: &str, data: &[u8]) -> StorageResult<()>;

    /// Removes the content stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Returns true if `key` currently holds content.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Lists every key holding content, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace cannot be enumerated.
    fn keys(&self) -> StorageResult<Vec<String>>;
}

/// Checks that `key` is a relative, slash-separated path without empty,
/// `.` or `..` segments.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] describing the first violation.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let invalid = |reason| {
        Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason,
        })
    };

    if key.is_empty() {
        return invalid("empty key");
    }
    if key.contains('\\') || key.contains('\0') {
        return invalid("forbidden character");
    }
    for segment in key.split('/') {
        match segment {
            "" => return invalid("empty segment"),
            "." | ".." => return invalid("relative segment"),
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_nested_keys() {
        assert!(validate_key("Planet").is_ok());
        assert!(validate_key("Planet/Planet-42").is_ok());
        assert!(validate_key("Planet-index").is_ok());
    }

    #[test]
    fn rejects_escaping_keys() {
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("Planet/../secret").is_err());
        assert!(validate_key("Planet//x").is_err());
        assert!(validate_key("a\\b").is_err());
    }
}
