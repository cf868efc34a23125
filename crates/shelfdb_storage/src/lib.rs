//! # shelfdb Storage
//!
//! Storage backend trait and implementations for shelfdb.
//!
//! A backend is a flat namespace of **whole files** addressed by slash-separated
//! keys such as `Planet` or `Planet/Planet-42`. Backends never interpret the bytes
//! they hold; the object codec and the resource layer above own the format.
//!
//! ## Design Principles
//!
//! - A write replaces the whole file: the old file is removed, then a new one is
//!   created and written. There is no fsync and no atomic rename.
//! - Missing files read as `None`, never as an error
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing, with operation counters
//! - [`FileBackend`] - One OS file per key under a root directory
//!
//! ## Example
//!
//! ```rust
//! use shelfdb_storage::{StorageBackend, InMemoryBackend};
//!
//! let backend = InMemoryBackend::new();
//! backend.write("Planet", b"hello world").unwrap();
//! assert_eq!(backend.read("Planet").unwrap().as_deref(), Some(&b"hello world"[..]));
//! assert_eq!(backend.write_count(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{validate_key, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use file::{FileBackend, DEFAULT_EXTENSION};
pub use memory::InMemoryBackend;
