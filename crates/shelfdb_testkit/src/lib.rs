//! # shelfdb Testkit
//!
//! Test utilities for shelfdb.
//!
//! This crate provides:
//! - Store fixtures over temporary directories or memory
//! - A fault-injecting storage backend for commit-failure scenarios
//! - Property-based generators for objects and values
//! - A model-checking harness that tracks the expected store contents
//! - Stress runs for sequential and concurrent workloads
//!
//! ## Usage
//!
//! ```rust,ignore
//! use shelfdb_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_store() {
//!     with_temp_store(|store| {
//!         register_planets(store, StoragePolicy::ClassFile);
//!         store.transaction(|txn| store.save_object(txn, planet("1", "Mercury"))).unwrap();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faulty;
pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faulty::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
    pub use shelfdb_core::StoragePolicy;
}

pub use faulty::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
