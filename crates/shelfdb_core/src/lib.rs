//! # shelfdb Core
//!
//! Transactional object store over plain files.
//!
//! This crate provides:
//! - A versioned record cache per backing file (snapshot reads, one writer per
//!   object, optimistic staleness checks)
//! - Resources and the reference-counted resource directory
//! - Transactions with a compensating commit protocol
//! - A fragmentation index for classes sharded over bounded files
//! - Commit triggers, class registration and the [`Store`] facade
//!
//! Durability is "rewrite the whole file on commit": there is no log, and a
//! crash during a commit can leave a file missing.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod dir;
mod error;
pub mod fragment;
mod policy;
mod resource;
pub mod resources;
pub mod schema;
mod store;
mod transaction;
mod trigger;
mod types;

pub use cache::{ChangeKind, CommittedChange, RecordCache};
pub use config::{CodecKind, Config, DEFAULT_FRAGMENT_SIZE};
pub use dir::{StoreDir, LOCK_FILE};
pub use error::{ConflictReason, CoreError, CoreResult};
pub use fragment::{FragmentIndex, FragmentReport, IndexRecord};
pub use policy::StoragePolicy;
pub use resource::{CommittedResourceRecord, Resource, ResourceKind, TransactionalResource};
pub use resources::{ResourceManager, ResourceRole};
pub use schema::{ClassSchema, Identifiable, Persistent, PropertyList, SchemaRegistry};
pub use store::Store;
pub use transaction::{Transaction, TransactionManager, TransactionState};
pub use trigger::{Trigger, TriggerManager};
pub use types::{ResourceId, Timestamp, TransactionId, TxnContext};
