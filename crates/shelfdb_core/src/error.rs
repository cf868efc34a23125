//! Error types for shelfdb core.

use crate::policy::StoragePolicy;
use shelfdb_codec::ObjectId;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Why a record-level write was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// No record with that id exists.
    NotFound,
    /// A committed record with that id already exists.
    AlreadyExists,
    /// The same transaction already inserted that id.
    InsertedInTransaction,
    /// The same transaction already deleted that id.
    DeletedInTransaction,
    /// Another transaction holds a pending change on the record.
    OwnedByOther,
    /// The record was committed after the transaction started.
    Stale,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotFound => "no such object",
            Self::AlreadyExists => "object already exists",
            Self::InsertedInTransaction => "object already inserted in this transaction",
            Self::DeletedInTransaction => "object was deleted in this transaction",
            Self::OwnedByOther => "object is being changed by another transaction",
            Self::Stale => "object was committed after this transaction started",
        };
        f.write_str(text)
    }
}

/// Errors that can occur in shelfdb core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No value is visible for the id in this transaction.
    #[error("object {id} not found in {resource}")]
    ReadNotFound {
        /// Resource that was searched.
        resource: String,
        /// The missing id.
        id: ObjectId,
    },

    /// The id already exists, was deleted, or is being inserted concurrently.
    #[error("insert conflict on {id}: {reason}")]
    InsertConflict {
        /// The conflicting id.
        id: ObjectId,
        /// Why the insert was refused.
        reason: ConflictReason,
    },

    /// The id is unknown, owned by another transaction, or stale.
    #[error("update conflict on {id}: {reason}")]
    UpdateConflict {
        /// The conflicting id.
        id: ObjectId,
        /// Why the update was refused.
        reason: ConflictReason,
    },

    /// The id is unknown, owned by another transaction, or stale.
    #[error("delete conflict on {id}: {reason}")]
    DeleteConflict {
        /// The conflicting id.
        id: ObjectId,
        /// Why the delete was refused.
        reason: ConflictReason,
    },

    /// New transactions are rejected while a failed commit is compensated.
    #[error("store is compensating a failed commit; no new transactions accepted")]
    InvalidDatabaseState,

    /// The calling thread already owns a live transaction.
    #[error("thread {thread} already owns an open transaction")]
    DuplicateTransaction {
        /// Debug rendering of the thread id.
        thread: String,
    },

    /// Writing a resource file failed during commit.
    #[error("storage failure while committing {resource}: {source}")]
    StorageIOFailure {
        /// The resource whose write failed.
        resource: String,
        /// The underlying storage error.
        #[source]
        source: shelfdb_storage::StorageError,
    },

    /// Storage backend error outside the commit write step.
    #[error("storage error: {0}")]
    Storage(#[from] shelfdb_storage::StorageError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] shelfdb_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The class was never registered.
    #[error("class not registered: {class}")]
    UnknownClass {
        /// Name of the class.
        class: String,
    },

    /// The class policy does not support the operation.
    #[error("{operation} is not supported for class {class} stored as {policy}")]
    InvalidPolicy {
        /// Name of the class.
        class: String,
        /// Its registered policy.
        policy: StoragePolicy,
        /// The refused operation.
        operation: &'static str,
    },

    /// Typed conversion failed.
    #[error("schema error for {class}: {message}")]
    Schema {
        /// Name of the class.
        class: String,
        /// Description of the mismatch.
        message: String,
    },

    /// Transaction is not in the active state.
    #[error("transaction {id} is not active")]
    TransactionNotActive {
        /// The transaction id.
        id: u64,
    },

    /// The store directory is locked by another process.
    #[error("store locked: another process has exclusive access")]
    DatabaseLocked,

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a read-not-found error.
    pub fn read_not_found(resource: impl fmt::Display, id: &ObjectId) -> Self {
        Self::ReadNotFound {
            resource: resource.to_string(),
            id: id.clone(),
        }
    }

    /// Creates a schema error.
    pub fn schema(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            class: class.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an unknown class error.
    pub fn unknown_class(class: impl Into<String>) -> Self {
        Self::UnknownClass {
            class: class.into(),
        }
    }

    /// Returns true for record-level conflicts the caller may retry.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::ReadNotFound { .. }
                | Self::InsertConflict { .. }
                | Self::UpdateConflict { .. }
                | Self::DeleteConflict { .. }
        )
    }

    /// Returns true for failures that run commit compensation.
    #[must_use]
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, Self::StorageIOFailure { .. })
    }
}
