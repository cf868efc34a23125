//! Transactions and the multi-resource commit protocol.
//!
//! Each resource is an independent file, so a transaction touching several of
//! them cannot be committed atomically by the file system. The manager
//! approximates atomicity:
//! - resources commit one at a time, in the order the transaction touched them
//! - each successful commit leaves an undo log
//! - if a later resource fails, the store stops accepting transactions, waits
//!   for the live ones to finish, and replays the undo logs

mod manager;
mod state;

pub use manager::TransactionManager;
pub use state::{Transaction, TransactionState};
