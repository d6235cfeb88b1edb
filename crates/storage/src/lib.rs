//! Host transaction layer for vatstore
//!
//! This crate provides the transactional key-value store the artifact
//! stores ride on:
//! - HostStore: atomic, durable batch commit + consistent read views
//! - HostTransaction: read-your-writes staging of one crank's mutations
//! - WriteBatch: the single object handed to the store per commit
//! - MemoryStore: ephemeral implementation
//! - FileStore: commit-log backed implementation with crash recovery

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod file;
pub mod format;
pub mod memory;
pub mod traits;
pub mod transaction;
pub mod view;

pub use batch::{Mutation, WriteBatch};
pub use file::{FileStore, COMMIT_LOG_FILE};
pub use memory::MemoryStore;
pub use traits::{HostStore, HostStoreExt};
pub use transaction::HostTransaction;
pub use view::{KvRead, ReadView, SharedMap};
