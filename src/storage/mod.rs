//! Request and state storage
//!
//! This module defines the store contracts the engine depends on and ships
//! two queue implementations (in-memory and SQLite-backed) plus the finite
//! seed list and a small key-value store for state snapshots.

mod list;
mod memory;
mod sqlite;
mod traits;

pub use list::{RequestList, RequestListState};
pub use memory::{MemoryKeyValueStore, MemoryRequestQueue};
pub use sqlite::SqliteRequestQueue;
pub use traits::{KeyValueStore, QueueOperationInfo, RequestQueue, StorageError, StorageResult};
