//! Store traits and error types
//!
//! These traits define the contract the orchestration engine expects from
//! its backing stores. Implementations may be in-memory, embedded, or
//! remote; the engine only ever talks to them through these interfaces,
//! always under a bounded timeout.

use crate::request::Request;
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during store operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Request not found: {0}")]
    RequestNotFound(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result of a queue mutation
///
/// `was_already_present` signals a de-duplication hit: the queue already
/// knew this unique key, so the insert changed nothing. Callers use this to
/// decide whether seed-list migration should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOperationInfo {
    /// The unique key already existed in the queue
    pub was_already_present: bool,

    /// The existing entry had already reached a terminal state
    pub was_already_handled: bool,
}

/// Trait for request queue backends
///
/// A queue hands out each pending request to exactly one caller at a time:
/// `fetch_next_request` leases the request (it will not be handed out again)
/// until the caller either marks it handled or reclaims it. De-duplication
/// is by `unique_key`, and `add_request` must be idempotent on that key so
/// an insert retried after an apparent timeout cannot create a duplicate.
#[async_trait]
pub trait RequestQueue: Send + Sync {
    /// Adds a request; `forefront` inserts it ahead of the pending backlog
    async fn add_request(
        &self,
        request: &Request,
        forefront: bool,
    ) -> StorageResult<QueueOperationInfo>;

    /// Leases and returns the next pending request, or None if nothing is
    /// pending right now (in-flight requests may still be reclaimed later)
    async fn fetch_next_request(&self) -> StorageResult<Option<Request>>;

    /// Marks a leased request as terminally handled; idempotent
    async fn mark_request_handled(&self, request: &Request) -> StorageResult<()>;

    /// Returns a leased request to the pending backlog
    async fn reclaim_request(&self, request: &Request, forefront: bool) -> StorageResult<()>;

    /// True when no request is pending (some may still be leased)
    async fn is_empty(&self) -> StorageResult<bool>;

    /// True when no request is pending and none is leased
    async fn is_finished(&self) -> StorageResult<bool>;

    /// Number of requests that reached a terminal state
    async fn handled_count(&self) -> StorageResult<u64>;

    /// Flushes any buffered state to durable storage
    async fn persist_state(&self) -> StorageResult<()>;
}

/// Trait for key-value state stores
///
/// Used for small state blobs: request-list progress and statistics
/// snapshots. Values are JSON documents.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads a value, or None if the key was never written
    async fn get_value(&self, key: &str) -> StorageResult<Option<serde_json::Value>>;

    /// Writes a value, replacing any previous one
    async fn set_value(&self, key: &str, value: serde_json::Value) -> StorageResult<()>;
}
