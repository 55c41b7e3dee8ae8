//! Driftnet: a general crawl orchestration engine
//!
//! Driftnet drives parallel fetch/process cycles over a stream of requests
//! until the stream is exhausted, while respecting resource limits, retry
//! policy, and graceful-shutdown signals. The request stream is reconciled
//! from an in-memory seed list and a durable queue; an adaptive worker pool
//! scales concurrency between configured bounds based on host load.

pub mod config;
pub mod crawler;
pub mod events;
pub mod provider;
pub mod request;
pub mod session;
pub mod stats;
pub mod storage;
pub mod transport;

use std::time::Duration;
use thiserror::Error;

/// Main error type for driftnet operations
///
/// Per-request failures (handler errors, timeouts) never surface through
/// this type; they are absorbed by the retry machinery and recorded on the
/// request itself. `CrawlError` covers configuration problems, storage
/// failures, and the small set of fatal conditions that abort a whole run.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("No request source configured: provide a request list, a request queue, or both")]
    NoRequestSource,

    #[error("Invalid request for {url}: {message}")]
    InvalidRequest { url: String, message: String },

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    OperationExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Bookkeeping diverged while marking {unique_key} handled: {message}")]
    BookkeepingDiverged { unique_key: String, message: String },

    #[error("Failed-request callback for {unique_key} threw: {source}")]
    FailedRequestCallback {
        unique_key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("Navigation timeout after {timeout:?} for {url}")]
    NavigationTimeout { url: String, timeout: Duration },

    #[error("Handler timeout after {timeout:?} for {url}")]
    HandlerTimeout { url: String, timeout: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for driftnet operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{
    AttemptRegistry, ConcurrencyScheduler, CrawlHook, CrawlHooks, Crawler, CrawlerBuilder,
    CrawlingContext, LoadMonitor, MigrationCoordinator, PageHandler, PoolDriver, SchedulerHandle,
};
pub use events::{EventBus, EventSubscription, PlatformEvent};
pub use provider::RequestProvider;
pub use request::{HttpMethod, Request};
pub use session::{Session, SessionOutcome, SessionPool};
pub use stats::{Statistics, StatisticsSummary};
pub use storage::{
    KeyValueStore, MemoryKeyValueStore, MemoryRequestQueue, QueueOperationInfo, RequestList,
    RequestQueue, SqliteRequestQueue,
};
pub use transport::{
    FetchedPage, HttpFetcher, NoopFetcher, PageFetcher, ProxyInfo, ProxyProvider, StaticProxyList,
};
