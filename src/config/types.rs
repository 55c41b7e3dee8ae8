use crate::crawler::{ExecutorOptions, LoadMonitorOptions, SchedulerOptions};
use crate::session::SessionPoolOptions;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for driftnet
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,

    #[serde(default)]
    pub scaling: ScalingConfig,

    #[serde(default, rename = "session-pool")]
    pub session_pool: SessionPoolConfig,

    #[serde(default)]
    pub migration: MigrationConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub seeds: SeedsConfig,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Lower bound of the adaptive concurrency ceiling
    #[serde(rename = "min-concurrency", default = "default_min_concurrency")]
    pub min_concurrency: usize,

    /// Upper bound of the adaptive concurrency ceiling
    #[serde(rename = "max-concurrency", default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Times a failed request is retried before failing for good
    #[serde(rename = "max-request-retries", default = "default_max_request_retries")]
    pub max_request_retries: u32,

    /// Stop after this many requests reach a terminal state
    #[serde(rename = "max-requests-per-crawl", default)]
    pub max_requests_per_crawl: Option<u64>,

    /// Budget for fetching one page (milliseconds)
    #[serde(rename = "navigation-timeout-ms", default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,

    /// Budget for the user handler of one attempt (milliseconds)
    #[serde(rename = "handler-timeout-ms", default = "default_handler_timeout_ms")]
    pub handler_timeout_ms: u64,

    /// Timeout for one internal store call (milliseconds)
    #[serde(rename = "internal-timeout-ms", default = "default_internal_timeout_ms")]
    pub internal_timeout_ms: u64,

    /// Attempts per internal store call
    #[serde(rename = "internal-retries", default = "default_internal_retries")]
    pub internal_retries: u32,

    /// User agent sent by the HTTP transport
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,
}

/// Adaptive scaling configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScalingConfig {
    /// Load sampling cadence (milliseconds)
    #[serde(rename = "sample-interval-ms", default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,

    /// Ceiling recomputation cadence (milliseconds)
    #[serde(rename = "adjust-interval-ms", default = "default_adjust_interval_ms")]
    pub adjust_interval_ms: u64,

    /// Slots added per upward adjustment
    #[serde(rename = "scale-up-step", default = "default_scale_up_step")]
    pub scale_up_step: usize,

    /// Slots removed per downward adjustment
    #[serde(rename = "scale-down-step", default = "default_scale_down_step")]
    pub scale_down_step: usize,

    /// Event-loop drift above this flags a sample as overloaded (milliseconds)
    #[serde(rename = "max-event-loop-lag-ms", default = "default_max_event_loop_lag_ms")]
    pub max_event_loop_lag_ms: u64,

    /// Failed fraction of recent requests above this flags overload
    #[serde(rename = "max-error-ratio", default = "default_max_error_ratio")]
    pub max_error_ratio: f64,

    /// Memory ceiling in megabytes; unset disables the signal
    #[serde(rename = "max-memory-mbytes", default)]
    pub max_memory_mbytes: Option<u64>,
}

/// Session pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionPoolConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(rename = "max-pool-size", default = "default_max_pool_size")]
    pub max_pool_size: usize,

    /// Attempts one session serves before rotating out
    #[serde(rename = "max-session-usage", default = "default_max_session_usage")]
    pub max_session_usage: u32,

    /// Status codes that retire a session as blocked
    #[serde(rename = "blocked-status-codes", default = "default_blocked_status_codes")]
    pub blocked_status_codes: Vec<u16>,
}

/// Graceful shutdown configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationConfig {
    /// Time granted to in-flight work when a migration signal arrives
    #[serde(rename = "grace-period-ms", default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

/// Storage configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite queue database; unset runs fully in memory
    #[serde(rename = "queue-path", default)]
    pub queue_path: Option<String>,
}

/// Proxy rotation configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyConfig {
    /// Proxy server URLs; empty disables proxying
    #[serde(default)]
    pub urls: Vec<String>,
}

/// Seed URL configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedsConfig {
    #[serde(default)]
    pub urls: Vec<String>,
}

fn default_min_concurrency() -> usize {
    1
}
fn default_max_concurrency() -> usize {
    20
}
fn default_max_request_retries() -> u32 {
    3
}
fn default_navigation_timeout_ms() -> u64 {
    30_000
}
fn default_handler_timeout_ms() -> u64 {
    60_000
}
fn default_internal_timeout_ms() -> u64 {
    5_000
}
fn default_internal_retries() -> u32 {
    3
}
fn default_user_agent() -> String {
    format!("driftnet/{}", env!("CARGO_PKG_VERSION"))
}
fn default_sample_interval_ms() -> u64 {
    500
}
fn default_adjust_interval_ms() -> u64 {
    1_000
}
fn default_scale_up_step() -> usize {
    1
}
fn default_scale_down_step() -> usize {
    2
}
fn default_max_event_loop_lag_ms() -> u64 {
    50
}
fn default_max_error_ratio() -> f64 {
    0.3
}
fn default_true() -> bool {
    true
}
fn default_max_pool_size() -> usize {
    20
}
fn default_max_session_usage() -> u32 {
    50
}
fn default_blocked_status_codes() -> Vec<u16> {
    vec![401, 403, 429]
}
fn default_grace_period_ms() -> u64 {
    10_000
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            min_concurrency: default_min_concurrency(),
            max_concurrency: default_max_concurrency(),
            max_request_retries: default_max_request_retries(),
            max_requests_per_crawl: None,
            navigation_timeout_ms: default_navigation_timeout_ms(),
            handler_timeout_ms: default_handler_timeout_ms(),
            internal_timeout_ms: default_internal_timeout_ms(),
            internal_retries: default_internal_retries(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval_ms(),
            adjust_interval_ms: default_adjust_interval_ms(),
            scale_up_step: default_scale_up_step(),
            scale_down_step: default_scale_down_step(),
            max_event_loop_lag_ms: default_max_event_loop_lag_ms(),
            max_error_ratio: default_max_error_ratio(),
            max_memory_mbytes: None,
        }
    }
}

impl Default for SessionPoolConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_pool_size: default_max_pool_size(),
            max_session_usage: default_max_session_usage(),
            blocked_status_codes: default_blocked_status_codes(),
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

impl Config {
    /// Executor options derived from the crawler section
    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            max_request_retries: self.crawler.max_request_retries,
            max_requests_per_crawl: self.crawler.max_requests_per_crawl,
            navigation_timeout: Duration::from_millis(self.crawler.navigation_timeout_ms),
            handler_timeout: Duration::from_millis(self.crawler.handler_timeout_ms),
            internal_timeout: Duration::from_millis(self.crawler.internal_timeout_ms),
            internal_retries: self.crawler.internal_retries,
        }
    }

    /// Scheduler options derived from the crawler and scaling sections
    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            min_concurrency: self.crawler.min_concurrency,
            max_concurrency: self.crawler.max_concurrency,
            scale_up_step: self.scaling.scale_up_step,
            scale_down_step: self.scaling.scale_down_step,
            adjust_interval: Duration::from_millis(self.scaling.adjust_interval_ms),
            ..SchedulerOptions::default()
        }
    }

    /// Load monitor options derived from the scaling section
    pub fn load_options(&self) -> LoadMonitorOptions {
        LoadMonitorOptions {
            sample_interval: Duration::from_millis(self.scaling.sample_interval_ms),
            max_event_loop_lag: Duration::from_millis(self.scaling.max_event_loop_lag_ms),
            max_error_ratio: self.scaling.max_error_ratio,
            max_memory_bytes: self.scaling.max_memory_mbytes.map(|mb| mb * 1024 * 1024),
        }
    }

    /// Session pool options derived from the session-pool section
    pub fn session_pool_options(&self) -> Option<SessionPoolOptions> {
        if !self.session_pool.enabled {
            return None;
        }
        Some(SessionPoolOptions {
            max_pool_size: self.session_pool.max_pool_size,
            max_session_usage: self.session_pool.max_session_usage,
            blocked_status_codes: self.session_pool.blocked_status_codes.clone(),
        })
    }

    /// Migration grace period
    pub fn migration_grace(&self) -> Duration {
        Duration::from_millis(self.migration.grace_period_ms)
    }
}
