//! Crawl orchestration
//!
//! This module contains the engine core:
//! - the adaptive concurrency scheduler and its load monitor
//! - the per-attempt task executor and retry state machine
//! - the crawling context and in-flight attempt registry
//! - the migration coordinator for graceful shutdown
//! - the top-level [`Crawler`] that wires it all together

mod context;
mod coordinator;
mod executor;
mod load;
mod migration;
mod scheduler;

pub use context::{AttemptInfo, AttemptRegistry, CrawlingContext};
pub use coordinator::{Crawler, CrawlerBuilder};
pub use executor::{ExecutorOptions, TaskExecutor};
pub use load::{LoadMonitor, LoadMonitorOptions, LoadSnapshot};
pub use migration::MigrationCoordinator;
pub use scheduler::{ConcurrencyScheduler, PoolDriver, SchedulerHandle, SchedulerOptions};

use async_trait::async_trait;
use std::sync::Arc;

/// User-supplied page processing
///
/// `handle` runs once per attempt and may mutate the request in place;
/// throwing signals a failure and drives the retry machinery. `failed` is
/// invoked exactly once per terminally-failed request. An error thrown
/// from it aborts the whole crawl, because it means the crawl's own
/// bookkeeping is broken rather than a single page.
#[async_trait]
pub trait PageHandler: Send + Sync {
    async fn handle(&self, context: &mut CrawlingContext) -> anyhow::Result<()>;

    async fn failed(
        &self,
        context: &mut CrawlingContext,
        error: &anyhow::Error,
    ) -> anyhow::Result<()> {
        tracing::error!(
            url = %context.request.url,
            retries = context.request.retry_count,
            error = %error,
            "Request failed terminally"
        );
        Ok(())
    }
}

/// One override point in the crawl pipeline
#[async_trait]
pub trait CrawlHook: Send + Sync {
    async fn run(&self, context: &mut CrawlingContext) -> anyhow::Result<()>;
}

/// The closed set of override points
///
/// Fixed at construction time: request mutation runs before anything else
/// in an attempt, pre-navigation right before the transport, and
/// post-navigation once the page is available.
#[derive(Default)]
pub struct CrawlHooks {
    pub request_mutation: Vec<Arc<dyn CrawlHook>>,
    pub pre_navigation: Vec<Arc<dyn CrawlHook>>,
    pub post_navigation: Vec<Arc<dyn CrawlHook>>,
}
