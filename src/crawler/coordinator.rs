//! Top-level crawler assembly and run loop
//!
//! [`Crawler`] wires the configured pieces together: request sources into a
//! provider, the session pool, statistics, the transport capability, the
//! hook strategy set, and (when an event subscription is supplied) the
//! migration coordinator. `run()` drives the scheduler until every request
//! reaches a terminal state or a fatal error aborts the crawl; final
//! statistics are computed either way.

use crate::crawler::context::AttemptRegistry;
use crate::crawler::executor::{ExecutorOptions, TaskExecutor};
use crate::crawler::load::{LoadMonitor, LoadMonitorOptions};
use crate::crawler::migration::MigrationCoordinator;
use crate::crawler::scheduler::{ConcurrencyScheduler, SchedulerHandle, SchedulerOptions};
use crate::crawler::{CrawlHooks, PageHandler};
use crate::events::EventSubscription;
use crate::provider::RequestProvider;
use crate::session::{SessionPool, SessionPoolOptions};
use crate::stats::{Statistics, StatisticsSummary};
use crate::storage::{KeyValueStore, RequestList, RequestQueue};
use crate::transport::{NoopFetcher, PageFetcher, ProxyProvider};
use crate::{CrawlError, Result};
use std::sync::Arc;
use std::time::Duration;

/// Builder for a [`Crawler`]
///
/// A handler and at least one request source are required; everything else
/// has defaults. The hook set is fixed here: there are exactly three
/// override points (request mutation, pre-navigation, post-navigation) and
/// they are validated at build time, not patched in at runtime.
pub struct CrawlerBuilder {
    handler: Option<Arc<dyn PageHandler>>,
    fetcher: Arc<dyn PageFetcher>,
    list: Option<RequestList>,
    queue: Option<Arc<dyn RequestQueue>>,
    state_store: Option<Arc<dyn KeyValueStore>>,
    session_pool: Option<SessionPoolOptions>,
    proxy: Option<Arc<dyn ProxyProvider>>,
    hooks: CrawlHooks,
    event_subscription: Option<EventSubscription>,
    executor_options: ExecutorOptions,
    scheduler_options: SchedulerOptions,
    load_options: LoadMonitorOptions,
    migration_grace: Duration,
}

impl CrawlerBuilder {
    pub fn new() -> Self {
        Self {
            handler: None,
            fetcher: Arc::new(NoopFetcher),
            list: None,
            queue: None,
            state_store: None,
            session_pool: None,
            proxy: None,
            hooks: CrawlHooks::default(),
            event_subscription: None,
            executor_options: ExecutorOptions::default(),
            scheduler_options: SchedulerOptions::default(),
            load_options: LoadMonitorOptions::default(),
            migration_grace: Duration::from_secs(10),
        }
    }

    /// Sets the page handler (required)
    pub fn handler(mut self, handler: Arc<dyn PageHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Sets the transport capability; defaults to no transport
    pub fn fetcher(mut self, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Seeds the crawl from a finite request list
    pub fn request_list(mut self, list: RequestList) -> Self {
        self.list = Some(list);
        self
    }

    /// Seeds the crawl from URL strings
    pub fn seed_urls<S: AsRef<str>>(mut self, urls: &[S]) -> Result<Self> {
        self.list = Some(RequestList::from_urls(urls)?);
        Ok(self)
    }

    /// Attaches a durable request queue
    pub fn request_queue(mut self, queue: Arc<dyn RequestQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Attaches a key-value store for list-progress and statistics snapshots
    pub fn state_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Enables the session pool
    pub fn session_pool(mut self, options: SessionPoolOptions) -> Self {
        self.session_pool = Some(options);
        self
    }

    /// Attaches a proxy provider, consulted once per attempt
    pub fn proxy_provider(mut self, proxy: Arc<dyn ProxyProvider>) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Replaces the hook strategy set
    pub fn hooks(mut self, hooks: CrawlHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Subscribes the crawl to platform lifecycle signals
    pub fn event_subscription(mut self, subscription: EventSubscription) -> Self {
        self.event_subscription = Some(subscription);
        self
    }

    pub fn executor_options(mut self, options: ExecutorOptions) -> Self {
        self.executor_options = options;
        self
    }

    pub fn scheduler_options(mut self, options: SchedulerOptions) -> Self {
        self.scheduler_options = options;
        self
    }

    pub fn load_options(mut self, options: LoadMonitorOptions) -> Self {
        self.load_options = options;
        self
    }

    /// Grace period granted to in-flight work on a migration signal
    pub fn migration_grace(mut self, grace: Duration) -> Self {
        self.migration_grace = grace;
        self
    }

    /// Validates the configuration and assembles the crawler
    pub fn build(self) -> Result<Crawler> {
        let handler = self.handler.ok_or_else(|| {
            CrawlError::Config(crate::ConfigError::Validation(
                "a page handler is required".to_string(),
            ))
        })?;

        if self.scheduler_options.min_concurrency == 0 {
            return Err(CrawlError::Config(crate::ConfigError::Validation(
                "min-concurrency must be at least 1".to_string(),
            )));
        }
        if self.scheduler_options.max_concurrency < self.scheduler_options.min_concurrency {
            return Err(CrawlError::Config(crate::ConfigError::Validation(
                "max-concurrency must not be below min-concurrency".to_string(),
            )));
        }

        let mut provider = RequestProvider::new(self.list, self.queue)?;
        if let Some(store) = &self.state_store {
            provider = provider.with_state_store(store.clone());
        }

        Ok(Crawler {
            provider: Arc::new(provider),
            handler,
            fetcher: self.fetcher,
            hooks: Arc::new(self.hooks),
            sessions: self.session_pool.map(|o| Arc::new(SessionPool::new(o))),
            proxy: self.proxy,
            state_store: self.state_store,
            stats: Arc::new(Statistics::new()),
            event_subscription: std::sync::Mutex::new(self.event_subscription),
            executor_options: self.executor_options,
            scheduler_options: self.scheduler_options,
            load_options: self.load_options,
            migration_grace: self.migration_grace,
            registry: AttemptRegistry::new(),
            scheduler_handle: std::sync::Mutex::new(None),
        })
    }
}

impl Default for CrawlerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Assembled crawl engine
pub struct Crawler {
    provider: Arc<RequestProvider>,
    handler: Arc<dyn PageHandler>,
    fetcher: Arc<dyn PageFetcher>,
    hooks: Arc<CrawlHooks>,
    sessions: Option<Arc<SessionPool>>,
    proxy: Option<Arc<dyn ProxyProvider>>,
    state_store: Option<Arc<dyn KeyValueStore>>,
    stats: Arc<Statistics>,
    event_subscription: std::sync::Mutex<Option<EventSubscription>>,
    executor_options: ExecutorOptions,
    scheduler_options: SchedulerOptions,
    load_options: LoadMonitorOptions,
    migration_grace: Duration,
    registry: AttemptRegistry,
    scheduler_handle: std::sync::Mutex<Option<SchedulerHandle>>,
}

impl Crawler {
    pub fn builder() -> CrawlerBuilder {
        CrawlerBuilder::new()
    }

    /// Shared attempt registry, for introspection
    pub fn attempt_registry(&self) -> AttemptRegistry {
        self.registry.clone()
    }

    /// Statistics sink, live during and after the run
    pub fn statistics(&self) -> Arc<Statistics> {
        self.stats.clone()
    }

    /// Control handle of the running scheduler; None before `run` starts
    pub fn scheduler_handle(&self) -> Option<SchedulerHandle> {
        self.scheduler_handle.lock().unwrap().clone()
    }

    /// Drives the crawl until all work reaches a terminal state
    ///
    /// Returns the final statistics summary. A fatal error propagates, but
    /// the summary is still computed and logged first.
    pub async fn run(&self) -> Result<StatisticsSummary> {
        self.stats.mark_started();

        // Resume bookkeeping persisted by an earlier run, when present
        if let Some(store) = &self.state_store {
            if let Err(error) = self.provider.restore_state().await {
                tracing::warn!(error = %error, "Could not restore request state");
            }
            if let Err(error) = self.stats.restore_state(store.as_ref()).await {
                tracing::warn!(error = %error, "Could not restore statistics");
            }
        }

        let load = LoadMonitor::new(self.load_options.clone());
        let scheduler = ConcurrencyScheduler::new(self.scheduler_options.clone(), load.clone());
        *self.scheduler_handle.lock().unwrap() = Some(scheduler.handle());

        let executor = Arc::new(TaskExecutor::new(
            self.executor_options.clone(),
            self.provider.clone(),
            self.handler.clone(),
            self.fetcher.clone(),
            self.hooks.clone(),
            self.sessions.clone(),
            self.proxy.clone(),
            self.stats.clone(),
            load,
            self.registry.clone(),
        ));

        let subscription = self.event_subscription.lock().unwrap().take();
        let migration_task = subscription.map(|subscription| {
            MigrationCoordinator::new(
                subscription,
                scheduler.handle(),
                self.provider.clone(),
                self.stats.clone(),
                self.state_store.clone(),
                self.migration_grace,
            )
            .spawn()
        });

        let result = scheduler.run(executor).await;

        if let Some(task) = migration_task {
            task.abort();
        }

        // Final statistics are computed no matter how the run ended
        let summary = self.stats.calculate();
        tracing::info!(
            finished = summary.requests_finished,
            failed = summary.requests_failed,
            avg_duration_ms = summary.request_avg_duration_millis,
            per_minute = summary.requests_per_minute,
            "Crawl complete"
        );

        if let Some(store) = &self.state_store {
            if let Err(error) = self.stats.persist_state(store.as_ref()).await {
                tracing::warn!(error = %error, "Could not persist final statistics");
            }
        }

        result.map(|_| summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::CrawlingContext;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct CollectingHandler {
        urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PageHandler for CollectingHandler {
        async fn handle(&self, ctx: &mut CrawlingContext) -> anyhow::Result<()> {
            self.urls.lock().unwrap().push(ctx.request.url.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_build_without_handler_fails() {
        let result = CrawlerBuilder::new()
            .seed_urls(&["https://example.com/"])
            .unwrap()
            .build();
        assert!(matches!(result, Err(CrawlError::Config(_))));
    }

    #[test]
    fn test_build_without_sources_fails() {
        let result = CrawlerBuilder::new()
            .handler(Arc::new(CollectingHandler {
                urls: Mutex::new(Vec::new()),
            }))
            .build();
        assert!(matches!(result, Err(CrawlError::NoRequestSource)));
    }

    #[test]
    fn test_build_rejects_zero_concurrency() {
        let result = CrawlerBuilder::new()
            .handler(Arc::new(CollectingHandler {
                urls: Mutex::new(Vec::new()),
            }))
            .seed_urls(&["https://example.com/"])
            .unwrap()
            .scheduler_options(SchedulerOptions {
                min_concurrency: 0,
                ..SchedulerOptions::default()
            })
            .build();
        assert!(matches!(result, Err(CrawlError::Config(_))));
    }

    #[tokio::test]
    async fn test_small_crawl_runs_to_completion() {
        let handler = Arc::new(CollectingHandler {
            urls: Mutex::new(Vec::new()),
        });

        let crawler = CrawlerBuilder::new()
            .handler(handler.clone())
            .seed_urls(&[
                "https://example.com/a",
                "https://example.com/b",
                "https://example.com/c",
            ])
            .unwrap()
            .build()
            .unwrap();

        let summary = crawler.run().await.unwrap();
        assert_eq!(summary.requests_finished, 3);
        assert_eq!(summary.requests_failed, 0);

        let mut urls = handler.urls.lock().unwrap().clone();
        urls.sort();
        assert_eq!(urls.len(), 3);
    }
}
