//! Per-attempt task execution
//!
//! One `run_one` call drives a single attempt through its states: fetch a
//! request (binding a session concurrently when the pool is enabled), run
//! the hooks, the transport, and the user handler under their timeouts,
//! then settle the outcome: mark handled on success, reclaim for a retry
//! on a recoverable failure, or finalize as failed when the retry budget is
//! exhausted or retries are disabled.
//!
//! Store and session calls go through a bounded timeout-with-retries
//! wrapper. Exhausting it is normally absorbed into the attempt's own
//! failure handling; the two exceptions are marking a request handled and
//! the failed-request callback, where exhaustion means the crawl's own
//! bookkeeping can no longer be trusted and the whole run aborts.

use crate::crawler::context::{AttemptRegistry, CrawlingContext};
use crate::crawler::load::LoadMonitor;
use crate::crawler::scheduler::PoolDriver;
use crate::crawler::{CrawlHooks, PageHandler};
use crate::provider::RequestProvider;
use crate::session::{Session, SessionOutcome, SessionPool};
use crate::stats::Statistics;
use crate::storage::StorageResult;
use crate::transport::{PageFetcher, ProxyProvider};
use crate::{CrawlError, Result};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Executor tuning knobs
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// How many times a failed request is reclaimed before it fails for good
    pub max_request_retries: u32,

    /// Stop the crawl once this many requests reached a terminal state
    pub max_requests_per_crawl: Option<u64>,

    /// Budget for the transport fetch of one attempt
    pub navigation_timeout: Duration,

    /// Budget for the user handler of one attempt
    pub handler_timeout: Duration,

    /// Timeout for one store or session-pool call
    pub internal_timeout: Duration,

    /// Attempts per store or session-pool call
    pub internal_retries: u32,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            max_request_retries: 3,
            max_requests_per_crawl: None,
            navigation_timeout: Duration::from_secs(30),
            handler_timeout: Duration::from_secs(60),
            internal_timeout: Duration::from_secs(5),
            internal_retries: 3,
        }
    }
}

/// Wraps one store/session operation in a timeout, retrying a bounded
/// number of times before giving up
pub(crate) async fn with_timeout_and_retries<T, Fut, F>(
    mut operation: F,
    timeout: Duration,
    max_attempts: u32,
    label: &str,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        match tokio::time::timeout(timeout, operation()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(error)) => {
                last_error = error.to_string();
                tracing::debug!(label, attempt, error = %last_error, "Store call failed");
            }
            Err(_) => {
                last_error = format!("timed out after {timeout:?}");
                tracing::debug!(label, attempt, "Store call timed out");
            }
        }
    }

    Err(CrawlError::OperationExhausted {
        operation: label.to_string(),
        attempts: max_attempts,
        last_error,
    })
}

/// Runs attempts for the scheduler
pub struct TaskExecutor {
    options: ExecutorOptions,
    provider: Arc<RequestProvider>,
    handler: Arc<dyn PageHandler>,
    fetcher: Arc<dyn PageFetcher>,
    hooks: Arc<CrawlHooks>,
    sessions: Option<Arc<SessionPool>>,
    proxy: Option<Arc<dyn ProxyProvider>>,
    stats: Arc<Statistics>,
    load: LoadMonitor,
    registry: AttemptRegistry,
}

impl TaskExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        options: ExecutorOptions,
        provider: Arc<RequestProvider>,
        handler: Arc<dyn PageHandler>,
        fetcher: Arc<dyn PageFetcher>,
        hooks: Arc<CrawlHooks>,
        sessions: Option<Arc<SessionPool>>,
        proxy: Option<Arc<dyn ProxyProvider>>,
        stats: Arc<Statistics>,
        load: LoadMonitor,
        registry: AttemptRegistry,
    ) -> Self {
        Self {
            options,
            provider,
            handler,
            fetcher,
            hooks,
            sessions,
            proxy,
            stats,
            load,
            registry,
        }
    }

    fn limit_reached(&self) -> bool {
        self.options
            .max_requests_per_crawl
            .map_or(false, |max| self.stats.handled_total() >= max)
    }

    /// One attempt: hooks, transport, handler, each under its budget
    async fn run_attempt(&self, ctx: &mut CrawlingContext) -> anyhow::Result<()> {
        for hook in &self.hooks.request_mutation {
            hook.run(ctx).await?;
        }
        for hook in &self.hooks.pre_navigation {
            hook.run(ctx).await?;
        }

        let url = ctx.request.url.to_string();
        let page = tokio::time::timeout(
            self.options.navigation_timeout,
            self.fetcher.fetch(&ctx.request, ctx.proxy.as_ref()),
        )
        .await
        .map_err(|_| CrawlError::NavigationTimeout {
            url: url.clone(),
            timeout: self.options.navigation_timeout,
        })??;

        if let Some(page) = page {
            ctx.request.loaded_url = Some(page.final_url.clone());

            // A blocked status retires the session mid-attempt; the attempt
            // itself ends as a retryable failure so the request gets a
            // fresh identity next time.
            if let Some(session) = &ctx.session {
                if session.retire_on_blocked_status(page.status) {
                    let status = page.status;
                    ctx.page = Some(page);
                    anyhow::bail!("session flagged as blocked by status {status}");
                }
            }
            ctx.page = Some(page);
        }

        for hook in &self.hooks.post_navigation {
            hook.run(ctx).await?;
        }

        tokio::time::timeout(self.options.handler_timeout, self.handler.handle(ctx))
            .await
            .map_err(|_| CrawlError::HandlerTimeout {
                url,
                timeout: self.options.handler_timeout,
            })??;

        Ok(())
    }

    async fn complete_success(&self, ctx: &mut CrawlingContext) -> Result<()> {
        ctx.request.mark_handled_now();

        let request = &ctx.request;
        with_timeout_and_retries(
            || self.provider.mark_handled(request),
            self.options.internal_timeout,
            self.options.internal_retries,
            "mark handled",
        )
        .await
        .map_err(|error| CrawlError::BookkeepingDiverged {
            unique_key: request.unique_key.clone(),
            message: error.to_string(),
        })?;

        self.stats
            .finish_job(&ctx.attempt_id, ctx.request.retry_count);
        self.load.record_outcome(true);

        if let (Some(pool), Some(session)) = (&self.sessions, &ctx.session) {
            pool.release(session, SessionOutcome::Good);
        }

        tracing::debug!(url = %ctx.request.url, "Request handled");
        Ok(())
    }

    async fn complete_failure(
        &self,
        ctx: &mut CrawlingContext,
        error: anyhow::Error,
    ) -> Result<()> {
        ctx.request.push_error_message(format!("{error:#}"));
        self.load.record_outcome(false);

        if let (Some(pool), Some(session)) = (&self.sessions, &ctx.session) {
            pool.release(session, SessionOutcome::Bad);
        }

        if ctx.request.can_retry(self.options.max_request_retries) {
            ctx.request.retry_count += 1;

            let request = &ctx.request;
            let reclaimed = with_timeout_and_retries(
                || self.provider.reclaim(request),
                self.options.internal_timeout,
                self.options.internal_retries,
                "reclaim",
            )
            .await;

            match reclaimed {
                Ok(()) => {
                    self.stats.retry_job(&ctx.attempt_id);
                    tracing::debug!(
                        url = %ctx.request.url,
                        retry = ctx.request.retry_count,
                        error = %error,
                        "Request reclaimed for retry"
                    );
                    return Ok(());
                }
                Err(reclaim_error) => {
                    tracing::warn!(
                        url = %ctx.request.url,
                        error = %reclaim_error,
                        "Reclaim failed; request fails terminally"
                    );
                }
            }
        }

        // Terminal failure: still counts as handled for completion purposes
        ctx.request.mark_handled_now();

        let request = &ctx.request;
        with_timeout_and_retries(
            || self.provider.mark_handled(request),
            self.options.internal_timeout,
            self.options.internal_retries,
            "mark handled",
        )
        .await
        .map_err(|mark_error| CrawlError::BookkeepingDiverged {
            unique_key: request.unique_key.clone(),
            message: mark_error.to_string(),
        })?;

        self.stats.fail_job(&ctx.attempt_id, ctx.request.retry_count);
        tracing::warn!(
            url = %ctx.request.url,
            retries = ctx.request.retry_count,
            error = %error,
            "Request failed terminally"
        );

        if let Err(callback_error) = self.handler.failed(ctx, &error).await {
            return Err(CrawlError::FailedRequestCallback {
                unique_key: ctx.request.unique_key.clone(),
                source: callback_error,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl PoolDriver for TaskExecutor {
    async fn is_ready(&self) -> Result<bool> {
        if self.limit_reached() {
            return Ok(false);
        }
        Ok(!self.provider.is_empty().await?)
    }

    async fn is_finished(&self) -> Result<bool> {
        if self.limit_reached() {
            return Ok(true);
        }
        Ok(self.provider.is_finished().await?)
    }

    async fn run_one(&self) -> Result<()> {
        let timeout = self.options.internal_timeout;
        let retries = self.options.internal_retries;

        // Fetch the next request; bind a session concurrently when enabled.
        // Fetch exhaustion is fatal (the work source is gone); a session
        // binding failure only fails this attempt.
        let (request, session_result) = match &self.sessions {
            Some(pool) => {
                let (request, session) = tokio::join!(
                    with_timeout_and_retries(
                        || self.provider.fetch_next(),
                        timeout,
                        retries,
                        "provider fetch",
                    ),
                    with_timeout_and_retries(
                        || pool.acquire(),
                        timeout,
                        retries,
                        "session acquisition",
                    ),
                );
                (request?, Some(session))
            }
            None => {
                let request = with_timeout_and_retries(
                    || self.provider.fetch_next(),
                    timeout,
                    retries,
                    "provider fetch",
                )
                .await?;
                (request, None)
            }
        };

        let Some(mut request) = request else {
            // Transiently empty; the scheduler will ask again
            return Ok(());
        };

        // The crawl ceiling may have been crossed while this slot was being
        // admitted; put the request back untouched.
        if self.limit_reached() {
            if let Err(error) = self.provider.reclaim(&request).await {
                tracing::warn!(error = %error, "Failed to return request after crawl limit");
            }
            return Ok(());
        }

        request.reset_attempt_state();

        let (session, bind_error): (Option<Session>, Option<CrawlError>) = match session_result {
            Some(Ok(session)) => (Some(session), None),
            Some(Err(error)) => (None, Some(error)),
            None => (None, None),
        };

        let proxy = self
            .proxy
            .as_ref()
            .and_then(|p| p.new_proxy_info(session.as_ref().map(|s| s.id())));

        let mut ctx = CrawlingContext {
            attempt_id: self.registry.next_attempt_id(),
            request,
            session,
            proxy,
            page: None,
        };
        let _guard = self.registry.register(&ctx);
        self.stats.start_job(&ctx.attempt_id);

        let outcome = match bind_error {
            Some(error) => Err(anyhow::Error::new(error)),
            None => self.run_attempt(&mut ctx).await,
        };

        match outcome {
            Ok(()) => self.complete_success(&mut ctx).await,
            Err(error) => self.complete_failure(&mut ctx, error).await,
        }
    }
}
