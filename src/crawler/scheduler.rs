//! Adaptive concurrency scheduler
//!
//! Runs an admission loop over a [`PoolDriver`]: whenever there is pending
//! work and a free slot under the current concurrency ceiling, one more
//! task is started without awaiting its completion. The ceiling adapts on
//! a fixed cadence between the configured minimum and maximum, moving down
//! when recent load samples show saturation and up when they show headroom
//! while every slot is busy.
//!
//! Failures inside a single task never leave the driver (they are turned
//! into retry bookkeeping there); an error returned by a driver method is
//! by definition fatal and aborts the loop.

use crate::crawler::load::LoadMonitor;
use crate::{CrawlError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Notify};

/// Grace period for letting in-flight tasks drain after a fatal error
const FATAL_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Poll cap so lost wakeups can only delay, never stall, the loop
const WAIT_POLL_CAP: Duration = Duration::from_millis(20);

/// Work source driven by the scheduler
///
/// `run_one` performs one complete unit of work including all of its own
/// failure handling; returning an error aborts the whole scheduler.
#[async_trait]
pub trait PoolDriver: Send + Sync {
    /// Is there work that could be started right now?
    async fn is_ready(&self) -> Result<bool>;

    /// Runs one unit of work to completion
    async fn run_one(&self) -> Result<()>;

    /// Has all work reached a terminal state?
    async fn is_finished(&self) -> Result<bool>;
}

/// Scheduler tuning knobs
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Concurrency floor; held even under light load while work is pending
    pub min_concurrency: usize,

    /// Concurrency cap; never exceeded
    pub max_concurrency: usize,

    /// Slots added per upward adjustment
    pub scale_up_step: usize,

    /// Slots removed per downward adjustment
    pub scale_down_step: usize,

    /// Cadence of ceiling recomputation
    pub adjust_interval: Duration,

    /// Fallback poll interval when no wakeup arrives
    pub admit_interval: Duration,

    /// Recent snapshots considered by the scaling decision
    pub scale_window: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            min_concurrency: 1,
            max_concurrency: 20,
            scale_up_step: 1,
            scale_down_step: 2,
            adjust_interval: Duration::from_secs(1),
            admit_interval: Duration::from_millis(50),
            scale_window: 10,
        }
    }
}

struct SchedulerState {
    options: SchedulerOptions,
    desired: AtomicUsize,
    running: AtomicUsize,
    admitting_tx: watch::Sender<bool>,
    slot_freed: Notify,
}

/// Adaptive worker pool over a [`PoolDriver`]
pub struct ConcurrencyScheduler {
    state: Arc<SchedulerState>,
    load: LoadMonitor,
}

/// Cloneable control handle for pausing and introspection
#[derive(Clone)]
pub struct SchedulerHandle {
    state: Arc<SchedulerState>,
}

impl SchedulerHandle {
    /// Stops admitting new work and waits up to `grace` for in-flight work
    ///
    /// Returns true if everything drained. On expiry it resolves anyway;
    /// work still in flight may be duplicated when the crawl resumes from
    /// persisted state, which is logged and accepted.
    pub async fn pause(&self, grace: Duration) -> bool {
        self.state.admitting_tx.send_replace(false);
        tracing::info!(grace_ms = grace.as_millis() as u64, "Scheduler pausing");

        let deadline = Instant::now() + grace;
        while self.state.running.load(Ordering::SeqCst) > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!(
                    in_flight = self.state.running.load(Ordering::SeqCst),
                    "Pause grace period expired with work in flight; \
                     resumed work may be processed twice"
                );
                return false;
            }
            let _ = tokio::time::timeout(
                remaining.min(WAIT_POLL_CAP),
                self.state.slot_freed.notified(),
            )
            .await;
        }
        true
    }

    /// Resumes admission after a pause
    pub fn resume(&self) {
        self.state.admitting_tx.send_replace(true);
        tracing::info!("Scheduler resumed");
    }

    pub fn is_paused(&self) -> bool {
        !*self.state.admitting_tx.borrow()
    }

    /// Tasks currently in flight
    pub fn running(&self) -> usize {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Current concurrency ceiling
    pub fn desired_concurrency(&self) -> usize {
        self.state.desired.load(Ordering::SeqCst)
    }
}

impl ConcurrencyScheduler {
    pub fn new(options: SchedulerOptions, load: LoadMonitor) -> Self {
        let (admitting_tx, _) = watch::channel(true);
        let desired = options.min_concurrency;

        Self {
            state: Arc::new(SchedulerState {
                options,
                desired: AtomicUsize::new(desired),
                running: AtomicUsize::new(0),
                admitting_tx,
                slot_freed: Notify::new(),
            }),
            load,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            state: self.state.clone(),
        }
    }

    /// Drives the pool until the driver reports completion or a fatal error
    pub async fn run(&self, driver: Arc<dyn PoolDriver>) -> Result<()> {
        let sampler = self.load.spawn_sampler();
        let result = self.run_inner(driver).await;
        sampler.abort();
        result
    }

    async fn run_inner(&self, driver: Arc<dyn PoolDriver>) -> Result<()> {
        let state = &self.state;
        let (fatal_tx, mut fatal_rx) = mpsc::channel::<CrawlError>(4);
        let mut admitting_rx = state.admitting_tx.subscribe();
        let mut last_adjust = Instant::now();

        tracing::info!(
            min = state.options.min_concurrency,
            max = state.options.max_concurrency,
            "Scheduler started"
        );

        loop {
            if let Ok(error) = fatal_rx.try_recv() {
                return self.abort_with(error).await;
            }

            if last_adjust.elapsed() >= state.options.adjust_interval {
                self.adjust_capacity();
                last_adjust = Instant::now();
            }

            if !*admitting_rx.borrow() {
                // Paused: park until resumed or a fatal error arrives
                tokio::select! {
                    changed = admitting_rx.changed() => {
                        if changed.is_err() {
                            return Ok(());
                        }
                    }
                    Some(error) = fatal_rx.recv() => {
                        return self.abort_with(error).await;
                    }
                }
                continue;
            }

            let running = state.running.load(Ordering::SeqCst);
            if running == 0 && driver.is_finished().await? {
                break;
            }

            if running < state.desired.load(Ordering::SeqCst) && driver.is_ready().await? {
                state.running.fetch_add(1, Ordering::SeqCst);
                let task_driver = driver.clone();
                let task_state = state.clone();
                let task_fatal = fatal_tx.clone();

                tokio::spawn(async move {
                    let result = task_driver.run_one().await;
                    task_state.running.fetch_sub(1, Ordering::SeqCst);
                    task_state.slot_freed.notify_waiters();
                    if let Err(error) = result {
                        let _ = task_fatal.send(error).await;
                    }
                });

                // A slot was filled; immediately try to fill the next one
                continue;
            }

            tokio::select! {
                _ = state.slot_freed.notified() => {}
                _ = tokio::time::sleep(state.options.admit_interval.min(WAIT_POLL_CAP)) => {}
                _ = admitting_rx.changed() => {}
                Some(error) = fatal_rx.recv() => {
                    return self.abort_with(error).await;
                }
            }
        }

        tracing::info!("Scheduler finished: all work reached a terminal state");
        Ok(())
    }

    /// Stops admission and lets in-flight tasks drain before propagating
    async fn abort_with(&self, error: CrawlError) -> Result<()> {
        tracing::error!(error = %error, "Fatal error, aborting scheduler");
        self.state.admitting_tx.send_replace(false);
        let drained = self.handle().pause(FATAL_DRAIN_GRACE).await;
        if !drained {
            tracing::warn!("In-flight tasks abandoned after fatal error");
        }
        Err(error)
    }

    fn adjust_capacity(&self) {
        let state = &self.state;
        let desired = state.desired.load(Ordering::SeqCst);
        let running = state.running.load(Ordering::SeqCst);
        let overloaded_ratio = self.load.overloaded_ratio(state.options.scale_window);

        let new_desired = if overloaded_ratio > 0.5 {
            desired
                .saturating_sub(state.options.scale_down_step)
                .max(state.options.min_concurrency)
        } else if overloaded_ratio < 0.1 && running >= desired {
            (desired + state.options.scale_up_step).min(state.options.max_concurrency)
        } else {
            desired
        };

        if new_desired != desired {
            tracing::debug!(
                from = desired,
                to = new_desired,
                overloaded_ratio,
                "Adjusted concurrency ceiling"
            );
            state.desired.store(new_desired, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::load::LoadMonitorOptions;
    use std::sync::atomic::AtomicU64;

    fn load() -> LoadMonitor {
        LoadMonitor::new(LoadMonitorOptions::default())
    }

    fn options(min: usize, max: usize) -> SchedulerOptions {
        SchedulerOptions {
            min_concurrency: min,
            max_concurrency: max,
            adjust_interval: Duration::from_millis(50),
            admit_interval: Duration::from_millis(5),
            ..SchedulerOptions::default()
        }
    }

    /// Driver with a fixed number of sleeping tasks, tracking peak concurrency
    struct CountingDriver {
        remaining: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        completed: AtomicU64,
        task_duration: Duration,
    }

    impl CountingDriver {
        fn new(total: usize, task_duration: Duration) -> Self {
            Self {
                remaining: AtomicUsize::new(total),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                task_duration,
            }
        }
    }

    #[async_trait]
    impl PoolDriver for CountingDriver {
        async fn is_ready(&self) -> Result<bool> {
            Ok(self.remaining.load(Ordering::SeqCst) > 0)
        }

        async fn run_one(&self) -> Result<()> {
            let mut current = self.remaining.load(Ordering::SeqCst);
            loop {
                if current == 0 {
                    return Ok(());
                }
                match self.remaining.compare_exchange(
                    current,
                    current - 1,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => break,
                    Err(actual) => current = actual,
                }
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.task_duration).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn is_finished(&self) -> Result<bool> {
            Ok(self.remaining.load(Ordering::SeqCst) == 0)
        }
    }

    #[tokio::test]
    async fn test_runs_all_work_to_completion() {
        let scheduler = ConcurrencyScheduler::new(options(2, 2), load());
        let driver = Arc::new(CountingDriver::new(20, Duration::from_millis(2)));

        scheduler.run(driver.clone()).await.unwrap();
        assert_eq!(driver.completed.load(Ordering::SeqCst), 20);
        assert_eq!(scheduler.handle().running(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_ceiling() {
        let scheduler = ConcurrencyScheduler::new(options(4, 4), load());
        let driver = Arc::new(CountingDriver::new(40, Duration::from_millis(5)));

        scheduler.run(driver.clone()).await.unwrap();
        assert!(driver.peak.load(Ordering::SeqCst) <= 4);
        // With plenty of work the pool actually reaches its floor
        assert!(driver.peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_loop() {
        struct FailingDriver;

        #[async_trait]
        impl PoolDriver for FailingDriver {
            async fn is_ready(&self) -> Result<bool> {
                Ok(true)
            }
            async fn run_one(&self) -> Result<()> {
                Err(CrawlError::BookkeepingDiverged {
                    unique_key: "k".into(),
                    message: "test".into(),
                })
            }
            async fn is_finished(&self) -> Result<bool> {
                Ok(false)
            }
        }

        let scheduler = ConcurrencyScheduler::new(options(1, 1), load());
        let result = scheduler.run(Arc::new(FailingDriver)).await;
        assert!(matches!(
            result,
            Err(CrawlError::BookkeepingDiverged { .. })
        ));
    }

    #[tokio::test]
    async fn test_provider_error_in_readiness_is_fatal() {
        struct BrokenReadiness;

        #[async_trait]
        impl PoolDriver for BrokenReadiness {
            async fn is_ready(&self) -> Result<bool> {
                Err(CrawlError::Storage(
                    crate::storage::StorageError::Unavailable("down".into()),
                ))
            }
            async fn run_one(&self) -> Result<()> {
                Ok(())
            }
            async fn is_finished(&self) -> Result<bool> {
                Ok(false)
            }
        }

        let scheduler = ConcurrencyScheduler::new(options(1, 1), load());
        let result = scheduler.run(Arc::new(BrokenReadiness)).await;
        assert!(matches!(result, Err(CrawlError::Storage(_))));
    }

    #[tokio::test]
    async fn test_pause_stops_admission_and_drains() {
        let scheduler = ConcurrencyScheduler::new(options(2, 2), load());
        let handle = scheduler.handle();
        let driver = Arc::new(CountingDriver::new(1000, Duration::from_millis(2)));

        let run_driver = driver.clone();
        let run = tokio::spawn(async move { scheduler.run(run_driver).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let drained = handle.pause(Duration::from_secs(1)).await;
        assert!(drained);
        assert_eq!(handle.running(), 0);

        let completed_at_pause = driver.completed.load(Ordering::SeqCst);
        assert!(completed_at_pause < 1000);

        // No new work admitted while paused
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(driver.completed.load(Ordering::SeqCst), completed_at_pause);

        handle.resume();
        run.await.unwrap().unwrap();
        assert_eq!(driver.completed.load(Ordering::SeqCst), 1000);
    }

    #[tokio::test]
    async fn test_pause_grace_expiry_resolves_anyway() {
        let scheduler = ConcurrencyScheduler::new(options(1, 1), load());
        let handle = scheduler.handle();
        let driver = Arc::new(CountingDriver::new(5, Duration::from_millis(200)));

        let run = tokio::spawn(async move { scheduler.run(driver).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // A task sleeping 200ms cannot drain inside a 10ms grace
        let drained = handle.pause(Duration::from_millis(10)).await;
        assert!(!drained);
        assert!(handle.running() > 0);

        handle.resume();
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_scales_up_with_headroom() {
        let mut opts = options(1, 8);
        opts.adjust_interval = Duration::from_millis(10);
        let scheduler = ConcurrencyScheduler::new(opts, load());
        let handle = scheduler.handle();
        let driver = Arc::new(CountingDriver::new(500, Duration::from_millis(10)));

        let run = tokio::spawn(async move { scheduler.run(driver).await });
        tokio::time::sleep(Duration::from_millis(300)).await;

        // Saturated and calm: the ceiling has moved off the floor
        assert!(handle.desired_concurrency() > 1);
        run.abort();
    }

    #[tokio::test]
    async fn test_scales_down_under_overload_but_not_below_min() {
        let monitor = load();
        let mut opts = options(3, 8);
        opts.adjust_interval = Duration::from_millis(10);
        let scheduler = ConcurrencyScheduler::new(opts, monitor.clone());
        let handle = scheduler.handle();
        let driver = Arc::new(CountingDriver::new(10_000, Duration::from_millis(5)));

        // Saturate the overload signal before and during the run
        for _ in 0..20 {
            monitor.sample(Duration::from_secs(1));
        }

        let run = tokio::spawn(async move { scheduler.run(driver).await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(handle.desired_concurrency(), 3);
        run.abort();
    }
}
