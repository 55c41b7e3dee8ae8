//! Host load monitoring
//!
//! Samples the signals that feed the scheduler's scaling decision on a
//! fixed cadence: event-loop responsiveness (measured as timer drift, i.e.
//! how late a sleep wakes up compared to when it should have), the recent
//! network error ratio reported by the executor, and process memory
//! against an optional ceiling. Each sample becomes a [`LoadSnapshot`];
//! the scheduler looks at the recent overload ratio, so one noisy sample
//! never flips capacity on its own.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Snapshots kept for scaling decisions
const SNAPSHOT_HISTORY: usize = 60;

/// Request outcomes kept for the error-ratio window
const OUTCOME_WINDOW: usize = 100;

/// Outcomes required before the error ratio counts as a signal
const MIN_OUTCOMES_FOR_SIGNAL: usize = 10;

/// Load monitor tuning knobs
#[derive(Debug, Clone)]
pub struct LoadMonitorOptions {
    /// How often a snapshot is taken
    pub sample_interval: Duration,

    /// Timer drift above this marks the sample as overloaded
    pub max_event_loop_lag: Duration,

    /// Failed fraction of recent requests above this marks overload
    pub max_error_ratio: f64,

    /// Process RSS above this marks overload; None disables the signal
    pub max_memory_bytes: Option<u64>,
}

impl Default for LoadMonitorOptions {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_millis(500),
            max_event_loop_lag: Duration::from_millis(50),
            max_error_ratio: 0.3,
            max_memory_bytes: None,
        }
    }
}

/// One sampled observation of host load
#[derive(Debug, Clone)]
pub struct LoadSnapshot {
    pub taken_at: Instant,
    pub event_loop_lag: Duration,
    pub error_ratio: f64,
    pub memory_bytes: Option<u64>,
    pub overloaded: bool,
}

struct LoadInner {
    snapshots: VecDeque<LoadSnapshot>,
    outcomes: VecDeque<bool>,
}

/// Shared load monitor handle
#[derive(Clone)]
pub struct LoadMonitor {
    options: Arc<LoadMonitorOptions>,
    inner: Arc<Mutex<LoadInner>>,
}

impl LoadMonitor {
    pub fn new(options: LoadMonitorOptions) -> Self {
        Self {
            options: Arc::new(options),
            inner: Arc::new(Mutex::new(LoadInner {
                snapshots: VecDeque::new(),
                outcomes: VecDeque::new(),
            })),
        }
    }

    /// Records one request outcome for the error-ratio window
    pub fn record_outcome(&self, ok: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.outcomes.push_back(ok);
        while inner.outcomes.len() > OUTCOME_WINDOW {
            inner.outcomes.pop_front();
        }
    }

    /// Failed fraction of the recent outcome window
    pub fn error_ratio(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        if inner.outcomes.len() < MIN_OUTCOMES_FOR_SIGNAL {
            return 0.0;
        }
        let failed = inner.outcomes.iter().filter(|ok| !**ok).count();
        failed as f64 / inner.outcomes.len() as f64
    }

    /// Takes one snapshot from a measured event-loop lag
    pub fn sample(&self, event_loop_lag: Duration) {
        let error_ratio = self.error_ratio();
        let memory_bytes = current_memory_bytes();

        let lag_overloaded = event_loop_lag > self.options.max_event_loop_lag;
        let error_overloaded = error_ratio > self.options.max_error_ratio;
        let memory_overloaded = match (self.options.max_memory_bytes, memory_bytes) {
            (Some(ceiling), Some(rss)) => rss > ceiling,
            _ => false,
        };
        let overloaded = lag_overloaded || error_overloaded || memory_overloaded;

        if overloaded {
            tracing::debug!(
                lag_ms = event_loop_lag.as_millis() as u64,
                error_ratio,
                memory_bytes,
                "Load sample flagged as overloaded"
            );
        }

        let mut inner = self.inner.lock().unwrap();
        inner.snapshots.push_back(LoadSnapshot {
            taken_at: Instant::now(),
            event_loop_lag,
            error_ratio,
            memory_bytes,
            overloaded,
        });
        while inner.snapshots.len() > SNAPSHOT_HISTORY {
            inner.snapshots.pop_front();
        }
    }

    /// True if the most recent sample was overloaded
    pub fn is_overloaded(&self) -> bool {
        self.inner
            .lock()
            .unwrap()
            .snapshots
            .back()
            .map(|s| s.overloaded)
            .unwrap_or(false)
    }

    /// Fraction of the last `window` samples that were overloaded
    pub fn overloaded_ratio(&self, window: usize) -> f64 {
        let inner = self.inner.lock().unwrap();
        let recent: Vec<_> = inner.snapshots.iter().rev().take(window).collect();
        if recent.is_empty() {
            return 0.0;
        }
        let overloaded = recent.iter().filter(|s| s.overloaded).count();
        overloaded as f64 / recent.len() as f64
    }

    /// Spawns the background sampling task
    ///
    /// Measures drift by comparing the actual interval between ticks with
    /// the configured one; a busy executor wakes the timer late.
    pub fn spawn_sampler(&self) -> JoinHandle<()> {
        let monitor = self.clone();
        let sample_interval = self.options.sample_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sample_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            let mut last = Instant::now();

            loop {
                ticker.tick().await;
                let now = Instant::now();
                let lag = now.duration_since(last).saturating_sub(sample_interval);
                monitor.sample(lag);
                last = now;
            }
        })
    }
}

/// Current process RSS in bytes, when the platform exposes it
#[cfg(target_os = "linux")]
fn current_memory_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(resident_pages * 4096)
}

#[cfg(not(target_os = "linux"))]
fn current_memory_bytes() -> Option<u64> {
    None
}
