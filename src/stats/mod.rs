//! Crawl statistics
//!
//! Write-only accounting sink from the engine's point of view: the executor
//! reports attempt starts and terminal outcomes, the crawler reads a
//! summary at the end. Counters can be snapshotted into a key-value store
//! during migration so a resumed run reports cumulative numbers.

use crate::storage::{KeyValueStore, StorageResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const STATS_STATE_KEY: &str = "crawl-statistics";

/// Aggregated crawl numbers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsSummary {
    /// Requests that reached a terminal success state
    pub requests_finished: u64,

    /// Requests that reached a terminal failure state
    pub requests_failed: u64,

    /// `retry_histogram[n]` counts requests that became terminal after
    /// exactly n retries
    pub retry_histogram: Vec<u64>,

    pub request_avg_duration_millis: u64,
    pub request_min_duration_millis: u64,
    pub request_max_duration_millis: u64,

    /// Terminal requests per minute of crawl runtime
    pub requests_per_minute: f64,

    pub crawl_duration_millis: u64,
}

#[derive(Default)]
struct StatsInner {
    in_flight: HashMap<String, Instant>,
    requests_finished: u64,
    requests_failed: u64,
    retry_histogram: Vec<u64>,
    total_duration_millis: u64,
    min_duration_millis: u64,
    max_duration_millis: u64,
    started_at: Option<Instant>,
}

impl StatsInner {
    fn bump_histogram(&mut self, retries: u32) {
        let index = retries as usize;
        if self.retry_histogram.len() <= index {
            self.retry_histogram.resize(index + 1, 0);
        }
        self.retry_histogram[index] += 1;
    }

    fn record_duration(&mut self, job_id: &str) -> u64 {
        let millis = self
            .in_flight
            .remove(job_id)
            .map(|start| start.elapsed().as_millis() as u64)
            .unwrap_or(0);

        self.total_duration_millis += millis;
        if self.min_duration_millis == 0 || millis < self.min_duration_millis {
            self.min_duration_millis = millis;
        }
        if millis > self.max_duration_millis {
            self.max_duration_millis = millis;
        }
        millis
    }
}

/// Shared accounting sink
#[derive(Default)]
pub struct Statistics {
    inner: Mutex<StatsInner>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps the crawl start; later calls are no-ops
    pub fn mark_started(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.started_at.is_none() {
            inner.started_at = Some(Instant::now());
        }
    }

    /// Records the start of one attempt
    pub fn start_job(&self, job_id: &str) {
        self.inner
            .lock()
            .unwrap()
            .in_flight
            .insert(job_id.to_string(), Instant::now());
    }

    /// Records an attempt whose request reached terminal success
    pub fn finish_job(&self, job_id: &str, retries: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.record_duration(job_id);
        inner.requests_finished += 1;
        inner.bump_histogram(retries);
    }

    /// Records an attempt whose request reached terminal failure
    pub fn fail_job(&self, job_id: &str, retries: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.record_duration(job_id);
        inner.requests_failed += 1;
        inner.bump_histogram(retries);
    }

    /// Closes an attempt that ended without a terminal outcome (the request
    /// was reclaimed for a retry)
    pub fn retry_job(&self, job_id: &str) {
        self.inner.lock().unwrap().in_flight.remove(job_id);
    }

    /// Total requests that reached any terminal state
    pub fn handled_total(&self) -> u64 {
        let inner = self.inner.lock().unwrap();
        inner.requests_finished + inner.requests_failed
    }

    /// Attempts currently in flight (should be zero after a run completes)
    pub fn in_flight_count(&self) -> usize {
        self.inner.lock().unwrap().in_flight.len()
    }

    /// Computes the aggregate summary
    pub fn calculate(&self) -> StatisticsSummary {
        let inner = self.inner.lock().unwrap();
        let terminal = inner.requests_finished + inner.requests_failed;

        let avg = if terminal > 0 {
            inner.total_duration_millis / terminal
        } else {
            0
        };

        let crawl_duration = inner
            .started_at
            .map(|s| s.elapsed())
            .unwrap_or(Duration::ZERO);
        let minutes = crawl_duration.as_secs_f64() / 60.0;
        let per_minute = if minutes > 0.0 {
            terminal as f64 / minutes
        } else {
            0.0
        };

        StatisticsSummary {
            requests_finished: inner.requests_finished,
            requests_failed: inner.requests_failed,
            retry_histogram: inner.retry_histogram.clone(),
            request_avg_duration_millis: avg,
            request_min_duration_millis: inner.min_duration_millis,
            request_max_duration_millis: inner.max_duration_millis,
            requests_per_minute: per_minute,
            crawl_duration_millis: crawl_duration.as_millis() as u64,
        }
    }

    /// Snapshots the counters into a key-value store
    pub async fn persist_state(&self, store: &dyn KeyValueStore) -> StorageResult<()> {
        let summary = self.calculate();
        let value = serde_json::to_value(&summary)?;
        store.set_value(STATS_STATE_KEY, value).await
    }

    /// Restores counters persisted by an earlier run
    ///
    /// In-flight attempts and wall-clock timing are not restored; only the
    /// cumulative terminal counters and the histogram carry over.
    pub async fn restore_state(&self, store: &dyn KeyValueStore) -> StorageResult<bool> {
        let Some(value) = store.get_value(STATS_STATE_KEY).await? else {
            return Ok(false);
        };
        let summary: StatisticsSummary = serde_json::from_value(value)?;

        let mut inner = self.inner.lock().unwrap();
        inner.requests_finished = summary.requests_finished;
        inner.requests_failed = summary.requests_failed;
        inner.retry_histogram = summary.retry_histogram;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKeyValueStore;

    #[test]
    fn test_finish_and_fail_counters() {
        let stats = Statistics::new();
        stats.start_job("a");
        stats.finish_job("a", 0);
        stats.start_job("b");
        stats.fail_job("b", 2);

        let summary = stats.calculate();
        assert_eq!(summary.requests_finished, 1);
        assert_eq!(summary.requests_failed, 1);
        assert_eq!(stats.handled_total(), 2);
    }

    #[test]
    fn test_retry_histogram_shape() {
        let stats = Statistics::new();
        stats.start_job("a");
        stats.finish_job("a", 0);
        stats.start_job("b");
        stats.finish_job("b", 0);
        stats.start_job("c");
        stats.fail_job("c", 3);

        let summary = stats.calculate();
        assert_eq!(summary.retry_histogram, vec![2, 0, 0, 1]);
    }

    #[test]
    fn test_retry_job_clears_in_flight_without_counting() {
        let stats = Statistics::new();
        stats.start_job("a");
        stats.retry_job("a");

        assert_eq!(stats.in_flight_count(), 0);
        assert_eq!(stats.handled_total(), 0);
    }

    #[test]
    fn test_in_flight_returns_to_zero() {
        let stats = Statistics::new();
        stats.start_job("a");
        stats.start_job("b");
        assert_eq!(stats.in_flight_count(), 2);

        stats.finish_job("a", 0);
        stats.fail_job("b", 1);
        assert_eq!(stats.in_flight_count(), 0);
    }

    #[test]
    fn test_empty_summary() {
        let stats = Statistics::new();
        let summary = stats.calculate();
        assert_eq!(summary.requests_finished, 0);
        assert_eq!(summary.request_avg_duration_millis, 0);
        assert_eq!(summary.requests_per_minute, 0.0);
    }

    #[tokio::test]
    async fn test_persist_and_restore() {
        let store = MemoryKeyValueStore::new();
        let stats = Statistics::new();
        stats.start_job("a");
        stats.finish_job("a", 1);
        stats.persist_state(&store).await.unwrap();

        let resumed = Statistics::new();
        assert!(resumed.restore_state(&store).await.unwrap());
        assert_eq!(resumed.handled_total(), 1);

        let summary = resumed.calculate();
        assert_eq!(summary.retry_histogram, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_restore_from_empty_store() {
        let store = MemoryKeyValueStore::new();
        let stats = Statistics::new();
        assert!(!stats.restore_state(&store).await.unwrap());
    }
}
