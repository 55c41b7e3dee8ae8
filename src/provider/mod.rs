//! Dual-source request reconciliation
//!
//! A crawl may be fed from a finite seed list, a durable queue, or both.
//! The [`RequestProvider`] merges them into a single fetch stream with one
//! guarantee above all: a request that exists in both sources is processed
//! once. The seed list is treated as the authoritative seed; when a queue
//! is also configured, each list item is drained into the queue (at the
//! front, so seeds keep priority) and only after that insertion succeeds is
//! the item marked handled on the list side. The queue is durable, the list
//! is not, so this ordering is what lets a crawl survive a process crash
//! without losing or duplicating seeds.

use crate::request::Request;
use crate::storage::{KeyValueStore, RequestList, RequestQueue, StorageResult};
use crate::{CrawlError, Result};
use std::sync::{Arc, Mutex};

const LIST_STATE_KEY: &str = "request-list-state";

/// Reconciles a seed list and a durable queue into one work stream
pub struct RequestProvider {
    list: Option<Mutex<RequestList>>,
    queue: Option<Arc<dyn RequestQueue>>,
    state_store: Option<Arc<dyn KeyValueStore>>,
}

impl RequestProvider {
    /// Creates a provider from the configured sources
    ///
    /// Configuring neither source is a fatal construction error.
    pub fn new(
        list: Option<RequestList>,
        queue: Option<Arc<dyn RequestQueue>>,
    ) -> Result<Self> {
        if list.is_none() && queue.is_none() {
            return Err(CrawlError::NoRequestSource);
        }

        Ok(Self {
            list: list.map(Mutex::new),
            queue,
            state_store: None,
        })
    }

    /// Attaches a key-value store used to persist and restore list progress
    pub fn with_state_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Fetches the next request from the reconciled stream
    ///
    /// Returns `Ok(None)` when nothing is available *right now*; in-flight
    /// requests may still be reclaimed, so this is not a completion signal
    /// (use [`is_finished`](Self::is_finished) for that).
    pub async fn fetch_next(&self) -> StorageResult<Option<Request>> {
        if let Some(list) = &self.list {
            let next = list.lock().unwrap().fetch_next();

            if let Some(request) = next {
                match &self.queue {
                    Some(queue) => {
                        // Drain the seed into the durable queue before
                        // letting go of it on the list side.
                        match queue.add_request(&request, true).await {
                            Ok(info) => {
                                let mut list = list.lock().unwrap();
                                list.mark_handled(&request.unique_key);
                                if info.was_already_present {
                                    tracing::debug!(
                                        unique_key = %request.unique_key,
                                        "Seed already present in queue, skipping insert"
                                    );
                                }
                            }
                            Err(e) => {
                                // Not marked handled: the seed must not be
                                // lost to a failed insert.
                                list.lock().unwrap().reclaim(&request.unique_key);
                                tracing::warn!(
                                    unique_key = %request.unique_key,
                                    error = %e,
                                    "Queue insert failed, seed reclaimed to list"
                                );
                                return Err(e);
                            }
                        }
                    }
                    None => return Ok(Some(request)),
                }
            }
        }

        match &self.queue {
            Some(queue) => queue.fetch_next_request().await,
            None => Ok(None),
        }
    }

    /// Marks a request as terminally handled; idempotent
    pub async fn mark_handled(&self, request: &Request) -> StorageResult<()> {
        if let Some(queue) = &self.queue {
            return queue.mark_request_handled(request).await;
        }

        let list = self.list.as_ref().expect("provider without any source");
        let mut list = list.lock().unwrap();
        list.update_request(request);
        list.mark_handled(&request.unique_key);
        Ok(())
    }

    /// Returns a request to the pending pool for a future fetch
    ///
    /// Retry bookkeeping on the request is persisted so the next fetch sees
    /// the incremented counter and accumulated error messages.
    pub async fn reclaim(&self, request: &Request) -> StorageResult<()> {
        if let Some(queue) = &self.queue {
            return queue.reclaim_request(request, false).await;
        }

        let list = self.list.as_ref().expect("provider without any source");
        let mut list = list.lock().unwrap();
        list.update_request(request);
        list.reclaim(&request.unique_key);
        Ok(())
    }

    /// True when no request is available to fetch right now
    pub async fn is_empty(&self) -> StorageResult<bool> {
        if let Some(list) = &self.list {
            if !list.lock().unwrap().is_empty() {
                return Ok(false);
            }
        }
        match &self.queue {
            Some(queue) => queue.is_empty().await,
            None => Ok(true),
        }
    }

    /// True when every request in every source reached a terminal state
    pub async fn is_finished(&self) -> StorageResult<bool> {
        if let Some(list) = &self.list {
            if !list.lock().unwrap().is_finished() {
                return Ok(false);
            }
        }
        match &self.queue {
            Some(queue) => queue.is_finished().await,
            None => Ok(true),
        }
    }

    /// Number of requests that reached a terminal state
    pub async fn handled_count(&self) -> StorageResult<u64> {
        match &self.queue {
            Some(queue) => queue.handled_count().await,
            None => {
                let list = self.list.as_ref().expect("provider without any source");
                let count = list.lock().unwrap().handled_count();
                Ok(count)
            }
        }
    }

    /// Persists list progress (if a state store is attached) and flushes
    /// the queue
    pub async fn persist_state(&self) -> StorageResult<()> {
        if let (Some(list), Some(store)) = (&self.list, &self.state_store) {
            let state = list.lock().unwrap().state();
            let value = serde_json::to_value(state)?;
            store.set_value(LIST_STATE_KEY, value).await?;
        }

        if let Some(queue) = &self.queue {
            queue.persist_state().await?;
        }

        Ok(())
    }

    /// Restores list progress persisted by an earlier run, if any
    pub async fn restore_state(&self) -> StorageResult<bool> {
        let (Some(list), Some(store)) = (&self.list, &self.state_store) else {
            return Ok(false);
        };

        match store.get_value(LIST_STATE_KEY).await? {
            Some(value) => {
                let state = serde_json::from_value(value)?;
                list.lock().unwrap().restore_state(state);
                tracing::info!("Restored request list progress from persisted state");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
