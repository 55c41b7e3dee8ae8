//! Finite seed request list
//!
//! A `RequestList` is the in-memory counterpart of the durable queue: a
//! fixed set of seed requests handed out once each. Its progress (which
//! keys were handed out, which reached a terminal state) can be persisted
//! to a key-value store and restored, so a crawl resumed after a migration
//! does not re-process seeds that were already handled.

use crate::request::Request;
use crate::storage::traits::{KeyValueStore, StorageResult};
use crate::CrawlError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Persistable progress of a request list
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestListState {
    /// Index of the next never-handed-out request
    pub next_index: usize,

    /// Keys handed out but not yet terminal when the state was captured
    pub in_progress: Vec<String>,

    /// Keys that reached a terminal state
    pub handled: Vec<String>,
}

/// Finite, in-memory list of seed requests
pub struct RequestList {
    requests: Vec<Request>,
    by_key: HashMap<String, usize>,
    next_index: usize,
    in_progress: HashSet<String>,
    reclaimed: VecDeque<String>,
    handled: HashSet<String>,
}

impl RequestList {
    /// Creates a list from pre-built requests, de-duplicating by unique key
    /// (the first occurrence wins)
    pub fn new(requests: Vec<Request>) -> Self {
        let mut deduped = Vec::with_capacity(requests.len());
        let mut by_key = HashMap::new();

        for request in requests {
            if by_key.contains_key(&request.unique_key) {
                continue;
            }
            by_key.insert(request.unique_key.clone(), deduped.len());
            deduped.push(request);
        }

        Self {
            requests: deduped,
            by_key,
            next_index: 0,
            in_progress: HashSet::new(),
            reclaimed: VecDeque::new(),
            handled: HashSet::new(),
        }
    }

    /// Creates a list from seed URL strings
    pub fn from_urls<S: AsRef<str>>(urls: &[S]) -> Result<Self, CrawlError> {
        let requests = urls
            .iter()
            .map(|url| Request::new(url.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(requests))
    }

    /// Hands out the next request, or None when nothing is available
    ///
    /// Reclaimed requests are re-offered before never-handed-out ones. A
    /// handed-out request stays exclusive (will not be handed out again)
    /// until it is reclaimed.
    pub fn fetch_next(&mut self) -> Option<Request> {
        while let Some(key) = self.reclaimed.pop_front() {
            if self.handled.contains(&key) {
                continue;
            }
            self.in_progress.insert(key.clone());
            let index = self.by_key[&key];
            return Some(self.requests[index].clone());
        }

        while self.next_index < self.requests.len() {
            let request = &self.requests[self.next_index];
            self.next_index += 1;
            if self.handled.contains(&request.unique_key) {
                continue;
            }
            self.in_progress.insert(request.unique_key.clone());
            return Some(request.clone());
        }

        None
    }

    /// Marks a handed-out request as terminal; idempotent
    pub fn mark_handled(&mut self, unique_key: &str) {
        self.in_progress.remove(unique_key);
        self.handled.insert(unique_key.to_string());
    }

    /// Returns a handed-out request to the pool for a future fetch
    pub fn reclaim(&mut self, unique_key: &str) {
        if self.in_progress.remove(unique_key) {
            self.reclaimed.push_back(unique_key.to_string());
        }
    }

    /// Persists the retry/error bookkeeping of a handed-out request so a
    /// later fetch sees it
    pub fn update_request(&mut self, request: &Request) {
        if let Some(&index) = self.by_key.get(&request.unique_key) {
            self.requests[index] = request.clone();
        }
    }

    /// True when no request is available to hand out right now
    pub fn is_empty(&self) -> bool {
        self.reclaimed.is_empty()
            && self
                .requests
                .iter()
                .skip(self.next_index)
                .all(|r| self.handled.contains(&r.unique_key))
    }

    /// True when every request reached a terminal state
    pub fn is_finished(&self) -> bool {
        self.is_empty() && self.in_progress.is_empty()
    }

    pub fn handled_count(&self) -> u64 {
        self.handled.len() as u64
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_seeded(&self) -> bool {
        !self.requests.is_empty()
    }

    /// Captures the current progress for persistence
    ///
    /// In-flight keys are recorded separately: on restore they are offered
    /// again, because the process may have died before handling them.
    pub fn state(&self) -> RequestListState {
        RequestListState {
            next_index: self.next_index,
            in_progress: self.in_progress.iter().cloned().collect(),
            handled: self.handled.iter().cloned().collect(),
        }
    }

    /// Applies previously captured progress
    pub fn restore_state(&mut self, state: RequestListState) {
        self.next_index = state.next_index.min(self.requests.len());
        self.handled = state.handled.into_iter().collect();
        self.in_progress.clear();
        self.reclaimed = state
            .in_progress
            .into_iter()
            .filter(|key| self.by_key.contains_key(key) && !self.handled.contains(key))
            .collect();
    }

    /// Writes the current progress to a key-value store
    pub async fn persist_state(
        &self,
        store: &dyn KeyValueStore,
        key: &str,
    ) -> StorageResult<()> {
        let value = serde_json::to_value(self.state())?;
        store.set_value(key, value).await
    }

    /// Loads progress from a key-value store, if any was persisted
    pub async fn restore_from(
        &mut self,
        store: &dyn KeyValueStore,
        key: &str,
    ) -> StorageResult<bool> {
        match store.get_value(key).await? {
            Some(value) => {
                let state: RequestListState = serde_json::from_value(value)?;
                self.restore_state(state);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
