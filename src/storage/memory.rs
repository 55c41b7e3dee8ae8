//! In-memory store implementations
//!
//! Back fast tests and ephemeral crawls where durability is not needed.
//! Semantics (leases, de-duplication, idempotent handling) match the
//! durable implementations exactly.

use crate::request::Request;
use crate::storage::traits::{KeyValueStore, QueueOperationInfo, RequestQueue, StorageResult};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

/// In-memory request queue
///
/// Pending order is a deque: `forefront` pushes to the front, normal adds
/// to the back. A fetched request moves to the in-progress set until it is
/// marked handled or reclaimed, which is what makes a fetch exclusive per
/// unique key.
#[derive(Default)]
pub struct MemoryRequestQueue {
    inner: Mutex<QueueInner>,
}

#[derive(Default)]
struct QueueInner {
    pending: VecDeque<String>,
    in_progress: HashSet<String>,
    handled: HashSet<String>,
    requests: HashMap<String, Request>,
}

impl MemoryRequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requests currently leased (for tests and introspection)
    pub fn in_progress_count(&self) -> usize {
        self.inner.lock().unwrap().in_progress.len()
    }

    /// Number of requests waiting to be handed out
    pub fn pending_count(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }
}

#[async_trait]
impl RequestQueue for MemoryRequestQueue {
    async fn add_request(
        &self,
        request: &Request,
        forefront: bool,
    ) -> StorageResult<QueueOperationInfo> {
        let mut inner = self.inner.lock().unwrap();

        if inner.requests.contains_key(&request.unique_key) {
            let was_already_handled = inner.handled.contains(&request.unique_key);
            return Ok(QueueOperationInfo {
                was_already_present: true,
                was_already_handled,
            });
        }

        inner
            .requests
            .insert(request.unique_key.clone(), request.clone());
        if forefront {
            inner.pending.push_front(request.unique_key.clone());
        } else {
            inner.pending.push_back(request.unique_key.clone());
        }

        Ok(QueueOperationInfo {
            was_already_present: false,
            was_already_handled: false,
        })
    }

    async fn fetch_next_request(&self) -> StorageResult<Option<Request>> {
        let mut inner = self.inner.lock().unwrap();

        while let Some(key) = inner.pending.pop_front() {
            if inner.handled.contains(&key) {
                continue;
            }
            inner.in_progress.insert(key.clone());
            let request = inner
                .requests
                .get(&key)
                .cloned()
                .expect("pending key without a stored request");
            return Ok(Some(request));
        }

        Ok(None)
    }

    async fn mark_request_handled(&self, request: &Request) -> StorageResult<()> {
        let mut inner = self.inner.lock().unwrap();

        if inner.handled.contains(&request.unique_key) {
            return Ok(());
        }

        inner.in_progress.remove(&request.unique_key);
        inner.handled.insert(request.unique_key.clone());
        // Keep the terminal retry/error state visible to later readers
        inner
            .requests
            .insert(request.unique_key.clone(), request.clone());

        Ok(())
    }

    async fn reclaim_request(&self, request: &Request, forefront: bool) -> StorageResult<()> {
        let mut inner = self.inner.lock().unwrap();

        inner.in_progress.remove(&request.unique_key);
        inner
            .requests
            .insert(request.unique_key.clone(), request.clone());
        if forefront {
            inner.pending.push_front(request.unique_key.clone());
        } else {
            inner.pending.push_back(request.unique_key.clone());
        }

        Ok(())
    }

    async fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.inner.lock().unwrap().pending.is_empty())
    }

    async fn is_finished(&self) -> StorageResult<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.pending.is_empty() && inner.in_progress.is_empty())
    }

    async fn handled_count(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().unwrap().handled.len() as u64)
    }

    async fn persist_state(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// In-memory key-value store
#[derive(Default)]
pub struct MemoryKeyValueStore {
    values: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get_value(&self, key: &str) -> StorageResult<Option<serde_json::Value>> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    async fn set_value(&self, key: &str, value: serde_json::Value) -> StorageResult<()> {
        self.values.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str) -> Request {
        Request::new(url).unwrap()
    }

    #[tokio::test]
    async fn test_add_and_fetch() {
        let queue = MemoryRequestQueue::new();
        let req = request("https://example.com/a");

        let info = queue.add_request(&req, false).await.unwrap();
        assert!(!info.was_already_present);

        let fetched = queue.fetch_next_request().await.unwrap().unwrap();
        assert_eq!(fetched.unique_key, req.unique_key);

        // Leased: not handed out again
        assert!(queue.fetch_next_request().await.unwrap().is_none());
        assert_eq!(queue.in_progress_count(), 1);
    }

    #[tokio::test]
    async fn test_add_request_dedups_by_unique_key() {
        let queue = MemoryRequestQueue::new();
        let req = request("https://example.com/a");

        queue.add_request(&req, false).await.unwrap();
        let info = queue.add_request(&req, false).await.unwrap();
        assert!(info.was_already_present);
        assert!(!info.was_already_handled);
        assert_eq!(queue.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_dedup_reports_handled() {
        let queue = MemoryRequestQueue::new();
        let req = request("https://example.com/a");

        queue.add_request(&req, false).await.unwrap();
        let fetched = queue.fetch_next_request().await.unwrap().unwrap();
        queue.mark_request_handled(&fetched).await.unwrap();

        let info = queue.add_request(&req, false).await.unwrap();
        assert!(info.was_already_present);
        assert!(info.was_already_handled);
    }

    #[tokio::test]
    async fn test_forefront_ordering() {
        let queue = MemoryRequestQueue::new();
        queue
            .add_request(&request("https://example.com/a"), false)
            .await
            .unwrap();
        queue
            .add_request(&request("https://example.com/b"), true)
            .await
            .unwrap();

        let first = queue.fetch_next_request().await.unwrap().unwrap();
        assert_eq!(first.url.path(), "/b");
    }

    #[tokio::test]
    async fn test_mark_handled_idempotent() {
        let queue = MemoryRequestQueue::new();
        let req = request("https://example.com/a");
        queue.add_request(&req, false).await.unwrap();

        let fetched = queue.fetch_next_request().await.unwrap().unwrap();
        queue.mark_request_handled(&fetched).await.unwrap();
        queue.mark_request_handled(&fetched).await.unwrap();

        assert_eq!(queue.handled_count().await.unwrap(), 1);
        assert!(queue.is_finished().await.unwrap());
    }

    #[tokio::test]
    async fn test_reclaim_returns_to_pending() {
        let queue = MemoryRequestQueue::new();
        let mut req = request("https://example.com/a");
        queue.add_request(&req, false).await.unwrap();

        queue.fetch_next_request().await.unwrap().unwrap();
        req.retry_count = 1;
        queue.reclaim_request(&req, false).await.unwrap();

        assert!(!queue.is_empty().await.unwrap());
        let again = queue.fetch_next_request().await.unwrap().unwrap();
        // Reclaim persisted the retry bookkeeping
        assert_eq!(again.retry_count, 1);
    }

    #[tokio::test]
    async fn test_empty_vs_finished() {
        let queue = MemoryRequestQueue::new();
        let req = request("https://example.com/a");
        queue.add_request(&req, false).await.unwrap();

        assert!(!queue.is_empty().await.unwrap());
        assert!(!queue.is_finished().await.unwrap());

        let fetched = queue.fetch_next_request().await.unwrap().unwrap();
        // Pending is drained but a lease is outstanding
        assert!(queue.is_empty().await.unwrap());
        assert!(!queue.is_finished().await.unwrap());

        queue.mark_request_handled(&fetched).await.unwrap();
        assert!(queue.is_finished().await.unwrap());
    }

    #[tokio::test]
    async fn test_key_value_store() {
        let store = MemoryKeyValueStore::new();
        assert!(store.get_value("missing").await.unwrap().is_none());

        store
            .set_value("state", serde_json::json!({"index": 3}))
            .await
            .unwrap();
        let value = store.get_value("state").await.unwrap().unwrap();
        assert_eq!(value["index"], 3);
    }
}
