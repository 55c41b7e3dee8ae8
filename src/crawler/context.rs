//! Per-attempt crawling context and the shared attempt registry
//!
//! Each attempt owns a [`CrawlingContext`] for its whole lifetime. A small
//! metadata record is mirrored into the shared [`AttemptRegistry`] so other
//! components can see what is in flight; the record is removed on every
//! exit path (success, reclaim, failure, or panic unwind) by an RAII
//! guard, so the registry is empty again once a run completes.

use crate::request::Request;
use crate::session::Session;
use crate::transport::{FetchedPage, ProxyInfo};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Everything one attempt carries through the pipeline
pub struct CrawlingContext {
    /// Generated id, unique within the crawl run
    pub attempt_id: String,

    /// The request being processed; handlers mutate it in place
    pub request: Request,

    /// Session bound to this attempt, when the pool is enabled
    pub session: Option<Session>,

    /// Proxy chosen for this attempt, when a provider is configured
    pub proxy: Option<ProxyInfo>,

    /// Page produced by the transport, available to post-navigation hooks
    /// and the handler
    pub page: Option<FetchedPage>,
}

/// Read-only view of one in-flight attempt
#[derive(Debug, Clone)]
pub struct AttemptInfo {
    pub unique_key: String,
    pub url: String,
    pub session_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Shared map of in-flight attempts, keyed by attempt id
#[derive(Clone, Default)]
pub struct AttemptRegistry {
    attempts: Arc<Mutex<HashMap<String, AttemptInfo>>>,
    next_id: Arc<AtomicU64>,
}

impl AttemptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates the next attempt id
    pub fn next_attempt_id(&self) -> String {
        let seq = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("attempt-{seq}")
    }

    /// Registers an attempt and returns the guard that will unregister it
    pub fn register(&self, context: &CrawlingContext) -> AttemptGuard {
        let info = AttemptInfo {
            unique_key: context.request.unique_key.clone(),
            url: context.request.url.to_string(),
            session_id: context.session.as_ref().map(|s| s.id().to_string()),
            started_at: Utc::now(),
        };
        self.attempts
            .lock()
            .unwrap()
            .insert(context.attempt_id.clone(), info);

        AttemptGuard {
            registry: self.clone(),
            attempt_id: context.attempt_id.clone(),
        }
    }

    /// Looks up one in-flight attempt
    pub fn get(&self, attempt_id: &str) -> Option<AttemptInfo> {
        self.attempts.lock().unwrap().get(attempt_id).cloned()
    }

    /// Number of attempts currently in flight
    pub fn len(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.lock().unwrap().is_empty()
    }

    fn remove(&self, attempt_id: &str) {
        self.attempts.lock().unwrap().remove(attempt_id);
    }
}

/// Removes the registry entry when dropped, no matter how the attempt ended
pub struct AttemptGuard {
    registry: AttemptRegistry,
    attempt_id: String,
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.attempt_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(registry: &AttemptRegistry) -> CrawlingContext {
        CrawlingContext {
            attempt_id: registry.next_attempt_id(),
            request: Request::new("https://example.com/a").unwrap(),
            session: None,
            proxy: None,
            page: None,
        }
    }

    #[test]
    fn test_attempt_ids_are_unique() {
        let registry = AttemptRegistry::new();
        let a = registry.next_attempt_id();
        let b = registry.next_attempt_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = AttemptRegistry::new();
        let ctx = context(&registry);
        let _guard = registry.register(&ctx);

        assert_eq!(registry.len(), 1);
        let info = registry.get(&ctx.attempt_id).unwrap();
        assert_eq!(info.unique_key, ctx.request.unique_key);
        assert!(info.session_id.is_none());
    }

    #[test]
    fn test_guard_removes_on_drop() {
        let registry = AttemptRegistry::new();
        let ctx = context(&registry);
        {
            let _guard = registry.register(&ctx);
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_guard_removes_on_panic() {
        let registry = AttemptRegistry::new();
        let ctx = context(&registry);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = registry.register(&ctx);
            panic!("attempt blew up");
        }));

        assert!(result.is_err());
        assert!(registry.is_empty());
    }
}
