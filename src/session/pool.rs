//! Rotating session pool
//!
//! Keeps up to a configured number of sessions in rotation, creating them
//! lazily and evicting retired ones as they are encountered. Sessions are
//! shared, not exclusively leased: several concurrent attempts may run
//! under the same identity, which is what makes the pool a throttle on
//! identity churn rather than on concurrency.

use crate::session::Session;
use crate::storage::StorageResult;

use std::sync::Mutex;

/// Session pool tuning knobs
#[derive(Debug, Clone)]
pub struct SessionPoolOptions {
    /// Maximum number of live sessions in rotation
    pub max_pool_size: usize,

    /// Attempts a single session serves before it is rotated out
    pub max_session_usage: u32,

    /// HTTP status codes that mark a session as blocked
    pub blocked_status_codes: Vec<u16>,
}

impl Default for SessionPoolOptions {
    fn default() -> Self {
        Self {
            max_pool_size: 20,
            max_session_usage: 50,
            blocked_status_codes: vec![401, 403, 429],
        }
    }
}

struct PoolInner {
    sessions: Vec<Session>,
    rotation_index: usize,
    created_total: u64,
}

/// Bounded pool of rotating sessions
pub struct SessionPool {
    options: SessionPoolOptions,
    inner: Mutex<PoolInner>,
}

impl SessionPool {
    pub fn new(options: SessionPoolOptions) -> Self {
        Self {
            options,
            inner: Mutex::new(PoolInner {
                sessions: Vec::new(),
                rotation_index: 0,
                created_total: 0,
            }),
        }
    }

    /// Acquires a session for one attempt
    ///
    /// Retired sessions found during rotation are evicted on the spot; a
    /// replacement is created whenever the pool is below capacity. Usage is
    /// counted at acquisition time.
    pub async fn acquire(&self) -> StorageResult<Session> {
        let mut inner = self.inner.lock().unwrap();

        inner.sessions.retain(|s| s.is_usable());

        if inner.sessions.len() < self.options.max_pool_size {
            inner.created_total += 1;
            let session = Session::new(
                format!("session-{}", inner.created_total),
                self.options.max_session_usage,
                self.options.blocked_status_codes.clone(),
            );
            tracing::debug!(session_id = %session.id(), "Created new session");
            inner.sessions.push(session);
        }

        // Round-robin over whatever is usable
        let len = inner.sessions.len();
        inner.rotation_index = (inner.rotation_index + 1) % len;
        let session = inner.sessions[inner.rotation_index].clone();
        drop(inner);

        session.increment_usage();
        Ok(session)
    }

    /// Reports the outcome of the attempt the session was bound to
    pub fn release(&self, session: &Session, outcome: crate::session::SessionOutcome) {
        use crate::session::SessionOutcome;
        match outcome {
            SessionOutcome::Good => session.mark_good(),
            SessionOutcome::Bad => {
                session.mark_bad();
                if session.is_retired() {
                    tracing::debug!(session_id = %session.id(), "Session retired after repeated failures");
                }
            }
            SessionOutcome::Retire => {
                session.retire();
                tracing::debug!(session_id = %session.id(), "Session retired");
            }
        }
    }

    /// Number of sessions currently in rotation (including unusable ones
    /// not yet evicted)
    pub fn live_count(&self) -> usize {
        self.inner.lock().unwrap().sessions.len()
    }

    /// Total sessions ever created
    pub fn created_total(&self) -> u64 {
        self.inner.lock().unwrap().created_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionOutcome;

    fn pool(max_size: usize, max_usage: u32) -> SessionPool {
        SessionPool::new(SessionPoolOptions {
            max_pool_size: max_size,
            max_session_usage: max_usage,
            blocked_status_codes: vec![403],
        })
    }

    #[tokio::test]
    async fn test_acquire_creates_lazily() {
        let pool = pool(3, 10);
        assert_eq!(pool.live_count(), 0);

        pool.acquire().await.unwrap();
        assert_eq!(pool.live_count(), 1);

        pool.acquire().await.unwrap();
        assert_eq!(pool.live_count(), 2);
    }

    #[tokio::test]
    async fn test_pool_capped_at_max_size() {
        let pool = pool(2, 100);
        for _ in 0..10 {
            pool.acquire().await.unwrap();
        }
        assert_eq!(pool.live_count(), 2);
        assert_eq!(pool.created_total(), 2);
    }

    #[tokio::test]
    async fn test_usage_counted_on_acquire() {
        let pool = pool(1, 100);
        let s1 = pool.acquire().await.unwrap();
        let s2 = pool.acquire().await.unwrap();
        assert_eq!(s1.id(), s2.id());
        assert_eq!(s2.usage_count(), 2);
    }

    #[tokio::test]
    async fn test_retired_sessions_replaced() {
        let pool = pool(1, 100);
        let first = pool.acquire().await.unwrap();
        first.retire();

        let second = pool.acquire().await.unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(pool.live_count(), 1);
        assert_eq!(pool.created_total(), 2);
    }

    #[tokio::test]
    async fn test_usage_ceiling_rotates_identity() {
        let pool = pool(1, 2);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_eq!(a.id(), b.id());

        // Ceiling reached, the next acquire mints a fresh identity
        let c = pool.acquire().await.unwrap();
        assert_ne!(a.id(), c.id());
    }

    #[tokio::test]
    async fn test_release_outcomes() {
        let pool = pool(2, 100);
        let session = pool.acquire().await.unwrap();

        pool.release(&session, SessionOutcome::Good);
        assert!(!session.is_retired());

        pool.release(&session, SessionOutcome::Retire);
        assert!(session.is_retired());
    }

    #[tokio::test]
    async fn test_blocked_session_leaves_rotation() {
        let pool = pool(1, 100);
        let session = pool.acquire().await.unwrap();
        assert!(session.retire_on_blocked_status(403));

        let replacement = pool.acquire().await.unwrap();
        assert_ne!(session.id(), replacement.id());
    }
}
