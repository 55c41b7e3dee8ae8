//! SQLite-backed request queue
//!
//! The durable side of request reconciliation: a crawl interrupted by a
//! crash or migration resumes from whatever this queue holds. The
//! `unique_key` column carries a UNIQUE constraint, which is what makes
//! `add_request` idempotent under retried inserts.

use crate::request::Request;
use crate::storage::traits::{QueueOperationInfo, RequestQueue, StorageResult};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// SQLite request queue backend
pub struct SqliteRequestQueue {
    conn: Mutex<Connection>,
}

fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS queue_requests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            unique_key TEXT NOT NULL UNIQUE,
            request_json TEXT NOT NULL,
            order_no INTEGER NOT NULL,
            in_progress INTEGER NOT NULL DEFAULT 0,
            handled_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_queue_pending
            ON queue_requests (handled_at, in_progress, order_no);
    ",
    )
}

impl SqliteRequestQueue {
    /// Opens (or creates) a queue database at the given path
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        // Leases do not survive a process restart: anything left in-progress
        // by a previous run goes back to pending.
        conn.execute(
            "UPDATE queue_requests SET in_progress = 0 WHERE in_progress = 1",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an ephemeral queue backed by an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn next_order_no(conn: &Connection, forefront: bool) -> rusqlite::Result<i64> {
        if forefront {
            let min: Option<i64> =
                conn.query_row("SELECT MIN(order_no) FROM queue_requests", [], |row| {
                    row.get(0)
                })?;
            Ok(min.unwrap_or(0) - 1)
        } else {
            let max: Option<i64> =
                conn.query_row("SELECT MAX(order_no) FROM queue_requests", [], |row| {
                    row.get(0)
                })?;
            Ok(max.unwrap_or(0) + 1)
        }
    }
}

#[async_trait]
impl RequestQueue for SqliteRequestQueue {
    async fn add_request(
        &self,
        request: &Request,
        forefront: bool,
    ) -> StorageResult<QueueOperationInfo> {
        let conn = self.conn.lock().unwrap();

        let existing: Option<Option<String>> = conn
            .query_row(
                "SELECT handled_at FROM queue_requests WHERE unique_key = ?1",
                params![request.unique_key],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(handled_at) = existing {
            return Ok(QueueOperationInfo {
                was_already_present: true,
                was_already_handled: handled_at.is_some(),
            });
        }

        let order_no = Self::next_order_no(&conn, forefront)?;
        let request_json = serde_json::to_string(request)?;
        conn.execute(
            "INSERT OR IGNORE INTO queue_requests (unique_key, request_json, order_no)
             VALUES (?1, ?2, ?3)",
            params![request.unique_key, request_json, order_no],
        )?;

        Ok(QueueOperationInfo {
            was_already_present: false,
            was_already_handled: false,
        })
    }

    async fn fetch_next_request(&self) -> StorageResult<Option<Request>> {
        let conn = self.conn.lock().unwrap();

        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT id, request_json FROM queue_requests
                 WHERE handled_at IS NULL AND in_progress = 0
                 ORDER BY order_no LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((id, request_json)) = row else {
            return Ok(None);
        };

        conn.execute(
            "UPDATE queue_requests SET in_progress = 1 WHERE id = ?1",
            params![id],
        )?;

        let request: Request = serde_json::from_str(&request_json)?;
        Ok(Some(request))
    }

    async fn mark_request_handled(&self, request: &Request) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let request_json = serde_json::to_string(request)?;

        // The handled_at guard makes a second call a no-op.
        conn.execute(
            "UPDATE queue_requests
             SET handled_at = ?1, in_progress = 0, request_json = ?2
             WHERE unique_key = ?3 AND handled_at IS NULL",
            params![now, request_json, request.unique_key],
        )?;

        Ok(())
    }

    async fn reclaim_request(&self, request: &Request, forefront: bool) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let order_no = Self::next_order_no(&conn, forefront)?;
        let request_json = serde_json::to_string(request)?;

        conn.execute(
            "UPDATE queue_requests
             SET in_progress = 0, order_no = ?1, request_json = ?2
             WHERE unique_key = ?3 AND handled_at IS NULL",
            params![order_no, request_json, request.unique_key],
        )?;

        Ok(())
    }

    async fn is_empty(&self) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let pending: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queue_requests WHERE handled_at IS NULL AND in_progress = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(pending == 0)
    }

    async fn is_finished(&self) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let open: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queue_requests WHERE handled_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(open == 0)
    }

    async fn handled_count(&self) -> StorageResult<u64> {
        let conn = self.conn.lock().unwrap();
        let handled: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queue_requests WHERE handled_at IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(handled as u64)
    }

    async fn persist_state(&self) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
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
    async fn test_add_fetch_handle_cycle() {
        let queue = SqliteRequestQueue::new_in_memory().unwrap();
        let req = request("https://example.com/a");

        let info = queue.add_request(&req, false).await.unwrap();
        assert!(!info.was_already_present);

        let fetched = queue.fetch_next_request().await.unwrap().unwrap();
        assert_eq!(fetched.unique_key, req.unique_key);
        assert!(queue.fetch_next_request().await.unwrap().is_none());

        queue.mark_request_handled(&fetched).await.unwrap();
        assert!(queue.is_finished().await.unwrap());
        assert_eq!(queue.handled_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dedup_by_unique_key() {
        let queue = SqliteRequestQueue::new_in_memory().unwrap();
        let req = request("https://example.com/a");

        queue.add_request(&req, false).await.unwrap();
        let info = queue.add_request(&req, true).await.unwrap();
        assert!(info.was_already_present);

        // Still only one row to fetch
        queue.fetch_next_request().await.unwrap().unwrap();
        assert!(queue.fetch_next_request().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_forefront_ordering() {
        let queue = SqliteRequestQueue::new_in_memory().unwrap();
        queue
            .add_request(&request("https://example.com/a"), false)
            .await
            .unwrap();
        queue
            .add_request(&request("https://example.com/b"), false)
            .await
            .unwrap();
        queue
            .add_request(&request("https://example.com/c"), true)
            .await
            .unwrap();

        let first = queue.fetch_next_request().await.unwrap().unwrap();
        assert_eq!(first.url.path(), "/c");
        let second = queue.fetch_next_request().await.unwrap().unwrap();
        assert_eq!(second.url.path(), "/a");
    }

    #[tokio::test]
    async fn test_mark_handled_idempotent() {
        let queue = SqliteRequestQueue::new_in_memory().unwrap();
        let req = request("https://example.com/a");
        queue.add_request(&req, false).await.unwrap();

        let fetched = queue.fetch_next_request().await.unwrap().unwrap();
        queue.mark_request_handled(&fetched).await.unwrap();
        queue.mark_request_handled(&fetched).await.unwrap();

        assert_eq!(queue.handled_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reclaim_preserves_retry_state() {
        let queue = SqliteRequestQueue::new_in_memory().unwrap();
        let mut req = request("https://example.com/a");
        queue.add_request(&req, false).await.unwrap();

        queue.fetch_next_request().await.unwrap().unwrap();
        req.retry_count = 2;
        req.push_error_message("attempt failed");
        queue.reclaim_request(&req, true).await.unwrap();

        let again = queue.fetch_next_request().await.unwrap().unwrap();
        assert_eq!(again.retry_count, 2);
        assert_eq!(again.error_messages.len(), 1);
    }

    #[tokio::test]
    async fn test_restart_releases_leases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        {
            let queue = SqliteRequestQueue::new(&path).unwrap();
            queue
                .add_request(&request("https://example.com/a"), false)
                .await
                .unwrap();
            // Lease it and "crash" without handling
            queue.fetch_next_request().await.unwrap().unwrap();
            assert!(queue.is_empty().await.unwrap());
        }

        let reopened = SqliteRequestQueue::new(&path).unwrap();
        // The lease was released on reopen
        assert!(!reopened.is_empty().await.unwrap());
        let fetched = reopened.fetch_next_request().await.unwrap().unwrap();
        assert_eq!(fetched.url.path(), "/a");
    }

    #[tokio::test]
    async fn test_handled_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        {
            let queue = SqliteRequestQueue::new(&path).unwrap();
            queue
                .add_request(&request("https://example.com/a"), false)
                .await
                .unwrap();
            let fetched = queue.fetch_next_request().await.unwrap().unwrap();
            queue.mark_request_handled(&fetched).await.unwrap();
            queue.persist_state().await.unwrap();
        }

        let reopened = SqliteRequestQueue::new(&path).unwrap();
        assert!(reopened.is_finished().await.unwrap());
        assert_eq!(reopened.handled_count().await.unwrap(), 1);

        // Re-adding the handled request reports the terminal state
        let info = reopened
            .add_request(&request("https://example.com/a"), false)
            .await
            .unwrap();
        assert!(info.was_already_present);
        assert!(info.was_already_handled);
    }
}
