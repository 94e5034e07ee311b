//! C7 — Task Queue: a thin, best-effort enqueue/dequeue interface.
//!
//! `original_source/app/tasks/queue.py` prefers ARQ (Redis-backed) and
//! degrades to returning `false` so the caller can fall back to a local
//! fire-and-forget task when the broker is unavailable. No ARQ equivalent
//! exists in the Rust ecosystem corpus here, so the same degrade-to-no-op
//! contract is implemented directly over a Redis list with `LPUSH`/`BRPOP`,
//! using the same `redis` crate the cache tier already depends on.

use crate::job::Job;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{instrument, warn};

const QUEUE_KEY: &str = "scholar:jobs";

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, job: Job) -> bool;

    async fn enqueue_fetch_from_s2(&self, paper_id: &str, fields: Option<String>) -> bool {
        self.enqueue(Job::FetchFromS2 { paper_id: paper_id.to_string(), fields }).await
    }

    async fn enqueue_graph_merge(&self, full_doc: serde_json::Value) -> bool {
        self.enqueue(Job::GraphMerge { full_doc }).await
    }

    async fn enqueue_set_cache(&self, paper_id: &str, data: serde_json::Value, fields: Option<String>) -> bool {
        self.enqueue(Job::SetCache { paper_id: paper_id.to_string(), data, fields }).await
    }

    /// Blocks up to `timeout` for the next job, for a worker loop. Returns
    /// `None` on timeout or on a degraded (unreachable) broker — a worker
    /// simply polls again rather than treating this as fatal.
    async fn dequeue(&self, timeout: Duration) -> Option<Job>;
}

/// Redis-list-backed queue. Every failure — connect, push, or pop — is
/// logged and turned into `false`/`None`, never propagated, matching
/// spec.md §4.7's "must degrade to no-op when the broker is unavailable".
#[derive(Clone)]
pub struct RedisTaskQueue {
    conn: ConnectionManager,
}

impl RedisTaskQueue {
    pub async fn connect(url: &str) -> Option<Self> {
        match redis::Client::open(url) {
            Ok(client) => match client.get_connection_manager().await {
                Ok(conn) => Some(Self { conn }),
                Err(e) => {
                    warn!(error = %e, "task queue: redis connection failed, degrading to no-op");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "task queue: invalid redis url, degrading to no-op");
                None
            }
        }
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    #[instrument(skip(self, job))]
    async fn enqueue(&self, job: Job) -> bool {
        let payload = match serde_json::to_string(&job) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, kind = job.kind_name(), "task queue: job serialization failed");
                return false;
            }
        };

        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> =
            redis::cmd("LPUSH").arg(QUEUE_KEY).arg(payload).query_async(&mut conn).await;

        result
            .map_err(|e| warn!(error = %e, kind = job.kind_name(), "task queue: enqueue failed, degrading to no-op"))
            .is_ok()
    }

    async fn dequeue(&self, timeout: Duration) -> Option<Job> {
        let mut conn = self.conn.clone();
        let secs = timeout.as_secs().max(1);
        let result: redis::RedisResult<Option<(String, String)>> =
            redis::cmd("BRPOP").arg(QUEUE_KEY).arg(secs).query_async(&mut conn).await;

        match result {
            Ok(Some((_key, payload))) => serde_json::from_str(&payload).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "task queue: dequeue failed, degrading to no-op");
                None
            }
        }
    }
}

/// No-op queue used when no broker URL is configured, or by
/// `scholar-test-utils` for tests that assert fallback-to-inline behavior.
#[derive(Default)]
pub struct NoopTaskQueue;

#[async_trait]
impl TaskQueue for NoopTaskQueue {
    async fn enqueue(&self, _job: Job) -> bool {
        false
    }

    async fn dequeue(&self, _timeout: Duration) -> Option<Job> {
        None
    }
}

/// In-process FIFO double for unit tests — avoids a live Redis instance
/// while preserving the same "enqueue always succeeds unless told
/// otherwise" semantics the service layer can depend on.
pub struct InMemoryTaskQueue {
    jobs: Mutex<std::collections::VecDeque<Job>>,
    dequeue_lock: AsyncMutex<()>,
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self { jobs: Mutex::new(std::collections::VecDeque::new()), dequeue_lock: AsyncMutex::new(()) }
    }
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, job: Job) -> bool {
        self.jobs.lock().unwrap().push_back(job);
        true
    }

    async fn dequeue(&self, _timeout: Duration) -> Option<Job> {
        let _guard = self.dequeue_lock.lock().await;
        self.jobs.lock().unwrap().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn in_memory_queue_roundtrips_fifo() {
        let q = InMemoryTaskQueue::new();
        assert!(q.enqueue_fetch_from_s2("p1", None).await);
        assert!(q.enqueue_graph_merge(json!({"paperId": "p1"})).await);
        assert_eq!(q.len(), 2);

        let first = q.dequeue(Duration::from_millis(10)).await.unwrap();
        assert!(matches!(first, Job::FetchFromS2 { .. }));
        let second = q.dequeue(Duration::from_millis(10)).await.unwrap();
        assert!(matches!(second, Job::GraphMerge { .. }));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn noop_queue_never_succeeds() {
        let q = NoopTaskQueue;
        assert!(!q.enqueue_fetch_from_s2("p1", None).await);
        assert!(q.dequeue(Duration::from_millis(10)).await.is_none());
    }
}
