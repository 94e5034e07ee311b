//! scholar-cache — C3 Cache Tier: a best-effort, TTL-bearing JSON k/v store.
//!
//! Grounded on `original_source/app/clients/redis_client.py`: every
//! operation degrades to a typed miss/`false` on backend failure rather
//! than raising, and `delete_by_pattern` scans in batches instead of
//! issuing `KEYS`. The tiered-backend shape (a trait over a concrete
//! Redis client, with an in-memory double for tests) follows
//! `thichuong-multi-tier-cache`'s `CacheBackend` trait split.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{instrument, warn};

/// TTL class defaults (spec.md §4.3). Each maps to a `Duration` via
/// `GatewayConfig`; kept here as a closed enum so call sites read as intent
/// ("cache this as a search result") rather than a bare number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlClass {
    PaperFull,
    Search,
    TaskStatus,
    SystemStatus,
}

#[async_trait]
pub trait CacheTier: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> bool;
    async fn setex(&self, key: &str, ttl: Duration, value: Value) -> bool {
        self.set(key, value, Some(ttl)).await
    }
    async fn mget(&self, keys: &[String]) -> Vec<Option<Value>>;
    async fn mset(&self, entries: &[(String, Value)], ttl: Option<Duration>) -> bool;
    async fn delete(&self, key: &str) -> bool;
    /// Cursor-scan + batched delete, never `KEYS` (which blocks the server).
    async fn delete_by_pattern(&self, pattern: &str) -> u64;
    async fn exists(&self, key: &str) -> bool;
    async fn ttl(&self, key: &str) -> Option<Duration>;
}

/// Stamps `cached_at` into a JSON object so readers can observe cache-layer
/// age independent of the backend TTL (spec.md §4.3).
fn stamp_cached_at(mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        map.insert("cached_at".to_string(), Value::String(Utc::now().to_rfc3339()));
    }
    value
}

/// Redis-backed implementation. Every method swallows backend errors,
/// logging and returning the "miss" shape appropriate to its signature —
/// the contract spec.md §4.3 requires ("never raise").
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> scholar_common::Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| scholar_common::GatewayError::CacheError(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| scholar_common::GatewayError::CacheError(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheTier for RedisCache {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Option<Value> {
        let mut conn = self.conn.clone();
        let raw: redis::RedisResult<Option<String>> = redis::cmd("GET").arg(key).query_async(&mut conn).await;
        match raw {
            Ok(Some(s)) => serde_json::from_str(&s).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, key, "cache get failed, treating as miss");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> bool {
        let body = stamp_cached_at(value);
        let payload = match serde_json::to_string(&body) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, key, "cache set: serialization failed");
                return false;
            }
        };

        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = if let Some(ttl) = ttl {
            redis::cmd("SETEX")
                .arg(key)
                .arg(ttl.as_secs().max(1))
                .arg(payload)
                .query_async(&mut conn)
                .await
        } else {
            redis::cmd("SET").arg(key).arg(payload).query_async(&mut conn).await
        };

        result
            .map_err(|e| warn!(error = %e, key, "cache set failed"))
            .is_ok()
    }

    async fn mget(&self, keys: &[String]) -> Vec<Option<Value>> {
        if keys.is_empty() {
            return Vec::new();
        }
        let mut conn = self.conn.clone();
        let raw: redis::RedisResult<Vec<Option<String>>> =
            redis::cmd("MGET").arg(keys).query_async(&mut conn).await;
        match raw {
            Ok(values) => values
                .into_iter()
                .map(|v| v.and_then(|s| serde_json::from_str(&s).ok()))
                .collect(),
            Err(e) => {
                warn!(error = %e, "cache mget failed, treating all as miss");
                keys.iter().map(|_| None).collect()
            }
        }
    }

    async fn mset(&self, entries: &[(String, Value)], ttl: Option<Duration>) -> bool {
        let mut all_ok = true;
        for (key, value) in entries {
            all_ok &= self.set(key, value.clone(), ttl).await;
        }
        all_ok
    }

    async fn delete(&self, key: &str) -> bool {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<i64> = redis::cmd("DEL").arg(key).query_async(&mut conn).await;
        match result {
            Ok(n) => n > 0,
            Err(e) => {
                warn!(error = %e, key, "cache delete failed");
                false
            }
        }
    }

    async fn delete_by_pattern(&self, pattern: &str) -> u64 {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut total_deleted: u64 = 0;
        let mut batch: Vec<String> = Vec::new();

        loop {
            let scanned: redis::RedisResult<(u64, Vec<String>)> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await;

            let (next_cursor, keys) = match scanned {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, pattern, "cache delete_by_pattern scan failed");
                    return total_deleted;
                }
            };

            batch.extend(keys);
            if batch.len() >= 500 {
                total_deleted += delete_batch(&mut conn, &mut batch).await;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        if !batch.is_empty() {
            total_deleted += delete_batch(&mut conn, &mut batch).await;
        }

        total_deleted
    }

    async fn exists(&self, key: &str) -> bool {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<i64> = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await;
        result.unwrap_or(0) > 0
    }

    async fn ttl(&self, key: &str) -> Option<Duration> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<i64> = redis::cmd("TTL").arg(key).query_async(&mut conn).await;
        match result {
            Ok(secs) if secs > 0 => Some(Duration::from_secs(secs as u64)),
            _ => None,
        }
    }
}

async fn delete_batch(conn: &mut ConnectionManager, batch: &mut Vec<String>) -> u64 {
    if batch.is_empty() {
        return 0;
    }
    let result: redis::RedisResult<i64> = redis::cmd("DEL").arg(&*batch).query_async(conn).await;
    batch.clear();
    result.unwrap_or(0).max(0) as u64
}

/// In-memory double used by `scholar-core`'s unit tests and by
/// `scholar-test-utils`. Mirrors the same "never raise" contract.
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Value>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheTier for InMemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    async fn set(&self, key: &str, value: Value, _ttl: Option<Duration>) -> bool {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), stamp_cached_at(value));
        true
    }

    async fn mget(&self, keys: &[String]) -> Vec<Option<Value>> {
        let guard = self.entries.lock().unwrap();
        keys.iter().map(|k| guard.get(k).cloned()).collect()
    }

    async fn mset(&self, entries: &[(String, Value)], _ttl: Option<Duration>) -> bool {
        let mut guard = self.entries.lock().unwrap();
        for (k, v) in entries {
            guard.insert(k.clone(), stamp_cached_at(v.clone()));
        }
        true
    }

    async fn delete(&self, key: &str) -> bool {
        self.entries.lock().unwrap().remove(key).is_some()
    }

    async fn delete_by_pattern(&self, pattern: &str) -> u64 {
        let prefix = pattern.trim_end_matches('*');
        let mut guard = self.entries.lock().unwrap();
        let to_remove: Vec<String> = guard
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for k in &to_remove {
            guard.remove(k);
        }
        to_remove.len() as u64
    }

    async fn exists(&self, key: &str) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }

    async fn ttl(&self, _key: &str) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn in_memory_cache_roundtrips_and_stamps_cached_at() {
        let cache = InMemoryCache::new();
        assert!(cache.set("paper:abc:full", json!({"paperId": "abc"}), None).await);
        let got = cache.get("paper:abc:full").await.unwrap();
        assert_eq!(got["paperId"], "abc");
        assert!(got.get("cached_at").is_some());
    }

    #[tokio::test]
    async fn in_memory_cache_delete_by_pattern() {
        let cache = InMemoryCache::new();
        cache.set("paper:1:full", json!({}), None).await;
        cache.set("paper:1:citations:0:10", json!({}), None).await;
        cache.set("paper:2:full", json!({}), None).await;
        let deleted = cache.delete_by_pattern("paper:1:*").await;
        assert_eq!(deleted, 2);
        assert!(cache.get("paper:2:full").await.is_some());
    }

    #[tokio::test]
    async fn miss_is_none_not_error() {
        let cache = InMemoryCache::new();
        assert!(cache.get("nope").await.is_none());
        assert!(!cache.exists("nope").await);
    }
}
