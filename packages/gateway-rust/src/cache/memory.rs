//! In-memory [`CacheStore`] backed by [`DashMap`].

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use tokio::time::Instant;

use super::{CacheError, CacheStore, StoredEntry};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
    cached_at: SystemTime,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Process-local cache store with lazy TTL expiry.
///
/// Expired entries are treated as absent on read and removed either then or
/// by [`purge_expired`](CacheStore::purge_expired).
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryCacheStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Translates a glob pattern into an anchored regular expression.
///
/// # Errors
///
/// Returns [`CacheError::InvalidPattern`] if the resulting expression does not
/// compile.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, CacheError> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    let mut buf = [0u8; 4];
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(other.encode_utf8(&mut buf))),
        }
    }
    expr.push('$');
    Ok(Regex::new(&expr)?)
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>, CacheError> {
        let now = Instant::now();
        let entry = match self.entries.get(key) {
            Some(entry) => entry.clone(),
            None => return Ok(None),
        };
        if entry.is_expired(now) {
            self.entries.remove_if(key, |_, current| current.is_expired(now));
            return Ok(None);
        }
        Ok(Some(StoredEntry {
            value: entry.value,
            remaining_ttl: entry.expires_at.map(|at| at.saturating_duration_since(now)),
            cached_at: entry.cached_at,
        }))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        let entry = MemoryEntry {
            value,
            expires_at,
            cached_at: SystemTime::now(),
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let matcher = glob_to_regex(pattern)?;
        let mut removed = 0_u64;
        self.entries.retain(|key, _| {
            if matcher.is_match(key) {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        let now = Instant::now();
        let mut removed = 0_u64;
        self.entries.retain(|_, entry| {
            if entry.is_expired(now) {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_returns_value_and_ttl() {
        let store = MemoryCacheStore::new();
        let before = SystemTime::now();
        store
            .set("a", "1".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        let entry = store.get("a").await.unwrap().unwrap();
        assert_eq!(entry.value, "1");
        assert!(entry.cached_at >= before);
        assert!(entry.remaining_ttl.unwrap() <= Duration::from_secs(60));
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_read_as_absent() {
        let store = MemoryCacheStore::new();
        store
            .set("a", "1".to_string(), Duration::from_secs(1))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(1_001)).await;

        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ttl_never_expires() {
        let store = MemoryCacheStore::new();
        store.set("a", "1".to_string(), Duration::ZERO).await.unwrap();
        tokio::time::advance(Duration::from_secs(86_400)).await;

        let entry = store.get("a").await.unwrap().unwrap();
        assert_eq!(entry.remaining_ttl, None);
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let store = MemoryCacheStore::new();
        store.set("a", "1".to_string(), Duration::ZERO).await.unwrap();
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
    }

    #[tokio::test]
    async fn delete_pattern_removes_only_matches() {
        let store = MemoryCacheStore::new();
        for key in [
            "inv:devices:list:a",
            "inv:devices:list:b",
            "inv:device:1",
            "other:devices:list:a",
        ] {
            store.set(key, "x".to_string(), Duration::ZERO).await.unwrap();
        }

        let removed = store.delete_pattern("inv:devices:list:*").await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.get("inv:device:1").await.unwrap().is_some());
        assert!(store.get("other:devices:list:a").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_expired_counts_dropped_entries() {
        let store = MemoryCacheStore::new();
        store
            .set("short", "1".to_string(), Duration::from_secs(1))
            .await
            .unwrap();
        store
            .set("long", "2".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn glob_escapes_regex_metacharacters() {
        let matcher = glob_to_regex("a.b?c*").unwrap();
        assert!(matcher.is_match("a.bXc"));
        assert!(matcher.is_match("a.bXcdef"));
        assert!(!matcher.is_match("aXbXc"));
    }
}
