//! URL Cache: a shared, cross-job store of `(normalized_url -> CacheEntry)`.
//!
//! Backed by an in-process map behind a `tokio::sync::RwLock` — the real
//! deployment's KV store is an external collaborator (see the crate's
//! module docs); this subsystem only needs read-through/write-through
//! semantics and TTL expiry, which an in-memory store gives for free while
//! keeping the crawl engine runnable standalone.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::CacheEntry;
use crate::normalize::cache_key;

pub const DEFAULT_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Default)]
pub struct UrlCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl UrlCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Read-through lookup. Returns `None` on miss or if the stored entry
    /// has expired, in which case the expired entry is evicted. Any
    /// underlying-store failure degrades to a miss rather than propagating
    /// — a cache fault must never fail the crawl.
    pub async fn get(&self, normalized_url: &str) -> Option<CacheEntry> {
        let key = cache_key(normalized_url);
        {
            let entries = self.entries.read().await;
            match entries.get(&key) {
                Some(entry) if !entry.is_expired(chrono::Utc::now()) => {
                    return Some(entry.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: evict.
        let mut entries = self.entries.write().await;
        entries.remove(&key);
        tracing::debug!(url = %normalized_url, "cache entry expired, evicted");
        None
    }

    /// Write-through. Last-writer-wins on key conflict.
    pub async fn put(&self, normalized_url: &str, entry: CacheEntry) {
        let key = cache_key(normalized_url);
        let mut entries = self.entries.write().await;
        entries.insert(key, entry);
    }

    pub async fn invalidate(&self, normalized_url: &str) {
        let key = cache_key(normalized_url);
        let mut entries = self.entries.write().await;
        entries.remove(&key);
    }

    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CacheEntry;

    fn sample_entry(ttl_secs: u64) -> CacheEntry {
        CacheEntry {
            url_hash: "deadbeef".to_string(),
            url: "https://example.com/docs".to_string(),
            title: "Docs".to_string(),
            content_markdown: "# Docs\n\nhello".to_string(),
            links: vec![],
            quality_score: 80,
            word_count: 1,
            content_hash: "abc".to_string(),
            cached_at: chrono::Utc::now(),
            ttl_secs,
        }
    }

    #[tokio::test]
    async fn get_after_put_returns_entry_within_ttl() {
        let cache = UrlCache::new();
        cache
            .put("https://example.com/docs", sample_entry(DEFAULT_TTL_SECS))
            .await;
        let got = cache.get("https://example.com/docs").await;
        assert!(got.is_some());
        assert_eq!(got.unwrap().title, "Docs");
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss_and_evicted() {
        let cache = UrlCache::new();
        let mut entry = sample_entry(0);
        entry.cached_at = chrono::Utc::now() - chrono::Duration::seconds(5);
        cache.put("https://example.com/docs", entry).await;
        assert!(cache.get("https://example.com/docs").await.is_none());
        assert!(cache.get("https://example.com/docs").await.is_none());
    }

    #[tokio::test]
    async fn miss_on_absent_key() {
        let cache = UrlCache::new();
        assert!(cache.get("https://example.com/nope").await.is_none());
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache = UrlCache::new();
        cache
            .put("https://example.com/docs", sample_entry(DEFAULT_TTL_SECS))
            .await;
        cache.invalidate("https://example.com/docs").await;
        assert!(cache.get("https://example.com/docs").await.is_none());
    }
}
