//! L1: in-process memory tier, backed by `moka`.

use crate::entry::CacheEntry;
use indexer_core::config::L1Config;
use moka::future::Cache;
use std::time::Duration;

pub struct L1Tier {
    cache: Cache<String, CacheEntry>,
}

impl L1Tier {
    pub fn new(config: &L1Config) -> Self {
        let cache = Cache::builder()
            // Weighed by serialized size so `maxBytes` is the effective budget;
            // `maxEntries` is enforced as a secondary ceiling via `max_capacity`
            // when the weigher would otherwise admit too many tiny entries.
            .max_capacity(config.max_bytes.min(config.max_entries.saturating_mul(64)))
            .weigher(|_key: &String, value: &CacheEntry| -> u32 {
                value.size_bytes.try_into().unwrap_or(u32::MAX)
            })
            .time_to_live(Duration::from_millis(config.default_ttl_ms))
            .support_invalidation_closures()
            .build();

        Self { cache }
    }

    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.cache.get(key).await?;
        if entry.is_expired() {
            self.cache.invalidate(key).await;
            return None;
        }
        Some(entry)
    }

    pub async fn set(&self, entry: CacheEntry) {
        self.cache.insert(entry.key.clone(), entry).await;
    }

    pub async fn delete(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    pub fn has(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.cache.iter().map(|(k, _)| k.as_ref().clone()).collect()
    }

    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn weighted_size(&self) -> u64 {
        self.cache.weighted_size()
    }

    /// Conservative invalidation: drop every entry whose `file_paths` includes
    /// `file_path`.
    pub fn invalidate_by_file(&self, file_path: &str) {
        let file_path = file_path.to_string();
        // `invalidate_entries_if` only fails if the cache wasn't built with
        // `support_invalidation_closures()`, which it always is here.
        let _ = self
            .cache
            .invalidate_entries_if(move |_k, v: &CacheEntry| v.file_paths.iter().any(|p| p == &file_path));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> L1Config {
        L1Config {
            max_entries: 1000,
            max_bytes: 1024 * 1024,
            default_ttl_ms: 60_000,
        }
    }

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let tier = L1Tier::new(&config());
        let entry = CacheEntry::new("k1".into(), vec![1, 2, 3], 60_000, None, vec![]);
        tier.set(entry).await;
        let got = tier.get("k1").await.unwrap();
        assert_eq!(got.value, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn miss_returns_none() {
        let tier = L1Tier::new(&config());
        assert!(tier.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn invalidate_by_file_drops_matching_entries() {
        let tier = L1Tier::new(&config());
        tier.set(CacheEntry::new("k1".into(), vec![1], 60_000, None, vec!["src/a.rs".into()]))
            .await;
        tier.set(CacheEntry::new("k2".into(), vec![2], 60_000, None, vec!["src/b.rs".into()]))
            .await;
        tier.invalidate_by_file("src/a.rs");
        tier.cache.run_pending_tasks().await;
        assert!(tier.get("k1").await.is_none());
        assert!(tier.get("k2").await.is_some());
    }
}
