//! Multi-Level Cache: L1 memory / L2 disk / L3 SQL, fronting the Vector
//! Database and Signature Processor.

pub mod entry;
pub mod l1;
pub mod l2;
pub mod l3;
pub mod singleflight;

use entry::{CacheEntry, CacheLevel};
use indexer_core::config::{CacheConfig, InvalidationStrategy};
use indexer_core::error::Result;
use indexer_db::events::{MutationEvent, MutationKind};
use l1::L1Tier;
use l2::L2Tier;
use l3::L3Tier;
use singleflight::{Lease, SingleFlight};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub use l3::{QueryLogEntry, WarmCandidate};

/// How long a follower waits on the leader's notify before re-probing the
/// cache and re-acquiring the lease. Bounds an otherwise-unbounded wait
/// against a missed wakeup; short enough that a few retries still beat
/// recomputing from scratch.
const FOLLOWER_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub l1_entries: u64,
    pub l1_weighted_bytes: u64,
}

/// Outcome of a cache probe or a coalesced compute, reported up to the Query
/// Coordinator for its log entry (`cacheHit`, `cacheLevel`).
pub struct Probe {
    pub entry: CacheEntry,
    pub hit_level: Option<CacheLevel>,
}

pub struct MultiLevelCache {
    config: Arc<CacheConfig>,
    l1: L1Tier,
    l2: Option<Arc<L2Tier>>,
    l3: Option<Arc<L3Tier>>,
    single_flight: SingleFlight,
}

impl MultiLevelCache {
    pub async fn new(config: Arc<CacheConfig>) -> Result<Self> {
        let l1 = L1Tier::new(&config.l1);
        let l2 = Some(Arc::new(L2Tier::new(&config.l2).await?));
        let l3 = Some(Arc::new(L3Tier::new(&config.l3).await?));

        Ok(Self {
            config,
            l1,
            l2,
            l3,
            single_flight: SingleFlight::new(),
        })
    }

    /// Hot path: L1 -> L2 -> L3, promoting on a hit at level > 1. Promotion
    /// failures are swallowed: they never fail the caller's request.
    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        if let Some(entry) = self.l1.get(key).await {
            return Ok(Some(entry));
        }

        if let Some(l2) = &self.l2 {
            if let Some(mut entry) = l2.get(key).await? {
                entry.level = CacheLevel::L1;
                if self.config.enable_promotion {
                    self.l1.set(entry.clone()).await;
                }
                return Ok(Some(with_level(entry, CacheLevel::L2)));
            }
        }

        if let Some(l3) = &self.l3 {
            if let Some(mut entry) = l3.get(key).await? {
                entry.level = CacheLevel::L1;
                if self.config.enable_promotion {
                    self.l1.set(entry.clone()).await;
                    if let Some(l2) = &self.l2 {
                        let _ = l2.set(&entry).await;
                    }
                }
                return Ok(Some(with_level(entry, CacheLevel::L3)));
            }
        }

        Ok(None)
    }

    /// Writes go to every enabled tier. The caller's reply is bound by L1 only;
    /// L2/L3 writes proceed in the background.
    pub async fn set(&self, key: String, value: Vec<u8>, ttl_ms: u64, index_version: Option<u64>, file_paths: Vec<String>) {
        let entry = CacheEntry::new(key, value, ttl_ms, index_version, file_paths);
        self.l1.set(entry.clone()).await;

        if let Some(l2) = self.l2.clone() {
            let entry = entry.clone();
            tokio::spawn(async move {
                if let Err(e) = l2.set(&entry).await {
                    warn!(error = %e, "L2 write failed");
                }
            });
        }
        if let Some(l3) = self.l3.clone() {
            tokio::spawn(async move {
                if let Err(e) = l3.set(&entry).await {
                    warn!(error = %e, "L3 write failed");
                }
            });
        }
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.l1.delete(key).await;
        if let Some(l2) = &self.l2 {
            l2.delete(key).await?;
        }
        if let Some(l3) = &self.l3 {
            l3.delete(key).await?;
        }
        Ok(())
    }

    pub fn has(&self, key: &str) -> bool {
        self.l1.has(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.l1.keys()
    }

    pub async fn clear(&self) -> Result<()> {
        self.l1.clear().await;
        if let Some(l2) = &self.l2 {
            l2.clear().await?;
        }
        if let Some(l3) = &self.l3 {
            l3.clear().await?;
        }
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            l1_entries: self.l1.entry_count(),
            l1_weighted_bytes: self.l1.weighted_size(),
        }
    }

    pub async fn append_log(&self, entry: QueryLogEntry) -> Result<()> {
        if let Some(l3) = &self.l3 {
            l3.append_log(entry).await?;
        }
        Ok(())
    }

    /// Top query hashes by frequency, for the Coordinator to replay at startup.
    /// The replay itself is the Coordinator's job — the cache only knows what
    /// was asked for, not how to ask again.
    pub async fn warm_candidates(&self, min_frequency: i64) -> Result<Vec<WarmCandidate>> {
        if !self.config.enable_warming {
            return Ok(Vec::new());
        }
        match &self.l3 {
            Some(l3) => l3.top_queries(min_frequency, self.config.warming_query_count as i64).await,
            None => Ok(Vec::new()),
        }
    }

    /// Single-flight coalescing: only the first caller for `key` runs `compute`;
    /// concurrent callers wait for its result and re-probe L1 rather than
    /// recomputing themselves.
    pub async fn get_or_compute<F, Fut>(&self, key: String, ttl_ms: u64, compute: F) -> Result<Probe>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(Vec<u8>, Vec<String>, Option<u64>)>>,
    {
        if let Some(entry) = self.get(&key).await? {
            let hit_level = Some(entry.level);
            return Ok(Probe { entry, hit_level });
        }

        let mut lease = self.single_flight.acquire(&key);
        let mut compute = Some(compute);
        loop {
            match lease {
                Lease::Leader(owned_key) => {
                    let compute = compute.take().expect("a lease is led at most once");
                    let result = compute().await;
                    // The cache is populated before the lease is released: a
                    // follower woken by `finish()` must already be able to find
                    // the value, never race the write that produced it.
                    let outcome = match result {
                        Ok((value, file_paths, index_version)) => {
                            self.set(owned_key.clone(), value.clone(), ttl_ms, index_version, file_paths.clone()).await;
                            Ok(Probe {
                                entry: CacheEntry::new(owned_key.clone(), value, ttl_ms, index_version, file_paths),
                                hit_level: None,
                            })
                        }
                        Err(e) => Err(e),
                    };
                    self.single_flight.finish(&owned_key);
                    return outcome;
                }
                Lease::Follower(notify) => {
                    let notified = notify.notified();
                    tokio::pin!(notified);
                    if let Some(entry) = self.get(&key).await? {
                        let hit_level = Some(entry.level);
                        return Ok(Probe { entry, hit_level });
                    }
                    // `notify_waiters` only wakes tasks already registered above;
                    // a follower that missed the window (the leader finished
                    // between our probe and here) would otherwise wait forever.
                    // Bound the wait and fall back to re-probing/re-acquiring.
                    let _ = tokio::time::timeout(FOLLOWER_POLL_INTERVAL, notified.as_mut()).await;
                    if let Some(entry) = self.get(&key).await? {
                        let hit_level = Some(entry.level);
                        return Ok(Probe { entry, hit_level });
                    }
                    lease = self.single_flight.acquire(&key);
                }
            }
        }
    }

    /// Applies one of `aggressive` / `conservative` / `disabled` to a mutation
    /// notification from the Vector Database.
    pub async fn apply_invalidation(&self, event: &MutationEvent) -> Result<()> {
        match self.config.invalidation_strategy {
            InvalidationStrategy::Disabled => Ok(()),
            InvalidationStrategy::Aggressive => {
                if matches!(event.kind, MutationKind::Insert | MutationKind::Update | MutationKind::Delete | MutationKind::Rebuild) {
                    debug!("aggressive invalidation: clearing all tiers");
                    self.clear().await?;
                }
                Ok(())
            }
            InvalidationStrategy::Conservative => {
                if matches!(event.kind, MutationKind::Rebuild) {
                    // A rebuild touches every file indirectly; treat it like aggressive.
                    return self.clear().await;
                }
                let Some(file_path) = &event.file_path else { return Ok(()) };
                self.l1.invalidate_by_file(file_path);
                if let Some(l2) = &self.l2 {
                    l2.delete_where_file(file_path).await?;
                }
                if let Some(l3) = &self.l3 {
                    l3.delete_where_file(file_path).await?;
                }
                Ok(())
            }
        }
    }

    /// Spawns the background listener that applies `apply_invalidation` to
    /// every event on `rx` until the channel closes. The cache owns this
    /// task's lifetime: it runs until the sender side is dropped.
    pub fn spawn_invalidation_listener(self: &Arc<Self>, mut rx: broadcast::Receiver<MutationEvent>) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Err(e) = cache.apply_invalidation(&event).await {
                            warn!(error = %e, "cache invalidation failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "invalidation listener lagged, falling back to full clear");
                        let _ = cache.clear().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

fn with_level(mut entry: CacheEntry, level: CacheLevel) -> CacheEntry {
    entry.level = level;
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexer_core::config::{L1Config, L2Config, L3Config};
    use tempfile::tempdir;

    async fn cache() -> (MultiLevelCache, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = Arc::new(CacheConfig {
            l1: L1Config {
                max_entries: 1000,
                max_bytes: 1024 * 1024,
                default_ttl_ms: 60_000,
            },
            l2: L2Config {
                path: dir.path().join("l2"),
                max_bytes: 1024 * 1024,
                default_ttl_ms: 60_000,
            },
            l3: L3Config {
                path: dir.path().join("l3.db"),
                max_entries: 1000,
                default_ttl_ms: 60_000,
            },
            enable_promotion: true,
            enable_warming: true,
            warming_query_count: 50,
            invalidation_strategy: InvalidationStrategy::Conservative,
        });
        (MultiLevelCache::new(config).await.unwrap(), dir)
    }

    #[tokio::test]
    async fn hit_at_l3_promotes_to_l1() {
        let (cache, _dir) = cache().await;
        let entry = CacheEntry::new("f1".into(), vec![1, 2, 3], 60_000, Some(1), vec!["a.rs".into()]);
        cache.l3.as_ref().unwrap().set(&entry).await.unwrap();

        let first = cache.get("f1").await.unwrap().unwrap();
        assert_eq!(first.level, CacheLevel::L3);

        let second = cache.get("f1").await.unwrap().unwrap();
        assert_eq!(second.level, CacheLevel::L1);
    }

    #[tokio::test]
    async fn concurrent_callers_coalesce_into_one_compute() {
        let (cache, _dir) = cache().await;
        let cache = Arc::new(cache);
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("k".to_string(), 60_000, || async move {
                        calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok((vec![9], Vec::new(), Some(1)))
                    })
                    .await
            }));
        }

        for handle in handles {
            let probe = handle.await.unwrap().unwrap();
            assert_eq!(probe.entry.value, vec![9]);
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn conservative_invalidation_drops_only_matching_file() {
        let (cache, _dir) = cache().await;
        cache.set("k1".into(), vec![1], 60_000, Some(1), vec!["a.rs".into()]).await;
        cache.set("k2".into(), vec![2], 60_000, Some(1), vec!["b.rs".into()]).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await; // let async L2/L3 writes land

        cache
            .apply_invalidation(&MutationEvent {
                kind: MutationKind::Update,
                node_id: None,
                file_path: Some("a.rs".into()),
                index_version: 2,
            })
            .await
            .unwrap();

        assert!(cache.get("k1").await.unwrap().is_none());
        assert!(cache.get("k2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn single_flight_computes_once_for_concurrent_misses() {
        let (cache, _dir) = cache().await;
        let cache = Arc::new(cache);
        let calls = Arc::new(std::sync::atomic::AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("shared".to_string(), 60_000, || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                            Ok((vec![42], Vec::new(), Some(1)))
                        }
                    })
                    .await
                    .unwrap()
            }));
        }

        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
