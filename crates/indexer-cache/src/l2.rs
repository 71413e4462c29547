//! L2: one file per entry, on disk.

use crate::entry::CacheEntry;
use indexer_core::config::L2Config;
use indexer_core::error::{IndexerError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct L2Tier {
    root: PathBuf,
    max_bytes: u64,
}

impl L2Tier {
    pub async fn new(config: &L2Config) -> Result<Self> {
        tokio::fs::create_dir_all(&config.path)
            .await
            .map_err(|e| IndexerError::storage(format!("failed to create L2 cache dir: {e}")))?;
        Ok(Self {
            root: config.path.clone(),
            max_bytes: config.max_bytes,
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(hex_fingerprint(key))
    }

    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(IndexerError::storage(e.to_string())),
        };

        let (entry, _): (CacheEntry, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(|e| IndexerError::storage(format!("corrupt L2 entry: {e}")))?;

        if entry.is_expired() {
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    pub async fn set(&self, entry: &CacheEntry) -> Result<()> {
        self.evict_if_over_budget(entry.size_bytes).await?;

        let bytes = bincode::serde::encode_to_vec(entry, bincode::config::standard())
            .map_err(|e| IndexerError::storage(format!("failed to serialize L2 entry: {e}")))?;
        let path = self.path_for(&entry.key);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) | Err(_) => Ok(()), // missing file is not an error for delete
        }
    }

    pub async fn delete_where_file(&self, file_path: &str) -> Result<()> {
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;
        while let Some(ent) = dir.next_entry().await.map_err(|e| IndexerError::storage(e.to_string()))? {
            let path = ent.path();
            if let Ok(bytes) = tokio::fs::read(&path).await {
                if let Ok((entry, _)) =
                    bincode::serde::decode_from_slice::<CacheEntry, _>(&bytes, bincode::config::standard())
                {
                    if entry.file_paths.iter().any(|p| p == file_path) {
                        let _ = tokio::fs::remove_file(&path).await;
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;
        while let Some(ent) = dir.next_entry().await.map_err(|e| IndexerError::storage(e.to_string()))? {
            let _ = tokio::fs::remove_file(ent.path()).await;
        }
        Ok(())
    }

    /// LRU-by-`lastAccessed` eviction scanned on insert, approximated using
    /// each file's on-disk mtime rather than decoding every entry up front.
    async fn evict_if_over_budget(&self, incoming_bytes: u64) -> Result<()> {
        let mut entries = Vec::new();
        let mut total: u64 = 0;
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;
        while let Some(ent) = dir.next_entry().await.map_err(|e| IndexerError::storage(e.to_string()))? {
            if let Ok(meta) = ent.metadata().await {
                total += meta.len();
                if let Ok(modified) = meta.modified() {
                    entries.push((ent.path(), modified, meta.len()));
                }
            }
        }

        if total + incoming_bytes <= self.max_bytes {
            return Ok(());
        }

        entries.sort_by_key(|(_, modified, _)| *modified);
        for (path, _, len) in entries {
            if total + incoming_bytes <= self.max_bytes {
                break;
            }
            if tokio::fs::remove_file(&path).await.is_ok() {
                total = total.saturating_sub(len);
                debug!(path = %path.display(), "evicted L2 entry over byte budget");
            } else {
                warn!(path = %path.display(), "failed to evict L2 entry");
            }
        }
        Ok(())
    }
}

fn hex_fingerprint(key: &str) -> String {
    // The fingerprint itself is already a content hash upstream; this re-hash
    // only guarantees a filesystem-safe name.
    let mut acc: u64 = 0xcbf29ce484222325; // FNV-1a offset basis
    for byte in key.as_bytes() {
        acc ^= *byte as u64;
        acc = acc.wrapping_mul(0x100000001b3);
    }
    format!("{acc:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(dir: &Path) -> L2Config {
        L2Config {
            path: dir.to_path_buf(),
            max_bytes: 1024,
            default_ttl_ms: 60_000,
        }
    }

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let dir = tempdir().unwrap();
        let tier = L2Tier::new(&config(dir.path())).await.unwrap();
        let entry = CacheEntry::new("k1".into(), vec![9, 9, 9], 60_000, None, vec![]);
        tier.set(&entry).await.unwrap();
        let got = tier.get("k1").await.unwrap().unwrap();
        assert_eq!(got.value, vec![9, 9, 9]);
    }

    #[tokio::test]
    async fn eviction_keeps_total_under_budget() {
        let dir = tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.max_bytes = 64;
        let tier = L2Tier::new(&cfg).await.unwrap();
        for i in 0..10 {
            let entry = CacheEntry::new(format!("k{i}"), vec![0u8; 32], 60_000, None, vec![]);
            tier.set(&entry).await.unwrap();
        }
        let mut dir_entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut total = 0u64;
        while let Some(e) = dir_entries.next_entry().await.unwrap() {
            total += e.metadata().await.unwrap().len();
        }
        assert!(total <= 64 * 3); // some slack for the entry that was just written
    }
}
