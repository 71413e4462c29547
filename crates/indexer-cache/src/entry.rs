//! `CacheEntry` — shared shape across L1/L2/L3. The cache is agnostic to what
//! a `Response` looks like; it only moves bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLevel {
    L1,
    L2,
    L3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub created: DateTime<Utc>,
    pub ttl_ms: u64,
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
    pub size_bytes: u64,
    pub level: CacheLevel,
    pub index_version: Option<u64>,
    /// File paths touched by this entry's result, used by the conservative
    /// invalidation strategy.
    pub file_paths: Vec<String>,
}

impl CacheEntry {
    pub fn new(key: String, value: Vec<u8>, ttl_ms: u64, index_version: Option<u64>, file_paths: Vec<String>) -> Self {
        let now = Utc::now();
        let size_bytes = value.len() as u64;
        Self {
            key,
            value,
            created: now,
            ttl_ms,
            access_count: 0,
            last_accessed: now,
            size_bytes,
            level: CacheLevel::L1,
            index_version,
            file_paths,
        }
    }

    /// A TTL of zero means "never serve".
    pub fn is_expired(&self) -> bool {
        if self.ttl_ms == 0 {
            return true;
        }
        let age_ms = (Utc::now() - self.created).num_milliseconds().max(0) as u64;
        age_ms > self.ttl_ms
    }

    pub fn touch(&mut self) {
        self.access_count += 1;
        self.last_accessed = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_ttl_is_always_expired() {
        let entry = CacheEntry::new("k".into(), vec![1, 2, 3], 0, None, vec![]);
        assert!(entry.is_expired());
    }

    #[test]
    fn fresh_entry_with_positive_ttl_is_not_expired() {
        let entry = CacheEntry::new("k".into(), vec![1, 2, 3], 60_000, None, vec![]);
        assert!(!entry.is_expired());
    }
}
