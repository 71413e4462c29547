//! L3: SQL-backed cache tier plus the query log.

use crate::entry::{CacheEntry, CacheLevel};
use chrono::{DateTime, Utc};
use indexer_core::config::L3Config;
use indexer_core::error::{IndexerError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

pub struct L3Tier {
    pool: SqlitePool,
    max_entries: u64,
}

#[derive(Debug, Clone)]
pub struct QueryLogEntry {
    pub query_text: String,
    pub query_hash: String,
    pub options: String,
    pub result_count: u32,
    pub execution_time_ms: u64,
    pub cache_hit: bool,
    pub cache_level: Option<CacheLevel>,
    pub index_version: u64,
}

impl L3Tier {
    pub async fn new(config: &L3Config) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| IndexerError::storage(format!("failed to create L3 cache dir: {e}")))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.path.display()))
            .map_err(|e| IndexerError::storage(format!("invalid L3 path: {e}")))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| IndexerError::storage(format!("failed to open L3 cache: {e}")))?;

        let tier = Self {
            pool,
            max_entries: config.max_entries,
        };
        tier.migrate().await?;
        Ok(tier)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS query_cache (
                key           TEXT PRIMARY KEY,
                value         BLOB NOT NULL,
                timestamp     TEXT NOT NULL,
                ttl           INTEGER NOT NULL,
                access_count  INTEGER NOT NULL,
                last_accessed TEXT NOT NULL,
                size          INTEGER NOT NULL,
                version       INTEGER,
                file_paths    TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::storage(e.to_string()))?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_query_cache_timestamp ON query_cache(timestamp)")
            .execute(&self.pool)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_query_cache_ttl ON query_cache(ttl)")
            .execute(&self.pool)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS query_log (
                query_text        TEXT NOT NULL,
                query_hash        TEXT NOT NULL,
                options           TEXT NOT NULL,
                result_count      INTEGER NOT NULL,
                execution_time_ms INTEGER NOT NULL,
                cache_hit         INTEGER NOT NULL,
                cache_level       TEXT,
                timestamp         TEXT NOT NULL,
                index_version     INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::storage(e.to_string()))?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_query_log_hash ON query_log(query_hash)")
            .execute(&self.pool)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_query_log_timestamp ON query_log(timestamp)")
            .execute(&self.pool)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;

        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let row = sqlx::query("SELECT * FROM query_cache WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;

        let Some(row) = row else { return Ok(None) };
        let entry = row_to_entry(row)?;
        if entry.is_expired() {
            let _ = self.delete(key).await;
            return Ok(None);
        }

        sqlx::query("UPDATE query_cache SET access_count = access_count + 1, last_accessed = ?1 WHERE key = ?2")
            .bind(Utc::now().to_rfc3339())
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;

        Ok(Some(entry))
    }

    pub async fn set(&self, entry: &CacheEntry) -> Result<()> {
        self.evict_if_over_budget().await?;
        let file_paths = entry.file_paths.join("\u{1}");
        sqlx::query(
            r#"
            INSERT INTO query_cache (key, value, timestamp, ttl, access_count, last_accessed, size, version, file_paths)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value, timestamp = excluded.timestamp, ttl = excluded.ttl,
                last_accessed = excluded.last_accessed, size = excluded.size,
                version = excluded.version, file_paths = excluded.file_paths
            "#,
        )
        .bind(&entry.key)
        .bind(&entry.value)
        .bind(entry.created.to_rfc3339())
        .bind(entry.ttl_ms as i64)
        .bind(entry.access_count as i64)
        .bind(entry.last_accessed.to_rfc3339())
        .bind(entry.size_bytes as i64)
        .bind(entry.index_version.map(|v| v as i64))
        .bind(file_paths)
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::storage(e.to_string()))?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM query_cache WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;
        Ok(())
    }

    pub async fn delete_where_file(&self, file_path: &str) -> Result<()> {
        let pattern = format!("%{file_path}%");
        sqlx::query("DELETE FROM query_cache WHERE file_paths LIKE ?1")
            .bind(pattern)
            .execute(&self.pool)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM query_cache")
            .execute(&self.pool)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;
        Ok(())
    }

    async fn evict_if_over_budget(&self) -> Result<()> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM query_cache")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;
        if (count as u64) < self.max_entries {
            return Ok(());
        }
        let overflow = count as u64 - self.max_entries + 1;
        sqlx::query("DELETE FROM query_cache WHERE key IN (SELECT key FROM query_cache ORDER BY last_accessed ASC LIMIT ?1)")
            .bind(overflow as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;
        Ok(())
    }

    pub async fn append_log(&self, entry: QueryLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO query_log
                (query_text, query_hash, options, result_count, execution_time_ms,
                 cache_hit, cache_level, timestamp, index_version)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(entry.query_text)
        .bind(entry.query_hash)
        .bind(entry.options)
        .bind(entry.result_count as i64)
        .bind(entry.execution_time_ms as i64)
        .bind(entry.cache_hit)
        .bind(entry.cache_level.map(cache_level_str))
        .bind(Utc::now().to_rfc3339())
        .bind(entry.index_version as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::storage(e.to_string()))?;
        Ok(())
    }

    /// Top-N distinct `(queryText, options)` pairs by frequency, for the
    /// Coordinator to replay at startup. Grouped by hash so repeats of the
    /// same query count toward one frequency, but the text/options returned
    /// come from the most recent log row for that hash since those are what
    /// a replay actually needs.
    pub async fn top_queries(&self, min_frequency: i64, limit: i64) -> Result<Vec<WarmCandidate>> {
        let rows = sqlx::query(
            r#"
            SELECT query_text, options, COUNT(*) as freq, MAX(timestamp) as latest
            FROM query_log
            GROUP BY query_hash
            HAVING freq >= ?1
            ORDER BY freq DESC
            LIMIT ?2
            "#,
        )
        .bind(min_frequency)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| IndexerError::storage(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|r| WarmCandidate {
                query_text: r.get("query_text"),
                options: r.get("options"),
            })
            .collect())
    }
}

/// A query worth replaying at startup: enough of the original request to
/// reconstruct it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmCandidate {
    pub query_text: String,
    pub options: String,
}

fn cache_level_str(level: CacheLevel) -> &'static str {
    match level {
        CacheLevel::L1 => "l1",
        CacheLevel::L2 => "l2",
        CacheLevel::L3 => "l3",
    }
}

fn row_to_entry(row: sqlx::sqlite::SqliteRow) -> Result<CacheEntry> {
    let created: String = row.get("timestamp");
    let created: DateTime<Utc> = DateTime::parse_from_rfc3339(&created)
        .map_err(|e| IndexerError::storage(format!("corrupt L3 timestamp: {e}")))?
        .with_timezone(&Utc);
    let last_accessed: String = row.get("last_accessed");
    let last_accessed: DateTime<Utc> = DateTime::parse_from_rfc3339(&last_accessed)
        .map_err(|e| IndexerError::storage(format!("corrupt L3 last_accessed: {e}")))?
        .with_timezone(&Utc);
    let file_paths: String = row.get("file_paths");
    let version: Option<i64> = row.get("version");

    Ok(CacheEntry {
        key: row.get("key"),
        value: row.get("value"),
        created,
        ttl_ms: row.get::<i64, _>("ttl") as u64,
        access_count: row.get::<i64, _>("access_count") as u64,
        last_accessed,
        size_bytes: row.get::<i64, _>("size") as u64,
        level: CacheLevel::L3,
        index_version: version.map(|v| v as u64),
        file_paths: if file_paths.is_empty() {
            Vec::new()
        } else {
            file_paths.split('\u{1}').map(|s| s.to_string()).collect()
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn tier() -> (L3Tier, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let cfg = L3Config {
            path: dir.path().join("l3.db"),
            max_entries: 100,
            default_ttl_ms: 60_000,
        };
        (L3Tier::new(&cfg).await.unwrap(), dir)
    }

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let (tier, _dir) = tier().await;
        let entry = CacheEntry::new("k1".into(), vec![7, 7], 60_000, Some(3), vec!["a.rs".into()]);
        tier.set(&entry).await.unwrap();
        let got = tier.get("k1").await.unwrap().unwrap();
        assert_eq!(got.value, vec![7, 7]);
        assert_eq!(got.file_paths, vec!["a.rs".to_string()]);
    }

    #[tokio::test]
    async fn delete_where_file_removes_matching_entries() {
        let (tier, _dir) = tier().await;
        tier.set(&CacheEntry::new("k1".into(), vec![1], 60_000, None, vec!["a.rs".into()]))
            .await
            .unwrap();
        tier.set(&CacheEntry::new("k2".into(), vec![2], 60_000, None, vec!["b.rs".into()]))
            .await
            .unwrap();
        tier.delete_where_file("a.rs").await.unwrap();
        assert!(tier.get("k1").await.unwrap().is_none());
        assert!(tier.get("k2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn top_queries_orders_by_frequency() {
        let (tier, _dir) = tier().await;
        for _ in 0..3 {
            tier.append_log(QueryLogEntry {
                query_text: "foo".into(),
                query_hash: "hash-foo".into(),
                options: "{}".into(),
                result_count: 1,
                execution_time_ms: 5,
                cache_hit: false,
                cache_level: None,
                index_version: 1,
            })
            .await
            .unwrap();
        }
        tier.append_log(QueryLogEntry {
            query_text: "bar".into(),
            query_hash: "hash-bar".into(),
            options: "{}".into(),
            result_count: 1,
            execution_time_ms: 5,
            cache_hit: false,
            cache_level: None,
            index_version: 1,
        })
        .await
        .unwrap();

        let top = tier.top_queries(1, 10).await.unwrap();
        assert_eq!(top[0].query_text, "foo");
    }
}
