//! Durable, transactional `nodeId ↔ VectorRecord` mapping backed by SQLite.
//!
//! The store is opened in WAL mode with `synchronous = NORMAL`; durability comes
//! from SQLite's own write-ahead log, not a hand-rolled one. A single pool serves
//! both the writer and concurrent readers — SQLite serializes writers internally,
//! so "single writer, many readers" holds without an application-level lock.

use crate::record::{
    decode_vector, encode_vector, vector_hash, BatchFailure, BatchResult, PartialMetadata,
    RecordMetadata, StoreStats, VectorRecord,
};
use chrono::{DateTime, Utc};
use indexer_core::error::{IndexerError, Result};
use indexer_core::types::{Label, NodeId, NodeType, Vector};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, instrument};

pub struct MetadataStore {
    pool: SqlitePool,
    dimensions: usize,
}

impl MetadataStore {
    #[instrument(skip(dimensions))]
    pub async fn open(path: &Path, dimensions: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| IndexerError::storage(format!("failed to create data dir: {e}")))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| IndexerError::storage(format!("invalid storage path: {e}")))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(|e| IndexerError::storage(format!("failed to open metadata store: {e}")))?;

        let store = Self { pool, dimensions };
        store.migrate().await?;
        info!(path = %path.display(), "metadata store opened");
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vectors (
                node_id      TEXT PRIMARY KEY,
                label        INTEGER NOT NULL UNIQUE,
                vector       BLOB NOT NULL,
                signature    TEXT NOT NULL,
                summary      TEXT NOT NULL,
                file_id      TEXT NOT NULL,
                file_path    TEXT NOT NULL,
                line_number  INTEGER NOT NULL,
                confidence   REAL NOT NULL,
                last_updated TEXT NOT NULL,
                vector_hash  TEXT NOT NULL,
                node_type    TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::storage(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_vectors_file_path ON vectors(file_path)")
            .execute(&self.pool)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_vectors_confidence ON vectors(confidence)")
            .execute(&self.pool)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_vectors_label ON vectors(label)")
            .execute(&self.pool)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS store_meta (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::storage(e.to_string()))?;

        sqlx::query("INSERT OR IGNORE INTO store_meta (key, value) VALUES ('next_label_id', '0')")
            .execute(&self.pool)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;

        Ok(())
    }

    fn validate_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(IndexerError::DimensionMismatch {
                expected: self.dimensions,
                got: vector.len(),
            });
        }
        Ok(())
    }

    async fn next_label(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>) -> Result<Label> {
        let row = sqlx::query("SELECT value FROM store_meta WHERE key = 'next_label_id'")
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;
        let current: String = row.get("value");
        let label: Label = current
            .parse()
            .map_err(|_| IndexerError::storage("corrupt next_label_id counter"))?;

        sqlx::query("UPDATE store_meta SET value = ?1 WHERE key = 'next_label_id'")
            .bind((label + 1).to_string())
            .execute(&mut **tx)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;

        Ok(label)
    }

    #[instrument(skip(self, vector, metadata))]
    pub async fn insert(
        &self,
        node_id: &NodeId,
        vector: Vector,
        metadata: RecordMetadata,
    ) -> Result<Label> {
        self.validate_dimension(&vector)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;

        let existing: Option<i64> = sqlx::query_scalar("SELECT 1 FROM vectors WHERE node_id = ?1")
            .bind(node_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;
        if existing.is_some() {
            return Err(IndexerError::already_exists(node_id.clone()));
        }

        let label = Self::next_label(&mut tx).await?;
        let now = Utc::now();
        let hash = vector_hash(&vector);

        sqlx::query(
            r#"
            INSERT INTO vectors
                (node_id, label, vector, signature, summary, file_id, file_path,
                 line_number, confidence, last_updated, vector_hash, node_type)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(node_id)
        .bind(label as i64)
        .bind(encode_vector(&vector))
        .bind(&metadata.signature)
        .bind(&metadata.summary)
        .bind(&metadata.file_id)
        .bind(&metadata.file_path)
        .bind(metadata.line_number as i64)
        .bind(metadata.confidence)
        .bind(now.to_rfc3339())
        .bind(&hash)
        .bind(node_type_str(metadata.node_type))
        .execute(&mut *tx)
        .await
        .map_err(|e| IndexerError::storage(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;

        debug!(node_id, label, "inserted vector record");
        Ok(label)
    }

    /// Atomic per-record within the batch: each record is either fully committed
    /// with its label, or not at all.
    #[instrument(skip(self, records))]
    pub async fn insert_batch(
        &self,
        records: Vec<(NodeId, Vector, RecordMetadata)>,
    ) -> Result<BatchResult> {
        let mut result = BatchResult::default();

        for (node_id, vector, metadata) in records {
            match self.insert(&node_id, vector, metadata).await {
                Ok(_) => result.success_count += 1,
                Err(e) => result.failures.push(BatchFailure {
                    node_id,
                    reason: e.to_string(),
                }),
            }
        }

        Ok(result)
    }

    #[instrument(skip(self, vector, partial))]
    pub async fn update(
        &self,
        node_id: &NodeId,
        vector: Vector,
        partial: Option<PartialMetadata>,
    ) -> Result<()> {
        self.validate_dimension(&vector)?;

        let existing = self.get(node_id).await?;
        let Some(existing) = existing else {
            return Err(IndexerError::not_found(node_id.clone()));
        };

        let partial = partial.unwrap_or_default();
        let signature = partial.signature.unwrap_or(existing.signature);
        let summary = partial.summary.unwrap_or(existing.summary);
        let confidence = partial.confidence.unwrap_or(existing.confidence);
        let now = Utc::now();
        let hash = vector_hash(&vector);

        sqlx::query(
            r#"
            UPDATE vectors
            SET vector = ?1, signature = ?2, summary = ?3, confidence = ?4,
                last_updated = ?5, vector_hash = ?6
            WHERE node_id = ?7
            "#,
        )
        .bind(encode_vector(&vector))
        .bind(signature)
        .bind(summary)
        .bind(confidence)
        .bind(now.to_rfc3339())
        .bind(hash)
        .bind(node_id)
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::storage(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, node_id: &NodeId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM vectors WHERE node_id = ?1")
            .bind(node_id)
            .execute(&self.pool)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, node_id: &NodeId) -> Result<Option<VectorRecord>> {
        let row = sqlx::query("SELECT * FROM vectors WHERE node_id = ?1")
            .bind(node_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;

        row.map(row_to_record).transpose()
    }

    pub async fn get_many(&self, node_ids: &[NodeId]) -> Result<Vec<VectorRecord>> {
        if node_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = node_ids
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", i + 1))
            .collect::<Vec<_>>()
            .join(",");
        let query_str = format!("SELECT * FROM vectors WHERE node_id IN ({placeholders})");
        let mut query = sqlx::query(&query_str);
        for id in node_ids {
            query = query.bind(id);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;
        rows.into_iter().map(row_to_record).collect()
    }

    pub async fn label_of(&self, node_id: &NodeId) -> Result<Option<Label>> {
        let row: Option<i64> = sqlx::query_scalar("SELECT label FROM vectors WHERE node_id = ?1")
            .bind(node_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;
        Ok(row.map(|l| l as Label))
    }

    pub async fn node_id_of(&self, label: Label) -> Result<Option<NodeId>> {
        let row: Option<String> = sqlx::query_scalar("SELECT node_id FROM vectors WHERE label = ?1")
            .bind(label as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;
        Ok(row)
    }

    /// Paged, restartable iteration over every live `nodeId`, used for graph
    /// rebuild. `after_label` is the last label the caller already processed;
    /// `None` starts from the beginning (including label 0) rather than
    /// forcing a synthetic lower bound.
    pub async fn all_node_ids_page(&self, after_label: Option<Label>, limit: i64) -> Result<Vec<(Label, NodeId)>> {
        let rows = match after_label {
            Some(after) => {
                sqlx::query("SELECT label, node_id FROM vectors WHERE label > ?1 ORDER BY label ASC LIMIT ?2")
                    .bind(after as i64)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT label, node_id FROM vectors ORDER BY label ASC LIMIT ?1")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| IndexerError::storage(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get::<i64, _>("label") as Label, r.get("node_id")))
            .collect())
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as count, AVG(confidence) as avg_conf,
                   MIN(last_updated) as oldest, MAX(last_updated) as newest
            FROM vectors
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| IndexerError::storage(e.to_string()))?;

        let count: i64 = row.get("count");
        let avg_conf: Option<f64> = row.get("avg_conf");
        let oldest: Option<String> = row.get("oldest");
        let newest: Option<String> = row.get("newest");

        Ok(StoreStats {
            vector_count: count as u64,
            storage_size_bytes: count as u64 * (self.dimensions as u64 * 4 + 256),
            average_confidence: avg_conf.unwrap_or(0.0) as f32,
            oldest_vector: oldest.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
            newest_vector: newest.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
        })
    }

    /// Candidate retrieval for the signature processor: records whose signature
    /// contains `name_fragment`, restricted to function-like node types,
    /// over-fetched by `limit`.
    pub async fn find_by_signature_fragment(
        &self,
        name_fragment: &str,
        limit: i64,
    ) -> Result<Vec<VectorRecord>> {
        let pattern = format!("%{}%", name_fragment.to_lowercase());
        let rows = sqlx::query(
            r#"
            SELECT * FROM vectors
            WHERE LOWER(signature) LIKE ?1
            ORDER BY last_updated ASC
            LIMIT ?2
            "#,
        )
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| IndexerError::storage(e.to_string()))?;

        rows.into_iter().map(row_to_record).collect()
    }

    pub async fn find_by_file_path_prefix(&self, prefix: &str, limit: i64) -> Result<Vec<VectorRecord>> {
        let pattern = format!("{}%", prefix);
        let rows = sqlx::query("SELECT * FROM vectors WHERE file_path LIKE ?1 LIMIT ?2")
            .bind(pattern)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| IndexerError::storage(e.to_string()))?;
        rows.into_iter().map(row_to_record).collect()
    }
}

fn node_type_str(node_type: NodeType) -> &'static str {
    match node_type {
        NodeType::Function => "function",
        NodeType::Method => "method",
        NodeType::Constructor => "constructor",
        NodeType::ArrowFunction => "arrow_function",
        NodeType::Class => "class",
        NodeType::Interface => "interface",
        NodeType::Module => "module",
        NodeType::Variable => "variable",
        NodeType::Other => "other",
    }
}

fn node_type_from_str(s: &str) -> NodeType {
    match s {
        "function" => NodeType::Function,
        "method" => NodeType::Method,
        "constructor" => NodeType::Constructor,
        "arrow_function" => NodeType::ArrowFunction,
        "class" => NodeType::Class,
        "interface" => NodeType::Interface,
        "module" => NodeType::Module,
        "variable" => NodeType::Variable,
        _ => NodeType::Other,
    }
}

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<VectorRecord> {
    let last_updated: String = row.get("last_updated");
    let last_updated = DateTime::parse_from_rfc3339(&last_updated)
        .map_err(|e| IndexerError::storage(format!("corrupt timestamp: {e}")))?
        .with_timezone(&Utc);

    let vector_bytes: Vec<u8> = row.get("vector");
    let node_type_raw: String = row.get("node_type");

    Ok(VectorRecord {
        node_id: row.get("node_id"),
        label: row.get::<i64, _>("label") as Label,
        vector: decode_vector(&vector_bytes),
        signature: row.get("signature"),
        summary: row.get("summary"),
        file_id: row.get("file_id"),
        file_path: row.get("file_path"),
        line_number: row.get::<i64, _>("line_number") as u32,
        confidence: row.get("confidence"),
        last_updated,
        vector_hash: row.get("vector_hash"),
        node_type: node_type_from_str(&node_type_raw),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn meta(sig: &str) -> RecordMetadata {
        RecordMetadata {
            signature: sig.to_string(),
            summary: "does a thing".to_string(),
            file_id: "f1".to_string(),
            file_path: "src/lib.rs".to_string(),
            line_number: 10,
            confidence: 0.9,
            node_type: NodeType::Function,
        }
    }

    async fn open_store() -> (MetadataStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = MetadataStore::open(&dir.path().join("meta.db"), 4).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn insert_then_get_roundtrips() {
        let (store, _dir) = open_store().await;
        let label = store
            .insert(&"n1".to_string(), vec![1.0, 0.0, 0.0, 0.0], meta("f()"))
            .await
            .unwrap();
        assert_eq!(label, 0);

        let record = store.get(&"n1".to_string()).await.unwrap().unwrap();
        assert_eq!(record.vector, vec![1.0, 0.0, 0.0, 0.0]);
        assert_eq!(record.signature, "f()");
    }

    #[tokio::test]
    async fn duplicate_insert_fails_without_mutation() {
        let (store, _dir) = open_store().await;
        store
            .insert(&"n1".to_string(), vec![1.0, 0.0, 0.0, 0.0], meta("f()"))
            .await
            .unwrap();

        let err = store
            .insert(&"n1".to_string(), vec![0.0, 1.0, 0.0, 0.0], meta("g()"))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::AlreadyExists(_)));

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.vector_count, 1);
    }

    #[tokio::test]
    async fn dimension_mismatch_does_not_mutate() {
        let (store, _dir) = open_store().await;
        let err = store
            .insert(&"n2".to_string(), vec![1.0, 2.0, 3.0], meta("f()"))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::DimensionMismatch { .. }));

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.vector_count, 0);
    }

    #[tokio::test]
    async fn delete_nonexistent_returns_false() {
        let (store, _dir) = open_store().await;
        assert!(!store.delete(&"missing".to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn delete_removes_record_and_mapping() {
        let (store, _dir) = open_store().await;
        store
            .insert(&"n1".to_string(), vec![1.0, 0.0, 0.0, 0.0], meta("f()"))
            .await
            .unwrap();

        assert!(store.delete(&"n1".to_string()).await.unwrap());
        assert!(store.get(&"n1".to_string()).await.unwrap().is_none());
        assert!(store.label_of(&"n1".to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn labels_are_never_reused() {
        let (store, _dir) = open_store().await;
        let l1 = store
            .insert(&"n1".to_string(), vec![1.0, 0.0, 0.0, 0.0], meta("f()"))
            .await
            .unwrap();
        store.delete(&"n1".to_string()).await.unwrap();
        let l2 = store
            .insert(&"n2".to_string(), vec![0.0, 1.0, 0.0, 0.0], meta("g()"))
            .await
            .unwrap();
        assert_ne!(l1, l2);
    }

    #[tokio::test]
    async fn batch_insert_reports_partial_failures() {
        let (store, _dir) = open_store().await;
        store
            .insert(&"n1".to_string(), vec![1.0, 0.0, 0.0, 0.0], meta("f()"))
            .await
            .unwrap();

        let batch = vec![
            ("n1".to_string(), vec![0.0, 1.0, 0.0, 0.0], meta("dup()")), // collides
            ("n2".to_string(), vec![0.0, 0.0, 1.0, 0.0], meta("g()")),
        ];
        let result = store.insert_batch(batch).await.unwrap();
        assert_eq!(result.success_count, 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].node_id, "n1");
    }
}
