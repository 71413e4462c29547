//! Vector Database: composes the Metadata Store and the HNSW Index behind a
//! single contract. Owns the bijection between label and record,
//! dirty-tracking, auto-save cadence, and rebuild-from-store.

pub mod events;

use chrono::{DateTime, Utc};
use events::{MutationEvent, MutationKind};
use indexer_core::config::IndexerConfig;
use indexer_core::error::{IndexerError, Result};
use indexer_core::types::{Label, NodeId, NodeType, Vector};
use indexer_hnsw::HnswIndex;
use indexer_storage::{MetadataStore, PartialMetadata, RecordMetadata};
use parking_lot::{Mutex as SyncMutex, RwLock as SyncRwLock};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

/// Depth of the rolling search-time window used for `average_search_time_ms`.
const SEARCH_TIME_WINDOW: usize = 256;

/// Orphan/duplicate density above which a rebuild is triggered opportunistically.
const REBUILD_ORPHAN_RATIO: f64 = 0.2;

/// How many writer mutations accumulate before the orphan-density check runs.
const REBUILD_CHECK_EVERY: u64 = 100;

#[derive(Debug, Clone)]
pub struct ResultMetadata {
    pub signature: String,
    pub summary: String,
    pub file_path: String,
    pub line_number: u32,
    pub confidence: f32,
    pub last_updated: DateTime<Utc>,
    pub node_type: NodeType,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub node_id: NodeId,
    pub score: f32,
    pub distance: f32,
    pub metadata: ResultMetadata,
}

#[derive(Debug, Clone, Default)]
pub struct DbStats {
    pub vector_count: u64,
    pub storage_size_bytes: u64,
    pub average_confidence: f32,
    pub last_build_time_ms: Option<u64>,
    pub average_search_time_ms: f64,
    pub graph_point_count: usize,
}

/// Composes the durable Store and the in-memory Index. Readers
/// (`search_similar`, `stats`) run concurrently; writers are serialized
/// against each other through `write_lock`.
pub struct VectorDatabase {
    config: Arc<IndexerConfig>,
    store: Arc<MetadataStore>,
    index: SyncRwLock<Arc<HnswIndex>>,
    write_lock: AsyncMutex<()>,
    dirty: Arc<AtomicBool>,
    index_version: AtomicU64,
    mutations_since_check: AtomicU64,
    search_times: SyncMutex<VecDeque<Duration>>,
    last_build_time: SyncMutex<Option<Duration>>,
    mutation_tx: broadcast::Sender<MutationEvent>,
    auto_save_handle: SyncMutex<Option<tokio::task::JoinHandle<()>>>,
    index_path: PathBuf,
}

impl VectorDatabase {
    /// Opens the store and (re)builds the graph if the store is non-empty,
    /// but does not yet start the auto-save timer — call `initialize` for that.
    pub async fn new(config: Arc<IndexerConfig>) -> Result<Self> {
        let store = MetadataStore::open(&config.storage_path, config.dimensions).await?;

        let index = HnswIndex::init(
            config.hnsw.max_elements,
            config.hnsw.m,
            config.hnsw.ef_construction,
            config.hnsw.ef_search,
            config.hnsw.space,
            config.dimensions,
        );

        let (mutation_tx, _rx) = broadcast::channel(1024);

        let db = Self {
            config: config.clone(),
            store: Arc::new(store),
            index: SyncRwLock::new(Arc::new(index)),
            write_lock: AsyncMutex::new(()),
            dirty: Arc::new(AtomicBool::new(false)),
            index_version: AtomicU64::new(0),
            mutations_since_check: AtomicU64::new(0),
            search_times: SyncMutex::new(VecDeque::with_capacity(SEARCH_TIME_WINDOW)),
            last_build_time: SyncMutex::new(None),
            mutation_tx,
            auto_save_handle: SyncMutex::new(None),
            index_path: config.index_path.clone(),
        };

        let stats = db.store.stats().await?;
        if stats.vector_count > 0 {
            db.rebuild().await?;
        }

        Ok(db)
    }

    /// Starts the auto-save timer, owned for as long as `self` lives in its `Arc`.
    /// Must be paired with `shutdown()` so the timer task is torn down cleanly.
    /// Callers hold the database behind an `Arc` precisely so this task can
    /// clone a handle back to it without borrowing.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        if !self.config.auto_save.enabled {
            return Ok(());
        }

        let db = Arc::clone(self);
        let interval = Duration::from_secs(self.config.auto_save.interval_seconds);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if !db.dirty.load(Ordering::SeqCst) {
                    continue;
                }
                let snapshot = db.current_index();
                match snapshot.save(&db.index_path).await {
                    Ok(()) => {
                        db.dirty.store(false, Ordering::SeqCst);
                        debug!("auto-save completed");
                    }
                    Err(e) => {
                        warn!(error = %e, "auto-save failed, will retry next tick");
                    }
                }
            }
        });

        *self.auto_save_handle.lock() = Some(handle);
        info!(interval_secs = self.config.auto_save.interval_seconds, "auto-save timer started");
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MutationEvent> {
        self.mutation_tx.subscribe()
    }

    /// Current index version, included in every `QueryFingerprint` so a
    /// mutation invalidates previously cached results.
    pub fn index_version(&self) -> u64 {
        self.index_version.load(Ordering::SeqCst)
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    fn current_index(&self) -> Arc<HnswIndex> {
        self.index.read().clone()
    }

    fn bump_version(&self) -> u64 {
        self.index_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn emit(&self, kind: MutationKind, node_id: Option<NodeId>, file_path: Option<String>, version: u64) {
        // A broadcast send fails only when there are no subscribers; that is
        // the expected state before any cache tier has wired itself up.
        let _ = self.mutation_tx.send(MutationEvent {
            kind,
            node_id,
            file_path,
            index_version: version,
        });
    }

    pub async fn insert_vector(
        &self,
        node_id: NodeId,
        vector: Vector,
        metadata: RecordMetadata,
    ) -> Result<Label> {
        let _guard = self.write_lock.lock().await;
        let file_path = metadata.file_path.clone();
        let label = self.store.insert(&node_id, vector.clone(), metadata).await?;
        self.current_index().add_point(vector, label)?;
        self.dirty.store(true, Ordering::SeqCst);
        let version = self.bump_version();
        self.emit(MutationKind::Insert, Some(node_id), Some(file_path), version);
        self.maybe_rebuild().await?;
        Ok(label)
    }

    pub async fn insert_vectors(
        &self,
        records: Vec<(NodeId, Vector, RecordMetadata)>,
    ) -> Result<indexer_storage::BatchResult> {
        let _guard = self.write_lock.lock().await;
        // The store commits each record atomically on its own; we mirror only the
        // ones it actually accepted into the graph, one at a time in submission order.
        let mut accepted = Vec::with_capacity(records.len());
        for (node_id, vector, metadata) in &records {
            accepted.push((node_id.clone(), vector.clone(), metadata.file_path.clone()));
        }

        let result = self.store.insert_batch(records).await?;
        let failed: std::collections::HashSet<NodeId> =
            result.failures.iter().map(|f| f.node_id.clone()).collect();

        let index = self.current_index();
        for (node_id, vector, file_path) in accepted {
            if failed.contains(&node_id) {
                continue;
            }
            if let Some(label) = self.store.label_of(&node_id).await? {
                index.add_point(vector, label)?;
                let version = self.bump_version();
                self.emit(MutationKind::Insert, Some(node_id), Some(file_path), version);
            }
        }

        if result.success_count > 0 {
            self.dirty.store(true, Ordering::SeqCst);
        }
        self.maybe_rebuild().await?;
        Ok(result)
    }

    pub async fn update_vector(&self, node_id: &NodeId, vector: Vector) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.store.update(node_id, vector.clone(), None::<PartialMetadata>).await?;
        let label = self
            .store
            .label_of(node_id)
            .await?
            .ok_or_else(|| IndexerError::integrity(format!("label vanished for {node_id} mid-update")))?;
        let file_path = self
            .store
            .get(node_id)
            .await?
            .map(|r| r.file_path)
            .unwrap_or_default();

        self.current_index().add_point(vector, label)?;
        self.dirty.store(true, Ordering::SeqCst);
        let version = self.bump_version();
        self.emit(MutationKind::Update, Some(node_id.clone()), Some(file_path), version);
        self.maybe_rebuild().await?;
        Ok(())
    }

    pub async fn delete_vector(&self, node_id: &NodeId) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let file_path = self.store.get(node_id).await?.map(|r| r.file_path);
        let deleted = self.store.delete(node_id).await?;
        if deleted {
            self.dirty.store(true, Ordering::SeqCst);
            let version = self.bump_version();
            self.emit(MutationKind::Delete, Some(node_id.clone()), file_path, version);
        }
        self.maybe_rebuild().await?;
        Ok(deleted)
    }

    /// Runs the index's k-NN search, converts raw labels back to records, and
    /// scores/sorts the results before returning them.
    pub async fn search_similar(&self, query: &[f32], k: usize, ef: Option<usize>) -> Result<Vec<SearchResult>> {
        let index = self.current_index();
        if let Some(ef) = ef {
            index.set_ef(ef);
        }

        let started = Instant::now();
        let knn = index.search_knn(query, k)?;

        let mut results = Vec::with_capacity(knn.labels.len());
        for (label, distance) in knn.labels.into_iter().zip(knn.distances.into_iter()) {
            let Some(node_id) = self.store.node_id_of(label).await? else {
                continue; // orphaned/tombstoned label
            };
            let Some(record) = self.store.get(&node_id).await? else {
                continue; // raced with a concurrent delete
            };

            results.push(SearchResult {
                node_id,
                score: self.config.hnsw.space.score(distance),
                distance,
                metadata: ResultMetadata {
                    signature: record.signature,
                    summary: record.summary,
                    file_path: record.file_path,
                    line_number: record.line_number,
                    confidence: record.confidence,
                    last_updated: record.last_updated,
                    node_type: record.node_type,
                },
            });
        }

        let elapsed = started.elapsed();
        self.record_search_time(elapsed);
        if elapsed > Duration::from_millis(self.config.performance.max_query_time_ms) {
            warn!(elapsed_ms = elapsed.as_millis() as u64, "search exceeded soft latency threshold");
        }

        Ok(results)
    }

    fn record_search_time(&self, elapsed: Duration) {
        let mut window = self.search_times.lock();
        if window.len() == SEARCH_TIME_WINDOW {
            window.pop_front();
        }
        window.push_back(elapsed);
    }

    /// Rebuilds the graph from the store by paging through every live label in
    /// ascending order. Observers are notified *before* the pointer swap so
    /// cached results are invalidated against the version that is about to
    /// become current.
    pub async fn rebuild(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.rebuild_locked().await
    }

    /// Rebuild body, assuming `write_lock` is already held by the caller.
    /// Never call this without holding the lock — `rebuild()` and
    /// `maybe_rebuild()` are the only two call sites, and the latter is always
    /// invoked from inside another writer's guard.
    async fn rebuild_locked(&self) -> Result<()> {
        let started = Instant::now();

        let stats = self.store.stats().await?;
        let max_elements = (stats.vector_count as usize).max(self.config.hnsw.max_elements);

        let fresh = HnswIndex::init(
            max_elements,
            self.config.hnsw.m,
            self.config.hnsw.ef_construction,
            self.config.hnsw.ef_search,
            self.config.hnsw.space,
            self.config.dimensions,
        );

        let mut cursor: Option<Label> = None;
        const PAGE: i64 = 1000;
        loop {
            let page = self.store.all_node_ids_page(cursor, PAGE).await?;
            if page.is_empty() {
                break;
            }
            for (label, node_id) in &page {
                if let Some(record) = self.store.get(node_id).await? {
                    fresh.add_point(record.vector, *label)?;
                }
            }
            cursor = page.last().map(|(label, _)| *label);
            if (page.len() as i64) < PAGE {
                break;
            }
        }

        let version = self.bump_version();
        self.emit(MutationKind::Rebuild, None, None, version);

        *self.index.write() = Arc::new(fresh);
        self.mutations_since_check.store(0, Ordering::SeqCst);

        let elapsed = started.elapsed();
        *self.last_build_time.lock() = Some(elapsed);
        self.dirty.store(true, Ordering::SeqCst);
        info!(elapsed_ms = elapsed.as_millis() as u64, count = stats.vector_count, "graph rebuilt");
        Ok(())
    }

    /// Opportunistic rebuild trigger: checked every `REBUILD_CHECK_EVERY`
    /// writer mutations, fired when the orphan/duplicate density in the live
    /// graph exceeds `REBUILD_ORPHAN_RATIO`.
    async fn maybe_rebuild(&self) -> Result<()> {
        let count = self.mutations_since_check.fetch_add(1, Ordering::SeqCst) + 1;
        if count < REBUILD_CHECK_EVERY {
            return Ok(());
        }
        self.mutations_since_check.store(0, Ordering::SeqCst);

        let graph_points = self.current_index().current_count() as f64;
        let live = self.store.stats().await?.vector_count as f64;
        if graph_points <= 0.0 {
            return Ok(());
        }
        let orphan_ratio = ((graph_points - live).max(0.0)) / graph_points;
        if orphan_ratio > REBUILD_ORPHAN_RATIO {
            debug!(orphan_ratio, "orphan density threshold crossed, triggering rebuild");
            self.rebuild_locked().await?;
        }
        Ok(())
    }

    pub async fn get_stats(&self) -> Result<DbStats> {
        let store_stats = self.store.stats().await?;
        let window = self.search_times.lock();
        let avg_ms = if window.is_empty() {
            0.0
        } else {
            window.iter().map(|d| d.as_secs_f64() * 1000.0).sum::<f64>() / window.len() as f64
        };
        Ok(DbStats {
            vector_count: store_stats.vector_count,
            storage_size_bytes: store_stats.storage_size_bytes,
            average_confidence: store_stats.average_confidence,
            last_build_time_ms: (*self.last_build_time.lock()).map(|d| d.as_millis() as u64),
            average_search_time_ms: avg_ms,
            graph_point_count: self.current_index().current_count(),
        })
    }

    /// Flushes a pending save and aborts the auto-save timer. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(handle) = self.auto_save_handle.lock().take() {
            handle.abort();
        }
        if self.dirty.load(Ordering::SeqCst) {
            self.current_index().save(&self.index_path).await?;
            self.dirty.store(false, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    async fn open_db() -> (VectorDatabase, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = IndexerConfig::default();
        config.dimensions = 4;
        config.storage_path = dir.path().join("meta.db");
        config.index_path = dir.path().join("index.hnsw");
        config.auto_save.enabled = false;
        let db = VectorDatabase::new(Arc::new(config)).await.unwrap();
        (db, dir)
    }

    #[tokio::test]
    async fn insert_and_search_finds_the_vector() {
        let (db, _dir) = open_db().await;
        db.insert_vector("n1".to_string(), vec![1.0, 0.0, 0.0, 0.0], meta("f()"))
            .await
            .unwrap();

        let results = db.search_similar(&[1.0, 0.0, 0.0, 0.0], 5, None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].node_id, "n1");
        assert_eq!(results[0].metadata.signature, "f()");
        assert_eq!(results[0].metadata.node_type, NodeType::Function);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let (db, _dir) = open_db().await;
        let err = db
            .insert_vector("n1".to_string(), vec![1.0, 0.0], meta("f()"))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn delete_removes_vector_from_search() {
        let (db, _dir) = open_db().await;
        db.insert_vector("n1".to_string(), vec![1.0, 0.0, 0.0, 0.0], meta("f()"))
            .await
            .unwrap();
        db.insert_vector("n2".to_string(), vec![0.0, 1.0, 0.0, 0.0], meta("g()"))
            .await
            .unwrap();

        assert!(db.delete_vector(&"n1".to_string()).await.unwrap());

        let results = db.search_similar(&[1.0, 0.0, 0.0, 0.0], 5, None).await.unwrap();
        assert!(results.iter().all(|r| r.node_id != "n1"));
    }

    #[tokio::test]
    async fn mutations_bump_index_version() {
        let (db, _dir) = open_db().await;
        let before = db.index_version();
        db.insert_vector("n1".to_string(), vec![1.0, 0.0, 0.0, 0.0], meta("f()"))
            .await
            .unwrap();
        assert!(db.index_version() > before);
    }

    #[tokio::test]
    async fn rebuild_reconstructs_graph_from_store() {
        let (db, _dir) = open_db().await;
        db.insert_vector("n1".to_string(), vec![1.0, 0.0, 0.0, 0.0], meta("f()"))
            .await
            .unwrap();
        db.insert_vector("n2".to_string(), vec![0.0, 1.0, 0.0, 0.0], meta("g()"))
            .await
            .unwrap();

        db.rebuild().await.unwrap();

        let stats = db.get_stats().await.unwrap();
        assert_eq!(stats.vector_count, 2);
        assert_eq!(stats.graph_point_count, 2);
    }
}
