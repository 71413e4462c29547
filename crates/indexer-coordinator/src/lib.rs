//! Query Coordinator: the single entry point every query goes through.
//! Computes a fingerprint, probes the Multi-Level Cache with single-flight
//! coalescing, dispatches a miss by `queryType`, and enforces the query's
//! deadline.

pub mod embedder;
pub mod fingerprint;
pub mod query;

use embedder::Embedder;
use fingerprint::fingerprint;
use indexer_cache::{MultiLevelCache, QueryLogEntry};
use indexer_core::config::IndexerConfig;
use indexer_core::error::{IndexerError, Result};
use indexer_core::types::QueryType;
use indexer_db::VectorDatabase;
use indexer_signature::{SignatureProcessor, SignatureQuery};
use query::{passes_filters, Query, Response, ResultItem};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Inverse of the `{:?}` encoding `handle_query` writes into the query log's
/// `options` column.
fn parse_query_type(options: &str) -> Option<QueryType> {
    match options {
        "Semantic" => Some(QueryType::Semantic),
        "Contextual" => Some(QueryType::Contextual),
        "Signature" => Some(QueryType::Signature),
        "File" => Some(QueryType::File),
        _ => None,
    }
}

#[derive(Clone)]
pub struct QueryCoordinator {
    config: Arc<IndexerConfig>,
    database: Arc<VectorDatabase>,
    cache: Arc<MultiLevelCache>,
    embedder: Arc<dyn Embedder>,
}

impl QueryCoordinator {
    pub fn new(
        config: Arc<IndexerConfig>,
        database: Arc<VectorDatabase>,
        cache: Arc<MultiLevelCache>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self { config, database, cache, embedder }
    }

    /// Replays the top queries by historical frequency at startup so the
    /// first live queries after a restart still land warm. The cache only
    /// remembers which `(text, options)` pairs were hot; turning one back
    /// into work is the coordinator's job, since it is the only layer that
    /// knows how to build and dispatch a `Query`.
    pub async fn warm(&self, min_frequency: i64) -> Result<usize> {
        let candidates = self.cache.warm_candidates(min_frequency).await?;
        let mut warmed = 0;
        for candidate in candidates {
            let Some(query_type) = parse_query_type(&candidate.options) else {
                continue;
            };
            let mut query = Query::semantic(candidate.query_text);
            query.query_type = query_type;
            if self.handle_query(query).await.is_ok() {
                warmed += 1;
            }
        }
        Ok(warmed)
    }

    pub async fn handle_query(&self, query: Query) -> Result<Response> {
        let started = Instant::now();
        let max_results = query.max_results.clamp(1, query::MAX_MAX_RESULTS);
        let version = self.database.index_version();
        let key = fingerprint(&query, version);
        let ttl_ms = self.config.cache.l1.default_ttl_ms;

        let coordinator = self.clone();
        let query_for_compute = query.clone();
        let probe = self
            .cache
            .get_or_compute(key.clone(), ttl_ms, move || async move {
                let response = coordinator.dispatch_with_deadline(query_for_compute, max_results, version).await?;
                let bytes = bincode::serde::encode_to_vec(&response, bincode::config::standard())
                    .map_err(|e| IndexerError::storage(format!("failed to encode query response: {e}")))?;
                let file_paths = response.results.iter().map(|r| r.file_path.clone()).collect();
                Ok((bytes, file_paths, Some(version)))
            })
            .await?;

        let cache_hit = probe.hit_level.is_some();
        let (mut response, _): (Response, usize) =
            bincode::serde::decode_from_slice(&probe.entry.value, bincode::config::standard())
                .map_err(|e| IndexerError::storage(format!("failed to decode cached query response: {e}")))?;
        response.query_time_ms = started.elapsed().as_millis() as u32;

        if let Err(e) = self
            .cache
            .append_log(QueryLogEntry {
                query_text: query.text.clone(),
                query_hash: key,
                options: format!("{:?}", query.query_type),
                result_count: response.results.len() as u32,
                execution_time_ms: response.query_time_ms as u64,
                cache_hit,
                cache_level: probe.hit_level,
                index_version: version,
            })
            .await
        {
            warn!(error = %e, "failed to append query log entry");
        }

        Ok(response)
    }

    /// Races `dispatch` against the soft deadline; a completion past the soft
    /// deadline but before the hard timeout still succeeds, marked truncated.
    /// Only exceeding the hard timeout (an order of magnitude beyond soft)
    /// surfaces as `IndexerError::Timeout`.
    async fn dispatch_with_deadline(&self, query: Query, max_results: u32, version: u64) -> Result<Response> {
        let soft = Duration::from_millis(query.deadline_ms);
        let hard = soft * query::HARD_TIMEOUT_MULTIPLIER as u32;

        let started = Instant::now();
        let dispatch_fut = self.dispatch(query, max_results, version);
        match tokio::time::timeout(hard, dispatch_fut).await {
            Ok(result) => {
                let mut response = result?;
                if started.elapsed() > soft {
                    response.truncated = true;
                }
                Ok(response)
            }
            Err(_elapsed) => Err(IndexerError::Timeout(hard.as_millis() as u64)),
        }
    }

    async fn dispatch(&self, query: Query, max_results: u32, version: u64) -> Result<Response> {
        match query.query_type {
            QueryType::Semantic => self.dispatch_semantic(&query, max_results).await,
            QueryType::Contextual => self.dispatch_contextual(&query, max_results).await,
            QueryType::Signature => self.dispatch_signature(&query, max_results).await,
            QueryType::File => self.dispatch_file(&query, max_results, version).await,
        }
    }

    async fn dispatch_semantic(&self, query: &Query, max_results: u32) -> Result<Response> {
        let embedding = self.embedder.embed(&query.text).await?;
        let raw = self.database.search_similar(&embedding, max_results as usize, query.ef).await?;

        let results: Vec<ResultItem> = raw
            .into_iter()
            .filter(|r| r.score >= query.min_score)
            .map(|r| ResultItem {
                node_id: r.node_id,
                score: r.score,
                signature: r.metadata.signature,
                summary: r.metadata.summary,
                file_path: r.metadata.file_path,
                line_number: r.metadata.line_number,
                confidence: r.metadata.confidence,
                node_type: r.metadata.node_type,
            })
            .collect();

        Ok(Response {
            total_matches: results.len() as u32,
            results,
            query_time_ms: 0,
            strategy: "semantic".to_string(),
            truncated: false,
        })
    }

    /// Semantic search, then a post-filter over `nodeType` / `filePath` /
    /// `confidence` — the same collaborators as a plain semantic query, with
    /// a narrower lens.
    async fn dispatch_contextual(&self, query: &Query, max_results: u32) -> Result<Response> {
        let mut semantic = self.dispatch_semantic(query, max_results.saturating_mul(3)).await?;
        semantic.strategy = "contextual".to_string();

        if let Some(filters) = &query.filters {
            semantic.results.retain(|item| passes_filters(item, filters));
        }
        semantic.truncated = semantic.results.len() as u32 > max_results;
        semantic.results.truncate(max_results as usize);
        semantic.total_matches = semantic.results.len() as u32;
        Ok(semantic)
    }

    async fn dispatch_signature(&self, query: &Query, max_results: u32) -> Result<Response> {
        let processor = SignatureProcessor::new(self.database.store(), &self.config.signature);
        let matches = processor
            .search(&SignatureQuery {
                text: query.text.clone(),
                exact_match: query.exact_match,
                fuzzy_threshold: None,
                max_results,
            })
            .await?;

        let results: Vec<ResultItem> = matches
            .into_iter()
            .filter(|m| m.score >= query.min_score)
            .map(|m| ResultItem {
                node_id: m.node_id,
                score: m.score,
                signature: m.signature,
                summary: m.context_snippet,
                file_path: m.file_path,
                line_number: m.line_number,
                confidence: m.confidence,
                node_type: m.node_type,
            })
            .collect();

        Ok(Response {
            total_matches: results.len() as u32,
            results,
            query_time_ms: 0,
            strategy: "signature".to_string(),
            truncated: false,
        })
    }

    /// Direct Metadata Store lookup by `filePath` prefix — bypasses the HNSW
    /// graph entirely.
    async fn dispatch_file(&self, query: &Query, max_results: u32, version: u64) -> Result<Response> {
        let records = self.database.store().find_by_file_path_prefix(&query.text, max_results as i64).await?;

        let results: Vec<ResultItem> = records
            .into_iter()
            .map(|r| ResultItem {
                node_id: r.node_id,
                score: 1.0,
                signature: r.signature,
                summary: r.summary,
                file_path: r.file_path,
                line_number: r.line_number,
                confidence: r.confidence,
                node_type: r.node_type,
            })
            .collect();

        let _ = version; // file lookups aren't version-sensitive beyond the fingerprint itself
        Ok(Response {
            total_matches: results.len() as u32,
            results,
            query_time_ms: 0,
            strategy: "file".to_string(),
            truncated: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedder::DeterministicEmbedder;
    use indexer_core::config::{CacheConfig, L1Config, L2Config, L3Config};
    use indexer_storage::RecordMetadata;
    use tempfile::tempdir;

    async fn coordinator() -> (QueryCoordinator, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let mut config = IndexerConfig::default();
        config.dimensions = 8;
        config.storage_path = dir.path().join("meta.db");
        config.index_path = dir.path().join("index.hnsw");
        config.auto_save.enabled = false;
        config.cache = CacheConfig {
            l1: L1Config { max_entries: 1000, max_bytes: 1024 * 1024, default_ttl_ms: 60_000 },
            l2: L2Config { path: dir.path().join("l2"), max_bytes: 1024 * 1024, default_ttl_ms: 60_000 },
            l3: L3Config { path: dir.path().join("l3.db"), max_entries: 1000, default_ttl_ms: 60_000 },
            enable_promotion: true,
            enable_warming: true,
            warming_query_count: 50,
            invalidation_strategy: indexer_core::config::InvalidationStrategy::Conservative,
        };
        let config = Arc::new(config);

        let database = Arc::new(VectorDatabase::new(config.clone()).await.unwrap());
        let cache = Arc::new(MultiLevelCache::new(Arc::new(config.cache.clone())).await.unwrap());
        let embedder: Arc<dyn Embedder> = Arc::new(DeterministicEmbedder::new(8));

        (QueryCoordinator::new(config, database, cache, embedder), dir)
    }

    fn meta(sig: &str) -> RecordMetadata {
        RecordMetadata {
            signature: sig.to_string(),
            summary: "a helper".into(),
            file_id: "f1".into(),
            file_path: "src/lib.rs".into(),
            line_number: 3,
            confidence: 0.95,
            node_type: indexer_core::types::NodeType::Function,
        }
    }

    #[tokio::test]
    async fn semantic_query_finds_inserted_vector() {
        let (coordinator, _dir) = coordinator().await;
        let embedding = coordinator.embedder.embed("fn parse()").await.unwrap();
        coordinator
            .database
            .insert_vector("n1".to_string(), embedding, meta("parse()"))
            .await
            .unwrap();

        let response = coordinator.handle_query(Query::semantic("fn parse()")).await.unwrap();
        assert_eq!(response.strategy, "semantic");
        assert!(!response.results.is_empty());
        assert_eq!(response.results[0].node_id, "n1");
    }

    #[tokio::test]
    async fn repeated_query_hits_cache_on_second_call() {
        let (coordinator, _dir) = coordinator().await;
        let embedding = coordinator.embedder.embed("fn render()").await.unwrap();
        coordinator
            .database
            .insert_vector("n1".to_string(), embedding, meta("render()"))
            .await
            .unwrap();

        let first = coordinator.handle_query(Query::semantic("fn render()")).await.unwrap();
        let second = coordinator.handle_query(Query::semantic("fn render()")).await.unwrap();
        assert_eq!(first.results.len(), second.results.len());
    }

    #[tokio::test]
    async fn warm_replays_frequent_queries_from_the_log() {
        let (coordinator, _dir) = coordinator().await;
        let embedding = coordinator.embedder.embed("fn render()").await.unwrap();
        coordinator
            .database
            .insert_vector("n1".to_string(), embedding, meta("render()"))
            .await
            .unwrap();

        coordinator.handle_query(Query::semantic("fn render()")).await.unwrap();
        coordinator.handle_query(Query::semantic("fn render()")).await.unwrap();

        let warmed = coordinator.warm(1).await.unwrap();
        assert_eq!(warmed, 1);
    }

    #[tokio::test]
    async fn file_query_bypasses_embedding() {
        let (coordinator, _dir) = coordinator().await;
        coordinator
            .database
            .insert_vector("n1".to_string(), vec![0.0; 8], meta("parse()"))
            .await
            .unwrap();

        let mut query = Query::semantic("src/lib.rs");
        query.query_type = QueryType::File;
        let response = coordinator.handle_query(query).await.unwrap();
        assert_eq!(response.strategy, "file");
        assert_eq!(response.results.len(), 1);
    }

    #[tokio::test]
    async fn signature_query_matches_function_name() {
        let (coordinator, _dir) = coordinator().await;
        coordinator
            .database
            .insert_vector("n1".to_string(), vec![0.0; 8], meta("parse(input: string): AST"))
            .await
            .unwrap();

        let mut query = Query::semantic("parse(input: string)");
        query.query_type = QueryType::Signature;
        let response = coordinator.handle_query(query).await.unwrap();
        assert_eq!(response.strategy, "signature");
        assert_eq!(response.results.len(), 1);
    }
}
