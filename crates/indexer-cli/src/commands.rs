//! Subcommand implementations. `main.rs` only parses arguments and dispatches
//! here, mirroring how the rest of the engine keeps wire/CLI concerns
//! separate from the logic they drive.

use crate::output::{self, OutputFormat};
use indexer_cache::MultiLevelCache;
use indexer_core::config::IndexerConfig;
use indexer_core::error::Result;
use indexer_core::types::{NodeType, QueryType};
use indexer_core::Context;
use indexer_coordinator::embedder::{DeterministicEmbedder, Embedder};
use indexer_coordinator::query::{Query, QueryFilters};
use indexer_coordinator::QueryCoordinator;
use indexer_db::VectorDatabase;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Builds the explicit dependency handle and wires the Store/HNSW/Cache
/// components behind it — the CLI binary is the one process-wide owner;
/// no module-level singletons.
async fn build_context(config_path: Option<&Path>) -> Result<(Context, Arc<VectorDatabase>, Arc<MultiLevelCache>)> {
    let ctx = Context::new(IndexerConfig::load(config_path)?);
    let database = Arc::new(VectorDatabase::new(ctx.config.clone()).await?);
    let cache = Arc::new(MultiLevelCache::new(Arc::new(ctx.config.cache.clone())).await?);
    Ok((ctx, database, cache))
}

/// `serve`: stands the full engine up — auto-save timer, invalidation
/// listener, and the query coordinator — and blocks until interrupted,
/// tearing everything back down on shutdown.
pub async fn serve(config_path: Option<&Path>) -> Result<()> {
    let (ctx, database, cache) = build_context(config_path).await?;
    database.initialize().await?;
    let _invalidation_listener = cache.spawn_invalidation_listener(database.subscribe());

    let embedder: Arc<dyn Embedder> = Arc::new(DeterministicEmbedder::new(ctx.config.dimensions));
    let coordinator = QueryCoordinator::new(ctx.config.clone(), database.clone(), cache.clone(), embedder);
    coordinator.warm(ctx.config.cache.warming_query_count as i64 / 10).await?;

    info!("indexer serving; press ctrl-c to stop");
    tokio::signal::ctrl_c().await.map_err(|e| indexer_core::error::IndexerError::storage(e.to_string()))?;

    info!("shutting down");
    database.shutdown().await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum QueryTypeArg {
    Semantic,
    Signature,
    File,
    Contextual,
}

impl From<QueryTypeArg> for QueryType {
    fn from(arg: QueryTypeArg) -> Self {
        match arg {
            QueryTypeArg::Semantic => QueryType::Semantic,
            QueryTypeArg::Signature => QueryType::Signature,
            QueryTypeArg::File => QueryType::File,
            QueryTypeArg::Contextual => QueryType::Contextual,
        }
    }
}

#[derive(Debug, Serialize)]
struct QueryReport {
    strategy: String,
    total_matches: u32,
    truncated: bool,
    query_time_ms: u32,
    results: Vec<QueryReportItem>,
}

#[derive(Debug, Serialize)]
struct QueryReportItem {
    node_id: String,
    score: f32,
    signature: String,
    file_path: String,
    line_number: u32,
}

/// `query`: runs a single request through the Query Coordinator and prints
/// the result, then tears the engine back down.
#[allow(clippy::too_many_arguments)]
pub async fn query(
    config_path: Option<&Path>,
    query_type: QueryTypeArg,
    text: String,
    max_results: u32,
    exact: bool,
    file_prefix: Option<String>,
    min_confidence: Option<f32>,
    format: OutputFormat,
) -> Result<()> {
    let (ctx, database, cache) = build_context(config_path).await?;
    let embedder: Arc<dyn Embedder> = Arc::new(DeterministicEmbedder::new(ctx.config.dimensions));
    let coordinator = QueryCoordinator::new(ctx.config.clone(), database.clone(), cache.clone(), embedder);

    let filters = if file_prefix.is_some() || min_confidence.is_some() {
        Some(QueryFilters {
            file_path_prefix: file_prefix,
            node_types: None::<Vec<NodeType>>,
            min_confidence,
        })
    } else {
        None
    };

    let query = Query {
        query_type: query_type.into(),
        text,
        max_results,
        min_score: 0.0,
        ef: None,
        exact_match: exact,
        filters,
        deadline_ms: ctx.config.performance.max_query_time_ms.max(100) * 5,
    };

    let response = coordinator.handle_query(query).await?;
    let report = QueryReport {
        strategy: response.strategy,
        total_matches: response.total_matches,
        truncated: response.truncated,
        query_time_ms: response.query_time_ms,
        results: response
            .results
            .into_iter()
            .map(|r| QueryReportItem {
                node_id: r.node_id,
                score: r.score,
                signature: r.signature,
                file_path: r.file_path,
                line_number: r.line_number,
            })
            .collect(),
    };

    output::emit(format, &report, |report| {
        output::kv("strategy", &report.strategy);
        output::kv("total matches", report.total_matches);
        output::kv("truncated", report.truncated);
        for item in &report.results {
            println!("  {:>6.3}  {}:{}  {}", item.score, item.file_path, item.line_number, item.signature);
        }
    });

    database.shutdown().await?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct VerifyReport {
    vector_count: u64,
    graph_point_count: usize,
    consistent: bool,
}

/// `verify`: opens the store, rebuilds the graph from it, and checks that the
/// two agree. Exits non-zero via `IndexerError::Integrity` on mismatch so CI
/// can gate on it.
pub async fn verify(config_path: Option<&Path>, format: OutputFormat) -> Result<()> {
    let (_ctx, database, _cache) = build_context(config_path).await?;
    let stats = database.get_stats().await?;
    let consistent = stats.vector_count as usize == stats.graph_point_count;

    let report = VerifyReport {
        vector_count: stats.vector_count,
        graph_point_count: stats.graph_point_count,
        consistent,
    };

    output::emit(format, &report, |report| {
        output::kv("vectors in store", report.vector_count);
        output::kv("points in graph", report.graph_point_count);
        if report.consistent {
            output::success("store and graph agree");
        } else {
            output::error("store and graph disagree");
        }
    });

    database.shutdown().await?;

    if !consistent {
        return Err(indexer_core::error::IndexerError::integrity(format!(
            "store has {} vectors but graph has {} points",
            stats.vector_count, stats.graph_point_count
        )));
    }
    Ok(())
}
