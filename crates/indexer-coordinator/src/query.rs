//! Wire-level `Query`/`Response` records.

use indexer_core::types::{NodeId, NodeType, QueryType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryFilters {
    pub file_path_prefix: Option<String>,
    pub node_types: Option<Vec<NodeType>>,
    pub min_confidence: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct Query {
    pub query_type: QueryType,
    pub text: String,
    pub max_results: u32,
    pub min_score: f32,
    pub ef: Option<usize>,
    pub exact_match: bool,
    pub filters: Option<QueryFilters>,
    pub deadline_ms: u64,
}

impl Query {
    pub fn semantic(text: impl Into<String>) -> Self {
        Self {
            query_type: QueryType::Semantic,
            text: text.into(),
            max_results: DEFAULT_MAX_RESULTS,
            min_score: 0.0,
            ef: None,
            exact_match: false,
            filters: None,
            deadline_ms: DEFAULT_DEADLINE_MS,
        }
    }
}

pub const DEFAULT_MAX_RESULTS: u32 = 10;
pub const MAX_MAX_RESULTS: u32 = 100;
pub const DEFAULT_DEADLINE_MS: u64 = 500;
/// Hard timeout is an order of magnitude beyond the soft deadline.
pub const HARD_TIMEOUT_MULTIPLIER: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultItem {
    pub node_id: NodeId,
    pub score: f32,
    pub signature: String,
    pub summary: String,
    pub file_path: String,
    pub line_number: u32,
    pub confidence: f32,
    pub node_type: NodeType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub results: Vec<ResultItem>,
    pub total_matches: u32,
    pub query_time_ms: u32,
    pub strategy: String,
    pub truncated: bool,
}

impl Response {
    pub fn empty(strategy: impl Into<String>) -> Self {
        Self {
            results: Vec::new(),
            total_matches: 0,
            query_time_ms: 0,
            strategy: strategy.into(),
            truncated: false,
        }
    }
}

pub fn passes_filters(item: &ResultItem, filters: &QueryFilters) -> bool {
    if let Some(prefix) = &filters.file_path_prefix {
        if !item.file_path.starts_with(prefix.as_str()) {
            return false;
        }
    }
    if let Some(node_types) = &filters.node_types {
        if !node_types.contains(&item.node_type) {
            return false;
        }
    }
    if let Some(min_confidence) = filters.min_confidence {
        if item.confidence < min_confidence {
            return false;
        }
    }
    true
}
