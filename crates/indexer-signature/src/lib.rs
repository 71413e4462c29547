//! Signature Query Processor: parses a free-form function-signature string,
//! retrieves candidates from the Metadata Store, and rescores them by
//! weighted name / parameter-count / return-type similarity.

pub mod parse;
pub mod score;

use chrono::{DateTime, Utc};
use indexer_core::config::SignatureConfig;
use indexer_core::error::Result;
use indexer_core::types::{NodeId, NodeType};
use indexer_storage::MetadataStore;
use parse::{parse_signature, ParsedSignature};
use score::score_candidate;
use tracing::debug;

const EXACT_OVERFETCH_MULTIPLIER: i64 = 3;
const FUZZY_OVERFETCH_MULTIPLIER: i64 = 5;
const EXACT_SCORE_FLOOR: f32 = 0.9;

#[derive(Debug, Clone)]
pub struct SignatureQuery {
    pub text: String,
    pub exact_match: bool,
    pub fuzzy_threshold: Option<f32>,
    pub max_results: u32,
}

#[derive(Debug, Clone)]
pub struct SignatureMatch {
    pub node_id: NodeId,
    pub score: f32,
    pub match_reason: &'static str,
    pub context_snippet: String,
    pub signature: String,
    pub file_path: String,
    pub line_number: u32,
    pub confidence: f32,
    pub last_updated: DateTime<Utc>,
    pub node_type: NodeType,
}

pub struct SignatureProcessor<'a> {
    store: &'a MetadataStore,
    config: &'a SignatureConfig,
}

impl<'a> SignatureProcessor<'a> {
    pub fn new(store: &'a MetadataStore, config: &'a SignatureConfig) -> Self {
        Self { store, config }
    }

    pub async fn search(&self, query: &SignatureQuery) -> Result<Vec<SignatureMatch>> {
        let parsed = parse_signature(&query.text);
        debug!(function_name = %parsed.function_name, param_count = parsed.parameters.len(), "parsed signature query");

        let multiplier = if query.exact_match { EXACT_OVERFETCH_MULTIPLIER } else { FUZZY_OVERFETCH_MULTIPLIER };
        let fetch_limit = (query.max_results as i64) * multiplier;

        let candidates = self
            .store
            .find_by_signature_fragment(&parsed.function_name, fetch_limit.max(1))
            .await?;

        let threshold = if query.exact_match {
            EXACT_SCORE_FLOOR
        } else {
            query.fuzzy_threshold.unwrap_or(self.config.fuzzy_threshold)
        };

        let mut scored: Vec<(f32, SignatureMatch)> = candidates
            .into_iter()
            .filter(|record| record.node_type.is_function_like())
            .filter_map(|record| self.score_one(&parsed, record, query.exact_match, threshold))
            .collect();

        // Descending score; ties broken by ascending `lastUpdated` (older wins,
        // so results stay deterministic for an unchanged corpus).
        scored.sort_by(|(score_a, match_a), (score_b, match_b)| {
            score_b
                .partial_cmp(score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| match_a.last_updated.cmp(&match_b.last_updated))
        });

        Ok(scored
            .into_iter()
            .take(query.max_results as usize)
            .map(|(_, m)| m)
            .collect())
    }

    fn score_one(
        &self,
        parsed: &ParsedSignature,
        record: indexer_storage::VectorRecord,
        exact_match: bool,
        threshold: f32,
    ) -> Option<(f32, SignatureMatch)> {
        let breakdown = score_candidate(parsed, &record.signature, &self.config.weights);

        if exact_match && breakdown.name_sim < 1.0 {
            return None;
        }
        if breakdown.total <= threshold {
            return None;
        }

        Some((
            breakdown.total,
            SignatureMatch {
                node_id: record.node_id,
                score: breakdown.total,
                match_reason: "signature_similarity",
                context_snippet: record.summary,
                signature: record.signature,
                file_path: record.file_path,
                line_number: record.line_number,
                confidence: record.confidence,
                last_updated: record.last_updated,
                node_type: record.node_type,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexer_core::types::NodeType;
    use indexer_storage::RecordMetadata;
    use tempfile::tempdir;

    async fn store_with(signatures: &[&str]) -> (MetadataStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = MetadataStore::open(&dir.path().join("m.db"), 4).await.unwrap();
        for (i, sig) in signatures.iter().enumerate() {
            store
                .insert(
                    &format!("n{i}"),
                    vec![0.0, 0.0, 0.0, 0.0],
                    RecordMetadata {
                        signature: sig.to_string(),
                        summary: format!("does thing {i}"),
                        file_id: "f".into(),
                        file_path: "src/lib.rs".into(),
                        line_number: i as u32,
                        confidence: 0.9,
                        node_type: NodeType::Function,
                    },
                )
                .await
                .unwrap();
        }
        (store, dir)
    }

    #[tokio::test]
    async fn exact_name_ranks_above_fuzzy_name() {
        let (store, _dir) = store_with(&["parse(input: string): AST", "parser(input: string): AST"]).await;
        let config = SignatureConfig::default();
        let processor = SignatureProcessor::new(&store, &config);

        let results = processor
            .search(&SignatureQuery {
                text: "parse(input: string)".into(),
                exact_match: false,
                fuzzy_threshold: Some(0.5),
                max_results: 10,
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results[0].score > results[1].score);
        assert_eq!(results[0].signature, "parse(input: string): AST");
    }

    #[tokio::test]
    async fn exact_match_excludes_non_exact_names() {
        let (store, _dir) = store_with(&["parse(input: string): AST", "parser(input: string): AST"]).await;
        let config = SignatureConfig::default();
        let processor = SignatureProcessor::new(&store, &config);

        let results = processor
            .search(&SignatureQuery {
                text: "parse(input: string)".into(),
                exact_match: true,
                fuzzy_threshold: None,
                max_results: 10,
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].signature, "parse(input: string): AST");
    }
}
