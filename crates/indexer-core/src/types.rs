//! Core value types shared across the retrieval engine.

use serde::{Deserialize, Serialize};

/// Opaque, stable identifier supplied by the parser/annotator for a source construct.
pub type NodeId = String;

/// Dense integer address of a vector inside the HNSW graph.
pub type Label = u64;

/// A fixed-dimension embedding.
pub type Vector = Vec<f32>;

/// Distance space an HNSW graph is built against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Space {
    Cosine,
    L2,
    InnerProduct,
}

impl Default for Space {
    fn default() -> Self {
        Self::Cosine
    }
}

impl Space {
    /// Raw ANN distance between two vectors in this space.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Cosine => cosine_distance(a, b),
            Self::L2 => l2_distance(a, b),
            Self::InnerProduct => -dot(a, b),
        }
    }

    /// Maps a raw distance to a `[0,1]` score; higher is more similar. The
    /// mapping must be monotonic in distance for every space.
    pub fn score(&self, distance: f32) -> f32 {
        match self {
            // Cosine distance lies in [0,2]; score = 1 - distance.
            Self::Cosine => (1.0 - distance).clamp(0.0, 1.0),
            // L2 distance is unbounded; squash with a reciprocal decay.
            Self::L2 => 1.0 / (1.0 + distance.max(0.0)),
            // Inner product distance is the negated dot product; larger dot -> smaller
            // (more negative) distance -> higher score via the same decay shape.
            Self::InnerProduct => 1.0 / (1.0 + distance.max(0.0)),
        }
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let denom = norm(a) * norm(b);
    if denom == 0.0 {
        return 1.0;
    }
    let cos = (dot(a, b) / denom).clamp(-1.0, 1.0);
    1.0 - cos
}

pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

pub fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// The syntactic category of an annotated node, as supplied by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Function,
    Method,
    Constructor,
    ArrowFunction,
    Class,
    Interface,
    Module,
    Variable,
    Other,
}

impl NodeType {
    /// Function-like kinds eligible for signature queries.
    pub fn is_function_like(&self) -> bool {
        matches!(
            self,
            Self::Function | Self::Method | Self::Constructor | Self::ArrowFunction
        )
    }
}

/// A query's requested retrieval strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Semantic,
    Signature,
    File,
    Contextual,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_distance_is_zero_for_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        assert!(cosine_distance(&v, &v).abs() < 1e-6);
    }

    #[test]
    fn cosine_distance_handles_zero_vector() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 0.0];
        assert_eq!(cosine_distance(&a, &b), 1.0);
    }

    #[test]
    fn score_is_monotonic_in_distance_for_every_space() {
        for space in [Space::Cosine, Space::L2, Space::InnerProduct] {
            let near = space.score(0.1);
            let far = space.score(1.0);
            assert!(near >= far, "space {:?} score should decrease with distance", space);
        }
    }
}
