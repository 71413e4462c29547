//! Embedding generation is an external collaborator: the engine never
//! computes embeddings itself, only consumes them through this trait.

use async_trait::async_trait;
use indexer_core::error::Result;
use indexer_core::types::Vector;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vector>;
}

/// A fixed-dimension embedder for tests and local experimentation: hashes the
/// input deterministically into the configured dimension rather than calling
/// out to a model. Never wired up by `serve` outside of tests.
pub struct DeterministicEmbedder {
    dimensions: usize,
}

impl DeterministicEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl Embedder for DeterministicEmbedder {
    async fn embed(&self, text: &str) -> Result<Vector> {
        let mut state: u64 = 0xcbf29ce484222325;
        for byte in text.bytes() {
            state ^= byte as u64;
            state = state.wrapping_mul(0x100000001b3);
        }

        let mut out = Vec::with_capacity(self.dimensions);
        for i in 0..self.dimensions {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407 + i as u64);
            let bucket = (state >> 40) as u32;
            out.push((bucket as f32 / u32::MAX as f32) * 2.0 - 1.0);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_text_embeds_identically() {
        let embedder = DeterministicEmbedder::new(8);
        let a = embedder.embed("fn parse()").await.unwrap();
        let b = embedder.embed("fn parse()").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
    }

    #[tokio::test]
    async fn different_text_embeds_differently() {
        let embedder = DeterministicEmbedder::new(8);
        let a = embedder.embed("fn parse()").await.unwrap();
        let b = embedder.embed("fn render()").await.unwrap();
        assert_ne!(a, b);
    }
}
