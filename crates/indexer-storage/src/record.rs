//! `VectorRecord` — the unit of persistence.

use chrono::{DateTime, Utc};
use indexer_core::types::{Label, NodeId, NodeType, Vector};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub node_id: NodeId,
    pub label: Label,
    pub vector: Vector,
    pub signature: String,
    pub summary: String,
    pub file_id: String,
    pub file_path: String,
    pub line_number: u32,
    pub confidence: f32,
    pub last_updated: DateTime<Utc>,
    pub vector_hash: String,
    pub node_type: NodeType,
}

/// Fields accepted on `insert`/`update`; everything else is derived or immutable.
#[derive(Debug, Clone)]
pub struct RecordMetadata {
    pub signature: String,
    pub summary: String,
    pub file_id: String,
    pub file_path: String,
    pub line_number: u32,
    pub confidence: f32,
    pub node_type: NodeType,
}

/// Partial update for `update(nodeId, vector, partialMetadata?)`; `None` leaves the
/// field unchanged.
#[derive(Debug, Clone, Default)]
pub struct PartialMetadata {
    pub signature: Option<String>,
    pub summary: Option<String>,
    pub confidence: Option<f32>,
}

/// Cheap content fingerprint for dedup hints: sum of squares of the vector's
/// bytes reduced modulo a large prime, base-36 encoded. Determinism and a low
/// collision rate are the only requirements — not cryptographic strength.
pub fn vector_hash(vector: &[f32]) -> String {
    const PRIME: u64 = 4_294_967_311; // first prime above u32::MAX
    let mut acc: u64 = 0;
    for &component in vector {
        let bits = component.to_bits() as u64;
        acc = acc.wrapping_add(bits.wrapping_mul(bits)) % PRIME;
    }
    to_base36(acc)
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap()
}

pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

pub fn decode_vector(bytes: &[u8]) -> Vector {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub vector_count: u64,
    pub storage_size_bytes: u64,
    pub average_confidence: f32,
    pub oldest_vector: Option<DateTime<Utc>>,
    pub newest_vector: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BatchResult {
    pub success_count: usize,
    pub failures: Vec<BatchFailure>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchFailure {
    pub node_id: NodeId,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_hash_is_deterministic() {
        let v = vec![1.0, 2.0, 3.0];
        assert_eq!(vector_hash(&v), vector_hash(&v));
    }

    #[test]
    fn vector_hash_differs_for_different_vectors() {
        assert_ne!(vector_hash(&[1.0, 2.0]), vector_hash(&[2.0, 1.0]));
    }

    #[test]
    fn vector_encoding_roundtrips() {
        let v = vec![1.5, -2.25, 0.0, 3.75];
        let encoded = encode_vector(&v);
        assert_eq!(encoded.len(), v.len() * 4);
        assert_eq!(decode_vector(&encoded), v);
    }
}
