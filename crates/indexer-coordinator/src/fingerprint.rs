//! `QueryFingerprint = hash(normalize(text) | type | serialize(options) | indexVersion)`.
//! A mutation bumps `indexVersion`, which changes every fingerprint computed
//! afterward — the cache never needs to reason about staleness itself.

use crate::query::Query;

/// Lowercases and collapses whitespace so `"Parse(x)"` and `"parse(x)  "`
/// hash identically.
fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

pub fn fingerprint(query: &Query, index_version: u64) -> String {
    let normalized = normalize(&query.text);
    let mut state: u64 = 0xcbf29ce484222325;
    let mut fold = |bytes: &[u8]| {
        for &b in bytes {
            state ^= b as u64;
            state = state.wrapping_mul(0x100000001b3);
        }
    };

    fold(normalized.as_bytes());
    fold(&[0xff]);
    fold(format!("{:?}", query.query_type).as_bytes());
    fold(&[0xff]);
    fold(query.max_results.to_le_bytes().as_slice());
    fold(query.min_score.to_le_bytes().as_slice());
    fold(&[query.exact_match as u8]);
    fold(query.ef.unwrap_or(0).to_le_bytes().as_slice());
    if let Some(filters) = &query.filters {
        if let Some(prefix) = &filters.file_path_prefix {
            fold(prefix.as_bytes());
        }
        if let Some(node_types) = &filters.node_types {
            for nt in node_types {
                fold(format!("{:?}", nt).as_bytes());
            }
        }
        if let Some(min_confidence) = filters.min_confidence {
            fold(min_confidence.to_le_bytes().as_slice());
        }
    }
    fold(&[0xff]);
    fold(index_version.to_le_bytes().as_slice());

    format!("{state:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Query;

    #[test]
    fn same_query_and_version_fingerprints_identically() {
        let a = Query::semantic("parse(input)");
        let b = Query::semantic("  PARSE(input)  ");
        assert_eq!(fingerprint(&a, 1), fingerprint(&b, 1));
    }

    #[test]
    fn version_bump_changes_fingerprint() {
        let q = Query::semantic("parse(input)");
        assert_ne!(fingerprint(&q, 1), fingerprint(&q, 2));
    }

    #[test]
    fn different_text_changes_fingerprint() {
        let a = Query::semantic("parse(input)");
        let b = Query::semantic("render(input)");
        assert_ne!(fingerprint(&a, 1), fingerprint(&b, 1));
    }
}
