//! Stage 3 of the signature processor: weighted scoring.

use crate::parse::ParsedSignature;
use indexer_core::config::SignatureWeights;

/// Classic O(|a|·|b|) edit-distance DP matrix; insertion/deletion/substitution
/// all cost 1.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (n, m) = (a.len(), b.len());

    if n == 0 {
        return m;
    }
    if m == 0 {
        return n;
    }

    let mut row: Vec<usize> = (0..=m).collect();
    for i in 1..=n {
        let mut prev_diag = row[0];
        row[0] = i;
        for j in 1..=m {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            let temp = row[j];
            row[j] = (row[j] + 1).min(row[j - 1] + 1).min(prev_diag + cost);
            prev_diag = temp;
        }
    }
    row[m]
}

/// `1 - levenshtein(a, b) / max(len)`, case-insensitive. Two empty strings are
/// identical (similarity 1.0).
pub fn name_similarity(a: &str, b: &str) -> f32 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein(&a, &b) as f32 / max_len as f32)
}

/// Parameter-count proximity: both zero is a perfect match, exactly one zero
/// is a neutral half-match, otherwise proportional distance.
pub fn param_similarity(count_a: usize, count_b: usize) -> f32 {
    if count_a == 0 && count_b == 0 {
        return 1.0;
    }
    if count_a == 0 || count_b == 0 {
        return 0.5;
    }
    let max = count_a.max(count_b) as f32;
    1.0 - (count_a as isize - count_b as isize).unsigned_abs() as f32 / max
}

/// The identifier preceding the first `(` in a signature string; falls back
/// to the whole string when there's no `(`.
pub fn extract_candidate_name(signature: &str) -> String {
    match signature.find('(') {
        Some(idx) => signature[..idx].trim().to_string(),
        None => signature.trim().to_string(),
    }
}

/// Looks for a `": T"` or `"=> T"` tail after the parameter list, mirroring
/// `parse::extract_return_type` but operating on a raw stored signature.
pub fn extract_candidate_return_type(signature: &str) -> Option<String> {
    let close = signature.rfind(')')?;
    let tail = signature[close + 1..].trim();
    if let Some(rest) = tail.strip_prefix("=>") {
        let t = rest.trim();
        return (!t.is_empty()).then(|| t.to_string());
    }
    if let Some(rest) = tail.strip_prefix(':') {
        let t = rest.trim();
        return (!t.is_empty()).then(|| t.to_string());
    }
    None
}

pub struct ScoreBreakdown {
    pub name_sim: f32,
    pub param_sim: f32,
    pub return_sim: f32,
    pub total: f32,
}

/// `score = w_name·nameSim + w_param·paramSim + w_return·returnSim`. Absent
/// return type on either side is neutral (0.5).
pub fn score_candidate(query: &ParsedSignature, candidate_signature: &str, weights: &SignatureWeights) -> ScoreBreakdown {
    let candidate_name = extract_candidate_name(candidate_signature);
    let name_sim = name_similarity(&query.function_name, &candidate_name);

    let param_sim = param_similarity(query.parameters.len(), count_candidate_params(candidate_signature));

    let candidate_return = extract_candidate_return_type(candidate_signature);
    let return_sim = match (&query.return_type, &candidate_return) {
        (Some(a), Some(b)) => name_similarity(a, b),
        _ => 0.5,
    };

    let total = weights.name * name_sim + weights.param * param_sim + weights.return_type * return_sim;

    ScoreBreakdown {
        name_sim,
        param_sim,
        return_sim,
        total,
    }
}

fn count_candidate_params(signature: &str) -> usize {
    let Some(open) = signature.find('(') else { return 0 };
    let Some(close) = signature[open..].find(')').map(|i| i + open) else {
        return 0;
    };
    let inner = signature[open + 1..close].trim();
    if inner.is_empty() {
        0
    } else {
        inner.split(',').count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_signature;

    #[test]
    fn identical_strings_have_zero_distance() {
        assert_eq!(levenshtein("parse", "parse"), 0);
    }

    #[test]
    fn single_substitution_costs_one() {
        assert_eq!(levenshtein("parse", "parsa"), 1);
    }

    #[test]
    fn name_similarity_is_case_insensitive() {
        assert_eq!(name_similarity("Parse", "parse"), 1.0);
    }

    #[test]
    fn param_similarity_handles_both_zero_and_one_zero() {
        assert_eq!(param_similarity(0, 0), 1.0);
        assert_eq!(param_similarity(0, 2), 0.5);
    }

    #[test]
    fn exact_name_match_scores_higher_than_near_miss() {
        let query = parse_signature("parse(input: string)");
        let weights = SignatureWeights::default();
        let exact = score_candidate(&query, "parse(input: string): AST", &weights);
        let near = score_candidate(&query, "parser(input: string): AST", &weights);
        assert!(exact.total > near.total);
        assert_eq!(exact.name_sim, 1.0);
        assert!(near.name_sim < 1.0);
    }

    #[test]
    fn score_monotonic_in_name_sim_holding_others_fixed() {
        let weights = SignatureWeights::default();
        let query = parse_signature("foo(a: int): int");
        let exact = score_candidate(&query, "foo(a: int): int", &weights);
        let fuzzy = score_candidate(&query, "fop(a: int): int", &weights);
        assert!(exact.total >= fuzzy.total);
    }
}
