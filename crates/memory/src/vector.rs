//! Vector similarity utilities.
//!
//! Pure-Rust cosine similarity plus a ranking helper that sorts record ids by
//! similarity to a query vector. Both are embedding-agnostic.

use colony_core::RecordId;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length, empty, or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Scale a vector to unit length in place. Zero vectors are left as is.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    if norm < 1e-10 {
        return;
    }
    for x in v.iter_mut() {
        *x = (*x as f64 / norm) as f32;
    }
}

/// Rank every embedded record by cosine similarity to `query`, descending.
///
/// Ties are broken by record id so the order is stable across calls.
pub fn rank_by_similarity(
    embeddings: &HashMap<RecordId, Vec<f32>>,
    query: &[f32],
) -> Vec<(RecordId, f32)> {
    let mut scored: Vec<(RecordId, f32)> = embeddings
        .iter()
        .map(|(id, emb)| (id.clone(), cosine_similarity(emb, query)))
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_and_opposite() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs_are_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn normalize_produces_unit_length() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn ranking_is_descending_with_stable_ties() {
        let mut embeddings = HashMap::new();
        embeddings.insert(RecordId::from("orthogonal"), vec![0.0, 1.0, 0.0]);
        embeddings.insert(RecordId::from("same"), vec![1.0, 0.0, 0.0]);
        embeddings.insert(RecordId::from("partial"), vec![0.5, 0.5, 0.0]);
        embeddings.insert(RecordId::from("also-same"), vec![2.0, 0.0, 0.0]);

        let ranked = rank_by_similarity(&embeddings, &[1.0, 0.0, 0.0]);
        let ids: Vec<&str> = ranked.iter().map(|(id, _)| id.0.as_str()).collect();
        assert_eq!(ids, vec!["also-same", "same", "partial", "orthogonal"]);
    }
}
