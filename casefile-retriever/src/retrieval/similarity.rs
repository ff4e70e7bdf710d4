//! Cosine similarity over stored embeddings.

use crate::storage::{Result, StoreError};
use rayon::prelude::*;

/// Cosine similarity of two equal-length vectors.
///
/// Returns `0.0` when either vector has zero norm. Callers are responsible for
/// checking lengths; see [`score_candidates`].
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot_product = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b) {
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let norm_a = norm_a.sqrt();
    let norm_b = norm_b.sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

/// Score each `(id, embedding)` candidate against `query` in parallel.
///
/// Output order matches input order. If several candidates have the wrong
/// dimension, the error names the first one in input order.
pub fn score_candidates<'a, I>(query: &[f32], candidates: I) -> Result<Vec<f32>>
where
    I: IndexedParallelIterator<Item = (&'a str, &'a [f32])>,
{
    let scored: Vec<Result<f32>> = candidates
        .map(|(chunk_id, embedding)| {
            if embedding.len() != query.len() {
                return Err(StoreError::DimensionMismatch {
                    chunk_id: chunk_id.to_string(),
                    expected: query.len(),
                    found: embedding.len(),
                });
            }
            Ok(cosine_similarity(query, embedding))
        })
        .collect();

    scored.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        // Identical vectors
        assert!((cosine_similarity(&[1.0, 0.0, 0.0], &[1.0, 0.0, 0.0]) - 1.0).abs() < 1e-6);

        // Orthogonal vectors
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);

        // Opposite vectors
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);

        // Scale invariance
        let similarity = cosine_similarity(&[0.6, 0.8], &[0.8, 0.6]);
        assert!((similarity - 0.96).abs() < 1e-5);
        assert!((cosine_similarity(&[3.0, 4.0], &[0.8, 0.6]) - similarity).abs() < 1e-5);

        // Zero vectors
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 1.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_score_candidates_preserves_order() {
        let ids: Vec<String> = (0..200).map(|i| format!("c{i}")).collect();
        let embeddings: Vec<Vec<f32>> = (0..200).map(|i| vec![1.0, i as f32]).collect();

        let scores = score_candidates(
            &[1.0, 0.0],
            ids.par_iter()
                .map(String::as_str)
                .zip(embeddings.par_iter().map(Vec::as_slice)),
        )
        .unwrap();

        assert_eq!(scores.len(), 200);
        assert!((scores[0] - 1.0).abs() < 1e-6);
        // angle grows with i, so scores strictly decrease
        assert!(scores.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_score_candidates_reports_first_mismatch() {
        let ids = ["a", "b", "c", "d"];
        let embeddings: Vec<Vec<f32>> = vec![vec![1.0, 0.0], vec![1.0], vec![1.0, 0.0], vec![1.0, 2.0, 3.0]];

        let err = score_candidates(
            &[1.0, 0.0],
            ids.par_iter()
                .copied()
                .zip(embeddings.par_iter().map(Vec::as_slice)),
        )
        .unwrap_err();

        match err {
            StoreError::DimensionMismatch {
                chunk_id,
                expected,
                found,
            } => {
                assert_eq!(chunk_id, "b");
                assert_eq!(expected, 2);
                assert_eq!(found, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
