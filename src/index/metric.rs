//! Scoring kernels for the supported metrics.
//!
//! Every kernel produces the reported score, where larger means closer,
//! so one top-k routine serves all metrics and equal reported scores are
//! exactly the ties broken by id:
//!
//! | Metric      | Stored row          | Score          |
//! |-------------|---------------------|----------------|
//! | Cosine      | unit-normalized     | dot(q̂, r̂)      |
//! | DotProduct  | raw                 | dot(q, r)      |
//! | Euclidean   | raw                 | −‖q − r‖       |
//!
//! Kernels accumulate in f64 and round once to f32, so embeddings whose
//! squared norm exceeds f32 range still normalize and rank correctly.
//! Only a dot product whose value itself lies outside f32 range saturates
//! to ±∞.

use crate::config::Metric;

/// Inner product of two equal-length slices.
///
/// Accumulates in f64: any finite f32 product fits, so large embeddings
/// never overflow into infinite keys.
#[inline]
pub(crate) fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| f64::from(x) * f64::from(y))
        .sum()
}

/// Squared Euclidean distance of two equal-length slices, in f64.
#[inline]
pub(crate) fn squared_l2(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = f64::from(x) - f64::from(y);
            d * d
        })
        .sum()
}

/// Euclidean norm, in f64.
#[inline]
pub(crate) fn norm(v: &[f32]) -> f64 {
    dot(v, v).sqrt()
}

/// Returns `v / ‖v‖`, or `None` for a zero vector.
pub(crate) fn normalized(v: &[f32]) -> Option<Vec<f32>> {
    let n = norm(v);
    if n == 0.0 || !n.is_finite() {
        return None;
    }
    Some(v.iter().map(|&x| (f64::from(x) / n) as f32).collect())
}

/// Converts a stored embedding into the row layout the metric scores.
///
/// Zero vectors under cosine stay zero and score 0 against everything.
pub(crate) fn prepare_row(metric: Metric, embedding: &[f32]) -> Vec<f32> {
    if metric.normalizes() {
        normalized(embedding).unwrap_or_else(|| vec![0.0; embedding.len()])
    } else {
        embedding.to_vec()
    }
}

/// Score of a prepared row against a prepared query.
#[inline]
pub(crate) fn rank_key(metric: Metric, query: &[f32], row: &[f32]) -> f32 {
    let score = match metric {
        Metric::Cosine | Metric::DotProduct => dot(query, row),
        Metric::Euclidean => -squared_l2(query, row).sqrt(),
    };
    // Fold -0.0 into 0.0 so equal scores compare equal under total_cmp
    score as f32 + 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_unit_length() {
        let v = normalized(&[3.0, 4.0]).unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert!(normalized(&[0.0, 0.0]).is_none());
    }

    #[test]
    fn test_cosine_keys() {
        let q = prepare_row(Metric::Cosine, &[1.0, 0.0]);
        let c = prepare_row(Metric::Cosine, &[0.9, 0.1]);
        let b = prepare_row(Metric::Cosine, &[0.0, 1.0]);
        let kc = rank_key(Metric::Cosine, &q, &c);
        let kb = rank_key(Metric::Cosine, &q, &b);
        assert!((kc - 0.9939).abs() < 1e-3);
        assert_eq!(kb, 0.0);
        assert!(kc > kb);
    }

    #[test]
    fn test_euclidean_score_is_negated_distance() {
        assert_eq!(rank_key(Metric::Euclidean, &[0.0, 0.0], &[3.0, 4.0]), -5.0);
        let same = rank_key(Metric::Euclidean, &[1.5, 2.0], &[1.5, 2.0]);
        assert_eq!(same.to_bits(), 0.0f32.to_bits());
    }

    #[test]
    fn test_dot_is_unnormalized() {
        let row = prepare_row(Metric::DotProduct, &[2.0, 0.0]);
        assert_eq!(rank_key(Metric::DotProduct, &[3.0, 1.0], &row), 6.0);
    }

    #[test]
    fn test_large_embeddings_do_not_overflow() {
        // |x|² is far beyond f32::MAX
        let row = prepare_row(Metric::Cosine, &[1e20, 0.0]);
        assert_eq!(row, vec![1.0, 0.0]);
        let q = normalized(&[1e20, 0.0]).unwrap();
        assert_eq!(rank_key(Metric::Cosine, &q, &row), 1.0);

        let near = rank_key(Metric::Euclidean, &[0.0, 0.0], &[1e20, 0.0]);
        let far = rank_key(Metric::Euclidean, &[0.0, 0.0], &[2e20, 0.0]);
        assert!(near.is_finite() && far.is_finite());
        assert!(near > far);
        assert_eq!(near, -1e20);

        let wide = rank_key(Metric::DotProduct, &[1e20, 1e20], &[1e10, 0.0]);
        assert_eq!(wide, 1e30);
    }

    #[test]
    fn test_zero_row_under_cosine() {
        let row = prepare_row(Metric::Cosine, &[0.0, 0.0]);
        assert_eq!(row, vec![0.0, 0.0]);
        assert_eq!(rank_key(Metric::Cosine, &[1.0, 0.0], &row), 0.0);
    }
}
