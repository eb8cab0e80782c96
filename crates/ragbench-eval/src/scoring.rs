use ragbench_core::constants::DEFAULT_TOP_K;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

const PRECISION_WEIGHT: f64 = 0.35;
const RECALL_WEIGHT: f64 = 0.30;
const F1_WEIGHT: f64 = 0.20;
const NDCG_WEIGHT: f64 = 0.05;
const SPEED_WEIGHT: f64 = 0.10;

/// Latency bands: (upper bound in ms, score).
const SPEED_BANDS: [(f64, f64); 4] = [(50.0, 100.0), (150.0, 90.0), (300.0, 75.0), (500.0, 50.0)];
const SPEED_FLOOR_MS: f64 = 5000.0;

/// Every per-case metric produced for one ranked result list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub ndcg: f64,
    pub speed_score: f64,
    pub overall_score: f64,
    pub true_positives: u32,
    pub false_positives: u32,
    pub false_negatives: u32,
    pub returned_count: usize,
    pub expected_count: usize,
    pub response_time_ms: f64,
}

/// Drop repeated ids, keeping the first (best-ranked) occurrence.
pub fn distinct_ranked(returned: &[i64]) -> Vec<i64> {
    let mut seen = HashSet::with_capacity(returned.len());
    returned.iter().copied().filter(|id| seen.insert(*id)).collect()
}

pub fn precision(returned: &[i64], expected: &BTreeSet<i64>) -> f64 {
    let returned = distinct_ranked(returned);
    if returned.is_empty() {
        return 0.0;
    }
    let hits = returned.iter().filter(|id| expected.contains(id)).count();
    hits as f64 / returned.len() as f64
}

pub fn recall(returned: &[i64], expected: &BTreeSet<i64>) -> f64 {
    if expected.is_empty() {
        return 0.0;
    }
    let hits = distinct_ranked(returned)
        .iter()
        .filter(|id| expected.contains(id))
        .count();
    hits as f64 / expected.len() as f64
}

/// Harmonic mean of precision and recall.
pub fn f1_score(precision: f64, recall: f64) -> f64 {
    if precision + recall <= 0.0 {
        return 0.0;
    }
    2.0 * precision * recall / (precision + recall)
}

/// Binary-relevance NDCG over the first `top_k` returned ids.
pub fn ndcg_at_k(returned: &[i64], expected: &BTreeSet<i64>, top_k: usize) -> f64 {
    let returned = distinct_ranked(returned);
    if returned.is_empty() || expected.is_empty() || top_k == 0 {
        return 0.0;
    }

    let dcg: f64 = returned
        .iter()
        .take(top_k)
        .enumerate()
        .filter(|(_, id)| expected.contains(id))
        .map(|(idx, _)| discount(idx))
        .sum();

    let idcg: f64 = (0..expected.len().min(top_k)).map(discount).sum();
    if idcg <= f64::EPSILON {
        0.0
    } else {
        (dcg / idcg).min(1.0)
    }
}

/// `1 / log2(rank + 1)` for a 0-based position.
fn discount(idx: usize) -> f64 {
    1.0 / (idx as f64 + 2.0).log2()
}

/// Latency score in `[0, 100]`; non-increasing in `response_time_ms`.
pub fn speed_score(response_time_ms: f64) -> f64 {
    if !response_time_ms.is_finite() {
        return 0.0;
    }
    let ms = response_time_ms.max(0.0);
    for (limit, score) in SPEED_BANDS {
        if ms <= limit {
            return score;
        }
    }
    let (last_limit, last_score) = SPEED_BANDS[SPEED_BANDS.len() - 1];
    let remaining = 1.0 - (ms - last_limit) / (SPEED_FLOOR_MS - last_limit);
    (last_score * remaining).clamp(0.0, last_score)
}

/// Weighted composite in `[0, 100]`, rounded to two decimals.
pub fn overall_score(precision: f64, recall: f64, f1: f64, ndcg: f64, speed: f64) -> f64 {
    let raw = PRECISION_WEIGHT * unit(precision) * 100.0
        + RECALL_WEIGHT * unit(recall) * 100.0
        + F1_WEIGHT * unit(f1) * 100.0
        + NDCG_WEIGHT * unit(ndcg) * 100.0
        + SPEED_WEIGHT * finite_or_zero(speed).clamp(0.0, 100.0);
    round2(raw)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn unit(value: f64) -> f64 {
    finite_or_zero(value).clamp(0.0, 1.0)
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

/// Single entry point the runner uses to score a case.
pub fn calculate_all_metrics(
    returned: &[i64],
    expected: &BTreeSet<i64>,
    response_time_ms: f64,
    top_k: Option<usize>,
) -> Metrics {
    let top_k = top_k.unwrap_or(DEFAULT_TOP_K);
    let distinct = distinct_ranked(returned);
    let true_positives = distinct.iter().filter(|id| expected.contains(id)).count();
    let false_positives = distinct.len() - true_positives;
    let false_negatives = expected.len() - true_positives;

    let precision = precision(&distinct, expected);
    let recall = recall(&distinct, expected);
    let f1 = f1_score(precision, recall);
    let ndcg = ndcg_at_k(&distinct, expected, top_k);
    let speed = speed_score(response_time_ms);
    let response_time_ms = finite_or_zero(response_time_ms).max(0.0);

    Metrics {
        precision,
        recall,
        f1_score: f1,
        ndcg,
        speed_score: speed,
        overall_score: overall_score(precision, recall, f1, ndcg, speed),
        true_positives: true_positives as u32,
        false_positives: false_positives as u32,
        false_negatives: false_negatives as u32,
        returned_count: distinct.len(),
        expected_count: expected.len(),
        response_time_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[i64]) -> BTreeSet<i64> {
        ids.iter().copied().collect()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn empty_inputs_score_zero() {
        assert_eq!(precision(&[], &set(&[1, 2])), 0.0);
        assert_eq!(recall(&[1, 2], &set(&[])), 0.0);
        assert_eq!(f1_score(0.0, 0.0), 0.0);
        assert_eq!(ndcg_at_k(&[], &set(&[1]), 10), 0.0);
        assert_eq!(ndcg_at_k(&[1], &set(&[]), 10), 0.0);
    }

    #[test]
    fn identical_sets_are_perfect_regardless_of_order() {
        let expected = set(&[1, 2, 3]);
        let metrics = calculate_all_metrics(&[3, 1, 2], &expected, 10.0, None);
        assert_eq!(metrics.precision, 1.0);
        assert_eq!(metrics.recall, 1.0);
        assert_eq!(metrics.f1_score, 1.0);
        assert!(close(metrics.ndcg, 1.0));
        assert_eq!(metrics.overall_score, 100.0);
    }

    #[test]
    fn partial_overlap_counts_match() {
        let metrics = calculate_all_metrics(&[1, 2, 4, 5], &set(&[1, 2, 3]), 40.0, None);
        assert_eq!(metrics.true_positives, 2);
        assert_eq!(metrics.false_positives, 2);
        assert_eq!(metrics.false_negatives, 1);
        assert!(close(metrics.precision, 0.5));
        assert!(close(metrics.recall, 2.0 / 3.0));
        assert!(close(metrics.f1_score, 4.0 / 7.0));
        assert_eq!(metrics.returned_count, 4);
        assert_eq!(metrics.expected_count, 3);
    }

    #[test]
    fn ndcg_ignores_irrelevant_order_and_penalizes_demotion() {
        let expected = set(&[1, 2]);
        let a = ndcg_at_k(&[1, 8, 9, 2], &expected, 10);
        let b = ndcg_at_k(&[1, 9, 8, 2], &expected, 10);
        assert!(close(a, b));

        let top = ndcg_at_k(&[1, 2, 8], &expected, 10);
        let demoted = ndcg_at_k(&[1, 8, 2], &expected, 10);
        assert!(demoted < top);
    }

    #[test]
    fn ndcg_only_counts_top_k() {
        let expected = set(&[5]);
        assert_eq!(ndcg_at_k(&[1, 2, 5], &expected, 2), 0.0);
        assert!(ndcg_at_k(&[1, 2, 5], &expected, 3) > 0.0);
    }

    #[test]
    fn repeated_ids_do_not_inflate_scores() {
        let expected = set(&[1]);
        let metrics = calculate_all_metrics(&[1, 1, 1], &expected, 10.0, None);
        assert_eq!(metrics.precision, 1.0);
        assert!(close(metrics.ndcg, 1.0));
        assert_eq!(metrics.false_positives, 0);
    }

    #[test]
    fn speed_score_bands_and_decay() {
        assert_eq!(speed_score(0.0), 100.0);
        assert_eq!(speed_score(50.0), 100.0);
        assert_eq!(speed_score(51.0), 90.0);
        assert_eq!(speed_score(150.0), 90.0);
        assert_eq!(speed_score(300.0), 75.0);
        assert_eq!(speed_score(500.0), 50.0);
        assert!(close(speed_score(2750.0), 25.0));
        assert_eq!(speed_score(5000.0), 0.0);
        assert_eq!(speed_score(60_000.0), 0.0);
        assert_eq!(speed_score(-5.0), 100.0);
        assert_eq!(speed_score(f64::NAN), 0.0);
        assert_eq!(speed_score(f64::INFINITY), 0.0);
    }

    #[test]
    fn speed_score_is_non_increasing() {
        let mut previous = speed_score(0.0);
        let mut ms = 0.0;
        while ms <= 6000.0 {
            let current = speed_score(ms);
            assert!(current <= previous, "speed rose at {ms}ms");
            previous = current;
            ms += 7.5;
        }
    }

    #[test]
    fn overall_score_weights_and_rounding() {
        assert_eq!(overall_score(1.0, 1.0, 1.0, 1.0, 100.0), 100.0);
        assert_eq!(overall_score(0.0, 0.0, 0.0, 0.0, 0.0), 0.0);
        assert_eq!(overall_score(0.0, 0.0, 0.0, 0.0, 90.0), 9.0);
        assert_eq!(overall_score(1.0 / 3.0, 0.0, 0.0, 0.0, 0.0), 11.67);
        assert_eq!(
            overall_score(0.5, 0.25, 0.1, 0.9, 75.0),
            overall_score(0.5, 0.25, 0.1, 0.9, 75.0)
        );
    }

    #[test]
    fn overall_score_never_leaves_range() {
        let score = overall_score(f64::NAN, 2.0, -1.0, f64::INFINITY, 500.0);
        assert!((0.0..=100.0).contains(&score));
        assert!(!score.is_nan());
    }

    #[test]
    fn metrics_stay_in_bounds_for_assorted_inputs() {
        let cases: [(&[i64], &[i64]); 5] = [
            (&[], &[]),
            (&[1, 2, 3], &[]),
            (&[], &[4]),
            (&[7, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17], &[7, 17, 99]),
            (&[3, 2, 1], &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]),
        ];
        for (returned, expected) in cases {
            let m = calculate_all_metrics(returned, &set(expected), 120.0, Some(10));
            for value in [m.precision, m.recall, m.f1_score, m.ndcg] {
                assert!((0.0..=1.0).contains(&value), "{value} out of range");
            }
            assert!((0.0..=100.0).contains(&m.overall_score));
            assert_eq!(m.true_positives + m.false_negatives, m.expected_count as u32);
        }
    }
}
