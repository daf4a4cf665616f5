//! Distribution comparison statistics
//!
//! Both statistics are total over their inputs: empty, constant or
//! non-finite samples resolve to fixed sentinels instead of errors.

use crate::stats;
use serde::{Deserialize, Serialize};

/// Replacement for empty bucket fractions so the logarithm stays finite
pub const PSI_EPSILON: f64 = 0.0001;

/// Population Stability Index of `current` against `reference`
///
/// Bucket edges are the reference percentiles at `0, 100/buckets, ..., 100`
/// with duplicates removed. Bins are half-open except the last, which is
/// closed; values outside the reference range fall in no bin. Fractions are
/// taken over each sample's full size, so out-of-range current values lower
/// the current fractions.
///
/// Returns `0.0` when either sample is empty, when fewer than two distinct
/// edges remain, or when `buckets` is zero.
pub fn calculate_psi(reference: &[f64], current: &[f64], buckets: usize) -> f64 {
    let reference = stats::sorted_finite(reference);
    let current: Vec<f64> = current.iter().copied().filter(|v| v.is_finite()).collect();
    if reference.is_empty() || current.is_empty() || buckets == 0 {
        return 0.0;
    }

    let edges = breakpoints(&reference, buckets);
    if edges.len() < 2 {
        return 0.0;
    }

    let expected = bin_fractions(&reference, &edges);
    let actual = bin_fractions(&current, &edges);

    let psi: f64 = expected
        .iter()
        .zip(actual.iter())
        .map(|(e, a)| {
            let e = if *e == 0.0 { PSI_EPSILON } else { *e };
            let a = if *a == 0.0 { PSI_EPSILON } else { *a };
            (e - a) * (e / a).ln()
        })
        .sum();

    if psi.is_finite() {
        psi.max(0.0)
    } else {
        0.0
    }
}

/// Distinct percentile edges of a sorted, non-empty sample
fn breakpoints(sorted: &[f64], buckets: usize) -> Vec<f64> {
    let step = 100.0 / buckets as f64;
    let mut edges: Vec<f64> = (0..=buckets)
        .filter_map(|i| stats::percentile_sorted(sorted, i as f64 * step))
        .collect();
    edges.sort_by(f64::total_cmp);
    edges.dedup();
    edges
}

/// Share of `values` falling in each bin defined by `edges`
fn bin_fractions(values: &[f64], edges: &[f64]) -> Vec<f64> {
    let bins = edges.len() - 1;
    let first = edges[0];
    let last = edges[bins];
    let mut counts = vec![0usize; bins];

    for value in values {
        if *value < first || *value > last {
            continue;
        }
        let index = if *value == last {
            bins - 1
        } else {
            edges.partition_point(|edge| edge <= value) - 1
        };
        counts[index.min(bins - 1)] += 1;
    }

    let total = values.len() as f64;
    counts.iter().map(|c| *c as f64 / total).collect()
}

/// Two-sample Kolmogorov-Smirnov result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KsResult {
    /// Maximum absolute difference between the empirical CDFs
    pub statistic: f64,
    pub p_value: f64,
}

impl KsResult {
    /// Result for samples with no evidence of difference
    pub const NO_DIFFERENCE: KsResult = KsResult {
        statistic: 0.0,
        p_value: 1.0,
    };
}

/// Largest sample size for which the exact p-value is computed
pub const KS_EXACT_MAX_N: usize = 10_000;

/// Two-sample Kolmogorov-Smirnov test
///
/// The two-sided p-value is exact when neither sample exceeds
/// [`KS_EXACT_MAX_N`] values. Larger samples use the asymptotic Kolmogorov
/// distribution with the effective sample size `n*m/(n+m)`. Either sample
/// being empty yields statistic `0` and p-value `1`.
pub fn ks_two_sample(reference: &[f64], current: &[f64]) -> KsResult {
    let a = stats::sorted_finite(reference);
    let b = stats::sorted_finite(current);
    if a.is_empty() || b.is_empty() {
        return KsResult::NO_DIFFERENCE;
    }

    let statistic = ecdf_max_difference(&a, &b);
    if statistic == 0.0 {
        return KsResult::NO_DIFFERENCE;
    }

    let p_value = if a.len().max(b.len()) <= KS_EXACT_MAX_N {
        exact_p_value(a.len(), b.len(), statistic)
    } else {
        let (n, m) = (a.len() as f64, b.len() as f64);
        let effective = (n * m / (n + m)).sqrt();
        kolmogorov_survival((effective + 0.12 + 0.11 / effective) * statistic)
    };

    KsResult { statistic, p_value }
}

/// Exact `P(D >= statistic)` for sample sizes `n` and `m`
///
/// Counts monotone lattice paths from `(0, 0)` to `(n, m)` that stay
/// strictly inside the band `|i/n - j/m| < statistic`. Each cell holds the
/// probability that a uniformly random path reaches it without leaving the
/// band, which keeps every value in `[0, 1]`.
fn exact_p_value(n: usize, m: usize, statistic: f64) -> f64 {
    // D is a multiple of 1/(n*m); compare in integers to avoid rounding
    let (nu, mu) = (n as u64, m as u64);
    let bound = (statistic * (nu * mu) as f64).round() as u64;
    let inside = |i: usize, j: usize| (i as u64 * mu).abs_diff(j as u64 * nu) < bound;

    let mut row = vec![0.0_f64; m + 1];
    for i in 0..=n {
        for j in 0..=m {
            row[j] = if !inside(i, j) {
                0.0
            } else if i == 0 && j == 0 {
                1.0
            } else {
                let total = (i + j) as f64;
                let from_above = if i > 0 { row[j] * i as f64 / total } else { 0.0 };
                let from_left = if j > 0 { row[j - 1] * j as f64 / total } else { 0.0 };
                from_above + from_left
            };
        }
    }

    (1.0 - row[m]).clamp(0.0, 1.0)
}

/// Largest gap between the ECDFs of two sorted, non-empty samples
fn ecdf_max_difference(a: &[f64], b: &[f64]) -> f64 {
    let (n, m) = (a.len() as f64, b.len() as f64);
    let (mut i, mut j) = (0, 0);
    let mut max_gap: f64 = 0.0;

    while i < a.len() && j < b.len() {
        let value = a[i].min(b[j]);
        while i < a.len() && a[i] <= value {
            i += 1;
        }
        while j < b.len() && b[j] <= value {
            j += 1;
        }
        max_gap = max_gap.max((i as f64 / n - j as f64 / m).abs());
    }

    max_gap
}

/// Survival function of the Kolmogorov distribution, `P(K > lambda)`
fn kolmogorov_survival(lambda: f64) -> f64 {
    const EPS_TERM: f64 = 1e-3;
    const EPS_SUM: f64 = 1e-8;

    let a2 = -2.0 * lambda * lambda;
    let mut sign = 2.0;
    let mut sum = 0.0;
    let mut previous_term: f64 = 0.0;

    for k in 1..=100 {
        let k = k as f64;
        let term = sign * (a2 * k * k).exp();
        sum += term;
        if term.abs() <= EPS_TERM * previous_term || term.abs() <= EPS_SUM * sum {
            return sum.clamp(0.0, 1.0);
        }
        sign = -sign;
        previous_term = term.abs();
    }

    // Series does not converge for tiny lambda; the limit there is 1
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(start: f64, end: f64, count: usize) -> Vec<f64> {
        let step = (end - start) / (count - 1) as f64;
        (0..count).map(|i| start + step * i as f64).collect()
    }

    #[test]
    fn test_psi_identical_samples_is_zero() {
        let sample = grid(300.0, 900.0, 100);
        assert!(calculate_psi(&sample, &sample, 10).abs() < 1e-12);
    }

    #[test]
    fn test_psi_degenerate_inputs() {
        assert_eq!(calculate_psi(&[], &[1.0, 2.0], 10), 0.0);
        assert_eq!(calculate_psi(&[1.0, 2.0], &[], 10), 0.0);
        // Constant reference collapses to a single edge
        assert_eq!(calculate_psi(&[5.0; 20], &[1.0, 9.0], 10), 0.0);
        assert_eq!(calculate_psi(&[1.0, 2.0, 3.0], &[1.0], 0), 0.0);
    }

    #[test]
    fn test_psi_ignores_non_finite_values() {
        let sample = grid(0.0, 10.0, 50);
        let mut noisy = sample.clone();
        noisy.push(f64::NAN);
        noisy.push(f64::INFINITY);
        assert!(calculate_psi(&sample, &noisy, 10).abs() < 1e-12);
    }

    #[test]
    fn test_psi_detects_shifted_sample() {
        let reference = grid(300.0, 900.0, 100);
        let current = grid(700.0, 900.0, 50);
        assert!(calculate_psi(&reference, &current, 10) > 0.2);
    }

    #[test]
    fn test_psi_out_of_range_values_are_not_binned() {
        // One closed bin [1, 2] holds the whole reference; no current value lands in it
        let psi = calculate_psi(&[1.0, 2.0], &[5.0, 6.0], 1);
        let expected = (1.0 - PSI_EPSILON) * (1.0 / PSI_EPSILON).ln();
        assert!((psi - expected).abs() < 1e-9);
    }

    #[test]
    fn test_histogram_last_bin_is_closed() {
        let edges = vec![0.0, 1.0, 2.0];
        assert_eq!(bin_fractions(&[0.0, 1.0, 2.0, 2.5], &edges), vec![0.25, 0.5]);
    }

    #[test]
    fn test_ks_identical_samples() {
        let sample = grid(1.0, 50.0, 50);
        assert_eq!(ks_two_sample(&sample, &sample), KsResult::NO_DIFFERENCE);
    }

    #[test]
    fn test_ks_empty_sample() {
        assert_eq!(ks_two_sample(&[], &[1.0]), KsResult::NO_DIFFERENCE);
        assert_eq!(ks_two_sample(&[1.0], &[]), KsResult::NO_DIFFERENCE);
    }

    #[test]
    fn test_ks_disjoint_samples() {
        let result = ks_two_sample(&grid(0.0, 1.0, 40), &grid(10.0, 11.0, 40));
        assert_eq!(result.statistic, 1.0);
        assert!(result.p_value < 1e-6);
    }

    #[test]
    fn test_ks_statistic_with_ties() {
        // ECDFs at 2.0: a = 2/3, b = 1/3
        let result = ks_two_sample(&[1.0, 2.0, 3.0], &[2.0, 3.0, 3.0]);
        assert!((result.statistic - 1.0 / 3.0).abs() < 1e-12);
        assert!(result.p_value > 0.5 && result.p_value <= 1.0);
    }

    #[test]
    fn test_ks_exact_p_value_complete_separation() {
        // Only the two extreme paths of C(10, 5) leave the band
        let a = [1.0, 2.0, 3.0, 4.0, 5.0];
        let b = [6.0, 7.0, 8.0, 9.0, 10.0];
        let result = ks_two_sample(&a, &b);
        assert_eq!(result.statistic, 1.0);
        assert!((result.p_value - 2.0 / 252.0).abs() < 1e-12);

        let result = ks_two_sample(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]);
        assert!((result.p_value - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_ks_exact_p_value_unequal_sizes() {
        // n=2, m=1: D=1 when the single value is an extreme, 2 of 3 orderings
        let result = ks_two_sample(&[1.0, 2.0], &[3.0]);
        assert_eq!(result.statistic, 1.0);
        assert!((result.p_value - 2.0 / 3.0).abs() < 1e-12);

        // Interleaved samples: D = 1/2 is reached by every ordering
        let result = ks_two_sample(&[1.0, 3.0], &[2.0, 4.0]);
        assert!((result.statistic - 0.5).abs() < 1e-12);
        assert!((result.p_value - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ks_large_samples_use_asymptotic_p_value() {
        let a = grid(0.0, 1.0, KS_EXACT_MAX_N + 1);
        let b = grid(0.5, 1.5, KS_EXACT_MAX_N + 1);
        let result = ks_two_sample(&a, &b);
        assert!((result.statistic - 0.5).abs() < 1e-3);
        assert!(result.p_value < 1e-12);
    }

    #[test]
    fn test_kolmogorov_survival_bounds() {
        assert_eq!(kolmogorov_survival(0.0), 1.0);
        assert!(kolmogorov_survival(3.0) < 1e-6);
        assert!((kolmogorov_survival(1.36) - 0.05).abs() < 0.005);
    }
}
