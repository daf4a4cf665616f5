//! Small descriptive-statistics helpers shared by batch summaries and drift checks
//!
//! Percentiles use linear interpolation between closest ranks, the same
//! convention as numpy's default `percentile`.

/// Return the finite values of `values`, sorted ascending
pub fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Arithmetic mean, `None` for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation, `None` for an empty slice
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// Percentile `q` (0-100) of an already sorted slice
///
/// Returns `None` when the slice is empty. `q` is clamped to `[0, 100]`.
pub fn percentile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    if n == 1 {
        return Some(sorted[0]);
    }

    let rank = (q.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = (lower + 1).min(n - 1);
    let fraction = rank - lower as f64;

    let lo = sorted[lower];
    let hi = sorted[upper];
    if fraction == 0.0 || lo == hi {
        return Some(lo);
    }
    // Clamp so rounding never pushes the value outside its rank interval
    Some((lo + (hi - lo) * fraction).clamp(lo, hi))
}

/// Percentile `q` (0-100) of an unsorted slice; non-finite values are ignored
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    percentile_sorted(&sorted_finite(values), q)
}

/// Interquartile range (p75 - p25) of an already sorted slice
pub fn iqr_sorted(sorted: &[f64]) -> Option<f64> {
    Some(percentile_sorted(sorted, 75.0)? - percentile_sorted(sorted, 25.0)?)
}
