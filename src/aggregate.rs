//! Statistical aggregation, downsampling, and outlier filtering over
//! `u16` Modbus register readings (§4.5).

use crate::modbus::registers::RegisterId;
use crate::sample::Sample;

/// Summary statistics over a non-empty slice of `u16` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub mean: u16,
    pub median: u16,
    pub min: u16,
    pub max: u16,
    pub range: u16,
    pub first: u16,
    pub last: u16,
    pub stddev: u16,
    pub sum: u64,
    pub count: usize,
}

/// How a window of values collapses to a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationMode {
    Mean,
    Median,
    Min,
    Max,
    First,
    Last,
    Smart,
}

/// Compute [`Stats`] over `values`. Panics only if `values` is empty —
/// callers are expected to check non-emptiness first (mirrors the
/// precondition used throughout the acquisition/upload pipeline, which
/// never calls this on an empty batch).
#[must_use]
pub fn compute_stats(values: &[u16]) -> Stats {
    assert!(!values.is_empty(), "compute_stats requires a non-empty slice");

    let count = values.len();
    let sum: u64 = values.iter().map(|&v| u64::from(v)).sum();
    let mean = (sum / count as u64) as u16;

    let min = *values.iter().min().unwrap();
    let max = *values.iter().max().unwrap();
    let range = max - min;

    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let median = median_of_sorted(&sorted);

    let variance: f64 = values
        .iter()
        .map(|&v| {
            let d = f64::from(v) - f64::from(mean);
            d * d
        })
        .sum::<f64>()
        / count as f64;
    let stddev = variance.sqrt().floor() as u16;

    Stats {
        mean,
        median,
        min,
        max,
        range,
        first: values[0],
        last: values[count - 1],
        stddev,
        sum,
        count,
    }
}

fn median_of_sorted(sorted: &[u16]) -> u16 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        ((u32::from(sorted[n / 2 - 1]) + u32::from(sorted[n / 2])) / 2) as u16
    }
}

/// Resolve `Smart` to a concrete mode per the §4.5 rules. Non-`Smart`
/// modes pass through unchanged.
#[must_use]
pub fn resolve_smart(mode: AggregationMode, stats: &Stats) -> AggregationMode {
    if mode != AggregationMode::Smart {
        return mode;
    }
    if stats.mean > 0 {
        let cv = f64::from(stats.stddev) / f64::from(stats.mean);
        if cv < 0.10 {
            return AggregationMode::Mean;
        }
    }
    if f64::from(stats.range) > f64::from(stats.mean) / 2.0 {
        return AggregationMode::Median;
    }
    AggregationMode::Mean
}

/// Collapse `values` to a single representative value under `mode`.
#[must_use]
pub fn aggregate(values: &[u16], mode: AggregationMode) -> u16 {
    let stats = compute_stats(values);
    match resolve_smart(mode, &stats) {
        AggregationMode::Mean | AggregationMode::Smart => stats.mean,
        AggregationMode::Median => stats.median,
        AggregationMode::Min => stats.min,
        AggregationMode::Max => stats.max,
        AggregationMode::First => stats.first,
        AggregationMode::Last => stats.last,
    }
}

/// Fixed-window downsampling: consecutive windows of `window_size`,
/// the tail window truncated if `values.len()` isn't a multiple.
#[must_use]
pub fn downsample_fixed_window(values: &[u16], window_size: usize, mode: AggregationMode) -> Vec<u16> {
    if window_size == 0 || values.is_empty() {
        return Vec::new();
    }
    values
        .chunks(window_size)
        .map(|chunk| aggregate(chunk, mode))
        .collect()
}

/// Adaptive downsampling: ceil-divide `values` into `target` windows
/// (tail window possibly shorter).
#[must_use]
pub fn downsample_adaptive(values: &[u16], target: usize, mode: AggregationMode) -> Vec<u16> {
    if target == 0 || values.is_empty() {
        return Vec::new();
    }
    let window_size = values.len().div_ceil(target);
    downsample_fixed_window(values, window_size, mode)
}

/// First/third quartile via simple index quantiles (`n/4`, `3n/4`),
/// not the averaged-rank method.
#[must_use]
pub fn quartiles(sorted: &[u16]) -> (u16, u16) {
    let n = sorted.len();
    let q1 = sorted[n / 4];
    let q3 = sorted[((3 * n) / 4).min(n - 1)];
    (q1, q3)
}

/// Tukey IQR outlier mask with `k = 1.5`. Always all-`false` when
/// `values.len() < 4`.
#[must_use]
pub fn detect_outliers(values: &[u16]) -> Vec<bool> {
    let n = values.len();
    if n < 4 {
        return vec![false; n];
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let (q1, q3) = quartiles(&sorted);
    let iqr = f64::from(q3) - f64::from(q1);
    let lower = f64::from(q1) - 1.5 * iqr;
    let upper = f64::from(q3) + 1.5 * iqr;
    values
        .iter()
        .map(|&v| f64::from(v) < lower || f64::from(v) > upper)
        .collect()
}

/// The subsequence of `values` that [`detect_outliers`] does not flag.
#[must_use]
pub fn remove_outliers(values: &[u16]) -> Vec<u16> {
    let mask = detect_outliers(values);
    values
        .iter()
        .zip(mask)
        .filter(|(_, is_outlier)| !is_outlier)
        .map(|(&v, _)| v)
        .collect()
}

/// Downsample a batch of [`Sample`]s down to roughly `target` entries,
/// aggregating each register column independently within each window
/// and stamping the result with the window's first timestamp.
///
/// Used by the upload engine when a drained batch exceeds
/// `upload_target_samples` (§4.12 step 3).
#[must_use]
pub fn downsample_samples(batch: &[Sample], target: usize, mode: AggregationMode) -> Vec<Sample> {
    if target == 0 || batch.is_empty() || batch.len() <= target {
        return batch.to_vec();
    }
    let window_size = batch.len().div_ceil(target);

    let mut ids: Vec<RegisterId> = Vec::new();
    for s in batch {
        for (id, _) in &s.values {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
    }

    batch
        .chunks(window_size)
        .map(|chunk| {
            let timestamp = chunk[0].timestamp;
            let values = ids
                .iter()
                .map(|&id| {
                    let column: Vec<u16> = chunk.iter().filter_map(|s| s.get(id)).collect();
                    let v = if column.is_empty() { 0 } else { aggregate(&column, mode) };
                    (id, v)
                })
                .collect();
            Sample::new(timestamp, values)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_on_known_values() {
        let values = [10u16, 20, 30, 40];
        let stats = compute_stats(&values);
        assert_eq!(stats.mean, 25);
        assert_eq!(stats.min, 10);
        assert_eq!(stats.max, 40);
        assert_eq!(stats.range, 30);
        assert_eq!(stats.first, 10);
        assert_eq!(stats.last, 40);
        assert_eq!(stats.sum, 100);
        assert_eq!(stats.count, 4);
    }

    #[test]
    fn smart_picks_mean_for_low_cv() {
        let values = [100u16, 101, 99, 100];
        let stats = compute_stats(&values);
        assert_eq!(resolve_smart(AggregationMode::Smart, &stats), AggregationMode::Mean);
    }

    #[test]
    fn smart_picks_median_for_wide_range() {
        let values = [1u16, 1, 1, 100];
        let stats = compute_stats(&values);
        assert_eq!(resolve_smart(AggregationMode::Smart, &stats), AggregationMode::Median);
    }

    #[test]
    fn fixed_window_truncates_tail() {
        let values = [1u16, 2, 3, 4, 5];
        let out = downsample_fixed_window(&values, 2, AggregationMode::Mean);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn adaptive_hits_target_window_count() {
        let values: Vec<u16> = (0..10).collect();
        let out = downsample_adaptive(&values, 3, AggregationMode::Mean);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn small_samples_have_no_outliers() {
        let values = [1u16, 1000, 2, 3];
        assert_eq!(detect_outliers(&values[..3]), vec![false; 3]);
    }

    #[test]
    fn obvious_outlier_is_flagged() {
        let values = [10u16, 11, 9, 10, 12, 11, 9, 500];
        let mask = detect_outliers(&values);
        assert!(mask[7]);
        let cleaned = remove_outliers(&values);
        assert!(!cleaned.contains(&500));
    }
}
