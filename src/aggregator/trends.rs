//! Trend signals derived from a metrics snapshot
//!
//! Every signal is optional: degenerate inputs (fewer than two batches,
//! zero time delta, no response times) leave the signal out instead of
//! producing an error.

use crate::aggregator::metrics_store::MetricsSnapshot;
use serde::{Deserialize, Serialize};

/// Point-in-time trend signals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    /// Change of the batch mean response time, in ms per second
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_change_rate: Option<f64>,
    /// Relative change of the batch mean response time, in percent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_percent_change: Option<f64>,
    /// Hour of day of the hourly bucket with the highest mean response time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_response_time_hour: Option<u32>,
    /// Hour of day of the hourly bucket with the lowest mean response time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_response_time_hour: Option<u32>,
    /// Difference between the highest and lowest hourly mean response time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hour_response_time_variation: Option<f64>,
    /// Hour of day with the most requests across all retained days
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_request_hour: Option<u32>,
    /// Hour of day with the highest mean response time across all retained days
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_response_time_hour: Option<u32>,
    /// Success rate of the latest day minus that of the earliest, in percentage points
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_success_rate_change: Option<f64>,
}

impl TrendReport {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Present signals as `(name, value)` pairs
    pub fn metrics(&self) -> Vec<(&'static str, f64)> {
        let mut metrics = Vec::new();
        let mut push = |name, value: Option<f64>| {
            if let Some(value) = value {
                metrics.push((name, value));
            }
        };

        push("response_time_change_rate", self.response_time_change_rate);
        push("response_time_percent_change", self.response_time_percent_change);
        push("max_response_time_hour", self.max_response_time_hour.map(f64::from));
        push("min_response_time_hour", self.min_response_time_hour.map(f64::from));
        push("hour_response_time_variation", self.hour_response_time_variation);
        push("peak_request_hour", self.peak_request_hour.map(f64::from));
        push("peak_response_time_hour", self.peak_response_time_hour.map(f64::from));
        push("daily_success_rate_change", self.daily_success_rate_change);

        metrics
    }
}

/// Computes trend signals from metrics snapshots
#[derive(Debug, Clone, Copy, Default)]
pub struct TrendAnalyzer;

impl TrendAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Compute all trend signals
    ///
    /// Returns an empty report when fewer than two batches are retained.
    pub fn compute(&self, snapshot: &MetricsSnapshot) -> TrendReport {
        if snapshot.history.len() < 2 {
            return TrendReport::default();
        }

        let mut report = TrendReport::default();
        self.response_time_change(snapshot, &mut report);
        self.hourly_extremes(snapshot, &mut report);
        self.hour_of_day_peaks(snapshot, &mut report);
        self.daily_success_trend(snapshot, &mut report);
        report
    }

    fn response_time_change(&self, snapshot: &MetricsSnapshot, report: &mut TrendReport) {
        let (Some(first), Some(last)) = (snapshot.history.first(), snapshot.history.last()) else {
            return;
        };
        let (Some(earliest), Some(latest)) = (
            first.summary.avg_response_time(),
            last.summary.avg_response_time(),
        ) else {
            return;
        };

        let elapsed_secs =
            (last.timestamp() - first.timestamp()).num_milliseconds() as f64 / 1000.0;
        if elapsed_secs <= 0.0 {
            return;
        }

        report.response_time_change_rate = Some((latest - earliest) / elapsed_secs);
        if earliest > 0.0 {
            report.response_time_percent_change = Some((latest / earliest - 1.0) * 100.0);
        }
    }

    /// Peak and trough by hourly bucket; ties go to the earliest bucket
    fn hourly_extremes(&self, snapshot: &MetricsSnapshot, report: &mut TrendReport) {
        let mut max: Option<(u32, f64)> = None;
        let mut min: Option<(u32, f64)> = None;

        for (key, bucket) in &snapshot.hourly {
            let Some(mean) = bucket.avg_response_time() else {
                continue;
            };
            if max.map_or(true, |(_, m)| mean > m) {
                max = Some((key.hour, mean));
            }
            if min.map_or(true, |(_, m)| mean < m) {
                min = Some((key.hour, mean));
            }
        }

        if let (Some((max_hour, max_mean)), Some((min_hour, min_mean))) = (max, min) {
            report.max_response_time_hour = Some(max_hour);
            report.min_response_time_hour = Some(min_hour);
            report.hour_response_time_variation = Some(max_mean - min_mean);
        }
    }

    /// Peaks after folding same-hour buckets of different days; ties go to the lowest hour
    fn hour_of_day_peaks(&self, snapshot: &MetricsSnapshot, report: &mut TrendReport) {
        let mut requests = [0u64; 24];
        let mut response_sums = [0f64; 24];
        let mut response_counts = [0usize; 24];

        for (key, bucket) in &snapshot.hourly {
            let hour = key.hour as usize % 24;
            requests[hour] += bucket.request_count;
            response_sums[hour] += bucket.response_times.iter().sum::<f64>();
            response_counts[hour] += bucket.response_times.len();
        }

        report.peak_request_hour = argmax(
            requests
                .iter()
                .enumerate()
                .filter(|(_, count)| **count > 0)
                .map(|(hour, count)| (hour, *count as f64)),
        );

        report.peak_response_time_hour = argmax(
            response_sums
                .iter()
                .zip(response_counts.iter())
                .enumerate()
                .filter(|(_, (_, count))| **count > 0)
                .map(|(hour, (sum, count))| (hour, sum / *count as f64)),
        );
    }

    fn daily_success_trend(&self, snapshot: &MetricsSnapshot, report: &mut TrendReport) {
        let rates: Vec<f64> = snapshot
            .daily
            .values()
            .filter_map(|day| day.bucket.success_rate())
            .collect();

        if rates.len() >= 2 {
            report.daily_success_rate_change = Some(rates[rates.len() - 1] - rates[0]);
        }
    }
}

/// Index of the largest value; the first one wins on ties
fn argmax(values: impl Iterator<Item = (usize, f64)>) -> Option<u32> {
    let mut best: Option<(usize, f64)> = None;
    for (index, value) in values {
        if best.map_or(true, |(_, b)| value > b) {
            best = Some((index, value));
        }
    }
    best.map(|(index, _)| index as u32)
}
