//! Core record types for the prediction service monitor
//!
//! This module defines the data structures that flow between the predictor,
//! the metrics store and the reporting layer: single prediction outcomes and
//! the per-batch summaries derived from them.

use crate::stats;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Class label returned by the model (e.g. 0 = stays, 1 = churns)
pub type ClassLabel = i64;

/// Result of a single prediction request
///
/// Created by a predictor for every request, whether it succeeded or not.
/// Fields are optional because a response may be incomplete; use
/// [`PredictionOutcome::accepted`] to get the validated value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictionOutcome {
    /// Predicted class, if the endpoint returned one
    pub value: Option<ClassLabel>,
    /// Round-trip latency in milliseconds, reported even on failure
    pub response_time_ms: Option<f64>,
    /// Whether the endpoint answered with a usable prediction
    pub success: bool,
    /// Error description for failed requests
    pub error: Option<String>,
    /// HTTP status code, if a response was received
    pub status_code: Option<u16>,
    /// When the request completed
    pub observed_at: Timestamp,
}

impl PredictionOutcome {
    /// Build a successful outcome
    pub fn success(value: ClassLabel, response_time_ms: f64, observed_at: Timestamp) -> Self {
        Self {
            value: Some(value),
            response_time_ms: Some(response_time_ms),
            success: true,
            error: None,
            status_code: Some(200),
            observed_at,
        }
    }

    /// Build a failed outcome
    pub fn failure(
        error: impl Into<String>,
        response_time_ms: f64,
        status_code: Option<u16>,
        observed_at: Timestamp,
    ) -> Self {
        Self {
            value: None,
            response_time_ms: Some(response_time_ms),
            success: false,
            error: Some(error.into()),
            status_code,
            observed_at,
        }
    }

    /// Value and response time of a well-formed successful outcome
    ///
    /// Returns `None` for failures and for successes that lack a value or
    /// carry a negative or non-finite response time. Such outcomes are
    /// counted as errors by the metrics store.
    pub fn accepted(&self) -> Option<(ClassLabel, f64)> {
        if !self.success {
            return None;
        }
        let value = self.value?;
        let response_time = self.response_time_ms?;
        if !response_time.is_finite() || response_time < 0.0 {
            return None;
        }
        Some((value, response_time))
    }

    /// Whether this outcome is a well-formed success
    pub fn is_well_formed(&self) -> bool {
        self.accepted().is_some()
    }
}

/// Response-time statistics for the successful requests of a batch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseTimeStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub std_dev: f64,
    pub iqr: f64,
    /// Requests slower than the configured SLA
    pub sla_breaches: usize,
    /// Share of requests slower than the SLA, in percent
    pub sla_breach_pct: f64,
}

impl ResponseTimeStats {
    /// Compute statistics over response times; `None` when there are none
    pub fn from_samples(samples: &[f64], max_response_time_ms: f64) -> Option<Self> {
        let sorted = stats::sorted_finite(samples);
        let mean = stats::mean(&sorted)?;
        let sla_breaches = sorted.iter().filter(|t| **t > max_response_time_ms).count();

        Some(Self {
            mean,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            p50: stats::percentile_sorted(&sorted, 50.0)?,
            p90: stats::percentile_sorted(&sorted, 90.0)?,
            p95: stats::percentile_sorted(&sorted, 95.0)?,
            p99: stats::percentile_sorted(&sorted, 99.0)?,
            std_dev: stats::std_dev(&sorted)?,
            iqr: stats::iqr_sorted(&sorted)?,
            sla_breaches,
            sla_breach_pct: sla_breaches as f64 / sorted.len() as f64 * 100.0,
        })
    }
}

/// Calendar context of a batch, used for time-of-day reporting
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeContext {
    /// Hour of day (0-23, UTC)
    pub hour: u32,
    /// Day of week, Monday = 0
    pub day_of_week: u32,
    /// 08:00-17:59
    pub is_business_hours: bool,
    /// Saturday or Sunday
    pub is_weekend: bool,
}

impl TimeContext {
    pub fn at(timestamp: Timestamp) -> Self {
        let hour = timestamp.hour();
        let day_of_week = timestamp.weekday().num_days_from_monday();
        Self {
            hour,
            day_of_week,
            is_business_hours: (8..=17).contains(&hour),
            is_weekend: day_of_week >= 5,
        }
    }

    /// Quarter of the day: 0 = 00-05, 1 = 06-11, 2 = 12-17, 3 = 18-23
    pub fn quarter_of_day(&self) -> u32 {
        self.hour / 6
    }
}

/// Aggregate of one monitoring cycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchSummary {
    /// When the batch was summarized
    pub timestamp: Timestamp,
    /// Number of requests sent
    pub batch_size: usize,
    /// Failed or malformed outcomes
    pub errors: usize,
    /// Share of well-formed successes, in percent
    pub success_rate: f64,
    /// Wall-clock duration of the whole batch
    pub batch_duration_ms: f64,
    /// Requests per second
    pub throughput: f64,
    /// Statistics over successful response times, if any succeeded
    pub response_times: Option<ResponseTimeStats>,
    /// Successful predictions per class
    pub prediction_counts: BTreeMap<ClassLabel, usize>,
    pub time_context: TimeContext,
}

impl BatchSummary {
    /// Summarize a batch of outcomes
    ///
    /// # Arguments
    ///
    /// * `timestamp` - When the batch completed
    /// * `outcomes` - Every outcome of the batch, failures included
    /// * `batch_duration` - Wall-clock time spent on the batch
    /// * `max_response_time_ms` - SLA threshold for breach counting
    pub fn from_outcomes(
        timestamp: Timestamp,
        outcomes: &[PredictionOutcome],
        batch_duration: Duration,
        max_response_time_ms: f64,
    ) -> Self {
        let batch_size = outcomes.len();
        let mut prediction_counts = BTreeMap::new();
        let mut response_times = Vec::with_capacity(batch_size);

        for (value, response_time) in outcomes.iter().filter_map(PredictionOutcome::accepted) {
            *prediction_counts.entry(value).or_insert(0) += 1;
            response_times.push(response_time);
        }

        let errors = batch_size - response_times.len();
        let success_rate = if batch_size > 0 {
            (batch_size - errors) as f64 / batch_size as f64 * 100.0
        } else {
            0.0
        };

        let duration_secs = batch_duration.as_secs_f64();
        let throughput = if duration_secs > 0.0 {
            batch_size as f64 / duration_secs
        } else {
            batch_size as f64
        };

        Self {
            timestamp,
            batch_size,
            errors,
            success_rate,
            batch_duration_ms: duration_secs * 1000.0,
            throughput,
            response_times: ResponseTimeStats::from_samples(&response_times, max_response_time_ms),
            prediction_counts,
            time_context: TimeContext::at(timestamp),
        }
    }

    /// Mean response time of the batch, if any request succeeded
    pub fn avg_response_time(&self) -> Option<f64> {
        self.response_times.as_ref().map(|stats| stats.mean)
    }

    /// Fraction of successful predictions per class
    pub fn prediction_distribution(&self) -> BTreeMap<ClassLabel, f64> {
        let total: usize = self.prediction_counts.values().sum();
        self.prediction_counts
            .iter()
            .map(|(class, count)| (*class, *count as f64 / total.max(1) as f64))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 6, 15, hour, 30, 0).unwrap()
    }

    #[test]
    fn test_accepted_rejects_malformed_success() {
        let ts = at(10);
        let good = PredictionOutcome::success(1, 12.5, ts);
        assert_eq!(good.accepted(), Some((1, 12.5)));

        let mut no_value = good.clone();
        no_value.value = None;
        assert!(!no_value.is_well_formed());

        let mut no_time = good.clone();
        no_time.response_time_ms = None;
        assert!(!no_time.is_well_formed());

        let mut negative = good.clone();
        negative.response_time_ms = Some(-1.0);
        assert!(!negative.is_well_formed());

        let failed = PredictionOutcome::failure("connection refused", 5.0, None, ts);
        assert!(!failed.is_well_formed());
    }

    #[test]
    fn test_batch_with_three_failures_has_seventy_percent_success() {
        let ts = at(10);
        let mut outcomes: Vec<_> = (0..7)
            .map(|i| PredictionOutcome::success(i % 2, 10.0 + i as f64, ts))
            .collect();
        for _ in 0..3 {
            outcomes.push(PredictionOutcome::failure("timeout", 5000.0, None, ts));
        }

        let summary =
            BatchSummary::from_outcomes(ts, &outcomes, Duration::from_millis(500), 1000.0);

        assert_eq!(summary.batch_size, 10);
        assert_eq!(summary.errors, 3);
        assert_eq!(summary.success_rate, 70.0);
        assert_eq!(summary.prediction_counts.get(&0), Some(&4));
        assert_eq!(summary.prediction_counts.get(&1), Some(&3));
        assert!((summary.throughput - 20.0).abs() < 1e-9);
        assert_eq!(summary.batch_duration_ms, 500.0);
    }

    #[test]
    fn test_response_time_stats_and_sla() {
        let stats = ResponseTimeStats::from_samples(&[100.0, 200.0, 1500.0, 300.0], 1000.0)
            .expect("stats for non-empty samples");
        assert_eq!(stats.min, 100.0);
        assert_eq!(stats.max, 1500.0);
        assert_eq!(stats.mean, 525.0);
        assert_eq!(stats.sla_breaches, 1);
        assert_eq!(stats.sla_breach_pct, 25.0);
        assert!(stats.p50 <= stats.p90 && stats.p90 <= stats.p95 && stats.p95 <= stats.p99);
        assert!(ResponseTimeStats::from_samples(&[], 1000.0).is_none());
    }

    #[test]
    fn test_empty_batch_summary() {
        let summary = BatchSummary::from_outcomes(at(3), &[], Duration::ZERO, 1000.0);
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.avg_response_time(), None);
        assert!(summary.prediction_distribution().is_empty());
    }

    #[test]
    fn test_time_context() {
        // 2024-06-15 is a Saturday
        let ctx = TimeContext::at(at(10));
        assert_eq!(ctx.hour, 10);
        assert_eq!(ctx.day_of_week, 5);
        assert!(ctx.is_weekend);
        assert!(ctx.is_business_hours);
        assert_eq!(ctx.quarter_of_day(), 1);

        assert!(!TimeContext::at(at(18)).is_business_hours);
    }

    #[test]
    fn test_prediction_distribution() {
        let ts = at(12);
        let outcomes = vec![
            PredictionOutcome::success(0, 10.0, ts),
            PredictionOutcome::success(0, 10.0, ts),
            PredictionOutcome::success(0, 10.0, ts),
            PredictionOutcome::success(1, 10.0, ts),
        ];
        let summary = BatchSummary::from_outcomes(ts, &outcomes, Duration::from_secs(1), 1000.0);
        let dist = summary.prediction_distribution();
        assert_eq!(dist.get(&0), Some(&0.75));
        assert_eq!(dist.get(&1), Some(&0.25));
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = PredictionOutcome::failure("HTTP 503", 12.0, Some(503), at(9));
        let json = serde_json::to_string(&outcome).unwrap();
        let deserialized: PredictionOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(outcome, deserialized);
    }
}
