//! Time-pattern summary document
//!
//! Folds the retained buckets into per-hour-of-day and per-weekday patterns
//! and combines them with overall history figures and the current trend
//! signals. Every hour `"0"`..`"23"` and every weekday name is always
//! present; periods without traffic report zeros.

use crate::aggregator::buckets::TimeBucket;
use crate::aggregator::metrics_store::MetricsSnapshot;
use crate::aggregator::trends::{TrendAnalyzer, TrendReport};
use crate::events::Timestamp;
use crate::stats;
use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryExport {
    pub general: GeneralSummary,
    pub time_patterns: TimePatterns,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralSummary {
    /// Batches currently retained in history
    pub total_batches: usize,
    pub monitoring_period: MonitoringPeriod,
    /// Mean of the per-batch mean response times
    pub avg_response_time: f64,
    /// Mean of the per-batch success rates, in percent
    pub avg_success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringPeriod {
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimePatterns {
    /// Keyed by hour of day
    pub hourly: BTreeMap<u32, PatternEntry>,
    /// Keyed by weekday name
    pub daily: BTreeMap<String, PatternEntry>,
    pub trend: TrendReport,
}

/// Aggregate over every bucket that falls on the same hour or weekday
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternEntry {
    pub request_count: u64,
    pub avg_response_time: f64,
    /// Percent
    pub success_rate: f64,
}

impl PatternEntry {
    fn fold<'a>(buckets: impl Iterator<Item = &'a TimeBucket>) -> Self {
        let mut requests = 0u64;
        let mut successes = 0u64;
        let mut response_sum = 0.0;
        let mut response_count = 0usize;

        for bucket in buckets.filter(|b| b.request_count > 0) {
            requests += bucket.request_count;
            successes += bucket.success_count;
            response_sum += bucket.response_times.iter().sum::<f64>();
            response_count += bucket.response_times.len();
        }

        Self {
            request_count: requests,
            avg_response_time: if response_count > 0 {
                response_sum / response_count as f64
            } else {
                0.0
            },
            success_rate: if requests > 0 {
                successes as f64 / requests as f64 * 100.0
            } else {
                0.0
            },
        }
    }
}

impl SummaryExport {
    pub fn from_snapshot(snapshot: &MetricsSnapshot) -> Self {
        let batch_means: Vec<f64> = snapshot
            .history
            .iter()
            .filter_map(|entry| entry.summary.avg_response_time())
            .collect();
        let success_rates: Vec<f64> = snapshot
            .history
            .iter()
            .map(|entry| entry.summary.success_rate)
            .collect();

        let general = GeneralSummary {
            total_batches: snapshot.history.len(),
            monitoring_period: MonitoringPeriod {
                start: snapshot.history.first().map(|e| e.timestamp()),
                end: snapshot.history.last().map(|e| e.timestamp()),
            },
            avg_response_time: stats::mean(&batch_means).unwrap_or(0.0),
            avg_success_rate: stats::mean(&success_rates).unwrap_or(0.0),
        };

        let hourly = (0..24u32)
            .map(|hour| {
                let entry = PatternEntry::fold(
                    snapshot
                        .hourly
                        .iter()
                        .filter(|(key, _)| key.hour == hour)
                        .map(|(_, bucket)| bucket),
                );
                (hour, entry)
            })
            .collect();

        let daily = WEEKDAYS
            .iter()
            .map(|weekday| {
                let entry = PatternEntry::fold(
                    snapshot
                        .daily
                        .iter()
                        .filter(|(key, _)| key.weekday() == Some(*weekday))
                        .map(|(_, day)| &day.bucket),
                );
                (weekday_name(*weekday).to_string(), entry)
            })
            .collect();

        Self {
            general,
            time_patterns: TimePatterns {
                hourly,
                daily,
                trend: TrendAnalyzer::new().compute(snapshot),
            },
        }
    }
}

fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::metrics_store::MetricsStore;
    use crate::events::{BatchSummary, PredictionOutcome};
    use crate::resources::ResourceUsage;
    use chrono::{Duration, TimeZone, Utc};
    use std::time::Duration as StdDuration;

    fn append(store: &mut MetricsStore, timestamp: Timestamp, response_times: &[f64], failures: usize) {
        let mut outcomes: Vec<_> = response_times
            .iter()
            .map(|rt| PredictionOutcome::success(0, *rt, timestamp))
            .collect();
        outcomes.extend((0..failures).map(|_| PredictionOutcome::failure("x", 1.0, None, timestamp)));
        let summary =
            BatchSummary::from_outcomes(timestamp, &outcomes, StdDuration::from_secs(1), 1000.0);
        store.append(summary, &outcomes, ResourceUsage::default());
    }

    #[test]
    fn test_empty_snapshot_reports_zeros() {
        let export = SummaryExport::from_snapshot(&MetricsSnapshot::default());

        assert_eq!(export.general.total_batches, 0);
        assert_eq!(export.general.monitoring_period.start, None);
        assert_eq!(export.general.avg_response_time, 0.0);
        assert_eq!(export.time_patterns.hourly.len(), 24);
        assert_eq!(export.time_patterns.daily.len(), 7);
        assert!(export.time_patterns.trend.is_empty());
        assert_eq!(export.time_patterns.hourly[&5], PatternEntry::default());
    }

    #[test]
    fn test_patterns_fold_same_hour_and_weekday() {
        let mut store = MetricsStore::new(10, Duration::days(14));
        // 2024-06-03 and 2024-06-10 are both Mondays
        let first = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2024, 6, 10, 9, 30, 0).unwrap();
        let third = Utc.with_ymd_and_hms(2024, 6, 10, 14, 0, 0).unwrap();
        append(&mut store, first, &[100.0, 200.0], 0);
        append(&mut store, second, &[300.0], 1);
        append(&mut store, third, &[50.0], 0);

        let export = SummaryExport::from_snapshot(&store.snapshot());

        assert_eq!(export.general.total_batches, 3);
        assert_eq!(export.general.monitoring_period.start, Some(first));
        assert_eq!(export.general.monitoring_period.end, Some(third));

        // Day 2024-06-03 is outside the 7-day daily retention by the third append
        let nine = &export.time_patterns.hourly[&9];
        assert_eq!(nine.request_count, 4);
        assert_eq!(nine.avg_response_time, 200.0);
        assert_eq!(nine.success_rate, 75.0);

        let monday = &export.time_patterns.daily["Monday"];
        assert_eq!(monday.request_count, 3);
        assert_eq!(monday.avg_response_time, 175.0);
        assert_eq!(export.time_patterns.daily["Tuesday"].request_count, 0);
    }

    #[test]
    fn test_serialized_keys() {
        let export = SummaryExport::from_snapshot(&MetricsSnapshot::default());
        let json = serde_json::to_value(&export).unwrap();

        assert!(json["time_patterns"]["hourly"]["0"].is_object());
        assert!(json["time_patterns"]["hourly"]["23"].is_object());
        assert!(json["time_patterns"]["daily"]["Sunday"].is_object());
        assert_eq!(json["general"]["total_batches"], 0);
    }
}
