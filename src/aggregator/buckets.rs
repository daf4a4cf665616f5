//! Time-bucket keys and aggregates
//!
//! Buckets are keyed by a truncated timestamp. Keys derive `Ord` field by
//! field, so iterating a `BTreeMap` of keys walks the buckets in
//! chronological order.

use crate::events::{ClassLabel, PredictionOutcome, Timestamp};
use crate::stats;
use chrono::{Datelike, NaiveDate, TimeZone, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Key of an hourly bucket: `(year, month, day, hour)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HourKey {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
}

impl HourKey {
    pub fn from_timestamp(timestamp: Timestamp) -> Self {
        Self {
            year: timestamp.year(),
            month: timestamp.month(),
            day: timestamp.day(),
            hour: timestamp.hour(),
        }
    }

    /// Start of the hour this key covers
    pub fn start(&self) -> Option<Timestamp> {
        Utc.with_ymd_and_hms(self.year, self.month, self.day, self.hour, 0, 0)
            .single()
    }
}

impl fmt::Display for HourKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}-{:02}",
            self.year, self.month, self.day, self.hour
        )
    }
}

/// Key of a daily bucket: `(year, month, day)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DayKey {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl DayKey {
    pub fn from_timestamp(timestamp: Timestamp) -> Self {
        Self {
            year: timestamp.year(),
            month: timestamp.month(),
            day: timestamp.day(),
        }
    }

    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
    }

    /// Midnight (UTC) at the start of this day
    pub fn start(&self) -> Option<Timestamp> {
        Utc.with_ymd_and_hms(self.year, self.month, self.day, 0, 0, 0)
            .single()
    }

    pub fn weekday(&self) -> Option<Weekday> {
        self.date().map(|date| date.weekday())
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// Key of a weekly bucket: `(ISO year, ISO week)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WeekKey {
    pub iso_year: i32,
    pub iso_week: u32,
}

impl WeekKey {
    pub fn from_timestamp(timestamp: Timestamp) -> Self {
        let week = timestamp.iso_week();
        Self {
            iso_year: week.year(),
            iso_week: week.week(),
        }
    }
}

impl fmt::Display for WeekKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-W{:02}", self.iso_year, self.iso_week)
    }
}

/// Counts derived once from a batch of outcomes and applied to every bucket
///
/// Well-formed successes contribute their response time and class; every
/// other outcome is an error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchTally {
    pub requests: u64,
    pub successes: u64,
    pub errors: u64,
    pub response_times: Vec<f64>,
    pub prediction_counts: BTreeMap<ClassLabel, u64>,
}

impl BatchTally {
    pub fn from_outcomes(outcomes: &[PredictionOutcome]) -> Self {
        let mut tally = Self {
            requests: outcomes.len() as u64,
            ..Default::default()
        };

        for outcome in outcomes {
            match outcome.accepted() {
                Some((value, response_time)) => {
                    tally.successes += 1;
                    tally.response_times.push(response_time);
                    *tally.prediction_counts.entry(value).or_insert(0) += 1;
                }
                None => tally.errors += 1,
            }
        }

        tally
    }
}

/// Aggregate for one hour (and the base of the daily aggregate)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeBucket {
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    /// Every successful response time attributed to the bucket, in arrival order
    pub response_times: Vec<f64>,
    pub prediction_counts: BTreeMap<ClassLabel, u64>,
}

impl TimeBucket {
    pub fn record(&mut self, tally: &BatchTally) {
        self.request_count += tally.requests;
        self.success_count += tally.successes;
        self.error_count += tally.errors;
        self.response_times.extend_from_slice(&tally.response_times);
        for (class, count) in &tally.prediction_counts {
            *self.prediction_counts.entry(*class).or_insert(0) += count;
        }
    }

    pub fn avg_response_time(&self) -> Option<f64> {
        stats::mean(&self.response_times)
    }

    /// Success rate in percent, `None` without requests
    pub fn success_rate(&self) -> Option<f64> {
        if self.request_count == 0 {
            return None;
        }
        Some(self.success_count as f64 / self.request_count as f64 * 100.0)
    }
}

/// Aggregate for one calendar day
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyBucket {
    #[serde(flatten)]
    pub bucket: TimeBucket,
    /// Requests per hour of day
    pub hourly_pattern: [u64; 24],
}

/// Aggregate for one ISO week
///
/// Keeps one mean response time per batch instead of raw samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeeklyBucket {
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub avg_response_times: Vec<f64>,
    /// Requests per day of week, Monday = 0
    pub daily_pattern: [u64; 7],
}

impl WeeklyBucket {
    pub fn record(&mut self, tally: &BatchTally, batch_mean: Option<f64>, day_of_week: usize) {
        self.request_count += tally.requests;
        self.success_count += tally.successes;
        self.error_count += tally.errors;
        if let Some(mean) = batch_mean {
            self.avg_response_times.push(mean);
        }
        self.daily_pattern[day_of_week.min(6)] += tally.requests;
    }

    pub fn avg_response_time(&self) -> Option<f64> {
        stats::mean(&self.avg_response_times)
    }
}
