//! Bounded-memory metrics store
//!
//! This module provides the MetricsStore, which keeps the most recent batch
//! summaries in a capacity-limited FIFO and maintains hourly, daily and
//! weekly time buckets with time-based eviction. `SharedMetricsStore` is the
//! handle cycles use to reach it concurrently.

use crate::aggregator::buckets::{
    BatchTally, DailyBucket, DayKey, HourKey, TimeBucket, WeekKey, WeeklyBucket,
};
use crate::error::MetricsError;
use crate::events::{BatchSummary, ClassLabel, PredictionOutcome, Timestamp};
use crate::resources::ResourceUsage;
use chrono::{Datelike, Duration};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Days of daily buckets kept after the latest append
pub const DAILY_RETENTION_DAYS: i64 = 7;

/// One retained batch in the history FIFO
///
/// Holding the summary together with its distribution and resource snapshot
/// keeps the per-batch series index-aligned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub summary: BatchSummary,
    /// Fraction of successful predictions per class
    pub prediction_distribution: BTreeMap<ClassLabel, f64>,
    pub resources: ResourceUsage,
}

impl HistoryEntry {
    pub fn timestamp(&self) -> Timestamp {
        self.summary.timestamp
    }
}

/// Immutable copy of the store contents for reporting
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    /// Retained batches, oldest first
    pub history: Vec<HistoryEntry>,
    pub hourly: BTreeMap<HourKey, TimeBucket>,
    pub daily: BTreeMap<DayKey, DailyBucket>,
    pub weekly: BTreeMap<WeekKey, WeeklyBucket>,
}

/// Metrics store with bounded history and multi-granularity time buckets
///
/// The history never holds more than `history_size` entries; hourly buckets
/// older than `time_window` and daily buckets older than
/// [`DAILY_RETENTION_DAYS`] are dropped after every append. Weekly buckets
/// are kept for the lifetime of the store.
#[derive(Debug)]
pub struct MetricsStore {
    history: VecDeque<HistoryEntry>,
    hourly: BTreeMap<HourKey, TimeBucket>,
    daily: BTreeMap<DayKey, DailyBucket>,
    weekly: BTreeMap<WeekKey, WeeklyBucket>,
    history_size: usize,
    time_window: Duration,
}

impl MetricsStore {
    /// Create a new MetricsStore
    ///
    /// # Arguments
    ///
    /// * `history_size` - Maximum number of batch summaries to keep
    /// * `time_window` - Retention horizon of hourly buckets
    ///
    /// # Examples
    ///
    /// ```
    /// use model_monitor::aggregator::MetricsStore;
    /// use chrono::Duration;
    ///
    /// let store = MetricsStore::new(10, Duration::hours(24));
    /// ```
    pub fn new(history_size: usize, time_window: Duration) -> Self {
        Self {
            history: VecDeque::with_capacity(history_size),
            hourly: BTreeMap::new(),
            daily: BTreeMap::new(),
            weekly: BTreeMap::new(),
            history_size,
            time_window,
        }
    }

    /// Ingest one batch
    ///
    /// Pushes the summary to the history, updates the hourly, daily and
    /// weekly buckets keyed by `summary.timestamp`, then evicts expired
    /// buckets relative to that timestamp. Malformed outcomes are counted as
    /// errors and never make the append fail.
    pub fn append(
        &mut self,
        summary: BatchSummary,
        outcomes: &[PredictionOutcome],
        resources: ResourceUsage,
    ) {
        let timestamp = summary.timestamp;
        let tally = BatchTally::from_outcomes(outcomes);
        let malformed = outcomes
            .iter()
            .filter(|o| o.success && !o.is_well_formed())
            .count();
        if malformed > 0 {
            warn!(
                "{} successful outcomes lacked a value or valid response time; counted as errors",
                malformed
            );
        }

        let hour = summary.time_context.hour as usize % 24;
        let batch_mean = summary.avg_response_time();

        self.history.push_back(HistoryEntry {
            prediction_distribution: summary.prediction_distribution(),
            resources,
            summary,
        });
        self.enforce_capacity();

        self.hourly
            .entry(HourKey::from_timestamp(timestamp))
            .or_default()
            .record(&tally);

        let daily = self
            .daily
            .entry(DayKey::from_timestamp(timestamp))
            .or_default();
        daily.bucket.record(&tally);
        daily.hourly_pattern[hour] += tally.requests;

        let day_of_week = timestamp.weekday().num_days_from_monday() as usize;
        self.weekly
            .entry(WeekKey::from_timestamp(timestamp))
            .or_default()
            .record(&tally, batch_mean, day_of_week);

        self.evict(timestamp);

        debug!(
            "Appended batch of {} outcomes; history={} hourly={} daily={} weekly={}",
            outcomes.len(),
            self.history.len(),
            self.hourly.len(),
            self.daily.len(),
            self.weekly.len()
        );
    }

    /// Drop expired hourly and daily buckets relative to `now`
    ///
    /// A bucket expires when the start of the period it covers is older than
    /// the retention horizon. Weekly buckets are never evicted.
    pub fn evict(&mut self, now: Timestamp) {
        // A cutoff before the earliest representable time keeps everything
        let hourly_cutoff = now.checked_sub_signed(self.time_window);
        let daily_cutoff = now.checked_sub_signed(Duration::days(DAILY_RETENTION_DAYS));

        let before = (self.hourly.len(), self.daily.len());
        if let Some(cutoff) = hourly_cutoff {
            self.hourly
                .retain(|key, _| key.start().is_some_and(|start| start >= cutoff));
        }
        if let Some(cutoff) = daily_cutoff {
            self.daily
                .retain(|key, _| key.start().is_some_and(|start| start >= cutoff));
        }

        let evicted_hourly = before.0 - self.hourly.len();
        let evicted_daily = before.1 - self.daily.len();
        if evicted_hourly + evicted_daily > 0 {
            debug!(
                "Evicted {} hourly and {} daily buckets",
                evicted_hourly, evicted_daily
            );
        }
    }

    /// Immutable copy of the current contents
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            history: self.history.iter().cloned().collect(),
            hourly: self.hourly.clone(),
            daily: self.daily.clone(),
            weekly: self.weekly.clone(),
        }
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Remove oldest history entries beyond capacity
    fn enforce_capacity(&mut self) {
        while self.history.len() > self.history_size {
            self.history.pop_front();
        }
    }
}

impl Default for MetricsStore {
    fn default() -> Self {
        // Default: 10 batches, 24 hour window
        Self::new(10, Duration::hours(24))
    }
}

/// Clone-able handle to a MetricsStore behind an async mutex
///
/// Append and eviction run as one critical section. Reads return an owned
/// snapshot so reporting never iterates live structures. Lock acquisition is
/// bounded by `lock_timeout`.
#[derive(Debug, Clone)]
pub struct SharedMetricsStore {
    inner: Arc<Mutex<MetricsStore>>,
    lock_timeout: std::time::Duration,
}

impl SharedMetricsStore {
    pub fn new(store: MetricsStore, lock_timeout: std::time::Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
            lock_timeout,
        }
    }

    /// Append a batch under the store lock
    pub async fn append(
        &self,
        summary: BatchSummary,
        outcomes: &[PredictionOutcome],
        resources: ResourceUsage,
    ) -> Result<(), MetricsError> {
        let mut store = self.lock().await?;
        store.append(summary, outcomes, resources);
        Ok(())
    }

    /// Read-consistent copy of the store
    pub async fn snapshot(&self) -> Result<MetricsSnapshot, MetricsError> {
        Ok(self.lock().await?.snapshot())
    }

    async fn lock(&self) -> Result<MutexGuard<'_, MetricsStore>, MetricsError> {
        tokio::time::timeout(self.lock_timeout, self.inner.lock())
            .await
            .map_err(|_| MetricsError::LockTimeout(self.lock_timeout))
    }
}


// Property-based tests
#[cfg(test)]
mod property_tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;
    use std::time::Duration as StdDuration;

    /// A sequence of batches: (minutes since start, per-outcome success flags)
    #[derive(Debug, Clone)]
    struct Batches(Vec<(i64, Vec<bool>)>);

    impl Arbitrary for Batches {
        fn arbitrary(g: &mut Gen) -> Self {
            let count = usize::arbitrary(g) % 40 + 1;
            let mut minute = 0i64;
            let batches = (0..count)
                .map(|_| {
                    // Advance between 0 and ~2 days so several buckets get evicted
                    minute += (u16::arbitrary(g) % 3000) as i64;
                    let size = usize::arbitrary(g) % 12;
                    let flags = (0..size).map(|_| bool::arbitrary(g)).collect();
                    (minute, flags)
                })
                .collect();
            Batches(batches)
        }
    }

    fn build_outcomes(timestamp: Timestamp, flags: &[bool]) -> Vec<PredictionOutcome> {
        flags
            .iter()
            .enumerate()
            .map(|(i, ok)| {
                if *ok {
                    PredictionOutcome::success((i % 3) as i64, 50.0 + i as f64, timestamp)
                } else {
                    PredictionOutcome::failure("error", 1.0, Some(500), timestamp)
                }
            })
            .collect()
    }

    #[quickcheck]
    fn prop_store_invariants_hold_after_every_append(batches: Batches, capacity: u8) -> bool {
        let capacity = (capacity % 20) as usize + 1;
        let window = Duration::hours(24);
        let mut store = MetricsStore::new(capacity, window);
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut appended = Vec::new();

        for (minute, flags) in &batches.0 {
            let timestamp = start + Duration::minutes(*minute);
            let outcomes = build_outcomes(timestamp, flags);
            let summary =
                BatchSummary::from_outcomes(timestamp, &outcomes, StdDuration::from_millis(5), 1000.0);
            store.append(summary, &outcomes, ResourceUsage::default());
            appended.push(timestamp);

            let snapshot = store.snapshot();

            // History bounded and holding the most recent entries in order
            let expected: Vec<_> = appended
                .iter()
                .rev()
                .take(capacity)
                .rev()
                .copied()
                .collect();
            let actual: Vec<_> = snapshot.history.iter().map(|e| e.timestamp()).collect();
            if actual != expected {
                return false;
            }

            // Counters consistent in every bucket
            let hourly_ok = snapshot
                .hourly
                .values()
                .all(|b| b.request_count == b.success_count + b.error_count);
            let daily_ok = snapshot
                .daily
                .values()
                .all(|b| b.bucket.request_count == b.bucket.success_count + b.bucket.error_count);
            let weekly_ok = snapshot
                .weekly
                .values()
                .all(|b| b.request_count == b.success_count + b.error_count);

            // Nothing older than the window survives
            let window_ok = snapshot
                .hourly
                .keys()
                .all(|k| k.start().is_some_and(|s| s >= timestamp - window));

            // Percentiles stay ordered for every batch with successes
            let percentiles_ok = snapshot.history.iter().all(|e| {
                e.summary
                    .response_times
                    .as_ref()
                    .map_or(true, |r| r.p50 <= r.p90 && r.p90 <= r.p95 && r.p95 <= r.p99)
            });

            if !(hourly_ok && daily_ok && weekly_ok && window_ok && percentiles_ok) {
                return false;
            }
        }

        true
    }
}
