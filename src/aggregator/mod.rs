/// Metrics store, time buckets and derived reports
pub mod buckets;
pub mod metrics_store;
pub mod summary;
pub mod trends;

pub use buckets::{DailyBucket, DayKey, HourKey, TimeBucket, WeekKey, WeeklyBucket};
pub use metrics_store::{HistoryEntry, MetricsSnapshot, MetricsStore, SharedMetricsStore};
pub use summary::SummaryExport;
pub use trends::{TrendAnalyzer, TrendReport};
