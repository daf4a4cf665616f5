//! Monitoring and drift cycles
//!
//! A cycle is one end-to-end pass over the endpoint. External failures
//! become failed outcomes or skipped cycles; tracker errors are logged
//! and dropped.

use crate::aggregator::{MetricsSnapshot, SharedMetricsStore, SummaryExport, TrendAnalyzer, TrendReport};
use crate::config::Config;
use crate::drift::{DriftDetector, DriftOutcome, DriftReport, ReferenceDataset, ReferenceDatasetManager};
use crate::error::CycleError;
use crate::events::{BatchSummary, ClassLabel, PredictionOutcome, Timestamp};
use crate::predictor::{predict_batch, predict_concurrent, FeatureGenerator, HealthStatus, Predictor};
use crate::reporting::{RunStatus, SummaryExporter, TrackedRun, Tracker};
use crate::resources::{ResourceSampler, ResourceUsage};
use chrono::{Datelike, Timelike, Utc};
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// How a cycle ended when it did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed,
    Skipped { reason: String },
}

/// Trait for units of work driven by the scheduler
pub trait Cycle: Send + Sync {
    fn name(&self) -> &str;

    fn run<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<CycleOutcome, CycleError>> + Send + 'a>>;

    /// Called once when the scheduler stops
    fn finish<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async {})
    }
}

/// Run a cycle, failing with `DeadlineExceeded` if it takes longer than `deadline`
pub async fn run_with_deadline(
    cycle: &dyn Cycle,
    deadline: Duration,
) -> Result<CycleOutcome, CycleError> {
    match tokio::time::timeout(deadline, cycle.run()).await {
        Ok(result) => result,
        Err(_) => Err(CycleError::DeadlineExceeded(deadline)),
    }
}

/// Settings of the monitoring cycle
#[derive(Debug, Clone)]
pub struct MonitoringSettings {
    pub batch_size: usize,
    pub max_response_time_ms: f64,
    pub export_every: usize,
    pub interval: Duration,
    pub positive_class: ClassLabel,
    pub experiment: String,
}

impl MonitoringSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.monitoring.batch_size,
            max_response_time_ms: config.monitoring.max_response_time_ms,
            export_every: config.monitoring.export_every.max(1),
            interval: config.monitoring.interval(),
            positive_class: config.drift.positive_class,
            experiment: config.tracker.monitoring_experiment.clone(),
        }
    }
}

/// Sends one synthetic batch to the endpoint and records the results
pub struct MonitoringCycle {
    predictor: Arc<dyn Predictor>,
    generator: Arc<dyn FeatureGenerator>,
    store: SharedMetricsStore,
    tracker: Arc<dyn Tracker>,
    exporter: SummaryExporter,
    sampler: ResourceSampler,
    settings: MonitoringSettings,
    batches: AtomicUsize,
}

impl MonitoringCycle {
    pub fn new(
        predictor: Arc<dyn Predictor>,
        generator: Arc<dyn FeatureGenerator>,
        store: SharedMetricsStore,
        tracker: Arc<dyn Tracker>,
        exporter: SummaryExporter,
        settings: MonitoringSettings,
    ) -> Self {
        Self {
            predictor,
            generator,
            store,
            tracker,
            exporter,
            sampler: ResourceSampler::new(),
            settings,
            batches: AtomicUsize::new(0),
        }
    }

    /// Completed batches since start
    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    /// Write the summary export from the current store contents
    pub async fn export_summary(&self) -> Result<(), CycleError> {
        let snapshot = self.store.snapshot().await?;
        if let Err(e) = self.exporter.write(&SummaryExport::from_snapshot(&snapshot)) {
            error!(
                "Failed to export time metrics summary to {}: {}",
                self.exporter.path().display(),
                e
            );
        }
        Ok(())
    }

    async fn run_batch(&self) -> Result<CycleOutcome, CycleError> {
        let started_at = Utc::now();
        let resources = self.sampler.sample();

        let health = self.predictor.health().await;
        if !health.healthy {
            warn!(
                "Model endpoint unhealthy (status {:?}): {}",
                health.status_code,
                health.error.as_deref().unwrap_or("unknown error")
            );
            self.report_unhealthy(&health, started_at, &resources).await;
            return Ok(CycleOutcome::Skipped {
                reason: "model endpoint unhealthy".to_string(),
            });
        }

        let rows = self.generator.generate(self.settings.batch_size);
        let batch_started = Instant::now();
        let outcomes = predict_batch(self.predictor.as_ref(), &rows).await;
        let batch_duration = batch_started.elapsed();

        let summary = BatchSummary::from_outcomes(
            Utc::now(),
            &outcomes,
            batch_duration,
            self.settings.max_response_time_ms,
        );

        self.store
            .append(summary.clone(), &outcomes, resources)
            .await?;
        let snapshot = self.store.snapshot().await?;
        let trends = TrendAnalyzer::new().compute(&snapshot);

        let run_name = format!("monitor-batch-{}", summary.timestamp.format("%Y%m%d-%H%M%S"));
        let run = TrackedRun::start(Arc::clone(&self.tracker), &self.settings.experiment, &run_name).await;
        run.log_metrics(&batch_metrics(
            &summary,
            &resources,
            &trends,
            &snapshot,
            self.settings.positive_class,
        ))
        .await;

        let batch_number = self.batches.fetch_add(1, Ordering::SeqCst) + 1;
        run.log_params(&batch_params(&summary, batch_number, &self.settings))
            .await;
        run.finish(RunStatus::Finished).await;

        if batch_number % self.settings.export_every == 0 {
            if let Err(e) = self.exporter.write(&SummaryExport::from_snapshot(&snapshot)) {
                error!("Failed to export time metrics summary: {}", e);
            }
        }

        log_batch(&summary, &trends);
        Ok(CycleOutcome::Completed)
    }

    async fn report_unhealthy(&self, health: &HealthStatus, at: Timestamp, resources: &ResourceUsage) {
        let run = TrackedRun::start(
            Arc::clone(&self.tracker),
            &self.settings.experiment,
            "model-health-alert",
        )
        .await;

        run.log_params(&[
            ("error_timestamp".to_string(), at.to_rfc3339()),
            (
                "error_message".to_string(),
                health.error.clone().unwrap_or_else(|| "Unknown error".to_string()),
            ),
        ])
        .await;

        let mut metrics = vec![
            ("health_status".to_string(), 0.0),
            (
                "status_code".to_string(),
                f64::from(health.status_code.unwrap_or(500)),
            ),
            ("time.hour".to_string(), f64::from(at.hour())),
            (
                "time.day_of_week".to_string(),
                f64::from(at.weekday().num_days_from_monday()),
            ),
            ("time.day".to_string(), f64::from(at.day())),
            ("time.month".to_string(), f64::from(at.month())),
        ];
        metrics.extend(system_metrics(resources));
        run.log_metrics(&metrics).await;
        run.finish(RunStatus::Finished).await;
    }
}

impl Cycle for MonitoringCycle {
    fn name(&self) -> &str {
        "monitoring"
    }

    fn run<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<CycleOutcome, CycleError>> + Send + 'a>> {
        Box::pin(self.run_batch())
    }

    fn finish<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if self.batches() == 0 {
                return;
            }
            info!("Writing final time metrics summary");
            if let Err(e) = self.export_summary().await {
                error!("Final summary export failed: {}", e);
            }
        })
    }
}

fn system_metrics(resources: &ResourceUsage) -> Vec<(String, f64)> {
    vec![
        ("system.memory_rss_mb".to_string(), resources.memory_rss_mb()),
        ("system.cpu_user_seconds".to_string(), resources.cpu_user_seconds),
        ("system.cpu_system_seconds".to_string(), resources.cpu_system_seconds),
    ]
}

/// Detailed metrics reported for one batch
pub fn batch_metrics(
    summary: &BatchSummary,
    resources: &ResourceUsage,
    trends: &TrendReport,
    snapshot: &MetricsSnapshot,
    positive_class: ClassLabel,
) -> Vec<(String, f64)> {
    let ctx = &summary.time_context;
    let ts = summary.timestamp;
    let flag = |b: bool| if b { 1.0 } else { 0.0 };

    let mut metrics: Vec<(String, f64)> = vec![
        ("batch_size".into(), summary.batch_size as f64),
        ("errors".into(), summary.errors as f64),
        ("success_rate".into(), summary.success_rate),
        ("batch_duration".into(), summary.batch_duration_ms),
        ("batch_throughput".into(), summary.throughput),
        ("hour_of_day".into(), f64::from(ctx.hour)),
        ("day_of_week".into(), f64::from(ctx.day_of_week)),
        ("is_business_hours".into(), flag(ctx.is_business_hours)),
        ("is_weekend".into(), flag(ctx.is_weekend)),
        ("time.epoch".into(), ts.timestamp_millis() as f64 / 1000.0),
        ("time.hour".into(), f64::from(ctx.hour)),
        ("time.minute".into(), f64::from(ts.minute())),
        ("time.day_of_week".into(), f64::from(ctx.day_of_week)),
        ("time.day_of_month".into(), f64::from(ts.day())),
        ("time.month".into(), f64::from(ts.month())),
        ("time.is_weekend".into(), flag(ctx.is_weekend)),
        ("time.is_business_hours".into(), flag(ctx.is_business_hours)),
        ("time.quarter_of_day".into(), f64::from(ctx.quarter_of_day())),
    ];

    if let Some(rt) = &summary.response_times {
        let in_sla = 100.0 - rt.sla_breach_pct;
        metrics.extend([
            ("avg_response_time".into(), rt.mean),
            ("max_response_time".into(), rt.max),
            ("min_response_time".into(), rt.min),
            ("median_response_time".into(), rt.p50),
            ("p95_response_time".into(), rt.p95),
            ("p99_response_time".into(), rt.p99),
            ("response_time_p50".into(), rt.p50),
            ("response_time_p90".into(), rt.p90),
            ("response_time_p95".into(), rt.p95),
            ("response_time_p99".into(), rt.p99),
            ("response_time_std".into(), rt.std_dev),
            ("response_time_iqr".into(), rt.iqr),
            ("response_time_sla_breaches".into(), rt.sla_breaches as f64),
            ("response_time_sla_breach_pct".into(), rt.sla_breach_pct),
            ("response_time_in_sla_pct".into(), in_sla),
            (format!("time.hour_{}.avg_response_time", ctx.hour), rt.mean),
            (format!("time.day_{}.avg_response_time", ctx.day_of_week), rt.mean),
            (
                format!("time.quarter_{}.avg_response_time", ctx.quarter_of_day()),
                rt.mean,
            ),
        ]);
    }

    let batch_size = summary.batch_size.max(1) as f64;
    for (class, count) in &summary.prediction_counts {
        metrics.push((format!("predict_{}_count", class), *count as f64));
        metrics.push((format!("predict_{}_pct", class), *count as f64 / batch_size * 100.0));
    }

    let predicted: usize = summary.prediction_counts.values().sum();
    if predicted > 0 {
        let positives = summary
            .prediction_counts
            .get(&positive_class)
            .copied()
            .unwrap_or(0);
        let rate = positives as f64 / predicted as f64 * 100.0;
        metrics.push((format!("time.hour_{}.churn_rate", ctx.hour), rate));
        metrics.push((format!("time.day_{}.churn_rate", ctx.day_of_week), rate));
    }

    metrics.extend(system_metrics(resources));

    metrics.extend(
        trends
            .metrics()
            .into_iter()
            .map(|(name, value)| (format!("trend.{}", name), value)),
    );

    // Most recent bucket wins when an hour of day repeats across days
    let mut hourly_means = BTreeMap::new();
    for (key, bucket) in &snapshot.hourly {
        if let Some(mean) = bucket.avg_response_time() {
            hourly_means.insert(key.hour, mean);
        }
    }
    metrics.extend(
        hourly_means
            .into_iter()
            .map(|(hour, mean)| (format!("time_series.hour_{}.avg_response_time", hour), mean)),
    );

    metrics
}

fn batch_params(
    summary: &BatchSummary,
    batch_number: usize,
    settings: &MonitoringSettings,
) -> Vec<(String, String)> {
    let ts = summary.timestamp;
    vec![
        (
            "batch_id".to_string(),
            format!("{}-{}", ts.timestamp_millis(), batch_number),
        ),
        ("batch_timestamp".to_string(), ts.to_rfc3339()),
        ("batch_time_hour".to_string(), ts.hour().to_string()),
        ("batch_time_day".to_string(), ts.day().to_string()),
        (
            "batch_time_weekday".to_string(),
            summary.time_context.day_of_week.to_string(),
        ),
        ("batch_size".to_string(), settings.batch_size.to_string()),
        (
            "monitoring_interval_seconds".to_string(),
            settings.interval.as_secs().to_string(),
        ),
    ]
}

fn log_batch(summary: &BatchSummary, trends: &TrendReport) {
    match summary.avg_response_time() {
        Some(avg) => info!(
            "Batch done: avg response {:.2} ms, duration {:.2} ms, throughput {:.2} req/s, success {:.2}%",
            avg, summary.batch_duration_ms, summary.throughput, summary.success_rate
        ),
        None => info!(
            "Batch done: no successful responses, duration {:.2} ms, success {:.2}%",
            summary.batch_duration_ms, summary.success_rate
        ),
    }
    info!(
        "Prediction counts: {:?}; hour {:02}:00, weekday {}, business hours: {}",
        summary.prediction_counts,
        summary.time_context.hour,
        summary.time_context.day_of_week,
        summary.time_context.is_business_hours
    );
    for (name, value) in trends.metrics() {
        debug!("Trend {}: {:.4}", name, value);
    }
}

/// Settings of the drift cycle
#[derive(Debug, Clone)]
pub struct DriftSettings {
    pub reference_size: usize,
    pub current_size: usize,
    pub experiment: String,
    pub model_name: String,
    pub endpoint: String,
    /// Prediction requests in flight at once
    pub concurrency: usize,
}

impl DriftSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            reference_size: config.drift.reference_data_size,
            current_size: config.drift.current_data_size,
            experiment: config.tracker.drift_experiment.clone(),
            model_name: config.predictor.model_name.clone(),
            endpoint: config.predictor.endpoint.clone(),
            concurrency: config.drift.max_concurrency,
        }
    }
}

type CachedPredictions = (Arc<ReferenceDataset>, Arc<Vec<PredictionOutcome>>);

/// Compares live model inputs against the reference dataset
pub struct DriftCycle {
    predictor: Arc<dyn Predictor>,
    generator: Arc<dyn FeatureGenerator>,
    reference: Arc<ReferenceDatasetManager>,
    detector: DriftDetector,
    tracker: Arc<dyn Tracker>,
    settings: DriftSettings,
    reference_predictions: Mutex<Option<CachedPredictions>>,
}

impl DriftCycle {
    pub fn new(
        predictor: Arc<dyn Predictor>,
        generator: Arc<dyn FeatureGenerator>,
        reference: Arc<ReferenceDatasetManager>,
        detector: DriftDetector,
        tracker: Arc<dyn Tracker>,
        settings: DriftSettings,
    ) -> Self {
        Self {
            predictor,
            generator,
            reference,
            detector,
            tracker,
            settings,
            reference_predictions: Mutex::new(None),
        }
    }

    async fn detect(&self) -> Result<CycleOutcome, CycleError> {
        info!("Starting drift detection");
        let health = self.predictor.health().await;
        if !health.healthy {
            warn!(
                "Skipping drift detection, model endpoint unhealthy: {}",
                health.error.as_deref().unwrap_or("unknown error")
            );
            return Ok(CycleOutcome::Skipped {
                reason: "model endpoint unhealthy".to_string(),
            });
        }

        let manager = Arc::clone(&self.reference);
        let size = self.settings.reference_size;
        let reference = tokio::task::spawn_blocking(move || manager.get_or_create(size)).await??;
        let current = self.generator.generate(self.settings.current_size);

        let reference_predictions = self.reference_predictions(&reference).await;
        let current_predictions = predict_concurrent(
            Arc::clone(&self.predictor),
            &current,
            self.settings.concurrency,
        )
        .await;

        let report = match self.detector.compare(
            &reference.features,
            &current,
            &reference_predictions,
            &current_predictions,
        ) {
            DriftOutcome::Completed(report) => report,
            DriftOutcome::Skipped { reason } => return Ok(CycleOutcome::Skipped { reason }),
        };

        self.report(&report).await;
        log_drift(&report);
        Ok(CycleOutcome::Completed)
    }

    /// Predictions for `reference`, reused while the dataset is unchanged
    ///
    /// Only a fully successful batch is kept, so failed requests are retried
    /// on the next run.
    async fn reference_predictions(
        &self,
        reference: &Arc<ReferenceDataset>,
    ) -> Arc<Vec<PredictionOutcome>> {
        if let Some((dataset, predictions)) = self
            .reference_predictions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
        {
            if Arc::ptr_eq(dataset, reference) {
                debug!("Reusing {} reference predictions", predictions.len());
                return Arc::clone(predictions);
            }
        }

        let predictions = Arc::new(
            predict_concurrent(
                Arc::clone(&self.predictor),
                &reference.features,
                self.settings.concurrency,
            )
            .await,
        );
        if predictions.iter().all(|p| p.success) {
            *self
                .reference_predictions
                .lock()
                .unwrap_or_else(|p| p.into_inner()) =
                Some((Arc::clone(reference), Arc::clone(&predictions)));
        }
        predictions
    }

    async fn report(&self, report: &DriftReport) {
        let now = Utc::now();
        let run_name = format!("drift-detection-{}", now.format("%Y%m%d-%H%M%S"));
        let run = TrackedRun::start(Arc::clone(&self.tracker), &self.settings.experiment, &run_name).await;

        let mut metrics = report.metrics();
        metrics.push(("timestamp".to_string(), now.timestamp_millis() as f64 / 1000.0));
        run.log_metrics(&metrics).await;

        let mut params = vec![
            ("model_name".to_string(), self.settings.model_name.clone()),
            ("endpoint".to_string(), self.settings.endpoint.clone()),
            ("drift_detection_time".to_string(), now.to_rfc3339()),
            (
                "psi_threshold".to_string(),
                self.detector.psi_threshold().to_string(),
            ),
            (
                "ks_threshold".to_string(),
                self.detector.ks_threshold().to_string(),
            ),
        ];
        if !report.skipped_features.is_empty() {
            params.push((
                "skipped_features".to_string(),
                report.skipped_features.join(","),
            ));
        }
        run.log_params(&params).await;
        run.finish(RunStatus::Finished).await;
    }
}

impl Cycle for DriftCycle {
    fn name(&self) -> &str {
        "drift"
    }

    fn run<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<CycleOutcome, CycleError>> + Send + 'a>> {
        Box::pin(self.detect())
    }
}

fn log_drift(report: &DriftReport) {
    info!("Drift detection finished");
    if let (Some(reference), Some(current), Some(diff)) = (
        report.reference_positive_rate,
        report.current_positive_rate,
        report.positive_rate_diff,
    ) {
        info!(
            "Positive prediction rate: reference {:.2}%, current {:.2}%, difference {:.2}%",
            reference * 100.0,
            current * 100.0,
            diff * 100.0
        );
    }

    let drifted = report.drifted_features();
    if drifted.is_empty() {
        info!("No drift detected in any feature");
    } else {
        warn!("Drift detected in features: {}", drifted.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::MetricsStore;
    use crate::predictor::{FeatureRange, MockPredictor, UniformFeatureGenerator};
    use crate::reporting::MockTracker;
    use crate::storage::{InMemoryObjectStore, ObjectStore};
    use tempfile::TempDir;

    fn settings(export_every: usize) -> MonitoringSettings {
        MonitoringSettings {
            batch_size: 10,
            max_response_time_ms: 1000.0,
            export_every,
            interval: Duration::from_secs(6),
            positive_class: 1,
            experiment: "monitoring".to_string(),
        }
    }

    fn store() -> SharedMetricsStore {
        SharedMetricsStore::new(
            MetricsStore::new(10, chrono::Duration::hours(24)),
            Duration::from_secs(1),
        )
    }

    fn generator() -> Arc<dyn FeatureGenerator> {
        Arc::new(UniformFeatureGenerator::bank_churn().with_seed(3))
    }

    fn monitoring_cycle(
        predictor: MockPredictor,
        tracker: &MockTracker,
        store: SharedMetricsStore,
        export_path: std::path::PathBuf,
        export_every: usize,
    ) -> MonitoringCycle {
        MonitoringCycle::new(
            Arc::new(predictor),
            generator(),
            store,
            Arc::new(tracker.clone()),
            SummaryExporter::new(export_path),
            settings(export_every),
        )
    }

    #[tokio::test]
    async fn test_monitoring_cycle_records_batch() {
        let dir = TempDir::new().unwrap();
        let tracker = MockTracker::new();
        let predictor = MockPredictor::with_script(vec![
            Ok(1), Ok(0), Ok(0), Ok(0), Ok(1), Ok(0), Ok(0),
            Err("boom".to_string()), Err("boom".to_string()), Err("boom".to_string()),
        ])
        .with_response_time(20.0);
        let shared = store();
        let cycle = monitoring_cycle(
            predictor.clone(),
            &tracker,
            shared.clone(),
            dir.path().join("summary.json"),
            5,
        );

        let outcome = cycle.run().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Completed);
        assert_eq!(predictor.call_count(), 10);
        assert_eq!(cycle.batches(), 1);

        let snapshot = shared.snapshot().await.unwrap();
        assert_eq!(snapshot.history.len(), 1);
        assert_eq!(snapshot.history[0].summary.success_rate, 70.0);

        let runs = tracker.runs();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].name.starts_with("monitor-batch-"));
        assert_eq!(runs[0].status, Some(RunStatus::Finished));
        assert_eq!(runs[0].metric("success_rate"), Some(70.0));
        assert_eq!(runs[0].metric("predict_1_count"), Some(2.0));
        assert_eq!(runs[0].metric("avg_response_time"), Some(20.0));
        assert_eq!(runs[0].param("batch_size"), Some("10"));

        // Export only every 5th batch
        assert!(!dir.path().join("summary.json").exists());
    }

    #[tokio::test]
    async fn test_monitoring_cycle_exports_every_n_batches() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("summary.json");
        let tracker = MockTracker::new();
        let cycle = monitoring_cycle(MockPredictor::constant(0), &tracker, store(), path.clone(), 2);

        cycle.run().await.unwrap();
        assert!(!path.exists());
        cycle.run().await.unwrap();
        assert!(path.exists());

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["general"]["total_batches"], 2);
    }

    #[tokio::test]
    async fn test_finish_flushes_export() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("summary.json");
        let tracker = MockTracker::new();
        let cycle = monitoring_cycle(MockPredictor::constant(1), &tracker, store(), path.clone(), 5);

        // Nothing recorded, nothing written
        cycle.finish().await;
        assert!(!path.exists());

        cycle.run().await.unwrap();
        cycle.finish().await;
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_unhealthy_endpoint_skips_batch() {
        let dir = TempDir::new().unwrap();
        let tracker = MockTracker::new();
        let predictor = MockPredictor::constant(1).unhealthy();
        let shared = store();
        let cycle = monitoring_cycle(
            predictor.clone(),
            &tracker,
            shared.clone(),
            dir.path().join("summary.json"),
            1,
        );

        let outcome = cycle.run().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Skipped { .. }));
        assert_eq!(predictor.call_count(), 0);
        assert!(shared.snapshot().await.unwrap().history.is_empty());

        let runs = tracker.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].name, "model-health-alert");
        assert_eq!(runs[0].metric("health_status"), Some(0.0));
        assert_eq!(runs[0].metric("status_code"), Some(503.0));
    }

    #[tokio::test]
    async fn test_tracker_failure_does_not_fail_cycle() {
        let dir = TempDir::new().unwrap();
        let cycle = MonitoringCycle::new(
            Arc::new(MockPredictor::constant(0)),
            generator(),
            store(),
            Arc::new(MockTracker::failing()),
            SummaryExporter::new(dir.path().join("summary.json")),
            settings(1),
        );

        assert_eq!(cycle.run().await.unwrap(), CycleOutcome::Completed);
        assert!(dir.path().join("summary.json").exists());
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let dir = TempDir::new().unwrap();
        let tracker = MockTracker::new();
        let predictor = MockPredictor::constant(0).with_delay(Duration::from_millis(200));
        let cycle = monitoring_cycle(predictor, &tracker, store(), dir.path().join("s.json"), 1);

        let result = run_with_deadline(&cycle, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(CycleError::DeadlineExceeded(_))));
    }

    #[test]
    fn test_batch_metrics_contents() {
        let ts = chrono::TimeZone::with_ymd_and_hms(&Utc, 2024, 6, 15, 14, 5, 0).unwrap();
        let outcomes = vec![
            crate::events::PredictionOutcome::success(1, 100.0, ts),
            crate::events::PredictionOutcome::success(0, 300.0, ts),
        ];
        let summary = BatchSummary::from_outcomes(ts, &outcomes, Duration::from_secs(1), 250.0);
        let mut store = MetricsStore::default();
        store.append(summary.clone(), &outcomes, ResourceUsage::default());

        let metrics: BTreeMap<String, f64> = batch_metrics(
            &summary,
            &ResourceUsage::default(),
            &TrendReport::default(),
            &store.snapshot(),
            1,
        )
        .into_iter()
        .collect();

        assert_eq!(metrics["avg_response_time"], 200.0);
        assert_eq!(metrics["response_time_sla_breaches"], 1.0);
        assert_eq!(metrics["response_time_in_sla_pct"], 50.0);
        assert_eq!(metrics["time.hour_14.avg_response_time"], 200.0);
        assert_eq!(metrics["time.hour_14.churn_rate"], 50.0);
        assert_eq!(metrics["time.quarter_of_day"], 2.0);
        assert_eq!(metrics["time.is_weekend"], 1.0);
        assert_eq!(metrics["predict_0_pct"], 50.0);
        assert_eq!(metrics["time_series.hour_14.avg_response_time"], 200.0);
        assert!(!metrics.keys().any(|k| k.starts_with("trend.")));
    }

    fn drift_cycle(
        predictor: MockPredictor,
        generator: Arc<dyn FeatureGenerator>,
        store: Arc<InMemoryObjectStore>,
        tracker: &MockTracker,
    ) -> DriftCycle {
        let reference = Arc::new(ReferenceDatasetManager::new(
            store,
            Arc::clone(&generator),
            "reference_data.json",
        ));
        DriftCycle::new(
            Arc::new(predictor),
            generator,
            reference,
            DriftDetector::new(0.2, 0.1),
            Arc::new(tracker.clone()),
            DriftSettings {
                reference_size: 100,
                current_size: 50,
                experiment: "drift".to_string(),
                model_name: "bankchurn".to_string(),
                endpoint: "http://localhost:8085".to_string(),
                concurrency: 4,
            },
        )
    }

    #[tokio::test]
    async fn test_drift_cycle_reports_every_feature() {
        let tracker = MockTracker::new();
        let objects = Arc::new(InMemoryObjectStore::new());
        let cycle = drift_cycle(
            MockPredictor::with_script(vec![Ok(1), Ok(0)]),
            generator(),
            objects.clone(),
            &tracker,
        );

        assert_eq!(cycle.run().await.unwrap(), CycleOutcome::Completed);
        assert!(objects.get("reference_data.json").is_ok());

        let runs = tracker.runs();
        assert_eq!(runs.len(), 1);
        let run = &runs[0];
        assert_eq!(run.experiment, "drift");
        assert_eq!(run.metric("reference_data_size"), Some(100.0));
        assert_eq!(run.metric("current_data_size"), Some(50.0));
        assert_eq!(run.metric("reference_positive_rate"), Some(0.5));
        for feature in ["CreditScore", "Age", "EstimatedSalary"] {
            assert!(run.metric(&format!("{}_psi", feature)).is_some());
            assert!(run.metric(&format!("{}_ks_pvalue", feature)).is_some());
        }
        assert_eq!(run.param("psi_threshold"), Some("0.2"));
        assert_eq!(run.status, Some(RunStatus::Finished));
    }

    #[tokio::test]
    async fn test_drift_cycle_skips_empty_current_sample() {
        let tracker = MockTracker::new();
        let generator: Arc<dyn FeatureGenerator> =
            Arc::new(UniformFeatureGenerator::new(vec![FeatureRange::new("Age", 18, 95)]));
        let mut cycle = drift_cycle(
            MockPredictor::constant(0),
            generator,
            Arc::new(InMemoryObjectStore::new()),
            &tracker,
        );
        cycle.settings.current_size = 0;

        let outcome = cycle.run().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Skipped { .. }));
        assert!(tracker.runs().is_empty());
    }

    #[tokio::test]
    async fn test_drift_cycle_skips_unhealthy_endpoint() {
        let tracker = MockTracker::new();
        let predictor = MockPredictor::constant(1).unhealthy();
        let objects = Arc::new(InMemoryObjectStore::new());
        let cycle = drift_cycle(predictor.clone(), generator(), objects.clone(), &tracker);

        assert_eq!(
            cycle.run().await.unwrap(),
            CycleOutcome::Skipped {
                reason: "model endpoint unhealthy".to_string()
            }
        );
        assert_eq!(predictor.call_count(), 0);
        assert!(objects.get("reference_data.json").is_err());
        assert!(tracker.runs().is_empty());
    }

    #[tokio::test]
    async fn test_slow_endpoint_finishes_within_deadline() {
        let tracker = MockTracker::new();
        let predictor = MockPredictor::with_script(vec![Ok(1), Ok(0)])
            .with_delay(Duration::from_millis(50));
        let mut cycle = drift_cycle(
            predictor.clone(),
            generator(),
            Arc::new(InMemoryObjectStore::new()),
            &tracker,
        );
        cycle.settings.concurrency = 25;

        // 150 requests one at a time would need 7.5s
        let outcome = run_with_deadline(&cycle, Duration::from_secs(2)).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Completed);
        assert_eq!(predictor.call_count(), 150);
        assert_eq!(tracker.runs().len(), 1);
    }

    #[tokio::test]
    async fn test_reference_predictions_are_reused() {
        let tracker = MockTracker::new();
        let predictor = MockPredictor::constant(1);
        let cycle = drift_cycle(
            predictor.clone(),
            generator(),
            Arc::new(InMemoryObjectStore::new()),
            &tracker,
        );

        assert_eq!(cycle.run().await.unwrap(), CycleOutcome::Completed);
        assert_eq!(predictor.call_count(), 150);
        assert_eq!(cycle.run().await.unwrap(), CycleOutcome::Completed);
        assert_eq!(predictor.call_count(), 200);

        let runs = tracker.runs();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[1].metric("reference_positive_rate"), Some(1.0));
    }

    #[tokio::test]
    async fn test_failed_reference_predictions_are_retried() {
        let tracker = MockTracker::new();
        let predictor = MockPredictor::with_script(vec![Ok(1), Err("timeout".to_string())]);
        let cycle = drift_cycle(
            predictor.clone(),
            generator(),
            Arc::new(InMemoryObjectStore::new()),
            &tracker,
        );

        cycle.run().await.unwrap();
        cycle.run().await.unwrap();
        assert_eq!(predictor.call_count(), 300);
    }
}
