//! Experiment tracking backends
//!
//! Cycles report their metrics and parameters as tracking runs. Reporting is
//! always best effort: backend failures are logged and never abort a cycle.

use crate::error::TrackerError;
use chrono::Utc;
use log::{debug, error, info, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type RunId = String;

/// Boxed future returned by tracker operations
pub type TrackerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TrackerError>> + Send + 'a>>;

/// Terminal state of a tracking run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Finished,
    Failed,
    Killed,
}

impl RunStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Finished => "FINISHED",
            RunStatus::Failed => "FAILED",
            RunStatus::Killed => "KILLED",
        }
    }
}

/// Trait for tracking backend implementations
pub trait Tracker: Send + Sync {
    fn start_run<'a>(&'a self, experiment: &'a str, run_name: &'a str) -> TrackerFuture<'a, RunId>;

    fn log_metrics<'a>(&'a self, run: &'a str, metrics: &'a [(String, f64)]) -> TrackerFuture<'a, ()>;

    fn log_params<'a>(&'a self, run: &'a str, params: &'a [(String, String)]) -> TrackerFuture<'a, ()>;

    fn end_run<'a>(&'a self, run: &'a str, status: RunStatus) -> TrackerFuture<'a, ()>;
}

/// Drop metrics that are NaN or infinite
pub fn finite_metrics(metrics: &[(String, f64)]) -> Vec<(String, f64)> {
    metrics
        .iter()
        .filter(|(_, value)| value.is_finite())
        .cloned()
        .collect()
}

/// Scoped handle to one tracking run
///
/// Every operation logs and swallows backend errors. If the run could not
/// be started the handle is inert. A handle dropped without [`finish`]
/// ends its run as `Failed` on the current runtime.
///
/// [`finish`]: TrackedRun::finish
pub struct TrackedRun {
    tracker: Arc<dyn Tracker>,
    run_id: Option<RunId>,
}

impl TrackedRun {
    pub async fn start(tracker: Arc<dyn Tracker>, experiment: &str, run_name: &str) -> Self {
        let run_id = match tracker.start_run(experiment, run_name).await {
            Ok(id) => {
                debug!("Started tracking run '{}' ({}) in '{}'", run_name, id, experiment);
                Some(id)
            }
            Err(e) => {
                error!("Failed to start tracking run '{}': {}", run_name, e);
                None
            }
        };

        Self { tracker, run_id }
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub async fn log_metrics(&self, metrics: &[(String, f64)]) {
        let Some(run_id) = &self.run_id else {
            return;
        };
        let metrics = finite_metrics(metrics);
        if metrics.is_empty() {
            return;
        }
        if let Err(e) = self.tracker.log_metrics(run_id, &metrics).await {
            error!("Failed to log {} metrics to run {}: {}", metrics.len(), run_id, e);
        }
    }

    pub async fn log_params(&self, params: &[(String, String)]) {
        let Some(run_id) = &self.run_id else {
            return;
        };
        if params.is_empty() {
            return;
        }
        if let Err(e) = self.tracker.log_params(run_id, params).await {
            error!("Failed to log {} params to run {}: {}", params.len(), run_id, e);
        }
    }

    pub async fn finish(mut self, status: RunStatus) {
        if let Some(run_id) = self.run_id.take() {
            if let Err(e) = self.tracker.end_run(&run_id, status).await {
                error!("Failed to end run {}: {}", run_id, e);
            }
        }
    }
}

impl Drop for TrackedRun {
    fn drop(&mut self) {
        let Some(run_id) = self.run_id.take() else {
            return;
        };
        let tracker = Arc::clone(&self.tracker);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Run {} dropped without finishing; marking as failed", run_id);
                handle.spawn(async move {
                    if let Err(e) = tracker.end_run(&run_id, RunStatus::Failed).await {
                        error!("Failed to end abandoned run {}: {}", run_id, e);
                    }
                });
            }
            Err(_) => warn!("Run {} dropped outside a runtime; left open", run_id),
        }
    }
}

/// Tracker that only writes to the log
#[derive(Debug, Default)]
pub struct LogTracker {
    next_run: AtomicU64,
}

impl LogTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tracker for LogTracker {
    fn start_run<'a>(&'a self, experiment: &'a str, run_name: &'a str) -> TrackerFuture<'a, RunId> {
        Box::pin(async move {
            let id = format!("local-{}", self.next_run.fetch_add(1, Ordering::Relaxed) + 1);
            info!("[{}] run '{}' started ({})", experiment, run_name, id);
            Ok(id)
        })
    }

    fn log_metrics<'a>(&'a self, run: &'a str, metrics: &'a [(String, f64)]) -> TrackerFuture<'a, ()> {
        Box::pin(async move {
            for (key, value) in metrics {
                debug!("[{}] metric {} = {:.4}", run, key, value);
            }
            info!("[{}] logged {} metrics", run, metrics.len());
            Ok(())
        })
    }

    fn log_params<'a>(&'a self, run: &'a str, params: &'a [(String, String)]) -> TrackerFuture<'a, ()> {
        Box::pin(async move {
            for (key, value) in params {
                debug!("[{}] param {} = {}", run, key, value);
            }
            Ok(())
        })
    }

    fn end_run<'a>(&'a self, run: &'a str, status: RunStatus) -> TrackerFuture<'a, ()> {
        Box::pin(async move {
            info!("[{}] run ended with status {}", run, status.as_str());
            Ok(())
        })
    }
}

/// Tracker backed by an MLflow tracking server (REST API 2.0)
pub struct MlflowTracker {
    client: Client,
    tracking_uri: String,
    /// Experiment name -> id
    experiments: Mutex<HashMap<String, String>>,
}

/// Maximum entries per log-batch request
const MAX_BATCH_METRICS: usize = 1000;
const MAX_BATCH_PARAMS: usize = 100;

#[derive(Debug, Deserialize)]
struct ExperimentInfo {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct GetExperimentResponse {
    experiment: ExperimentInfo,
}

#[derive(Debug, Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct RunInfo {
    run_id: String,
}

#[derive(Debug, Deserialize)]
struct Run {
    info: RunInfo,
}

#[derive(Debug, Deserialize)]
struct CreateRunResponse {
    run: Run,
}

impl MlflowTracker {
    /// Create a new MLflow tracker
    ///
    /// # Arguments
    /// * `tracking_uri` - Tracking server URL (e.g., "http://localhost:5000")
    /// * `timeout` - Per-request timeout
    pub fn new(tracking_uri: String, timeout: Duration) -> Result<Self, TrackerError> {
        let client = Client::builder().timeout(timeout).no_proxy().build()?;
        Ok(Self {
            client,
            tracking_uri,
            experiments: Mutex::new(HashMap::new()),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/api/2.0/mlflow/{}",
            self.tracking_uri.trim_end_matches('/'),
            path
        )
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<String, TrackerError> {
        let response = self.client.post(self.api_url(path)).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(TrackerError::BackendError(format!(
                "{} returned {}: {}",
                path, status, text
            )));
        }
        Ok(text)
    }

    /// Resolve an experiment id by name, creating the experiment if needed
    async fn experiment_id(&self, name: &str) -> Result<String, TrackerError> {
        if let Some(id) = self.cached_experiment(name) {
            return Ok(id);
        }

        let response = self
            .client
            .get(self.api_url("experiments/get-by-name"))
            .query(&[("experiment_name", name)])
            .send()
            .await?;

        let id = match response.status() {
            status if status.is_success() => {
                let body: GetExperimentResponse = response.json().await.map_err(|e| {
                    TrackerError::InvalidResponse(format!("Failed to parse experiment: {}", e))
                })?;
                body.experiment.experiment_id
            }
            StatusCode::NOT_FOUND => {
                info!("Creating tracking experiment '{}'", name);
                let text = self
                    .post("experiments/create", json!({ "name": name }))
                    .await?;
                let body: CreateExperimentResponse = serde_json::from_str(&text).map_err(|e| {
                    TrackerError::InvalidResponse(format!("Failed to parse experiment id: {}", e))
                })?;
                body.experiment_id
            }
            status => {
                let text = response.text().await.unwrap_or_default();
                return Err(TrackerError::BackendError(format!(
                    "experiments/get-by-name returned {}: {}",
                    status, text
                )));
            }
        };

        self.experiments
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(name.to_string(), id.clone());
        Ok(id)
    }

    fn cached_experiment(&self, name: &str) -> Option<String> {
        self.experiments
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .cloned()
    }
}

impl Tracker for MlflowTracker {
    fn start_run<'a>(&'a self, experiment: &'a str, run_name: &'a str) -> TrackerFuture<'a, RunId> {
        Box::pin(async move {
            let experiment_id = self.experiment_id(experiment).await?;
            let text = self
                .post(
                    "runs/create",
                    json!({
                        "experiment_id": experiment_id,
                        "run_name": run_name,
                        "start_time": Utc::now().timestamp_millis(),
                    }),
                )
                .await?;
            let body: CreateRunResponse = serde_json::from_str(&text).map_err(|e| {
                TrackerError::InvalidResponse(format!("Failed to parse run: {}", e))
            })?;
            Ok(body.run.info.run_id)
        })
    }

    fn log_metrics<'a>(&'a self, run: &'a str, metrics: &'a [(String, f64)]) -> TrackerFuture<'a, ()> {
        Box::pin(async move {
            let timestamp = Utc::now().timestamp_millis();
            let metrics = finite_metrics(metrics);
            for chunk in metrics.chunks(MAX_BATCH_METRICS) {
                let entries: Vec<_> = chunk
                    .iter()
                    .map(|(key, value)| {
                        json!({ "key": key, "value": value, "timestamp": timestamp, "step": 0 })
                    })
                    .collect();
                self.post("runs/log-batch", json!({ "run_id": run, "metrics": entries }))
                    .await?;
            }
            Ok(())
        })
    }

    fn log_params<'a>(&'a self, run: &'a str, params: &'a [(String, String)]) -> TrackerFuture<'a, ()> {
        Box::pin(async move {
            for chunk in params.chunks(MAX_BATCH_PARAMS) {
                let entries: Vec<_> = chunk
                    .iter()
                    .map(|(key, value)| json!({ "key": key, "value": value }))
                    .collect();
                self.post("runs/log-batch", json!({ "run_id": run, "params": entries }))
                    .await?;
            }
            Ok(())
        })
    }

    fn end_run<'a>(&'a self, run: &'a str, status: RunStatus) -> TrackerFuture<'a, ()> {
        Box::pin(async move {
            self.post(
                "runs/update",
                json!({
                    "run_id": run,
                    "status": status.as_str(),
                    "end_time": Utc::now().timestamp_millis(),
                }),
            )
            .await?;
            Ok(())
        })
    }
}

/// One run captured by [`MockTracker`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordedRun {
    pub id: RunId,
    pub experiment: String,
    pub name: String,
    pub metrics: Vec<(String, f64)>,
    pub params: Vec<(String, String)>,
    pub status: Option<RunStatus>,
}

impl RecordedRun {
    pub fn metric(&self, key: &str) -> Option<f64> {
        self.metrics
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| *v)
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Mock tracker for testing
///
/// Records every run in memory. A failing mock rejects every call.
#[derive(Debug, Clone, Default)]
pub struct MockTracker {
    runs: Arc<Mutex<Vec<RecordedRun>>>,
    failing: bool,
}

impl MockTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn runs(&self) -> Vec<RecordedRun> {
        self.runs.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn check(&self) -> Result<(), TrackerError> {
        if self.failing {
            Err(TrackerError::BackendError("mock tracker unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn with_run(&self, run: &str, update: impl FnOnce(&mut RecordedRun)) -> Result<(), TrackerError> {
        self.check()?;
        let mut runs = self.runs.lock().unwrap_or_else(|p| p.into_inner());
        let recorded = runs
            .iter_mut()
            .find(|r| r.id == run)
            .ok_or_else(|| TrackerError::BackendError(format!("unknown run {}", run)))?;
        update(recorded);
        Ok(())
    }
}

impl Tracker for MockTracker {
    fn start_run<'a>(&'a self, experiment: &'a str, run_name: &'a str) -> TrackerFuture<'a, RunId> {
        Box::pin(async move {
            self.check()?;
            let mut runs = self.runs.lock().unwrap_or_else(|p| p.into_inner());
            let id = format!("mock-{}", runs.len() + 1);
            runs.push(RecordedRun {
                id: id.clone(),
                experiment: experiment.to_string(),
                name: run_name.to_string(),
                ..Default::default()
            });
            Ok(id)
        })
    }

    fn log_metrics<'a>(&'a self, run: &'a str, metrics: &'a [(String, f64)]) -> TrackerFuture<'a, ()> {
        Box::pin(async move { self.with_run(run, |r| r.metrics.extend_from_slice(metrics)) })
    }

    fn log_params<'a>(&'a self, run: &'a str, params: &'a [(String, String)]) -> TrackerFuture<'a, ()> {
        Box::pin(async move { self.with_run(run, |r| r.params.extend_from_slice(params)) })
    }

    fn end_run<'a>(&'a self, run: &'a str, status: RunStatus) -> TrackerFuture<'a, ()> {
        Box::pin(async move { self.with_run(run, |r| r.status = Some(status)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(pairs: &[(&str, f64)]) -> Vec<(String, f64)> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[tokio::test]
    async fn test_tracked_run_records_and_finishes() {
        let mock = MockTracker::new();
        let run = TrackedRun::start(Arc::new(mock.clone()), "exp", "batch-1").await;
        assert_eq!(run.run_id(), Some("mock-1"));

        run.log_metrics(&metrics(&[("a", 1.0), ("b", f64::NAN), ("c", f64::INFINITY)]))
            .await;
        run.log_params(&[("batch_size".to_string(), "10".to_string())])
            .await;
        run.finish(RunStatus::Finished).await;

        let runs = mock.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].experiment, "exp");
        assert_eq!(runs[0].metrics, metrics(&[("a", 1.0)]));
        assert_eq!(runs[0].param("batch_size"), Some("10"));
        assert_eq!(runs[0].status, Some(RunStatus::Finished));
    }

    #[tokio::test]
    async fn test_failing_backend_yields_inert_run() {
        let run = TrackedRun::start(Arc::new(MockTracker::failing()), "exp", "batch").await;
        assert_eq!(run.run_id(), None);

        // None of these may panic or block
        run.log_metrics(&metrics(&[("a", 1.0)])).await;
        run.finish(RunStatus::Finished).await;
    }

    #[tokio::test]
    async fn test_dropped_run_is_marked_failed() {
        let mock = MockTracker::new();
        {
            let run = TrackedRun::start(Arc::new(mock.clone()), "exp", "abandoned").await;
            run.log_metrics(&metrics(&[("a", 1.0)])).await;
        }

        // Let the spawned end_run task complete
        for _ in 0..10 {
            tokio::task::yield_now().await;
            if mock.runs()[0].status.is_some() {
                break;
            }
        }
        assert_eq!(mock.runs()[0].status, Some(RunStatus::Failed));
    }

    #[tokio::test]
    async fn test_log_tracker_accepts_everything() {
        let tracker = LogTracker::new();
        let first = tracker.start_run("exp", "a").await.unwrap();
        let second = tracker.start_run("exp", "b").await.unwrap();
        assert_ne!(first, second);

        tracker
            .log_metrics(&first, &metrics(&[("x", 1.0)]))
            .await
            .unwrap();
        tracker.end_run(&first, RunStatus::Finished).await.unwrap();
    }

    #[test]
    fn test_mlflow_api_url() {
        let tracker =
            MlflowTracker::new("http://localhost:5000/".to_string(), Duration::from_secs(5)).unwrap();
        assert_eq!(
            tracker.api_url("runs/create"),
            "http://localhost:5000/api/2.0/mlflow/runs/create"
        );
    }

    #[tokio::test]
    async fn test_mlflow_unreachable_server_is_error() {
        let tracker =
            MlflowTracker::new("http://127.0.0.1:9".to_string(), Duration::from_millis(500)).unwrap();
        assert!(tracker.start_run("exp", "run").await.is_err());
    }

    #[test]
    fn test_finite_metrics_filter() {
        let filtered = finite_metrics(&metrics(&[("ok", 2.0), ("nan", f64::NAN), ("neg", f64::NEG_INFINITY)]));
        assert_eq!(filtered, metrics(&[("ok", 2.0)]));
    }

    #[test]
    fn test_run_status_serialization() {
        assert_eq!(serde_json::to_string(&RunStatus::Finished).unwrap(), r#""FINISHED""#);
    }
}
