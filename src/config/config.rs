use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound of `monitoring.time_window_hours` (100 years)
pub const MAX_TIME_WINDOW_HOURS: u64 = 24 * 365 * 100;

/// Application configuration
///
/// Every section and field has a default, so a partial file only needs to
/// name the values it changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub monitoring: MonitoringConfig,
    pub drift: DriftConfig,
    pub predictor: PredictorConfig,
    pub storage: StorageConfig,
    pub tracker: TrackerConfig,
}

/// Monitoring cycle settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub interval_seconds: u64,
    /// Requests per monitoring batch
    pub batch_size: usize,
    /// Batch summaries kept in memory
    pub history_size: usize,
    /// Retention of hourly buckets
    pub time_window_hours: u64,
    /// Response-time SLA
    pub max_response_time_ms: f64,
    /// Write the summary export every N batches
    pub export_every: usize,
    pub export_path: PathBuf,
    pub cycle_deadline_seconds: u64,
    pub lock_timeout_ms: u64,
    /// UTC hours with an extra daily run
    pub scheduled_hours: Vec<u32>,
    /// UTC hour of the extra Saturday and Sunday runs
    pub weekend_hour: u32,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 6,
            batch_size: 10,
            history_size: 10,
            time_window_hours: 24,
            max_response_time_ms: 1000.0,
            export_every: 5,
            export_path: PathBuf::from("time_metrics_summary.json"),
            cycle_deadline_seconds: 60,
            lock_timeout_ms: 2000,
            scheduled_hours: vec![9, 12, 15, 18, 21],
            weekend_hour: 12,
        }
    }
}

impl MonitoringConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn cycle_deadline(&self) -> Duration {
        Duration::from_secs(self.cycle_deadline_seconds)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Retention of hourly buckets, saturating at the largest representable span
    pub fn time_window(&self) -> chrono::Duration {
        i64::try_from(self.time_window_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .unwrap_or(chrono::Duration::MAX)
    }
}

/// Drift detection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    pub interval_seconds: u64,
    pub psi_threshold: f64,
    pub ks_threshold: f64,
    pub psi_buckets: usize,
    pub reference_data_size: usize,
    pub current_data_size: usize,
    /// Class counted by the positive rate
    pub positive_class: i64,
    /// Features to compare; empty compares every feature seen
    pub features: Vec<String>,
    /// Prediction requests in flight at once during a drift run
    pub max_concurrency: usize,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 3600,
            psi_threshold: 0.2,
            ks_threshold: 0.1,
            psi_buckets: 10,
            reference_data_size: 100,
            current_data_size: 50,
            positive_class: 1,
            features: Vec::new(),
            max_concurrency: 8,
        }
    }
}

impl DriftConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictorBackend {
    Kserve,
    Mock,
}

/// Inference endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    pub backend: PredictorBackend,
    pub endpoint: String,
    pub model_name: String,
    pub timeout_seconds: u64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            backend: PredictorBackend::Kserve,
            endpoint: "http://localhost:8085".to_string(),
            model_name: "bankchurn".to_string(),
            timeout_seconds: 5,
        }
    }
}

impl PredictorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Object store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of the filesystem object store
    pub root: PathBuf,
    pub reference_key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("monitor-data"),
            reference_key: "reference_data.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerBackend {
    Log,
    Mlflow,
}

/// Experiment tracking settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub backend: TrackerBackend,
    pub tracking_uri: String,
    pub monitoring_experiment: String,
    pub drift_experiment: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            backend: TrackerBackend::Log,
            tracking_uri: "http://localhost:5000".to_string(),
            monitoring_experiment: "bank-churn-monitoring".to_string(),
            drift_experiment: "bank-churn-drift-detection".to_string(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read,
    /// `ConfigError::TomlError` if it is not valid TOML for this schema,
    /// and `ConfigError::ValidationError` if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every value is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.monitoring;
        let d = &self.drift;

        let positive = [
            ("monitoring.interval_seconds", m.interval_seconds as f64),
            ("monitoring.batch_size", m.batch_size as f64),
            ("monitoring.history_size", m.history_size as f64),
            ("monitoring.time_window_hours", m.time_window_hours as f64),
            ("monitoring.max_response_time_ms", m.max_response_time_ms),
            ("monitoring.export_every", m.export_every as f64),
            ("monitoring.cycle_deadline_seconds", m.cycle_deadline_seconds as f64),
            ("monitoring.lock_timeout_ms", m.lock_timeout_ms as f64),
            ("drift.interval_seconds", d.interval_seconds as f64),
            ("drift.psi_threshold", d.psi_threshold),
            ("drift.ks_threshold", d.ks_threshold),
            ("drift.reference_data_size", d.reference_data_size as f64),
            ("drift.current_data_size", d.current_data_size as f64),
            ("drift.max_concurrency", d.max_concurrency as f64),
            ("predictor.timeout_seconds", self.predictor.timeout_seconds as f64),
        ];
        for (name, value) in positive {
            if value.is_nan() || value <= 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be greater than 0 (got {})",
                    name, value
                )));
            }
        }

        if m.time_window_hours > MAX_TIME_WINDOW_HOURS {
            return Err(ConfigError::ValidationError(format!(
                "monitoring.time_window_hours must be at most {} (got {})",
                MAX_TIME_WINDOW_HOURS, m.time_window_hours
            )));
        }

        if d.psi_buckets < 2 {
            return Err(ConfigError::ValidationError(format!(
                "drift.psi_buckets must be at least 2 (got {})",
                d.psi_buckets
            )));
        }

        if let Some(hour) = m.scheduled_hours.iter().find(|h| **h >= 24) {
            return Err(ConfigError::ValidationError(format!(
                "monitoring.scheduled_hours contains invalid hour {}",
                hour
            )));
        }
        if m.weekend_hour >= 24 {
            return Err(ConfigError::ValidationError(format!(
                "monitoring.weekend_hour must be below 24 (got {})",
                m.weekend_hour
            )));
        }

        if self.predictor.endpoint.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "predictor.endpoint must not be empty".to_string(),
            ));
        }
        if self.storage.reference_key.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "storage.reference_key must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
