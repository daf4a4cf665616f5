/// Configuration management
#[allow(clippy::module_inception)]
pub mod config;

pub use config::{
    Config, DriftConfig, MonitoringConfig, PredictorBackend, PredictorConfig, StorageConfig,
    TrackerBackend, TrackerConfig,
};
