/// Error types for the model monitor
pub mod error;

/// Prediction outcomes and batch summaries
pub mod events;

/// Descriptive statistics helpers
pub mod stats;

/// Process resource sampling
pub mod resources;

/// Metrics store with time buckets, trends and summary export
pub mod aggregator;

/// Data drift detection against a reference dataset
pub mod drift;

/// Inference endpoint clients and synthetic feature generation
pub mod predictor;

/// Experiment tracking and summary export
pub mod reporting;

/// Object storage for persisted datasets
pub mod storage;

/// Monitoring and drift cycles and their scheduler
pub mod scheduler;

/// Configuration management
pub mod config;

// Re-export commonly used types
pub use config::Config;
pub use error::{
    ConfigError, CycleError, ExportError, MetricsError, PredictorError, StorageError,
    TrackerError,
};
pub use events::{BatchSummary, PredictionOutcome};
