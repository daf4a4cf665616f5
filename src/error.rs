use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to the inference endpoint
#[derive(Error, Debug)]
pub enum PredictorError {
    #[error("Request timeout")]
    Timeout,

    #[error("Endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Errors that can occur in the object store holding the reference dataset
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Errors that can occur when reporting to the tracking backend
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Tracking backend error: {0}")]
    BackendError(String),

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Errors raised by the shared metrics store
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Could not acquire metrics store lock within {0:?}")]
    LockTimeout(Duration),
}

/// Errors that can occur while writing the summary export
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Errors that abort a single monitoring or drift cycle
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("Cycle exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),

    #[error("Metrics store error: {0}")]
    Metrics(#[from] MetricsError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}
