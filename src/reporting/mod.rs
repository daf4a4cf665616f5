/// Experiment tracking and summary export
pub mod export;
pub mod tracker;

pub use export::SummaryExporter;
pub use tracker::{
    LogTracker, MlflowTracker, MockTracker, RecordedRun, RunId, RunStatus, TrackedRun, Tracker,
};
