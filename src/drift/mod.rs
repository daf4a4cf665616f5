/// Drift detection between a reference sample and live traffic
pub mod detector;
pub mod reference;
pub mod statistics;

pub use detector::{DriftDetector, DriftOutcome, DriftReport, FeatureDrift};
pub use reference::{ReferenceDataset, ReferenceDatasetManager};
pub use statistics::{calculate_psi, ks_two_sample, KsResult};
