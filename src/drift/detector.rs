//! Per-feature drift comparison between a reference and a current sample

use crate::drift::statistics::{calculate_psi, ks_two_sample};
use crate::events::{ClassLabel, PredictionOutcome};
use crate::predictor::FeatureVector;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Drift statistics of one feature
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureDrift {
    pub ks_statistic: f64,
    pub ks_p_value: f64,
    pub psi: f64,
    pub drift_detected: bool,
}

/// Result of one completed drift comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub reference_size: usize,
    pub current_size: usize,
    /// Successful predictions on the reference sample
    pub reference_predictions: usize,
    /// Successful predictions on the current sample
    pub current_predictions: usize,
    /// Fraction of reference predictions equal to the positive class
    pub reference_positive_rate: Option<f64>,
    pub current_positive_rate: Option<f64>,
    /// Absolute difference of the two positive rates
    pub positive_rate_diff: Option<f64>,
    pub features: BTreeMap<String, FeatureDrift>,
    /// Features present in only one of the samples
    pub skipped_features: Vec<String>,
}

impl DriftReport {
    /// Names of features whose drift was detected
    pub fn drifted_features(&self) -> Vec<&str> {
        self.features
            .iter()
            .filter(|(_, drift)| drift.drift_detected)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn any_drift(&self) -> bool {
        self.features.values().any(|drift| drift.drift_detected)
    }

    /// Flat `(name, value)` pairs for the tracking backend
    pub fn metrics(&self) -> Vec<(String, f64)> {
        let mut metrics = vec![
            ("reference_data_size".to_string(), self.reference_size as f64),
            ("current_data_size".to_string(), self.current_size as f64),
            (
                "reference_predictions_size".to_string(),
                self.reference_predictions as f64,
            ),
            (
                "current_predictions_size".to_string(),
                self.current_predictions as f64,
            ),
        ];

        let rates = [
            ("reference_positive_rate", self.reference_positive_rate),
            ("current_positive_rate", self.current_positive_rate),
            ("positive_rate_diff", self.positive_rate_diff),
        ];
        metrics.extend(
            rates
                .into_iter()
                .filter_map(|(name, value)| value.map(|v| (name.to_string(), v))),
        );

        for (name, drift) in &self.features {
            metrics.push((format!("{}_ks_statistic", name), drift.ks_statistic));
            metrics.push((format!("{}_ks_pvalue", name), drift.ks_p_value));
            metrics.push((format!("{}_psi", name), drift.psi));
            metrics.push((
                format!("{}_drift_detected", name),
                if drift.drift_detected { 1.0 } else { 0.0 },
            ));
        }

        metrics
    }
}

/// Outcome of [`DriftDetector::compare`]
#[derive(Debug, Clone, PartialEq)]
pub enum DriftOutcome {
    Completed(DriftReport),
    Skipped { reason: String },
}

/// Compares feature distributions with KS and PSI against fixed thresholds
#[derive(Debug, Clone)]
pub struct DriftDetector {
    psi_threshold: f64,
    ks_threshold: f64,
    psi_buckets: usize,
    positive_class: ClassLabel,
    /// Features to compare; empty means every feature seen
    features: Vec<String>,
}

impl DriftDetector {
    /// Create a detector
    ///
    /// # Arguments
    ///
    /// * `psi_threshold` - PSI above which a feature has drifted
    /// * `ks_threshold` - KS statistic above which a feature has drifted
    pub fn new(psi_threshold: f64, ks_threshold: f64) -> Self {
        Self {
            psi_threshold,
            ks_threshold,
            psi_buckets: 10,
            positive_class: 1,
            features: Vec::new(),
        }
    }

    pub fn with_psi_buckets(mut self, buckets: usize) -> Self {
        self.psi_buckets = buckets;
        self
    }

    pub fn with_positive_class(mut self, class: ClassLabel) -> Self {
        self.positive_class = class;
        self
    }

    pub fn with_features(mut self, features: Vec<String>) -> Self {
        self.features = features;
        self
    }

    pub fn psi_threshold(&self) -> f64 {
        self.psi_threshold
    }

    pub fn ks_threshold(&self) -> f64 {
        self.ks_threshold
    }

    /// Compare the current sample against the reference
    ///
    /// # Arguments
    ///
    /// * `reference` - Baseline feature vectors
    /// * `current` - Freshly drawn feature vectors
    /// * `reference_predictions` - Predictor outcomes for `reference`
    /// * `current_predictions` - Predictor outcomes for `current`
    ///
    /// Returns `Skipped` when either sample is empty.
    pub fn compare(
        &self,
        reference: &[FeatureVector],
        current: &[FeatureVector],
        reference_predictions: &[PredictionOutcome],
        current_predictions: &[PredictionOutcome],
    ) -> DriftOutcome {
        if reference.is_empty() || current.is_empty() {
            let reason = format!(
                "empty sample (reference={}, current={})",
                reference.len(),
                current.len()
            );
            warn!("Skipping drift comparison: {}", reason);
            return DriftOutcome::Skipped { reason };
        }

        let reference_names = feature_names(reference);
        let current_names = feature_names(current);
        let candidates: Vec<String> = if self.features.is_empty() {
            reference_names.union(&current_names).cloned().collect()
        } else {
            self.features.clone()
        };

        let mut features = BTreeMap::new();
        let mut skipped_features = Vec::new();

        for name in candidates {
            if !reference_names.contains(&name) || !current_names.contains(&name) {
                warn!("Feature '{}' is missing from one sample; skipping", name);
                skipped_features.push(name);
                continue;
            }

            let reference_values = column(reference, &name);
            let current_values = column(current, &name);
            let ks = ks_two_sample(&reference_values, &current_values);
            let psi = calculate_psi(&reference_values, &current_values, self.psi_buckets);
            let drift_detected = ks.statistic > self.ks_threshold || psi > self.psi_threshold;

            debug!(
                "Feature '{}': ks={:.4} p={:.4} psi={:.4} drift={}",
                name, ks.statistic, ks.p_value, psi, drift_detected
            );

            features.insert(
                name,
                FeatureDrift {
                    ks_statistic: ks.statistic,
                    ks_p_value: ks.p_value,
                    psi,
                    drift_detected,
                },
            );
        }

        let reference_values = accepted_values(reference_predictions);
        let current_values = accepted_values(current_predictions);
        let reference_positive_rate = self.positive_rate(&reference_values);
        let current_positive_rate = self.positive_rate(&current_values);
        let (reference_positive_rate, current_positive_rate) =
            match (reference_positive_rate, current_positive_rate) {
                (Some(r), Some(c)) => (Some(r), Some(c)),
                _ => (None, None),
            };

        DriftOutcome::Completed(DriftReport {
            reference_size: reference.len(),
            current_size: current.len(),
            reference_predictions: reference_values.len(),
            current_predictions: current_values.len(),
            reference_positive_rate,
            current_positive_rate,
            positive_rate_diff: reference_positive_rate
                .zip(current_positive_rate)
                .map(|(r, c)| (r - c).abs()),
            features,
            skipped_features,
        })
    }

    fn positive_rate(&self, values: &[ClassLabel]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let positives = values.iter().filter(|v| **v == self.positive_class).count();
        Some(positives as f64 / values.len() as f64)
    }
}

fn feature_names(sample: &[FeatureVector]) -> BTreeSet<String> {
    sample
        .iter()
        .flat_map(|row| row.names().map(str::to_string))
        .collect()
}

fn column(sample: &[FeatureVector], name: &str) -> Vec<f64> {
    sample.iter().filter_map(|row| row.get(name)).collect()
}

fn accepted_values(outcomes: &[PredictionOutcome]) -> Vec<ClassLabel> {
    outcomes
        .iter()
        .filter_map(PredictionOutcome::accepted)
        .map(|(value, _)| value)
        .collect()
}
