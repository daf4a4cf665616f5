//! Synthetic feature vectors for probing the inference endpoint

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Named numeric features in model input order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector {
    values: Vec<(String, f64)>,
}

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a feature, replacing an existing value of the same name
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.values.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| *value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Integer range `[low, high)` a feature is drawn from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRange {
    pub name: String,
    pub low: i64,
    pub high: i64,
}

impl FeatureRange {
    pub fn new(name: impl Into<String>, low: i64, high: i64) -> Self {
        Self {
            name: name.into(),
            low,
            high,
        }
    }
}

/// Source of synthetic input rows
pub trait FeatureGenerator: Send + Sync {
    fn generate(&self, count: usize) -> Vec<FeatureVector>;
}

/// Draws every feature uniformly from its integer range
pub struct UniformFeatureGenerator {
    ranges: Vec<FeatureRange>,
    rng: Mutex<StdRng>,
}

impl UniformFeatureGenerator {
    pub fn new(ranges: Vec<FeatureRange>) -> Self {
        Self {
            ranges,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Generator over the bank-churn input schema
    pub fn bank_churn() -> Self {
        Self::new(vec![
            FeatureRange::new("CreditScore", 300, 900),
            FeatureRange::new("Geography", 0, 3),
            FeatureRange::new("Gender", 0, 2),
            FeatureRange::new("Age", 18, 95),
            FeatureRange::new("Tenure", 0, 11),
            FeatureRange::new("Balance", 0, 250_000),
            FeatureRange::new("NumOfProducts", 1, 5),
            FeatureRange::new("HasCrCard", 0, 2),
            FeatureRange::new("IsActiveMember", 0, 2),
            FeatureRange::new("EstimatedSalary", 10_000, 200_000),
        ])
    }

    /// Make the draws reproducible
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    pub fn ranges(&self) -> &[FeatureRange] {
        &self.ranges
    }
}

impl FeatureGenerator for UniformFeatureGenerator {
    fn generate(&self, count: usize) -> Vec<FeatureVector> {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        (0..count)
            .map(|_| {
                let mut row = FeatureVector::new();
                for range in &self.ranges {
                    // An empty range pins the feature to its lower bound
                    let value = if range.high > range.low {
                        rng.gen_range(range.low..range.high)
                    } else {
                        range.low
                    };
                    row.insert(range.name.clone(), value as f64);
                }
                row
            })
            .collect()
    }
}
