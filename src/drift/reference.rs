//! Reference dataset lifecycle
//!
//! The reference sample is the fixed baseline every drift check compares
//! against. It is created once, persisted in the object store, and reused
//! by every later cycle and process.

use crate::error::StorageError;
use crate::events::Timestamp;
use crate::predictor::{FeatureGenerator, FeatureVector};
use crate::storage::ObjectStore;
use chrono::Utc;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Persisted baseline sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceDataset {
    pub created_at: Timestamp,
    pub features: Vec<FeatureVector>,
}

impl ReferenceDataset {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Fetch-or-create access to the reference dataset
pub struct ReferenceDatasetManager {
    store: Arc<dyn ObjectStore>,
    generator: Arc<dyn FeatureGenerator>,
    key: String,
    cached: Mutex<Option<Arc<ReferenceDataset>>>,
}

impl ReferenceDatasetManager {
    /// Create a manager
    ///
    /// # Arguments
    ///
    /// * `store` - Where the dataset is persisted
    /// * `generator` - Source of rows when no dataset exists yet
    /// * `key` - Object key of the dataset
    pub fn new(
        store: Arc<dyn ObjectStore>,
        generator: Arc<dyn FeatureGenerator>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            generator,
            key: key.into(),
            cached: Mutex::new(None),
        }
    }

    /// Return the reference dataset, creating it on first use
    ///
    /// A dataset already loaded by this manager is returned unchanged, even
    /// if `size` differs. A missing or undecodable object is replaced by
    /// `size` freshly generated rows. Other read failures are returned as
    /// errors so a possibly valid object is never overwritten.
    pub fn get_or_create(&self, size: usize) -> Result<Arc<ReferenceDataset>, StorageError> {
        let mut cached = self
            .cached
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(dataset) = cached.as_ref() {
            return Ok(Arc::clone(dataset));
        }

        let dataset = match self.store.get(&self.key) {
            Ok(bytes) => match serde_json::from_slice::<ReferenceDataset>(&bytes) {
                Ok(dataset) => {
                    info!(
                        "Loaded reference dataset '{}' with {} rows (created {})",
                        self.key,
                        dataset.len(),
                        dataset.created_at
                    );
                    dataset
                }
                Err(e) => {
                    warn!(
                        "Reference dataset '{}' could not be decoded ({}); regenerating",
                        self.key, e
                    );
                    self.create(size)
                }
            },
            Err(StorageError::NotFound(_)) => {
                info!("Reference dataset '{}' not found; creating", self.key);
                self.create(size)
            }
            Err(e) => {
                error!("Failed to read reference dataset '{}': {}", self.key, e);
                return Err(e);
            }
        };

        let dataset = Arc::new(dataset);
        *cached = Some(Arc::clone(&dataset));
        Ok(dataset)
    }

    /// Generate and persist a new dataset; persisting is best effort
    fn create(&self, size: usize) -> ReferenceDataset {
        let dataset = ReferenceDataset {
            created_at: Utc::now(),
            features: self.generator.generate(size),
        };

        let persisted = serde_json::to_vec(&dataset)
            .map_err(StorageError::from)
            .and_then(|bytes| self.store.put(&self.key, &bytes));
        match persisted {
            Ok(()) => info!(
                "Persisted reference dataset '{}' with {} rows",
                self.key,
                dataset.len()
            ),
            Err(e) => error!(
                "Failed to persist reference dataset '{}': {}; using it for this process only",
                self.key, e
            ),
        }

        dataset
    }
}
