//! Key-value blob storage for persisted monitor state
//!
//! The monitor only needs whole-object reads and writes, so the store is a
//! minimal `get`/`put` interface. `FsObjectStore` maps keys to files below a
//! root directory; `InMemoryObjectStore` backs tests and dry runs.

use crate::error::StorageError;
use log::debug;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

#[cfg(test)]
use mockall::automock;

/// Whole-object blob storage
#[cfg_attr(test, automock)]
pub trait ObjectStore: Send + Sync {
    /// Read the object under `key`
    ///
    /// Returns `StorageError::NotFound` when no object exists; every other
    /// error means the object may exist but could not be read.
    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Create or replace the object under `key`
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;
}

/// Object store rooted at a directory
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to a path inside the root
    ///
    /// Keys may contain `/` separators but never leave the root.
    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(StorageError::IoError(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("invalid object key: {}", key),
            )));
        }
        Ok(self.root.join(relative))
    }
}

impl ObjectStore for FsObjectStore {
    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => {
                debug!("Read {} bytes from {}", bytes.len(), path.display());
                Ok(bytes)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(StorageError::IoError(e)),
        }
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Write to a sibling file first so readers never see a partial object
        let staging = path.with_extension("tmp");
        std::fs::write(&staging, bytes)?;
        std::fs::rename(&staging, &path)?;

        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }
}

/// Process-local object store
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let objects = self
            .objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let mut objects = self
            .objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        objects.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}
