//! Writes the time-pattern summary to disk

use crate::aggregator::SummaryExport;
use crate::error::ExportError;
use log::info;
use std::path::{Path, PathBuf};

/// Writes [`SummaryExport`] documents as pretty-printed JSON
#[derive(Debug, Clone)]
pub struct SummaryExporter {
    path: PathBuf,
}

impl SummaryExporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the export file with `summary`
    ///
    /// The document is written to a sibling file first and renamed into
    /// place, so readers never observe a partial export.
    pub fn write(&self, summary: &SummaryExport) -> Result<(), ExportError> {
        let json = serde_json::to_vec_pretty(summary)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let staging = self.path.with_extension("json.tmp");
        std::fs::write(&staging, &json)?;
        std::fs::rename(&staging, &self.path)?;

        info!(
            "Exported time metrics summary ({} batches) to {}",
            summary.general.total_batches,
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::MetricsSnapshot;
    use tempfile::TempDir;

    #[test]
    fn test_write_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let exporter = SummaryExporter::new(dir.path().join("reports/summary.json"));
        let summary = SummaryExport::from_snapshot(&MetricsSnapshot::default());

        exporter.write(&summary).unwrap();

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(exporter.path()).unwrap()).unwrap();
        assert_eq!(written["general"]["total_batches"], 0);
        assert!(!dir.path().join("reports/summary.json.tmp").exists());
    }

    #[test]
    fn test_write_replaces_previous_export() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("summary.json");
        std::fs::write(&path, "stale").unwrap();

        let exporter = SummaryExporter::new(&path);
        exporter
            .write(&SummaryExport::from_snapshot(&MetricsSnapshot::default()))
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("time_patterns"));
    }

    #[test]
    fn test_write_into_missing_root_fails() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        // A regular file where a directory is needed
        let exporter = SummaryExporter::new(blocker.join("summary.json"));
        let result = exporter.write(&SummaryExport::from_snapshot(&MetricsSnapshot::default()));
        assert!(matches!(result, Err(ExportError::IoError(_))));
    }
}
