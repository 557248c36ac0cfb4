//! File-backed watermark store
//!
//! All watermarks live in one JSON document keyed by project, then by
//! watermark name. Every write rewrites the document through a temporary file
//! and a rename so a crash never leaves a half-written file behind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::{WatermarkKind, WatermarkStore};
use crate::error::WatermarkError;

type WatermarkDocument = BTreeMap<String, BTreeMap<String, DateTime<Utc>>>;

/// Watermark store persisting to a single JSON file
#[derive(Debug)]
pub struct FileWatermarkStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles on the document
    write_lock: Mutex<()>,
}

impl FileWatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<WatermarkDocument, WatermarkError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(WatermarkDocument::new());
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&bytes).map_err(|source| WatermarkError::Corrupted {
            path: self.path.clone(),
            source,
        })
    }

    async fn save(&self, document: &WatermarkDocument) -> Result<(), WatermarkError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let bytes = serde_json::to_vec_pretty(document)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        trace!("Saved watermarks to {}", self.path.display());
        Ok(())
    }
}

#[async_trait]
impl WatermarkStore for FileWatermarkStore {
    async fn read_timestamp(
        &self,
        project_key: &str,
        kind: WatermarkKind,
    ) -> Result<Option<DateTime<Utc>>, WatermarkError> {
        let document = self.load().await?;
        Ok(document
            .get(project_key)
            .and_then(|marks| marks.get(kind.as_str()))
            .copied())
    }

    async fn write_timestamp(
        &self,
        project_key: &str,
        kind: WatermarkKind,
        value: DateTime<Utc>,
    ) -> Result<(), WatermarkError> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.load().await?;
        document
            .entry(project_key.to_string())
            .or_default()
            .insert(kind.as_str().to_string(), value);
        self.save(&document).await?;
        debug!("Watermark {} for {} set to {}", kind, project_key, value);
        Ok(())
    }

    async fn delete_timestamp(
        &self,
        project_key: &str,
        kind: WatermarkKind,
    ) -> Result<(), WatermarkError> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.load().await?;
        let removed = document
            .get_mut(project_key)
            .and_then(|marks| marks.remove(kind.as_str()))
            .is_some();
        if removed {
            self.save(&document).await?;
            debug!("Watermark {} for {} cleared", kind, project_key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_reads_as_absent() {
        let dir = TempDir::new().unwrap();
        let store = FileWatermarkStore::new(dir.path().join("watermarks.json"));

        let value = store
            .read_timestamp("ORG", WatermarkKind::LastFullRunCompleted)
            .await
            .unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("watermarks.json");
        let ts = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 0).unwrap();

        {
            let store = FileWatermarkStore::new(&path);
            store
                .write_timestamp("ORG", WatermarkKind::LastItemUpdatedAt, ts)
                .await
                .unwrap();
            store
                .write_timestamp("OPS", WatermarkKind::ForceFullRequestedAt, ts)
                .await
                .unwrap();
        }

        let reopened = FileWatermarkStore::new(&path);
        assert_eq!(
            reopened
                .read_timestamp("ORG", WatermarkKind::LastItemUpdatedAt)
                .await
                .unwrap(),
            Some(ts)
        );
        assert_eq!(
            reopened
                .read_timestamp("OPS", WatermarkKind::ForceFullRequestedAt)
                .await
                .unwrap(),
            Some(ts)
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_delete_removes_only_named_watermark() {
        let dir = TempDir::new().unwrap();
        let store = FileWatermarkStore::new(dir.path().join("watermarks.json"));
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        store
            .write_timestamp("ORG", WatermarkKind::ForceFullRequestedAt, ts)
            .await
            .unwrap();
        store
            .write_timestamp("ORG", WatermarkKind::LastFullRunCompleted, ts)
            .await
            .unwrap();
        store
            .delete_timestamp("ORG", WatermarkKind::ForceFullRequestedAt)
            .await
            .unwrap();

        assert_eq!(
            store
                .read_timestamp("ORG", WatermarkKind::ForceFullRequestedAt)
                .await
                .unwrap(),
            None
        );
        assert_eq!(
            store
                .read_timestamp("ORG", WatermarkKind::LastFullRunCompleted)
                .await
                .unwrap(),
            Some(ts)
        );
    }

    #[tokio::test]
    async fn test_corrupted_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("watermarks.json");
        std::fs::write(&path, b"[1, 2").unwrap();
        let store = FileWatermarkStore::new(&path);

        let result = store
            .read_timestamp("ORG", WatermarkKind::LastItemUpdatedAt)
            .await;
        assert!(matches!(result, Err(WatermarkError::Corrupted { .. })));
    }
}
