//! Per-project progress watermarks
//!
//! Watermarks are named timestamps stored per project key. They are created on
//! first write and read back as `None` before that.
//!
//! - `file`: FileWatermarkStore persisting all watermarks in one JSON document

pub mod file;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;

use crate::error::WatermarkError;

pub use file::FileWatermarkStore;

/// The named watermarks kept for every project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkKind {
    /// Start time of the most recent dispatched run (full or incremental)
    LastIncrementalRunStart,
    /// Completion time of the most recent successful full run
    LastFullRunCompleted,
    /// Set from outside to request a one-off full run
    ForceFullRequestedAt,
    /// Resumption cursor: last-modified time of the newest indexed item
    LastItemUpdatedAt,
}

impl WatermarkKind {
    pub const ALL: [WatermarkKind; 4] = [
        WatermarkKind::LastIncrementalRunStart,
        WatermarkKind::LastFullRunCompleted,
        WatermarkKind::ForceFullRequestedAt,
        WatermarkKind::LastItemUpdatedAt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WatermarkKind::LastIncrementalRunStart => "last_incremental_run_start",
            WatermarkKind::LastFullRunCompleted => "last_full_run_completed",
            WatermarkKind::ForceFullRequestedAt => "force_full_requested_at",
            WatermarkKind::LastItemUpdatedAt => "last_item_updated_at",
        }
    }
}

impl fmt::Display for WatermarkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for watermark storage backends
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Read a watermark, `None` if it was never written or has been deleted
    async fn read_timestamp(
        &self,
        project_key: &str,
        kind: WatermarkKind,
    ) -> Result<Option<DateTime<Utc>>, WatermarkError>;

    /// Create or overwrite a watermark
    async fn write_timestamp(
        &self,
        project_key: &str,
        kind: WatermarkKind,
        value: DateTime<Utc>,
    ) -> Result<(), WatermarkError>;

    /// Remove a watermark; removing an absent watermark is not an error
    async fn delete_timestamp(
        &self,
        project_key: &str,
        kind: WatermarkKind,
    ) -> Result<(), WatermarkError>;
}

/// Process-local watermark store
#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    values: RwLock<HashMap<(String, WatermarkKind), DateTime<Utc>>>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn read_timestamp(
        &self,
        project_key: &str,
        kind: WatermarkKind,
    ) -> Result<Option<DateTime<Utc>>, WatermarkError> {
        let values = self.values.read().await;
        Ok(values.get(&(project_key.to_string(), kind)).copied())
    }

    async fn write_timestamp(
        &self,
        project_key: &str,
        kind: WatermarkKind,
        value: DateTime<Utc>,
    ) -> Result<(), WatermarkError> {
        let mut values = self.values.write().await;
        values.insert((project_key.to_string(), kind), value);
        Ok(())
    }

    async fn delete_timestamp(
        &self,
        project_key: &str,
        kind: WatermarkKind,
    ) -> Result<(), WatermarkError> {
        let mut values = self.values.write().await;
        values.remove(&(project_key.to_string(), kind));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_memory_store_lifecycle() {
        let store = MemoryWatermarkStore::new();
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();

        assert_eq!(
            store
                .read_timestamp("ORG", WatermarkKind::LastItemUpdatedAt)
                .await
                .unwrap(),
            None
        );

        store
            .write_timestamp("ORG", WatermarkKind::LastItemUpdatedAt, ts)
            .await
            .unwrap();
        assert_eq!(
            store
                .read_timestamp("ORG", WatermarkKind::LastItemUpdatedAt)
                .await
                .unwrap(),
            Some(ts)
        );

        // Other kinds and other projects are independent
        assert_eq!(
            store
                .read_timestamp("ORG", WatermarkKind::LastFullRunCompleted)
                .await
                .unwrap(),
            None
        );
        assert_eq!(
            store
                .read_timestamp("OPS", WatermarkKind::LastItemUpdatedAt)
                .await
                .unwrap(),
            None
        );

        store
            .delete_timestamp("ORG", WatermarkKind::LastItemUpdatedAt)
            .await
            .unwrap();
        store
            .delete_timestamp("ORG", WatermarkKind::LastItemUpdatedAt)
            .await
            .unwrap();
        assert_eq!(
            store
                .read_timestamp("ORG", WatermarkKind::LastItemUpdatedAt)
                .await
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_kind_names_are_unique() {
        let names: std::collections::HashSet<_> =
            WatermarkKind::ALL.iter().map(|kind| kind.as_str()).collect();
        assert_eq!(names.len(), WatermarkKind::ALL.len());
    }
}
