//! JSON file implementation of the changed-items source
//!
//! Serves a tracker export kept on disk. The file is re-read on every call so
//! edits made between runs show up as changed items, the same way a remote
//! tracker would report them.
//!
//! ```json
//! { "projects": { "ORG": [ { "key": "ORG-1", "updated": "2024-01-01T10:00:00Z" } ] } }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use super::{ChangedItem, ChangedItemsPage, ChangedItemsSource};
use crate::clock::to_query_precision;
use crate::error::SourceError;

/// Default number of items returned per page
pub const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Deserialize)]
struct TrackerExport {
    #[serde(default)]
    projects: BTreeMap<String, Vec<ChangedItem>>,
}

/// Changed-items source backed by a JSON tracker export
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
    page_size: usize,
}

impl JsonFileSource {
    /// Create a source reading `path` and serving pages of `page_size` items
    pub fn new(path: impl Into<PathBuf>, page_size: usize) -> Self {
        Self {
            path: path.into(),
            page_size: page_size.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    async fn load(&self) -> Result<TrackerExport, SourceError> {
        let bytes = tokio::fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl ChangedItemsSource for JsonFileSource {
    async fn fetch_changed_items(
        &self,
        project_key: &str,
        offset: usize,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Result<ChangedItemsPage, SourceError> {
        let mut export = self.load().await?;
        let items = export
            .projects
            .remove(project_key)
            .ok_or_else(|| SourceError::ProjectNotFound {
                project_key: project_key.to_string(),
            })?;

        let lower = after.map(to_query_precision);
        let mut matching: Vec<ChangedItem> = items
            .into_iter()
            .filter(|item| lower.is_none_or(|bound| item.updated >= bound))
            .filter(|item| before.is_none_or(|bound| item.updated < bound))
            .collect();
        matching.sort_by(|a, b| a.updated.cmp(&b.updated).then_with(|| a.key.cmp(&b.key)));

        let total = matching.len();
        let items: Vec<ChangedItem> = matching
            .into_iter()
            .skip(offset)
            .take(self.page_size)
            .collect();

        debug!(
            "Served {} of {} changed items for {} (offset {}, after {:?})",
            items.len(),
            total,
            project_key,
            offset,
            lower
        );
        trace!(
            "Page keys: {:?}",
            items.iter().map(|item| item.key.as_str()).collect::<Vec<_>>()
        );

        Ok(ChangedItemsPage {
            items,
            offset,
            page_size: self.page_size,
            total,
        })
    }

    async fn list_all_project_keys(&self) -> Result<Vec<String>, SourceError> {
        let export = self.load().await?;
        Ok(export.projects.into_keys().collect())
    }
}
