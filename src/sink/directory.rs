//! Directory-backed index sink
//!
//! Writes one pretty-printed JSON document per item to
//! `<root>/<project>/<item>.json`. Useful as a local, inspectable index and as
//! the default sink of the command line host.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use super::{IndexSink, IndexedDocument};
use crate::error::SinkError;
use crate::source::ChangedItem;

const DOCUMENT_EXTENSION: &str = "json";

/// Index sink storing documents as files
#[derive(Debug, Clone)]
pub struct DirectoryIndexSink {
    root: PathBuf,
}

impl DirectoryIndexSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the document for an item
    pub fn document_path(&self, project_key: &str, item_key: &str) -> Result<PathBuf, SinkError> {
        validate_path_component(project_key, project_key)?;
        validate_path_component(item_key, item_key)?;
        Ok(self
            .root
            .join(project_key)
            .join(format!("{item_key}.{DOCUMENT_EXTENSION}")))
    }
}

/// Keys become file names, so they must not escape the project directory
fn validate_path_component(component: &str, item_key: &str) -> Result<(), SinkError> {
    if component.is_empty()
        || component == "."
        || component == ".."
        || component.contains(['/', '\\'])
    {
        return Err(SinkError::rejected(
            item_key,
            format!("'{component}' cannot be used as a document name"),
        ));
    }
    Ok(())
}

#[async_trait]
impl IndexSink for DirectoryIndexSink {
    async fn index_item(&self, project_key: &str, item: &ChangedItem) -> Result<(), SinkError> {
        let path = self.document_path(project_key, &item.key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let document = IndexedDocument::from_item(project_key, item);
        let bytes = serde_json::to_vec_pretty(&document)?;
        tokio::fs::write(&path, bytes).await?;
        trace!("Wrote document {}", path.display());
        Ok(())
    }

    async fn delete_stale(
        &self,
        project_key: &str,
        seen: &HashSet<String>,
    ) -> Result<usize, SinkError> {
        validate_path_component(project_key, project_key)?;
        let project_dir = self.root.join(project_key);

        let mut entries = match tokio::fs::read_dir(&project_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut deleted = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(DOCUMENT_EXTENSION) {
                continue;
            }
            let Some(item_key) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if !seen.contains(item_key) {
                tokio::fs::remove_file(&path).await?;
                deleted += 1;
            }
        }

        debug!(
            "Deleted {} stale documents from {}",
            deleted,
            project_dir.display()
        );
        Ok(deleted)
    }
}
