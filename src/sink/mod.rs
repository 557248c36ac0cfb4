//! Search index sink
//!
//! The sink receives every changed item a project run pulls from the source.
//! The document layout written by a sink is owned by the sink; the indexer
//! only relies on the two operations of [`IndexSink`].
//!
//! - `directory`: DirectoryIndexSink writing one JSON document per item

pub mod directory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::trace;

use crate::error::SinkError;
use crate::source::ChangedItem;

pub use directory::DirectoryIndexSink;

/// Document stored for one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub project_key: String,
    pub item_key: String,
    pub updated: DateTime<Utc>,
    pub fields: serde_json::Value,
}

impl IndexedDocument {
    pub fn from_item(project_key: &str, item: &ChangedItem) -> Self {
        Self {
            project_key: project_key.to_string(),
            item_key: item.key.clone(),
            updated: item.updated,
            fields: item.fields.clone(),
        }
    }
}

/// Trait for search index backends
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IndexSink: Send + Sync {
    /// Create or replace the document of one item
    async fn index_item(&self, project_key: &str, item: &ChangedItem) -> Result<(), SinkError>;

    /// Delete every document of the project whose item key is not in `seen`
    ///
    /// Called after a complete full run; returns the number of deleted documents.
    async fn delete_stale(
        &self,
        project_key: &str,
        seen: &HashSet<String>,
    ) -> Result<usize, SinkError>;
}

/// Process-local index, used when no index directory is configured
#[derive(Debug, Default)]
pub struct MemoryIndexSink {
    documents: RwLock<HashMap<String, BTreeMap<String, IndexedDocument>>>,
}

impl MemoryIndexSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Documents of one project ordered by item key
    pub async fn documents(&self, project_key: &str) -> Vec<IndexedDocument> {
        let documents = self.documents.read().await;
        documents
            .get(project_key)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of documents across all projects
    pub async fn len(&self) -> usize {
        let documents = self.documents.read().await;
        documents.values().map(BTreeMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl IndexSink for MemoryIndexSink {
    async fn index_item(&self, project_key: &str, item: &ChangedItem) -> Result<(), SinkError> {
        let mut documents = self.documents.write().await;
        documents
            .entry(project_key.to_string())
            .or_default()
            .insert(item.key.clone(), IndexedDocument::from_item(project_key, item));
        trace!("Indexed {} in memory", item.key);
        Ok(())
    }

    async fn delete_stale(
        &self,
        project_key: &str,
        seen: &HashSet<String>,
    ) -> Result<usize, SinkError> {
        let mut documents = self.documents.write().await;
        let Some(project_docs) = documents.get_mut(project_key) else {
            return Ok(0);
        };
        let before = project_docs.len();
        project_docs.retain(|key, _| seen.contains(key));
        Ok(before - project_docs.len())
    }
}
