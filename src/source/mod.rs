//! Remote source of changed work-items
//!
//! This module defines the contract the indexer pages through: a project's
//! changed items ordered by last-modified time, plus the server-side pagination
//! metadata reported with every page.
//!
//! - `json_file`: JsonFileSource serving items from a local JSON document

pub mod json_file;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

pub use json_file::JsonFileSource;

/// One changed work-item as returned by the remote tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangedItem {
    /// Item key, unique within its project (e.g. `ORG-12`)
    pub key: String,
    /// Last-modified time on the remote side
    pub updated: DateTime<Utc>,
    /// Remaining item payload, passed through to the sink untouched
    #[serde(default)]
    pub fields: serde_json::Value,
}

impl ChangedItem {
    pub fn new(key: impl Into<String>, updated: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            updated,
            fields: serde_json::Value::Null,
        }
    }
}

/// Result of one remote fetch
///
/// `total` is a snapshot taken by the server when the page was produced and
/// may drift between consecutive requests as items keep changing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChangedItemsPage {
    /// Items ascending by `updated`
    pub items: Vec<ChangedItem>,
    /// Zero-based position of the first item in the server-side result set
    pub offset: usize,
    /// Maximum number of items requested
    pub page_size: usize,
    /// Server-reported number of matching items
    pub total: usize,
}

impl ChangedItemsPage {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Position right after the last item of this page
    pub fn end_offset(&self) -> usize {
        self.offset + self.items.len()
    }

    /// Whether the server reported items beyond this page
    pub fn has_more(&self) -> bool {
        self.total > self.end_offset()
    }

    pub fn first_updated(&self) -> Option<DateTime<Utc>> {
        self.items.first().map(|item| item.updated)
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.items.last().map(|item| item.updated)
    }
}

/// Trait for remote sources of changed items
///
/// Implementations must return the items of a page ascending by last-modified
/// time and treat `after` as an inclusive lower bound at minute precision.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChangedItemsSource: Send + Sync {
    /// Fetch one page of items of `project_key` changed within the given bounds
    ///
    /// # Arguments
    /// * `project_key` - Project to query
    /// * `offset` - Zero-based start position within the matching items
    /// * `after` - Only items updated at or after this minute
    /// * `before` - Only items updated before this time
    async fn fetch_changed_items(
        &self,
        project_key: &str,
        offset: usize,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Result<ChangedItemsPage, SourceError>;

    /// List every project known to the remote tracker
    async fn list_all_project_keys(&self) -> Result<Vec<String>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, minute, 0).unwrap()
    }

    #[test]
    fn test_page_bounds() {
        let page = ChangedItemsPage {
            items: vec![ChangedItem::new("ORG-1", at(1)), ChangedItem::new("ORG-2", at(2))],
            offset: 4,
            page_size: 2,
            total: 7,
        };
        assert_eq!(page.end_offset(), 6);
        assert!(page.has_more());
        assert_eq!(page.first_updated(), Some(at(1)));
        assert_eq!(page.last_updated(), Some(at(2)));
    }

    #[test]
    fn test_page_exhausted_when_total_reached() {
        let page = ChangedItemsPage {
            items: vec![ChangedItem::new("ORG-1", at(1))],
            offset: 2,
            page_size: 5,
            total: 3,
        };
        assert!(!page.has_more());
    }

    #[test]
    fn test_item_deserializes_without_fields() {
        let item: ChangedItem =
            serde_json::from_str(r#"{"key":"ORG-1","updated":"2024-01-01T10:05:00Z"}"#).unwrap();
        assert_eq!(item.key, "ORG-1");
        assert_eq!(item.updated, at(5));
        assert!(item.fields.is_null());
    }
}
