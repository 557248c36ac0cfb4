//! Error types for the indexing pipeline
//!
//! One error enum per collaborator (source, sink, watermark store) plus the
//! aggregate errors surfaced by a project run and by the coordinator.

use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Collaborator Errors
// ============================================================================

/// Errors raised by a remote source of changed items
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed source data: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown project: {project_key}")]
    ProjectNotFound { project_key: String },

    #[error("Remote request failed: {reason}")]
    Remote { reason: String },
}

impl SourceError {
    /// Create a remote failure error
    pub fn remote(reason: impl Into<String>) -> Self {
        Self::Remote {
            reason: reason.into(),
        }
    }
}

/// Errors raised by the indexing sink
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Document serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Document {item_key} rejected: {reason}")]
    Rejected { item_key: String, reason: String },

    #[error("Index unavailable: {reason}")]
    Unavailable { reason: String },
}

impl SinkError {
    /// Create a rejected document error
    pub fn rejected(item_key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            item_key: item_key.into(),
            reason: reason.into(),
        }
    }

    /// Create an index unavailable error
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}

/// Errors raised by a watermark store
#[derive(Debug, thiserror::Error)]
pub enum WatermarkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watermark file {path} is corrupted: {source}")]
    Corrupted {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Watermark serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ============================================================================
// Run and Coordination Errors
// ============================================================================

/// Errors that end a single project run
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    #[error("Fetch failed: {0}")]
    Source(#[from] SourceError),

    #[error("Indexing failed: {0}")]
    Sink(#[from] SinkError),

    #[error("Watermark update failed: {0}")]
    Watermark(#[from] WatermarkError),
}

/// Errors raised while coordinating runs
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Project list unavailable: {0}")]
    Source(#[from] SourceError),

    #[error("Watermark access failed: {0}")]
    Watermark(#[from] WatermarkError),

    #[error("Coordinator instance already registered: {name}")]
    DuplicateInstance { name: String },

    #[error("Coordinator instance not found: {name}")]
    UnknownInstance { name: String },
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid value for a configuration field
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Interval that must be positive was zero
    #[error("Invalid interval for {field}: {interval:?} - {reason}")]
    InvalidInterval {
        field: String,
        interval: Duration,
        reason: String,
    },
}

impl ConfigError {
    /// Create an invalid value error
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid interval error
    pub fn invalid_interval(
        field: impl Into<String>,
        interval: Duration,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidInterval {
            field: field.into(),
            interval,
            reason: reason.into(),
        }
    }
}
