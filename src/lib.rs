//! Incremental issue-tracker to search-index synchronization
//!
//! A [`Coordinator`] periodically decides which tracked projects need an
//! incremental or a full indexing run and dispatches [`ProjectIndexer`] jobs
//! within a concurrency limit. Each job pages through the project's changed
//! items using a persisted date watermark and hands them to an [`IndexSink`].
//!
//! The tracker, the index and the watermark storage are traits so hosts can
//! plug in their own backends; file based implementations are included.

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod indexer;
pub mod logging;
pub mod registry;
pub mod runtime;
pub mod sink;
pub mod source;
pub mod watermark;

#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod testing;

pub use clock::{Clock, SystemClock};
pub use config::{CoordinatorConfig, CoordinatorConfigBuilder};
pub use coordinator::{Coordinator, CoordinatorStatus, ProjectWatermarks, RunningJobStatus};
pub use error::{
    ConfigError, CoordinatorError, IndexerError, SinkError, SourceError, WatermarkError,
};
pub use indexer::{ProjectIndexer, RunKind, RunOutcome};
pub use registry::CoordinatorRegistry;
pub use runtime::{JobHandle, JobRuntime, TokioJobRuntime};
pub use sink::{DirectoryIndexSink, IndexSink, MemoryIndexSink};
pub use source::{ChangedItem, ChangedItemsPage, ChangedItemsSource, JsonFileSource};
pub use watermark::{FileWatermarkStore, MemoryWatermarkStore, WatermarkKind, WatermarkStore};
