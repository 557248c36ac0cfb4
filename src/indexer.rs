//! Per-project indexing run
//!
//! A [`ProjectIndexer`] drains one project's backlog of changed items for one
//! invocation. Items are pulled page by page using a date cursor; when a whole
//! page shares a single timestamp the cursor cannot move past it without
//! risking to skip unseen items with that same timestamp, so the run pages by
//! offset instead until the timestamp changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, info, trace, warn};
use uuid::Uuid;

use crate::clock::{Clock, to_query_precision};
use crate::error::IndexerError;
use crate::sink::IndexSink;
use crate::source::{ChangedItemsPage, ChangedItemsSource};
use crate::watermark::{WatermarkKind, WatermarkStore};

/// Kind of project run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// Only items changed since the persisted cursor
    Incremental,
    /// The project's entire history, followed by stale document pruning
    Full,
}

impl RunKind {
    pub fn is_full(&self) -> bool {
        matches!(self, RunKind::Full)
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunKind::Incremental => f.write_str("incremental"),
            RunKind::Full => f.write_str("full"),
        }
    }
}

/// Summary of one finished project run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub project_key: String,
    pub kind: RunKind,
    pub success: bool,
    /// Items handed to the sink, including items re-delivered across pages
    pub updated: usize,
    /// Documents pruned after a full run
    pub deleted: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub error: Option<String>,
}

/// How the paging loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunEnd {
    Completed,
    Cancelled,
}

/// Counters accumulated while paging
#[derive(Debug, Default)]
struct RunProgress {
    updated: usize,
    deleted: usize,
    /// Item keys delivered during a full run
    seen: HashSet<String>,
    /// Resumption cursor as last persisted
    cursor: Option<DateTime<Utc>>,
}

/// Next request decided from the page just processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NextFetch {
    /// Move the date bound to the page's last timestamp and restart at offset 0
    AdvanceTime { after: DateTime<Utc> },
    /// Keep the date bound and continue at the next position
    AdvanceOffset { offset: usize },
    Done,
}

impl NextFetch {
    fn after_page(page: &ChangedItemsPage) -> Self {
        let (Some(first), Some(last)) = (page.first_updated(), page.last_updated()) else {
            return NextFetch::Done;
        };

        let first = to_query_precision(first);
        let last = to_query_precision(last);

        if first != last {
            if page.has_more() {
                NextFetch::AdvanceTime { after: last }
            } else {
                NextFetch::Done
            }
        } else {
            let offset = page.end_offset();
            if page.total > offset {
                NextFetch::AdvanceOffset { offset }
            } else {
                NextFetch::Done
            }
        }
    }
}

/// Indexing job for a single project
pub struct ProjectIndexer {
    project_key: String,
    kind: RunKind,
    source: Arc<dyn ChangedItemsSource>,
    sink: Arc<dyn IndexSink>,
    watermarks: Arc<dyn WatermarkStore>,
    clock: Arc<dyn Clock>,
}

impl ProjectIndexer {
    pub fn new(
        project_key: impl Into<String>,
        kind: RunKind,
        source: Arc<dyn ChangedItemsSource>,
        sink: Arc<dyn IndexSink>,
        watermarks: Arc<dyn WatermarkStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            project_key: project_key.into(),
            kind,
            source,
            sink,
            watermarks,
            clock,
        }
    }

    pub fn project_key(&self) -> &str {
        &self.project_key
    }

    pub fn kind(&self) -> RunKind {
        self.kind
    }

    /// Run to completion
    ///
    /// Returns `None` when the run stopped because `cancel` fired; work done up
    /// to that point stays indexed and the cursor stays advanced.
    pub async fn run(&self, cancel: &CancellationToken) -> Option<RunOutcome> {
        let run_id = Uuid::new_v4();
        let started_at = self.clock.now();
        let timer = Instant::now();

        info!(
            project = %self.project_key,
            run_id = %run_id,
            kind = %self.kind,
            "Project run started"
        );

        let mut progress = RunProgress::default();
        let result = self.process(cancel, &mut progress).await;
        let elapsed = timer.elapsed();
        crate::log_timing!(Level::DEBUG, "project_run", elapsed);

        let (success, error) = match result {
            Ok(RunEnd::Cancelled) => {
                info!(
                    project = %self.project_key,
                    run_id = %run_id,
                    updated = progress.updated,
                    "Project run cancelled"
                );
                return None;
            }
            Ok(RunEnd::Completed) => {
                info!(
                    project = %self.project_key,
                    run_id = %run_id,
                    kind = %self.kind,
                    updated = progress.updated,
                    deleted = progress.deleted,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Project run finished"
                );
                (true, None)
            }
            Err(e) => {
                warn!(
                    project = %self.project_key,
                    run_id = %run_id,
                    kind = %self.kind,
                    updated = progress.updated,
                    "Project run failed: {}",
                    e
                );
                (false, Some(e.to_string()))
            }
        };

        Some(RunOutcome {
            run_id,
            project_key: self.project_key.clone(),
            kind: self.kind,
            success,
            updated: progress.updated,
            deleted: progress.deleted,
            started_at,
            elapsed,
            error,
        })
    }

    async fn process(
        &self,
        cancel: &CancellationToken,
        progress: &mut RunProgress,
    ) -> Result<RunEnd, IndexerError> {
        progress.cursor = self
            .watermarks
            .read_timestamp(&self.project_key, WatermarkKind::LastItemUpdatedAt)
            .await?;

        let mut after = match self.kind {
            RunKind::Full => None,
            RunKind::Incremental => progress.cursor.map(to_query_precision),
        };
        let mut offset = 0;

        loop {
            if cancel.is_cancelled() {
                return Ok(RunEnd::Cancelled);
            }

            let page = self
                .source
                .fetch_changed_items(&self.project_key, offset, after, None)
                .await?;

            if page.is_empty() {
                debug!(
                    "No more changed items for {} at offset {} after {:?}",
                    self.project_key, offset, after
                );
                break;
            }

            debug!(
                "Fetched {} items for {} (offset {}, total {})",
                page.items.len(),
                self.project_key,
                page.offset,
                page.total
            );

            if let RunEnd::Cancelled = self.index_page(&page, cancel, progress).await? {
                return Ok(RunEnd::Cancelled);
            }

            match NextFetch::after_page(&page) {
                NextFetch::AdvanceTime { after: next } => {
                    trace!("Advancing {} cursor to {}", self.project_key, next);
                    after = Some(next);
                    offset = 0;
                }
                NextFetch::AdvanceOffset { offset: next } => {
                    trace!(
                        "Page of {} shares one timestamp, continuing at offset {}",
                        self.project_key, next
                    );
                    offset = next;
                }
                NextFetch::Done => break,
            }
        }

        if self.kind.is_full() {
            progress.deleted = self
                .sink
                .delete_stale(&self.project_key, &progress.seen)
                .await?;
        }

        Ok(RunEnd::Completed)
    }

    /// Index every item of a page, then persist the cursor
    ///
    /// The cursor is persisted for whatever part of the page was indexed, also
    /// when indexing stops early because of cancellation or a sink error.
    async fn index_page(
        &self,
        page: &ChangedItemsPage,
        cancel: &CancellationToken,
        progress: &mut RunProgress,
    ) -> Result<RunEnd, IndexerError> {
        let mut last_indexed = None;

        for item in &page.items {
            if cancel.is_cancelled() {
                self.advance_cursor(last_indexed, progress).await?;
                return Ok(RunEnd::Cancelled);
            }

            if let Err(e) = self.sink.index_item(&self.project_key, item).await {
                self.advance_cursor(last_indexed, progress).await?;
                return Err(e.into());
            }

            trace!("Indexed {} ({})", item.key, item.updated);
            progress.updated += 1;
            if self.kind.is_full() {
                progress.seen.insert(item.key.clone());
            }
            last_indexed = Some(item.updated);
        }

        self.advance_cursor(last_indexed, progress).await?;
        Ok(RunEnd::Completed)
    }

    /// Persist the cursor if `candidate` moves it forward
    async fn advance_cursor(
        &self,
        candidate: Option<DateTime<Utc>>,
        progress: &mut RunProgress,
    ) -> Result<(), IndexerError> {
        let Some(candidate) = candidate.map(to_query_precision) else {
            return Ok(());
        };
        if progress.cursor.is_some_and(|current| current >= candidate) {
            return Ok(());
        }

        self.watermarks
            .write_timestamp(
                &self.project_key,
                WatermarkKind::LastItemUpdatedAt,
                candidate,
            )
            .await?;
        progress.cursor = Some(candidate);
        Ok(())
    }
}
