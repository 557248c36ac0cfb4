//! Fake collaborators for indexer and coordinator tests
//!
//! Provides scripted and recording implementations of every seam so scheduling
//! and paging behaviour can be exercised without a tracker, an index or real
//! timing.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::error::{SinkError, SourceError};
use crate::runtime::{JobFuture, JobHandle, JobRuntime};
use crate::sink::IndexSink;
use crate::source::{ChangedItem, ChangedItemsPage, ChangedItemsSource};

// ============================================================================
// Fixtures
// ============================================================================

/// 2024-01-01 at the given wall-clock time (UTC)
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
}

/// Build a page from `(item key, updated)` pairs
pub fn page(
    offset: usize,
    page_size: usize,
    total: usize,
    items: &[(&str, DateTime<Utc>)],
) -> ChangedItemsPage {
    ChangedItemsPage {
        items: items
            .iter()
            .map(|(key, updated)| ChangedItem::new(*key, *updated))
            .collect(),
        offset,
        page_size,
        total,
    }
}

// ============================================================================
// Manual Clock
// ============================================================================

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::TimeDelta::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// ============================================================================
// Scripted Source
// ============================================================================

/// Arguments of one recorded fetch
#[derive(Debug, Clone, PartialEq)]
pub struct FetchCall {
    pub project_key: String,
    pub offset: usize,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
}

type PageResult = Result<ChangedItemsPage, SourceError>;

/// Source replaying scripted pages and recording every request
///
/// Requests for a project with its own script consume that script; all other
/// requests consume the shared script. An exhausted script yields empty pages.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    shared: Mutex<VecDeque<PageResult>>,
    per_project: Mutex<HashMap<String, VecDeque<PageResult>>>,
    calls: Mutex<Vec<FetchCall>>,
    project_keys: Mutex<Vec<String>>,
    failing_listings: AtomicUsize,
    listings: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pages(pages: Vec<ChangedItemsPage>) -> Self {
        Self::with_results(pages.into_iter().map(Ok).collect())
    }

    pub fn with_results(results: Vec<PageResult>) -> Self {
        let source = Self::new();
        source.shared.lock().unwrap().extend(results);
        source
    }

    pub fn with_project_keys(keys: &[&str]) -> Self {
        let source = Self::new();
        source.set_project_keys(keys);
        source
    }

    pub fn set_project_keys(&self, keys: &[&str]) {
        *self.project_keys.lock().unwrap() = keys.iter().map(|k| k.to_string()).collect();
    }

    /// Script the pages served for one project
    pub fn script(&self, project_key: &str, pages: Vec<ChangedItemsPage>) {
        self.per_project
            .lock()
            .unwrap()
            .entry(project_key.to_string())
            .or_default()
            .extend(pages.into_iter().map(Ok));
    }

    /// Make the next `count` project listings fail
    pub fn fail_listings(&self, count: usize) {
        self.failing_listings.store(count, Ordering::SeqCst);
    }

    pub fn fetch_calls(&self) -> Vec<FetchCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fetch_calls_for(&self, project_key: &str) -> Vec<FetchCall> {
        self.fetch_calls()
            .into_iter()
            .filter(|call| call.project_key == project_key)
            .collect()
    }

    pub fn listing_count(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChangedItemsSource for ScriptedSource {
    async fn fetch_changed_items(
        &self,
        project_key: &str,
        offset: usize,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Result<ChangedItemsPage, SourceError> {
        self.calls.lock().unwrap().push(FetchCall {
            project_key: project_key.to_string(),
            offset,
            after,
            before,
        });

        let next = {
            let mut per_project = self.per_project.lock().unwrap();
            match per_project.get_mut(project_key) {
                Some(script) => script.pop_front(),
                None => self.shared.lock().unwrap().pop_front(),
            }
        };

        next.unwrap_or_else(|| {
            Ok(ChangedItemsPage {
                items: Vec::new(),
                offset,
                page_size: 0,
                total: 0,
            })
        })
    }

    async fn list_all_project_keys(&self) -> Result<Vec<String>, SourceError> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_listings.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_listings.store(failing - 1, Ordering::SeqCst);
            return Err(SourceError::remote("project listing unavailable"));
        }
        Ok(self.project_keys.lock().unwrap().clone())
    }
}

// ============================================================================
// Recording Sink
// ============================================================================

/// Sink recording every delivered item
#[derive(Debug, Default)]
pub struct RecordingSink {
    indexed: Mutex<Vec<(String, String)>>,
    stored: Mutex<HashMap<String, BTreeSet<String>>>,
    fail_on: Mutex<Option<String>>,
    gate: Option<Arc<Semaphore>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that takes one permit from `gate` before indexing each item
    pub fn with_gate(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    /// Reject the item with this key
    pub fn fail_on(&self, item_key: &str) {
        *self.fail_on.lock().unwrap() = Some(item_key.to_string());
    }

    /// Pretend these documents were indexed by an earlier run
    pub fn preload(&self, project_key: &str, item_keys: &[&str]) {
        self.stored
            .lock()
            .unwrap()
            .entry(project_key.to_string())
            .or_default()
            .extend(item_keys.iter().map(|k| k.to_string()));
    }

    /// Keys in delivery order, across projects
    pub fn indexed_keys(&self) -> Vec<String> {
        self.indexed
            .lock()
            .unwrap()
            .iter()
            .map(|(_, key)| key.clone())
            .collect()
    }

    pub fn stored_keys(&self, project_key: &str) -> Vec<String> {
        self.stored
            .lock()
            .unwrap()
            .get(project_key)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl IndexSink for RecordingSink {
    async fn index_item(&self, project_key: &str, item: &ChangedItem) -> Result<(), SinkError> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| SinkError::unavailable(e.to_string()))?
                .forget();
        }

        if self.fail_on.lock().unwrap().as_deref() == Some(item.key.as_str()) {
            return Err(SinkError::rejected(&item.key, "scripted failure"));
        }

        self.indexed
            .lock()
            .unwrap()
            .push((project_key.to_string(), item.key.clone()));
        self.stored
            .lock()
            .unwrap()
            .entry(project_key.to_string())
            .or_default()
            .insert(item.key.clone());
        Ok(())
    }

    async fn delete_stale(
        &self,
        project_key: &str,
        seen: &std::collections::HashSet<String>,
    ) -> Result<usize, SinkError> {
        let mut stored = self.stored.lock().unwrap();
        let Some(keys) = stored.get_mut(project_key) else {
            return Ok(0);
        };
        let before = keys.len();
        keys.retain(|key| seen.contains(key));
        Ok(before - keys.len())
    }
}

// ============================================================================
// Manual Job Runtime
// ============================================================================

struct SpawnedJob {
    name: String,
    cancel: CancellationToken,
    job: Option<JobFuture>,
}

/// Runtime that records jobs and only runs them on request
#[derive(Default)]
pub struct ManualJobRuntime {
    jobs: Mutex<Vec<SpawnedJob>>,
}

impl ManualJobRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all spawned jobs in spawn order
    pub fn spawned_names(&self) -> Vec<String> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .map(|job| job.name.clone())
            .collect()
    }

    pub fn cancel_token(&self, name: &str) -> Option<CancellationToken> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|job| job.name == name)
            .map(|job| job.cancel.clone())
    }

    /// Run every job spawned so far that has not run yet, one after another
    pub async fn run_pending(&self) {
        let pending: Vec<JobFuture> = self
            .jobs
            .lock()
            .unwrap()
            .iter_mut()
            .filter_map(|job| job.job.take())
            .collect();

        for job in pending {
            job.await;
        }
    }
}

impl JobRuntime for ManualJobRuntime {
    fn spawn(&self, name: &str, cancel: CancellationToken, job: JobFuture) -> JobHandle {
        self.jobs.lock().unwrap().push(SpawnedJob {
            name: name.to_string(),
            cancel: cancel.clone(),
            job: Some(job),
        });
        JobHandle::new(name, cancel, None)
    }
}
