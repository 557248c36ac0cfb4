//! Indexing coordinator
//!
//! The coordinator decides when each tracked project needs an incremental or a
//! full run and keeps the number of concurrently running project jobs within
//! the configured limit.
//!
//! ## Scheduling tick
//!
//! ```text
//! pending queue empty and refill throttle passed?
//!     └─> list tracked projects ─> keep due ones not queued/running
//! queue empty?  ── yes ─> slow polling
//!     └─ no ─> fast polling ─> dispatch while a slot is free
//! ```
//!
//! A full run never takes the last free slot while incremental work is still
//! queued, unless the coordinator only has a single slot.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::CoordinatorConfig;
use crate::error::CoordinatorError;
use crate::indexer::{ProjectIndexer, RunKind, RunOutcome};
use crate::runtime::{JobHandle, JobRuntime, TokioJobRuntime};
use crate::sink::IndexSink;
use crate::source::ChangedItemsSource;
use crate::watermark::{WatermarkKind, WatermarkStore};

/// A dispatched job as tracked in the registry
#[derive(Debug)]
struct RunningJob {
    handle: JobHandle,
    kind: RunKind,
    started_at: DateTime<Utc>,
}

/// Mutable scheduling state, guarded by one lock
#[derive(Debug)]
struct CoordinatorState {
    pending: VecDeque<String>,
    running: HashMap<String, RunningJob>,
    last_queue_refill: Option<DateTime<Utc>>,
    poll_interval: Duration,
    last_outcomes: BTreeMap<String, RunOutcome>,
}

#[derive(Debug)]
struct CachedProjectKeys {
    keys: Vec<String>,
    fetched_at: DateTime<Utc>,
}

/// Outcome of trying to dispatch one queued project
enum Dispatch {
    Started,
    Deferred,
}

/// Running job as reported by [`Coordinator::status`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunningJobStatus {
    pub project_key: String,
    pub kind: RunKind,
    pub started_at: DateTime<Utc>,
}

/// Point-in-time view of a coordinator
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub name: String,
    pub shutdown: bool,
    pub max_concurrent_jobs: usize,
    pub poll_interval_ms: u64,
    pub pending: Vec<String>,
    pub running: Vec<RunningJobStatus>,
    pub last_outcomes: Vec<RunOutcome>,
}

/// All watermarks of one project
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectWatermarks {
    pub project_key: String,
    pub last_incremental_run_start: Option<DateTime<Utc>>,
    pub last_full_run_completed: Option<DateTime<Utc>>,
    pub force_full_requested_at: Option<DateTime<Utc>>,
    pub last_item_updated_at: Option<DateTime<Utc>>,
}

/// Time elapsed from `since` to `now`, zero if `since` lies in the future
fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    now.signed_duration_since(since)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Schedules project runs for one tracker
pub struct Coordinator {
    name: String,
    config: CoordinatorConfig,
    source: Arc<dyn ChangedItemsSource>,
    sink: Arc<dyn IndexSink>,
    watermarks: Arc<dyn WatermarkStore>,
    runtime: Arc<dyn JobRuntime>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
    state: Mutex<CoordinatorState>,
    project_keys: Mutex<Option<CachedProjectKeys>>,
}

impl Coordinator {
    /// Create a coordinator running jobs on tokio tasks against the wall clock
    pub fn new(
        name: impl Into<String>,
        config: CoordinatorConfig,
        source: Arc<dyn ChangedItemsSource>,
        sink: Arc<dyn IndexSink>,
        watermarks: Arc<dyn WatermarkStore>,
    ) -> Self {
        let state = CoordinatorState {
            pending: VecDeque::new(),
            running: HashMap::new(),
            last_queue_refill: None,
            poll_interval: config.fast_interval,
            last_outcomes: BTreeMap::new(),
        };

        Self {
            name: name.into(),
            config,
            source,
            sink,
            watermarks,
            runtime: Arc::new(TokioJobRuntime),
            clock: Arc::new(SystemClock),
            shutdown: CancellationToken::new(),
            state: Mutex::new(state),
            project_keys: Mutex::new(None),
        }
    }

    /// Host project jobs on a different runtime
    pub fn with_runtime(mut self, runtime: Arc<dyn JobRuntime>) -> Self {
        self.runtime = runtime;
        self
    }

    /// Use a different time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    // ========================================================================
    // Coordination loop
    // ========================================================================

    /// Start the coordination loop on a tokio task
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.run().await })
    }

    /// Run scheduling ticks until shutdown is requested
    pub async fn run(self: Arc<Self>) {
        info!(
            coordinator = %self.name,
            max_jobs = self.config.max_concurrent_jobs,
            "Indexing coordinator started"
        );

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            if let Err(e) = self.tick().await {
                warn!(coordinator = %self.name, "Scheduling tick failed: {}", e);
            }

            let interval = self.poll_interval().await;
            trace!("Coordinator {} sleeping for {:?}", self.name, interval);
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        let cancelled = self.cancel_running_jobs().await;
        info!(
            coordinator = %self.name,
            cancelled = cancelled.len(),
            "Indexing coordinator stopped"
        );
    }

    /// Request shutdown and cancel every running job
    ///
    /// The registry is cleared right away; the returned handles can be joined
    /// by callers that want to wait for the jobs to wind down.
    pub async fn shutdown(&self) -> Vec<JobHandle> {
        info!(coordinator = %self.name, "Coordinator shutdown requested");
        self.shutdown.cancel();
        self.cancel_running_jobs().await
    }

    async fn cancel_running_jobs(&self) -> Vec<JobHandle> {
        let mut state = self.state.lock().await;
        state.pending.clear();
        state
            .running
            .drain()
            .map(|(key, job)| {
                debug!("Cancelling {} job for {}", job.kind, key);
                job.handle.cancel();
                job.handle
            })
            .collect()
    }

    /// Execute one scheduling tick
    pub async fn tick(self: &Arc<Self>) -> Result<(), CoordinatorError> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        let now = self.clock.now();

        let refill = {
            let mut state = self.state.lock().await;
            self.reap_finished_jobs(&mut state);
            let throttle_passed = state
                .last_queue_refill
                .is_none_or(|last| elapsed(last, now) >= self.config.queue_refill_interval);
            let refill = state.pending.is_empty() && throttle_passed;
            if refill {
                state.last_queue_refill = Some(now);
            }
            refill
        };

        if refill {
            self.fill_pending_queue(now).await?;
        }

        let mut state = self.state.lock().await;
        if state.pending.is_empty() {
            state.poll_interval = self.config.slow_interval;
            trace!("Nothing due for {}", self.name);
            return Ok(());
        }

        state.poll_interval = self.config.fast_interval;
        self.start_indexers_locked(&mut state, now).await?;
        Ok(())
    }

    async fn fill_pending_queue(&self, now: DateTime<Utc>) -> Result<(), CoordinatorError> {
        let keys = self.tracked_project_keys(now).await?;

        let mut due = Vec::new();
        for key in keys {
            if self.is_incremental_due(&key, now).await? || self.is_full_due(&key, now).await? {
                due.push(key);
            }
        }

        let mut state = self.state.lock().await;
        for key in due {
            if state.running.contains_key(&key) || state.pending.contains(&key) {
                continue;
            }
            state.pending.push_back(key);
        }

        debug!(
            "Pending queue of {} refilled: {:?}",
            self.name, state.pending
        );
        Ok(())
    }

    // ========================================================================
    // Due predicates
    // ========================================================================

    /// Due when no run was ever started or the last start is older than the incremental period
    pub async fn is_incremental_due(
        &self,
        project_key: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, CoordinatorError> {
        let last_start = self
            .watermarks
            .read_timestamp(project_key, WatermarkKind::LastIncrementalRunStart)
            .await?;

        Ok(last_start.is_none_or(|last| elapsed(last, now) > self.config.incremental_period))
    }

    /// Due when forced, or when scheduled full runs are enabled and the last one is too old
    pub async fn is_full_due(
        &self,
        project_key: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, CoordinatorError> {
        let forced = self
            .watermarks
            .read_timestamp(project_key, WatermarkKind::ForceFullRequestedAt)
            .await?;
        if forced.is_some() {
            return Ok(true);
        }

        if !self.config.full_updates_enabled() {
            return Ok(false);
        }

        let last_full = self
            .watermarks
            .read_timestamp(project_key, WatermarkKind::LastFullRunCompleted)
            .await?;

        Ok(last_full.is_none_or(|last| elapsed(last, now) > self.config.full_update_period))
    }

    async fn is_full_due_cached(
        &self,
        project_key: &str,
        now: DateTime<Utc>,
        cache: &mut HashMap<String, bool>,
    ) -> Result<bool, CoordinatorError> {
        if let Some(full) = cache.get(project_key) {
            return Ok(*full);
        }
        let full = self.is_full_due(project_key, now).await?;
        cache.insert(project_key.to_string(), full);
        Ok(full)
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Dispatch queued projects while job slots are free
    ///
    /// Returns the number of jobs started.
    pub async fn start_indexers(self: &Arc<Self>) -> Result<usize, CoordinatorError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        self.start_indexers_locked(&mut state, now).await
    }

    async fn start_indexers_locked(
        self: &Arc<Self>,
        state: &mut CoordinatorState,
        now: DateTime<Utc>,
    ) -> Result<usize, CoordinatorError> {
        if self.shutdown.is_cancelled() {
            debug!("Coordinator {} is shut down, not dispatching", self.name);
            return Ok(0);
        }

        let mut full_due = HashMap::new();
        let mut deferred = Vec::new();
        let mut started = 0;
        let mut result = Ok(());

        while state.running.len() < self.config.max_concurrent_jobs {
            let Some(key) = state.pending.pop_front() else {
                break;
            };

            if state.running.contains_key(&key) {
                debug!("{} is already running, dropping it from the queue", key);
                continue;
            }

            match self.try_dispatch(state, &key, now, &mut full_due).await {
                Ok(Dispatch::Started) => started += 1,
                Ok(Dispatch::Deferred) => deferred.push(key),
                Err(e) => {
                    state.pending.push_front(key);
                    result = Err(e);
                    break;
                }
            }
        }

        // Deferred full runs keep their place at the head of the queue
        for key in deferred.into_iter().rev() {
            state.pending.push_front(key);
        }

        result.map(|_| started)
    }

    async fn try_dispatch(
        self: &Arc<Self>,
        state: &mut CoordinatorState,
        project_key: &str,
        now: DateTime<Utc>,
        full_due: &mut HashMap<String, bool>,
    ) -> Result<Dispatch, CoordinatorError> {
        let full = self.is_full_due_cached(project_key, now, full_due).await?;

        if full && self.reserve_last_slot(state, now, full_due).await? {
            debug!(
                "Deferring full run of {}: last free slot is kept for incremental work",
                project_key
            );
            return Ok(Dispatch::Deferred);
        }

        let kind = if full {
            RunKind::Full
        } else {
            RunKind::Incremental
        };

        self.watermarks
            .write_timestamp(project_key, WatermarkKind::LastIncrementalRunStart, now)
            .await?;

        let handle = self.spawn_job(project_key, kind);
        state.running.insert(
            project_key.to_string(),
            RunningJob {
                handle,
                kind,
                started_at: now,
            },
        );

        info!(
            coordinator = %self.name,
            project = %project_key,
            kind = %kind,
            running = state.running.len(),
            "Dispatched project run"
        );
        Ok(Dispatch::Started)
    }

    /// Whether a full run must leave the remaining free slot to queued incremental work
    async fn reserve_last_slot(
        &self,
        state: &CoordinatorState,
        now: DateTime<Utc>,
        full_due: &mut HashMap<String, bool>,
    ) -> Result<bool, CoordinatorError> {
        let max = self.config.max_concurrent_jobs;
        if max <= 1 || state.running.len() + 1 < max {
            return Ok(false);
        }

        let queued: Vec<String> = state.pending.iter().cloned().collect();
        for key in queued {
            if !self.is_full_due_cached(&key, now, full_due).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn spawn_job(self: &Arc<Self>, project_key: &str, kind: RunKind) -> JobHandle {
        let cancel = self.shutdown.child_token();
        let indexer = ProjectIndexer::new(
            project_key,
            kind,
            Arc::clone(&self.source),
            Arc::clone(&self.sink),
            Arc::clone(&self.watermarks),
            Arc::clone(&self.clock),
        );

        let coordinator = Arc::clone(self);
        let job_cancel = cancel.clone();
        let job = Box::pin(async move {
            if let Some(outcome) = indexer.run(&job_cancel).await {
                coordinator.complete_run(outcome).await;
            }
        });

        self.runtime.spawn(project_key, cancel, job)
    }

    // ========================================================================
    // Completion
    // ========================================================================

    /// Record a finished run and release its slot
    pub async fn complete_run(&self, outcome: RunOutcome) {
        self.report_indexing_finished(&outcome.project_key, outcome.success, outcome.kind)
            .await;

        let mut state = self.state.lock().await;
        state
            .last_outcomes
            .insert(outcome.project_key.clone(), outcome);
    }

    /// Release the slot of a finished job and update full-run watermarks
    ///
    /// Only a successful full run stamps the completion time and clears a
    /// pending force request; failures leave both so the project stays due.
    /// The slot is released after those writes so a concurrent tick never
    /// sees the project idle with its force request still set.
    pub async fn report_indexing_finished(&self, project_key: &str, success: bool, kind: RunKind) {
        if kind.is_full() && success {
            self.record_full_run_completed(project_key).await;
        }

        let removed = {
            let mut state = self.state.lock().await;
            state.running.remove(project_key)
        };

        if removed.is_none() {
            debug!(
                "Completion reported for {} which has no registered job",
                project_key
            );
        }
    }

    async fn record_full_run_completed(&self, project_key: &str) {
        let now = self.clock.now();
        if let Err(e) = self
            .watermarks
            .write_timestamp(project_key, WatermarkKind::LastFullRunCompleted, now)
            .await
        {
            warn!(
                "Failed to record full run completion for {}: {}",
                project_key, e
            );
        }
        if let Err(e) = self
            .watermarks
            .delete_timestamp(project_key, WatermarkKind::ForceFullRequestedAt)
            .await
        {
            warn!(
                "Failed to clear full reindex request for {}: {}",
                project_key, e
            );
        }
    }

    /// Drop registry entries of jobs whose task ended without reporting back
    fn reap_finished_jobs(&self, state: &mut CoordinatorState) {
        let finished: Vec<String> = state
            .running
            .iter()
            .filter(|(_, job)| job.handle.is_finished())
            .map(|(key, _)| key.clone())
            .collect();

        for key in finished {
            state.running.remove(&key);
            warn!(
                coordinator = %self.name,
                project = %key,
                "Job ended without reporting completion, releasing its slot"
            );
        }
    }

    // ========================================================================
    // Management
    // ========================================================================

    /// Request a full reindex of one project, or of every tracked project
    ///
    /// A blank or absent key targets all tracked projects. Returns the keys a
    /// request was recorded for; an untracked key yields an empty list.
    pub async fn force_full_reindex(
        &self,
        project_key: Option<&str>,
    ) -> Result<Vec<String>, CoordinatorError> {
        let now = self.clock.now();
        let tracked = self.tracked_project_keys(now).await?;

        let targets: Vec<String> = match project_key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => tracked.into_iter().filter(|k| k == key).collect(),
            None => tracked,
        };

        for key in &targets {
            self.watermarks
                .write_timestamp(key, WatermarkKind::ForceFullRequestedAt, now)
                .await?;
        }

        info!(
            coordinator = %self.name,
            projects = ?targets,
            "Full reindex requested"
        );
        Ok(targets)
    }

    /// Projects this coordinator indexes, exclusions applied
    pub async fn tracked_project_keys(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, CoordinatorError> {
        let keys = match &self.config.project_keys {
            Some(keys) => keys.clone(),
            None => {
                let mut cache = self.project_keys.lock().await;
                match cache.as_ref() {
                    Some(cached)
                        if elapsed(cached.fetched_at, now)
                            < self.config.project_keys_refresh_interval =>
                    {
                        cached.keys.clone()
                    }
                    _ => {
                        let keys = self.source.list_all_project_keys().await?;
                        debug!("Fetched {} project keys for {}", keys.len(), self.name);
                        *cache = Some(CachedProjectKeys {
                            keys: keys.clone(),
                            fetched_at: now,
                        });
                        keys
                    }
                }
            }
        };

        let mut seen = HashSet::new();
        Ok(keys
            .into_iter()
            .filter(|key| !self.config.excluded_project_keys.contains(key))
            .filter(|key| seen.insert(key.clone()))
            .collect())
    }

    /// Current values of all watermarks of a project
    pub async fn project_watermarks(
        &self,
        project_key: &str,
    ) -> Result<ProjectWatermarks, CoordinatorError> {
        let read = |kind| self.watermarks.read_timestamp(project_key, kind);
        Ok(ProjectWatermarks {
            project_key: project_key.to_string(),
            last_incremental_run_start: read(WatermarkKind::LastIncrementalRunStart).await?,
            last_full_run_completed: read(WatermarkKind::LastFullRunCompleted).await?,
            force_full_requested_at: read(WatermarkKind::ForceFullRequestedAt).await?,
            last_item_updated_at: read(WatermarkKind::LastItemUpdatedAt).await?,
        })
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub async fn status(&self) -> CoordinatorStatus {
        let state = self.state.lock().await;
        let mut running: Vec<RunningJobStatus> = state
            .running
            .iter()
            .map(|(key, job)| RunningJobStatus {
                project_key: key.clone(),
                kind: job.kind,
                started_at: job.started_at,
            })
            .collect();
        running.sort_by(|a, b| a.project_key.cmp(&b.project_key));

        CoordinatorStatus {
            name: self.name.clone(),
            shutdown: self.shutdown.is_cancelled(),
            max_concurrent_jobs: self.config.max_concurrent_jobs,
            poll_interval_ms: state.poll_interval.as_millis() as u64,
            pending: state.pending.iter().cloned().collect(),
            running,
            last_outcomes: state.last_outcomes.values().cloned().collect(),
        }
    }

    pub async fn poll_interval(&self) -> Duration {
        self.state.lock().await.poll_interval
    }

    pub async fn running_count(&self) -> usize {
        self.state.lock().await.running.len()
    }

    pub async fn is_running(&self, project_key: &str) -> bool {
        self.state.lock().await.running.contains_key(project_key)
    }

    pub async fn pending_keys(&self) -> Vec<String> {
        self.state.lock().await.pending.iter().cloned().collect()
    }

    /// Wait until no job is registered as running, polling every `poll`
    ///
    /// Jobs whose task ended abnormally are released along the way.
    pub async fn wait_for_running_jobs(&self, poll: Duration) {
        while !self.is_shutdown() {
            {
                let mut state = self.state.lock().await;
                self.reap_finished_jobs(&mut state);
                if state.running.is_empty() {
                    break;
                }
            }
            tokio::time::sleep(poll).await;
        }
    }
}
