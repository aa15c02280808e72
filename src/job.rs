//! Job state machine and registry
//!
//! A [`JobHandle`] owns the mutable state of one download job behind a
//! `RwLock` and enforces the lifecycle: `Queued -> Downloading -> Complete`
//! (or `Failed` from any non-terminal state). Terminal states are final;
//! mutations arriving after termination are ignored so repeated polls of a
//! finished job always see the same snapshot.
//!
//! The [`JobRegistry`] maps job IDs to handles for the lifetime of the
//! process. Jobs are never evicted.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::types::{ItemResult, ItemStatus, JobId, JobSnapshot, JobStatus};

#[derive(Debug)]
struct JobState {
    status: JobStatus,
    message: String,
    total_items: usize,
    succeeded: usize,
    failed: usize,
    results: Vec<ItemResult>,
    finished: Option<Instant>,
}

/// Shared handle to one job's state.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    query: String,
    started_at: DateTime<Utc>,
    started_instant: Instant,
    state: RwLock<JobState>,
}

impl JobHandle {
    /// Create a freshly queued job for `query`.
    pub fn new(id: JobId, query: impl Into<String>) -> Self {
        Self {
            id,
            query: query.into(),
            started_at: Utc::now(),
            started_instant: Instant::now(),
            state: RwLock::new(JobState {
                status: JobStatus::Queued,
                message: "Queued".to_string(),
                total_items: 0,
                succeeded: 0,
                failed: 0,
                results: Vec::new(),
                finished: None,
            }),
        }
    }

    /// The job's identifier
    pub fn id(&self) -> JobId {
        self.id
    }

    /// The original query string
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Whether the job has reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.read().status.is_terminal()
    }

    /// Current status
    pub fn status(&self) -> JobStatus {
        self.read().status
    }

    /// Transition `Queued -> Downloading` with a status message.
    /// No-op in any other state.
    pub fn mark_downloading(&self, message: impl Into<String>) {
        let mut state = self.write();
        if state.status == JobStatus::Queued {
            state.status = JobStatus::Downloading;
            state.message = message.into();
        }
    }

    /// Update the human-readable status message. Ignored once terminal.
    pub fn set_message(&self, message: impl Into<String>) {
        let mut state = self.write();
        if !state.status.is_terminal() {
            state.message = message.into();
        }
    }

    /// Record the resolved item count. Ignored once terminal.
    pub fn set_total(&self, total: usize) {
        let mut state = self.write();
        if !state.status.is_terminal() {
            state.total_items = total;
        }
    }

    /// Append one terminal item record and bump the matching counter.
    /// Ignored once terminal.
    pub fn record_result(&self, result: ItemResult) {
        let mut state = self.write();
        if state.status.is_terminal() {
            return;
        }
        match result.status {
            ItemStatus::Success => state.succeeded += 1,
            ItemStatus::Failed => state.failed += 1,
        }
        state.results.push(result);
    }

    /// Transition to `Complete`, freezing the elapsed clock.
    /// No-op if already terminal.
    pub fn complete(&self, message: impl Into<String>) {
        let mut state = self.write();
        if state.status.is_terminal() {
            return;
        }
        state.status = JobStatus::Complete;
        state.message = message.into();
        state.finished = Some(Instant::now());
    }

    /// Transition to `Failed` with an orchestration error message.
    /// No-op if already terminal.
    pub fn fail(&self, message: impl Into<String>) {
        let mut state = self.write();
        if state.status.is_terminal() {
            return;
        }
        state.status = JobStatus::Failed;
        state.message = message.into();
        state.finished = Some(Instant::now());
    }

    /// Consistent point-in-time view of the job. Terminal snapshots are
    /// stable across repeated calls, including the elapsed clock.
    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.read();
        let completed = state.succeeded + state.failed;
        let progress = if state.total_items == 0 {
            0
        } else {
            (100 * completed / state.total_items).min(100) as u8
        };
        let elapsed = match state.finished {
            Some(finished) => finished - self.started_instant,
            None => self.started_instant.elapsed(),
        };

        JobSnapshot {
            job_id: self.id,
            query: self.query.clone(),
            status: state.status,
            progress,
            message: state.message.clone(),
            total_items: state.total_items,
            succeeded: state.succeeded,
            failed: state.failed,
            started_at: self.started_at,
            elapsed_secs: elapsed.as_secs_f64(),
            results: state.results.clone(),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, JobState> {
        // A poisoned lock means a writer panicked; the state itself is a
        // plain record, so continue with whatever it holds.
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, JobState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Process-lifetime map of all submitted jobs.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<JobHandle>>>,
}

impl JobRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new job handle
    pub fn insert(&self, handle: Arc<JobHandle>) {
        self.lock_write().insert(handle.id(), handle);
    }

    /// Look up a job by ID
    pub fn get(&self, id: JobId) -> Result<Arc<JobHandle>> {
        self.lock_read()
            .get(&id)
            .cloned()
            .ok_or(Error::JobNotFound(id))
    }

    /// Number of jobs not yet terminal
    pub fn active_count(&self) -> usize {
        self.lock_read()
            .values()
            .filter(|job| !job.is_terminal())
            .count()
    }

    /// Total number of jobs ever registered
    pub fn total_count(&self) -> usize {
        self.lock_read().len()
    }

    fn lock_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<JobId, Arc<JobHandle>>> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<JobId, Arc<JobHandle>>> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }
}
