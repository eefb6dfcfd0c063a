//! Pollable job progress.
//!
//! A job's orchestrator is the only writer of its [`ProgressSnapshot`];
//! any number of readers (the HTTP `GET /jobs/{id}` handler, the CLI
//! renderer) poll it through the [`ProgressTracker`]. One snapshot is live
//! per job id and every update overwrites it.
//!
//! # Retention
//!
//! Finished snapshots (`completed` / `failed`) stay readable for the
//! retention window after their last update and are then removed by
//! [`ProgressTracker::sweep`]. Running jobs are never swept.
//! [`spawn_sweeper`] runs the sweep on a fixed interval until its
//! cancellation token fires.
//!
//! # Counting
//!
//! Counts are work units of the whole job, not items of the current
//! stage. [`JobReporter`] keeps the running count for one job so that
//! `processedCount == totalCount` is only reached at the end of the job.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Lifecycle phase of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobPhase {
    Queued,
    Summarizing,
    Embedding,
    SyncingCommits,
    Persisting,
    Completed,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobPhase::Queued => "queued",
            JobPhase::Summarizing => "summarizing",
            JobPhase::Embedding => "embedding",
            JobPhase::SyncingCommits => "syncing-commits",
            JobPhase::Persisting => "persisting",
            JobPhase::Completed => "completed",
            JobPhase::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The latest known state of one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub job_id: String,
    pub processed_count: u64,
    pub total_count: u64,
    pub current_item: String,
    pub estimated_seconds_remaining: u64,
    pub phase: JobPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl ProgressSnapshot {
    pub fn queued(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            processed_count: 0,
            total_count: 0,
            current_item: String::new(),
            estimated_seconds_remaining: 0,
            phase: JobPhase::Queued,
            error_detail: None,
        }
    }
}

/// Keyed store of the latest snapshot per job. No operation blocks.
pub trait ProgressTracker: Send + Sync {
    /// Insert or overwrite the snapshot for `snapshot.job_id`.
    fn set_progress(&self, snapshot: ProgressSnapshot);

    fn get_progress(&self, job_id: &str) -> Option<ProgressSnapshot>;

    /// Remove expired entries. Returns how many were removed.
    fn sweep(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Entry {
    snapshot: ProgressSnapshot,
    updated_at: Instant,
}

/// In-process tracker backed by a concurrent map.
pub struct InMemoryProgressTracker {
    entries: DashMap<String, Entry>,
    retention: Duration,
}

impl InMemoryProgressTracker {
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            retention,
        }
    }
}

impl ProgressTracker for InMemoryProgressTracker {
    fn set_progress(&self, snapshot: ProgressSnapshot) {
        self.entries.insert(
            snapshot.job_id.clone(),
            Entry {
                snapshot,
                updated_at: Instant::now(),
            },
        );
    }

    fn get_progress(&self, job_id: &str) -> Option<ProgressSnapshot> {
        self.entries.get(job_id).map(|e| e.snapshot.clone())
    }

    fn sweep(&self) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| self.is_expired(e.value()))
            .map(|e| e.key().clone())
            .collect();

        // Re-check under the shard lock: the job may have been updated
        // between the scan and the removal.
        expired
            .into_iter()
            .filter(|id| self.entries.remove_if(id, |_, e| self.is_expired(e)).is_some())
            .count()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

impl InMemoryProgressTracker {
    fn is_expired(&self, entry: &Entry) -> bool {
        entry.snapshot.phase.is_terminal() && entry.updated_at.elapsed() >= self.retention
    }
}

/// Run [`ProgressTracker::sweep`] every `interval` until `cancel` fires.
///
/// The first sweep happens one full interval after the call.
pub fn spawn_sweeper(
    tracker: Arc<dyn ProgressTracker>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("progress sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = tracker.sweep();
                    if removed > 0 {
                        debug!(removed, remaining = tracker.len(), "swept finished jobs");
                    }
                }
            }
        }
    })
}

/// Publishes one job's progress in work units.
///
/// Holds the running `processed` / `total` counts so orchestrators only
/// say what happened ("three more units done", "now embedding").
pub struct JobReporter {
    tracker: Arc<dyn ProgressTracker>,
    job_id: String,
    phase: JobPhase,
    processed: u64,
    total: u64,
    current_item: String,
    eta_secs: u64,
}

impl JobReporter {
    pub fn new(tracker: Arc<dyn ProgressTracker>, job_id: impl Into<String>) -> Self {
        Self {
            tracker,
            job_id: job_id.into(),
            phase: JobPhase::Queued,
            processed: 0,
            total: 0,
            current_item: String::new(),
            eta_secs: 0,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Set the job's total work units. Does not publish.
    pub fn set_total(&mut self, total: u64) {
        self.total = total;
        self.processed = self.processed.min(total);
    }

    /// Enter `phase` and publish.
    pub fn enter(&mut self, phase: JobPhase) {
        self.phase = phase;
        self.eta_secs = 0;
        self.publish();
    }

    /// Credit `units` as done while working on `item`, and publish.
    pub fn advance(&mut self, units: u64, item: &str, eta_secs: u64) {
        self.processed = (self.processed + units).min(self.total);
        self.current_item = item.to_string();
        self.eta_secs = eta_secs;
        self.publish();
    }

    /// Credit units without publishing (items dropped between stages).
    pub fn credit(&mut self, units: u64) {
        self.processed = (self.processed + units).min(self.total);
    }

    pub fn complete(&mut self) {
        self.processed = self.total;
        self.current_item.clear();
        self.enter(JobPhase::Completed);
    }

    pub fn fail(&mut self, detail: String) {
        self.phase = JobPhase::Failed;
        self.eta_secs = 0;
        let mut snapshot = self.snapshot();
        snapshot.error_detail = Some(detail);
        self.tracker.set_progress(snapshot);
    }

    fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            job_id: self.job_id.clone(),
            processed_count: self.processed,
            total_count: self.total,
            current_item: self.current_item.clone(),
            estimated_seconds_remaining: self.eta_secs,
            phase: self.phase,
            error_detail: None,
        }
    }

    fn publish(&self) {
        self.tracker.set_progress(self.snapshot());
    }
}
