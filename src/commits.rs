//! Incremental commit sync.
//!
//! ```text
//! list newest commits ──▶ drop already persisted ──▶ fetch diffs (concurrent)
//!       ──▶ summarize diffs (rate-limited) ──▶ one batch insert ──▶ completed
//! ```
//!
//! Running a sync twice in a row is cheap: the second run finds every
//! commit already persisted and finishes without a single model call.
//!
//! Work units: one for listing commits, one per unseen commit summary,
//! and one for the batch insert.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::dedup::filter_unseen;
use crate::engine::run_batch;
use crate::enrichers::CommitSummaryEnricher;
use crate::error::{JobError, Stage};
use crate::models::{NewCommitRecord, RemoteCommit, WorkItem};
use crate::rate_limit::RateLimiter;
use crate::source::{Credentials, RepoLocation, SourceHost};
use crate::store::Storage;
use crate::summarizer::Summarizer;
use crate::tracker::{JobPhase, JobReporter, ProgressTracker};

pub struct CommitSyncOrchestrator {
    source: Arc<dyn SourceHost>,
    storage: Arc<dyn Storage>,
    tracker: Arc<dyn ProgressTracker>,
    summarize: CommitSummaryEnricher,
    limiter: Arc<RateLimiter>,
}

impl CommitSyncOrchestrator {
    pub fn new(
        source: Arc<dyn SourceHost>,
        storage: Arc<dyn Storage>,
        tracker: Arc<dyn ProgressTracker>,
        summarizer: Arc<dyn Summarizer>,
        limiter: Arc<RateLimiter>,
        max_input_chars: usize,
    ) -> Self {
        Self {
            source,
            storage,
            tracker,
            summarize: CommitSummaryEnricher::new(summarizer, max_input_chars),
            limiter,
        }
    }

    /// Summarize and persist the newest `max_commits` commits that are not
    /// stored yet. Returns the number of newly persisted commits.
    pub async fn sync(
        &self,
        job_id: &str,
        project_id: &str,
        repo_url: &str,
        creds: Option<&Credentials>,
        max_commits: usize,
    ) -> Result<usize, JobError> {
        let mut reporter = JobReporter::new(self.tracker.clone(), job_id);

        match self
            .run(&mut reporter, project_id, repo_url, creds, max_commits)
            .await
        {
            Ok(created) => {
                reporter.complete();
                info!(job = job_id, project = project_id, created, "commit sync completed");
                Ok(created)
            }
            Err(e) => {
                error!(job = job_id, project = project_id, error = %e, "commit sync failed");
                reporter.fail(e.detail());
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        reporter: &mut JobReporter,
        project_id: &str,
        repo_url: &str,
        creds: Option<&Credentials>,
        max_commits: usize,
    ) -> Result<usize, JobError> {
        if project_id.trim().is_empty() {
            return Err(JobError::Configuration(
                "project id must not be empty".to_string(),
            ));
        }
        if max_commits == 0 {
            return Err(JobError::Configuration(
                "max commits must be greater than zero".to_string(),
            ));
        }
        let repo = RepoLocation::parse(repo_url)?;

        let candidates = self
            .source
            .list_commits(&repo, creds, max_commits)
            .await
            .map_err(|e| JobError::stage(Stage::ListCommits, e))?;
        let candidates = newest_first(candidates, max_commits);

        let persisted = self
            .storage
            .list_commit_hashes(project_id)
            .await
            .map_err(|e| JobError::stage(Stage::ListCommits, e))?;
        let unseen = filter_unseen(candidates, &persisted);

        if unseen.is_empty() {
            info!(job = reporter.job_id(), "no new commits");
            return Ok(0);
        }

        reporter.set_total(1 + unseen.len() as u64 + 1);
        reporter.credit(1);
        reporter.enter(JobPhase::SyncingCommits);
        info!(job = reporter.job_id(), commits = unseen.len(), "summarizing new commits");

        let repo = &repo;
        let diffs = join_all(unseen.iter().map(|commit| async move {
            match self.source.fetch_diff(repo, creds, &commit.hash).await {
                Ok(diff) => diff,
                Err(e) => {
                    warn!(
                        commit = %commit.hash,
                        error = %format!("{:#}", e),
                        "failed to fetch diff"
                    );
                    String::new()
                }
            }
        }))
        .await;

        let items: Vec<WorkItem> = unseen
            .iter()
            .zip(diffs)
            .map(|(commit, diff)| WorkItem::new(&commit.hash, diff))
            .collect();
        let summaries = run_batch(&items, &self.summarize, &self.limiter, |p| {
            reporter.advance(1, &p.current_item, p.estimated_seconds_remaining)
        })
        .await;

        let records: Vec<NewCommitRecord> = unseen
            .iter()
            .zip(summaries)
            .map(|(commit, result)| {
                NewCommitRecord::from_remote(project_id, commit, result.summary)
            })
            .collect();

        reporter.enter(JobPhase::Persisting);
        let created = self
            .storage
            .create_commit_records(&records, true)
            .await
            .map_err(|e| JobError::stage(Stage::Persist, e))?;
        reporter.advance(1, "", 0);

        if created < records.len() {
            debug!(
                skipped = records.len() - created,
                "commits persisted concurrently by another job were skipped"
            );
        }
        Ok(created)
    }
}

/// Sort by author date, newest first, and keep at most `limit`. Commits
/// with equal dates keep the order the source returned them in.
pub fn newest_first(mut commits: Vec<RemoteCommit>, limit: usize) -> Vec<RemoteCommit> {
    commits.sort_by(|a, b| b.author_date.cmp(&a.author_date));
    commits.truncate(limit);
    commits
}
