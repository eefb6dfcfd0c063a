//! Fire-and-forget job execution.
//!
//! [`JobRunner`] owns one orchestrator per workload and the rate limiters
//! they share across jobs (one limiter per stage, never shared between
//! stages). `spawn_*` publishes a `queued` snapshot, starts the run on the
//! tokio runtime and returns a [`JobHandle`] right away; callers poll the
//! tracker with the returned job id.

use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::commits::CommitSyncOrchestrator;
use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, Embedder};
use crate::error::JobError;
use crate::indexing::{IndexReport, IndexingOrchestrator};
use crate::models::Project;
use crate::rate_limit::RateLimiter;
use crate::source::{create_source, Credentials, SourceHost};
use crate::store::sqlite::SqliteStorage;
use crate::store::Storage;
use crate::summarizer::{ChatSummarizer, Summarizer};
use crate::tracker::{ProgressSnapshot, ProgressTracker};

/// The external systems a job talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn SourceHost>,
    pub storage: Arc<dyn Storage>,
    pub file_summarizer: Arc<dyn Summarizer>,
    pub commit_summarizer: Arc<dyn Summarizer>,
    pub embedder: Arc<dyn Embedder>,
}

impl Collaborators {
    /// Build the configured implementations. Fails when an API key is missing.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        Ok(Self {
            source: create_source(config)?,
            storage: Arc::new(SqliteStorage::new(pool)),
            file_summarizer: Arc::new(ChatSummarizer::for_files(&config.summarizer)?),
            commit_summarizer: Arc::new(ChatSummarizer::for_commits(&config.summarizer)?),
            embedder: create_embedder(&config.embedding)?,
        })
    }
}

/// Rate ceilings and limits for the pipelines.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub summarize_rpm: u32,
    pub embed_rpm: u32,
    pub max_input_chars: usize,
    pub default_max_commits: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            summarize_rpm: config.summarizer.requests_per_minute,
            embed_rpm: config.embedding.requests_per_minute,
            max_input_chars: config.summarizer.max_input_chars,
            default_max_commits: config.pipeline.max_commits,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            summarize_rpm: 25,
            embed_rpm: 90,
            max_input_chars: 10_000,
            default_max_commits: 10,
        }
    }
}

/// A job that was started in the background.
pub struct JobHandle<T> {
    pub job_id: String,
    pub join: JoinHandle<Result<T, JobError>>,
}

pub struct JobRunner {
    indexing: Arc<IndexingOrchestrator>,
    commits: Arc<CommitSyncOrchestrator>,
    storage: Arc<dyn Storage>,
    tracker: Arc<dyn ProgressTracker>,
    default_max_commits: usize,
}

impl JobRunner {
    pub fn new(
        collaborators: Collaborators,
        tracker: Arc<dyn ProgressTracker>,
        settings: &PipelineSettings,
    ) -> Result<Self, JobError> {
        let file_limiter = Arc::new(RateLimiter::per_minute(settings.summarize_rpm)?);
        let embed_limiter = Arc::new(RateLimiter::per_minute(settings.embed_rpm)?);
        let commit_limiter = Arc::new(RateLimiter::per_minute(settings.summarize_rpm)?);

        let indexing = IndexingOrchestrator::new(
            collaborators.source.clone(),
            collaborators.storage.clone(),
            tracker.clone(),
            collaborators.file_summarizer,
            collaborators.embedder,
            file_limiter,
            embed_limiter,
            settings.max_input_chars,
        );
        let commits = CommitSyncOrchestrator::new(
            collaborators.source,
            collaborators.storage.clone(),
            tracker.clone(),
            collaborators.commit_summarizer,
            commit_limiter,
            settings.max_input_chars,
        );

        Ok(Self {
            indexing: Arc::new(indexing),
            commits: Arc::new(commits),
            storage: collaborators.storage,
            tracker,
            default_max_commits: settings.default_max_commits,
        })
    }

    pub fn tracker(&self) -> &Arc<dyn ProgressTracker> {
        &self.tracker
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    fn start(&self, kind: &str, project: &Project) -> String {
        let job_id = Uuid::new_v4().to_string();
        self.tracker.set_progress(ProgressSnapshot::queued(&job_id));
        info!(job = %job_id, project = %project.id, kind, "job queued");
        job_id
    }

    /// Index `project` in the background.
    pub fn spawn_index(
        &self,
        project: &Project,
        creds: Option<Credentials>,
    ) -> JobHandle<IndexReport> {
        let job_id = self.start("index", project);
        let orchestrator = self.indexing.clone();
        let project = project.clone();
        let id = job_id.clone();

        let join = tokio::spawn(async move {
            orchestrator
                .index(&id, &project.id, &project.repo_url, creds.as_ref())
                .await
        });

        JobHandle { job_id, join }
    }

    /// Sync the newest commits of `project` in the background.
    /// `max_commits` defaults to the configured limit.
    pub fn spawn_sync(
        &self,
        project: &Project,
        creds: Option<Credentials>,
        max_commits: Option<usize>,
    ) -> JobHandle<usize> {
        let job_id = self.start("sync-commits", project);
        let orchestrator = self.commits.clone();
        let project = project.clone();
        let id = job_id.clone();
        let max_commits = max_commits.unwrap_or(self.default_max_commits);

        let join = tokio::spawn(async move {
            orchestrator
                .sync(&id, &project.id, &project.repo_url, creds.as_ref(), max_commits)
                .await
        });

        JobHandle { job_id, join }
    }
}
