//! Repository indexing pipeline.
//!
//! Coordinates the full flow for one project:
//!
//! ```text
//! load file tree ──▶ summarize (rate-limited) ──▶ drop failed/blank
//!       ──▶ embed summaries (rate-limited) ──▶ persist (concurrent) ──▶ completed
//! ```
//!
//! Phases published to the tracker: `queued → summarizing → embedding →
//! persisting → completed`, or `failed` when the tree cannot be loaded or
//! the request is invalid. Individual files that fail to summarize, embed
//! or persist are logged and skipped; they never fail the job.
//!
//! Work units: one for loading the tree plus three per file (summarize,
//! embed, persist). Units of files dropped along the way are credited at
//! the point they are dropped.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::embedding::Embedder;
use crate::engine::run_batch;
use crate::enrichers::{FileSummaryEnricher, SummaryEmbeddingEnricher};
use crate::error::{JobError, Stage};
use crate::models::{NewFileRecord, WorkItem};
use crate::rate_limit::RateLimiter;
use crate::source::{Credentials, RepoLocation, SourceHost};
use crate::store::Storage;
use crate::summarizer::Summarizer;
use crate::tracker::{JobPhase, JobReporter, ProgressTracker};

const UNITS_PER_FILE: u64 = 3;

/// Per-stage counts for one indexing run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexReport {
    pub files_loaded: usize,
    /// Files with a non-blank summary.
    pub summarized: usize,
    pub embedded: usize,
    pub persisted: usize,
    /// Files that did not make it to storage.
    pub failed: usize,
}

pub struct IndexingOrchestrator {
    source: Arc<dyn SourceHost>,
    storage: Arc<dyn Storage>,
    tracker: Arc<dyn ProgressTracker>,
    summarize: FileSummaryEnricher,
    embed: SummaryEmbeddingEnricher,
    summarize_limiter: Arc<RateLimiter>,
    embed_limiter: Arc<RateLimiter>,
}

impl IndexingOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<dyn SourceHost>,
        storage: Arc<dyn Storage>,
        tracker: Arc<dyn ProgressTracker>,
        summarizer: Arc<dyn Summarizer>,
        embedder: Arc<dyn Embedder>,
        summarize_limiter: Arc<RateLimiter>,
        embed_limiter: Arc<RateLimiter>,
        max_input_chars: usize,
    ) -> Self {
        Self {
            source,
            storage,
            tracker,
            summarize: FileSummaryEnricher::new(summarizer, max_input_chars),
            embed: SummaryEmbeddingEnricher::new(embedder),
            summarize_limiter,
            embed_limiter,
        }
    }

    /// Index `repo_url` into `project_id`, publishing progress under `job_id`.
    ///
    /// The final snapshot is `completed` on success and `failed` with the
    /// error detail otherwise.
    pub async fn index(
        &self,
        job_id: &str,
        project_id: &str,
        repo_url: &str,
        creds: Option<&Credentials>,
    ) -> Result<IndexReport, JobError> {
        let mut reporter = JobReporter::new(self.tracker.clone(), job_id);

        match self.run(&mut reporter, project_id, repo_url, creds).await {
            Ok(report) => {
                reporter.complete();
                info!(
                    job = job_id,
                    project = project_id,
                    loaded = report.files_loaded,
                    persisted = report.persisted,
                    failed = report.failed,
                    "indexing completed"
                );
                Ok(report)
            }
            Err(e) => {
                error!(job = job_id, project = project_id, error = %e, "indexing failed");
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
    ) -> Result<IndexReport, JobError> {
        if project_id.trim().is_empty() {
            return Err(JobError::Configuration(
                "project id must not be empty".to_string(),
            ));
        }
        let repo = RepoLocation::parse(repo_url)?;

        info!(job = reporter.job_id(), repo = %repo.slug(), "loading file tree");
        let files = self
            .source
            .list_file_tree(&repo, creds)
            .await
            .map_err(|e| JobError::stage(Stage::LoadFiles, e))?;

        let mut report = IndexReport {
            files_loaded: files.len(),
            ..Default::default()
        };
        if files.is_empty() {
            info!(job = reporter.job_id(), "repository has no readable files");
            return Ok(report);
        }

        reporter.set_total(1 + UNITS_PER_FILE * files.len() as u64);
        reporter.credit(1);

        // Stage 1: summarize every file.
        reporter.enter(JobPhase::Summarizing);
        info!(job = reporter.job_id(), files = files.len(), "summarizing files");
        let items: Vec<WorkItem> = files
            .iter()
            .map(|f| WorkItem::new(&f.path, &f.content))
            .collect();
        let summaries = run_batch(&items, &self.summarize, &self.summarize_limiter, |p| {
            reporter.advance(1, &p.current_item, p.estimated_seconds_remaining)
        })
        .await;

        // Stage boundary: only files with a usable summary are embedded.
        let mut to_embed = Vec::with_capacity(summaries.len());
        for result in summaries {
            if result.has_summary() {
                to_embed.push(WorkItem::new(result.id, result.summary));
            } else if result.placeholder {
                debug!(file = %result.id, "blank file, skipping");
            } else if result.success {
                warn!(file = %result.id, "empty summary, skipping file");
            }
        }
        report.summarized = to_embed.len();
        let dropped = (files.len() - to_embed.len()) as u64;
        reporter.credit(dropped * (UNITS_PER_FILE - 1));

        if to_embed.is_empty() {
            report.failed = report.files_loaded;
            return Ok(report);
        }

        // Stage 2: embed the surviving summaries.
        reporter.enter(JobPhase::Embedding);
        info!(job = reporter.job_id(), files = to_embed.len(), "embedding summaries");
        let embedded = run_batch(&to_embed, &self.embed, &self.embed_limiter, |p| {
            reporter.advance(1, &p.current_item, p.estimated_seconds_remaining)
        })
        .await;

        let sources: HashMap<&str, &str> = files
            .iter()
            .map(|f| (f.path.as_str(), f.content.as_str()))
            .collect();
        let records: Vec<NewFileRecord> = embedded
            .into_iter()
            .filter_map(|result| {
                let embedding = result.embedding.filter(|_| result.success)?;
                Some(NewFileRecord {
                    project_id: project_id.to_string(),
                    source_code: sources
                        .get(result.id.as_str())
                        .map(|s| s.to_string())
                        .unwrap_or_default(),
                    file_name: result.id,
                    summary: result.summary,
                    embedding,
                })
            })
            .collect();
        report.embedded = records.len();
        reporter.credit((to_embed.len() - records.len()) as u64);

        if records.is_empty() {
            report.failed = report.files_loaded;
            return Ok(report);
        }

        // Stage 3: persist every record concurrently; one failure never
        // cancels the others.
        reporter.enter(JobPhase::Persisting);
        info!(job = reporter.job_id(), files = records.len(), "persisting file summaries");
        let mut inserts: FuturesUnordered<_> = records
            .iter()
            .map(|record| async move {
                (
                    record.file_name.as_str(),
                    self.storage.create_file_record(record).await,
                )
            })
            .collect();

        while let Some((file_name, outcome)) = inserts.next().await {
            match outcome {
                Ok(_) => report.persisted += 1,
                Err(e) => warn!(
                    file = file_name,
                    error = %format!("{:#}", e),
                    "failed to persist file summary"
                ),
            }
            reporter.advance(1, file_name, 0);
        }

        report.failed = report.files_loaded - report.persisted;
        Ok(report)
    }
}
