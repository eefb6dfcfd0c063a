//! Error taxonomy for pipeline jobs.
//!
//! Item-level and persistence-level failures are recovered where they
//! happen (recorded in an [`EnrichmentResult`](crate::models::EnrichmentResult)
//! or logged) and never reach this type. Only failures that stop a whole
//! job are represented here; they end up as `phase = failed` plus
//! `errorDetail` in the job's progress snapshot.

use thiserror::Error;

/// The pipeline stage a [`JobError::Stage`] happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    LoadFiles,
    ListCommits,
    Persist,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::LoadFiles => "load files",
            Stage::ListCommits => "list commits",
            Stage::Persist => "persist",
        };
        f.write_str(name)
    }
}

/// Errors that abort a job.
#[derive(Debug, Error)]
pub enum JobError {
    /// Missing or invalid identifiers or credentials. Raised before any
    /// external call is made.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A whole stage could not proceed, e.g. the repository tree could
    /// not be loaded.
    #[error("{stage} failed: {source:#}")]
    Stage {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },
}

impl JobError {
    pub fn stage(stage: Stage, source: anyhow::Error) -> Self {
        JobError::Stage { stage, source }
    }

    /// Short, user-facing description stored in `errorDetail`.
    pub fn detail(&self) -> String {
        self.to_string()
    }
}
