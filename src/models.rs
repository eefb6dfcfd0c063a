//! Core data models used throughout repo-digest.
//!
//! These types represent the items that flow through the enrichment
//! pipeline (work items and their results), what the source host returns
//! (files and commits), and what the storage layer persists.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One unit submitted to the enrichment engine.
///
/// `id` is a file path or a commit hash. `payload` is whatever the stage
/// operates on: file content, a summary to embed, or a diff.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub id: String,
    pub payload: String,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.payload.trim().is_empty()
    }
}

/// What an enricher produces for a single successful item.
#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    pub summary: String,
    pub embedding: Option<Vec<f32>>,
}

impl Enrichment {
    pub fn summary(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            embedding: None,
        }
    }
}

/// Output of processing one [`WorkItem`]. Failures are represented, not dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentResult {
    pub id: String,
    pub summary: String,
    pub embedding: Option<Vec<f32>>,
    pub success: bool,
    /// The input was blank and `summary` is the enricher's stand-in text.
    pub placeholder: bool,
    pub error: Option<String>,
}

impl EnrichmentResult {
    pub fn ok(id: impl Into<String>, enrichment: Enrichment) -> Self {
        Self {
            id: id.into(),
            summary: enrichment.summary,
            embedding: enrichment.embedding,
            success: true,
            placeholder: false,
            error: None,
        }
    }

    /// Result for a blank input: successful, but carrying stand-in text.
    pub fn placeholder(id: impl Into<String>, enrichment: Enrichment) -> Self {
        Self {
            placeholder: true,
            ..Self::ok(id, enrichment)
        }
    }

    pub fn failed(id: impl Into<String>, placeholder: impl Into<String>, error: String) -> Self {
        Self {
            id: id.into(),
            summary: placeholder.into(),
            embedding: None,
            success: false,
            placeholder: false,
            error: Some(error),
        }
    }

    /// True when the item succeeded on real input and produced non-blank text.
    pub fn has_summary(&self) -> bool {
        self.success && !self.placeholder && !self.summary.trim().is_empty()
    }
}

/// A file as returned by the source host.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFile {
    pub path: String,
    pub content: String,
}

/// A commit as returned by the source host.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCommit {
    pub hash: String,
    pub message: String,
    pub author_name: String,
    pub author_avatar_url: String,
    pub author_date: DateTime<Utc>,
}

/// A registered project: the mapping from a project id to its repository.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub repo_url: String,
    pub created_at: DateTime<Utc>,
}

/// A file summary and its embedding, ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFileRecord {
    pub project_id: String,
    pub file_name: String,
    pub summary: String,
    pub source_code: String,
    pub embedding: Vec<f32>,
}

/// A summarized commit, ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCommitRecord {
    pub project_id: String,
    pub commit_hash: String,
    pub commit_message: String,
    pub author_name: String,
    pub author_avatar_url: String,
    pub committed_at: DateTime<Utc>,
    pub summary: String,
}

impl NewCommitRecord {
    pub fn from_remote(project_id: &str, commit: &RemoteCommit, summary: String) -> Self {
        Self {
            project_id: project_id.to_string(),
            commit_hash: commit.hash.clone(),
            commit_message: commit.message.clone(),
            author_name: commit.author_name.clone(),
            author_avatar_url: commit.author_avatar_url.clone(),
            committed_at: commit.author_date,
            summary,
        }
    }
}

/// A persisted file summary with its vector, as read back for retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFileEmbedding {
    pub file_name: String,
    pub summary: String,
    pub embedding: Vec<f32>,
}
