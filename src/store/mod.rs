//! Storage abstraction for repo-digest.
//!
//! The [`Storage`] trait covers everything the pipelines and the retrieval
//! path need from the relational store, so backends are pluggable:
//! [`SqliteStorage`](sqlite::SqliteStorage) for real use and
//! [`InMemoryStorage`](memory::InMemoryStorage) for tests.
//!
//! Implementations must be `Send + Sync` to be shared between jobs.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{NewCommitRecord, NewFileRecord, Project, StoredFileEmbedding};

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_project`](Storage::create_project) | Register a repository |
/// | [`get_project`](Storage::get_project) | Resolve a project id |
/// | [`list_projects`](Storage::list_projects) | All registered projects |
/// | [`create_file_record`](Storage::create_file_record) | Persist one file summary + vector |
/// | [`create_commit_records`](Storage::create_commit_records) | Batch insert commit summaries |
/// | [`list_commit_hashes`](Storage::list_commit_hashes) | Hashes already persisted for a project |
/// | [`list_file_embeddings`](Storage::list_file_embeddings) | Vectors for retrieval |
#[async_trait]
pub trait Storage: Send + Sync {
    async fn create_project(&self, name: &str, repo_url: &str) -> Result<Project>;

    async fn get_project(&self, id: &str) -> Result<Option<Project>>;

    async fn list_projects(&self) -> Result<Vec<Project>>;

    /// Insert one file record. Returns the new record id.
    async fn create_file_record(&self, record: &NewFileRecord) -> Result<String>;

    /// Insert commit records in one batch and return how many were created.
    ///
    /// With `skip_duplicates`, a record whose `(project_id, commit_hash)`
    /// already exists is silently skipped; otherwise it fails the batch.
    async fn create_commit_records(
        &self,
        records: &[NewCommitRecord],
        skip_duplicates: bool,
    ) -> Result<usize>;

    async fn list_commit_hashes(&self, project_id: &str) -> Result<Vec<String>>;

    async fn list_file_embeddings(&self, project_id: &str) -> Result<Vec<StoredFileEmbedding>>;
}
