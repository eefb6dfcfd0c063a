//! In-memory [`Storage`] implementation for tests.
//!
//! Uses `Vec`s behind `std::sync::RwLock`. Commit uniqueness on
//! `(project_id, commit_hash)` is enforced the same way the SQLite
//! schema enforces it.

use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::models::{NewCommitRecord, NewFileRecord, Project, StoredFileEmbedding};

use super::Storage;

/// In-memory store. Inspection helpers expose what was written.
#[derive(Default)]
pub struct InMemoryStorage {
    projects: RwLock<Vec<Project>>,
    files: RwLock<Vec<NewFileRecord>>,
    commits: RwLock<Vec<NewCommitRecord>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a project under a caller-chosen id.
    pub fn insert_project(&self, id: &str, name: &str, repo_url: &str) -> Project {
        let project = Project {
            id: id.to_string(),
            name: name.to_string(),
            repo_url: repo_url.to_string(),
            created_at: Utc::now(),
        };
        self.projects.write().unwrap().push(project.clone());
        project
    }

    pub fn file_records(&self) -> Vec<NewFileRecord> {
        self.files.read().unwrap().clone()
    }

    pub fn commit_records(&self) -> Vec<NewCommitRecord> {
        self.commits.read().unwrap().clone()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn create_project(&self, name: &str, repo_url: &str) -> Result<Project> {
        if name.trim().is_empty() {
            bail!("project name must not be empty");
        }
        Ok(self.insert_project(&Uuid::new_v4().to_string(), name, repo_url))
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let projects = self.projects.read().unwrap();
        Ok(projects.iter().find(|p| p.id == id).cloned())
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(self.projects.read().unwrap().clone())
    }

    async fn create_file_record(&self, record: &NewFileRecord) -> Result<String> {
        self.files.write().unwrap().push(record.clone());
        Ok(Uuid::new_v4().to_string())
    }

    async fn create_commit_records(
        &self,
        records: &[NewCommitRecord],
        skip_duplicates: bool,
    ) -> Result<usize> {
        let mut stored = self.commits.write().unwrap();
        let exists = |stored: &[NewCommitRecord], r: &NewCommitRecord| {
            stored
                .iter()
                .any(|s| s.project_id == r.project_id && s.commit_hash == r.commit_hash)
        };

        if !skip_duplicates {
            for (i, record) in records.iter().enumerate() {
                if exists(stored.as_slice(), record) || exists(&records[..i], record) {
                    bail!(
                        "duplicate commit {} for project {}",
                        record.commit_hash,
                        record.project_id
                    );
                }
            }
        }

        let mut created = 0;
        for record in records {
            if !exists(stored.as_slice(), record) {
                stored.push(record.clone());
                created += 1;
            }
        }
        Ok(created)
    }

    async fn list_commit_hashes(&self, project_id: &str) -> Result<Vec<String>> {
        let stored = self.commits.read().unwrap();
        Ok(stored
            .iter()
            .filter(|c| c.project_id == project_id)
            .map(|c| c.commit_hash.clone())
            .collect())
    }

    async fn list_file_embeddings(&self, project_id: &str) -> Result<Vec<StoredFileEmbedding>> {
        let files = self.files.read().unwrap();
        Ok(files
            .iter()
            .filter(|f| f.project_id == project_id)
            .map(|f| StoredFileEmbedding {
                file_name: f.file_name.clone(),
                summary: f.summary.clone(),
                embedding: f.embedding.clone(),
            })
            .collect())
    }
}
