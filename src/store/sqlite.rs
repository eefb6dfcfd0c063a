//! SQLite-backed [`Storage`] implementation.
//!
//! Timestamps are stored as Unix seconds. Embeddings are stored as BLOBs
//! produced by [`vec_to_blob`].

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::models::{NewCommitRecord, NewFileRecord, Project, StoredFileEmbedding};

use super::Storage;

/// SQLite implementation of the [`Storage`] trait.
///
/// Wraps a [`SqlitePool`] whose schema was created by
/// [`migrate_pool`](crate::migrate::migrate_pool).
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn from_ts(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

fn project_from_row(row: &sqlx::sqlite::SqliteRow) -> Project {
    Project {
        id: row.get("id"),
        name: row.get("name"),
        repo_url: row.get("repo_url"),
        created_at: from_ts(row.get("created_at")),
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_project(&self, name: &str, repo_url: &str) -> Result<Project> {
        if name.trim().is_empty() {
            bail!("project name must not be empty");
        }
        let project = Project {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            repo_url: repo_url.to_string(),
            created_at: from_ts(Utc::now().timestamp()),
        };

        sqlx::query("INSERT INTO projects (id, name, repo_url, created_at) VALUES (?, ?, ?, ?)")
            .bind(&project.id)
            .bind(&project.name)
            .bind(&project.repo_url)
            .bind(project.created_at.timestamp())
            .execute(&self.pool)
            .await?;

        Ok(project)
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT id, name, repo_url, created_at FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(project_from_row))
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query(
            "SELECT id, name, repo_url, created_at FROM projects ORDER BY created_at, name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(project_from_row).collect())
    }

    async fn create_file_record(&self, record: &NewFileRecord) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let blob = vec_to_blob(&record.embedding);

        sqlx::query(
            r#"
            INSERT INTO file_summaries (id, project_id, file_name, summary, source_code,
                                        embedding, dims, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&record.project_id)
        .bind(&record.file_name)
        .bind(&record.summary)
        .bind(&record.source_code)
        .bind(&blob)
        .bind(record.embedding.len() as i64)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn create_commit_records(
        &self,
        records: &[NewCommitRecord],
        skip_duplicates: bool,
    ) -> Result<usize> {
        let sql = if skip_duplicates {
            r#"
            INSERT OR IGNORE INTO commits (id, project_id, commit_hash, commit_message,
                                           author_name, author_avatar_url, committed_at,
                                           summary, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#
        } else {
            r#"
            INSERT INTO commits (id, project_id, commit_hash, commit_message,
                                 author_name, author_avatar_url, committed_at,
                                 summary, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#
        };

        let now = Utc::now().timestamp();
        let mut created = 0usize;
        let mut tx = self.pool.begin().await?;

        for record in records {
            let result = sqlx::query(sql)
                .bind(Uuid::new_v4().to_string())
                .bind(&record.project_id)
                .bind(&record.commit_hash)
                .bind(&record.commit_message)
                .bind(&record.author_name)
                .bind(&record.author_avatar_url)
                .bind(record.committed_at.timestamp())
                .bind(&record.summary)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            created += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn list_commit_hashes(&self, project_id: &str) -> Result<Vec<String>> {
        let hashes = sqlx::query_scalar("SELECT commit_hash FROM commits WHERE project_id = ?")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(hashes)
    }

    async fn list_file_embeddings(&self, project_id: &str) -> Result<Vec<StoredFileEmbedding>> {
        let rows = sqlx::query(
            "SELECT file_name, summary, embedding FROM file_summaries WHERE project_id = ? ORDER BY file_name",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                StoredFileEmbedding {
                    file_name: row.get("file_name"),
                    summary: row.get("summary"),
                    embedding: blob_to_vec(&blob),
                }
            })
            .collect())
    }
}
