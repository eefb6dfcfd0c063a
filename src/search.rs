//! Semantic search over a project's file summaries.
//!
//! The query is embedded with the same provider used at indexing time and
//! compared against every stored summary vector with cosine similarity.
//! Results are sorted by score (descending), then file name (ascending)
//! so equal scores come back in a deterministic order.

use anyhow::{bail, Result};
use serde::Serialize;

use crate::embedding::{cosine_similarity, Embedder};
use crate::store::Storage;

/// One ranked file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMatch {
    pub file_name: String,
    pub summary: String,
    pub score: f32,
}

/// Rank the files of `project_id` by similarity to `query`, best first.
pub async fn search_files(
    storage: &dyn Storage,
    embedder: &dyn Embedder,
    project_id: &str,
    query: &str,
    limit: usize,
) -> Result<Vec<FileMatch>> {
    if query.trim().is_empty() {
        bail!("search query must not be empty");
    }

    let stored = storage.list_file_embeddings(project_id).await?;
    if stored.is_empty() {
        return Ok(Vec::new());
    }

    let query_vec = embedder.embed(query).await?;

    let mut matches: Vec<FileMatch> = stored
        .into_iter()
        .map(|f| FileMatch {
            score: cosine_similarity(&query_vec, &f.embedding),
            file_name: f.file_name,
            summary: f.summary,
        })
        .collect();

    // Sort: score desc, file name asc (deterministic)
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.file_name.cmp(&b.file_name))
    });
    matches.truncate(limit);
    Ok(matches)
}
