//! GitHub REST API source host.
//!
//! File tree loading:
//! 1. `GET /repos/{owner}/{repo}/git/trees/{branch}?recursive=1` lists every blob.
//! 2. Excluded paths (lockfiles, `README.md`, configured globs) are dropped.
//! 3. Blob contents are fetched with at most `max_concurrency` requests in
//!    flight, base64-decoded, and kept only when they are valid UTF-8. A
//!    blob that cannot be fetched is logged and skipped.
//!
//! Commits come from `GET /repos/{owner}/{repo}/commits`; a diff is the
//! same commit endpoint requested with `Accept: application/vnd.github.v3.diff`.
//!
//! The token passed per request wins over the token from the configured
//! environment variable. Anonymous access works for public repositories
//! within GitHub's unauthenticated rate limit.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use globset::GlobSet;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::SourceConfig;
use crate::http;
use crate::models::{RemoteCommit, RemoteFile};
use crate::source::{Credentials, RepoLocation, SourceHost};
use crate::source_git::build_globset;

const MAX_RETRIES: u32 = 2;
const JSON_ACCEPT: &str = "application/vnd.github+json";
const DIFF_ACCEPT: &str = "application/vnd.github.v3.diff";

pub struct GithubSource {
    client: Client,
    api_url: String,
    branch: String,
    exclude: GlobSet,
    max_concurrency: usize,
    env_token: Option<String>,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
}

#[derive(Deserialize)]
struct BlobResponse {
    content: String,
    encoding: String,
}

#[derive(Deserialize)]
struct CommitEntry {
    sha: String,
    commit: CommitDetail,
    author: Option<AccountInfo>,
}

#[derive(Deserialize)]
struct CommitDetail {
    message: Option<String>,
    author: Option<GitSignature>,
}

#[derive(Deserialize)]
struct GitSignature {
    name: Option<String>,
    date: Option<String>,
}

#[derive(Deserialize)]
struct AccountInfo {
    avatar_url: Option<String>,
}

impl GithubSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        Ok(Self {
            client: http::build_client(config.timeout_secs)?,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            branch: config.branch.clone(),
            exclude: build_globset(&config.exclude_globs)?,
            max_concurrency: config.max_concurrency.max(1),
            env_token: config.env_token(),
        })
    }

    fn repo_url(&self, repo: &RepoLocation, tail: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_url, repo.owner, repo.name, tail
        )
    }

    fn request(&self, url: &str, creds: Option<&Credentials>, accept: &str) -> RequestBuilder {
        let builder = self.client.get(url).header("Accept", accept);
        let token = creds.map(|c| c.token.as_str()).or(self.env_token.as_deref());
        match token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn fetch_blob(
        &self,
        repo: &RepoLocation,
        creds: Option<&Credentials>,
        path: String,
        sha: String,
    ) -> Result<Option<RemoteFile>> {
        let url = self.repo_url(repo, &format!("git/blobs/{}", sha));
        let blob: BlobResponse = http::send_with_retry("GitHub", MAX_RETRIES, || {
            self.request(&url, creds, JSON_ACCEPT)
        })
        .await
        .with_context(|| format!("Failed to fetch {}", path))?
        .json()
        .await?;

        let Some(content) = decode_blob(&blob) else {
            warn!(file = %path, "skipping non-text file");
            return Ok(None);
        };
        Ok(Some(RemoteFile { path, content }))
    }
}

/// Decode a blob's content; `None` for unknown encodings or non-UTF-8 bytes.
fn decode_blob(blob: &BlobResponse) -> Option<String> {
    match blob.encoding.as_str() {
        "base64" => {
            let compact: String = blob.content.split_whitespace().collect();
            let bytes = STANDARD.decode(compact).ok()?;
            String::from_utf8(bytes).ok()
        }
        "utf-8" => Some(blob.content.clone()),
        _ => None,
    }
}

fn to_remote_commit(entry: CommitEntry) -> RemoteCommit {
    let signature = entry.commit.author;
    let author_date = signature
        .as_ref()
        .and_then(|s| s.date.as_deref())
        .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_default();

    RemoteCommit {
        hash: entry.sha,
        message: entry.commit.message.unwrap_or_default(),
        author_name: signature.and_then(|s| s.name).unwrap_or_default(),
        author_avatar_url: entry.author.and_then(|a| a.avatar_url).unwrap_or_default(),
        author_date,
    }
}

#[async_trait]
impl SourceHost for GithubSource {
    async fn list_file_tree(
        &self,
        repo: &RepoLocation,
        creds: Option<&Credentials>,
    ) -> Result<Vec<RemoteFile>> {
        let url = self.repo_url(repo, &format!("git/trees/{}?recursive=1", self.branch));
        let tree: TreeResponse = http::send_with_retry("GitHub", MAX_RETRIES, || {
            self.request(&url, creds, JSON_ACCEPT)
        })
        .await
        .with_context(|| format!("Failed to list files of {}@{}", repo.slug(), self.branch))?
        .json()
        .await?;

        if tree.truncated {
            warn!(repo = %repo.slug(), "GitHub truncated the file tree; some files are missing");
        }

        let blobs: Vec<(String, String)> = tree
            .tree
            .into_iter()
            .filter(|e| e.kind == "blob" && !self.exclude.is_match(&e.path))
            .map(|e| (e.path, e.sha))
            .collect();
        debug!(repo = %repo.slug(), files = blobs.len(), "fetching file contents");

        let fetched: Vec<Result<Option<RemoteFile>>> = stream::iter(blobs)
            .map(|(path, sha)| self.fetch_blob(repo, creds, path, sha))
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let mut files = Vec::with_capacity(fetched.len());
        for outcome in fetched {
            match outcome {
                Ok(Some(file)) => files.push(file),
                Ok(None) => {}
                Err(e) => warn!(error = %format!("{:#}", e), "skipping unreadable file"),
            }
        }
        Ok(files)
    }

    async fn list_commits(
        &self,
        repo: &RepoLocation,
        creds: Option<&Credentials>,
        limit: usize,
    ) -> Result<Vec<RemoteCommit>> {
        let url = self.repo_url(repo, &format!("commits?per_page={}", limit.clamp(1, 100)));
        let entries: Vec<CommitEntry> = http::send_with_retry("GitHub", MAX_RETRIES, || {
            self.request(&url, creds, JSON_ACCEPT)
        })
        .await
        .with_context(|| format!("Failed to list commits of {}", repo.slug()))?
        .json()
        .await?;

        Ok(entries.into_iter().map(to_remote_commit).collect())
    }

    async fn fetch_diff(
        &self,
        repo: &RepoLocation,
        creds: Option<&Credentials>,
        hash: &str,
    ) -> Result<String> {
        let url = self.repo_url(repo, &format!("commits/{}", hash));
        let response = http::send_with_retry("GitHub", MAX_RETRIES, || {
            self.request(&url, creds, DIFF_ACCEPT)
        })
        .await
        .with_context(|| format!("Failed to fetch diff of {}", hash))?;
        Ok(response.text().await?)
    }
}
