//! Source host abstraction: where repository files and commits come from.
//!
//! Implementations:
//! - [`GithubSource`](crate::source_github::GithubSource): GitHub REST API.
//! - [`GitCliSource`](crate::source_git::GitCliSource): local clone driven by the `git` CLI.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::Config;
use crate::error::JobError;
use crate::models::{RemoteCommit, RemoteFile};

/// An access token for the source host, supplied per request.
#[derive(Clone)]
pub struct Credentials {
    pub token: String,
}

impl Credentials {
    /// `None` for a missing or blank token.
    pub fn from_token(token: Option<String>) -> Option<Self> {
        token
            .filter(|t| !t.trim().is_empty())
            .map(|token| Self { token })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credentials(***)")
    }
}

/// A GitHub repository, parsed from its URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLocation {
    pub owner: String,
    pub name: String,
    /// The URL as registered, used for cloning.
    pub url: String,
}

impl RepoLocation {
    /// Parse `https://github.com/<owner>/<repo>[.git][/]` or
    /// `git@github.com:<owner>/<repo>.git`.
    pub fn parse(url: &str) -> Result<Self, JobError> {
        let trimmed = url.trim();
        let path = trimmed
            .strip_prefix("git@github.com:")
            .or_else(|| {
                trimmed
                    .strip_prefix("https://")
                    .or_else(|| trimmed.strip_prefix("http://"))
                    .and_then(|rest| rest.strip_prefix("www.").or(Some(rest)))
                    .and_then(|rest| rest.strip_prefix("github.com/"))
            })
            .ok_or_else(|| {
                JobError::Configuration(format!("not a GitHub repository URL: '{}'", url))
            })?;

        let mut parts = path.trim_end_matches('/').splitn(3, '/');
        let owner = parts.next().unwrap_or_default();
        let name = parts.next().unwrap_or_default().trim_end_matches(".git");
        if owner.is_empty() || name.is_empty() {
            return Err(JobError::Configuration(format!(
                "repository URL must name an owner and a repository: '{}'",
                url
            )));
        }

        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
            url: trimmed.to_string(),
        })
    }

    /// `owner/name`.
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Lists repository files and commits, and fetches commit diffs.
#[async_trait]
pub trait SourceHost: Send + Sync {
    /// Every readable file on the configured branch, minus excluded paths.
    async fn list_file_tree(
        &self,
        repo: &RepoLocation,
        creds: Option<&Credentials>,
    ) -> Result<Vec<RemoteFile>>;

    /// Up to `limit` recent commits, newest first.
    async fn list_commits(
        &self,
        repo: &RepoLocation,
        creds: Option<&Credentials>,
        limit: usize,
    ) -> Result<Vec<RemoteCommit>>;

    /// The unified diff of one commit.
    async fn fetch_diff(
        &self,
        repo: &RepoLocation,
        creds: Option<&Credentials>,
        hash: &str,
    ) -> Result<String>;
}

/// Build the source host named by `[source].provider`.
pub fn create_source(config: &Config) -> Result<Arc<dyn SourceHost>> {
    match config.source.provider.as_str() {
        "github" => Ok(Arc::new(crate::source_github::GithubSource::new(
            &config.source,
        )?)),
        "git" => Ok(Arc::new(crate::source_git::GitCliSource::new(config)?)),
        other => anyhow::bail!("Unknown source provider: {}", other),
    }
}
