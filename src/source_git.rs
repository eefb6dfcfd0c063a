//! Source host backed by a local clone and the `git` CLI.
//!
//! Workflow:
//! 1. Determine a cache directory for the clone (`[source].cache_dir`, or
//!    `.git-cache/<hash of url>` next to the database).
//! 2. Shallow-clone on first use, otherwise fetch and hard-reset to the
//!    branch. History is kept one commit deeper than the newest commits
//!    that get summarized, so the oldest of them still diffs against its
//!    parent.
//! 3. Walk the working tree, applying exclude globs.
//! 4. `git log` / `git show` answer commit listing and diffs.
//!
//! All git and filesystem work runs on the blocking thread pool. Work on
//! one checkout is serialized by a per-directory lock, so an indexing job
//! and a commit sync on the same repository never run git in the same
//! working tree at once.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tokio::sync::Mutex;
use walkdir::WalkDir;

use crate::config::Config;
use crate::models::{RemoteCommit, RemoteFile};
use crate::source::{Credentials, RepoLocation, SourceHost};

const FIELD_SEP: char = '\x1f';
const RECORD_SEP: char = '\x1e';

pub struct GitCliSource {
    cache_root: PathBuf,
    branch: String,
    exclude: GlobSet,
    env_token: Option<String>,
    /// Commits of history kept in a fresh clone.
    history_depth: usize,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl GitCliSource {
    pub fn new(config: &Config) -> Result<Self> {
        let cache_root = match &config.source.cache_dir {
            Some(dir) => dir.clone(),
            None => config
                .db
                .path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(".git-cache"),
        };

        let mut excludes = vec!["**/.git/**".to_string(), ".git/**".to_string()];
        excludes.extend(config.source.exclude_globs.clone());

        Ok(Self {
            cache_root,
            branch: config.source.branch.clone(),
            exclude: build_globset(&excludes)?,
            env_token: config.source.env_token(),
            history_depth: config.pipeline.max_commits + 1,
            locks: DashMap::new(),
        })
    }

    fn checkout_dir(&self, repo: &RepoLocation) -> PathBuf {
        self.cache_root.join(short_hash(&repo.url))
    }

    fn token(&self, creds: Option<&Credentials>) -> Option<String> {
        creds.map(|c| c.token.clone()).or_else(|| self.env_token.clone())
    }

    fn checkout_lock(&self, dir: &Path) -> Arc<Mutex<()>> {
        self.locks
            .entry(dir.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run blocking git work against a clone of `repo`.
    ///
    /// With `refresh = Some(depth)` an existing clone is first fetched to
    /// `depth` commits and reset to the branch head. A missing clone is
    /// always created, at `depth` or the default history depth.
    async fn with_checkout<T, F>(
        &self,
        repo: &RepoLocation,
        creds: Option<&Credentials>,
        refresh: Option<usize>,
        work: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T> + Send + 'static,
    {
        let dir = self.checkout_dir(repo);
        let url = repo.url.clone();
        let branch = self.branch.clone();
        let token = self.token(creds);
        let clone_depth = refresh.unwrap_or(self.history_depth);

        let _guard = self.checkout_lock(&dir).lock_owned().await;
        tokio::task::spawn_blocking(move || {
            if !dir.join(".git").exists() {
                git_clone(&url, &branch, clone_depth, token.as_deref(), &dir)?;
            } else if let Some(depth) = refresh {
                git_pull(&dir, &branch, depth, token.as_deref())?;
            }
            work(&dir)
        })
        .await
        .context("git worker panicked")?
    }
}

#[async_trait]
impl SourceHost for GitCliSource {
    async fn list_file_tree(
        &self,
        repo: &RepoLocation,
        creds: Option<&Credentials>,
    ) -> Result<Vec<RemoteFile>> {
        let exclude = self.exclude.clone();
        let depth = self.history_depth;
        self.with_checkout(repo, creds, Some(depth), move |dir| walk_files(dir, &exclude))
            .await
    }

    async fn list_commits(
        &self,
        repo: &RepoLocation,
        creds: Option<&Credentials>,
        limit: usize,
    ) -> Result<Vec<RemoteCommit>> {
        let depth = (limit + 1).max(self.history_depth);
        self.with_checkout(repo, creds, Some(depth), move |dir| git_log(dir, limit))
            .await
    }

    async fn fetch_diff(
        &self,
        repo: &RepoLocation,
        creds: Option<&Credentials>,
        hash: &str,
    ) -> Result<String> {
        if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!("invalid commit hash: '{}'", hash);
        }
        let hash = hash.to_string();
        self.with_checkout(repo, creds, None, move |dir| git_show(dir, &hash))
            .await
    }
}

/// `git -c http.extraHeader=...` arguments for an authenticated HTTPS remote.
fn auth_args(token: Option<&str>) -> Vec<String> {
    match token {
        Some(token) => {
            let basic = STANDARD.encode(format!("x-access-token:{}", token));
            vec![
                "-c".to_string(),
                format!("http.extraHeader=Authorization: Basic {}", basic),
            ]
        }
        None => Vec::new(),
    }
}

fn run_git(dir: Option<&Path>, args: &[String], what: &str) -> Result<String> {
    let mut cmd = Command::new("git");
    cmd.args(args);
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }

    let output = cmd
        .output()
        .with_context(|| format!("Failed to execute 'git {}'. Is git installed?", what))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git {} failed: {}", what, stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn clone_args(url: &str, branch: &str, depth: usize, dest: &Path) -> Vec<String> {
    vec![
        "clone".to_string(),
        format!("--depth={}", depth.max(1)),
        "--branch".to_string(),
        branch.to_string(),
        "--single-branch".to_string(),
        url.to_string(),
        dest.to_string_lossy().into_owned(),
    ]
}

fn fetch_args(branch: &str, depth: usize) -> Vec<String> {
    vec![
        "fetch".to_string(),
        format!("--depth={}", depth.max(1)),
        "origin".to_string(),
        branch.to_string(),
    ]
}

fn git_clone(
    url: &str,
    branch: &str,
    depth: usize,
    token: Option<&str>,
    dest: &Path,
) -> Result<()> {
    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create cache directory: {}", dest.display()))?;

    let mut args = auth_args(token);
    args.extend(clone_args(url, branch, depth, dest));
    run_git(None, &args, "clone")?;
    Ok(())
}

fn git_pull(repo_dir: &Path, branch: &str, depth: usize, token: Option<&str>) -> Result<()> {
    let mut args = auth_args(token);
    args.extend(fetch_args(branch, depth));
    run_git(Some(repo_dir), &args, "fetch")?;

    let remote_ref = format!("origin/{}", branch);
    run_git(
        Some(repo_dir),
        &["reset".to_string(), "--hard".to_string(), remote_ref],
        "reset",
    )?;
    Ok(())
}

fn walk_files(root: &Path, exclude: &GlobSet) -> Result<Vec<RemoteFile>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude.is_match(&rel_str) {
            continue;
        }

        // Binary files are not summarized.
        let Ok(content) = std::fs::read_to_string(path) else {
            continue;
        };

        files.push(RemoteFile {
            path: rel_str,
            content,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn git_log(repo_dir: &Path, limit: usize) -> Result<Vec<RemoteCommit>> {
    let args = vec![
        "log".to_string(),
        format!("--max-count={}", limit),
        "--format=%H%x1f%an%x1f%aI%x1f%B%x1e".to_string(),
    ];
    let out = run_git(Some(repo_dir), &args, "log")?;
    Ok(parse_log(&out))
}

fn parse_log(out: &str) -> Vec<RemoteCommit> {
    out.split(RECORD_SEP)
        .filter_map(|record| {
            let record = record.trim_start_matches('\n');
            if record.trim().is_empty() {
                return None;
            }
            let mut fields = record.splitn(4, FIELD_SEP);
            let hash = fields.next()?.trim().to_string();
            let author_name = fields.next()?.to_string();
            let author_date = DateTime::parse_from_rfc3339(fields.next()?.trim())
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_default();
            let message = fields.next().unwrap_or_default().trim_end().to_string();

            Some(RemoteCommit {
                hash,
                message,
                author_name,
                author_avatar_url: String::new(),
                author_date,
            })
        })
        .collect()
}

fn git_show(repo_dir: &Path, hash: &str) -> Result<String> {
    let args = vec![
        "show".to_string(),
        "--format=".to_string(),
        "--patch".to_string(),
        hash.to_string(),
    ];
    run_git(Some(repo_dir), &args, "show")
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())[..12].to_string()
}

pub(crate) fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
