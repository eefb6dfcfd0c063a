//! # repo-digest CLI (`rdigest`)
//!
//! The `rdigest` binary registers repositories, runs the indexing and
//! commit-sync pipelines in the foreground, searches indexed files, and
//! starts the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! rdigest --config ./config/rdigest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rdigest init` | Create the SQLite database and run schema migrations |
//! | `rdigest project add <name> <repo-url>` | Register a repository |
//! | `rdigest project list` | List registered projects |
//! | `rdigest index <project-id>` | Summarize, embed, and store every file |
//! | `rdigest sync-commits <project-id>` | Summarize commits that are not stored yet |
//! | `rdigest search <project-id> "<query>"` | Semantic search over file summaries |
//! | `rdigest serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! rdigest init
//! rdigest project add genai-stack https://github.com/docker/genai-stack
//! GROQ_API_KEY=... GEMINI_API_KEY=... rdigest index <project-id>
//! rdigest sync-commits <project-id> --max-commits 20 --progress json
//! rdigest search <project-id> "where is the vector index configured"
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use repo_digest::config::{self, Config};
use repo_digest::db;
use repo_digest::embedding::create_embedder;
use repo_digest::jobs::{Collaborators, JobRunner, PipelineSettings};
use repo_digest::logging;
use repo_digest::migrate;
use repo_digest::models::Project;
use repo_digest::progress::{self, ProgressMode};
use repo_digest::search::search_files;
use repo_digest::server;
use repo_digest::source::RepoLocation;
use repo_digest::store::sqlite::SqliteStorage;
use repo_digest::store::Storage;
use repo_digest::tracker::{InMemoryProgressTracker, ProgressTracker};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// repo-digest: AI summaries and embeddings for repository files and commits.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rdigest.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rdigest",
    about = "repo-digest: rate-limited AI summaries and embeddings for repository files and commits",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rdigest.toml")]
    config: PathBuf,

    /// Progress output on stderr: `human`, `json`, or `off`.
    /// Defaults to `human` when stderr is a terminal.
    #[arg(long, global = true)]
    progress: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the projects, file_summaries
    /// and commits tables. Safe to run more than once.
    Init,

    /// Manage registered projects.
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Index every file of a project's repository.
    Index {
        /// Project id (see `rdigest project list`).
        project: String,
    },

    /// Summarize and store the newest commits that are not stored yet.
    SyncCommits {
        /// Project id (see `rdigest project list`).
        project: String,

        /// How many of the newest commits to consider. Defaults to `[pipeline].max_commits`.
        #[arg(long)]
        max_commits: Option<usize>,
    },

    /// Semantic search over a project's file summaries.
    Search {
        /// Project id.
        project: String,

        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },

    /// Start the HTTP API.
    Serve,
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Register a GitHub repository as a project.
    Add {
        /// Display name.
        name: String,
        /// Repository URL, e.g. `https://github.com/owner/repo`.
        repo_url: String,
    },
    /// List registered projects.
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init_tracing(&cfg.logging)?;
    let mode = ProgressMode::from_flag(cli.progress.as_deref())?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Project { action } => {
            let storage = SqliteStorage::new(db::connect(&cfg).await?);
            match action {
                ProjectAction::Add { name, repo_url } => {
                    RepoLocation::parse(&repo_url)?;
                    let project = storage.create_project(&name, &repo_url).await?;
                    println!("{}", project.id);
                }
                ProjectAction::List => {
                    let projects = storage.list_projects().await?;
                    if projects.is_empty() {
                        println!("No projects.");
                    }
                    for p in projects {
                        println!("{:<38} {:<24} {}", p.id, p.name, p.repo_url);
                    }
                }
            }
            storage.pool().close().await;
        }
        Commands::Index { project } => {
            let (runner, tracker) = build_runner(&cfg).await?;
            let project = require_project(runner.storage().as_ref(), &project).await?;

            let handle = runner.spawn_index(&project, None);
            let watcher = tokio::spawn(progress::watch(
                tracker,
                handle.job_id.clone(),
                mode.reporter(),
                POLL_INTERVAL,
            ));
            let outcome = handle.join.await?;
            let _ = watcher.await;
            let report = outcome?;

            println!("index {}", project.name);
            println!("  files loaded: {}", report.files_loaded);
            println!("  summarized: {}", report.summarized);
            println!("  embedded: {}", report.embedded);
            println!("  persisted: {}", report.persisted);
            println!("  failed: {}", report.failed);
            println!("ok");
        }
        Commands::SyncCommits {
            project,
            max_commits,
        } => {
            let (runner, tracker) = build_runner(&cfg).await?;
            let project = require_project(runner.storage().as_ref(), &project).await?;

            let handle = runner.spawn_sync(&project, None, max_commits);
            let watcher = tokio::spawn(progress::watch(
                tracker,
                handle.job_id.clone(),
                mode.reporter(),
                POLL_INTERVAL,
            ));
            let outcome = handle.join.await?;
            let _ = watcher.await;
            let created = outcome?;

            println!("sync-commits {}", project.name);
            println!("  new commits: {}", created);
            println!("ok");
        }
        Commands::Search {
            project,
            query,
            limit,
        } => {
            let storage = SqliteStorage::new(db::connect(&cfg).await?);
            let project = require_project(&storage, &project).await?;
            let embedder = create_embedder(&cfg.embedding)?;

            let results =
                search_files(&storage, embedder.as_ref(), &project.id, &query, limit).await?;
            if results.is_empty() {
                println!("No results.");
            }
            for (i, r) in results.iter().enumerate() {
                println!("{}. [{:.2}] {}", i + 1, r.score, r.file_name);
                println!("    {}", r.summary.replace('\n', " ").trim());
                println!();
            }
            storage.pool().close().await;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn build_runner(cfg: &Config) -> Result<(JobRunner, Arc<dyn ProgressTracker>)> {
    let tracker: Arc<dyn ProgressTracker> = Arc::new(InMemoryProgressTracker::new(
        Duration::from_secs(cfg.progress.retention_secs),
    ));
    let collaborators = Collaborators::from_config(cfg).await?;
    let runner = JobRunner::new(
        collaborators,
        tracker.clone(),
        &PipelineSettings::from_config(cfg),
    )?;
    Ok((runner, tracker))
}

async fn require_project(storage: &dyn Storage, id: &str) -> Result<Project> {
    match storage.get_project(id).await? {
        Some(project) => Ok(project),
        None => bail!("No project with id: {}. See `rdigest project list`.", id),
    }
}
