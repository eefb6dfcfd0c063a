//! TOML configuration.
//!
//! Every section except `[db]` has defaults, so a minimal config file is:
//!
//! ```toml
//! [db]
//! path = "./data/rdigest.sqlite"
//! ```
//!
//! Secrets are never stored in the file. Sections that talk to an external
//! service name the environment variable holding the key (`api_key_env`,
//! `token_env`).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

/// Where repositories are read from.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// `"github"` (REST API) or `"git"` (local clone via the git CLI).
    #[serde(default = "default_source_provider")]
    pub provider: String,
    #[serde(default = "default_github_api")]
    pub api_url: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_source_excludes")]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Clone cache for the `git` provider. Defaults to `.git-cache` next to the DB.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            provider: default_source_provider(),
            api_url: default_github_api(),
            token_env: default_token_env(),
            branch: default_branch(),
            exclude_globs: default_source_excludes(),
            max_concurrency: default_max_concurrency(),
            cache_dir: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_source_provider() -> String {
    "github".to_string()
}
fn default_github_api() -> String {
    "https://api.github.com".to_string()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_branch() -> String {
    "main".to_string()
}
fn default_source_excludes() -> Vec<String> {
    vec![
        "**/package-lock.json".to_string(),
        "**/yarn.lock".to_string(),
        "**/pnpm-lock.yaml".to_string(),
        "README.md".to_string(),
    ]
}
fn default_max_concurrency() -> usize {
    5
}

/// OpenAI-compatible chat completions endpoint used for summaries.
#[derive(Debug, Deserialize, Clone)]
pub struct SummarizerConfig {
    #[serde(default = "default_summarizer_url")]
    pub url: String,
    #[serde(default = "default_summarizer_model")]
    pub model: String,
    #[serde(default = "default_summarizer_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_summarize_rpm")]
    pub requests_per_minute: u32,
    /// Source text beyond this many characters is cut before prompting.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_file_temperature")]
    pub file_temperature: f32,
    #[serde(default = "default_file_max_tokens")]
    pub file_max_tokens: u32,
    #[serde(default = "default_commit_temperature")]
    pub commit_temperature: f32,
    #[serde(default = "default_commit_max_tokens")]
    pub commit_max_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            url: default_summarizer_url(),
            model: default_summarizer_model(),
            api_key_env: default_summarizer_key_env(),
            requests_per_minute: default_summarize_rpm(),
            max_input_chars: default_max_input_chars(),
            file_temperature: default_file_temperature(),
            file_max_tokens: default_file_max_tokens(),
            commit_temperature: default_commit_temperature(),
            commit_max_tokens: default_commit_max_tokens(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_summarizer_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_summarizer_model() -> String {
    "openai/gpt-oss-20b".to_string()
}
fn default_summarizer_key_env() -> String {
    "GROQ_API_KEY".to_string()
}
fn default_summarize_rpm() -> u32 {
    25
}
fn default_max_input_chars() -> usize {
    10_000
}
fn default_file_temperature() -> f32 {
    0.4
}
fn default_file_max_tokens() -> u32 {
    200
}
fn default_commit_temperature() -> f32 {
    0.3
}
fn default_commit_max_tokens() -> u32 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"gemini"`, `"openai"` or `"ollama"`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL override (required shape differs per provider).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_embed_rpm")]
    pub requests_per_minute: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            url: None,
            api_key_env: None,
            requests_per_minute: default_embed_rpm(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "gemini".to_string()
}
fn default_embed_rpm() -> u32 {
    90
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_max_commits")]
    pub max_commits: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_commits: default_max_commits(),
        }
    }
}

fn default_max_commits() -> usize {
    10
}

/// Retention of finished job snapshots in the progress tracker.
#[derive(Debug, Deserialize, Clone)]
pub struct ProgressConfig {
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_retention_secs() -> u64 {
    60 * 60
}
fn default_sweep_interval_secs() -> u64 {
    10 * 60
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `"text"` or `"json"`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl SourceConfig {
    /// GitHub token from the configured environment variable, if set and non-empty.
    pub fn env_token(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate a config from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    match config.source.provider.as_str() {
        "github" | "git" => {}
        other => anyhow::bail!(
            "Unknown source provider: '{}'. Must be github or git.",
            other
        ),
    }
    if config.source.max_concurrency == 0 {
        anyhow::bail!("source.max_concurrency must be > 0");
    }

    if config.summarizer.requests_per_minute == 0 {
        anyhow::bail!("summarizer.requests_per_minute must be > 0");
    }
    if config.summarizer.max_input_chars == 0 {
        anyhow::bail!("summarizer.max_input_chars must be > 0");
    }

    match config.embedding.provider.as_str() {
        "gemini" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be gemini, openai, or ollama.",
            other
        ),
    }
    if config.embedding.requests_per_minute == 0 {
        anyhow::bail!("embedding.requests_per_minute must be > 0");
    }

    if config.pipeline.max_commits == 0 {
        anyhow::bail!("pipeline.max_commits must be > 0");
    }

    if config.progress.sweep_interval_secs == 0 {
        anyhow::bail!("progress.sweep_interval_secs must be > 0");
    }

    match config.logging.format.as_str() {
        "text" | "json" => {}
        other => anyhow::bail!("Unknown logging format: '{}'. Must be text or json.", other),
    }

    Ok(config)
}
