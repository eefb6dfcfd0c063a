//! # repo-digest
//!
//! Rate-limited AI enrichment for source repositories.
//!
//! repo-digest loads a repository's files and recent commits, asks a
//! summarization model to describe each one, embeds file summaries for
//! semantic retrieval, and stores everything in SQLite. Jobs run in the
//! background and report pollable progress.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────┐   ┌──────────┐
//! │ SourceHost  │──▶│ Orchestrators        │──▶│ Storage  │
//! │ GitHub/git  │   │ engine + limiters    │   │ SQLite   │
//! └─────────────┘   └──────────┬───────────┘   └────┬─────┘
//!                              │ progress           │
//!                              ▼                    ▼
//!                      ┌──────────────┐      ┌──────────┐
//!                      │ Tracker      │◀─────│ CLI/HTTP │
//!                      └──────────────┘ poll └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Job error taxonomy |
//! | [`rate_limit`] | Minimum-spacing rate limiter |
//! | [`engine`] | Sequential rate-limited batch enrichment |
//! | [`enrichers`] | File summary, embedding and commit summary enrichers |
//! | [`tracker`] | Pollable job progress with retention sweep |
//! | [`dedup`] | Already-persisted commit filter |
//! | [`indexing`] | File indexing pipeline |
//! | [`commits`] | Incremental commit sync pipeline |
//! | [`jobs`] | Background job runner |
//! | [`search`] | Semantic search over file summaries |
//! | [`source`] | Source host trait; [`source_github`], [`source_git`] implementations |
//! | [`summarizer`] | Chat-completions summarizer |
//! | [`embedding`] | Embedding providers and vector utilities |
//! | [`store`] | Storage trait; SQLite and in-memory backends |
//! | [`server`] | HTTP API |
//! | [`progress`] | CLI progress rendering |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod commits;
pub mod config;
pub mod db;
pub mod dedup;
pub mod embedding;
pub mod engine;
pub mod enrichers;
pub mod error;
pub mod http;
pub mod indexing;
pub mod jobs;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod prompts;
pub mod rate_limit;
pub mod search;
pub mod server;
pub mod source;
pub mod source_git;
pub mod source_github;
pub mod store;
pub mod summarizer;
pub mod tracker;
