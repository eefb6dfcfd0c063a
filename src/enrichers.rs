//! The three [`Enricher`]s the pipelines run through the engine.
//!
//! | Enricher | Payload | Produces |
//! |----------|---------|----------|
//! | [`FileSummaryEnricher`] | file content | onboarding summary |
//! | [`SummaryEmbeddingEnricher`] | summary text | the same summary + vector |
//! | [`CommitSummaryEnricher`] | unified diff | bullet-point summary |

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::embedding::Embedder;
use crate::engine::Enricher;
use crate::models::{Enrichment, WorkItem};
use crate::prompts;
use crate::summarizer::Summarizer;

pub const NO_COMMIT_SUMMARY: &str = "No summary available";
pub const COMMIT_FAILURE_PLACEHOLDER: &str = "Error summarizing commit";

/// Summarizes one source file. The work item id is the file path.
pub struct FileSummaryEnricher {
    summarizer: Arc<dyn Summarizer>,
    max_input_chars: usize,
}

impl FileSummaryEnricher {
    pub fn new(summarizer: Arc<dyn Summarizer>, max_input_chars: usize) -> Self {
        Self {
            summarizer,
            max_input_chars,
        }
    }
}

#[async_trait]
impl Enricher for FileSummaryEnricher {
    fn stage(&self) -> &'static str {
        "summarize"
    }

    /// The reply is returned trimmed but otherwise as-is; a blank reply
    /// stays blank so the indexing pipeline can drop the file.
    async fn enrich(&self, item: &WorkItem) -> Result<Enrichment> {
        let code = prompts::truncate_chars(&item.payload, self.max_input_chars);
        let prompt = prompts::file_summary_prompt(&item.id, code);
        let reply = self.summarizer.summarize(&prompt).await?;
        Ok(Enrichment::summary(reply.trim()))
    }

    fn blank_placeholder(&self, item: &WorkItem) -> Enrichment {
        Enrichment::summary(format!(
            "This is a {} file with no readable content.",
            item.id
        ))
    }
}

/// Embeds a summary. The payload is the summary; it is passed through
/// unchanged next to the vector.
pub struct SummaryEmbeddingEnricher {
    embedder: Arc<dyn Embedder>,
}

impl SummaryEmbeddingEnricher {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

#[async_trait]
impl Enricher for SummaryEmbeddingEnricher {
    fn stage(&self) -> &'static str {
        "embed"
    }

    async fn enrich(&self, item: &WorkItem) -> Result<Enrichment> {
        let vector = self.embedder.embed(&item.payload).await?;
        Ok(Enrichment {
            summary: item.payload.clone(),
            embedding: Some(vector),
        })
    }

    fn blank_placeholder(&self, item: &WorkItem) -> Enrichment {
        Enrichment::summary(item.payload.clone())
    }
}

/// Summarizes one commit diff. The work item id is the commit hash.
///
/// Diffs are cut to `max_input_chars` like file sources, so one huge
/// commit cannot blow past the model's context window.
pub struct CommitSummaryEnricher {
    summarizer: Arc<dyn Summarizer>,
    max_input_chars: usize,
}

impl CommitSummaryEnricher {
    pub fn new(summarizer: Arc<dyn Summarizer>, max_input_chars: usize) -> Self {
        Self {
            summarizer,
            max_input_chars,
        }
    }
}

#[async_trait]
impl Enricher for CommitSummaryEnricher {
    fn stage(&self) -> &'static str {
        "summarize-commit"
    }

    async fn enrich(&self, item: &WorkItem) -> Result<Enrichment> {
        let diff = prompts::truncate_chars(&item.payload, self.max_input_chars);
        let prompt = prompts::commit_summary_prompt(diff);
        let reply = self.summarizer.summarize(&prompt).await?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Ok(Enrichment::summary(NO_COMMIT_SUMMARY));
        }
        Ok(Enrichment::summary(reply))
    }

    fn blank_placeholder(&self, _item: &WorkItem) -> Enrichment {
        Enrichment::summary(NO_COMMIT_SUMMARY)
    }

    fn failure_placeholder(&self, _item: &WorkItem) -> String {
        COMMIT_FAILURE_PLACEHOLDER.to_string()
    }
}
