//! Summarization model client.
//!
//! [`Summarizer`] is the seam the pipeline depends on. [`ChatSummarizer`]
//! implements it against any OpenAI-compatible `POST /chat/completions`
//! endpoint (Groq, OpenAI, Ollama's `/v1`).

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;

use crate::config::SummarizerConfig;
use crate::http;

/// Turns a prompt into natural-language text. May fail or return empty text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, prompt: &str) -> Result<String>;
}

pub struct ChatSummarizer {
    client: Client,
    url: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
}

impl ChatSummarizer {
    /// Summarizer tuned for short file descriptions.
    pub fn for_files(config: &SummarizerConfig) -> Result<Self> {
        Self::new(config, config.file_temperature, config.file_max_tokens)
    }

    /// Summarizer tuned for commit diffs (longer answers, lower temperature).
    pub fn for_commits(config: &SummarizerConfig) -> Result<Self> {
        Self::new(config, config.commit_temperature, config.commit_max_tokens)
    }

    fn new(config: &SummarizerConfig, temperature: f32, max_tokens: u32) -> Result<Self> {
        let api_key = http::api_key_from_env(&config.api_key_env)?;
        Self::with_key(config, api_key, temperature, max_tokens)
    }

    /// Build with an explicit key instead of reading the environment.
    pub fn with_key(
        config: &SummarizerConfig,
        api_key: String,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<Self> {
        Ok(Self {
            client: http::build_client(config.timeout_secs)?,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            temperature,
            max_tokens,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Summarizer for ChatSummarizer {
    async fn summarize(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        let endpoint = format!("{}/chat/completions", self.url);

        let response = http::send_with_retry("Chat", self.max_retries, || {
            self.client
                .post(&endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;

        let json: serde_json::Value = response.json().await?;
        Ok(parse_chat_response(&json))
    }
}

/// Extract `choices[0].message.content`; anything missing reads as empty.
fn parse_chat_response(json: &serde_json::Value) -> String {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .trim()
        .to_string()
}
