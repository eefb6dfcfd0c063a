//! HTTP API tests.
//!
//! The router is served on an ephemeral port with fake collaborators and
//! exercised with a real HTTP client.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use repo_digest::embedding::Embedder;
use repo_digest::jobs::{Collaborators, JobRunner, PipelineSettings};
use repo_digest::models::{RemoteCommit, RemoteFile};
use repo_digest::server::{router, AppState};
use repo_digest::source::{Credentials, RepoLocation, SourceHost};
use repo_digest::store::memory::InMemoryStorage;
use repo_digest::summarizer::Summarizer;
use repo_digest::tracker::InMemoryProgressTracker;

struct StaticSource;

#[async_trait]
impl SourceHost for StaticSource {
    async fn list_file_tree(
        &self,
        _repo: &RepoLocation,
        _creds: Option<&Credentials>,
    ) -> Result<Vec<RemoteFile>> {
        Ok(vec![
            RemoteFile {
                path: "src/main.rs".to_string(),
                content: "fn main() {}".to_string(),
            },
            RemoteFile {
                path: "README.md".to_string(),
                content: "# widgets".to_string(),
            },
        ])
    }

    async fn list_commits(
        &self,
        _repo: &RepoLocation,
        _creds: Option<&Credentials>,
        limit: usize,
    ) -> Result<Vec<RemoteCommit>> {
        Ok((0..3)
            .map(|i| RemoteCommit {
                hash: format!("{:040x}", i),
                message: format!("change {}", i),
                author_name: "dev".to_string(),
                author_avatar_url: String::new(),
                author_date: Utc::now(),
            })
            .take(limit)
            .collect())
    }

    async fn fetch_diff(
        &self,
        _repo: &RepoLocation,
        _creds: Option<&Credentials>,
        hash: &str,
    ) -> Result<String> {
        Ok(format!("+// {}", hash))
    }
}

struct EchoSummarizer;

#[async_trait]
impl Summarizer for EchoSummarizer {
    async fn summarize(&self, _prompt: &str) -> Result<String> {
        Ok("A summary.".to_string())
    }
}

struct UnitEmbedder;

#[async_trait]
impl Embedder for UnitEmbedder {
    fn model_name(&self) -> &str {
        "unit"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0, 0.0])
    }
}

struct TestServer {
    base: String,
    client: reqwest::Client,
    storage: Arc<InMemoryStorage>,
}

async fn start_server() -> TestServer {
    let storage = Arc::new(InMemoryStorage::new());
    storage.insert_project("p1", "widgets", "https://github.com/acme/widgets");

    let collaborators = Collaborators {
        source: Arc::new(StaticSource),
        storage: storage.clone(),
        file_summarizer: Arc::new(EchoSummarizer),
        commit_summarizer: Arc::new(EchoSummarizer),
        embedder: Arc::new(UnitEmbedder),
    };
    // 6000 rpm keeps slot spacing at 10ms.
    let settings = PipelineSettings {
        summarize_rpm: 6000,
        embed_rpm: 6000,
        ..PipelineSettings::default()
    };
    let tracker = Arc::new(InMemoryProgressTracker::new(Duration::from_secs(60)));
    let runner = JobRunner::new(collaborators, tracker, &settings).unwrap();
    let app = router(AppState {
        runner: Arc::new(runner),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base: format!("http://{}", addr),
        client: reqwest::Client::new(),
        storage,
    }
}

impl TestServer {
    async fn post(&self, path: &str, body: Option<Value>) -> (u16, Value) {
        let mut request = self.client.post(format!("{}{}", self.base, path));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let response = self
            .client
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    /// Poll `/jobs/{id}` until it reaches a terminal phase.
    async fn wait_for_job(&self, job_id: &str) -> Value {
        for _ in 0..200 {
            let (status, body) = self.get(&format!("/jobs/{}", job_id)).await;
            assert_eq!(status, 200);
            if body["phase"] == "completed" || body["phase"] == "failed" {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job {} did not finish", job_id);
    }
}

#[tokio::test]
async fn health_reports_ok() {
    let server = start_server().await;
    let (status, body) = server.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn index_job_runs_to_completion() {
    let server = start_server().await;

    let (status, body) = server.post("/projects/p1/index", None).await;
    assert_eq!(status, 202);
    let job_id = body["jobId"].as_str().unwrap().to_string();

    let snapshot = server.wait_for_job(&job_id).await;
    assert_eq!(snapshot["phase"], "completed");
    assert_eq!(snapshot["jobId"], job_id.as_str());
    assert_eq!(snapshot["totalCount"], 7);
    assert_eq!(snapshot["processedCount"], snapshot["totalCount"]);
    assert!(snapshot.get("errorDetail").is_none());

    assert_eq!(server.storage.file_records().len(), 2);
}

#[tokio::test]
async fn commit_sync_accepts_token_and_limit() {
    let server = start_server().await;

    let (status, body) = server
        .post(
            "/projects/p1/commits/sync",
            Some(json!({ "githubToken": "ghp_test", "maxCommits": 2 })),
        )
        .await;
    assert_eq!(status, 202);

    let snapshot = server
        .wait_for_job(body["jobId"].as_str().unwrap())
        .await;
    assert_eq!(snapshot["phase"], "completed");
    assert_eq!(server.storage.commit_records().len(), 2);
}

#[tokio::test]
async fn unknown_project_is_not_found() {
    let server = start_server().await;

    let (status, body) = server.post("/projects/nope/index", None).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, _) = server.post("/projects/nope/commits/sync", None).await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let server = start_server().await;
    let (status, body) = server.get("/jobs/does-not-exist").await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn zero_max_commits_is_a_bad_request() {
    let server = start_server().await;
    let (status, body) = server
        .post("/projects/p1/commits/sync", Some(json!({ "maxCommits": 0 })))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");
    assert!(server.storage.commit_records().is_empty());
}

#[tokio::test]
async fn malformed_body_is_a_bad_request() {
    let server = start_server().await;
    let response = server
        .client
        .post(format!("{}/projects/p1/index", server.base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}
