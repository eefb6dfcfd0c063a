//! End-to-end tests for the indexing and commit-sync pipelines.
//!
//! Every external collaborator is replaced by an in-process fake, and the
//! tokio clock is paused so rate-limiter spacing costs no wall time.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use repo_digest::embedding::Embedder;
use repo_digest::enrichers::NO_COMMIT_SUMMARY;
use repo_digest::error::{JobError, Stage};
use repo_digest::jobs::{Collaborators, JobRunner, PipelineSettings};
use repo_digest::models::{
    NewCommitRecord, NewFileRecord, Project, RemoteCommit, RemoteFile, StoredFileEmbedding,
};
use repo_digest::source::{Credentials, RepoLocation, SourceHost};
use repo_digest::store::memory::InMemoryStorage;
use repo_digest::store::Storage;
use repo_digest::summarizer::Summarizer;
use repo_digest::tracker::{InMemoryProgressTracker, JobPhase, ProgressSnapshot, ProgressTracker};

const REPO_URL: &str = "https://github.com/acme/widgets";

// ─── Fakes ──────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeSource {
    files: Vec<RemoteFile>,
    commits: Vec<RemoteCommit>,
    fail_tree: bool,
    broken_diffs: Vec<String>,
}

#[async_trait]
impl SourceHost for FakeSource {
    async fn list_file_tree(
        &self,
        _repo: &RepoLocation,
        _creds: Option<&Credentials>,
    ) -> Result<Vec<RemoteFile>> {
        if self.fail_tree {
            anyhow::bail!("repository not found");
        }
        Ok(self.files.clone())
    }

    async fn list_commits(
        &self,
        _repo: &RepoLocation,
        _creds: Option<&Credentials>,
        _limit: usize,
    ) -> Result<Vec<RemoteCommit>> {
        // Unsorted and untruncated, so ordering is left to the orchestrator.
        Ok(self.commits.clone())
    }

    async fn fetch_diff(
        &self,
        _repo: &RepoLocation,
        _creds: Option<&Credentials>,
        hash: &str,
    ) -> Result<String> {
        if self.broken_diffs.iter().any(|h| h == hash) {
            anyhow::bail!("diff unavailable");
        }
        Ok(format!("diff --git a/{0}.rs b/{0}.rs\n+// change {0}\n", hash))
    }
}

/// Replies with an empty string to prompts mentioning `EMPTY`, and with a
/// summary the embedder rejects to prompts mentioning `NOEMBED`.
#[derive(Default)]
struct FakeSummarizer {
    calls: AtomicUsize,
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if prompt.contains("EMPTY") {
            return Ok("   ".to_string());
        }
        if prompt.contains("NOEMBED") {
            return Ok("Handles NOEMBED widgets.".to_string());
        }
        Ok("Handles widget assembly.".to_string())
    }
}

/// Fails on text mentioning `NOEMBED`.
#[derive(Default)]
struct FakeEmbedder {
    calls: AtomicUsize,
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn model_name(&self) -> &str {
        "fake"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("NOEMBED") {
            anyhow::bail!("embedding quota exceeded");
        }
        Ok(vec![1.0, text.len() as f32])
    }
}

/// Which writes [`FaultyStorage`] rejects.
#[derive(Default)]
struct Faults {
    file_names: Vec<String>,
    commit_batches: bool,
}

/// Delegates to an [`InMemoryStorage`] except for the writes named in
/// its [`Faults`].
struct FaultyStorage {
    inner: Arc<InMemoryStorage>,
    faults: Faults,
}

#[async_trait]
impl Storage for FaultyStorage {
    async fn create_project(&self, name: &str, repo_url: &str) -> Result<Project> {
        self.inner.create_project(name, repo_url).await
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        self.inner.get_project(id).await
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        self.inner.list_projects().await
    }

    async fn create_file_record(&self, record: &NewFileRecord) -> Result<String> {
        if self.faults.file_names.contains(&record.file_name) {
            anyhow::bail!("disk full");
        }
        self.inner.create_file_record(record).await
    }

    async fn create_commit_records(
        &self,
        records: &[NewCommitRecord],
        skip_duplicates: bool,
    ) -> Result<usize> {
        if self.faults.commit_batches {
            anyhow::bail!("database is locked");
        }
        self.inner.create_commit_records(records, skip_duplicates).await
    }

    async fn list_commit_hashes(&self, project_id: &str) -> Result<Vec<String>> {
        self.inner.list_commit_hashes(project_id).await
    }

    async fn list_file_embeddings(&self, project_id: &str) -> Result<Vec<StoredFileEmbedding>> {
        self.inner.list_file_embeddings(project_id).await
    }
}

/// Keeps every snapshot ever published, in order.
struct RecordingTracker {
    inner: InMemoryProgressTracker,
    history: Mutex<Vec<ProgressSnapshot>>,
}

impl RecordingTracker {
    fn new() -> Self {
        Self {
            inner: InMemoryProgressTracker::new(Duration::from_secs(3600)),
            history: Mutex::new(Vec::new()),
        }
    }

    fn history(&self, job_id: &str) -> Vec<ProgressSnapshot> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.job_id == job_id)
            .cloned()
            .collect()
    }
}

impl ProgressTracker for RecordingTracker {
    fn set_progress(&self, snapshot: ProgressSnapshot) {
        self.history.lock().unwrap().push(snapshot.clone());
        self.inner.set_progress(snapshot);
    }

    fn get_progress(&self, job_id: &str) -> Option<ProgressSnapshot> {
        self.inner.get_progress(job_id)
    }

    fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

// ─── Harness ────────────────────────────────────────────────────────

struct Harness {
    runner: JobRunner,
    storage: Arc<InMemoryStorage>,
    tracker: Arc<RecordingTracker>,
    summarizer: Arc<FakeSummarizer>,
    embedder: Arc<FakeEmbedder>,
    project: Project,
}

fn harness(source: FakeSource) -> Harness {
    harness_with(source, PipelineSettings::default())
}

fn harness_with(source: FakeSource, settings: PipelineSettings) -> Harness {
    build_harness(source, settings, Faults::default())
}

fn faulty_harness(source: FakeSource, faults: Faults) -> Harness {
    build_harness(source, PipelineSettings::default(), faults)
}

fn build_harness(source: FakeSource, settings: PipelineSettings, faults: Faults) -> Harness {
    let storage = Arc::new(InMemoryStorage::new());
    let tracker = Arc::new(RecordingTracker::new());
    let summarizer = Arc::new(FakeSummarizer::default());
    let embedder = Arc::new(FakeEmbedder::default());
    let project = storage.insert_project("p1", "widgets", REPO_URL);

    let collaborators = Collaborators {
        source: Arc::new(source),
        storage: Arc::new(FaultyStorage {
            inner: storage.clone(),
            faults,
        }),
        file_summarizer: summarizer.clone(),
        commit_summarizer: summarizer.clone(),
        embedder: embedder.clone(),
    };
    let runner = JobRunner::new(collaborators, tracker.clone(), &settings).unwrap();

    Harness {
        runner,
        storage,
        tracker,
        summarizer,
        embedder,
        project,
    }
}

fn file(path: &str, content: &str) -> RemoteFile {
    RemoteFile {
        path: path.to_string(),
        content: content.to_string(),
    }
}

/// `n` commits, `c0` being the newest.
fn commits(n: usize) -> Vec<RemoteCommit> {
    let base = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    (0..n)
        .map(|i| RemoteCommit {
            hash: format!("c{}", i),
            message: format!("commit {}", i),
            author_name: "dev".to_string(),
            author_avatar_url: String::new(),
            author_date: base - ChronoDuration::hours(i as i64),
        })
        .collect()
}

/// processed never decreases, and processed == total only once the job
/// is persisting or done.
fn assert_progress_invariant(history: &[ProgressSnapshot]) {
    let mut last_processed = 0;
    for s in history {
        assert!(
            s.processed_count >= last_processed,
            "processed went backwards: {:?}",
            history
        );
        last_processed = s.processed_count;
        assert!(s.processed_count <= s.total_count || s.total_count == 0);
        if s.total_count > 0 && s.processed_count == s.total_count {
            assert!(
                matches!(
                    s.phase,
                    JobPhase::Persisting | JobPhase::Completed | JobPhase::Failed
                ),
                "processed == total during {:?}",
                s.phase
            );
        }
    }
}

// ─── Indexing ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn blank_summary_is_not_embedded_or_persisted() {
    let h = harness(FakeSource {
        files: vec![
            file("src/a.rs", "fn a() {}"),
            file("src/b.rs", "// EMPTY"),
            file("src/c.rs", "fn c() {}"),
        ],
        ..Default::default()
    });

    let handle = h.runner.spawn_index(&h.project, None);
    let report = handle.join.await.unwrap().unwrap();

    assert_eq!(report.files_loaded, 3);
    assert_eq!(report.summarized, 2);
    assert_eq!(report.embedded, 2);
    assert_eq!(report.persisted, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 2);

    let mut names: Vec<String> = h
        .storage
        .file_records()
        .into_iter()
        .map(|r| r.file_name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["src/a.rs", "src/c.rs"]);

    let stored = h.storage.file_records();
    let a = stored.iter().find(|r| r.file_name == "src/a.rs").unwrap();
    assert_eq!(a.source_code, "fn a() {}");
    assert_eq!(a.summary, "Handles widget assembly.");
    assert_eq!(a.embedding[0], 1.0);
}

#[tokio::test(start_paused = true)]
async fn indexing_progress_reaches_total_only_at_the_end() {
    let h = harness(FakeSource {
        files: vec![
            file("a.rs", "fn a() {}"),
            file("b.rs", "// EMPTY"),
            file("c.rs", "fn c() {}"),
            file("d.rs", "fn d() {}"),
        ],
        ..Default::default()
    });

    let handle = h.runner.spawn_index(&h.project, None);
    let job_id = handle.job_id.clone();
    handle.join.await.unwrap().unwrap();

    let history = h.tracker.history(&job_id);
    assert_progress_invariant(&history);

    let phases: Vec<JobPhase> = history.iter().map(|s| s.phase).collect();
    assert_eq!(phases.first(), Some(&JobPhase::Queued));
    assert!(phases.contains(&JobPhase::Summarizing));
    assert!(phases.contains(&JobPhase::Embedding));
    assert!(phases.contains(&JobPhase::Persisting));

    let last = h.tracker.get_progress(&job_id).unwrap();
    assert_eq!(last.phase, JobPhase::Completed);
    assert_eq!(last.total_count, 1 + 3 * 4);
    assert_eq!(last.processed_count, last.total_count);
    assert!(last.error_detail.is_none());
}

#[tokio::test(start_paused = true)]
async fn blank_file_is_neither_embedded_nor_persisted() {
    let h = harness(FakeSource {
        files: vec![
            file("src/a.rs", "fn a() {}"),
            file(".gitkeep", "   "),
            file("src/c.rs", "fn c() {}"),
        ],
        ..Default::default()
    });

    let handle = h.runner.spawn_index(&h.project, None);
    let job_id = handle.job_id.clone();
    let report = handle.join.await.unwrap().unwrap();

    // The blank file costs neither a model call nor an embedding call.
    assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 2);
    assert_eq!(report.summarized, 2);
    assert_eq!(report.persisted, 2);
    assert_eq!(report.failed, 1);
    assert!(h
        .storage
        .file_records()
        .iter()
        .all(|r| r.file_name != ".gitkeep"));

    let last = h.tracker.get_progress(&job_id).unwrap();
    assert_eq!(last.phase, JobPhase::Completed);
    assert_eq!(last.processed_count, last.total_count);
}

#[tokio::test(start_paused = true)]
async fn failed_embedding_is_not_persisted() {
    let h = harness(FakeSource {
        files: vec![
            file("src/a.rs", "fn a() {}"),
            file("src/b.rs", "// NOEMBED"),
            file("src/c.rs", "fn c() {}"),
        ],
        ..Default::default()
    });

    let handle = h.runner.spawn_index(&h.project, None);
    let job_id = handle.job_id.clone();
    let report = handle.join.await.unwrap().unwrap();

    assert_eq!(report.summarized, 3);
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 3);
    assert_eq!(report.embedded, 2);
    assert_eq!(report.persisted, 2);
    assert_eq!(report.failed, 1);

    let mut names: Vec<String> = h
        .storage
        .file_records()
        .into_iter()
        .map(|r| r.file_name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["src/a.rs", "src/c.rs"]);

    let history = h.tracker.history(&job_id);
    assert_progress_invariant(&history);
    let last = h.tracker.get_progress(&job_id).unwrap();
    assert_eq!(last.phase, JobPhase::Completed);
    assert_eq!(last.processed_count, last.total_count);
}

#[tokio::test(start_paused = true)]
async fn failed_file_insert_does_not_stop_the_others() {
    let h = faulty_harness(
        FakeSource {
            files: vec![
                file("src/a.rs", "fn a() {}"),
                file("src/b.rs", "fn b() {}"),
                file("src/c.rs", "fn c() {}"),
            ],
            ..Default::default()
        },
        Faults {
            file_names: vec!["src/b.rs".to_string()],
            ..Default::default()
        },
    );

    let handle = h.runner.spawn_index(&h.project, None);
    let job_id = handle.job_id.clone();
    let report = handle.join.await.unwrap().unwrap();

    assert_eq!(report.embedded, 3);
    assert_eq!(report.persisted, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(h.storage.file_records().len(), 2);

    let last = h.tracker.get_progress(&job_id).unwrap();
    assert_eq!(last.phase, JobPhase::Completed);
    assert_eq!(last.total_count, 1 + 3 * 3);
    assert_eq!(last.processed_count, last.total_count);
    assert!(last.error_detail.is_none());
}

#[tokio::test(start_paused = true)]
async fn summarize_stage_honours_rate_limit() {
    let settings = PipelineSettings {
        summarize_rpm: 30,
        ..PipelineSettings::default()
    };
    let files = (0..5)
        .map(|i| file(&format!("f{}.rs", i), "fn f() {}"))
        .collect();
    let h = harness_with(
        FakeSource {
            files,
            ..Default::default()
        },
        settings,
    );

    let started = tokio::time::Instant::now();
    let handle = h.runner.spawn_index(&h.project, None);
    handle.join.await.unwrap().unwrap();

    // Five calls, no delay before the first: 4 x 2s.
    assert!(started.elapsed() >= Duration::from_secs(8));
}

#[tokio::test(start_paused = true)]
async fn unreadable_tree_fails_the_job() {
    let h = harness(FakeSource {
        fail_tree: true,
        ..Default::default()
    });

    let handle = h.runner.spawn_index(&h.project, None);
    let job_id = handle.job_id.clone();
    let err = handle.join.await.unwrap().unwrap_err();

    assert!(matches!(
        err,
        JobError::Stage {
            stage: Stage::LoadFiles,
            ..
        }
    ));
    let snapshot = h.tracker.get_progress(&job_id).unwrap();
    assert_eq!(snapshot.phase, JobPhase::Failed);
    let detail = snapshot.error_detail.unwrap();
    assert!(detail.contains("repository not found"), "{}", detail);
    assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 0);
    assert!(h.storage.file_records().is_empty());
}

#[tokio::test(start_paused = true)]
async fn invalid_repository_url_is_a_configuration_error() {
    let h = harness(FakeSource {
        files: vec![file("a.rs", "fn a() {}")],
        ..Default::default()
    });
    let project = h.storage.insert_project("p2", "broken", "not a url");

    let handle = h.runner.spawn_index(&project, None);
    let job_id = handle.job_id.clone();
    let err = handle.join.await.unwrap().unwrap_err();

    assert!(matches!(err, JobError::Configuration(_)));
    let snapshot = h.tracker.get_progress(&job_id).unwrap();
    assert_eq!(snapshot.phase, JobPhase::Failed);
    assert!(snapshot.error_detail.unwrap().starts_with("configuration error"));
    assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn empty_repository_completes_immediately() {
    let h = harness(FakeSource::default());

    let handle = h.runner.spawn_index(&h.project, None);
    let job_id = handle.job_id.clone();
    let report = handle.join.await.unwrap().unwrap();

    assert_eq!(report.files_loaded, 0);
    assert_eq!(
        h.tracker.get_progress(&job_id).unwrap().phase,
        JobPhase::Completed
    );
    assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 0);
}

// ─── Commit sync ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn only_unseen_commits_are_summarized() {
    let remote = commits(10);
    let h = harness(FakeSource {
        commits: remote.clone(),
        ..Default::default()
    });

    let already: Vec<NewCommitRecord> = remote
        .iter()
        .take(4)
        .map(|c| NewCommitRecord::from_remote("p1", c, "old".to_string()))
        .collect();
    h.storage
        .create_commit_records(&already, false)
        .await
        .unwrap();

    let handle = h.runner.spawn_sync(&h.project, None, Some(10));
    let created = handle.join.await.unwrap().unwrap();

    assert_eq!(created, 6);
    assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 6);
    assert_eq!(h.storage.commit_records().len(), 10);
}

#[tokio::test(start_paused = true)]
async fn second_sync_is_a_no_op() {
    let h = harness(FakeSource {
        commits: commits(3),
        ..Default::default()
    });

    let first = h.runner.spawn_sync(&h.project, None, None);
    assert_eq!(first.join.await.unwrap().unwrap(), 3);
    let calls = h.summarizer.calls.load(Ordering::SeqCst);

    let second = h.runner.spawn_sync(&h.project, None, None);
    let job_id = second.job_id.clone();
    assert_eq!(second.join.await.unwrap().unwrap(), 0);

    assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), calls);
    assert_eq!(h.storage.commit_records().len(), 3);
    assert_eq!(
        h.tracker.get_progress(&job_id).unwrap().phase,
        JobPhase::Completed
    );
}

#[tokio::test(start_paused = true)]
async fn sync_keeps_only_the_newest_commits() {
    let mut remote = commits(5);
    remote.reverse();
    let h = harness(FakeSource {
        commits: remote,
        ..Default::default()
    });

    let handle = h.runner.spawn_sync(&h.project, None, Some(2));
    assert_eq!(handle.join.await.unwrap().unwrap(), 2);

    let mut hashes: Vec<String> = h
        .storage
        .commit_records()
        .into_iter()
        .map(|c| c.commit_hash)
        .collect();
    hashes.sort();
    assert_eq!(hashes, vec!["c0", "c1"]);
}

#[tokio::test(start_paused = true)]
async fn missing_diff_degrades_to_placeholder() {
    let h = harness(FakeSource {
        commits: commits(3),
        broken_diffs: vec!["c1".to_string()],
        ..Default::default()
    });

    let handle = h.runner.spawn_sync(&h.project, None, None);
    assert_eq!(handle.join.await.unwrap().unwrap(), 3);

    // The empty diff never reaches the model.
    assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 2);
    let records = h.storage.commit_records();
    let c1 = records.iter().find(|c| c.commit_hash == "c1").unwrap();
    assert_eq!(c1.summary, NO_COMMIT_SUMMARY);
    let c0 = records.iter().find(|c| c.commit_hash == "c0").unwrap();
    assert_eq!(c0.summary, "Handles widget assembly.");
    assert_eq!(c0.commit_message, "commit 0");
}

#[tokio::test(start_paused = true)]
async fn sync_progress_reaches_total_only_at_the_end() {
    let h = harness(FakeSource {
        commits: commits(4),
        ..Default::default()
    });

    let handle = h.runner.spawn_sync(&h.project, None, None);
    let job_id = handle.job_id.clone();
    handle.join.await.unwrap().unwrap();

    let history = h.tracker.history(&job_id);
    assert_progress_invariant(&history);
    assert!(history.iter().any(|s| s.phase == JobPhase::SyncingCommits));

    let last = h.tracker.get_progress(&job_id).unwrap();
    assert_eq!(last.phase, JobPhase::Completed);
    assert_eq!(last.total_count, 4 + 2);
    assert_eq!(last.processed_count, last.total_count);
}

#[tokio::test(start_paused = true)]
async fn failed_commit_batch_fails_the_job() {
    let h = faulty_harness(
        FakeSource {
            commits: commits(3),
            ..Default::default()
        },
        Faults {
            commit_batches: true,
            ..Default::default()
        },
    );

    let handle = h.runner.spawn_sync(&h.project, None, None);
    let job_id = handle.job_id.clone();
    let err = handle.join.await.unwrap().unwrap_err();

    assert!(matches!(
        err,
        JobError::Stage {
            stage: Stage::Persist,
            ..
        }
    ));
    assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 3);
    assert!(h.storage.commit_records().is_empty());

    let snapshot = h.tracker.get_progress(&job_id).unwrap();
    assert_eq!(snapshot.phase, JobPhase::Failed);
    let detail = snapshot.error_detail.unwrap();
    assert!(detail.contains("database is locked"), "{}", detail);
    assert_progress_invariant(&h.tracker.history(&job_id));
}

#[tokio::test(start_paused = true)]
async fn zero_max_commits_is_rejected() {
    let h = harness(FakeSource {
        commits: commits(3),
        ..Default::default()
    });

    let handle = h.runner.spawn_sync(&h.project, None, Some(0));
    let err = handle.join.await.unwrap().unwrap_err();
    assert!(matches!(err, JobError::Configuration(_)));
    assert!(h.storage.commit_records().is_empty());
}

#[test]
fn zero_rate_is_rejected_at_construction() {
    let storage = Arc::new(InMemoryStorage::new());
    let collaborators = Collaborators {
        source: Arc::new(FakeSource::default()),
        storage,
        file_summarizer: Arc::new(FakeSummarizer::default()),
        commit_summarizer: Arc::new(FakeSummarizer::default()),
        embedder: Arc::new(FakeEmbedder::default()),
    };
    let settings = PipelineSettings {
        embed_rpm: 0,
        ..PipelineSettings::default()
    };

    let result = JobRunner::new(
        collaborators,
        Arc::new(RecordingTracker::new()),
        &settings,
    );
    assert!(matches!(result, Err(JobError::Configuration(_))));
}
