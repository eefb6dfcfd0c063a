//! Job progress rendering for foreground CLI runs.
//!
//! `rdigest index` and `rdigest sync-commits` run the same background job
//! the HTTP API starts, and poll the progress tracker the same way an HTTP
//! client polls `GET /jobs/{id}`. Progress is emitted on **stderr** so
//! stdout remains parseable for scripts.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use crate::tracker::{ProgressSnapshot, ProgressTracker};

/// Renders one progress snapshot. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, snapshot: &ProgressSnapshot);
}

/// Human-friendly progress on stderr: "summarizing  12 / 1,234 units  src/lib.rs  (eta 40s)".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, snapshot: &ProgressSnapshot) {
        let mut line = format!(
            "{:<16} {} / {} units",
            snapshot.phase.as_str(),
            format_number(snapshot.processed_count),
            format_number(snapshot.total_count)
        );
        if !snapshot.current_item.is_empty() {
            line.push_str("  ");
            line.push_str(&snapshot.current_item);
        }
        if snapshot.estimated_seconds_remaining > 0 {
            line.push_str(&format!("  (eta {}s)", snapshot.estimated_seconds_remaining));
        }
        if let Some(detail) = &snapshot.error_detail {
            line.push_str(&format!("  error: {}", detail));
        }
        line.push('\n');

        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr, in the
/// same shape `GET /jobs/{id}` returns.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, snapshot: &ProgressSnapshot) {
        if let Ok(line) = serde_json::to_string(snapshot) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _snapshot: &ProgressSnapshot) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Parse `--progress`; `None` picks the TTY default.
    pub fn from_flag(flag: Option<&str>) -> anyhow::Result<Self> {
        match flag {
            None => Ok(Self::default_for_tty()),
            Some("human") => Ok(ProgressMode::Human),
            Some("json") => Ok(ProgressMode::Json),
            Some("off") => Ok(ProgressMode::Off),
            Some(other) => anyhow::bail!(
                "Unknown progress mode: '{}'. Use human, json, or off.",
                other
            ),
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

/// Poll `job_id` every `interval` and report each change until the job
/// reaches a terminal phase or disappears.
pub async fn watch(
    tracker: Arc<dyn ProgressTracker>,
    job_id: String,
    reporter: Box<dyn ProgressReporter>,
    interval: Duration,
) {
    let mut last: Option<ProgressSnapshot> = None;
    loop {
        let Some(snapshot) = tracker.get_progress(&job_id) else {
            return;
        };
        if last.as_ref() != Some(&snapshot) {
            reporter.report(&snapshot);
        }
        if snapshot.phase.is_terminal() {
            return;
        }
        last = Some(snapshot);
        tokio::time::sleep(interval).await;
    }
}
