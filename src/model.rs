//! Core data model.
//!
//! A target is something we measure on a schedule. Every admitted tick of a
//! target produces one job, which the worker of the target's category
//! consumes exactly once.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Span;

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Job category. Each category has its own queue and a single worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Filesystem,
    Directory,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Filesystem, Category::Directory];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Filesystem => "filesystem",
            Category::Directory => "directory",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Job identity
// ---------------------------------------------------------------------------

static JOB_SEQ: AtomicU64 = AtomicU64::new(0);

/// Job identifier, derived from category, target name and enqueue time.
///
/// A process-wide sequence number is appended so two ticks landing on the
/// same timestamp still get distinct ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn new(category: Category, target: &str) -> Self {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let seq = JOB_SEQ.fetch_add(1, Ordering::Relaxed);
        Self(format!("{category}-{target}-{nanos}-{seq}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Job kinds
// ---------------------------------------------------------------------------

/// Filesystem usage check for one mount point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemJob {
    pub mount_point: PathBuf,
    /// Device label, published as a metric attribute only.
    pub device: String,
}

/// Directory size check, aggregated down to `subdirectory_levels`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryJob {
    pub path: PathBuf,
    /// 0 measures only `path` itself.
    pub subdirectory_levels: u32,
}

/// What a job (or target) measures. Dispatch is by exhaustive match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum JobKind {
    Filesystem(FilesystemJob),
    Directory(DirectoryJob),
}

impl JobKind {
    pub fn category(&self) -> Category {
        match self {
            JobKind::Filesystem(_) => Category::Filesystem,
            JobKind::Directory(_) => Category::Directory,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            JobKind::Filesystem(fs) => &fs.mount_point,
            JobKind::Directory(dir) => &dir.path,
        }
    }
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// A configured, monitored target with its effective schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub name: String,
    pub kind: JobKind,
    pub interval: Duration,
    pub timeout: Duration,
}

impl Target {
    pub fn category(&self) -> Category {
        self.kind.category()
    }

    /// A target whose timeout exceeds its interval can never finish before
    /// the next tick, so it would run mostly in skip mode.
    pub fn interval_shorter_than_timeout(&self) -> bool {
        self.interval < self.timeout
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Causal context carried from the tick that admitted a job to the worker.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Root `collection.cycle` span of the scheduling cycle.
    pub span: Span,
    /// Cancelled on process shutdown.
    pub cancel: CancellationToken,
}

impl JobContext {
    pub fn new(span: Span, cancel: CancellationToken) -> Self {
        Self { span, cancel }
    }

    /// Context with no parent span and a token that is never cancelled.
    pub fn detached() -> Self {
        Self {
            span: Span::none(),
            cancel: CancellationToken::new(),
        }
    }
}

/// A unit of scheduled work. Not persisted; discarded after processing.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub target: String,
    pub kind: JobKind,
    pub timeout: Duration,
    pub interval: Duration,
    pub context: JobContext,
}

impl Job {
    /// Build a job for `target` with a fresh id.
    pub fn for_target(target: &Target, context: JobContext) -> Self {
        Self {
            id: JobId::new(target.category(), &target.name),
            target: target.name.clone(),
            kind: target.kind.clone(),
            timeout: target.timeout,
            interval: target.interval,
            context,
        }
    }

    pub fn category(&self) -> Category {
        self.kind.category()
    }

    pub fn path(&self) -> &Path {
        self.kind.path()
    }
}

// ---------------------------------------------------------------------------
// Bookkeeping snapshots
// ---------------------------------------------------------------------------

/// Per-target run bookkeeping, owned by the state tracker.
///
/// Readers always receive a copy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemState {
    pub name: String,
    pub category: Category,
    pub running: bool,
    pub current_job_id: Option<JobId>,
    pub last_start: Option<DateTime<Utc>>,
    pub last_end: Option<DateTime<Utc>>,
    pub last_duration: Option<Duration>,
    /// Number of runs the worker has finished for this target.
    pub completed_runs: u64,
}

impl ItemState {
    pub fn new(category: Category, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category,
            running: false,
            current_job_id: None,
            last_start: None,
            last_end: None,
            last_duration: None,
            completed_runs: 0,
        }
    }
}

/// The job a category's worker is processing right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunningJob {
    pub id: JobId,
    pub category: Category,
    pub target: String,
    pub path: PathBuf,
    pub started_at: DateTime<Utc>,
}

impl RunningJob {
    pub fn from_job(job: &Job, started_at: DateTime<Utc>) -> Self {
        Self {
            id: job.id.clone(),
            category: job.category(),
            target: job.target.clone(),
            path: job.path().to_path_buf(),
            started_at,
        }
    }
}
