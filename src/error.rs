//! Error types for duwatch.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::model::Category;

#[derive(Debug, Error)]
pub enum Error {
    /// Path failed the safety checks that run before any external command.
    #[error("invalid path {}: {reason}", path.display())]
    Validation { path: PathBuf, reason: String },

    #[error("{program} exited with status {code}: {stderr}")]
    CommandFailed {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("{program} was killed by signal {signal}")]
    CommandKilled { program: String, signal: i32 },

    /// The process was hard-killed at its deadline; classified as a signal
    /// kill, so unlike a non-zero exit it is not retried.
    #[error("{program} timed out after {timeout:?}")]
    CommandTimeout { program: String, timeout: Duration },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("unexpected {tool} output: {detail}")]
    Parse { tool: &'static str, detail: String },

    #[error("{category} queue is full (capacity {capacity})")]
    QueueFull { category: Category, capacity: usize },

    #[error("{category} queue is closed")]
    QueueClosed { category: Category },

    #[error("job {job_id} not observed complete after {after:?}")]
    WatchdogTimeout { job_id: String, after: Duration },

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether retrying the failed operation could succeed.
    ///
    /// Only a plain non-zero exit is retryable. A timeout means the process
    /// was hard-killed, which counts as a signal kill.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::CommandFailed { .. })
    }

    /// Short label used as a metric attribute.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "validation",
            Error::CommandFailed { .. }
            | Error::CommandKilled { .. }
            | Error::CommandTimeout { .. }
            | Error::Spawn { .. }
            | Error::Cancelled => "execution",
            Error::Parse { .. } => "parse",
            Error::QueueFull { .. } => "queue_full",
            Error::QueueClosed { .. } => "queue_closed",
            Error::WatchdogTimeout { .. } => "watchdog",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Other(_) => "other",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
