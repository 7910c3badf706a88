//! Collection algorithms executed by workers.
//!
//! Each job kind has its own collector. [`Collectors::measure`] dispatches
//! on [`JobKind`] so every kind is handled at compile time.

pub mod command;
pub mod directory;
pub mod filesystem;
pub mod validate;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

pub use command::{CommandRunner, ProcessRunner};
pub use directory::{DirectoryCollector, DirectorySample};
pub use filesystem::{FilesystemCollector, FilesystemUsage};

use crate::error::Result;
use crate::model::JobKind;
use crate::retry::RetryPolicy;

/// Result of one successful collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum Measurement {
    Filesystem(FilesystemUsage),
    Directory { samples: Vec<DirectorySample> },
}

/// Both collectors sharing one command runner and retry policy.
#[derive(Clone)]
pub struct Collectors {
    pub filesystem: FilesystemCollector,
    pub directory: DirectoryCollector,
}

impl Collectors {
    pub fn new(runner: Arc<dyn CommandRunner>, retry: RetryPolicy) -> Self {
        Self {
            filesystem: FilesystemCollector::new(Arc::clone(&runner), retry),
            directory: DirectoryCollector::new(runner, retry),
        }
    }

    /// Run the collection algorithm for `kind`.
    ///
    /// `timeout` bounds directory measurements; filesystem queries use
    /// their own fixed deadline.
    pub async fn measure(
        &self,
        kind: &JobKind,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Measurement> {
        match kind {
            JobKind::Filesystem(job) => self
                .filesystem
                .collect(job, cancel)
                .await
                .map(Measurement::Filesystem),
            JobKind::Directory(job) => self
                .directory
                .collect(job, timeout, cancel)
                .await
                .map(|samples| Measurement::Directory { samples }),
        }
    }
}
