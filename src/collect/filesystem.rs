//! Filesystem usage via `df`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::command::CommandRunner;
use super::validate::validate_path;
use crate::error::{Error, Result};
use crate::model::FilesystemJob;
use crate::retry::{RetryPolicy, with_backoff};
use crate::telemetry::job::parse_span;

/// `df` gets a short fixed deadline regardless of the job timeout.
pub const DF_TIMEOUT: Duration = Duration::from_secs(10);

const DF: &str = "df";

/// Size and free space of a filesystem, as reported by `df -k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfStats {
    pub size_kb: u64,
    pub available_kb: u64,
}

/// Filesystem usage in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FilesystemUsage {
    pub size_bytes: u64,
    pub available_bytes: u64,
    pub used_bytes: u64,
    /// `used / size`, or 0.0 for a zero-sized filesystem.
    pub used_ratio: f64,
}

impl From<DfStats> for FilesystemUsage {
    fn from(stats: DfStats) -> Self {
        let size_bytes = stats.size_kb.saturating_mul(1024);
        let available_bytes = stats.available_kb.saturating_mul(1024);
        let used_bytes = size_bytes.saturating_sub(available_bytes);
        let used_ratio = if size_bytes == 0 {
            0.0
        } else {
            used_bytes as f64 / size_bytes as f64
        };
        Self {
            size_bytes,
            available_bytes,
            used_bytes,
            used_ratio,
        }
    }
}

/// Arguments for a `df` query on one mount point, in 1K blocks.
pub fn df_args(mount_point: &Path) -> Vec<String> {
    vec!["-k".to_string(), mount_point.to_string_lossy().into_owned()]
}

/// Parse `df -k` output.
///
/// Long device names make `df` wrap, putting the numbers on the line after
/// the device. Lines after the header are scanned for the first one that
/// carries the numeric columns; if none does, every line is scanned again
/// from the end, which also covers output without a header.
pub fn parse_df_output(output: &str) -> Result<DfStats> {
    let lines: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).collect();
    let _span = parse_span("df", lines.len()).entered();

    if lines.is_empty() {
        return Err(parse_error("empty output"));
    }

    lines
        .iter()
        .skip(1)
        .find_map(|line| parse_stats_line(line))
        .or_else(|| lines.iter().rev().find_map(|line| parse_stats_line(line)))
        .ok_or_else(|| parse_error(format!("no numeric row in {} line(s)", lines.len())))
}

/// Accepts both `<dev> <size> <used> <avail> ...` and, for a wrapped
/// row, `<size> <used> <avail> ...`.
fn parse_stats_line(line: &str) -> Option<DfStats> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let numbers = |start: usize| -> Option<DfStats> {
        let size_kb = fields.get(start)?.parse().ok()?;
        fields.get(start + 1)?.parse::<u64>().ok()?;
        let available_kb = fields.get(start + 2)?.parse().ok()?;
        Some(DfStats {
            size_kb,
            available_kb,
        })
    };
    numbers(0).or_else(|| numbers(1))
}

fn parse_error(detail: impl Into<String>) -> Error {
    Error::Parse {
        tool: DF,
        detail: detail.into(),
    }
}

/// Measures filesystem usage for [`FilesystemJob`]s.
#[derive(Clone)]
pub struct FilesystemCollector {
    runner: Arc<dyn CommandRunner>,
    retry: RetryPolicy,
}

impl FilesystemCollector {
    pub fn new(runner: Arc<dyn CommandRunner>, retry: RetryPolicy) -> Self {
        Self { runner, retry }
    }

    /// Validate the mount point, run `df` and parse the result. Any
    /// failure fails the whole measurement.
    pub async fn collect(
        &self,
        job: &FilesystemJob,
        cancel: &CancellationToken,
    ) -> Result<FilesystemUsage> {
        validate_path(&job.mount_point).await?;
        let args = df_args(&job.mount_point);
        let output = with_backoff(&self.retry, cancel, DF, |_| {
            self.runner.run(DF, &args, DF_TIMEOUT)
        })
        .await?;
        let stats = parse_df_output(&output)?;
        Ok(stats.into())
    }
}
