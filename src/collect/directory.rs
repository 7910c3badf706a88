//! Directory sizes via `du`, aggregated down to a fixed depth in a single
//! invocation.
//!
//! A target path is level 0. Each subdirectory's level is the number of
//! components in its path relative to the target, so `/data/a` under
//! `/data` is level 1 and `/data/a/b` is level 2. With
//! `subdirectory_levels = N` exactly levels `0..=N` are reported.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::command::CommandRunner;
use super::validate::validate_path;
use crate::error::{Error, Result};
use crate::model::DirectoryJob;
use crate::retry::{RetryPolicy, with_backoff};
use crate::telemetry::job::parse_span;

const DU: &str = "du";

/// One measured directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectorySample {
    pub path: PathBuf,
    pub level: u32,
    pub size_bytes: u64,
}

/// Arguments for `du`, in 1K blocks, never crossing filesystem boundaries.
pub fn du_args(path: &Path, subdirectory_levels: u32) -> Vec<String> {
    let path = path.to_string_lossy().into_owned();
    if subdirectory_levels == 0 {
        vec!["-s".into(), "-x".into(), "-k".into(), path]
    } else {
        vec![
            "-x".into(),
            "-k".into(),
            format!("--max-depth={subdirectory_levels}"),
            path,
        ]
    }
}

/// Strip trailing separators so `/data/` and `/data` map to the same key.
/// The root path stays `/`.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Parse `<sizeKB>\t<path>` lines into a path to size-in-KB map.
pub fn parse_du_output(output: &str) -> Result<BTreeMap<PathBuf, u64>> {
    let lines: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).collect();
    let span = parse_span("du", lines.len());
    let _enter = span.enter();

    if lines.is_empty() {
        return Err(parse_error("empty output".to_string()));
    }

    let mut sizes = BTreeMap::new();
    for line in &lines {
        let (size, path) = line
            .split_once('\t')
            .or_else(|| line.trim_start().split_once(char::is_whitespace))
            .ok_or_else(|| parse_error(format!("malformed line {line:?}")))?;
        let size_kb: u64 = size
            .trim()
            .parse()
            .map_err(|e| parse_error(format!("bad size in {line:?}: {e}")))?;
        sizes.insert(PathBuf::from(normalize_path(path.trim_end())), size_kb);
    }

    span.record("duwatch.samples", sizes.len() as u64);
    Ok(sizes)
}

/// Level of `path` below `base`, or `None` if it is not inside `base`.
pub fn level_of(base: &Path, path: &Path) -> Option<u32> {
    let rel = path.strip_prefix(base).ok()?;
    Some(rel.components().count() as u32)
}

/// Turn parsed sizes into samples for levels `0..=max_level`, ordered by
/// level then path. Paths outside `base` are dropped.
pub fn aggregate(
    base: &Path,
    max_level: u32,
    sizes: &BTreeMap<PathBuf, u64>,
) -> Vec<DirectorySample> {
    let base = PathBuf::from(normalize_path(&base.to_string_lossy()));
    let mut samples: Vec<DirectorySample> = sizes
        .iter()
        .filter_map(|(path, size_kb)| {
            let Some(level) = level_of(&base, path) else {
                warn!(base = %base.display(), path = %path.display(), "du reported path outside target");
                return None;
            };
            (level <= max_level).then(|| DirectorySample {
                path: path.clone(),
                level,
                size_bytes: size_kb.saturating_mul(1024),
            })
        })
        .collect();
    samples.sort_by(|a, b| (a.level, &a.path).cmp(&(b.level, &b.path)));
    samples
}

fn parse_error(detail: String) -> Error {
    Error::Parse { tool: DU, detail }
}

/// Measures directory trees for [`DirectoryJob`]s.
#[derive(Clone)]
pub struct DirectoryCollector {
    runner: Arc<dyn CommandRunner>,
    retry: RetryPolicy,
}

impl DirectoryCollector {
    pub fn new(runner: Arc<dyn CommandRunner>, retry: RetryPolicy) -> Self {
        Self { runner, retry }
    }

    /// Validate the path, run one `du` bounded by `timeout` and aggregate
    /// per level. Any failure fails the whole measurement.
    pub async fn collect(
        &self,
        job: &DirectoryJob,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<DirectorySample>> {
        validate_path(&job.path).await?;
        let args = du_args(&job.path, job.subdirectory_levels);
        let output = with_backoff(&self.retry, cancel, DU, |_| {
            self.runner.run(DU, &args, timeout)
        })
        .await?;
        let sizes = parse_du_output(&output)?;

        if job.subdirectory_levels == 0 {
            return match sizes.values().next() {
                Some(size_kb) if sizes.len() == 1 => Ok(vec![DirectorySample {
                    path: job.path.clone(),
                    level: 0,
                    size_bytes: size_kb.saturating_mul(1024),
                }]),
                _ => Err(parse_error(format!(
                    "expected one summary line, got {}",
                    sizes.len()
                ))),
            };
        }

        let samples = aggregate(&job.path, job.subdirectory_levels, &sizes);
        if samples.is_empty() {
            return Err(parse_error(format!(
                "no entries under {}",
                job.path.display()
            )));
        }
        Ok(samples)
    }
}
