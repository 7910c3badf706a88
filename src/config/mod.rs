//! Typed configuration loaded from a TOML file.
//!
//! Loads once at startup and fails fast on invalid targets. A few
//! deployment-specific settings can be overridden from the environment;
//! in local dev call `dotenvy::dotenv().ok()` first.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::model::{Category, DirectoryJob, FilesystemJob, JobKind, Target};
use crate::retry::RetryPolicy;

/// Interval used by targets that do not set their own.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(300);
/// Upper bound of a derived timeout.
pub const MAX_DERIVED_TIMEOUT: Duration = Duration::from_secs(300);
/// Shortest allowed interval or timeout.
pub const MIN_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_interval_secs")]
    pub default_interval_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub otel_endpoint: Option<String>,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub filesystems: Vec<FilesystemConfig>,
    #[serde(default)]
    pub directories: Vec<DirectoryConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilesystemConfig {
    pub name: String,
    pub mount_point: PathBuf,
    #[serde(default)]
    pub device: String,
    pub interval_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectoryConfig {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub subdirectory_levels: u32,
    pub interval_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_secs: default_initial_delay_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL.as_secs()
}

fn default_queue_capacity() -> usize {
    crate::queue::DEFAULT_CAPACITY
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "duwatch".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_secs() -> u64 {
    2
}

impl Config {
    /// Read, parse and validate a config file, then apply env overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut config = Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse without validating or applying env overrides.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("bad config: {e}")))
    }

    /// Override settings from `DUWATCH_OTEL_ENDPOINT` and `DUWATCH_LOG_LEVEL`.
    pub fn apply_env(&mut self) {
        if let Ok(endpoint) = std::env::var("DUWATCH_OTEL_ENDPOINT") {
            self.otel_endpoint = (!endpoint.is_empty()).then_some(endpoint);
        }
        if let Ok(level) = std::env::var("DUWATCH_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    /// Reject configs the scheduler cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.filesystems.is_empty() && self.directories.is_empty() {
            return Err(Error::Config("no filesystems or directories configured".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }

        let mut seen = HashSet::new();
        for fs in &self.filesystems {
            check_target(&mut seen, Category::Filesystem, &fs.name, &fs.mount_point)?;
        }
        let mut seen = HashSet::new();
        for dir in &self.directories {
            check_target(&mut seen, Category::Directory, &dir.name, &dir.path)?;
        }
        Ok(())
    }

    pub fn default_interval(&self) -> Duration {
        Duration::from_secs(self.default_interval_secs).max(MIN_PERIOD)
    }

    /// Effective interval: the target's own, else the global default.
    pub fn effective_interval(&self, interval_secs: Option<u64>) -> Duration {
        interval_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.default_interval())
            .max(MIN_PERIOD)
    }

    /// Effective timeout: the configured one, else half the interval capped
    /// at [`MAX_DERIVED_TIMEOUT`].
    pub fn effective_timeout(&self, timeout_secs: Option<u64>, interval: Duration) -> Duration {
        let timeout = match timeout_secs {
            Some(secs) => Duration::from_secs(secs),
            None => (interval / 2).min(MAX_DERIVED_TIMEOUT),
        };
        timeout.max(MIN_PERIOD)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_secs(self.retry.initial_delay_secs),
        )
    }

    /// Every configured target with its effective interval and timeout,
    /// filesystems first, in file order.
    pub fn targets(&self) -> Vec<Target> {
        let filesystems = self.filesystems.iter().map(|fs| {
            let interval = self.effective_interval(fs.interval_secs);
            Target {
                name: fs.name.clone(),
                kind: JobKind::Filesystem(FilesystemJob {
                    mount_point: fs.mount_point.clone(),
                    device: fs.device.clone(),
                }),
                interval,
                timeout: self.effective_timeout(fs.timeout_secs, interval),
            }
        });
        let directories = self.directories.iter().map(|dir| {
            let interval = self.effective_interval(dir.interval_secs);
            Target {
                name: dir.name.clone(),
                kind: JobKind::Directory(DirectoryJob {
                    path: dir.path.clone(),
                    subdirectory_levels: dir.subdirectory_levels,
                }),
                interval,
                timeout: self.effective_timeout(dir.timeout_secs, interval),
            }
        });
        filesystems.chain(directories).collect()
    }

    /// Look up a target by name in either category.
    pub fn target(&self, name: &str) -> Option<Target> {
        self.targets().into_iter().find(|t| t.name == name)
    }
}

fn check_target(
    seen: &mut HashSet<String>,
    category: Category,
    name: &str,
    path: &Path,
) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::Config(format!("{category} target with empty name")));
    }
    if !seen.insert(name.to_string()) {
        return Err(Error::Config(format!("duplicate {category} target '{name}'")));
    }
    if !path.is_absolute() {
        return Err(Error::Config(format!(
            "{category} target '{name}': path {} is not absolute",
            path.display()
        )));
    }
    Ok(())
}
