//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use duwatch::collect::CommandRunner;
use duwatch::error::{Error, Result};
use duwatch::model::{DirectoryJob, FilesystemJob, JobKind, Target};

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct Call {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

/// Scripted stand-in for the external measurement tools.
///
/// Scripted results are returned first, in order; after that every call
/// gets the fixed output registered for its program.
#[derive(Default)]
pub struct FakeRunner {
    script: Mutex<VecDeque<Result<String>>>,
    outputs: HashMap<String, String>,
    delay: Duration,
    calls: Mutex<Vec<Call>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(mut self, program: &str, stdout: impl Into<String>) -> Self {
        self.outputs.insert(program.to_string(), stdout.into());
        self
    }

    pub fn then(self, result: Result<String>) -> Self {
        self.script.lock().unwrap().push_back(result);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Highest number of overlapping `run` calls seen.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> Result<String> {
        self.calls.lock().unwrap().push(Call {
            program: program.to_string(),
            args: args.to_vec(),
            timeout,
        });

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if let Some(result) = self.script.lock().unwrap().pop_front() {
            return result;
        }
        self.outputs
            .get(program)
            .cloned()
            .ok_or_else(|| Error::Other(format!("no output scripted for {program}")))
    }
}

pub fn command_failed(program: &str) -> Error {
    Error::CommandFailed {
        program: program.to_string(),
        code: 1,
        stderr: "transient".to_string(),
    }
}

pub fn df_output(mount: &Path) -> String {
    format!(
        "Filesystem     1K-blocks  Used Available Use% Mounted on\n/dev/sdb1            100    20        80  20% {}\n",
        mount.display()
    )
}

pub fn filesystem_target(name: &str, mount: &Path) -> Target {
    Target {
        name: name.to_string(),
        kind: JobKind::Filesystem(FilesystemJob {
            mount_point: mount.to_path_buf(),
            device: "/dev/sdb1".to_string(),
        }),
        interval: Duration::from_secs(60),
        timeout: Duration::from_secs(20),
    }
}

pub fn directory_target(name: &str, path: &Path, levels: u32) -> Target {
    Target {
        name: name.to_string(),
        kind: JobKind::Directory(DirectoryJob {
            path: path.to_path_buf(),
            subdirectory_levels: levels,
        }),
        interval: Duration::from_secs(60),
        timeout: Duration::from_secs(20),
    }
}
