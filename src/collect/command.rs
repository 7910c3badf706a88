//! External measurement tool invocation.
//!
//! Collectors only see [`CommandRunner`]; [`ProcessRunner`] is the real
//! implementation on top of `tokio::process`.

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{Instrument, Span, debug};

use crate::error::{Error, Result};
use crate::telemetry::job::command_span;

/// Runs a program to completion within a deadline and returns its stdout.
#[async_trait]
pub trait CommandRunner: Send + Sync + 'static {
    /// Run `program` with `args`.
    ///
    /// # Errors
    ///
    /// - [`Error::CommandTimeout`] if `timeout` elapses; the process is killed
    /// - [`Error::CommandFailed`] on a non-zero exit
    /// - [`Error::CommandKilled`] if a signal terminated the process
    /// - [`Error::Spawn`] if the program could not be started
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> Result<String>;
}

/// Spawns real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String], timeout: Duration) -> Result<String> {
        let span = command_span(program, args, timeout);
        run_process(program, args, timeout).instrument(span).await
    }
}

async fn run_process(program: &str, args: &[String], timeout: Duration) -> Result<String> {
    let start = Instant::now();
    debug!(program, ?args, ?timeout, "running command");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| Error::Spawn {
            program: program.to_string(),
            source,
        })?;

    // On timeout the wait future is dropped, which drops the child and
    // kill_on_drop terminates it.
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => {
            Span::current().record("duwatch.duration_ms", start.elapsed().as_millis() as u64);
            return Err(Error::CommandTimeout {
                program: program.to_string(),
                timeout,
            });
        }
    };

    let span = Span::current();
    span.record("duwatch.duration_ms", start.elapsed().as_millis() as u64);
    if let Some(code) = output.status.code() {
        span.record("process.exit.code", code);
    }

    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }
    match output.status.code() {
        Some(code) => Err(Error::CommandFailed {
            program: program.to_string(),
            code,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }),
        None => Err(Error::CommandKilled {
            program: program.to_string(),
            signal: exit_signal(&output.status).unwrap_or(-1),
        }),
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt as _;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}
