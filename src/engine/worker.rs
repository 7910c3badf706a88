//! Worker: drains one category's queue and runs each job to completion.
//!
//! There is exactly one worker per category, so jobs within a category
//! run strictly one after another.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use opentelemetry::KeyValue;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, warn};

use crate::collect::{Collectors, Measurement};
use crate::error::Result;
use crate::model::{Category, Job, JobId, JobKind};
use crate::queue::JobStream;
use crate::state::StateTracker;
use crate::telemetry::job::{process_span, record_outcome, record_state_transition};
use crate::telemetry::metrics;

/// What happened to one processed job.
#[derive(Debug)]
pub struct JobReport {
    pub job_id: JobId,
    pub target: String,
    pub duration: Duration,
    pub result: Result<Measurement>,
}

impl JobReport {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Consumes one category's [`JobStream`].
pub struct Worker {
    category: Category,
    stream: JobStream,
    state: Arc<StateTracker>,
    collectors: Collectors,
}

impl Worker {
    pub fn new(stream: JobStream, state: Arc<StateTracker>, collectors: Collectors) -> Self {
        Self {
            category: stream.category(),
            stream,
            state,
            collectors,
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    /// Process jobs until shutdown or until the queue's producers are gone.
    ///
    /// Shutdown stops dequeuing; a job already in progress finishes on
    /// its own deadline first.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(category = %self.category, "worker started");
        loop {
            let job = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                job = self.stream.next() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            self.process(job).await;
        }
        info!(category = %self.category, "worker stopped");
    }

    /// Run one job and publish its outcome. Failures are absorbed here.
    pub async fn process(&self, job: Job) -> JobReport {
        let category = job.category();
        let span = process_span(&job);
        record_state_transition(&span, "queued", "running");

        self.state.set_running_job(&job);
        metrics::collection_active().record(1, &[KeyValue::new("category", category.as_str())]);

        let start = Instant::now();
        let result = self
            .collectors
            .measure(&job.kind, job.timeout, &job.context.cancel)
            .instrument(span.clone())
            .await;
        let duration = start.elapsed();

        self.state.clear_running_job(category, &job.id, duration);
        metrics::collection_active().record(0, &[KeyValue::new("category", category.as_str())]);

        let outcome = if result.is_ok() { "success" } else { "failure" };
        record_state_transition(&span, "running", outcome);
        record_outcome(&span, outcome, duration);

        span.in_scope(|| {
            match &result {
                Ok(measurement) => {
                    publish_measurement(&job, measurement);
                    info!(duration_ms = duration.as_millis() as u64, "collection succeeded");
                }
                Err(e) => {
                    error!(
                        error = %e,
                        error_kind = e.kind(),
                        duration_ms = duration.as_millis() as u64,
                        "collection failed"
                    );
                }
            }
            record_completion(&job, duration, &result);

            if is_slow(duration, job.interval) {
                warn!(
                    duration_ms = duration.as_millis() as u64,
                    interval_ms = job.interval.as_millis() as u64,
                    "slow job: took more than half the collection interval"
                );
            }
        });

        JobReport {
            job_id: job.id,
            target: job.target,
            duration,
            result,
        }
    }
}

/// A job is slow once it takes more than half its collection interval.
pub fn is_slow(duration: Duration, interval: Duration) -> bool {
    duration > interval / 2
}

fn target_attrs(job: &Job) -> [KeyValue; 2] {
    [
        KeyValue::new("category", job.category().as_str()),
        KeyValue::new("target", job.target.clone()),
    ]
}

fn record_completion(job: &Job, duration: Duration, result: &Result<Measurement>) {
    let [category, target] = target_attrs(job);
    let (outcome, error_kind) = match result {
        Ok(_) => ("success", "none"),
        Err(e) => ("failure", e.kind()),
    };
    metrics::jobs_completed().add(
        1,
        &[
            category.clone(),
            target.clone(),
            KeyValue::new("result", outcome),
            KeyValue::new("error_kind", error_kind),
        ],
    );
    let attrs = [category, target];
    metrics::job_duration_seconds().record(duration.as_secs_f64(), &attrs);
    metrics::last_collection_timestamp().record(Utc::now().timestamp(), &attrs);
}

fn publish_measurement(job: &Job, measurement: &Measurement) {
    match (&job.kind, measurement) {
        (JobKind::Filesystem(fs), Measurement::Filesystem(usage)) => {
            let attrs = [
                KeyValue::new("target", job.target.clone()),
                KeyValue::new("mount_point", fs.mount_point.display().to_string()),
                KeyValue::new("device", fs.device.clone()),
            ];
            metrics::filesystem_size_bytes().record(usage.size_bytes, &attrs);
            metrics::filesystem_available_bytes().record(usage.available_bytes, &attrs);
            metrics::filesystem_used_ratio().record(usage.used_ratio, &attrs);
        }
        (JobKind::Directory(_), Measurement::Directory { samples }) => {
            let gauge = metrics::directory_size_bytes();
            for sample in samples {
                gauge.record(
                    sample.size_bytes,
                    &[
                        KeyValue::new("target", job.target.clone()),
                        KeyValue::new("path", sample.path.display().to_string()),
                        KeyValue::new("level", i64::from(sample.level)),
                    ],
                );
            }
        }
        _ => warn!(job_id = %job.id, "measurement does not match job kind, not published"),
    }
}
