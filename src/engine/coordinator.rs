//! Coordinator: wires state tracker, queues, workers and scheduler
//! together and runs the background sampling loops.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::scheduler::Scheduler;
use super::worker::Worker;
use crate::collect::{Collectors, CommandRunner};
use crate::config::Config;
use crate::error::Result;
use crate::model::Category;
use crate::queue::Queues;
use crate::state::StateTracker;
use crate::telemetry::metrics;

/// How often queue depths are copied into the state tracker and gauges.
pub const QUEUE_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);
/// How often runtime gauges are refreshed.
pub const RUNTIME_SAMPLE_INTERVAL: Duration = Duration::from_secs(15);

pub struct Coordinator {
    config: Config,
    runner: Arc<dyn CommandRunner>,
    state: Arc<StateTracker>,
}

impl Coordinator {
    pub fn new(config: Config, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            runner,
            state: Arc::new(StateTracker::new()),
        }
    }

    /// Shared handle to the state tracker, for status reporting.
    pub fn state(&self) -> Arc<StateTracker> {
        Arc::clone(&self.state)
    }

    /// Start workers, timers and samplers, then wait for `shutdown`.
    ///
    /// Returns once every spawned task has finished. An in-flight job is
    /// allowed to end on its own deadline.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let (queues, streams) = Queues::new(self.config.queue_capacity);
        let collectors = Collectors::new(Arc::clone(&self.runner), self.config.retry_policy());

        let mut handles: Vec<JoinHandle<()>> = streams
            .into_iter()
            .map(|stream| {
                let worker = Worker::new(stream, Arc::clone(&self.state), collectors.clone());
                tokio::spawn(worker.run(shutdown.clone()))
            })
            .collect();

        let scheduler = Scheduler::new(Arc::clone(&self.state), queues.clone());
        handles.extend(scheduler.start(self.config.targets(), &shutdown));

        handles.push(tokio::spawn(sample_queue_depths(
            queues,
            Arc::clone(&self.state),
            shutdown.clone(),
        )));
        handles.push(tokio::spawn(sample_runtime(shutdown.clone())));

        info!(
            filesystems = self.config.filesystems.len(),
            directories = self.config.directories.len(),
            queue_capacity = self.config.queue_capacity,
            "coordinator running"
        );

        shutdown.cancelled().await;
        info!("shutdown requested, waiting for tasks");

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "task ended abnormally");
            }
        }

        let stats = scheduler.stats();
        info!(
            enqueued = stats.enqueued,
            skipped = stats.skipped,
            enqueue_failed = stats.enqueue_failed,
            watchdog_timeouts = stats.watchdog_timeouts,
            "coordinator stopped"
        );
        for category in Category::ALL {
            for item in self.state.items(category) {
                info!(
                    %category,
                    target = %item.name,
                    completed_runs = item.completed_runs,
                    running = item.running,
                    last_duration_ms = item.last_duration.map(|d| d.as_millis() as u64),
                    "target summary"
                );
            }
        }
        Ok(())
    }
}

/// Copy each queue's depth into the state tracker and the depth gauge.
async fn sample_queue_depths(queues: Queues, state: Arc<StateTracker>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(QUEUE_SAMPLE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        for category in Category::ALL {
            let depth = queues.get(category).size();
            state.set_queue_depth(category, depth);
            metrics::queue_depth().record(
                depth as u64,
                &[KeyValue::new("queue", category.as_str())],
            );
        }
    }
}

/// Refresh runtime-level gauges.
async fn sample_runtime(shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(RUNTIME_SAMPLE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let alive = tokio::runtime::Handle::current().metrics().num_alive_tasks();
        metrics::runtime_alive_tasks().record(alive as u64, &[]);
        metrics::directory_lock_wait_seconds().record(0.0, &[]);
    }
}
