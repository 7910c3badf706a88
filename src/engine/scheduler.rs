//! Scheduler: one timer per target, admission control and the per-job
//! completion watchdog.
//!
//! A tick never fails hard. Skips, full queues and watchdog timeouts are
//! counted and logged.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use opentelemetry::KeyValue;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info, warn};

use crate::error::Error;
use crate::model::{Category, Job, JobContext, JobId, Target};
use crate::queue::Queues;
use crate::state::{Admission, StateTracker};
use crate::telemetry::job::{admission_span, enqueue_span, record_outcome, start_cycle_span};
use crate::telemetry::metrics;

/// How often a watchdog checks whether its job finished.
pub const WATCHDOG_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Extra time past the job timeout before a watchdog gives up.
pub const WATCHDOG_GRACE: Duration = Duration::from_secs(5);

/// Outcome of a single tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Enqueued(JobId),
    /// The previous job for the target is still running.
    Skipped,
    /// Admitted, but the queue rejected the job.
    EnqueueFailed,
    /// The target was never registered.
    Unregistered,
}

/// How a watchdog closed out its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    Completed,
    TimedOut,
    Shutdown,
}

impl WatchOutcome {
    fn as_str(self) -> &'static str {
        match self {
            WatchOutcome::Completed => "completed",
            WatchOutcome::TimedOut => "timeout",
            WatchOutcome::Shutdown => "shutdown",
        }
    }
}

/// Running totals, readable without going through the metrics pipeline.
#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    skipped: AtomicU64,
    enqueue_failed: AtomicU64,
    watchdog_completed: AtomicU64,
    watchdog_timeouts: AtomicU64,
}

/// Point-in-time copy of the scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub enqueued: u64,
    pub skipped: u64,
    pub enqueue_failed: u64,
    pub watchdog_completed: u64,
    pub watchdog_timeouts: u64,
}

/// Job dispatched to a queue whose watchdog has not closed it yet.
#[derive(Debug, Clone)]
struct InFlight {
    category: Category,
    target: String,
}

#[derive(Clone)]
pub struct Scheduler {
    state: Arc<StateTracker>,
    queues: Queues,
    counters: Arc<Counters>,
    in_flight: Arc<Mutex<HashMap<JobId, InFlight>>>,
    watchdog_poll: Duration,
    watchdog_grace: Duration,
}

impl Scheduler {
    pub fn new(state: Arc<StateTracker>, queues: Queues) -> Self {
        Self {
            state,
            queues,
            counters: Arc::new(Counters::default()),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            watchdog_poll: WATCHDOG_POLL_INTERVAL,
            watchdog_grace: WATCHDOG_GRACE,
        }
    }

    /// Override watchdog timings.
    pub fn with_watchdog(mut self, poll: Duration, grace: Duration) -> Self {
        self.watchdog_poll = poll;
        self.watchdog_grace = grace;
        self
    }

    pub fn stats(&self) -> SchedulerStats {
        let c = &self.counters;
        SchedulerStats {
            enqueued: c.enqueued.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
            enqueue_failed: c.enqueue_failed.load(Ordering::Relaxed),
            watchdog_completed: c.watchdog_completed.load(Ordering::Relaxed),
            watchdog_timeouts: c.watchdog_timeouts.load(Ordering::Relaxed),
        }
    }

    /// Jobs dispatched whose watchdog is still waiting.
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Register `target` with the state tracker and publish its schedule.
    pub fn register(&self, target: &Target) {
        let category = target.category();
        self.state.register_item(category, &target.name);

        let attrs = [
            KeyValue::new("category", category.as_str()),
            KeyValue::new("target", target.name.clone()),
        ];
        metrics::target_interval_seconds().record(target.interval.as_secs_f64(), &attrs);
        metrics::target_timeout_seconds().record(target.timeout.as_secs_f64(), &attrs);

        if target.interval_shorter_than_timeout() {
            warn!(
                %category,
                target = %target.name,
                interval = ?target.interval,
                timeout = ?target.timeout,
                "interval is shorter than timeout; slow runs will skip the following ticks"
            );
        }
    }

    /// Register every target and start its timer. The first tick of each
    /// timer fires immediately.
    pub fn start(&self, targets: Vec<Target>, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        for target in &targets {
            self.register(target);
        }
        info!(targets = targets.len(), "scheduler started");

        targets
            .into_iter()
            .map(|target| {
                let scheduler = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { scheduler.run_timer(target, shutdown).await })
            })
            .collect()
    }

    async fn run_timer(self, target: Target, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(target.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick(&target, &shutdown);
                }
            }
        }
        debug!(target = %target.name, "timer stopped");
    }

    /// Run the admission algorithm for one tick of `target`.
    ///
    /// Must be called within a tokio runtime; an enqueued job gets a
    /// watchdog task.
    pub fn tick(&self, target: &Target, shutdown: &CancellationToken) -> TickOutcome {
        let category = target.category();
        let cycle = start_cycle_span(category, &target.name);
        let job = Job::for_target(
            target,
            JobContext::new(cycle.clone(), shutdown.child_token()),
        );
        cycle.record("duwatch.job_id", job.id.as_str());

        // Check and mark in one step, so a concurrent tick for the same
        // target cannot get past the check before this job is dequeued.
        let admission = admission_span(&cycle, category, &target.name);
        let decision = self.state.try_admit(category, &target.name, &job.id);
        match decision {
            Admission::Admitted => admission.record("duwatch.decision", "admitted"),
            Admission::AlreadyRunning => {
                admission.record("duwatch.decision", "skipped");
                drop(admission);
                return self.skip(target, &cycle);
            }
            Admission::Unregistered => {
                admission.record("duwatch.decision", "unregistered");
                warn!(%category, target = %target.name, "tick for unregistered target");
                record_outcome(&cycle, "unregistered", Duration::ZERO);
                return TickOutcome::Unregistered;
            }
        };
        drop(admission);

        let job_id = job.id.clone();
        let timeout = job.timeout;
        let queue = self.queues.get(category);
        let enqueue = enqueue_span(&cycle, &job_id, queue.size());
        let enqueued = enqueue.in_scope(|| queue.enqueue(job));
        drop(enqueue);

        if let Err(e) = enqueued {
            self.state.release_item(category, &target.name, &job_id);
            self.counters.enqueue_failed.fetch_add(1, Ordering::Relaxed);
            metrics::enqueue_failed().add(
                1,
                &[
                    KeyValue::new("category", category.as_str()),
                    KeyValue::new("target", target.name.clone()),
                    KeyValue::new("reason", e.kind()),
                ],
            );
            cycle.in_scope(|| warn!(error = %e, "enqueue failed, retrying next tick"));
            record_outcome(&cycle, "enqueue_failed", Duration::ZERO);
            return TickOutcome::EnqueueFailed;
        }

        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                job_id.clone(),
                InFlight {
                    category,
                    target: target.name.clone(),
                },
            );
        cycle.in_scope(|| debug!("job enqueued"));

        // The watchdog task owns the cycle span from here on.
        let scheduler = self.clone();
        let watch_id = job_id.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            scheduler.watch(cycle, watch_id, timeout, shutdown).await;
        });

        TickOutcome::Enqueued(job_id)
    }

    fn skip(&self, target: &Target, cycle: &Span) -> TickOutcome {
        self.counters.skipped.fetch_add(1, Ordering::Relaxed);
        metrics::ticks_skipped().add(
            1,
            &[
                KeyValue::new("category", target.category().as_str()),
                KeyValue::new("target", target.name.clone()),
                KeyValue::new("reason", "previous_job_running"),
            ],
        );
        cycle.in_scope(|| info!("previous job still running, skipping tick"));
        record_outcome(cycle, "skipped", Duration::ZERO);
        TickOutcome::Skipped
    }

    /// Poll until the job is no longer running or `timeout` plus grace
    /// elapses, then close out the cycle.
    ///
    /// Never clears the state tracker; only the worker does that.
    async fn watch(
        self,
        cycle: Span,
        job_id: JobId,
        timeout: Duration,
        shutdown: CancellationToken,
    ) -> WatchOutcome {
        let started = Instant::now();
        let deadline = started + timeout + self.watchdog_grace;
        let mut poll = tokio::time::interval(self.watchdog_poll);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break WatchOutcome::Shutdown,
                _ = poll.tick() => {}
            }
            if !self.job_pending(&job_id) {
                break WatchOutcome::Completed;
            }
            if Instant::now() >= deadline {
                break WatchOutcome::TimedOut;
            }
        };

        let record = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&job_id);
        let elapsed = started.elapsed();

        match outcome {
            WatchOutcome::Completed => {
                self.counters.watchdog_completed.fetch_add(1, Ordering::Relaxed);
                cycle.in_scope(|| debug!(elapsed_ms = elapsed.as_millis() as u64, "cycle complete"));
            }
            WatchOutcome::TimedOut => {
                self.counters.watchdog_timeouts.fetch_add(1, Ordering::Relaxed);
                if let Some(InFlight { category, target }) = &record {
                    metrics::watchdog_timeouts().add(
                        1,
                        &[
                            KeyValue::new("category", category.as_str()),
                            KeyValue::new("target", target.clone()),
                        ],
                    );
                }
                let err = Error::WatchdogTimeout {
                    job_id: job_id.to_string(),
                    after: elapsed,
                };
                cycle.in_scope(|| warn!(error = %err, "watchdog gave up waiting for job"));
            }
            WatchOutcome::Shutdown => {
                cycle.in_scope(|| debug!("watchdog stopped by shutdown"));
            }
        }
        record_outcome(&cycle, outcome.as_str(), elapsed);
        outcome
    }

    fn job_pending(&self, job_id: &JobId) -> bool {
        let record = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .cloned();
        let Some(InFlight { category, target }) = record else {
            return false;
        };
        self.state
            .get_item_state(category, &target)
            .is_some_and(|item| item.running && item.current_job_id.as_ref() == Some(job_id))
    }
}
