//! Metric instrument factories for duwatch.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"duwatch"` meter. Without
//! a configured exporter the global provider is a no-op.

use opentelemetry::metrics::{Counter, Gauge, Meter};

/// Returns the shared meter for duwatch instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("duwatch")
}

// ---------------------------------------------------------------------------
// Measurements
// ---------------------------------------------------------------------------

/// Gauge: filesystem size in bytes.
/// Labels: `target`, `mount_point`, `device`.
pub fn filesystem_size_bytes() -> Gauge<u64> {
    meter()
        .u64_gauge("duwatch.filesystem.size_bytes")
        .with_description("Total filesystem size")
        .with_unit("By")
        .build()
}

/// Gauge: filesystem available bytes.
/// Labels: `target`, `mount_point`, `device`.
pub fn filesystem_available_bytes() -> Gauge<u64> {
    meter()
        .u64_gauge("duwatch.filesystem.available_bytes")
        .with_description("Available filesystem space")
        .with_unit("By")
        .build()
}

/// Gauge: used / size, 0.0 to 1.0.
/// Labels: `target`, `mount_point`, `device`.
pub fn filesystem_used_ratio() -> Gauge<f64> {
    meter()
        .f64_gauge("duwatch.filesystem.used_ratio")
        .with_description("Fraction of the filesystem in use")
        .build()
}

/// Gauge: directory size in bytes.
/// Labels: `target`, `path`, `level`.
pub fn directory_size_bytes() -> Gauge<u64> {
    meter()
        .u64_gauge("duwatch.directory.size_bytes")
        .with_description("Directory size by subdirectory level")
        .with_unit("By")
        .build()
}

// ---------------------------------------------------------------------------
// Job outcomes
// ---------------------------------------------------------------------------

/// Counter: finished jobs.
/// Labels: `category`, `target`, `result` ("success" | "failure"), `error_kind`.
pub fn jobs_completed() -> Counter<u64> {
    meter()
        .u64_counter("duwatch.job.completed")
        .with_description("Number of collection jobs finished")
        .build()
}

/// Gauge: duration of the last job in seconds.
/// Labels: `category`, `target`.
pub fn job_duration_seconds() -> Gauge<f64> {
    meter()
        .f64_gauge("duwatch.job.duration_seconds")
        .with_description("Duration of the most recent collection job")
        .with_unit("s")
        .build()
}

/// Gauge: unix time of the last finished collection.
/// Labels: `category`, `target`.
pub fn last_collection_timestamp() -> Gauge<i64> {
    meter()
        .i64_gauge("duwatch.job.last_collection_timestamp")
        .with_description("Unix timestamp of the most recent collection")
        .with_unit("s")
        .build()
}

/// Gauge: 1 while the category's worker is processing a job, else 0.
/// Labels: `category`.
pub fn collection_active() -> Gauge<u64> {
    meter()
        .u64_gauge("duwatch.collection.active")
        .with_description("Whether a collection is currently running")
        .build()
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

/// Counter: ticks skipped because the previous job is still running.
/// Labels: `category`, `target`, `reason`.
pub fn ticks_skipped() -> Counter<u64> {
    meter()
        .u64_counter("duwatch.scheduler.skipped")
        .with_description("Scheduling ticks skipped")
        .build()
}

/// Counter: admitted jobs that could not be enqueued.
/// Labels: `category`, `target`, `reason`.
pub fn enqueue_failed() -> Counter<u64> {
    meter()
        .u64_counter("duwatch.scheduler.enqueue_failed")
        .with_description("Admitted jobs rejected by the queue")
        .build()
}

/// Counter: watchdogs that gave up waiting for a job to complete.
/// Labels: `category`, `target`.
pub fn watchdog_timeouts() -> Counter<u64> {
    meter()
        .u64_counter("duwatch.scheduler.watchdog_timeouts")
        .with_description("Jobs not observed complete within timeout + grace")
        .build()
}

/// Gauge: configured interval in seconds.
/// Labels: `category`, `target`.
pub fn target_interval_seconds() -> Gauge<f64> {
    meter()
        .f64_gauge("duwatch.target.interval_seconds")
        .with_description("Configured collection interval")
        .with_unit("s")
        .build()
}

/// Gauge: configured timeout in seconds.
/// Labels: `category`, `target`.
pub fn target_timeout_seconds() -> Gauge<f64> {
    meter()
        .f64_gauge("duwatch.target.timeout_seconds")
        .with_description("Configured collection timeout")
        .with_unit("s")
        .build()
}

// ---------------------------------------------------------------------------
// Queues and runtime
// ---------------------------------------------------------------------------

/// Counter: queue-level operations (enqueue, enqueue_full, dequeue).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("duwatch.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Gauge: sampled queue depth.
/// Labels: `queue`.
pub fn queue_depth() -> Gauge<u64> {
    meter()
        .u64_gauge("duwatch.queue.depth")
        .with_description("Jobs waiting in the queue")
        .build()
}

/// Gauge: alive tokio tasks.
pub fn runtime_alive_tasks() -> Gauge<u64> {
    meter()
        .u64_gauge("duwatch.runtime.alive_tasks")
        .with_description("Number of alive tokio tasks")
        .build()
}

/// Gauge: time spent waiting for the directory measurement lock.
///
/// Directory jobs are serialized by their worker, so this is always 0.
/// Kept so existing dashboards keep resolving.
pub fn directory_lock_wait_seconds() -> Gauge<f64> {
    meter()
        .f64_gauge("duwatch.directory.lock_wait_seconds")
        .with_description("Directory measurement lock wait (always 0)")
        .with_unit("s")
        .build()
}
