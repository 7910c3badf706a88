//! Collection span helpers.
//!
//! One `collection.cycle` root span covers a target's tick from admission
//! to completion. Admission, enqueue, processing, command execution and
//! output parsing are nested under it.

use std::time::Duration;

use tracing::Span;

use crate::model::{Category, Job, JobId};

/// Start the root span of a scheduling cycle.
///
/// `duwatch.job_id`, `duwatch.outcome` and `duwatch.duration_ms` are
/// declared empty and filled as the cycle progresses.
pub fn start_cycle_span(category: Category, target: &str) -> Span {
    tracing::info_span!(
        "collection.cycle",
        "duwatch.category" = %category,
        "duwatch.target" = target,
        "duwatch.job_id" = tracing::field::Empty,
        "duwatch.outcome" = tracing::field::Empty,
        "duwatch.duration_ms" = tracing::field::Empty,
    )
}

/// Span for the admission decision of one tick.
pub fn admission_span(parent: &Span, category: Category, target: &str) -> Span {
    tracing::info_span!(
        parent: parent,
        "scheduler.admission",
        "duwatch.category" = %category,
        "duwatch.target" = target,
        "duwatch.decision" = tracing::field::Empty,
    )
}

/// Span for handing an admitted job to its queue.
pub fn enqueue_span(parent: &Span, job_id: &JobId, queue_depth: usize) -> Span {
    tracing::info_span!(
        parent: parent,
        "queue.enqueue",
        "duwatch.job_id" = %job_id,
        "duwatch.queue_depth" = queue_depth as u64,
    )
}

/// Span for a worker processing `job`, parented to the job's cycle span.
pub fn process_span(job: &Job) -> Span {
    tracing::info_span!(
        parent: &job.context.span,
        "job.process",
        "duwatch.category" = %job.category(),
        "duwatch.target" = %job.target,
        "duwatch.job_id" = %job.id,
        "duwatch.path" = %job.path().display(),
        "duwatch.outcome" = tracing::field::Empty,
        "duwatch.duration_ms" = tracing::field::Empty,
    )
}

/// Span for one external command invocation.
pub fn command_span(program: &str, args: &[String], timeout: Duration) -> Span {
    tracing::info_span!(
        "command.exec",
        "process.executable.name" = program,
        "process.command_args" = %args.join(" "),
        "duwatch.timeout_ms" = timeout.as_millis() as u64,
        "process.exit.code" = tracing::field::Empty,
        "duwatch.duration_ms" = tracing::field::Empty,
    )
}

/// Span for parsing a tool's output.
pub fn parse_span(tool: &'static str, lines: usize) -> Span {
    tracing::info_span!(
        "output.parse",
        "duwatch.tool" = tool,
        "duwatch.lines" = lines as u64,
        "duwatch.samples" = tracing::field::Empty,
    )
}

/// Record the final outcome and duration on a cycle or process span.
pub fn record_outcome(span: &Span, outcome: &str, duration: Duration) {
    span.record("duwatch.outcome", outcome);
    span.record("duwatch.duration_ms", duration.as_millis() as u64);
}

/// Record a state transition event on the given span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
