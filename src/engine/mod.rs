//! Job coordination: scheduler, per-category workers and the coordinator
//! that wires them together.

pub mod coordinator;
pub mod scheduler;
pub mod worker;

pub use coordinator::Coordinator;
pub use scheduler::{Scheduler, SchedulerStats, TickOutcome};
pub use worker::{JobReport, Worker};
