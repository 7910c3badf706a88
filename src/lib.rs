//! # duwatch
//!
//! Periodic filesystem and directory disk-usage collection.
//!
//! Every configured target gets its own timer. Ticks are admitted through
//! a shared state tracker, queued per category and measured by a single
//! worker per category, so two jobs for the same target never overlap and
//! a slow directory never blocks filesystem checks. Results are published
//! as OpenTelemetry metrics.

pub mod collect;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod queue;
pub mod retry;
pub mod state;
pub mod telemetry;
