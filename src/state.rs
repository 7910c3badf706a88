//! In-memory record of which targets are running, per-target run history
//! and sampled queue depths.
//!
//! Every mutation goes through one reader/writer lock. Nothing here touches
//! the OS or the network, so the lock is never held across I/O or `.await`.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::model::{Category, ItemState, Job, JobId, RunningJob};

/// Result of an atomic admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The target was idle and is now marked running for the new job.
    Admitted,
    /// A previous job for the target is still in flight.
    AlreadyRunning,
    /// The target was never registered.
    Unregistered,
}

#[derive(Debug, Default)]
struct Inner {
    items: HashMap<Category, HashMap<String, ItemState>>,
    running: HashMap<Category, RunningJob>,
    queue_depth: HashMap<Category, usize>,
}

impl Inner {
    fn item_mut(&mut self, category: Category, name: &str) -> Option<&mut ItemState> {
        self.items.get_mut(&category)?.get_mut(name)
    }
}

/// Authoritative run bookkeeping shared by scheduler and workers.
#[derive(Debug, Default)]
pub struct StateTracker {
    inner: RwLock<Inner>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave `Inner` half-updated in a
    // way later callers care about, so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a target. Registering twice keeps the existing state.
    pub fn register_item(&self, category: Category, name: &str) {
        self.write()
            .items
            .entry(category)
            .or_default()
            .entry(name.to_string())
            .or_insert_with(|| ItemState::new(category, name));
    }

    /// Check-and-mark in one step: if the target is idle, mark it running
    /// for `job_id` before the job is enqueued.
    pub fn try_admit(&self, category: Category, name: &str, job_id: &JobId) -> Admission {
        let mut inner = self.write();
        let Some(item) = inner.item_mut(category, name) else {
            return Admission::Unregistered;
        };
        if item.running {
            return Admission::AlreadyRunning;
        }
        item.running = true;
        item.current_job_id = Some(job_id.clone());
        Admission::Admitted
    }

    /// Undo an admission that never reached the queue. Only clears the flag
    /// if it still belongs to `job_id`; returns whether it did.
    pub fn release_item(&self, category: Category, name: &str, job_id: &JobId) -> bool {
        let mut inner = self.write();
        match inner.item_mut(category, name) {
            Some(item) if item.current_job_id.as_ref() == Some(job_id) => {
                item.running = false;
                item.current_job_id = None;
                true
            }
            _ => false,
        }
    }

    /// Record `job` as in flight for its target and its category.
    pub fn set_running_job(&self, job: &Job) {
        let category = job.category();
        let now = Utc::now();
        let mut inner = self.write();
        let Some(item) = inner.item_mut(category, &job.target) else {
            warn!(
                %category,
                target = %job.target,
                job_id = %job.id,
                "set_running_job for unregistered target, ignoring"
            );
            return;
        };
        item.running = true;
        item.current_job_id = Some(job.id.clone());
        item.last_start = Some(now);
        inner.running.insert(category, RunningJob::from_job(job, now));
    }

    /// Clear the category's running job and the owning target's running
    /// flag, recording end time and duration.
    ///
    /// Clearing a job that is no longer recorded anywhere is a no-op.
    /// Returns whether anything was cleared.
    pub fn clear_running_job(&self, category: Category, job_id: &JobId, duration: Duration) -> bool {
        let mut inner = self.write();
        let mut cleared = false;

        if inner.running.get(&category).is_some_and(|r| &r.id == job_id) {
            inner.running.remove(&category);
            cleared = true;
        }

        let owner = inner.items.get_mut(&category).and_then(|items| {
            items
                .values_mut()
                .find(|item| item.current_job_id.as_ref() == Some(job_id))
        });
        if let Some(item) = owner {
            item.running = false;
            item.current_job_id = None;
            item.last_end = Some(Utc::now());
            item.last_duration = Some(duration);
            item.completed_runs += 1;
            cleared = true;
        }

        if !cleared {
            debug!(%category, %job_id, "clear_running_job: already clear");
        }
        cleared
    }

    pub fn is_running(&self, category: Category, name: &str) -> bool {
        self.read()
            .items
            .get(&category)
            .and_then(|items| items.get(name))
            .is_some_and(|item| item.running)
    }

    pub fn get_running_job(&self, category: Category) -> Option<RunningJob> {
        self.read().running.get(&category).cloned()
    }

    /// Snapshot copy of a target's state.
    pub fn get_item_state(&self, category: Category, name: &str) -> Option<ItemState> {
        self.read()
            .items
            .get(&category)
            .and_then(|items| items.get(name))
            .cloned()
    }

    /// Snapshot of every registered target in `category`, sorted by name.
    pub fn items(&self, category: Category) -> Vec<ItemState> {
        let mut items: Vec<ItemState> = self
            .read()
            .items
            .get(&category)
            .map(|items| items.values().cloned().collect())
            .unwrap_or_default();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        items
    }

    pub fn set_queue_depth(&self, category: Category, depth: usize) {
        self.write().queue_depth.insert(category, depth);
    }

    pub fn get_queue_depth(&self, category: Category) -> usize {
        self.read().queue_depth.get(&category).copied().unwrap_or(0)
    }
}
