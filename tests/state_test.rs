//! Integration tests for the state tracker.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use duwatch::model::{Category, Job, JobContext, JobId};
use duwatch::state::{Admission, StateTracker};

fn tracker_with(name: &str) -> StateTracker {
    let state = StateTracker::new();
    state.register_item(Category::Directory, name);
    state
}

fn job(name: &str) -> Job {
    let target = common::directory_target(name, std::path::Path::new("/data"), 1);
    Job::for_target(&target, JobContext::detached())
}

// ---------------------------------------------------------------------------
// Registration and admission
// ---------------------------------------------------------------------------

#[test]
fn registered_item_starts_idle() {
    let state = tracker_with("projects");
    let item = state
        .get_item_state(Category::Directory, "projects")
        .expect("registered");
    assert!(!item.running);
    assert!(item.current_job_id.is_none());
    assert!(item.last_start.is_none());
    assert_eq!(item.completed_runs, 0);
}

#[test]
fn register_twice_keeps_existing_state() {
    let state = tracker_with("projects");
    let id = JobId::new(Category::Directory, "projects");
    assert_eq!(
        state.try_admit(Category::Directory, "projects", &id),
        Admission::Admitted
    );

    state.register_item(Category::Directory, "projects");
    assert!(state.is_running(Category::Directory, "projects"));
}

#[test]
fn second_admission_is_refused_while_running() {
    let state = tracker_with("projects");
    let first = JobId::new(Category::Directory, "projects");
    let second = JobId::new(Category::Directory, "projects");

    assert_eq!(
        state.try_admit(Category::Directory, "projects", &first),
        Admission::Admitted
    );
    assert_eq!(
        state.try_admit(Category::Directory, "projects", &second),
        Admission::AlreadyRunning
    );
    let item = state.get_item_state(Category::Directory, "projects").unwrap();
    assert_eq!(item.current_job_id, Some(first));
}

#[test]
fn admission_of_unregistered_target_is_rejected() {
    let state = StateTracker::new();
    let id = JobId::new(Category::Filesystem, "ghost");
    assert_eq!(
        state.try_admit(Category::Filesystem, "ghost", &id),
        Admission::Unregistered
    );
    assert!(!state.is_running(Category::Filesystem, "ghost"));
}

#[test]
fn categories_are_tracked_separately() {
    let state = tracker_with("data");
    state.register_item(Category::Filesystem, "data");
    let id = JobId::new(Category::Directory, "data");
    state.try_admit(Category::Directory, "data", &id);

    assert!(state.is_running(Category::Directory, "data"));
    assert!(!state.is_running(Category::Filesystem, "data"));
}

#[test]
fn release_only_clears_matching_job() {
    let state = tracker_with("projects");
    let id = JobId::new(Category::Directory, "projects");
    let other = JobId::new(Category::Directory, "projects");
    state.try_admit(Category::Directory, "projects", &id);

    assert!(!state.release_item(Category::Directory, "projects", &other));
    assert!(state.is_running(Category::Directory, "projects"));

    assert!(state.release_item(Category::Directory, "projects", &id));
    assert!(!state.is_running(Category::Directory, "projects"));
}

// ---------------------------------------------------------------------------
// Running job lifecycle
// ---------------------------------------------------------------------------

#[test]
fn set_then_clear_running_job() {
    let state = tracker_with("projects");
    let job = job("projects");

    state.set_running_job(&job);
    let running = state.get_running_job(Category::Directory).expect("running job");
    assert_eq!(running.id, job.id);
    assert_eq!(running.target, "projects");
    assert!(state.is_running(Category::Directory, "projects"));

    assert!(state.clear_running_job(Category::Directory, &job.id, Duration::from_millis(40)));
    assert!(state.get_running_job(Category::Directory).is_none());

    let item = state.get_item_state(Category::Directory, "projects").unwrap();
    assert!(!item.running);
    assert!(item.current_job_id.is_none());
    assert!(item.last_start.is_some());
    assert!(item.last_end.is_some());
    assert_eq!(item.last_duration, Some(Duration::from_millis(40)));
    assert_eq!(item.completed_runs, 1);
}

#[test]
fn clearing_twice_is_a_noop() {
    let state = tracker_with("projects");
    let job = job("projects");
    state.set_running_job(&job);

    assert!(state.clear_running_job(Category::Directory, &job.id, Duration::from_secs(1)));
    let after_first = state.get_item_state(Category::Directory, "projects").unwrap();

    assert!(!state.clear_running_job(Category::Directory, &job.id, Duration::from_secs(9)));
    let after_second = state.get_item_state(Category::Directory, "projects").unwrap();

    assert!(!after_second.running);
    assert_eq!(after_first, after_second);
}

#[test]
fn clearing_a_stale_job_leaves_current_job_alone() {
    let state = tracker_with("projects");
    let stale = job("projects");
    let current = job("projects");

    state.set_running_job(&current);
    assert!(!state.clear_running_job(Category::Directory, &stale.id, Duration::ZERO));

    assert!(state.is_running(Category::Directory, "projects"));
    assert_eq!(
        state.get_running_job(Category::Directory).map(|r| r.id),
        Some(current.id)
    );
}

#[test]
fn set_running_job_for_unregistered_target_is_ignored() {
    let state = StateTracker::new();
    let job = job("ghost");
    state.set_running_job(&job);
    assert!(state.get_running_job(Category::Directory).is_none());
    assert!(state.get_item_state(Category::Directory, "ghost").is_none());
}

#[test]
fn item_state_is_a_snapshot() {
    let state = tracker_with("projects");
    let mut snapshot = state.get_item_state(Category::Directory, "projects").unwrap();
    snapshot.running = true;
    snapshot.completed_runs = 99;

    let fresh = state.get_item_state(Category::Directory, "projects").unwrap();
    assert!(!fresh.running);
    assert_eq!(fresh.completed_runs, 0);
}

#[test]
fn items_are_sorted_by_name() {
    let state = StateTracker::new();
    for name in ["media", "backups", "home"] {
        state.register_item(Category::Directory, name);
    }
    let names: Vec<String> = state
        .items(Category::Directory)
        .into_iter()
        .map(|i| i.name)
        .collect();
    assert_eq!(names, ["backups", "home", "media"]);
}

#[test]
fn queue_depth_round_trips() {
    let state = StateTracker::new();
    assert_eq!(state.get_queue_depth(Category::Filesystem), 0);
    state.set_queue_depth(Category::Filesystem, 7);
    state.set_queue_depth(Category::Directory, 3);
    assert_eq!(state.get_queue_depth(Category::Filesystem), 7);
    assert_eq!(state.get_queue_depth(Category::Directory), 3);
}

// ---------------------------------------------------------------------------
// Mutual exclusion under concurrent ticks
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_admissions_never_overlap() {
    let state = Arc::new(tracker_with("hot"));
    let active = Arc::new(AtomicUsize::new(0));
    let admitted = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let state = Arc::clone(&state);
            let active = Arc::clone(&active);
            let admitted = Arc::clone(&admitted);
            tokio::spawn(async move {
                for _ in 0..250 {
                    let id = JobId::new(Category::Directory, "hot");
                    if state.try_admit(Category::Directory, "hot", &id) != Admission::Admitted {
                        tokio::task::yield_now().await;
                        continue;
                    }
                    let overlapping = active.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(overlapping, 0, "two jobs running for the same target");
                    admitted.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    state.clear_running_job(Category::Directory, &id, Duration::ZERO);
                }
            })
        })
        .collect();

    for task in tasks {
        task.await.expect("task panicked");
    }
    assert!(admitted.load(Ordering::SeqCst) > 0);
    assert!(!state.is_running(Category::Directory, "hot"));
}
