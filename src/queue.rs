//! Bounded per-category job queue.
//!
//! Thin wrapper over a tokio mpsc channel. The producer side never waits:
//! [`JobQueue::enqueue`] either succeeds immediately or fails with
//! [`Error::QueueFull`]. The consumer side is a [`JobStream`] owned by
//! exactly one worker.

use opentelemetry::KeyValue;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{Error, Result};
use crate::model::{Category, Job};
use crate::telemetry::metrics;

/// Default queue capacity per category.
pub const DEFAULT_CAPACITY: usize = 100;

/// Create a queue for `category`. Capacity is clamped to at least 1.
pub fn channel(category: Category, capacity: usize) -> (JobQueue, JobStream) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        JobQueue { category, sender },
        JobStream { category, receiver },
    )
}

/// Producer handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobQueue {
    category: Category,
    sender: mpsc::Sender<Job>,
}

impl JobQueue {
    pub fn category(&self) -> Category {
        self.category
    }

    /// Try to insert `job` without waiting.
    pub fn enqueue(&self, job: Job) -> Result<()> {
        let result = match self.sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::QueueFull {
                category: self.category,
                capacity: self.capacity(),
            }),
            Err(TrySendError::Closed(_)) => Err(Error::QueueClosed {
                category: self.category,
            }),
        };
        let operation = match &result {
            Ok(()) => "enqueue",
            Err(Error::QueueFull { .. }) => "enqueue_full",
            Err(_) => "enqueue_closed",
        };
        record_operation(self.category, operation);
        result
    }

    /// Current depth. Best effort; may be stale by the time it is read.
    pub fn size(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }
}

/// Consumer side of a queue. Not cloneable, so there is one consumer.
#[derive(Debug)]
pub struct JobStream {
    category: Category,
    receiver: mpsc::Receiver<Job>,
}

impl JobStream {
    pub fn category(&self) -> Category {
        self.category
    }

    /// Wait for the next job. Returns `None` once every producer is gone
    /// and the buffer is drained.
    pub async fn next(&mut self) -> Option<Job> {
        let job = self.receiver.recv().await;
        if job.is_some() {
            record_operation(self.category, "dequeue");
        }
        job
    }
}

fn record_operation(category: Category, operation: &'static str) {
    metrics::queue_operations().add(
        1,
        &[
            KeyValue::new("queue", category.as_str()),
            KeyValue::new("operation", operation),
        ],
    );
}

/// One queue per category.
#[derive(Debug, Clone)]
pub struct Queues {
    filesystem: JobQueue,
    directory: JobQueue,
}

impl Queues {
    /// Create both queues with the same capacity. The returned streams are
    /// in [`Category::ALL`] order.
    pub fn new(capacity: usize) -> (Self, Vec<JobStream>) {
        let (filesystem, fs_stream) = channel(Category::Filesystem, capacity);
        let (directory, dir_stream) = channel(Category::Directory, capacity);
        (
            Self {
                filesystem,
                directory,
            },
            vec![fs_stream, dir_stream],
        )
    }

    pub fn get(&self, category: Category) -> &JobQueue {
        match category {
            Category::Filesystem => &self.filesystem,
            Category::Directory => &self.directory,
        }
    }
}
