//! Priority-ordered holding area for jobs waiting on a worker.
//!
//! The queue is always sorted by `(priority desc, arrival asc)`. Insertion
//! is a stable positional insert rather than a re-sort, so jobs of equal
//! priority keep their arrival order and a job that is taken off the head
//! and put back lands on the head again.

use std::collections::VecDeque;

/// Anything that can wait in a [`JobQueue`].
pub trait QueueEntry {
    /// Higher values are served first.
    fn priority(&self) -> i32;
    /// Monotonic admission counter; lower values arrived earlier.
    fn arrival_seq(&self) -> u64;
    /// Identity used for position lookups.
    fn submitter(&self) -> &str;
}

/// Ordered queue of waiting jobs.
#[derive(Debug)]
pub struct JobQueue<T> {
    entries: VecDeque<T>,
}

impl<T: QueueEntry> JobQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Insert `job` before the first entry that should be served after it.
    ///
    /// An entry is served after `job` when its priority is strictly lower,
    /// or equal with a later arrival. With a fresh job (latest arrival) this
    /// is exactly "before the first strictly lower priority".
    ///
    /// Returns the zero-based index the job was inserted at.
    pub fn enqueue(&mut self, job: T) -> usize {
        let index = self.insertion_index(&job);
        self.entries.insert(index, job);
        index
    }

    /// Index [`enqueue`](Self::enqueue) would place `job` at, without
    /// inserting it.
    pub fn insertion_index(&self, job: &T) -> usize {
        self.entries
            .iter()
            .position(|existing| serves_before(job, existing))
            .unwrap_or(self.entries.len())
    }

    /// Remove and return the head (highest priority, earliest arrival).
    pub fn dequeue(&mut self) -> Option<T> {
        self.entries.pop_front()
    }

    /// Zero-based rank of the first job from `submitter`.
    pub fn position_of(&self, submitter: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.submitter() == submitter)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate the waiting jobs in service order.
    pub fn entries(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }
}

impl<T: QueueEntry> Default for JobQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `a` must be served before `b`.
fn serves_before<T: QueueEntry>(a: &T, b: &T) -> bool {
    a.priority() > b.priority()
        || (a.priority() == b.priority() && a.arrival_seq() < b.arrival_seq())
}
