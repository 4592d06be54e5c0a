//! Priority queue of pending tasks.
//!
//! Design:
//! - Entries are kept sorted: descending priority, then ascending `seq`
//!   (creation order). Insertion is O(n); queues are small and the order is
//!   what matters.
//! - `take_ready` removes what it returns. A claimed entry is no longer in
//!   the queue, so nobody else can claim it.

use std::time::Duration;

use tokio::time::Instant;

use crate::domain::{Priority, TaskError, TaskId};

/// What the queue needs to know about a task to order and claim it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    pub task_id: TaskId,
    pub priority: Priority,
    pub seq: u64,
    pub scheduled_at: Instant,
}

impl QueueEntry {
    /// Should `self` be dispatched before `other`?
    fn goes_before(&self, other: &QueueEntry) -> bool {
        self.priority > other.priority || (self.priority == other.priority && self.seq < other.seq)
    }
}

/// Horizon used when a delay does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + delay`, saturating at a far-future instant instead of panicking.
pub fn due_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Answer of the dependency gate for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    /// All dependencies completed.
    Open,
    /// Still waiting for at least one dependency.
    Closed,
    /// Can never run; the entry is removed and reported.
    Broken(TaskError),
}

/// Result of one `take_ready` call.
#[derive(Debug, Default)]
pub struct ReadyBatch {
    /// Claimed for admission, in dispatch order.
    pub admitted: Vec<QueueEntry>,
    /// Removed because their gate is broken.
    pub broken: Vec<(QueueEntry, TaskError)>,
}

#[derive(Debug, Default)]
pub struct PriorityQueue {
    entries: Vec<QueueEntry>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.entries.iter().any(|e| e.task_id == task_id)
    }

    /// Task ids in dispatch order.
    pub fn ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.entries.iter().map(|e| e.task_id)
    }

    pub fn insert(&mut self, entry: QueueEntry) {
        let at = self
            .entries
            .iter()
            .position(|e| entry.goes_before(e))
            .unwrap_or(self.entries.len());
        self.entries.insert(at, entry);
    }

    /// Remove by id. No-op (None) when absent.
    pub fn remove(&mut self, task_id: TaskId) -> Option<QueueEntry> {
        let at = self.entries.iter().position(|e| e.task_id == task_id)?;
        Some(self.entries.remove(at))
    }

    /// Claim up to `capacity` due entries whose gate is open.
    ///
    /// Every entry is run through `gate`, due or not, so a task that can
    /// never run is reported as soon as possible, even while the pool is full.
    pub fn take_ready<G>(&mut self, now: Instant, capacity: usize, mut gate: G) -> ReadyBatch
    where
        G: FnMut(&QueueEntry) -> Gate,
    {
        let mut batch = ReadyBatch::default();
        let mut i = 0;
        while i < self.entries.len() {
            let entry = self.entries[i];
            match gate(&entry) {
                Gate::Broken(err) => {
                    self.entries.remove(i);
                    batch.broken.push((entry, err));
                }
                Gate::Open if entry.scheduled_at <= now && batch.admitted.len() < capacity => {
                    self.entries.remove(i);
                    batch.admitted.push(entry);
                }
                Gate::Open | Gate::Closed => i += 1,
            }
        }
        batch
    }
}
