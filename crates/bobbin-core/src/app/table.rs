//! TaskTable - ロック配下の共有状態
//!
//! タスク表・優先度キュー・依存グラフ・カウンタを 1 つにまとめ、
//! 状態遷移はすべてここのメソッドで行います。
//! 非同期処理を含まないので、ランタイムなしで単体テストできます。
//!
//! # 不変条件
//! - キューに載っている id は tasks 上で必ず Pending
//! - `running` は Running のレコード数と一致
//! - history には終了状態の id だけが、終了した順に並ぶ

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::app::status::{Counters, Statistics, TaskSummary};
use crate::domain::{TaskError, TaskId, TaskStatus};
use crate::queue::{DependencyGraph, PriorityQueue, QueueEntry, ReadyBatch, TaskRecord};

#[derive(Debug)]
pub(crate) struct TaskTable {
    pub tasks: HashMap<TaskId, TaskRecord>,
    pub queue: PriorityQueue,
    pub graph: DependencyGraph,
    /// Admitted and not yet finished.
    pub running: usize,
    /// False once shutdown has begun.
    pub accepting: bool,
    pub counters: Counters,
    next_seq: u64,
    history: VecDeque<TaskId>,
    history_limit: Option<usize>,
}

impl TaskTable {
    pub fn new(history_limit: Option<usize>) -> Self {
        Self {
            tasks: HashMap::new(),
            queue: PriorityQueue::new(),
            graph: DependencyGraph::new(),
            running: 0,
            accepting: true,
            counters: Counters::default(),
            next_seq: 0,
            history: VecDeque::new(),
            history_limit,
        }
    }

    pub fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    pub fn status_of(&self, id: TaskId) -> Option<TaskStatus> {
        self.tasks.get(&id).map(|r| r.status)
    }

    /// Register a new Pending task and queue it.
    ///
    /// A dependency that already completed adds no edge. Unknown, failed or
    /// cancelled dependencies do get one; the gate reports them on the next
    /// claim.
    pub fn insert(&mut self, record: TaskRecord) {
        for &dep in &record.dependencies {
            if self.status_of(dep) != Some(TaskStatus::Completed) {
                self.graph.add_dependency(record.id, dep);
            }
        }
        self.queue.insert(entry_of(&record));
        self.counters.submitted += 1;
        self.tasks.insert(record.id, record);
    }

    /// Remove up to `capacity` runnable entries from the queue, plus every
    /// entry whose dependencies can no longer be met.
    pub fn claim(&mut self, now: Instant, capacity: usize) -> ReadyBatch {
        let Self {
            queue, graph, tasks, ..
        } = self;
        queue.take_ready(now, capacity, |entry| {
            graph.gate(entry.task_id, |dep| tasks.get(&dep).map(|r| r.status))
        })
    }

    /// Pending -> Running for a claimed entry.
    pub fn start(&mut self, id: TaskId, now: DateTime<Utc>) -> Option<&TaskRecord> {
        let record = self.tasks.get_mut(&id)?;
        record.start_attempt(now);
        self.running += 1;
        Some(record)
    }

    /// Running -> Completed. Releases the task's dependents and returns the
    /// ones left with no dependency.
    pub fn complete(
        &mut self,
        id: TaskId,
        value: serde_json::Value,
        now: DateTime<Utc>,
        took: std::time::Duration,
    ) -> Option<(TaskSummary, Vec<TaskId>)> {
        let record = self.tasks.get_mut(&id)?;
        record.mark_completed(value, now, took);
        let summary = TaskSummary::from(&*record);
        self.running = self.running.saturating_sub(1);
        self.counters.record_completion(took);
        let unblocked = self.graph.release(id);
        self.settle(id);
        Some((summary, unblocked))
    }

    /// Running -> Retrying. The task is off the queue until `requeue`.
    pub fn begin_retry(&mut self, id: TaskId, error: TaskError, run_at: Instant) -> Option<TaskSummary> {
        let record = self.tasks.get_mut(&id)?;
        record.schedule_retry(error, run_at);
        self.running = self.running.saturating_sub(1);
        Some(TaskSummary::from(&*record))
    }

    /// Retrying -> Pending, back in the queue.
    pub fn requeue(&mut self, id: TaskId) -> bool {
        let Some(record) = self.tasks.get_mut(&id) else {
            return false;
        };
        if record.status != TaskStatus::Retrying {
            return false;
        }
        record.requeue();
        let entry = entry_of(record);
        self.queue.insert(entry);
        true
    }

    /// Running -> Failed, after the last attempt.
    ///
    /// Returns the failed task first, then every dependent failed with it.
    pub fn fail_running(&mut self, id: TaskId, error: TaskError, now: DateTime<Utc>) -> Vec<TaskSummary> {
        self.running = self.running.saturating_sub(1);
        self.fail(id, error, now)
    }

    /// Fail a non-terminal task and, transitively, everything waiting on it.
    pub fn fail(&mut self, id: TaskId, error: TaskError, now: DateTime<Utc>) -> Vec<TaskSummary> {
        let mut failed = Vec::new();
        let mut stack = vec![(id, error)];
        while let Some((id, error)) = stack.pop() {
            self.queue.remove(id);
            self.graph.forget(id);
            let Some(record) = self.tasks.get_mut(&id) else {
                continue;
            };
            if record.status.is_terminal() {
                continue;
            }
            record.mark_failed(error, now);
            failed.push(TaskSummary::from(&*record));
            self.counters.failed += 1;
            stack.extend(
                self.graph
                    .get_waiting_tasks(id)
                    .into_iter()
                    .map(|waiter| (waiter, TaskError::DependencyFailed(id))),
            );
            self.settle(id);
        }
        failed
    }

    /// Pending -> Cancelled. Dependents fail with `DependencyFailed`.
    ///
    /// Returns `None` when the task is not Pending.
    pub fn cancel(&mut self, id: TaskId, now: DateTime<Utc>) -> Option<Vec<TaskSummary>> {
        let record = self.tasks.get_mut(&id)?;
        if record.status != TaskStatus::Pending {
            return None;
        }
        record.mark_cancelled(now);
        self.counters.cancelled += 1;
        self.queue.remove(id);
        self.graph.forget(id);

        let waiters = self.graph.get_waiting_tasks(id);
        self.settle(id);
        let mut failed = Vec::new();
        for waiter in waiters {
            failed.extend(self.fail(waiter, TaskError::DependencyFailed(id), now));
        }
        Some(failed)
    }

    /// Cancel everything still queued. Used once, at shutdown.
    pub fn cancel_queued(&mut self, now: DateTime<Utc>) -> usize {
        let queued: Vec<TaskId> = self.queue.ids().collect();
        for &id in &queued {
            self.queue.remove(id);
            self.graph.forget(id);
            if let Some(record) = self.tasks.get_mut(&id) {
                record.mark_cancelled(now);
                self.counters.cancelled += 1;
            }
            self.settle(id);
        }
        queued.len()
    }

    /// Fail whatever is still in flight. Used when shutdown gives up waiting.
    pub fn abort_in_flight(&mut self, now: DateTime<Utc>) -> Vec<TaskSummary> {
        let in_flight: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|r| matches!(r.status, TaskStatus::Running | TaskStatus::Retrying))
            .map(|r| r.id)
            .collect();
        self.running = 0;
        in_flight
            .into_iter()
            .flat_map(|id| self.fail(id, TaskError::Aborted, now))
            .collect()
    }

    /// Newest first, optionally filtered by status.
    pub fn list(&self, filter: Option<TaskStatus>) -> Vec<TaskSummary> {
        let mut records: Vec<&TaskRecord> = self
            .tasks
            .values()
            .filter(|r| filter.is_none_or(|status| r.status == status))
            .collect();
        records.sort_by(|a, b| b.seq.cmp(&a.seq));
        records.into_iter().map(TaskSummary::from).collect()
    }

    /// Terminal records, oldest first.
    pub fn history(&self) -> Vec<TaskSummary> {
        self.history
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .map(TaskSummary::from)
            .collect()
    }

    /// Drop every terminal record. Returns how many were removed.
    pub fn purge_history(&mut self) -> usize {
        let purged = self.history.len();
        for id in self.history.drain(..) {
            self.tasks.remove(&id);
        }
        purged
    }

    pub fn statistics(&self, worker_count: usize) -> Statistics {
        Statistics {
            submitted: self.counters.submitted,
            completed: self.counters.completed,
            failed: self.counters.failed,
            cancelled: self.counters.cancelled,
            pending: self.queue.len(),
            running: self.running,
            avg_execution_time: self.counters.avg_execution_time,
            worker_count,
            active: self.accepting,
        }
    }

    /// Record that `id` reached a terminal state, evicting the oldest
    /// terminal records beyond the history limit.
    fn settle(&mut self, id: TaskId) {
        self.history.push_back(id);
        let Some(limit) = self.history_limit else {
            return;
        };
        while self.history.len() > limit {
            if let Some(evicted) = self.history.pop_front() {
                self.tasks.remove(&evicted);
            }
        }
    }
}

fn entry_of(record: &TaskRecord) -> QueueEntry {
    QueueEntry {
        task_id: record.id,
        priority: record.priority,
        seq: record.seq,
        scheduled_at: record.scheduled_at,
    }
}
