//! Dependency graph for gating tasks on their prerequisites.
//!
//! Design:
//! - Forward edges: task -> dependencies it still waits for
//! - Reverse edges: dependency -> tasks waiting for it
//! - Invariant: edges and reverse_edges must be kept in sync
//! - An edge exists only while the dependency has not completed. Completing
//!   a task releases its reverse edges, so "no forward edges" means "ready".

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use crate::domain::{TaskError, TaskId, TaskStatus};
use crate::queue::Gate;

#[derive(Debug, Default)]
pub struct DependencyGraph {
    edges: HashMap<TaskId, HashSet<TaskId>>,

    /// Enables O(1) lookup: "who is waiting for this task?"
    reverse_edges: HashMap<TaskId, HashSet<TaskId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// `task` waits for `depends_on`.
    ///
    /// Example: add_dependency(task_b, task_a) means "B waits for A"
    pub fn add_dependency(&mut self, task: TaskId, depends_on: TaskId) {
        self.edges.entry(task).or_default().insert(depends_on);
        self.reverse_edges
            .entry(depends_on)
            .or_default()
            .insert(task);
    }

    /// `task` no longer waits for `depends_on`.
    pub fn remove_dependency(&mut self, task: TaskId, depends_on: TaskId) {
        if let Entry::Occupied(mut e) = self.edges.entry(task) {
            e.get_mut().remove(&depends_on);
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
        if let Entry::Occupied(mut e) = self.reverse_edges.entry(depends_on) {
            e.get_mut().remove(&task);
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
    }

    /// Tasks waiting for `task`, in no particular order.
    pub fn get_waiting_tasks(&self, task: TaskId) -> Vec<TaskId> {
        self.reverse_edges
            .get(&task)
            .map(|waiting| waiting.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn has_dependencies(&self, task: TaskId) -> bool {
        self.edges
            .get(&task)
            .map(|deps| !deps.is_empty())
            .unwrap_or(false)
    }

    /// Dependencies `task` still waits for.
    pub fn get_dependencies(&self, task: TaskId) -> Vec<TaskId> {
        self.edges
            .get(&task)
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default()
    }

    /// `completed` finished successfully: drop every edge pointing at it.
    ///
    /// Returns the waiters that have no dependency left.
    pub fn release(&mut self, completed: TaskId) -> Vec<TaskId> {
        let waiting = self.get_waiting_tasks(completed);
        waiting
            .into_iter()
            .filter(|&task| {
                self.remove_dependency(task, completed);
                !self.has_dependencies(task)
            })
            .collect()
    }

    /// Drop `task`'s own forward edges (it left the queue without running).
    pub fn forget(&mut self, task: TaskId) {
        for dep in self.get_dependencies(task) {
            self.remove_dependency(task, dep);
        }
    }

    /// Gate for the priority queue.
    ///
    /// `status_of` looks a dependency up in the task table; `None` means the
    /// id is unknown (never scheduled, or purged before it completed).
    pub fn gate<F>(&self, task: TaskId, status_of: F) -> Gate
    where
        F: Fn(TaskId) -> Option<TaskStatus>,
    {
        let Some(deps) = self.edges.get(&task) else {
            return Gate::Open;
        };
        for &dep in deps {
            match status_of(dep) {
                None => return Gate::Broken(TaskError::DependencyMissing(dep)),
                Some(status) if status.blocks_dependents() => {
                    return Gate::Broken(TaskError::DependencyFailed(dep));
                }
                Some(_) => {}
            }
        }
        if deps.is_empty() {
            Gate::Open
        } else {
            Gate::Closed
        }
    }
}
