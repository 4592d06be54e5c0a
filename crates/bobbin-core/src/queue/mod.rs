//! Queue module: task records, priority ordering, dependency gating, retry timing.

mod dependency;
mod priority;
mod record;
mod retry;

pub use dependency::DependencyGraph;
pub use priority::{Gate, due_after, PriorityQueue, QueueEntry, ReadyBatch};
pub use record::{PeriodicRun, TaskRecord};
pub use retry::RetryPolicy;

#[cfg(test)]
pub(crate) use record::test_support;
