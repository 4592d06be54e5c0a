//! Shared - dispatcher / worker / 呼び出し側が共有する状態
//!
//! ロックは `table` の 1 つだけ。イベント通知は必ずロックを外してから行う。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::app::config::SchedulerConfig;
use crate::app::events::EventBus;
use crate::app::status::TaskSummary;
use crate::app::table::TaskTable;
use crate::domain::{EventKind, Start, TaskOptions, TaskStatus};
use crate::ports::{Clock, IdGenerator, Work};
use crate::queue::{PeriodicRun, TaskRecord, due_after};

pub(crate) struct Shared {
    pub table: Mutex<TaskTable>,
    pub events: EventBus,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub config: SchedulerConfig,
    /// Wakes the dispatcher before its next tick.
    pub wake: Notify,
    /// Signalled whenever a task reaches a terminal state.
    pub settled: Notify,
}

impl Shared {
    pub fn new(
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        events: EventBus,
    ) -> Self {
        Self {
            table: Mutex::new(TaskTable::new(config.history_limit)),
            events,
            clock,
            ids,
            config,
            wake: Notify::new(),
            settled: Notify::new(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn emit(&self, kind: EventKind, task: &TaskSummary) {
        self.events.emit(kind, task);
    }

    pub fn emit_all(&self, kind: EventKind, tasks: &[TaskSummary]) {
        for task in tasks {
            self.events.emit(kind, task);
        }
    }

    /// Build a Pending record, resolving defaults from the configuration.
    pub fn new_record(
        &self,
        table: &mut TaskTable,
        work: Arc<dyn Work>,
        options: TaskOptions,
        periodic: Option<PeriodicRun>,
    ) -> TaskRecord {
        let created_at = self.now();
        let scheduled_at = match options.start {
            Start::Now => Instant::now(),
            Start::After(delay) => due_after(Instant::now(), delay),
            // a time in the past is due immediately
            Start::At(at) => {
                due_after(Instant::now(), (at - created_at).to_std().unwrap_or_default())
            }
        };

        TaskRecord {
            id: self.ids.generate_task_id(),
            seq: table.next_seq(),
            name: options.name,
            work,
            priority: options.priority,
            status: TaskStatus::Pending,
            scheduled_at,
            max_retries: options.max_retries.unwrap_or(self.config.default_max_retries),
            retry_count: 0,
            retry_delay: options
                .retry_delay
                .unwrap_or_else(|| self.config.default_retry_delay()),
            timeout: options.timeout.or_else(|| self.config.default_timeout()),
            dependencies: options.dependencies,
            metadata: options.metadata,
            periodic,
            created_at,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            last_error: None,
            execution_time: None,
        }
    }
}
