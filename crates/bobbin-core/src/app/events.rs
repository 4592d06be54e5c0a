//! EventBus - ライフサイクルイベントの通知
//!
//! - observer は種類ごとに登録順で呼ばれる
//! - 呼び出しはスケジューラのロックを保持していない状態で行う
//! - observer の panic は捕捉してログに残すだけ（スケジューラは止まらない）

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::app::status::TaskSummary;
use crate::domain::EventKind;

/// Callback invoked with a snapshot of the task the event is about.
pub type Observer = Arc<dyn Fn(&TaskSummary) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    observers: RwLock<HashMap<EventKind, Vec<Observer>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, observer: F)
    where
        F: Fn(&TaskSummary) + Send + Sync + 'static,
    {
        let mut observers = self
            .observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        observers.entry(kind).or_default().push(Arc::new(observer));
    }

    pub fn on_task_started<F>(&self, observer: F)
    where
        F: Fn(&TaskSummary) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::TaskStarted, observer);
    }

    pub fn on_task_completed<F>(&self, observer: F)
    where
        F: Fn(&TaskSummary) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::TaskCompleted, observer);
    }

    pub fn on_task_failed<F>(&self, observer: F)
    where
        F: Fn(&TaskSummary) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::TaskFailed, observer);
    }

    pub fn on_task_retrying<F>(&self, observer: F)
    where
        F: Fn(&TaskSummary) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::TaskRetrying, observer);
    }

    pub fn observer_count(&self, kind: EventKind) -> usize {
        self.observers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Invoke every observer of `kind`, in registration order.
    pub(crate) fn emit(&self, kind: EventKind, task: &TaskSummary) {
        // clone the list so an observer may subscribe without deadlocking
        let observers: Vec<Observer> = self
            .observers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(task))).is_err() {
                warn!(event = %kind, task_id = %task.id, "observer panicked; ignored");
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut d = f.debug_struct("EventBus");
        for kind in EventKind::ALL {
            d.field(kind.as_str(), &self.observer_count(kind));
        }
        d.finish()
    }
}
