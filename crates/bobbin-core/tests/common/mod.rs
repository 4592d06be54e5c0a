#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bobbin_core::{
    Scheduler, SchedulerBuilder, TaskId, TaskStatus, Work, WorkError, work_fn,
};
use serde_json::json;
use tokio::sync::Notify;

pub const WAIT: Duration = Duration::from_secs(5);

/// Fast tick and retry delay so tests do not sleep for long.
pub fn fast() -> SchedulerBuilder {
    Scheduler::builder()
        .tick(Duration::from_millis(5))
        .default_retry_delay(Duration::from_millis(5))
}

pub fn ok(value: serde_json::Value) -> Arc<dyn Work> {
    work_fn(move |_| {
        let value = value.clone();
        async move { Ok(value) }
    })
}

/// Work that pushes `name` to `log` when it runs.
pub fn logged(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<dyn Work> {
    let log = Arc::clone(log);
    work_fn(move |_| {
        log.lock().unwrap().push(name);
        async move { Ok(json!(name)) }
    })
}

/// Work that fails every attempt and counts them.
pub fn always_failing(attempts: &Arc<AtomicU32>) -> Arc<dyn Work> {
    let attempts = Arc::clone(attempts);
    work_fn(move |_| {
        attempts.fetch_add(1, Ordering::SeqCst);
        async { Err(WorkError::new("always fails")) }
    })
}

/// Work that parks until `gate.notify_one()`.
pub fn gated(gate: &Arc<Notify>) -> Arc<dyn Work> {
    let gate = Arc::clone(gate);
    work_fn(move |_| {
        let gate = Arc::clone(&gate);
        async move {
            gate.notified().await;
            Ok(json!("released"))
        }
    })
}

/// Poll until `check` holds, or panic after `WAIT`.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn until_status(scheduler: &Scheduler, id: TaskId, status: TaskStatus) {
    eventually(&format!("{id} to be {status:?}"), || async {
        scheduler.status(id).await.ok() == Some(status)
    })
    .await;
}
