//! WorkerLoop - タスク実行ループ
//!
//! # フロー
//! 1. 受付チャネルから Admission を受け取る
//! 2. `task_started` を通知
//! 3. Work を別タスクで実行（panic / timeout を捕捉）
//! 4. 結果に応じて Completed / Retrying / Failed へ遷移
//! 5. ロックを外してからイベントを通知し、dispatcher を起こす
//!
//! Running からの遷移を書くのはこのループだけです。

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::app::shared::Shared;
use crate::app::status::TaskSummary;
use crate::app::table::TaskTable;
use crate::domain::{EventKind, TaskError, TaskId};
use crate::ports::{Work, WorkContext};
use crate::queue::{TaskRecord, due_after};

/// A claimed task on its way to a worker.
pub(crate) struct Admission {
    /// Snapshot taken at admission, handed to `task_started` observers.
    pub task: TaskSummary,
    pub work: Arc<dyn Work>,
    pub ctx: WorkContext,
    pub timeout: Option<Duration>,
}

impl Admission {
    pub fn for_record(record: &TaskRecord) -> Self {
        Self {
            task: TaskSummary::from(record),
            work: Arc::clone(&record.work),
            ctx: record.context(),
            timeout: record.timeout,
        }
    }
}

pub(crate) type AdmissionReceiver = Arc<Mutex<mpsc::Receiver<Admission>>>;

/// Runs until the admission channel is closed and drained.
pub(crate) async fn run(worker_id: usize, shared: Arc<Shared>, admissions: AdmissionReceiver) {
    debug!(worker_id, "worker started");
    loop {
        // one worker waits on the channel, the others wait on the lock
        let next = admissions.lock().await.recv().await;
        let Some(admission) = next else {
            break;
        };
        process(&shared, admission).await;
    }
    debug!(worker_id, "worker stopped");
}

async fn process(shared: &Shared, admission: Admission) {
    let Admission {
        task,
        work,
        ctx,
        timeout,
    } = admission;
    let id = task.id;

    debug!(task_id = %id, name = %task.name, attempt = ctx.attempt, "task started");
    shared.emit(EventKind::TaskStarted, &task);

    let started = Instant::now();
    let outcome = execute(work, ctx, timeout).await;
    let took = started.elapsed();

    match outcome {
        Ok(value) => on_success(shared, id, value, took).await,
        Err(error) => on_failure(shared, id, error).await,
    }
    // a slot is free again
    shared.wake.notify_one();
}

/// Run the work on its own tokio task so a panic cannot take the worker down.
async fn execute(
    work: Arc<dyn Work>,
    ctx: WorkContext,
    timeout: Option<Duration>,
) -> Result<serde_json::Value, TaskError> {
    let mut handle = AbortOnDrop(tokio::spawn(async move { work.execute(ctx).await }));

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut handle.0).await {
            Ok(joined) => joined,
            Err(_elapsed) => return Err(TaskError::Timeout(limit)),
        },
        None => (&mut handle.0).await,
    };

    match joined {
        Ok(result) => result.map_err(TaskError::from),
        Err(err) => Err(TaskError::Work(join_failure(err))),
    }
}

async fn on_success(shared: &Shared, id: TaskId, value: serde_json::Value, took: Duration) {
    let (done, unblocked, next) = {
        let mut table = shared.table.lock().await;
        let now = shared.now();
        let next = successor_of(shared, &mut table, id, now);
        let Some((done, unblocked)) = table.complete(id, value, now, took) else {
            return;
        };
        let next = next.map(|record| {
            let scheduled = (record.id, record.periodic.map(|p| p.execution));
            table.insert(record);
            scheduled
        });
        (done, unblocked, next)
    };

    info!(task_id = %id, name = %done.name, took_ms = millis(took), "task completed");
    if !unblocked.is_empty() {
        debug!(task_id = %id, released = unblocked.len(), "dependents released");
    }
    if let Some((next_id, execution)) = next {
        debug!(task_id = %next_id, series_run = ?execution, "next periodic run scheduled");
    }
    shared.emit(EventKind::TaskCompleted, &done);
    shared.settled.notify_waiters();
}

async fn on_failure(shared: &Shared, id: TaskId, error: TaskError) {
    let retrying = {
        let mut table = shared.table.lock().await;
        let delay = table
            .tasks
            .get(&id)
            .filter(|r| error.is_retryable() && r.has_retries_left())
            .map(|r| shared.config.retry.next_delay(r.retry_delay, r.attempt()));

        match delay {
            Some(delay) => table
                .begin_retry(id, error.clone(), due_after(Instant::now(), delay))
                .map(|task| (task, delay)),
            None => {
                let failed = table.fail_running(id, error, shared.now());
                drop(table);
                report_failed(shared, &failed);
                return;
            }
        }
    };
    let Some((task, delay)) = retrying else {
        return;
    };

    warn!(
        task_id = %id,
        name = %task.name,
        retry = task.retry_count,
        max_retries = task.max_retries,
        delay_ms = millis(delay),
        error = %error,
        "attempt failed; retrying"
    );
    shared.emit(EventKind::TaskRetrying, &task);

    let mut table = shared.table.lock().await;
    table.requeue(id);
    if !table.accepting {
        // shutdown began while the retry was announced
        let failed = table.cancel(id, shared.now()).unwrap_or_default();
        drop(table);
        report_failed(shared, &failed);
        shared.settled.notify_waiters();
    }
}

/// Emit `task_failed` for every task in `failed` and wake waiters.
pub(crate) fn report_failed(shared: &Shared, failed: &[TaskSummary]) {
    for task in failed {
        warn!(
            task_id = %task.id,
            name = %task.name,
            error = %task.error.as_ref().map(ToString::to_string).unwrap_or_default(),
            "task failed"
        );
    }
    shared.emit_all(EventKind::TaskFailed, failed);
    if !failed.is_empty() {
        shared.settled.notify_waiters();
    }
}

/// Next run of a periodic series, unless shutdown has begun.
fn successor_of(
    shared: &Shared,
    table: &mut TaskTable,
    id: TaskId,
    now: DateTime<Utc>,
) -> Option<TaskRecord> {
    if !table.accepting {
        return None;
    }
    let interval = table.tasks.get(&id)?.periodic?.options.interval;
    let seq = table.next_seq();
    let record = table.tasks.get(&id)?;
    let run_at = due_after(Instant::now(), interval);
    record.successor(shared.ids.generate_task_id(), seq, now, run_at)
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Aborts the spawned work when dropped, i.e. on timeout or when the worker
/// itself is aborted at shutdown.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn join_failure(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => format!("work panicked: {}", panic_message(payload.as_ref())),
        Err(err) => format!("work was cancelled: {err}"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
