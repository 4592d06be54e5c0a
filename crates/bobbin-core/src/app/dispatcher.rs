//! Dispatcher - 優先度キューから worker への受け渡し
//!
//! tick ごと、または `wake` で起こされるたびに:
//! 1. 空きスロット数（pool_size - running）だけ実行可能なタスクを取り出す
//! 2. 依存が満たせないタスクを Failed にする
//! 3. 取り出したタスクを Running にして受付チャネルへ送る
//!
//! Pending -> Running を書くのはこのループだけです。

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::app::shared::Shared;
use crate::app::status::TaskSummary;
use crate::app::worker_loop::{Admission, report_failed};
use crate::domain::TaskError;

/// Runs until shutdown is signalled. Dropping `admit` on return closes the
/// channel, which stops the workers once they drain it.
pub(crate) async fn run(
    shared: Arc<Shared>,
    admit: mpsc::Sender<Admission>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(shared.config.tick());
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(tick_ms = shared.config.tick_ms, "dispatcher started");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = tick.tick() => {}
            _ = shared.wake.notified() => {}
        }

        let (admissions, failed) = dispatch_once(&shared).await;
        report_failed(&shared, &failed);

        for admission in admissions {
            trace!(task_id = %admission.task.id, "admitting");
            if let Err(mpsc::error::SendError(admission)) = admit.send(admission).await {
                abandon(&shared, admission).await;
            }
        }
    }
    debug!("dispatcher stopped");
}

/// One pass over the queue, under the lock.
async fn dispatch_once(shared: &Shared) -> (Vec<Admission>, Vec<TaskSummary>) {
    let mut table = shared.table.lock().await;
    let capacity = shared.config.pool_size.saturating_sub(table.running);
    let batch = table.claim(Instant::now(), capacity);
    let now = shared.now();

    let mut failed = Vec::new();
    for (entry, error) in batch.broken {
        failed.extend(table.fail(entry.task_id, error, now));
    }

    let admissions = batch
        .admitted
        .into_iter()
        .filter_map(|entry| table.start(entry.task_id, now).map(Admission::for_record))
        .collect();
    (admissions, failed)
}

/// The workers are gone; a claimed task can no longer run.
async fn abandon(shared: &Shared, admission: Admission) {
    let failed = {
        let mut table = shared.table.lock().await;
        table.fail_running(admission.task.id, TaskError::Aborted, shared.now())
    };
    report_failed(shared, &failed);
}
