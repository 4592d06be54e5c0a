//! Scheduler - 呼び出し側に公開する制御 API
//!
//! schedule / cancel / status / result / wait / list / statistics / shutdown
//!
//! `Scheduler` は `Arc` の薄いラッパーなので clone して共有できます。
//! 作成は `SchedulerBuilder::build()`（または `Scheduler::new`）だけ。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::app::builder::{BuildError, SchedulerBuilder};
use crate::app::events::EventBus;
use crate::app::shared::Shared;
use crate::app::status::{Statistics, TaskSummary};
use crate::app::worker_loop::report_failed;
use crate::domain::{PeriodicOptions, TaskError, TaskId, TaskOptions, TaskStatus};
use crate::error::SchedulerError;
use crate::ports::Work;
use crate::queue::{PeriodicRun, due_after};

/// Handles of the background loops, owned until shutdown.
pub(crate) struct Loops {
    pub shutdown: watch::Sender<bool>,
    pub dispatcher: JoinHandle<()>,
    pub workers: Vec<JoinHandle<()>>,
}

enum Lifecycle {
    Running(Loops),
    Stopped { clean: bool },
}

struct Inner {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // dropped without shutdown: let the loops wind down on their own
        if let Lifecycle::Running(loops) = self.lifecycle.get_mut() {
            let _ = loops.shutdown.send(true);
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// A scheduler with `pool_size` workers and default settings.
    pub fn new(pool_size: usize) -> Result<Self, BuildError> {
        SchedulerBuilder::new().pool_size(pool_size).build()
    }

    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    pub(crate) fn from_parts(shared: Arc<Shared>, loops: Loops) -> Self {
        Self {
            inner: Arc::new(Inner {
                shared,
                lifecycle: Mutex::new(Lifecycle::Running(loops)),
            }),
        }
    }

    fn shared(&self) -> &Shared {
        &self.inner.shared
    }

    /// Observer registration.
    pub fn events(&self) -> &EventBus {
        &self.shared().events
    }

    /// Queue `work`. Returns as soon as the task is recorded.
    #[instrument(skip_all, fields(name = %options.name, priority = %options.priority))]
    pub async fn schedule(
        &self,
        work: Arc<dyn Work>,
        options: TaskOptions,
    ) -> Result<TaskId, SchedulerError> {
        self.submit(work, options, None).await
    }

    /// Queue the first run of a periodic series.
    ///
    /// Each successful run schedules the next one `periodic.interval` after
    /// it finished. The first run always happens; `max_executions` bounds
    /// the total.
    #[instrument(skip_all, fields(name = %options.name, interval_ms = u64::try_from(periodic.interval.as_millis()).unwrap_or(u64::MAX)))]
    pub async fn schedule_periodic(
        &self,
        work: Arc<dyn Work>,
        options: TaskOptions,
        periodic: PeriodicOptions,
    ) -> Result<TaskId, SchedulerError> {
        if periodic.interval.is_zero() {
            return Err(SchedulerError::InvalidInterval);
        }
        let run = PeriodicRun {
            series: self.shared().ids.generate_series_id(),
            options: periodic,
            execution: 1,
        };
        self.submit(work, options, Some(run)).await
    }

    async fn submit(
        &self,
        work: Arc<dyn Work>,
        options: TaskOptions,
        periodic: Option<PeriodicRun>,
    ) -> Result<TaskId, SchedulerError> {
        if let Some(dup) = options.duplicate_dependency() {
            return Err(SchedulerError::MalformedDependencies(format!(
                "{dup} is listed more than once"
            )));
        }

        let shared = self.shared();
        let id = {
            let mut table = shared.table.lock().await;
            if !table.accepting {
                return Err(SchedulerError::ShuttingDown);
            }
            let record = shared.new_record(&mut table, work, options, periodic);
            let id = record.id;
            table.insert(record);
            id
        };
        debug!(task_id = %id, "task scheduled");
        shared.wake.notify_one();
        Ok(id)
    }

    /// Cancel a Pending task. Returns false for any other status.
    ///
    /// Tasks that depend on the cancelled one fail with `DependencyFailed`.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: TaskId) -> Result<bool, SchedulerError> {
        let shared = self.shared();
        let failed = {
            let mut table = shared.table.lock().await;
            let status = table.status_of(id).ok_or(SchedulerError::NotFound(id))?;
            if status != TaskStatus::Pending {
                return Ok(false);
            }
            table.cancel(id, shared.now())
        };
        let Some(failed) = failed else {
            return Ok(false);
        };
        info!(task_id = %id, "task cancelled");
        report_failed(shared, &failed);
        shared.settled.notify_waiters();
        shared.wake.notify_one();
        Ok(true)
    }

    pub async fn status(&self, id: TaskId) -> Result<TaskStatus, SchedulerError> {
        let table = self.shared().table.lock().await;
        table.status_of(id).ok_or(SchedulerError::NotFound(id))
    }

    /// The value returned by the work, once Completed.
    pub async fn result(&self, id: TaskId) -> Result<serde_json::Value, SchedulerError> {
        let table = self.shared().table.lock().await;
        let record = table.tasks.get(&id).ok_or(SchedulerError::NotFound(id))?;
        match (&record.status, &record.result) {
            (TaskStatus::Completed, Some(value)) => Ok(value.clone()),
            (status, _) => Err(SchedulerError::NotReady {
                id,
                status: *status,
            }),
        }
    }

    /// The error that failed the task, if it failed.
    pub async fn error(&self, id: TaskId) -> Result<Option<TaskError>, SchedulerError> {
        let table = self.shared().table.lock().await;
        let record = table.tasks.get(&id).ok_or(SchedulerError::NotFound(id))?;
        Ok(record.error.clone())
    }

    pub async fn get(&self, id: TaskId) -> Result<TaskSummary, SchedulerError> {
        let table = self.shared().table.lock().await;
        table
            .tasks
            .get(&id)
            .map(TaskSummary::from)
            .ok_or(SchedulerError::NotFound(id))
    }

    /// Suspend until the task is terminal or `timeout` elapses.
    ///
    /// Returns true only if the task Completed.
    pub async fn wait(&self, id: TaskId, timeout: Duration) -> Result<bool, SchedulerError> {
        let deadline = due_after(Instant::now(), timeout);
        loop {
            // register before checking so a settle in between is not missed
            let notified = self.shared().settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let status = self.status(id).await?;
            if status.is_terminal() {
                return Ok(status == TaskStatus::Completed);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(false);
            }
        }
    }

    /// Summaries, newest created first.
    pub async fn list(&self, filter: Option<TaskStatus>) -> Vec<TaskSummary> {
        self.shared().table.lock().await.list(filter)
    }

    pub async fn statistics(&self) -> Statistics {
        let shared = self.shared();
        shared
            .table
            .lock()
            .await
            .statistics(shared.config.pool_size)
    }

    /// Drop every terminal record. Returns how many were removed.
    pub async fn purge_history(&self) -> usize {
        let purged = self.shared().table.lock().await.purge_history();
        debug!(purged, "history purged");
        purged
    }

    /// Write terminal records, oldest first, to `path` as pretty JSON.
    ///
    /// Returns the number of records written.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub async fn save_history(&self, path: impl AsRef<Path>) -> Result<usize, SchedulerError> {
        let history = self.shared().table.lock().await.history();
        let count = history.len();
        let body = serde_json::to_vec_pretty(&history)?;
        let path = path.as_ref().to_path_buf();

        tokio::task::spawn_blocking(move || std::fs::write(path, body))
            .await
            .map_err(std::io::Error::other)??;
        info!(count, "history saved");
        Ok(count)
    }

    /// Stop accepting work, cancel what is queued, and wait up to `timeout`
    /// for in-flight tasks.
    ///
    /// Returns true when every loop finished on its own. Otherwise (timeout,
    /// or a loop that died) the remaining tasks are aborted and marked Failed. Later calls return the
    /// outcome of the first one.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let shared = self.shared();
        let mut lifecycle = self.inner.lifecycle.lock().await;
        let loops = match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped { clean: false }) {
            Lifecycle::Running(loops) => loops,
            Lifecycle::Stopped { clean } => {
                *lifecycle = Lifecycle::Stopped { clean };
                return clean;
            }
        };

        let cancelled = {
            let mut table = shared.table.lock().await;
            table.accepting = false;
            table.cancel_queued(shared.now())
        };
        info!(cancelled, "shutdown started");
        shared.settled.notify_waiters();

        let Loops {
            shutdown,
            dispatcher,
            mut workers,
        } = loops;
        let _ = shutdown.send(true);

        // handles are dropped once joined; a finished handle must not be polled again
        let mut dispatcher = Some(dispatcher);
        let mut crashed = 0usize;
        let deadline = due_after(Instant::now(), timeout);
        let joined = tokio::time::timeout_at(deadline, async {
            if let Some(handle) = dispatcher.as_mut() {
                if let Err(err) = handle.await {
                    warn!(error = %err, "dispatcher ended abnormally");
                    crashed += 1;
                }
                dispatcher = None;
            }
            while let Some(worker) = workers.last_mut() {
                if let Err(err) = worker.await {
                    warn!(error = %err, "worker ended abnormally");
                    crashed += 1;
                }
                workers.pop();
            }
        })
        .await;

        if joined.is_err() {
            if let Some(handle) = &dispatcher {
                handle.abort();
            }
            for worker in &workers {
                worker.abort();
            }
            for worker in workers {
                let _ = worker.await;
            }
        }

        let clean = joined.is_ok() && crashed == 0;
        if !clean {
            let aborted = {
                let mut table = shared.table.lock().await;
                table.abort_in_flight(shared.now())
            };
            warn!(
                aborted = aborted.len(),
                crashed,
                "shutdown was not clean; in-flight tasks aborted"
            );
            report_failed(shared, &aborted);
        }

        *lifecycle = Lifecycle::Stopped { clean };
        info!(clean, "scheduler stopped");
        clean
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("pool_size", &self.shared().config.pool_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Priority;
    use crate::ports::work_fn;
    use crate::queue::test_support::record;

    #[tokio::test]
    async fn a_dead_worker_makes_shutdown_unclean() {
        let scheduler = Scheduler::builder()
            .pool_size(1)
            .tick(Duration::from_millis(5))
            .build()
            .unwrap();

        // a task left Running by a worker that died mid-run
        let stranded = record("stranded", Priority::Normal, 0);
        let id = stranded.id;
        {
            let mut table = scheduler.shared().table.lock().await;
            table.insert(stranded);
            let batch = table.claim(Instant::now(), 1);
            assert_eq!(batch.admitted.len(), 1);
            table.start(id, chrono::Utc::now());
        }
        {
            let mut lifecycle = scheduler.inner.lifecycle.lock().await;
            let Lifecycle::Running(loops) = &mut *lifecycle else {
                panic!("scheduler should be running");
            };
            loops.workers.push(tokio::spawn(async { panic!("worker crashed") }));
        }

        assert!(!scheduler.shutdown(Duration::from_secs(5)).await);
        assert_eq!(scheduler.status(id).await.unwrap(), TaskStatus::Failed);
        assert_eq!(scheduler.error(id).await.unwrap(), Some(TaskError::Aborted));
        assert_eq!(scheduler.statistics().await.running, 0);
        // the outcome sticks
        assert!(!scheduler.shutdown(Duration::from_millis(1)).await);
    }

    #[tokio::test]
    async fn huge_wait_and_shutdown_timeouts_do_not_overflow() {
        let scheduler = Scheduler::new(1).unwrap();
        let id = scheduler
            .schedule(
                work_fn(|_| async { Ok(serde_json::json!(1)) }),
                TaskOptions::new("quick"),
            )
            .await
            .unwrap();
        assert!(scheduler.wait(id, Duration::MAX).await.unwrap());
        assert!(scheduler.shutdown(Duration::MAX).await);
    }
}
