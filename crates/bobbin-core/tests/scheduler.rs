mod common;

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bobbin_core::{
    EventKind, Priority, SchedulerError, TaskError, TaskId, TaskOptions, TaskStatus, WorkError,
    work_fn,
};
use common::{WAIT, always_failing, eventually, fast, gated, logged, ok, until_status};
use serde_json::json;
use tokio::sync::Notify;

#[tokio::test]
async fn runs_a_task_and_stores_its_result() {
    let scheduler = fast().pool_size(2).build().unwrap();

    let id = scheduler
        .schedule(ok(json!({ "rows": 3 })), TaskOptions::new("count"))
        .await
        .unwrap();

    assert!(scheduler.wait(id, WAIT).await.unwrap());
    assert_eq!(scheduler.status(id).await.unwrap(), TaskStatus::Completed);
    assert_eq!(scheduler.result(id).await.unwrap(), json!({ "rows": 3 }));
    assert_eq!(scheduler.error(id).await.unwrap(), None);

    let summary = scheduler.get(id).await.unwrap();
    assert!(summary.started_at.is_some());
    assert!(summary.completed_at >= summary.started_at);
    assert!(summary.execution_time.is_some());

    assert!(scheduler.shutdown(WAIT).await);
}

#[tokio::test]
async fn higher_priority_first_then_creation_order() {
    let scheduler = fast().pool_size(1).build().unwrap();
    let gate = Arc::new(Notify::new());
    let log = Arc::new(Mutex::new(Vec::new()));

    // occupy the only worker so everything below queues up
    let blocker = scheduler
        .schedule(gated(&gate), TaskOptions::new("blocker"))
        .await
        .unwrap();
    until_status(&scheduler, blocker, TaskStatus::Running).await;

    let mut ids = Vec::new();
    for (name, priority) in [
        ("low", Priority::Low),
        ("normal-1", Priority::Normal),
        ("urgent", Priority::Urgent),
        ("normal-2", Priority::Normal),
        ("high", Priority::High),
    ] {
        let opts = TaskOptions::new(name).priority(priority);
        ids.push(scheduler.schedule(logged(name, &log), opts).await.unwrap());
    }

    gate.notify_one();
    for id in ids {
        assert!(scheduler.wait(id, WAIT).await.unwrap());
    }

    assert_eq!(
        *log.lock().unwrap(),
        vec!["urgent", "high", "normal-1", "normal-2", "low"]
    );
    scheduler.shutdown(WAIT).await;
}

#[tokio::test]
async fn always_failing_task_uses_exactly_its_retry_budget() {
    let scheduler = fast().pool_size(2).build().unwrap();
    let attempts = Arc::new(AtomicU32::new(0));
    let retrying = Arc::new(AtomicU32::new(0));
    let failed = Arc::new(AtomicU32::new(0));
    {
        let retrying = Arc::clone(&retrying);
        scheduler.events().on_task_retrying(move |task| {
            assert_eq!(task.status, TaskStatus::Retrying);
            retrying.fetch_add(1, Ordering::SeqCst);
        });
        let failed = Arc::clone(&failed);
        scheduler.events().on_task_failed(move |_| {
            failed.fetch_add(1, Ordering::SeqCst);
        });
    }

    let id = scheduler
        .schedule(always_failing(&attempts), TaskOptions::new("doomed").max_retries(2))
        .await
        .unwrap();

    assert!(!scheduler.wait(id, WAIT).await.unwrap());
    assert_eq!(scheduler.status(id).await.unwrap(), TaskStatus::Failed);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(retrying.load(Ordering::SeqCst), 2);
    assert_eq!(failed.load(Ordering::SeqCst), 1);

    let summary = scheduler.get(id).await.unwrap();
    assert_eq!(summary.retry_count, 2);
    assert_eq!(summary.error, Some(TaskError::Work("always fails".into())));
    assert!(matches!(
        scheduler.result(id).await,
        Err(SchedulerError::NotReady { status: TaskStatus::Failed, .. })
    ));

    // no further attempts after the terminal state
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    scheduler.shutdown(WAIT).await;
}

#[tokio::test]
async fn flaky_task_recovers_on_retry() {
    let scheduler = fast().pool_size(1).build().unwrap();
    let remaining_failures = Arc::new(AtomicU32::new(2));

    let work = {
        let remaining = Arc::clone(&remaining_failures);
        work_fn(move |ctx| {
            let fail = remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            async move {
                if fail {
                    Err(WorkError::new(format!("attempt {} failed", ctx.attempt)))
                } else {
                    Ok(json!({ "attempt": ctx.attempt }))
                }
            }
        })
    };

    let id = scheduler
        .schedule(work, TaskOptions::new("flaky").max_retries(3))
        .await
        .unwrap();

    assert!(scheduler.wait(id, WAIT).await.unwrap());
    assert_eq!(scheduler.result(id).await.unwrap(), json!({ "attempt": 3 }));
    let summary = scheduler.get(id).await.unwrap();
    assert_eq!(summary.retry_count, 2);
    assert_eq!(summary.last_error, Some(TaskError::Work("attempt 2 failed".into())));
    assert_eq!(summary.error, None);
    scheduler.shutdown(WAIT).await;
}

#[tokio::test]
async fn dependent_runs_only_after_its_dependency_completes() {
    let scheduler = fast().pool_size(4).build().unwrap();
    let gate = Arc::new(Notify::new());
    let log = Arc::new(Mutex::new(Vec::new()));

    let a = scheduler
        .schedule(gated(&gate), TaskOptions::new("a"))
        .await
        .unwrap();
    let b = scheduler
        .schedule(
            logged("b", &log),
            TaskOptions::new("b").priority(Priority::Urgent).depends_on(a),
        )
        .await
        .unwrap();

    until_status(&scheduler, a, TaskStatus::Running).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(scheduler.status(b).await.unwrap(), TaskStatus::Pending);
    assert!(log.lock().unwrap().is_empty());

    gate.notify_one();
    assert!(scheduler.wait(b, WAIT).await.unwrap());

    let a_done = scheduler.get(a).await.unwrap().completed_at.unwrap();
    let b_started = scheduler.get(b).await.unwrap().started_at.unwrap();
    assert!(b_started >= a_done);
    scheduler.shutdown(WAIT).await;
}

#[tokio::test]
async fn failure_propagates_to_dependents_transitively() {
    let scheduler = fast().pool_size(2).build().unwrap();
    let attempts = Arc::new(AtomicU32::new(0));
    let log = Arc::new(Mutex::new(Vec::new()));

    let a = scheduler
        .schedule(always_failing(&attempts), TaskOptions::new("a").max_retries(0))
        .await
        .unwrap();
    let b = scheduler
        .schedule(logged("b", &log), TaskOptions::new("b").depends_on(a))
        .await
        .unwrap();
    let c = scheduler
        .schedule(logged("c", &log), TaskOptions::new("c").depends_on(b))
        .await
        .unwrap();

    assert!(!scheduler.wait(c, WAIT).await.unwrap());
    assert_eq!(scheduler.error(b).await.unwrap(), Some(TaskError::DependencyFailed(a)));
    assert_eq!(scheduler.error(c).await.unwrap(), Some(TaskError::DependencyFailed(b)));
    assert!(log.lock().unwrap().is_empty());
    assert_eq!(scheduler.statistics().await.failed, 3);
    scheduler.shutdown(WAIT).await;
}

#[tokio::test]
async fn unknown_dependency_fails_without_retrying() {
    let scheduler = fast().pool_size(1).build().unwrap();
    let ghost: TaskId = "01ARZ3NDEKTSV4RRFFQ69G5FAV".parse().unwrap();
    let attempts = Arc::new(AtomicU32::new(0));

    let id = scheduler
        .schedule(
            always_failing(&attempts),
            TaskOptions::new("orphan").max_retries(5).depends_on(ghost),
        )
        .await
        .unwrap();

    assert!(!scheduler.wait(id, WAIT).await.unwrap());
    assert_eq!(
        scheduler.error(id).await.unwrap(),
        Some(TaskError::DependencyMissing(ghost))
    );
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.get(id).await.unwrap().retry_count, 0);
    scheduler.shutdown(WAIT).await;
}

#[tokio::test]
async fn duplicate_dependencies_are_rejected() {
    let scheduler = fast().pool_size(1).build().unwrap();
    let a = scheduler.schedule(ok(json!(1)), TaskOptions::new("a")).await.unwrap();

    let err = scheduler
        .schedule(ok(json!(2)), TaskOptions::new("b").dependencies([a, a]))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::MalformedDependencies(_)));
    assert_eq!(scheduler.statistics().await.submitted, 1);
    scheduler.shutdown(WAIT).await;
}

#[tokio::test]
async fn cancel_applies_to_pending_tasks_only() {
    let scheduler = fast().pool_size(1).build().unwrap();
    let gate = Arc::new(Notify::new());
    let log = Arc::new(Mutex::new(Vec::new()));

    let running = scheduler
        .schedule(gated(&gate), TaskOptions::new("running"))
        .await
        .unwrap();
    until_status(&scheduler, running, TaskStatus::Running).await;
    let queued = scheduler
        .schedule(logged("queued", &log), TaskOptions::new("queued"))
        .await
        .unwrap();

    assert!(scheduler.cancel(queued).await.unwrap());
    assert_eq!(scheduler.status(queued).await.unwrap(), TaskStatus::Cancelled);
    assert!(!scheduler.cancel(queued).await.unwrap());

    // a running task cannot be preempted
    assert!(!scheduler.cancel(running).await.unwrap());
    gate.notify_one();
    assert!(scheduler.wait(running, WAIT).await.unwrap());
    assert!(!scheduler.cancel(running).await.unwrap());

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(log.lock().unwrap().is_empty());
    assert!(!scheduler.wait(queued, WAIT).await.unwrap());
    assert_eq!(scheduler.statistics().await.cancelled, 1);
    scheduler.shutdown(WAIT).await;
}

#[tokio::test]
async fn unknown_ids_are_reported_as_not_found() {
    let scheduler = fast().pool_size(1).build().unwrap();
    let ghost: TaskId = "task-01ARZ3NDEKTSV4RRFFQ69G5FAV".parse().unwrap();

    assert!(matches!(scheduler.status(ghost).await, Err(SchedulerError::NotFound(id)) if id == ghost));
    assert!(matches!(scheduler.result(ghost).await, Err(SchedulerError::NotFound(_))));
    assert!(matches!(scheduler.cancel(ghost).await, Err(SchedulerError::NotFound(_))));
    assert!(matches!(scheduler.wait(ghost, WAIT).await, Err(SchedulerError::NotFound(_))));
    scheduler.shutdown(WAIT).await;
}

#[tokio::test]
async fn timeout_is_a_retryable_failure() {
    let scheduler = fast().pool_size(1).build().unwrap();
    let attempts = Arc::new(AtomicU32::new(0));
    let work = {
        let attempts = Arc::clone(&attempts);
        work_fn(move |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(json!(null))
            }
        })
    };
    let limit = Duration::from_millis(30);

    let id = scheduler
        .schedule(work, TaskOptions::new("slow").timeout(limit).max_retries(1))
        .await
        .unwrap();

    assert!(!scheduler.wait(id, WAIT).await.unwrap());
    assert_eq!(scheduler.error(id).await.unwrap(), Some(TaskError::Timeout(limit)));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    scheduler.shutdown(WAIT).await;
}

#[tokio::test]
async fn panicking_work_fails_the_task_not_the_scheduler() {
    let scheduler = fast().pool_size(1).build().unwrap();
    let bad = work_fn(|_| async {
        if true {
            panic!("bad input");
        }
        Ok(json!(null))
    });

    let id = scheduler
        .schedule(bad, TaskOptions::new("panics").max_retries(0))
        .await
        .unwrap();
    assert!(!scheduler.wait(id, WAIT).await.unwrap());
    match scheduler.error(id).await.unwrap() {
        Some(TaskError::Work(msg)) => assert!(msg.contains("bad input"), "{msg}"),
        other => panic!("unexpected error: {other:?}"),
    }

    // the single worker is still alive
    let next = scheduler.schedule(ok(json!("fine")), TaskOptions::new("next")).await.unwrap();
    assert!(scheduler.wait(next, WAIT).await.unwrap());
    scheduler.shutdown(WAIT).await;
}

#[tokio::test]
async fn delayed_task_waits_for_its_start_time() {
    let scheduler = fast().pool_size(1).build().unwrap();
    let scheduled_at = tokio::time::Instant::now();
    let ran_at = Arc::new(Mutex::new(None));
    let work = {
        let ran_at = Arc::clone(&ran_at);
        work_fn(move |_| {
            *ran_at.lock().unwrap() = Some(tokio::time::Instant::now());
            async { Ok(json!(null)) }
        })
    };

    let id = scheduler
        .schedule(work, TaskOptions::new("later").delay(Duration::from_millis(150)))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(scheduler.status(id).await.unwrap(), TaskStatus::Pending);

    assert!(scheduler.wait(id, WAIT).await.unwrap());
    let ran_at = ran_at.lock().unwrap().expect("work ran");
    assert!(ran_at - scheduled_at >= Duration::from_millis(150));
    scheduler.shutdown(WAIT).await;
}

#[tokio::test]
async fn past_start_time_runs_immediately() {
    let scheduler = fast().pool_size(1).build().unwrap();
    let at = chrono::Utc::now() - chrono::Duration::seconds(60);
    let id = scheduler.schedule(ok(json!(1)), TaskOptions::new("overdue").at(at)).await.unwrap();
    assert!(scheduler.wait(id, WAIT).await.unwrap());
    scheduler.shutdown(WAIT).await;
}

#[tokio::test]
async fn never_runs_more_tasks_than_the_pool_size() {
    let scheduler = fast().pool_size(2).build().unwrap();
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let work = {
        let (current, peak) = (Arc::clone(&current), Arc::clone(&peak));
        work_fn(move |_| {
            let (current, peak) = (Arc::clone(&current), Arc::clone(&peak));
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(json!(null))
            }
        })
    };

    let mut ids = Vec::new();
    for i in 0..6 {
        let opts = TaskOptions::new(format!("job-{i}"));
        ids.push(scheduler.schedule(Arc::clone(&work), opts).await.unwrap());
    }
    for id in ids {
        assert!(scheduler.wait(id, WAIT).await.unwrap());
    }

    assert_eq!(peak.load(Ordering::SeqCst), 2);
    let stats = scheduler.statistics().await;
    assert_eq!(stats.submitted, 6);
    assert_eq!(stats.completed, 6);
    assert_eq!((stats.pending, stats.running), (0, 0));
    assert_eq!(stats.worker_count, 2);
    assert!(stats.avg_execution_time >= Duration::from_millis(20));
    scheduler.shutdown(WAIT).await;
}

#[tokio::test]
async fn each_task_starts_once_and_observers_see_every_transition() {
    let scheduler = fast().pool_size(3).build().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    for kind in [EventKind::TaskStarted, EventKind::TaskCompleted] {
        let seen = Arc::clone(&seen);
        scheduler.events().subscribe(kind, move |task| {
            seen.lock().unwrap().push((kind, task.id, task.status));
        });
    }
    // a broken observer must not affect the others or the task
    scheduler.events().on_task_completed(|_| panic!("observer bug"));

    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(scheduler.schedule(ok(json!(i)), TaskOptions::new(format!("t{i}"))).await.unwrap());
    }
    for &id in &ids {
        assert!(scheduler.wait(id, WAIT).await.unwrap());
    }
    eventually("all completion events", || async { seen.lock().unwrap().len() == 10 }).await;

    let seen = seen.lock().unwrap();
    for id in ids {
        let started: Vec<_> = seen.iter().filter(|e| e.0 == EventKind::TaskStarted && e.1 == id).collect();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].2, TaskStatus::Running);
        assert!(seen.contains(&(EventKind::TaskCompleted, id, TaskStatus::Completed)));
    }
    drop(seen);
    scheduler.shutdown(WAIT).await;
}

#[tokio::test]
async fn wait_gives_up_after_its_timeout() {
    let scheduler = fast().pool_size(1).build().unwrap();
    let gate = Arc::new(Notify::new());
    let id = scheduler.schedule(gated(&gate), TaskOptions::new("parked")).await.unwrap();

    assert!(!scheduler.wait(id, Duration::from_millis(30)).await.unwrap());
    gate.notify_one();
    assert!(scheduler.wait(id, WAIT).await.unwrap());
    scheduler.shutdown(WAIT).await;
}

#[tokio::test]
async fn list_is_newest_first() {
    let scheduler = fast().pool_size(1).build().unwrap();
    let gate = Arc::new(Notify::new());
    let first = scheduler.schedule(gated(&gate), TaskOptions::new("first")).await.unwrap();
    let second = scheduler.schedule(ok(json!(2)), TaskOptions::new("second")).await.unwrap();
    let third = scheduler.schedule(ok(json!(3)), TaskOptions::new("third")).await.unwrap();

    let ids: Vec<TaskId> = scheduler.list(None).await.into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![third, second, first]);

    gate.notify_one();
    assert!(scheduler.wait(third, WAIT).await.unwrap());
    let done = scheduler.list(Some(TaskStatus::Completed)).await;
    assert_eq!(done.len(), 3);
    assert!(scheduler.list(Some(TaskStatus::Pending)).await.is_empty());
    scheduler.shutdown(WAIT).await;
}
