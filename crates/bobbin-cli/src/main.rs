//! bobbin - scheduler demo
//!
//! 1. 環境変数から設定とログ設定を読む（BOBBIN_*）
//! 2. 失敗を 2 回挟んでから成功する greet タスクを投入
//! 3. greet に依存する report タスクと、3 回だけ動く periodic タスクを投入
//! 4. 完了を待って統計を JSON で出力
//! 5. 引数にパスがあれば履歴を書き出す
//!
//! ```text
//! BOBBIN_LOG_LEVEL=debug bobbin ./history.json
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bobbin_core::observability::{LogConfig, init_tracing};
use bobbin_core::{
    PeriodicOptions, Priority, Scheduler, SchedulerConfig, TaskOptions, Work, WorkContext,
    WorkError, work_fn,
};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct GreetPayload {
    name: String,
}

/// Fails `remaining_failures` times before greeting.
struct GreetWork {
    remaining_failures: AtomicU32,
}

impl GreetWork {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Work for GreetWork {
    async fn execute(&self, ctx: WorkContext) -> Result<serde_json::Value, WorkError> {
        let payload = ctx
            .metadata
            .get("payload")
            .cloned()
            .ok_or_else(|| WorkError::new("missing payload"))?;
        let p: GreetPayload =
            serde_json::from_value(payload).map_err(|e| WorkError::new(format!("json decode: {e}")))?;

        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(WorkError::new(format!("intentional failure (left={left})")));
        }

        println!("Hello, {}! (attempt {})", p.name, ctx.attempt);
        Ok(serde_json::json!({ "greeted": p.name }))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(&LogConfig::from_env()?)?;
    let history_path = std::env::args().nth(1);

    // (A) 設定: 既定値 + BOBBIN_* 環境変数
    let mut config = SchedulerConfig::from_env()?;
    config.default_retry_delay_ms = config.default_retry_delay_ms.min(200);
    let scheduler = Scheduler::builder().config(config).build()?;

    scheduler.events().on_task_retrying(|task| {
        let error = task.last_error.as_ref().map(ToString::to_string).unwrap_or_default();
        warn!(task = %task.name, retry = task.retry_count, %error, "retrying");
    });
    scheduler.events().on_task_completed(|task| {
        info!(task = %task.name, result = ?task.result, "completed");
    });

    // (B) タスク投入
    let greet = scheduler
        .schedule(
            Arc::new(GreetWork::new(2)),
            TaskOptions::new("greet")
                .priority(Priority::High)
                .max_retries(3)
                .meta("payload", serde_json::json!({ "name": "bobbin" })),
        )
        .await?;

    let report = scheduler
        .schedule(
            work_fn(|ctx| async move { Ok(serde_json::json!({ "report": ctx.name })) }),
            TaskOptions::new("report").depends_on(greet),
        )
        .await?;

    let heartbeat = scheduler
        .schedule_periodic(
            work_fn(|ctx| async move {
                println!("heartbeat {}", ctx.task_id);
                Ok(serde_json::Value::Null)
            }),
            TaskOptions::new("heartbeat").priority(Priority::Low),
            PeriodicOptions::every(Duration::from_millis(250)).times(3),
        )
        .await?;
    info!(%greet, %report, %heartbeat, "tasks scheduled");

    // (C) 完了待ち
    let wait = Duration::from_secs(10);
    let report_ok = scheduler.wait(report, wait).await?;
    info!(report_ok, result = ?scheduler.result(report).await.ok(), "report finished");

    // periodic の残りの実行を待つ
    let deadline = tokio::time::Instant::now() + wait;
    while scheduler.statistics().await.pending + scheduler.statistics().await.running > 0
        && tokio::time::Instant::now() < deadline
    {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // (D) 統計と履歴
    println!("{}", serde_json::to_string_pretty(&scheduler.statistics().await)?);
    if let Some(path) = history_path {
        let written = scheduler.save_history(&path).await?;
        println!("wrote {written} records to {path}");
    }

    let clean = scheduler.shutdown(Duration::from_secs(5)).await;
    info!(clean, "bye");
    Ok(())
}
