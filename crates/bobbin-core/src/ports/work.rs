//! Work port - 呼び出し側が渡す「仕事」の抽象化
//!
//! スケジューラは仕事の中身を知りません。`Work` trait object として保持し、
//! worker が `execute()` を呼ぶだけです。
//!
//! # 二層構造
//! - **表層**: クロージャ（`work_fn`, `blocking_fn`）
//! - **内部**: `Arc<dyn Work>`（object-safe, type erasure）

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{Metadata, SeriesId, TaskId, WorkError};

/// What a unit of work sees about the task running it.
#[derive(Debug, Clone)]
pub struct WorkContext {
    pub task_id: TaskId,
    pub name: String,
    /// 1 for the first run, 2 for the first retry, ...
    pub attempt: u32,
    pub metadata: Metadata,
    /// Set for runs of a periodic schedule.
    pub series: Option<SeriesId>,
}

/// Work は 1 回分の実行を表す
///
/// # 使用例
/// ```ignore
/// struct Reindex;
///
/// #[async_trait]
/// impl Work for Reindex {
///     async fn execute(&self, ctx: WorkContext) -> Result<serde_json::Value, WorkError> {
///         Ok(serde_json::json!({ "attempt": ctx.attempt }))
///     }
/// }
/// ```
///
/// 同じ Work は retry のたびに再実行されるため `&self` を取ります。
#[async_trait]
pub trait Work: Send + Sync {
    async fn execute(&self, ctx: WorkContext) -> Result<serde_json::Value, WorkError>;
}

/// Adapter turning an async closure into a [`Work`].
pub struct WorkFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Work for WorkFn<F>
where
    F: Fn(WorkContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, WorkError>> + Send + 'static,
{
    async fn execute(&self, ctx: WorkContext) -> Result<serde_json::Value, WorkError> {
        (self.f)(ctx).await
    }
}

/// Wrap an async closure.
///
/// ```ignore
/// let work = work_fn(|ctx| async move { Ok(serde_json::json!(ctx.name)) });
/// ```
pub fn work_fn<F, Fut>(f: F) -> Arc<dyn Work>
where
    F: Fn(WorkContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, WorkError>> + Send + 'static,
{
    Arc::new(WorkFn { f })
}

/// Adapter running a synchronous closure on tokio's blocking pool.
///
/// Use this for CPU-bound or blocking code so it does not stall the
/// runtime threads that drive the dispatcher.
pub struct BlockingFn<F> {
    f: Arc<F>,
}

#[async_trait]
impl<F> Work for BlockingFn<F>
where
    F: Fn(WorkContext) -> Result<serde_json::Value, WorkError> + Send + Sync + 'static,
{
    async fn execute(&self, ctx: WorkContext) -> Result<serde_json::Value, WorkError> {
        let f = Arc::clone(&self.f);
        tokio::task::spawn_blocking(move || f(ctx))
            .await
            .map_err(|e| WorkError::new(format!("blocking work did not finish: {e}")))?
    }
}

pub fn blocking_fn<F>(f: F) -> Arc<dyn Work>
where
    F: Fn(WorkContext) -> Result<serde_json::Value, WorkError> + Send + Sync + 'static,
{
    Arc::new(BlockingFn { f: Arc::new(f) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use ulid::Ulid;

    fn ctx(attempt: u32) -> WorkContext {
        WorkContext {
            task_id: TaskId::from_ulid(Ulid::new()),
            name: "probe".to_string(),
            attempt,
            metadata: Metadata::new(),
            series: None,
        }
    }

    #[tokio::test]
    async fn work_fn_forwards_context() {
        let work = work_fn(|ctx| async move { Ok(json!({ "attempt": ctx.attempt })) });
        let value = work.execute(ctx(2)).await.unwrap();
        assert_eq!(value, json!({ "attempt": 2 }));
    }

    #[tokio::test]
    async fn blocking_fn_runs_off_runtime() {
        let work = blocking_fn(|ctx| {
            std::thread::sleep(std::time::Duration::from_millis(5));
            Ok(json!(ctx.name))
        });
        assert_eq!(work.execute(ctx(1)).await.unwrap(), json!("probe"));
    }

    #[tokio::test]
    async fn blocking_fn_reports_panics_as_errors() {
        let work = blocking_fn(|_ctx| panic!("kaboom"));
        let err = work.execute(ctx(1)).await.unwrap_err();
        assert!(err.message().contains("did not finish"));
    }

    #[tokio::test]
    async fn errors_pass_through() {
        let work = work_fn(|_ctx| async { Err(WorkError::new("nope")) });
        assert_eq!(work.execute(ctx(1)).await.unwrap_err().message(), "nope");
    }
}
