//! bobbin-core
//!
//! In-process background task scheduler: priority ordering, dependencies,
//! retries, delayed and periodic runs on a bounded tokio worker pool.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, priority, status, options, errors, events）
//! - **ports**: 抽象化レイヤー（Work, Clock, IdGenerator）
//! - **queue**: TaskRecord, PriorityQueue, DependencyGraph, RetryPolicy
//! - **app**: スケジューラ本体（builder, scheduler, dispatcher, worker_loop, events, status）
//! - **observability**: tracing subscriber の初期化
//!
//! ```ignore
//! let scheduler = Scheduler::builder().pool_size(4).build()?;
//! let fetch = scheduler
//!     .schedule(work_fn(|_ctx| async { Ok(json!("payload")) }), TaskOptions::new("fetch"))
//!     .await?;
//! let parse = scheduler
//!     .schedule(parse_work, TaskOptions::new("parse").depends_on(fetch))
//!     .await?;
//! assert!(scheduler.wait(parse, Duration::from_secs(5)).await?);
//! scheduler.shutdown(Duration::from_secs(5)).await;
//! ```

pub mod app;
pub mod domain;
pub mod error;
pub mod observability;
pub mod ports;
pub mod queue;

pub use app::{
    BuildError, ConfigError, EventBus, Scheduler, SchedulerBuilder, SchedulerConfig, Statistics,
    TaskSummary,
};
pub use domain::{
    EventKind, PeriodicOptions, Priority, SeriesId, Start, TaskError, TaskId, TaskOptions,
    TaskStatus, WorkError,
};
pub use error::SchedulerError;
pub use ports::{Work, WorkContext, blocking_fn, work_fn};
pub use queue::RetryPolicy;
