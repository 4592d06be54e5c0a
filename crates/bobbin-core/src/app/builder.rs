//! SchedulerBuilder - スケジューラの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）: 不正な設定は build() がエラーにする
//! - dispatcher / worker の起動は build() の中だけで行う

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tracing::info;

use crate::app::config::SchedulerConfig;
use crate::app::events::EventBus;
use crate::app::scheduler::{Loops, Scheduler};
use crate::app::shared::Shared;
use crate::app::status::TaskSummary;
use crate::app::{dispatcher, worker_loop};
use crate::domain::EventKind;
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};
use crate::queue::RetryPolicy;

/// BuildError はスケジューラ構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("pool_size must be at least 1")]
    InvalidPoolSize,

    #[error("tick must be at least 1ms")]
    InvalidTick,

    #[error("retry multiplier must be a finite number >= 1.0, got {0}")]
    InvalidRetryMultiplier(f64),

    #[error("a scheduler must be built inside a tokio runtime")]
    NoRuntime,
}

/// SchedulerBuilder はスケジューラを構築
///
/// # 使用例
/// ```ignore
/// let scheduler = SchedulerBuilder::new()
///     .pool_size(8)
///     .retry_policy(RetryPolicy::exponential(2.0))
///     .observe(EventKind::TaskFailed, |task| eprintln!("{} failed", task.name))
///     .build()?;
/// ```
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    events: EventBus,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
            clock: Arc::new(SystemClock),
            ids: None,
            events: EventBus::new(),
        }
    }

    /// Replace the whole configuration (e.g. one loaded with `from_env`).
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.config.pool_size = pool_size;
        self
    }

    pub fn tick(mut self, tick: Duration) -> Self {
        self.config.tick_ms = u64::try_from(tick.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn default_max_retries(mut self, max_retries: u32) -> Self {
        self.config.default_max_retries = max_retries;
        self
    }

    pub fn default_retry_delay(mut self, delay: Duration) -> Self {
        self.config.default_retry_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.default_timeout_ms =
            timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// `None` keeps every terminal record until `purge_history`.
    pub fn history_limit(mut self, limit: Option<usize>) -> Self {
        self.config.history_limit = limit;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Wall clock for record timestamps and `Start::At`.
    ///
    /// Ids are generated from the same clock unless `id_generator` is set.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Some(Arc::new(ids));
        self
    }

    /// Register an observer before any task can fire it.
    pub fn observe<F>(self, kind: EventKind, observer: F) -> Self
    where
        F: Fn(&TaskSummary) + Send + Sync + 'static,
    {
        self.events.subscribe(kind, observer);
        self
    }

    /// Validate the configuration and start the dispatcher and workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<Scheduler, BuildError> {
        let config = self.config;
        if config.pool_size == 0 {
            return Err(BuildError::InvalidPoolSize);
        }
        if config.tick_ms == 0 {
            return Err(BuildError::InvalidTick);
        }
        let multiplier = config.retry.multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(BuildError::InvalidRetryMultiplier(multiplier));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| BuildError::NoRuntime)?;

        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&self.clock))));
        let pool_size = config.pool_size;
        let shared = Arc::new(Shared::new(config, self.clock, ids, self.events));

        let (admit_tx, admit_rx) = mpsc::channel(pool_size);
        let admit_rx = Arc::new(Mutex::new(admit_rx));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatcher = runtime.spawn(dispatcher::run(Arc::clone(&shared), admit_tx, shutdown_rx));
        let workers = (0..pool_size)
            .map(|worker_id| {
                runtime.spawn(worker_loop::run(
                    worker_id,
                    Arc::clone(&shared),
                    Arc::clone(&admit_rx),
                ))
            })
            .collect();

        info!(pool_size, tick_ms = shared.config.tick_ms, "scheduler started");
        Ok(Scheduler::from_parts(
            shared,
            Loops {
                shutdown: shutdown_tx,
                dispatcher,
                workers,
            },
        ))
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
