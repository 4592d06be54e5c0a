//! App - アプリケーション層
//!
//! domain / ports / queue を組み合わせてスケジューラを動かします。
//!
//! # 主要コンポーネント
//! - **SchedulerBuilder**: 設定の検証とループの起動
//! - **Scheduler**: 呼び出し側の制御 API
//! - **dispatcher**: キューから空きスロットへの受け渡し（1 本）
//! - **worker_loop**: タスクの実行と結果の反映（pool_size 本）
//! - **EventBus**: ライフサイクル通知
//! - **status**: TaskSummary / Statistics

pub mod builder;
pub mod config;
mod dispatcher;
pub mod events;
pub mod scheduler;
mod shared;
pub mod status;
mod table;
mod worker_loop;

pub use self::builder::{BuildError, SchedulerBuilder};
pub use self::config::{ConfigError, SchedulerConfig};
pub use self::events::{EventBus, Observer};
pub use self::scheduler::Scheduler;
pub use self::status::{Statistics, TaskSummary};
