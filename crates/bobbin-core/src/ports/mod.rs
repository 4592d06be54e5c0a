//! Ports - 抽象化レイヤー
//!
//! スケジューラが外部に依存する部分（時刻、ID 生成、呼び出し側の仕事）を
//! trait として切り出し、テストで差し替えられるようにします。

pub mod clock;
pub mod id_generator;
pub mod work;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::work::{BlockingFn, Work, WorkContext, WorkFn, blocking_fn, work_fn};
