//! Domain model (ids, priority, status, options, errors, events).
//!
//! このモジュールは tokio にもスケジューラ内部にも依存しない純粋なデータ型だけを持ちます。

pub mod errors;
pub mod events;
pub mod ids;
pub mod priority;
pub mod spec;
pub mod state;

pub use self::errors::{ErrorKind, TaskError, WorkError};
pub use self::events::EventKind;
pub use self::ids::{ParseIdError, SeriesId, TaskId};
pub use self::priority::{ParsePriorityError, Priority};
pub use self::spec::{Metadata, PeriodicOptions, Start, TaskOptions};
pub use self::state::TaskStatus;
