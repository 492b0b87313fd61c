//! Domain model (ids, status, specs, records, events, errors).

pub mod errors;
pub mod events;
pub mod ids;
pub mod record;
pub mod spec;
pub mod state;
pub mod task_type;

pub use self::errors::{Result, TaskError};
pub use self::events::{OverflowPolicy, StreamItem, TaskEvent};
pub use self::ids::TaskId;
pub use self::record::{FailureKind, TaskRecord, Transition};
pub use self::spec::{TaskSpec, TaskToCreate};
pub use self::state::TaskStatus;
pub use self::task_type::TaskType;
