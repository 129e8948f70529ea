//! sd-registry: bounded-concurrency priority scheduler for fetch tasks.
//!
//! One [`TaskRegistry`] is shared by every plot fetcher of a session and owns
//! the global concurrency budget.

pub mod handle;
pub mod queue;
pub mod registry;

pub use handle::TaskHandle;
pub use registry::TaskRegistry;

use sd_core::{TaskId, TaskStatus};

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("No tokio runtime available to run registry tasks")]
    NoRuntime,

    #[error("Illegal transition for task {task_id}: {from} -> {to}")]
    IllegalTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
}
