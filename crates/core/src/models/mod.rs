pub mod task;
pub mod worker;

pub use task::{Task, TaskFailure, TaskPriority, TaskResult, TaskSpec, TaskStatus};
pub use worker::{WorkerHeartbeat, WorkerInfo, WorkerRegistration, WorkerStatus};
