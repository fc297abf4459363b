use thiserror::Error;
use uuid::Uuid;

/// Scheduler error taxonomy
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("queue full: {scope} at depth {depth} (limit {limit})")]
    QueueFull {
        scope: String,
        depth: usize,
        limit: usize,
    },

    #[error("no eligible worker available")]
    NoEligibleWorker,

    #[error("task execution failed: {0}")]
    ExecutionFailed(String),

    #[error("circuit breaker open, execution short-circuited")]
    CircuitOpen,

    #[error("worker unresponsive: {id}")]
    WorkerUnresponsive { id: String },

    #[error("task {id} dead-lettered after {attempts} attempts")]
    DeadLettered { id: Uuid, attempts: u32 },

    #[error("task not found: {id}")]
    TaskNotFound { id: Uuid },

    #[error("worker not found: {id}")]
    WorkerNotFound { id: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// Transient conditions are recovered internally and never surfaced
    /// to the submitter.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NoEligibleWorker | Self::CircuitOpen)
    }
}

/// Unified Result type
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
