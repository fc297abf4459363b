use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::SchedulerResult;
use crate::models::{Task, TaskResult};

/// External collaborator that actually runs task payloads. The scheduler
/// never interprets the payload or the result.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task) -> SchedulerResult<TaskResult>;

    /// Best-effort cancellation signal for in-flight work. The task stays
    /// PROCESSING until the executor returns or acknowledges.
    async fn cancel(&self, _task_id: Uuid) -> SchedulerResult<()> {
        Ok(())
    }
}

/// Optional upstream collaborator that labels a task with a processing
/// mode. The label is opaque metadata used only for executor routing.
pub trait ModeSelector: Send + Sync {
    fn select_mode(&self, task: &Task) -> String;
}

/// Persistence collaborator. Called on every terminal transition;
/// persistence failures are logged and dropped, never retried.
#[async_trait]
pub trait TaskSink: Send + Sync {
    async fn persist(&self, task: &Task) -> SchedulerResult<()>;
}
