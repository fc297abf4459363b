//! Hand-rolled collaborator doubles for dispatcher tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use orchestrator_core::{
    SchedulerError, SchedulerResult, Task, TaskExecutor, TaskResult, TaskSink,
};

/// Executor whose behavior is scripted per test: optional run delay and a
/// count of leading attempts that fail.
pub struct ScriptedExecutor {
    executed: RwLock<Vec<String>>,
    cancelled: RwLock<Vec<Uuid>>,
    fail_first: AtomicU32,
    delay: Option<Duration>,
}

impl ScriptedExecutor {
    pub fn succeeding() -> Self {
        Self {
            executed: RwLock::new(Vec::new()),
            cancelled: RwLock::new(Vec::new()),
            fail_first: AtomicU32::new(0),
            delay: None,
        }
    }

    pub fn succeeding_with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::succeeding()
        }
    }

    /// Fail the first `n` executions, succeed afterwards.
    pub fn failing_first(n: u32) -> Self {
        Self {
            fail_first: AtomicU32::new(n),
            ..Self::succeeding()
        }
    }

    pub async fn executed_kinds(&self) -> Vec<String> {
        self.executed.read().await.clone()
    }

    pub async fn cancelled(&self) -> Vec<Uuid> {
        self.cancelled.read().await.clone()
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute(&self, task: &Task) -> SchedulerResult<TaskResult> {
        self.executed.write().await.push(task.kind.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let remaining = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if remaining.is_ok() {
            return Err(SchedulerError::ExecutionFailed("scripted failure".to_string()));
        }
        Ok(TaskResult {
            output: serde_json::json!({"kind": task.kind}),
        })
    }

    async fn cancel(&self, task_id: Uuid) -> SchedulerResult<()> {
        self.cancelled.write().await.push(task_id);
        Ok(())
    }
}

/// Sink that records every persisted task.
#[derive(Default)]
pub struct RecordingSink {
    tasks: RwLock<Vec<Task>>,
}

impl RecordingSink {
    pub async fn persisted(&self) -> Vec<Task> {
        self.tasks.read().await.clone()
    }
}

#[async_trait]
impl TaskSink for RecordingSink {
    async fn persist(&self, task: &Task) -> SchedulerResult<()> {
        self.tasks.write().await.push(task.clone());
        Ok(())
    }
}
