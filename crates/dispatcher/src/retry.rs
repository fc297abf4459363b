use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use orchestrator_core::{
    RetryConfig, SchedulerError, SchedulerResult, Task, TaskSink, TaskStatus, TierManager,
};

/// Outcome of [`RetryCoordinator::handle_failure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// The task was demoted and will re-enter its tier after `delay`.
    Requeued { delay: Duration },
    /// Retry budget exhausted; the task is terminal.
    DeadLettered,
}

/// Decides retry-with-backoff vs. dead-letter for failed tasks.
///
/// Requeued tasks sit in a pending-delay holding area and are pushed into
/// their tier by a timer once the backoff elapses. Dead-lettered tasks are
/// surfaced to the persistence collaborator and retained for operator
/// inspection; they are never retried automatically.
pub struct RetryCoordinator {
    tiers: Arc<TierManager>,
    sink: Arc<dyn TaskSink>,
    config: RetryConfig,
    delayed: Arc<RwLock<HashMap<Uuid, Task>>>,
    dead_letters: Arc<RwLock<HashMap<Uuid, Task>>>,
}

impl RetryCoordinator {
    pub fn new(tiers: Arc<TierManager>, sink: Arc<dyn TaskSink>, config: RetryConfig) -> Self {
        Self {
            tiers,
            sink,
            config,
            delayed: Arc::new(RwLock::new(HashMap::new())),
            dead_letters: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Handle one failed attempt.
    pub async fn handle_failure(&self, mut task: Task, error: &SchedulerError) -> RetryDecision {
        task.retry_count += 1;
        task.record_failure(error.to_string());

        if task.retries_exhausted() {
            self.dead_letter(task).await;
            return RetryDecision::DeadLettered;
        }

        // demote so a chronically failing task cannot starve healthy traffic
        task.priority = task.priority.demoted();
        task.status = TaskStatus::Pending;
        let delay = self.backoff_delay(task.retry_count);
        debug!(
            task_id = %task.id,
            retry_count = task.retry_count,
            priority = ?task.priority,
            delay_ms = delay.as_millis() as u64,
            "requeueing failed task after backoff"
        );

        self.schedule_requeue(task, delay).await;
        RetryDecision::Requeued { delay }
    }

    /// Capped exponential backoff with jitter:
    /// `min(2^retry_count, backoff_cap) * (1 ± jitter_factor)`.
    fn backoff_delay(&self, retry_count: u32) -> Duration {
        let exp = 2f64.powi(retry_count.min(31) as i32);
        let capped = exp.min(self.config.backoff_cap_seconds as f64);
        let jitter = capped * self.config.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        let final_secs = (capped + jitter).max(1.0);
        Duration::from_secs_f64(final_secs)
    }

    async fn schedule_requeue(&self, task: Task, delay: Duration) {
        let id = task.id;
        self.delayed.write().await.insert(id, task);
        let delayed = Arc::clone(&self.delayed);
        let tiers = Arc::clone(&self.tiers);
        let sink = Arc::clone(&self.sink);
        let dead_letters = Arc::clone(&self.dead_letters);
        tokio::spawn(async move {
            sleep(delay).await;
            // absent means the task was cancelled while waiting
            let Some(task) = delayed.write().await.remove(&id) else {
                return;
            };
            if let Err(e) = tiers.requeue(task.clone()).await {
                // work is never dropped silently: a retry that finds its
                // tier full becomes a dead letter
                error!(task_id = %id, error = %e, "requeue failed, dead-lettering task");
                dead_letter_inner(&sink, &dead_letters, task).await;
            }
        });
    }

    /// Move a task to the terminal DEAD_LETTERED state, bypassing any
    /// further retry accounting. Also used when a reclaimed task cannot be
    /// requeued.
    pub async fn dead_letter(&self, task: Task) {
        dead_letter_inner(&self.sink, &self.dead_letters, task).await;
    }

    /// Remove a task from the pending-delay holding area.
    pub async fn cancel_delayed(&self, id: &Uuid) -> Option<Task> {
        self.delayed.write().await.remove(id)
    }

    pub async fn is_delayed(&self, id: &Uuid) -> bool {
        self.delayed.read().await.contains_key(id)
    }

    pub async fn delayed_count(&self) -> usize {
        self.delayed.read().await.len()
    }

    /// Dead-lettered tasks awaiting operator action.
    pub async fn dead_letters(&self) -> Vec<Task> {
        self.dead_letters.read().await.values().cloned().collect()
    }

    pub async fn dead_letter_count(&self) -> usize {
        self.dead_letters.read().await.len()
    }

    /// Operator action: re-submit a dead-lettered task with a fresh retry
    /// budget. Failure history is retained.
    pub async fn resurrect(&self, id: &Uuid) -> SchedulerResult<()> {
        let mut task = self
            .dead_letters
            .write()
            .await
            .remove(id)
            .ok_or(SchedulerError::TaskNotFound { id: *id })?;
        task.retry_count = 0;
        task.status = TaskStatus::Pending;
        info!(task_id = %task.id, "dead-lettered task resurrected by operator");
        self.tiers.enqueue(task).await
    }
}

async fn dead_letter_inner(
    sink: &Arc<dyn TaskSink>,
    dead_letters: &Arc<RwLock<HashMap<Uuid, Task>>>,
    mut task: Task,
) {
    task.status = TaskStatus::DeadLettered;
    warn!(
        task_id = %task.id,
        retry_count = task.retry_count,
        last_error = task.last_error().unwrap_or("unknown"),
        "task dead-lettered"
    );
    if let Err(e) = sink.persist(&task).await {
        warn!(task_id = %task.id, error = %e, "dead-letter persistence failed, dropping");
    }
    counter!("orchestrator_tasks_dead_lettered_total").increment(1);
    dead_letters.write().await.insert(task.id, task);
}
