use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::{gauge, histogram};
use tokio::sync::{broadcast, RwLock};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use orchestrator_core::{
    CallAdmission, CircuitBreaker, DispatcherConfig, ManagerStatus, ModeSelector, QueueEntry,
    SchedulerError, SchedulerResult, Task, TaskExecutor, TaskResult, TaskSink, TaskStatus,
    TierKind, TierManager,
};
use orchestrator_worker::WorkerRegistry;

use crate::retry::RetryCoordinator;

/// A task currently owned by the dispatcher/registry pairing.
#[derive(Debug, Clone)]
pub struct InFlight {
    pub task: Task,
    pub worker_id: String,
}

/// Assignment set shared between the dispatcher and the worker failure
/// detector. Removing an entry claims the right to settle the task, so a
/// result and a reclaim can never both apply.
pub type InFlightMap = Arc<RwLock<HashMap<Uuid, InFlight>>>;

/// Outcome of a cancellation request.
#[derive(Debug)]
pub enum CancelOutcome {
    /// The task was still pending (queued or delay-held) and was removed.
    Removed(Task),
    /// The task is processing; the executor was signalled but the task
    /// remains in flight until it reports.
    Signalled,
}

/// The main loop: pulls from tiers in priority order, finds the least
/// loaded eligible worker, and hands tasks to the executor collaborator.
pub struct Dispatcher {
    tiers: Arc<TierManager>,
    registry: Arc<WorkerRegistry>,
    executor: Arc<dyn TaskExecutor>,
    breaker: Arc<CircuitBreaker>,
    retry: Arc<RetryCoordinator>,
    sink: Arc<dyn TaskSink>,
    mode_selector: Option<Arc<dyn ModeSelector>>,
    in_flight: InFlightMap,
    config: DispatcherConfig,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tiers: Arc<TierManager>,
        registry: Arc<WorkerRegistry>,
        executor: Arc<dyn TaskExecutor>,
        breaker: Arc<CircuitBreaker>,
        retry: Arc<RetryCoordinator>,
        sink: Arc<dyn TaskSink>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            tiers,
            registry,
            executor,
            breaker,
            retry,
            sink,
            mode_selector: None,
            in_flight: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    pub fn with_mode_selector(mut self, selector: Arc<dyn ModeSelector>) -> Self {
        self.mode_selector = Some(selector);
        self
    }

    /// Shared handle for the worker failure detector.
    pub fn in_flight_handle(&self) -> InFlightMap {
        Arc::clone(&self.in_flight)
    }

    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.read().await.len()
    }

    /// One dispatch cycle. Returns whether any task was picked up, so the
    /// run loop knows when to idle.
    pub async fn dispatch_cycle(&self) -> SchedulerResult<bool> {
        if self.tiers.status().await == ManagerStatus::Paused {
            return Ok(false);
        }
        let Some(entry) = self.tiers.dequeue().await else {
            return Ok(false);
        };
        let tier = TierKind::for_priority(entry.task.priority);

        // a task that aged out while pending is a failed attempt
        if entry.task.is_past_deadline(Utc::now()) {
            let task = entry.task;
            warn!(task_id = %task.id, deadline = ?task.deadline, "task deadline exceeded while pending");
            self.fail_attempt(task, tier, SchedulerError::ExecutionFailed(
                "deadline exceeded while pending".to_string(),
            ))
            .await;
            return Ok(true);
        }

        let Some(worker) = self.registry.find_least_loaded_eligible().await else {
            // park the task at the front of its tier rather than spinning
            // through an empty pool
            debug!(task_id = %entry.task.id, "no eligible worker, restoring task");
            self.tiers.restore(entry).await;
            return Ok(false);
        };

        if let Err(e) = self.registry.reserve(&worker.id).await {
            // lost the slot to a concurrent assignment; put the task back
            debug!(worker_id = %worker.id, error = %e, "reservation lost, restoring task");
            self.tiers.restore(entry).await;
            return Ok(false);
        }

        // admit only once the slot is held, so a lost reservation can
        // never strand the half-open probe permit
        let admission = self.breaker.admit().await;
        if admission == CallAdmission::Denied {
            self.registry.release(&worker.id).await;
            let task = entry.task;
            debug!(task_id = %task.id, "circuit open, short-circuiting dispatch");
            self.fail_attempt(task, tier, SchedulerError::CircuitOpen).await;
            return Ok(true);
        }

        self.assign(entry, tier, worker.id, admission == CallAdmission::Probe)
            .await;
        Ok(true)
    }

    async fn assign(&self, entry: QueueEntry, tier: TierKind, worker_id: String, is_probe: bool) {
        let mut task = entry.task;
        task.status = TaskStatus::Assigned;
        if let Some(selector) = &self.mode_selector {
            task.mode = Some(selector.select_mode(&task));
        }
        debug!(task_id = %task.id, worker_id = %worker_id, "task assigned");

        task.status = TaskStatus::Processing;
        self.in_flight.write().await.insert(
            task.id,
            InFlight {
                task: task.clone(),
                worker_id: worker_id.clone(),
            },
        );
        gauge!("orchestrator_tasks_in_flight").set(self.in_flight.read().await.len() as f64);

        let executor = Arc::clone(&self.executor);
        let breaker = Arc::clone(&self.breaker);
        let registry = Arc::clone(&self.registry);
        let tiers = Arc::clone(&self.tiers);
        let retry = Arc::clone(&self.retry);
        let sink = Arc::clone(&self.sink);
        let in_flight = Arc::clone(&self.in_flight);
        // execution must never block the dispatch loop
        tokio::spawn(async move {
            let started = Instant::now();
            let result = executor.execute(&task).await;

            // claiming the in-flight entry settles the task exactly once;
            // a reclaim by the failure detector wins ties
            if in_flight.write().await.remove(&task.id).is_none() {
                debug!(task_id = %task.id, "stale executor result for reclaimed task, ignoring");
                if is_probe {
                    // the trial's verdict is discarded with it
                    breaker.abandon_probe().await;
                }
                return;
            }
            registry.release(&worker_id).await;

            match result {
                Ok(output) => {
                    breaker.record_success().await;
                    finish_success(&tiers, &sink, task, tier, output, started.elapsed()).await;
                }
                Err(e) => {
                    breaker.record_failure().await;
                    tiers.record_failed(tier).await;
                    task.status = TaskStatus::Failed;
                    let decision = retry.handle_failure(task, &e).await;
                    debug!(error = %e, ?decision, "execution failed");
                }
            }
        });
    }

    /// Route a failed attempt (deadline, circuit open) through the retry
    /// coordinator without ever having touched a worker.
    async fn fail_attempt(&self, mut task: Task, tier: TierKind, error: SchedulerError) {
        task.status = TaskStatus::Failed;
        self.tiers.record_failed(tier).await;
        let decision = self.retry.handle_failure(task, &error).await;
        debug!(error = %error, ?decision, "attempt failed before execution");
    }

    /// Cancel a task wherever it currently lives.
    pub async fn cancel(&self, id: Uuid) -> SchedulerResult<CancelOutcome> {
        if let Some(task) = self.tiers.cancel(&id).await {
            info!(task_id = %id, "pending task cancelled");
            return Ok(CancelOutcome::Removed(task));
        }
        if let Some(task) = self.retry.cancel_delayed(&id).await {
            info!(task_id = %id, "delay-held task cancelled");
            return Ok(CancelOutcome::Removed(task));
        }
        if self.in_flight.read().await.contains_key(&id) {
            // signal only; the task stays PROCESSING until the executor
            // acknowledges or returns
            self.executor.cancel(id).await?;
            info!(task_id = %id, "in-flight task signalled for cancellation");
            return Ok(CancelOutcome::Signalled);
        }
        Err(SchedulerError::TaskNotFound { id })
    }

    /// Continuous dispatch loop, driven until shutdown.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(poll_interval_ms = self.config.poll_interval_ms, "dispatcher started");
        let idle = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("dispatcher stopping");
                    break;
                }
                worked = self.dispatch_cycle() => {
                    match worked {
                        Ok(true) => {}
                        Ok(false) => sleep(idle).await,
                        Err(e) => {
                            // per-task failures are routed internally; an
                            // error here is a scheduler bug, not a reason
                            // to kill the loop
                            error!(error = %e, "dispatch cycle error");
                            sleep(idle).await;
                        }
                    }
                }
            }
        }
    }
}

async fn finish_success(
    tiers: &Arc<TierManager>,
    sink: &Arc<dyn TaskSink>,
    mut task: Task,
    tier: TierKind,
    output: TaskResult,
    elapsed: Duration,
) {
    task.status = TaskStatus::Completed;
    task.result = Some(output);
    tiers.record_completed(tier).await;
    histogram!("orchestrator_task_processing_seconds").record(elapsed.as_secs_f64());
    debug!(task_id = %task.id, elapsed_ms = elapsed.as_millis() as u64, "task completed");
    if let Err(e) = sink.persist(&task).await {
        warn!(task_id = %task.id, error = %e, "completion persistence failed, dropping");
    }
}
