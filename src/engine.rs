use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use orchestrator_core::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, EngineConfig, ModeSelector,
    QueueSnapshot, SchedulerResult, Task, TaskExecutor, TaskSink, TaskSpec, TierManager,
    WorkerHeartbeat, WorkerInfo, WorkerRegistration,
};
use orchestrator_dispatcher::{
    CancelOutcome, Dispatcher, RetryCoordinator, WorkerFailureDetector,
};
use orchestrator_worker::{
    ElasticPoolController, LocalProvisioner, ProcFsSampler, ResourceSampler, WorkerCounts,
    WorkerProvisioner, WorkerRegistry,
};

/// Point-in-time view of the whole engine, for operators and health
/// endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub queue: QueueSnapshot,
    pub workers: WorkerCounts,
    pub circuit: CircuitBreakerStats,
    pub in_flight: usize,
    pub delayed_retries: usize,
    pub dead_letters: usize,
}

/// Wires the queue tiers, worker registry, dispatcher, failure detector
/// and elastic pool together and owns their background loops.
///
/// The executor and sink are the integration points: bring your own
/// implementations of [`TaskExecutor`] and [`TaskSink`].
pub struct SchedulerEngine {
    config: EngineConfig,
    tiers: Arc<TierManager>,
    registry: Arc<WorkerRegistry>,
    breaker: Arc<CircuitBreaker>,
    retry: Arc<RetryCoordinator>,
    dispatcher: Arc<Dispatcher>,
    detector: Arc<WorkerFailureDetector>,
    pool: Arc<ElasticPoolController>,
    shutdown_tx: Arc<RwLock<Option<broadcast::Sender<()>>>>,
    handles: Arc<RwLock<Vec<JoinHandle<()>>>>,
}

impl SchedulerEngine {
    pub fn new(
        config: EngineConfig,
        executor: Arc<dyn TaskExecutor>,
        sink: Arc<dyn TaskSink>,
    ) -> SchedulerResult<Self> {
        Self::with_collaborators(
            config.clone(),
            executor,
            sink,
            None,
            Arc::new(ProcFsSampler::new()),
            Arc::new(LocalProvisioner::new(config.pool.worker_capacity)),
        )
    }

    /// Full wiring with every collaborator supplied, for embedders that
    /// replace the default sampler or provisioner.
    pub fn with_collaborators(
        config: EngineConfig,
        executor: Arc<dyn TaskExecutor>,
        sink: Arc<dyn TaskSink>,
        mode_selector: Option<Arc<dyn ModeSelector>>,
        sampler: Arc<dyn ResourceSampler>,
        provisioner: Arc<dyn WorkerProvisioner>,
    ) -> SchedulerResult<Self> {
        config.validate()?;

        let tiers = Arc::new(TierManager::new(config.queue.clone()));
        let registry = Arc::new(WorkerRegistry::new());
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::from(
            &config.circuit_breaker,
        )));
        let retry = Arc::new(RetryCoordinator::new(
            Arc::clone(&tiers),
            Arc::clone(&sink),
            config.retry.clone(),
        ));

        let mut dispatcher = Dispatcher::new(
            Arc::clone(&tiers),
            Arc::clone(&registry),
            executor,
            Arc::clone(&breaker),
            Arc::clone(&retry),
            sink,
            config.dispatcher.clone(),
        );
        if let Some(selector) = mode_selector {
            dispatcher = dispatcher.with_mode_selector(selector);
        }
        let dispatcher = Arc::new(dispatcher);

        let detector = Arc::new(WorkerFailureDetector::new(
            Arc::clone(&registry),
            Arc::clone(&tiers),
            Arc::clone(&retry),
            dispatcher.in_flight_handle(),
            config.heartbeat.clone(),
        ));
        let pool = Arc::new(ElasticPoolController::new(
            config.pool.clone(),
            Arc::clone(&registry),
            sampler,
            provisioner,
        ));

        Ok(Self {
            config,
            tiers,
            registry,
            breaker,
            retry,
            dispatcher,
            detector,
            pool,
            shutdown_tx: Arc::new(RwLock::new(None)),
            handles: Arc::new(RwLock::new(Vec::new())),
        })
    }

    /// Spawn the dispatch loop, the failure-detector sweep and the pool
    /// controller. Idempotent: a second call is a no-op.
    pub async fn start(&self) -> SchedulerResult<()> {
        {
            let mut tx_guard = self.shutdown_tx.write().await;
            if tx_guard.is_some() {
                warn!("engine already started");
                return Ok(());
            }
            let (shutdown_tx, _) = broadcast::channel(1);

            self.pool.ensure_minimum().await?;

            let dispatcher = Arc::clone(&self.dispatcher);
            let dispatcher_rx = shutdown_tx.subscribe();
            let detector = Arc::clone(&self.detector);
            let detector_rx = shutdown_tx.subscribe();
            let pool = Arc::clone(&self.pool);
            let pool_rx = shutdown_tx.subscribe();

            let mut handles = self.handles.write().await;
            handles.push(tokio::spawn(async move { dispatcher.run(dispatcher_rx).await }));
            handles.push(tokio::spawn(async move { detector.run(detector_rx).await }));
            handles.push(tokio::spawn(async move { pool.run(pool_rx).await }));

            *tx_guard = Some(shutdown_tx);
        }
        info!(
            min_workers = self.config.pool.min_workers,
            max_workers = self.config.pool.max_workers,
            "scheduler engine started"
        );
        Ok(())
    }

    /// Signal every loop to stop and wait for them to drain. In-flight
    /// executions keep running on the runtime; queued tasks stay queued.
    pub async fn shutdown(&self) {
        let tx = self.shutdown_tx.write().await.take();
        let Some(tx) = tx else {
            return;
        };
        info!("scheduler engine shutting down");
        let _ = tx.send(());
        let handles: Vec<_> = self.handles.write().await.drain(..).collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "background loop ended abnormally");
            }
        }
        info!("scheduler engine stopped");
    }

    /// Admit a task into its priority tier. Fails with `QueueFull` when
    /// the tier is at capacity or the manager is shedding load.
    pub async fn submit(&self, spec: TaskSpec) -> SchedulerResult<Uuid> {
        let task = Task::new(spec);
        let id = task.id;
        self.tiers.enqueue(task).await?;
        Ok(id)
    }

    pub async fn cancel(&self, id: Uuid) -> SchedulerResult<CancelOutcome> {
        self.dispatcher.cancel(id).await
    }

    /// Register an externally managed worker alongside pool-provisioned
    /// ones.
    pub async fn register_worker(&self, registration: WorkerRegistration) {
        self.registry.register(registration).await;
    }

    /// Remove an externally managed worker. Tasks it still holds are
    /// reclaimed by the failure detector once its heartbeats stop.
    pub async fn unregister_worker(&self, id: &str) -> SchedulerResult<WorkerInfo> {
        self.registry.unregister(id).await
    }

    pub async fn heartbeat(&self, heartbeat: WorkerHeartbeat) -> SchedulerResult<()> {
        self.registry.record_heartbeat(heartbeat).await
    }

    pub async fn pause(&self) {
        self.tiers.pause().await;
    }

    pub async fn resume(&self) {
        self.tiers.resume().await;
    }

    pub async fn dead_letters(&self) -> Vec<Task> {
        self.retry.dead_letters().await
    }

    /// Put a dead-lettered task back into rotation with a fresh retry
    /// budget.
    pub async fn resurrect(&self, id: Uuid) -> SchedulerResult<()> {
        self.retry.resurrect(&id).await
    }

    pub async fn status(&self) -> EngineStatus {
        EngineStatus {
            queue: self.tiers.snapshot().await,
            workers: self.registry.counts().await,
            circuit: self.breaker.stats().await,
            in_flight: self.dispatcher.in_flight_count().await,
            delayed_retries: self.retry.delayed_count().await,
            dead_letters: self.retry.dead_letter_count().await,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl SchedulerEngine {
    /// Whether the id is known to some non-terminal stage of the
    /// pipeline: queued, delay-held, or in flight.
    pub async fn contains(&self, id: Uuid) -> bool {
        self.tiers.contains(&id).await
            || self.retry.is_delayed(&id).await
            || self
                .dispatcher
                .in_flight_handle()
                .read()
                .await
                .contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use orchestrator_core::{SchedulerError, TaskPriority, TaskResult};
    use orchestrator_worker::{ResourceSample, StaticSampler};

    struct EchoExecutor;

    #[async_trait]
    impl TaskExecutor for EchoExecutor {
        async fn execute(&self, task: &Task) -> SchedulerResult<TaskResult> {
            Ok(TaskResult {
                output: task.payload.clone(),
            })
        }
    }

    struct NullSink;

    #[async_trait]
    impl TaskSink for NullSink {
        async fn persist(&self, _task: &Task) -> SchedulerResult<()> {
            Ok(())
        }
    }

    fn engine() -> SchedulerEngine {
        let config = EngineConfig::default();
        SchedulerEngine::with_collaborators(
            config.clone(),
            Arc::new(EchoExecutor),
            Arc::new(NullSink),
            None,
            Arc::new(StaticSampler(ResourceSample {
                cpu_percent: 50.0,
                memory_percent: 50.0,
            })),
            Arc::new(LocalProvisioner::new(config.pool.worker_capacity)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn submit_reports_in_status_snapshot() {
        let engine = engine();
        let id = engine
            .submit(TaskSpec::new(
                "echo",
                TaskPriority::Normal,
                serde_json::json!({"n": 1}),
            ))
            .await
            .unwrap();

        let status = engine.status().await;
        assert_eq!(status.queue.total_depth, 1);
        assert!(engine.contains(id).await);
    }

    #[tokio::test]
    async fn rejects_invalid_configuration() {
        let mut config = EngineConfig::default();
        config.pool.min_workers = 10;
        config.pool.max_workers = 2;
        let built = SchedulerEngine::new(config, Arc::new(EchoExecutor), Arc::new(NullSink));
        assert!(matches!(built, Err(SchedulerError::Configuration(_))));
    }

    #[tokio::test]
    async fn cancel_unknown_task_is_not_found() {
        let engine = engine();
        let result = engine.cancel(Uuid::new_v4()).await;
        assert!(matches!(result, Err(SchedulerError::TaskNotFound { .. })));
    }
}
