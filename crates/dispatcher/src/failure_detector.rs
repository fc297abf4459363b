use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::broadcast;
use tracing::{info, warn};

use orchestrator_core::{HeartbeatConfig, TaskStatus, TierManager};
use orchestrator_worker::WorkerRegistry;

use crate::dispatcher::InFlightMap;
use crate::retry::RetryCoordinator;

/// Periodically sweeps the registry for workers whose heartbeats have gone
/// stale and reclaims their in-flight tasks back into the queue.
pub struct WorkerFailureDetector {
    registry: Arc<WorkerRegistry>,
    tiers: Arc<TierManager>,
    retry: Arc<RetryCoordinator>,
    in_flight: InFlightMap,
    config: HeartbeatConfig,
}

impl WorkerFailureDetector {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        tiers: Arc<TierManager>,
        retry: Arc<RetryCoordinator>,
        in_flight: InFlightMap,
        config: HeartbeatConfig,
    ) -> Self {
        Self {
            registry,
            tiers,
            retry,
            in_flight,
            config,
        }
    }

    /// One sweep pass. Returns the number of tasks reclaimed.
    pub async fn sweep_once(&self) -> usize {
        let stale = self
            .registry
            .sweep_stale(self.config.stale_timeout_seconds())
            .await;
        if stale.is_empty() {
            return 0;
        }
        warn!(workers = ?stale, "workers marked unresponsive");
        counter!("orchestrator_workers_marked_unresponsive").increment(stale.len() as u64);

        // removing from the in-flight map claims settlement; a straggling
        // executor result for the same task will find nothing and drop
        let reclaimed: Vec<_> = {
            let mut in_flight = self.in_flight.write().await;
            let ids: Vec<_> = in_flight
                .iter()
                .filter(|(_, v)| stale.contains(&v.worker_id))
                .map(|(k, _)| *k)
                .collect();
            ids.into_iter()
                .filter_map(|id| in_flight.remove(&id))
                .collect()
        };

        let count = reclaimed.len();
        for assignment in reclaimed {
            let mut task = assignment.task;
            info!(
                task_id = %task.id,
                worker_id = %assignment.worker_id,
                "reclaiming task from unresponsive worker"
            );
            // the worker may still finish the attempt; the orphaned result
            // is discarded, so the attempt does not count against the
            // retry budget
            // a worker failure is not a task failure: the task re-enters
            // its tier even while the manager is shedding new intake
            task.status = TaskStatus::Pending;
            if let Err(e) = self.tiers.requeue(task.clone()).await {
                warn!(task_id = %task.id, error = %e, "reclaim requeue rejected, dead-lettering");
                self.retry.dead_letter(task).await;
            } else {
                counter!("orchestrator_tasks_reclaimed").increment(1);
            }
        }
        count
    }

    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.sweep_interval_seconds));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            sweep_interval_s = self.config.sweep_interval_seconds,
            stale_timeout_s = self.config.stale_timeout_seconds(),
            "worker failure detector started"
        );
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("worker failure detector stopping");
                    break;
                }
                _ = interval.tick() => {
                    self.sweep_once().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::InFlight;
    use crate::test_utils::RecordingSink;
    use chrono::{Duration as ChronoDuration, Utc};
    use orchestrator_core::{
        ManagerStatus, QueueConfig, RetryConfig, Task, TaskPriority, TaskSpec, WorkerHeartbeat,
        WorkerRegistration, WorkerStatus,
    };
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    fn detector_fixture() -> (
        WorkerFailureDetector,
        Arc<WorkerRegistry>,
        Arc<TierManager>,
        Arc<RetryCoordinator>,
        InFlightMap,
    ) {
        detector_fixture_with(QueueConfig::default())
    }

    fn detector_fixture_with(
        queue_config: QueueConfig,
    ) -> (
        WorkerFailureDetector,
        Arc<WorkerRegistry>,
        Arc<TierManager>,
        Arc<RetryCoordinator>,
        InFlightMap,
    ) {
        let registry = Arc::new(WorkerRegistry::new());
        let tiers = Arc::new(TierManager::new(queue_config));
        let retry = Arc::new(RetryCoordinator::new(
            tiers.clone(),
            Arc::new(RecordingSink::default()),
            RetryConfig::default(),
        ));
        let in_flight: InFlightMap = Arc::new(RwLock::new(HashMap::new()));
        let detector = WorkerFailureDetector::new(
            registry.clone(),
            tiers.clone(),
            retry.clone(),
            in_flight.clone(),
            HeartbeatConfig::default(),
        );
        (detector, registry, tiers, retry, in_flight)
    }

    async fn register(registry: &WorkerRegistry, id: &str) {
        registry
            .register(WorkerRegistration {
                worker_id: id.to_string(),
                hostname: "test".to_string(),
                max_concurrent_tasks: 4,
            })
            .await;
    }

    fn task(kind: &str) -> Task {
        Task::new(TaskSpec::new(kind, TaskPriority::High, serde_json::Value::Null))
    }

    /// Push a worker's last heartbeat far enough into the past that the
    /// sweep treats it as stale.
    async fn age_heartbeat(registry: &WorkerRegistry, id: &str, seconds: i64) {
        registry
            .record_heartbeat(WorkerHeartbeat {
                worker_id: id.to_string(),
                timestamp: Utc::now() - ChronoDuration::seconds(seconds),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stale_worker_tasks_are_requeued() {
        let (detector, registry, tiers, retry, in_flight) = detector_fixture();
        register(&registry, "w-stale").await;
        register(&registry, "w-live").await;

        let mut orphan = task("orphan");
        orphan.status = TaskStatus::Processing;
        orphan.retry_count = 1;
        let orphan_id = orphan.id;
        in_flight.write().await.insert(
            orphan_id,
            InFlight {
                task: orphan,
                worker_id: "w-stale".to_string(),
            },
        );
        let mut safe = task("safe");
        safe.status = TaskStatus::Processing;
        in_flight.write().await.insert(
            safe.id,
            InFlight {
                task: safe,
                worker_id: "w-live".to_string(),
            },
        );

        age_heartbeat(&registry, "w-stale", 120).await;
        let reclaimed = detector.sweep_once().await;
        assert_eq!(reclaimed, 1);

        // back in its tier as a fresh pending task, budget untouched
        assert_eq!(tiers.total_depth().await, 1);
        let entry = tiers.dequeue().await.unwrap();
        assert_eq!(entry.task.id, orphan_id);
        assert_eq!(entry.task.status, TaskStatus::Pending);
        assert_eq!(entry.task.retry_count, 1);
        assert_eq!(retry.dead_letter_count().await, 0);

        // the live worker's task was not touched
        assert_eq!(in_flight.read().await.len(), 1);
        let info = registry.get("w-stale").await.unwrap();
        assert_eq!(info.status, WorkerStatus::Unresponsive);
        assert_eq!(info.current_load, 0);
    }

    #[tokio::test]
    async fn reclaim_lands_in_tier_even_when_manager_sheds_load() {
        // capacity 12, overload at depth 6
        let (detector, registry, tiers, retry, in_flight) = detector_fixture_with(QueueConfig {
            max_depth_per_tier: 4,
            overload_high_watermark: 0.5,
            overload_low_watermark: 0.2,
        });
        register(&registry, "w-stale").await;

        for _ in 0..4 {
            let t = Task::new(TaskSpec::new("bulk", TaskPriority::Low, serde_json::Value::Null));
            tiers.enqueue(t).await.unwrap();
        }
        for _ in 0..2 {
            let t = Task::new(TaskSpec::new(
                "bulk",
                TaskPriority::Critical,
                serde_json::Value::Null,
            ));
            tiers.enqueue(t).await.unwrap();
        }
        assert_eq!(tiers.status().await, ManagerStatus::Overloaded);

        let mut orphan = task("orphan");
        orphan.status = TaskStatus::Processing;
        let orphan_id = orphan.id;
        in_flight.write().await.insert(
            orphan_id,
            InFlight {
                task: orphan,
                worker_id: "w-stale".to_string(),
            },
        );
        age_heartbeat(&registry, "w-stale", 120).await;

        // a worker failure is not a task failure: the overload gate does
        // not turn the reclaim into a dead letter
        assert_eq!(detector.sweep_once().await, 1);
        assert_eq!(retry.dead_letter_count().await, 0);
        assert!(tiers.contains(&orphan_id).await);
    }

    #[tokio::test]
    async fn healthy_workers_survive_sweep() {
        let (detector, registry, _tiers, _retry, _in_flight) = detector_fixture();
        register(&registry, "w-1").await;

        assert_eq!(detector.sweep_once().await, 0);
        let info = registry.get("w-1").await.unwrap();
        assert_ne!(info.status, WorkerStatus::Unresponsive);
    }

    #[tokio::test]
    async fn revived_worker_is_eligible_again() {
        let (detector, registry, _tiers, _retry, _in_flight) = detector_fixture();
        register(&registry, "w-1").await;
        age_heartbeat(&registry, "w-1", 120).await;
        detector.sweep_once().await;
        assert_eq!(
            registry.get("w-1").await.unwrap().status,
            WorkerStatus::Unresponsive
        );

        // a fresh heartbeat brings the worker back into rotation
        registry
            .record_heartbeat(WorkerHeartbeat::now("w-1"))
            .await
            .unwrap();
        let info = registry.get("w-1").await.unwrap();
        assert_ne!(info.status, WorkerStatus::Unresponsive);
        assert!(registry.find_least_loaded_eligible().await.is_some());
    }
}
