use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use orchestrator_core::{
    SchedulerError, SchedulerResult, WorkerHeartbeat, WorkerInfo, WorkerRegistration, WorkerStatus,
};

/// Worker counts by status, for status queries and pool sizing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerCounts {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
    pub overloaded: usize,
    pub unresponsive: usize,
}

/// Tracks worker identity, capacity, load, and liveness.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, WorkerInfo>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker. Re-registering an existing id replaces the old
    /// record and resets its load accounting.
    pub async fn register(&self, registration: WorkerRegistration) -> WorkerInfo {
        let info = WorkerInfo::new(registration);
        let mut workers = self.workers.write().await;
        if workers.contains_key(&info.id) {
            warn!(worker_id = %info.id, "re-registering existing worker");
        } else {
            info!(
                worker_id = %info.id,
                capacity = info.max_concurrent_tasks,
                "worker registered"
            );
        }
        workers.insert(info.id.clone(), info.clone());
        info
    }

    pub async fn unregister(&self, id: &str) -> SchedulerResult<WorkerInfo> {
        let mut workers = self.workers.write().await;
        let info = workers
            .remove(id)
            .ok_or_else(|| SchedulerError::WorkerNotFound { id: id.to_string() })?;
        info!(worker_id = %id, "worker unregistered");
        Ok(info)
    }

    /// Remove a worker only if it still has no in-flight tasks, re-checked
    /// under the write lock. Returns `false` when the worker picked up
    /// work since it was listed as idle.
    pub async fn unregister_if_idle(&self, id: &str) -> SchedulerResult<bool> {
        let mut workers = self.workers.write().await;
        let worker = workers
            .get(id)
            .ok_or_else(|| SchedulerError::WorkerNotFound { id: id.to_string() })?;
        if worker.current_load > 0 {
            debug!(worker_id = %id, load = worker.current_load, "worker no longer idle, keeping it");
            return Ok(false);
        }
        workers.remove(id);
        info!(worker_id = %id, "idle worker unregistered");
        Ok(true)
    }

    /// Least-loaded eligible worker; ties broken by earliest registration
    /// so load spreads evenly over time.
    pub async fn find_least_loaded_eligible(&self) -> Option<WorkerInfo> {
        let workers = self.workers.read().await;
        workers
            .values()
            .filter(|w| w.is_eligible())
            .min_by_key(|w| (w.current_load, w.registered_at))
            .cloned()
    }

    /// Claim one execution slot on a worker.
    pub async fn reserve(&self, id: &str) -> SchedulerResult<()> {
        let mut workers = self.workers.write().await;
        let worker = workers
            .get_mut(id)
            .ok_or_else(|| SchedulerError::WorkerNotFound { id: id.to_string() })?;
        if !worker.is_eligible() {
            return Err(SchedulerError::NoEligibleWorker);
        }
        worker.current_load += 1;
        worker.refresh_status();
        Ok(())
    }

    /// Release one execution slot. The worker may already be gone
    /// (scale-down, failure sweep); that is not an error.
    pub async fn release(&self, id: &str) {
        let mut workers = self.workers.write().await;
        if let Some(worker) = workers.get_mut(id) {
            worker.current_load = worker.current_load.saturating_sub(1);
            worker.refresh_status();
        } else {
            debug!(worker_id = %id, "release for unknown worker ignored");
        }
    }

    /// Record a heartbeat. A heartbeat from an UNRESPONSIVE worker revives
    /// it; its previously reclaimed tasks are not returned.
    pub async fn record_heartbeat(&self, heartbeat: WorkerHeartbeat) -> SchedulerResult<()> {
        let mut workers = self.workers.write().await;
        let worker = workers.get_mut(&heartbeat.worker_id).ok_or_else(|| {
            SchedulerError::WorkerNotFound {
                id: heartbeat.worker_id.clone(),
            }
        })?;
        worker.last_heartbeat = heartbeat.timestamp;
        if worker.status == WorkerStatus::Unresponsive {
            info!(worker_id = %worker.id, "unresponsive worker revived by heartbeat");
            worker.status = WorkerStatus::Active;
        }
        worker.refresh_status();
        Ok(())
    }

    /// Mark workers whose heartbeat age exceeds `timeout_seconds` as
    /// UNRESPONSIVE and zero their load (their in-flight tasks are being
    /// reclaimed by the failure detector). Returns newly marked ids.
    pub async fn sweep_stale(&self, timeout_seconds: i64) -> Vec<String> {
        let now = Utc::now();
        let mut workers = self.workers.write().await;
        let mut stale = Vec::new();
        for worker in workers.values_mut() {
            if worker.status != WorkerStatus::Unresponsive
                && worker.is_heartbeat_expired(timeout_seconds, now)
            {
                warn!(
                    worker_id = %worker.id,
                    last_heartbeat = %worker.last_heartbeat,
                    "worker heartbeat stale, marking unresponsive"
                );
                worker.status = WorkerStatus::Unresponsive;
                worker.current_load = 0;
                stale.push(worker.id.clone());
            }
        }
        stale
    }

    /// Ids of workers with no in-flight tasks, eligible for scale-down.
    pub async fn idle_workers(&self) -> Vec<String> {
        let workers = self.workers.read().await;
        workers
            .values()
            .filter(|w| w.is_idle())
            .map(|w| w.id.clone())
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<WorkerInfo> {
        self.workers.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<WorkerInfo> {
        self.workers.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.read().await.is_empty()
    }

    /// Sum of current loads, i.e. tasks in ASSIGNED or PROCESSING.
    pub async fn total_load(&self) -> u32 {
        self.workers
            .read()
            .await
            .values()
            .map(|w| w.current_load)
            .sum()
    }

    pub async fn counts(&self) -> WorkerCounts {
        let workers = self.workers.read().await;
        let mut counts = WorkerCounts {
            total: workers.len(),
            ..WorkerCounts::default()
        };
        for worker in workers.values() {
            match worker.status {
                WorkerStatus::Active => counts.active += 1,
                WorkerStatus::Idle => counts.idle += 1,
                WorkerStatus::Overloaded => counts.overloaded += 1,
                WorkerStatus::Unresponsive => counts.unresponsive += 1,
            }
        }
        counts
    }
}
