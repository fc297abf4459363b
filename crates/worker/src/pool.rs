use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::gauge;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use orchestrator_core::{PoolConfig, SchedulerResult, WorkerRegistration};

use crate::registry::WorkerRegistry;
use crate::sampler::{ResourceSample, ResourceSampler};

/// Outcome of one evaluation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    ScaleUp(u32),
    ScaleDown(u32),
    NoOp,
}

/// Produces registrations for workers the pool controller adds.
pub trait WorkerProvisioner: Send + Sync {
    fn provision(&self, index: u64) -> WorkerRegistration;
}

/// Default provisioner: local worker slots named after the host.
pub struct LocalProvisioner {
    hostname: String,
    capacity: u32,
}

impl LocalProvisioner {
    pub fn new(capacity: u32) -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        Self { hostname, capacity }
    }
}

impl WorkerProvisioner for LocalProvisioner {
    fn provision(&self, index: u64) -> WorkerRegistration {
        WorkerRegistration {
            worker_id: format!("{}-worker-{}", self.hostname, index),
            hostname: self.hostname.clone(),
            max_concurrent_tasks: self.capacity,
        }
    }
}

/// Grows and shrinks the worker set within configured bounds based on
/// sampled CPU/memory and the active-task ratio.
pub struct ElasticPoolController {
    config: PoolConfig,
    registry: Arc<WorkerRegistry>,
    sampler: Arc<dyn ResourceSampler>,
    provisioner: Arc<dyn WorkerProvisioner>,
    next_index: AtomicU64,
}

impl ElasticPoolController {
    pub fn new(
        config: PoolConfig,
        registry: Arc<WorkerRegistry>,
        sampler: Arc<dyn ResourceSampler>,
        provisioner: Arc<dyn WorkerProvisioner>,
    ) -> Self {
        Self {
            config,
            registry,
            sampler,
            provisioner,
            next_index: AtomicU64::new(0),
        }
    }

    /// Bring the pool up to `min_workers` before dispatch starts.
    pub async fn ensure_minimum(&self) -> SchedulerResult<()> {
        let current = self.registry.len().await as u32;
        if current < self.config.min_workers {
            self.add_workers(self.config.min_workers - current).await;
        }
        Ok(())
    }

    pub fn sample(&self) -> ResourceSample {
        self.sampler.sample()
    }

    /// Decide scaling from a sample and current registry state. Bounds are
    /// always respected: the returned step is already clamped to
    /// `[min_workers, max_workers]`.
    pub async fn evaluate(&self, sample: &ResourceSample) -> ScaleDecision {
        let worker_count = self.registry.len().await as u32;
        let active_tasks = self.registry.total_load().await;
        let ratio = if worker_count == 0 {
            f64::INFINITY
        } else {
            active_tasks as f64 / worker_count as f64
        };

        let pressured = sample.cpu_percent > self.config.high_watermark_percent
            || sample.memory_percent > self.config.high_watermark_percent
            || ratio > self.config.scale_up_ratio;
        if pressured {
            let headroom = self.config.max_workers.saturating_sub(worker_count);
            let step = self.config.scale_up_step.min(headroom);
            return if step == 0 {
                debug!(worker_count, "scale-up wanted but pool is at max_workers");
                ScaleDecision::NoOp
            } else {
                ScaleDecision::ScaleUp(step)
            };
        }

        let relaxed = sample.cpu_percent < self.config.low_watermark_percent
            && sample.memory_percent < self.config.low_watermark_percent
            && ratio < self.config.scale_down_ratio;
        if relaxed {
            let removable = worker_count.saturating_sub(self.config.min_workers);
            let step = self.config.scale_down_step.min(removable);
            return if step == 0 {
                ScaleDecision::NoOp
            } else {
                ScaleDecision::ScaleDown(step)
            };
        }

        ScaleDecision::NoOp
    }

    /// Apply a decision. Scale-down removes only idle workers; a worker
    /// with in-flight tasks is never touched.
    pub async fn apply(&self, decision: ScaleDecision) {
        match decision {
            ScaleDecision::NoOp => {}
            ScaleDecision::ScaleUp(n) => {
                self.add_workers(n).await;
                let total = self.registry.len().await;
                info!(added = n, total, "pool scaled up");
            }
            ScaleDecision::ScaleDown(n) => {
                let mut removed = 0;
                for id in self.registry.idle_workers().await {
                    if removed >= n {
                        break;
                    }
                    // re-checked under the registry lock: a worker that
                    // picked up a task since the idle listing is skipped
                    match self.registry.unregister_if_idle(&id).await {
                        Ok(true) => removed += 1,
                        Ok(false) => {}
                        Err(e) => warn!(worker_id = %id, error = %e, "scale-down unregister failed"),
                    }
                }
                if removed > 0 {
                    let total = self.registry.len().await;
                    info!(removed, total, "pool scaled down");
                } else {
                    debug!("scale-down requested but no idle workers to remove");
                }
            }
        }
        gauge!("orchestrator_pool_workers").set(self.registry.len().await as f64);
    }

    async fn add_workers(&self, n: u32) {
        for _ in 0..n {
            let index = self.next_index.fetch_add(1, Ordering::Relaxed);
            let registration = self.provisioner.provision(index);
            self.registry.register(registration).await;
        }
    }

    /// Periodic sampling loop; one evaluate/apply per tick.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut tick = interval(Duration::from_secs(self.config.sample_interval_seconds));
        info!(
            min = self.config.min_workers,
            max = self.config.max_workers,
            interval_seconds = self.config.sample_interval_seconds,
            "elastic pool controller started"
        );
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let sample = self.sample();
                    let decision = self.evaluate(&sample).await;
                    if decision != ScaleDecision::NoOp {
                        debug!(
                            cpu = sample.cpu_percent,
                            memory = sample.memory_percent,
                            ?decision,
                            "pool evaluation"
                        );
                    }
                    self.apply(decision).await;
                }
                _ = shutdown.recv() => {
                    info!("elastic pool controller stopping");
                    break;
                }
            }
        }
    }
}
