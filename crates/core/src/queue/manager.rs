use std::collections::HashMap;

use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::errors::{SchedulerError, SchedulerResult};
use crate::models::Task;
use crate::queue::priority_queue::QueueEntry;
use crate::queue::tier::{QueueTier, TierKind, TierMetrics};

/// Global manager status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ManagerStatus {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "OVERLOADED")]
    Overloaded,
    #[serde(rename = "PAUSED")]
    Paused,
}

/// Snapshot of queue state for status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub status: ManagerStatus,
    pub total_depth: usize,
    pub tiers: HashMap<TierKind, TierMetrics>,
}

struct Inner {
    status: ManagerStatus,
    high: QueueTier,
    normal: QueueTier,
    low: QueueTier,
}

impl Inner {
    fn tier_mut(&mut self, kind: TierKind) -> &mut QueueTier {
        match kind {
            TierKind::High => &mut self.high,
            TierKind::Normal => &mut self.normal,
            TierKind::Low => &mut self.low,
        }
    }

    fn total_depth(&self) -> usize {
        self.high.depth() + self.normal.depth() + self.low.depth()
    }

    fn total_capacity(&self) -> usize {
        self.high.capacity() + self.normal.capacity() + self.low.capacity()
    }

    /// Overload hysteresis: above the high watermark the manager stops
    /// accepting new work; it re-opens only once depth falls below the low
    /// watermark. A PAUSED manager is left alone.
    fn update_overload(&mut self, config: &QueueConfig) {
        if self.status == ManagerStatus::Paused {
            return;
        }
        let depth = self.total_depth() as f64;
        let capacity = self.total_capacity() as f64;
        match self.status {
            ManagerStatus::Active if depth >= capacity * config.overload_high_watermark => {
                warn!(
                    depth = depth as usize,
                    capacity = capacity as usize,
                    "queue manager overloaded, rejecting new enqueues"
                );
                self.status = ManagerStatus::Overloaded;
            }
            ManagerStatus::Overloaded if depth < capacity * config.overload_low_watermark => {
                debug!(depth = depth as usize, "queue manager back to active");
                self.status = ManagerStatus::Active;
            }
            _ => {}
        }
    }
}

/// Routes tasks into the three tiers and owns them while PENDING.
pub struct TierManager {
    config: QueueConfig,
    inner: RwLock<Inner>,
}

impl TierManager {
    pub fn new(config: QueueConfig) -> Self {
        let max_depth = config.max_depth_per_tier;
        Self {
            config,
            inner: RwLock::new(Inner {
                status: ManagerStatus::Active,
                high: QueueTier::new(TierKind::High, max_depth),
                normal: QueueTier::new(TierKind::Normal, max_depth),
                low: QueueTier::new(TierKind::Low, max_depth),
            }),
        }
    }

    /// Enqueue a task into the tier matching its priority. Rejected while
    /// OVERLOADED; PAUSED only halts dispatch, not intake.
    pub async fn enqueue(&self, task: Task) -> SchedulerResult<()> {
        let mut inner = self.inner.write().await;
        if inner.status == ManagerStatus::Overloaded {
            return Err(SchedulerError::QueueFull {
                scope: "manager".to_string(),
                depth: inner.total_depth(),
                limit: inner.total_capacity(),
            });
        }
        let kind = TierKind::for_priority(task.priority);
        inner.tier_mut(kind).enqueue(task)?;
        inner.update_overload(&self.config);
        counter!("orchestrator_tasks_enqueued_total", "tier" => kind.as_str()).increment(1);
        gauge!("orchestrator_queue_depth", "tier" => kind.as_str())
            .set(inner.tier_mut(kind).depth() as f64);
        Ok(())
    }

    /// Return previously accepted work (a reclaimed or retried task) to
    /// its tier. Bypasses the overload gate, like [`restore`](Self::restore):
    /// only the hard per-tier depth limit applies, and the tier's enqueue
    /// counter is left untouched.
    pub async fn requeue(&self, task: Task) -> SchedulerResult<()> {
        let mut inner = self.inner.write().await;
        let kind = TierKind::for_priority(task.priority);
        inner.tier_mut(kind).requeue(task)?;
        inner.update_overload(&self.config);
        gauge!("orchestrator_queue_depth", "tier" => kind.as_str())
            .set(inner.tier_mut(kind).depth() as f64);
        Ok(())
    }

    /// Pop from the highest non-empty tier, strictly high before normal
    /// before low.
    pub async fn dequeue(&self) -> Option<QueueEntry> {
        let mut inner = self.inner.write().await;
        for kind in TierKind::ORDERED {
            if let Some(entry) = inner.tier_mut(kind).dequeue() {
                inner.update_overload(&self.config);
                gauge!("orchestrator_queue_depth", "tier" => kind.as_str())
                    .set(inner.tier_mut(kind).depth() as f64);
                return Some(entry);
            }
        }
        None
    }

    /// Pop from one specific tier.
    pub async fn dequeue_tier(&self, kind: TierKind) -> Option<QueueEntry> {
        let mut inner = self.inner.write().await;
        let entry = inner.tier_mut(kind).dequeue();
        if entry.is_some() {
            inner.update_overload(&self.config);
        }
        entry
    }

    /// Return a popped entry to the front of its tier. Bypasses the
    /// overload gate: this is work the manager already accepted.
    pub async fn restore(&self, entry: QueueEntry) {
        let mut inner = self.inner.write().await;
        let kind = TierKind::for_priority(entry.task.priority);
        inner.tier_mut(kind).restore(entry);
    }

    /// Cancel a PENDING task via lazy tombstone. Accepted in every manager
    /// state, including OVERLOADED.
    pub async fn cancel(&self, id: &Uuid) -> Option<Task> {
        let mut inner = self.inner.write().await;
        for kind in TierKind::ORDERED {
            if let Some(task) = inner.tier_mut(kind).remove(id) {
                inner.update_overload(&self.config);
                counter!("orchestrator_tasks_cancelled_total", "tier" => kind.as_str())
                    .increment(1);
                return Some(task);
            }
        }
        None
    }

    pub async fn contains(&self, id: &Uuid) -> bool {
        let mut inner = self.inner.write().await;
        TierKind::ORDERED
            .iter()
            .any(|kind| inner.tier_mut(*kind).contains(id))
    }

    pub async fn record_completed(&self, kind: TierKind) {
        let mut inner = self.inner.write().await;
        inner.tier_mut(kind).record_completed();
        counter!("orchestrator_tasks_completed_total", "tier" => kind.as_str()).increment(1);
    }

    pub async fn record_failed(&self, kind: TierKind) {
        let mut inner = self.inner.write().await;
        inner.tier_mut(kind).record_failed();
        counter!("orchestrator_tasks_failed_total", "tier" => kind.as_str()).increment(1);
    }

    pub async fn status(&self) -> ManagerStatus {
        self.inner.read().await.status
    }

    pub async fn pause(&self) {
        let mut inner = self.inner.write().await;
        inner.status = ManagerStatus::Paused;
    }

    pub async fn resume(&self) {
        let mut inner = self.inner.write().await;
        inner.status = ManagerStatus::Active;
        inner.update_overload(&self.config);
    }

    pub async fn total_depth(&self) -> usize {
        self.inner.read().await.total_depth()
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        let mut inner = self.inner.write().await;
        let mut tiers = HashMap::new();
        for kind in TierKind::ORDERED {
            tiers.insert(kind, inner.tier_mut(kind).metrics());
        }
        QueueSnapshot {
            status: inner.status,
            total_depth: inner.total_depth(),
            tiers,
        }
    }
}
