use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{SchedulerError, SchedulerResult};
use crate::models::{Task, TaskPriority};
use crate::queue::priority_queue::{PriorityQueue, QueueEntry};

/// The three priority lanes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TierKind {
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "NORMAL")]
    Normal,
    #[serde(rename = "LOW")]
    Low,
}

impl TierKind {
    /// Dispatch drain order: all of HIGH before NORMAL, NORMAL before LOW.
    pub const ORDERED: [TierKind; 3] = [TierKind::High, TierKind::Normal, TierKind::Low];

    pub fn for_priority(priority: TaskPriority) -> Self {
        match priority {
            TaskPriority::Critical | TaskPriority::Urgent => TierKind::High,
            TaskPriority::High => TierKind::Normal,
            TaskPriority::Normal | TaskPriority::Low => TierKind::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::High => "high",
            TierKind::Normal => "normal",
            TierKind::Low => "low",
        }
    }
}

/// Read-only tier metrics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierMetrics {
    pub total_enqueued: u64,
    pub completed: u64,
    pub failed: u64,
    pub current_depth: usize,
    pub max_depth_seen: usize,
    pub throughput_per_minute: usize,
}

const THROUGHPUT_WINDOW: Duration = Duration::from_secs(60);

/// A single priority lane: one indexed queue plus its counters.
#[derive(Debug)]
pub struct QueueTier {
    kind: TierKind,
    max_depth: usize,
    queue: PriorityQueue,
    total_enqueued: u64,
    completed: u64,
    failed: u64,
    max_depth_seen: usize,
    completions: VecDeque<Instant>,
}

impl QueueTier {
    pub fn new(kind: TierKind, max_depth: usize) -> Self {
        Self {
            kind,
            max_depth,
            queue: PriorityQueue::new(),
            total_enqueued: 0,
            completed: 0,
            failed: 0,
            max_depth_seen: 0,
            completions: VecDeque::new(),
        }
    }

    pub fn kind(&self) -> TierKind {
        self.kind
    }

    pub fn depth(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.max_depth
    }

    pub fn enqueue(&mut self, task: Task) -> SchedulerResult<()> {
        self.requeue(task)?;
        self.total_enqueued += 1;
        Ok(())
    }

    /// Re-admit work this tier already counted once (a reclaim or a retry
    /// release). Only the hard depth limit applies.
    pub fn requeue(&mut self, task: Task) -> SchedulerResult<()> {
        if self.queue.len() >= self.max_depth {
            return Err(SchedulerError::QueueFull {
                scope: self.kind.as_str().to_string(),
                depth: self.queue.len(),
                limit: self.max_depth,
            });
        }
        let weight = task.priority.weight();
        self.queue.push(task, weight);
        self.max_depth_seen = self.max_depth_seen.max(self.queue.len());
        Ok(())
    }

    pub fn dequeue(&mut self) -> Option<QueueEntry> {
        self.queue.pop()
    }

    /// Put a popped entry back at the front of its priority band.
    pub fn restore(&mut self, entry: QueueEntry) {
        self.queue.restore(entry);
        self.max_depth_seen = self.max_depth_seen.max(self.queue.len());
    }

    pub fn remove(&mut self, id: &Uuid) -> Option<Task> {
        self.queue.remove(id)
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.queue.contains(id)
    }

    pub fn record_completed(&mut self) {
        self.completed += 1;
        let now = Instant::now();
        self.completions.push_back(now);
        self.prune_completions(now);
    }

    pub fn record_failed(&mut self) {
        self.failed += 1;
    }

    pub fn metrics(&mut self) -> TierMetrics {
        self.prune_completions(Instant::now());
        TierMetrics {
            total_enqueued: self.total_enqueued,
            completed: self.completed,
            failed: self.failed,
            current_depth: self.queue.len(),
            max_depth_seen: self.max_depth_seen,
            throughput_per_minute: self.completions.len(),
        }
    }

    fn prune_completions(&mut self, now: Instant) {
        while let Some(front) = self.completions.front() {
            if now.duration_since(*front) > THROUGHPUT_WINDOW {
                self.completions.pop_front();
            } else {
                break;
            }
        }
    }
}
