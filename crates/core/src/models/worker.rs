use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Worker status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkerStatus {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "IDLE")]
    Idle,
    #[serde(rename = "OVERLOADED")]
    Overloaded,
    #[serde(rename = "UNRESPONSIVE")]
    Unresponsive,
}

/// Worker registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub worker_id: String,
    pub hostname: String,
    pub max_concurrent_tasks: u32,
}

/// Worker heartbeat report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    pub worker_id: String,
    pub timestamp: DateTime<Utc>,
}

impl WorkerHeartbeat {
    pub fn now(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            timestamp: Utc::now(),
        }
    }
}

/// An execution slot tracked by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: String,
    pub hostname: String,
    pub max_concurrent_tasks: u32,
    pub current_load: u32,
    pub status: WorkerStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl WorkerInfo {
    pub fn new(registration: WorkerRegistration) -> Self {
        let now = Utc::now();
        Self {
            id: registration.worker_id,
            hostname: registration.hostname,
            max_concurrent_tasks: registration.max_concurrent_tasks.max(1),
            current_load: 0,
            status: WorkerStatus::Idle,
            last_heartbeat: now,
            registered_at: now,
        }
    }

    /// A worker may receive new assignments unless it is unresponsive or
    /// already at capacity.
    pub fn is_eligible(&self) -> bool {
        self.status != WorkerStatus::Unresponsive
            && self.current_load < self.max_concurrent_tasks
    }

    pub fn is_idle(&self) -> bool {
        self.current_load == 0 && self.status != WorkerStatus::Unresponsive
    }

    pub fn load_ratio(&self) -> f64 {
        if self.max_concurrent_tasks == 0 {
            0.0
        } else {
            self.current_load as f64 / self.max_concurrent_tasks as f64
        }
    }

    /// Re-derive ACTIVE/IDLE/OVERLOADED from the current load. Does not
    /// touch an UNRESPONSIVE marker; only a heartbeat revives those.
    pub fn refresh_status(&mut self) {
        if self.status == WorkerStatus::Unresponsive {
            return;
        }
        self.status = if self.current_load == 0 {
            WorkerStatus::Idle
        } else if self.current_load >= self.max_concurrent_tasks {
            WorkerStatus::Overloaded
        } else {
            WorkerStatus::Active
        };
    }

    pub fn is_heartbeat_expired(&self, timeout_seconds: i64, now: DateTime<Utc>) -> bool {
        (now - self.last_heartbeat).num_seconds() > timeout_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(max: u32) -> WorkerInfo {
        WorkerInfo::new(WorkerRegistration {
            worker_id: "w-1".to_string(),
            hostname: "host-a".to_string(),
            max_concurrent_tasks: max,
        })
    }

    #[test]
    fn fresh_worker_is_eligible() {
        let w = worker(4);
        assert_eq!(w.status, WorkerStatus::Idle);
        assert!(w.is_eligible());
        assert!(w.is_idle());
    }

    #[test]
    fn full_worker_is_not_eligible() {
        let mut w = worker(2);
        w.current_load = 2;
        w.refresh_status();
        assert_eq!(w.status, WorkerStatus::Overloaded);
        assert!(!w.is_eligible());
    }

    #[test]
    fn unresponsive_worker_is_not_eligible() {
        let mut w = worker(4);
        w.status = WorkerStatus::Unresponsive;
        assert!(!w.is_eligible());
        // load accounting must not resurrect it
        w.refresh_status();
        assert_eq!(w.status, WorkerStatus::Unresponsive);
    }

    #[test]
    fn heartbeat_expiry() {
        let mut w = worker(4);
        let now = Utc::now();
        assert!(!w.is_heartbeat_expired(90, now));
        w.last_heartbeat = now - chrono::Duration::seconds(91);
        assert!(w.is_heartbeat_expired(90, now));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let w = worker(0);
        assert_eq!(w.max_concurrent_tasks, 1);
    }
}
