use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Priority levels, ordered from lowest to highest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskPriority {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "NORMAL")]
    Normal,
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "URGENT")]
    Urgent,
    #[serde(rename = "CRITICAL")]
    Critical,
}

impl TaskPriority {
    /// Numeric weight used for heap ordering.
    pub fn weight(&self) -> u8 {
        match self {
            TaskPriority::Critical => 100,
            TaskPriority::Urgent => 90,
            TaskPriority::High => 80,
            TaskPriority::Normal => 50,
            TaskPriority::Low => 20,
        }
    }

    /// One step down, floored at LOW.
    pub fn demoted(&self) -> Self {
        match self {
            TaskPriority::Critical => TaskPriority::Urgent,
            TaskPriority::Urgent => TaskPriority::High,
            TaskPriority::High => TaskPriority::Normal,
            TaskPriority::Normal | TaskPriority::Low => TaskPriority::Low,
        }
    }
}

/// Task lifecycle states
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "ASSIGNED")]
    Assigned,
    #[serde(rename = "PROCESSING")]
    Processing,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "DEAD_LETTERED")]
    DeadLettered,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::DeadLettered
        )
    }
}

/// One failed attempt, retained on the task as failure history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailure {
    pub attempt: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Submission parameters for a new task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub kind: String,
    pub priority: TaskPriority,
    pub payload: serde_json::Value,
    pub max_retries: Option<u32>,
    pub deadline: Option<DateTime<Utc>>,
}

impl TaskSpec {
    pub fn new(kind: impl Into<String>, priority: TaskPriority, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            priority,
            payload,
            max_retries: None,
            deadline: None,
        }
    }
}

/// Result handed back by the executor collaborator. The scheduler never
/// interprets `output`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub output: serde_json::Value,
}

/// Unit of work moving through the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub kind: String,
    pub priority: TaskPriority,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    /// Processing-mode label from the mode-selection collaborator, opaque here.
    pub mode: Option<String>,
    pub result: Option<TaskResult>,
    pub failure_history: Vec<TaskFailure>,
}

pub const DEFAULT_MAX_RETRIES: u32 = 3;

impl Task {
    pub fn new(spec: TaskSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: spec.kind,
            priority: spec.priority,
            payload: spec.payload,
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retries: spec.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            created_at: Utc::now(),
            deadline: spec.deadline,
            mode: None,
            result: None,
            failure_history: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|d| now > d)
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count > self.max_retries
    }

    /// Append a failure record for the current attempt.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.failure_history.push(TaskFailure {
            attempt: self.retry_count,
            error: error.into(),
            failed_at: Utc::now(),
        });
    }

    pub fn last_error(&self) -> Option<&str> {
        self.failure_history.last().map(|f| f.error.as_str())
    }
}
