pub mod circuit_breaker;
pub mod config;
pub mod errors;
pub mod models;
pub mod queue;
pub mod traits;

pub use circuit_breaker::{
    CallAdmission, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
};
pub use config::{
    CircuitBreakerSettings, DispatcherConfig, EngineConfig, HeartbeatConfig, PoolConfig,
    QueueConfig, RetryConfig,
};
pub use errors::{SchedulerError, SchedulerResult};
pub use models::{
    Task, TaskFailure, TaskPriority, TaskResult, TaskSpec, TaskStatus, WorkerHeartbeat,
    WorkerInfo, WorkerRegistration, WorkerStatus,
};
pub use queue::{ManagerStatus, QueueEntry, QueueSnapshot, TierKind, TierManager, TierMetrics};
pub use traits::{ModeSelector, TaskExecutor, TaskSink};
