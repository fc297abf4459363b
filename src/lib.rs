//! Task scheduling and execution core for a multi-agent processing
//! platform.
//!
//! Tasks enter through [`SchedulerEngine::submit`], land in one of three
//! priority tiers, and are dispatched to the least loaded eligible worker.
//! Failures flow through a circuit breaker and a retry coordinator with
//! demotion, exponential backoff and a dead-letter store; an elastic pool
//! controller sizes the worker pool from resource samples.

pub mod engine;
pub mod logging;

pub use engine::{EngineStatus, SchedulerEngine};
pub use logging::{init_logging, LogFormat};

pub use orchestrator_core::{
    CircuitBreakerStats, CircuitState, EngineConfig, ManagerStatus, ModeSelector, QueueSnapshot,
    SchedulerError, SchedulerResult, Task, TaskExecutor, TaskPriority, TaskResult, TaskSink,
    TaskSpec, TaskStatus, TierKind, WorkerHeartbeat, WorkerInfo, WorkerRegistration, WorkerStatus,
};
pub use orchestrator_dispatcher::{CancelOutcome, RetryDecision};
pub use orchestrator_worker::{
    ResourceSample, ResourceSampler, ScaleDecision, StaticSampler, WorkerCounts, WorkerProvisioner,
};
