use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{SchedulerError, SchedulerResult};

/// Queue tier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum live entries per tier.
    pub max_depth_per_tier: usize,
    /// Fraction of total capacity at which the manager goes OVERLOADED.
    pub overload_high_watermark: f64,
    /// Fraction below which an OVERLOADED manager returns to ACTIVE.
    pub overload_low_watermark: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_depth_per_tier: 10_000,
            overload_high_watermark: 0.9,
            overload_low_watermark: 0.5,
        }
    }
}

/// Dispatch loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Idle sleep between dispatch cycles when no work was found.
    pub poll_interval_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
        }
    }
}

/// Retry policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Hard cap on the exponential backoff delay.
    pub backoff_cap_seconds: u64,
    /// Random jitter applied on top of the capped delay (0.0-1.0).
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_cap_seconds: 300,
            jitter_factor: 0.1,
        }
    }
}

/// Worker liveness settings. A worker is considered stale after
/// `3 x heartbeat_interval_seconds` without a heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub heartbeat_interval_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl HeartbeatConfig {
    pub fn stale_timeout_seconds(&self) -> i64 {
        (self.heartbeat_interval_seconds * 3) as i64
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: 30,
            sweep_interval_seconds: 30,
        }
    }
}

/// Elastic pool sizing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub min_workers: u32,
    pub max_workers: u32,
    /// Workers added per scale-up action.
    pub scale_up_step: u32,
    /// Workers removed per scale-down action.
    pub scale_down_step: u32,
    /// CPU/memory percentage above which the pool grows.
    pub high_watermark_percent: f64,
    /// CPU/memory percentage below which the pool may shrink.
    pub low_watermark_percent: f64,
    /// active tasks / worker count ratio above which the pool grows.
    pub scale_up_ratio: f64,
    /// Ratio below which the pool may shrink.
    pub scale_down_ratio: f64,
    pub sample_interval_seconds: u64,
    /// Concurrency of each provisioned worker slot.
    pub worker_capacity: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 50,
            scale_up_step: 5,
            scale_down_step: 3,
            high_watermark_percent: 80.0,
            low_watermark_percent: 20.0,
            scale_up_ratio: 2.0,
            scale_down_ratio: 0.5,
            sample_interval_seconds: 30,
            worker_capacity: 4,
        }
    }
}

/// Circuit breaker settings (serializable counterpart of
/// [`crate::circuit_breaker::CircuitBreakerConfig`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout_seconds: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_seconds: 60,
        }
    }
}

/// Aggregated engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub queue: QueueConfig,
    pub dispatcher: DispatcherConfig,
    pub retry: RetryConfig,
    pub heartbeat: HeartbeatConfig,
    pub pool: PoolConfig,
    pub circuit_breaker: CircuitBreakerSettings,
}

impl EngineConfig {
    /// Load configuration from an optional file plus `ORCHESTRATOR_*`
    /// environment overrides (e.g. `ORCHESTRATOR_POOL__MAX_WORKERS=20`).
    pub fn load(path: Option<&Path>) -> SchedulerResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("ORCHESTRATOR").separator("__"),
        );
        let cfg: EngineConfig = builder
            .build()
            .map_err(|e| SchedulerError::Configuration(e.to_string()))?
            .try_deserialize()
            .map_err(|e| SchedulerError::Configuration(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        if self.queue.max_depth_per_tier == 0 {
            return Err(SchedulerError::Configuration(
                "queue.max_depth_per_tier must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.queue.overload_high_watermark)
            || !(0.0..=1.0).contains(&self.queue.overload_low_watermark)
        {
            return Err(SchedulerError::Configuration(
                "queue overload watermarks must be within [0.0, 1.0]".to_string(),
            ));
        }
        if self.queue.overload_low_watermark >= self.queue.overload_high_watermark {
            return Err(SchedulerError::Configuration(
                "queue.overload_low_watermark must be below overload_high_watermark".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(SchedulerError::Configuration(
                "retry.jitter_factor must be within [0.0, 1.0]".to_string(),
            ));
        }
        if self.heartbeat.heartbeat_interval_seconds == 0
            || self.heartbeat.sweep_interval_seconds == 0
        {
            return Err(SchedulerError::Configuration(
                "heartbeat intervals must be positive".to_string(),
            ));
        }
        if self.pool.min_workers > self.pool.max_workers {
            return Err(SchedulerError::Configuration(format!(
                "pool.min_workers ({}) exceeds pool.max_workers ({})",
                self.pool.min_workers, self.pool.max_workers
            )));
        }
        if self.pool.scale_up_step == 0 || self.pool.scale_down_step == 0 {
            return Err(SchedulerError::Configuration(
                "pool scale steps must be positive".to_string(),
            ));
        }
        if self.pool.low_watermark_percent >= self.pool.high_watermark_percent {
            return Err(SchedulerError::Configuration(
                "pool.low_watermark_percent must be below high_watermark_percent".to_string(),
            ));
        }
        if self.pool.worker_capacity == 0 {
            return Err(SchedulerError::Configuration(
                "pool.worker_capacity must be positive".to_string(),
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(SchedulerError::Configuration(
                "circuit_breaker.failure_threshold must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
