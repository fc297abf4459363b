use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerSettings;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CircuitState {
    /// Closed - normal operation
    #[serde(rename = "CLOSED")]
    Closed,
    /// Open - calls are blocked until the recovery timeout elapses
    #[serde(rename = "OPEN")]
    Open,
    /// Half-open - a single trial call probes the downstream
    #[serde(rename = "HALF_OPEN")]
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before a half-open probe
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            recovery_timeout: Duration::from_secs(settings.recovery_timeout_seconds),
        }
    }
}

/// How [`CircuitBreaker::admit`] classified a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallAdmission {
    /// The circuit is open (or a probe is already out); fail fast.
    Denied,
    /// Normal closed-circuit call.
    Allowed,
    /// This call is the single half-open trial; its outcome (or
    /// abandonment) must be reported back.
    Probe,
}

/// Serializable breaker statistics for status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    total_calls: u64,
    successful_calls: u64,
    failed_calls: u64,
    /// When the open window ends; set on every transition to Open.
    recover_at: Option<Instant>,
    /// True while the single half-open probe is outstanding.
    probe_in_flight: bool,
}

/// Shields the system from a degraded downstream by failing fast after
/// repeated execution failures.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: RwLock<BreakerInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                total_calls: 0,
                successful_calls: 0,
                failed_calls: 0,
                recover_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Whether a call may go out right now. In the half-open state exactly
    /// one caller is let through as a trial; everyone else is refused until
    /// the probe reports back.
    pub async fn allow(&self) -> bool {
        self.admit().await != CallAdmission::Denied
    }

    /// Like [`allow`](Self::allow), but tells the caller whether it has
    /// taken the half-open probe permit. A probe that will never report a
    /// verdict must call [`abandon_probe`](Self::abandon_probe), or the
    /// breaker stays half-open refusing every call.
    pub async fn admit(&self) -> CallAdmission {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed => CallAdmission::Allowed,
            CircuitState::Open => {
                let recovered = inner
                    .recover_at
                    .is_some_and(|at| Instant::now() >= at);
                if recovered {
                    debug!("circuit breaker recovery timeout elapsed, entering half-open");
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    CallAdmission::Probe
                } else {
                    CallAdmission::Denied
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    CallAdmission::Denied
                } else {
                    inner.probe_in_flight = true;
                    CallAdmission::Probe
                }
            }
        }
    }

    /// Release the probe permit for a trial call that was abandoned
    /// without a verdict, e.g. its assignment was reclaimed from an
    /// unresponsive worker. A new trial may then go out.
    pub async fn abandon_probe(&self) {
        let mut inner = self.inner.write().await;
        if inner.state == CircuitState::HalfOpen && inner.probe_in_flight {
            warn!("half-open probe abandoned without a verdict, permitting a new trial");
            inner.probe_in_flight = false;
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        inner.total_calls += 1;
        inner.successful_calls += 1;
        inner.consecutive_failures = 0;
        if inner.state != CircuitState::Closed {
            info!("circuit breaker closed after successful probe");
        }
        inner.state = CircuitState::Closed;
        inner.recover_at = None;
        inner.probe_in_flight = false;
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.write().await;
        inner.total_calls += 1;
        inner.failed_calls += 1;
        inner.consecutive_failures += 1;
        match inner.state {
            CircuitState::HalfOpen => {
                warn!("half-open probe failed, reopening circuit");
                self.open(&mut inner);
            }
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        failures = inner.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "failure threshold reached, opening circuit"
                    );
                    self.open(&mut inner);
                }
            }
            // failures reported while already open (in-flight stragglers)
            // keep the window as-is
            CircuitState::Open => {}
        }
    }

    fn open(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Open;
        inner.recover_at = Some(Instant::now() + self.config.recovery_timeout);
        inner.probe_in_flight = false;
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }

    pub async fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.read().await;
        CircuitBreakerStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_calls: inner.total_calls,
            successful_calls: inner.successful_calls,
            failed_calls: inner.failed_calls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, pause};

    fn breaker(threshold: u32, timeout_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: Duration::from_secs(timeout_secs),
        })
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let cb = breaker(5, 60);
        for _ in 0..4 {
            cb.record_failure().await;
            assert!(cb.allow().await);
        }
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(!cb.allow().await);
    }

    #[tokio::test]
    async fn success_resets_consecutive_failures() {
        let cb = breaker(3, 60);
        cb.record_failure().await;
        cb.record_failure().await;
        cb.record_success().await;
        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert!(cb.allow().await);
    }

    #[tokio::test]
    async fn half_open_admits_exactly_one_probe() {
        pause();
        let cb = breaker(1, 30);
        cb.record_failure().await;
        assert!(!cb.allow().await);

        advance(Duration::from_secs(31)).await;
        assert!(cb.allow().await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        // second caller is refused while the probe is outstanding
        assert!(!cb.allow().await);
    }

    #[tokio::test]
    async fn closes_on_probe_success() {
        pause();
        let cb = breaker(2, 10);
        cb.record_failure().await;
        cb.record_failure().await;
        advance(Duration::from_secs(11)).await;
        assert!(cb.allow().await);
        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert!(cb.allow().await);
        let stats = cb.stats().await;
        assert_eq!(stats.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn admit_classifies_probe_calls() {
        pause();
        let cb = breaker(1, 30);
        assert_eq!(cb.admit().await, CallAdmission::Allowed);
        cb.record_failure().await;
        assert_eq!(cb.admit().await, CallAdmission::Denied);

        advance(Duration::from_secs(31)).await;
        assert_eq!(cb.admit().await, CallAdmission::Probe);
        assert_eq!(cb.admit().await, CallAdmission::Denied);
    }

    #[tokio::test]
    async fn abandoned_probe_permits_a_new_trial() {
        pause();
        let cb = breaker(1, 30);
        cb.record_failure().await;
        advance(Duration::from_secs(31)).await;
        assert_eq!(cb.admit().await, CallAdmission::Probe);
        assert!(!cb.allow().await);

        // the trial never reports back; releasing its permit lets the
        // breaker send out another trial instead of refusing every call
        cb.abandon_probe().await;
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        assert_eq!(cb.admit().await, CallAdmission::Probe);
        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn abandon_probe_is_a_noop_outside_half_open() {
        let cb = breaker(5, 30);
        cb.abandon_probe().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert!(cb.allow().await);
    }

    #[tokio::test]
    async fn reopens_on_probe_failure() {
        pause();
        let cb = breaker(2, 10);
        cb.record_failure().await;
        cb.record_failure().await;
        advance(Duration::from_secs(11)).await;
        assert!(cb.allow().await);
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        // fresh recovery window
        assert!(!cb.allow().await);
        advance(Duration::from_secs(11)).await;
        assert!(cb.allow().await);
    }
}
