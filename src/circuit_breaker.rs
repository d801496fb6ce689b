//! Circuit Breaker implementation
//!
//! Per-service-key state machine (CLOSED → OPEN → HALF_OPEN → CLOSED) that
//! tracks rolling failure statistics and decides whether a request to a
//! downstream dependency is allowed. A circuit opens on a run of
//! consecutive failures or on a high error percentage within a sliding
//! window, and probes for recovery after a reset timeout even when no
//! further traffic arrives.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::metrics::{MetricsSink, NoopMetrics};

/// Circuit breaker state
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, requests are allowed
    Closed,
    /// Circuit is open, requests are rejected
    Open,
    /// Testing if the service is healthy again
    HalfOpen,
}

impl Default for CircuitState {
    fn default() -> Self {
        Self::Closed
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit from closed
    pub failure_threshold: u32,
    /// Consecutive successes required to close the circuit from half-open
    pub success_threshold: u32,
    /// Time to keep the circuit open before probing, in milliseconds
    pub reset_timeout_ms: u64,
    /// Width of the sliding window used for the error percentage, in milliseconds
    pub monitoring_period_ms: u64,
    /// Minimum requests in the window before the error percentage can trip the circuit
    pub volume_threshold: usize,
    /// Error percentage within the window that opens the circuit (0-100)
    pub error_percentage_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout_ms: 60_000,
            monitoring_period_ms: 60_000,
            volume_threshold: 10,
            error_percentage_threshold: 50,
        }
    }
}

/// One outcome in the sliding window
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WindowEntry {
    /// Epoch milliseconds of the outcome
    pub timestamp: u64,
    /// Whether the request succeeded
    pub success: bool,
}

/// Statistics for a single service key
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Current state
    pub state: CircuitState,
    /// Lifetime failure count
    pub failures: u64,
    /// Lifetime success count
    pub successes: u64,
    /// Lifetime request count
    pub total_requests: u64,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Successes since the last failure
    pub consecutive_successes: u32,
    /// Epoch milliseconds of the most recent failure
    pub last_failure_time: Option<u64>,
    /// Epoch milliseconds of the most recent success
    pub last_success_time: Option<u64>,
    /// Rounded failure percentage over the sliding window
    pub error_percentage: u32,
    /// Epoch milliseconds after which an open circuit may probe; present only while open
    pub next_attempt: Option<u64>,
    /// Outcomes within the monitoring period
    pub window: Vec<WindowEntry>,
}

type StateChangeHook = dyn Fn(CircuitState, CircuitState, &str) + Send + Sync;

/// Circuit breaker implementation
///
/// Cheap to clone; clones share state. Stats for a service key are created
/// lazily on first use and live for the life of the process (or until
/// [`CircuitBreaker::reset`] / [`CircuitBreaker::destroy`]).
#[derive(Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    stats: Arc<RwLock<HashMap<String, ServiceStats>>>,
    timers: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    metrics: Arc<dyn MetricsSink>,
    on_state_change: Option<Arc<StateChangeHook>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_metrics(config, Arc::new(NoopMetrics))
    }

    /// Create a new circuit breaker reporting to the given sink
    pub fn with_metrics(config: CircuitBreakerConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            config: Arc::new(config),
            stats: Arc::new(RwLock::new(HashMap::new())),
            timers: Arc::new(Mutex::new(HashMap::new())),
            metrics,
            on_state_change: None,
        }
    }

    /// Register a hook invoked on every state transition with
    /// `(old_state, new_state, service)`.
    pub fn on_state_change<F>(mut self, hook: F) -> Self
    where
        F: Fn(CircuitState, CircuitState, &str) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(hook));
        self
    }

    /// Check if a request is allowed
    ///
    /// An open circuit whose reset timeout has elapsed transitions to
    /// half-open here and lets the triggering call through as the probe.
    pub async fn allow_request(&self, service: &str) -> bool {
        let mut map = self.stats.write().await;
        let stats = map.entry(service.to_string()).or_default();
        let now = now_millis();

        clean_window(stats, now, self.config.monitoring_period_ms);

        match stats.state {
            CircuitState::Closed => true,
            CircuitState::Open => match stats.next_attempt {
                Some(next_attempt) if now >= next_attempt => {
                    self.transition_to_half_open(service, stats);
                    true
                }
                _ => false,
            },
            CircuitState::HalfOpen => true,
        }
    }

    /// Record a successful request
    pub async fn record_success(&self, service: &str) {
        let mut map = self.stats.write().await;
        let stats = map.entry(service.to_string()).or_default();
        let now = now_millis();

        stats.successes += 1;
        stats.total_requests += 1;
        stats.last_success_time = Some(now);
        stats.consecutive_successes += 1;
        stats.consecutive_failures = 0;

        stats.window.push(WindowEntry {
            timestamp: now,
            success: true,
        });
        clean_window(stats, now, self.config.monitoring_period_ms);
        update_error_percentage(stats);

        if stats.state == CircuitState::HalfOpen
            && stats.consecutive_successes >= self.config.success_threshold
        {
            self.transition_to_closed(service, stats).await;
        }

        self.emit_gauges(service, stats);
    }

    /// Record a failed request
    pub async fn record_failure(&self, service: &str, error: Option<&str>) {
        let mut map = self.stats.write().await;
        let stats = map.entry(service.to_string()).or_default();
        let now = now_millis();

        stats.failures += 1;
        stats.total_requests += 1;
        stats.last_failure_time = Some(now);
        stats.consecutive_failures += 1;
        stats.consecutive_successes = 0;

        stats.window.push(WindowEntry {
            timestamp: now,
            success: false,
        });
        clean_window(stats, now, self.config.monitoring_period_ms);
        update_error_percentage(stats);

        warn!(
            service,
            consecutive_failures = stats.consecutive_failures,
            error_percentage = stats.error_percentage,
            state = %stats.state,
            error = ?error,
            "service failure recorded"
        );

        match stats.state {
            CircuitState::Closed => {
                if self.should_open_circuit(stats) {
                    self.transition_to_open(service, stats).await;
                }
            }
            // A single failure while probing reopens the circuit
            CircuitState::HalfOpen => self.transition_to_open(service, stats).await,
            CircuitState::Open => {}
        }

        self.emit_gauges(service, stats);
    }

    /// Get current state for a service
    pub async fn get_state(&self, service: &str) -> CircuitState {
        self.stats
            .write()
            .await
            .entry(service.to_string())
            .or_default()
            .state
    }

    /// Get a snapshot of the statistics for a service
    pub async fn get_stats(&self, service: &str) -> ServiceStats {
        self.stats
            .write()
            .await
            .entry(service.to_string())
            .or_default()
            .clone()
    }

    /// Get snapshots for every service seen so far
    pub async fn get_all_stats(&self) -> HashMap<String, ServiceStats> {
        self.stats.read().await.clone()
    }

    /// Reset a service: zero all counters, clear the window, force closed
    pub async fn reset(&self, service: &str) {
        let mut map = self.stats.write().await;
        let stats = map.entry(service.to_string()).or_default();

        stats.failures = 0;
        stats.successes = 0;
        stats.total_requests = 0;
        stats.consecutive_failures = 0;
        stats.consecutive_successes = 0;
        stats.error_percentage = 0;
        stats.window.clear();

        if stats.state != CircuitState::Closed {
            self.transition_to_closed(service, stats).await;
        }

        info!(service, "circuit breaker reset");
    }

    /// Force the circuit open, bypassing the normal transition conditions
    pub async fn force_open(&self, service: &str) {
        let mut map = self.stats.write().await;
        let stats = map.entry(service.to_string()).or_default();
        self.transition_to_open(service, stats).await;
    }

    /// Force the circuit closed, bypassing the normal transition conditions
    pub async fn force_close(&self, service: &str) {
        let mut map = self.stats.write().await;
        let stats = map.entry(service.to_string()).or_default();
        self.transition_to_closed(service, stats).await;
    }

    /// Cancel all pending timers and drop all per-service state
    pub async fn destroy(&self) {
        let mut timers = self.timers.lock().await;
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        drop(timers);

        self.stats.write().await.clear();
    }

    /// Check if circuit should open
    fn should_open_circuit(&self, stats: &ServiceStats) -> bool {
        if stats.consecutive_failures >= self.config.failure_threshold {
            return true;
        }

        stats.window.len() >= self.config.volume_threshold
            && stats.error_percentage >= self.config.error_percentage_threshold
    }

    /// Transition to the open state and schedule the recovery probe
    async fn transition_to_open(&self, service: &str, stats: &mut ServiceStats) {
        let old_state = stats.state;
        stats.state = CircuitState::Open;

        let next_attempt = now_millis() + self.config.reset_timeout_ms;
        stats.next_attempt = Some(next_attempt);

        // One pending timer per service: the circuit must reach half-open
        // after the reset timeout even if no request ever asks again.
        let breaker = self.clone();
        let key = service.to_string();
        let delay = Duration::from_millis(self.config.reset_timeout_ms);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            breaker.half_open_if_due(&key).await;
        });

        let mut timers = self.timers.lock().await;
        if let Some(previous) = timers.insert(service.to_string(), handle) {
            previous.abort();
        }
        drop(timers);

        error!(
            service,
            consecutive_failures = stats.consecutive_failures,
            error_percentage = stats.error_percentage,
            next_attempt = %format_instant(next_attempt),
            "circuit breaker opened"
        );

        self.notify_state_change(old_state, CircuitState::Open, service);
    }

    /// Transition to the half-open state
    fn transition_to_half_open(&self, service: &str, stats: &mut ServiceStats) {
        let old_state = stats.state;
        stats.state = CircuitState::HalfOpen;
        stats.consecutive_successes = 0;
        stats.consecutive_failures = 0;

        info!(service, "circuit breaker half-open");

        self.notify_state_change(old_state, CircuitState::HalfOpen, service);
    }

    /// Transition to the closed state
    async fn transition_to_closed(&self, service: &str, stats: &mut ServiceStats) {
        let old_state = stats.state;
        stats.state = CircuitState::Closed;
        stats.consecutive_failures = 0;
        stats.next_attempt = None;

        if let Some(timer) = self.timers.lock().await.remove(service) {
            timer.abort();
        }

        info!(service, "circuit breaker closed");

        self.notify_state_change(old_state, CircuitState::Closed, service);
    }

    /// Timer callback: probe only if the circuit is still open
    async fn half_open_if_due(&self, service: &str) {
        let mut map = self.stats.write().await;
        if let Some(stats) = map.get_mut(service) {
            if stats.state == CircuitState::Open {
                self.transition_to_half_open(service, stats);
            }
        }
    }

    fn notify_state_change(&self, old_state: CircuitState, new_state: CircuitState, service: &str) {
        if let Some(hook) = &self.on_state_change {
            hook(old_state, new_state, service);
        }
    }

    fn emit_gauges(&self, service: &str, stats: &ServiceStats) {
        let state_value = match stats.state {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 0.5,
            CircuitState::Open => 1.0,
        };

        self.metrics.gauge("circuit_breaker.state", state_value, service);
        self.metrics.gauge(
            "circuit_breaker.error_percentage",
            stats.error_percentage as f64,
            service,
        );
        self.metrics.gauge(
            "circuit_breaker.consecutive_failures",
            stats.consecutive_failures as f64,
            service,
        );
        self.metrics.gauge(
            "circuit_breaker.total_requests",
            stats.total_requests as f64,
            service,
        );
    }
}

/// Drop window entries older than the monitoring period
fn clean_window(stats: &mut ServiceStats, now: u64, monitoring_period_ms: u64) {
    let cutoff = now.saturating_sub(monitoring_period_ms);
    stats.window.retain(|entry| entry.timestamp > cutoff);
}

/// Recompute the error percentage from the window
fn update_error_percentage(stats: &mut ServiceStats) {
    if stats.window.is_empty() {
        stats.error_percentage = 0;
        return;
    }

    let failures = stats.window.iter().filter(|entry| !entry.success).count();
    stats.error_percentage =
        ((failures as f64 / stats.window.len() as f64) * 100.0).round() as u32;
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn format_instant(epoch_ms: u64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(epoch_ms as i64)
        .map(|instant| instant.to_rfc3339())
        .unwrap_or_else(|| epoch_ms.to_string())
}
