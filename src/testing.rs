//! Testing tools for the resilience layer
//!
//! Fault injection for exercising circuit breaking and retries against a
//! simulated flaky downstream, without a real network dependency.

use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::error::RetryableError;

/// Fault injection configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Failure rate (0.0 - 1.0)
    pub failure_rate: f64,
    /// Latency injection in milliseconds
    pub latency_ms: u64,
    /// Whether to inject latency
    pub inject_latency: bool,
    /// Whether to inject failures
    pub inject_failures: bool,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.2,
            latency_ms: 100,
            inject_latency: false,
            inject_failures: false,
        }
    }
}

/// Failure produced by a [`FaultInjector`].
///
/// Classified as a network-level error, so the default retry predicate
/// treats it as transient.
#[derive(Clone, Debug, Error)]
#[error("injected fault: {reason}")]
pub struct InjectedFault {
    reason: String,
}

impl InjectedFault {
    /// Create a fault with the given reason
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Human-readable cause of the fault
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl RetryableError for InjectedFault {
    fn is_network_error(&self) -> bool {
        true
    }
}

/// Simulated downstream dependency
#[derive(Clone, Debug)]
pub struct FaultInjector {
    config: FaultConfig,
}

impl FaultInjector {
    /// Create a new fault injector
    pub fn new(config: FaultConfig) -> Self {
        Self { config }
    }

    /// Simulate one downstream call
    pub async fn call(&self) -> Result<(), InjectedFault> {
        if self.config.inject_latency {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }

        if self.config.inject_failures {
            let rate = self.config.failure_rate.clamp(0.0, 1.0);
            if rand::thread_rng().gen_bool(rate) {
                return Err(InjectedFault::new("simulated downstream failure"));
            }
        }

        Ok(())
    }
}

/// Outcome of a circuit breaker test run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CircuitBreakerTestResult {
    /// Service key the run used
    pub service_name: String,
    /// Number of requests issued
    pub request_count: u64,
    /// Requests that reached the downstream and succeeded
    pub success_count: u64,
    /// Requests that reached the downstream and failed
    pub failure_count: u64,
    /// Requests rejected by the open circuit
    pub rejected_count: u64,
    /// Breaker state after the run
    pub final_state: CircuitState,
}

/// Drives sequential requests through a breaker and a fault injector
pub struct CircuitBreakerTester {
    service_name: String,
    breaker: CircuitBreaker,
    injector: FaultInjector,
}

impl CircuitBreakerTester {
    /// Create a new circuit breaker tester
    pub fn new(
        service_name: impl Into<String>,
        breaker: CircuitBreaker,
        injector: FaultInjector,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            breaker,
            injector,
        }
    }

    /// Run a test with a specified number of requests
    pub async fn run(&self, request_count: u64) -> Result<CircuitBreakerTestResult> {
        let mut success_count = 0;
        let mut failure_count = 0;
        let mut rejected_count = 0;

        for _ in 0..request_count {
            if !self.breaker.allow_request(&self.service_name).await {
                rejected_count += 1;
                continue;
            }

            match self.injector.call().await {
                Ok(()) => {
                    success_count += 1;
                    self.breaker.record_success(&self.service_name).await;
                }
                Err(fault) => {
                    failure_count += 1;
                    self.breaker
                        .record_failure(&self.service_name, Some(&fault.to_string()))
                        .await;
                }
            }
        }

        Ok(CircuitBreakerTestResult {
            service_name: self.service_name.clone(),
            request_count,
            success_count,
            failure_count,
            rejected_count,
            final_state: self.breaker.get_state(&self.service_name).await,
        })
    }
}
