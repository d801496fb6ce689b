//! Resilience layer for downstream service calls
//!
//! This crate provides two cooperating resilience patterns:
//! - Circuit Breaker with consecutive-failure and sliding-window
//!   error-percentage trip conditions
//! - Retry with exponential backoff and jitter
//!
//! The two components are independent; composition happens at the call
//! site. [`ProtectedService`] wires them together for the common case:
//! gate on the breaker, retry the operation, report one outcome per call.
//!
//! Both components log through `tracing` and report to an injected
//! [`MetricsSink`]; neither touches global mutable state.

pub mod circuit_breaker;
pub mod composition;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod testing;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, ServiceStats, WindowEntry,
};
pub use composition::ProtectedService;
pub use error::{ResilienceError, RetryableError};
pub use logging::init_logging;
pub use metrics::{MemoryMetrics, MetricsSink, NoopMetrics};
pub use retry::{backoff_delay, RetryConfig, RetryStrategy};
pub use testing::{
    CircuitBreakerTestResult, CircuitBreakerTester, FaultConfig, FaultInjector, InjectedFault,
};
