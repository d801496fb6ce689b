//! Call-site composition of circuit breaking and retries
//!
//! The circuit breaker and retry strategy are independent; this module
//! wires them together the way a protected call site does: gate on the
//! breaker, run the operation through the retry strategy, then report the
//! aggregate outcome to the breaker exactly once.

use std::future::Future;

use tracing::debug;

use crate::circuit_breaker::CircuitBreaker;
use crate::error::ResilienceError;
use crate::retry::RetryStrategy;

/// A downstream dependency wrapped in a breaker and a retry strategy.
///
/// The explicit higher-order wrapper for protected operations: construct
/// one per dependency and route every call through
/// [`ProtectedService::execute`].
pub struct ProtectedService<E> {
    service: String,
    breaker: CircuitBreaker,
    retry: RetryStrategy<E>,
}

impl<E> Clone for ProtectedService<E> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            breaker: self.breaker.clone(),
            retry: self.retry.clone(),
        }
    }
}

impl<E> ProtectedService<E>
where
    E: std::error::Error + 'static,
{
    /// Bind a service key to a breaker and a retry strategy
    pub fn new(
        service: impl Into<String>,
        breaker: CircuitBreaker,
        retry: RetryStrategy<E>,
    ) -> Self {
        Self {
            service: service.into(),
            breaker,
            retry,
        }
    }

    /// Service key used for gating and outcome reporting
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The shared circuit breaker handle
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Execute an operation under circuit breaking and retries.
    ///
    /// A rejected call never invokes the operation. One logical call
    /// reports one outcome to the breaker, no matter how many retry
    /// attempts it took.
    pub async fn execute<T, F, Fut>(&self, f: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.breaker.allow_request(&self.service).await {
            debug!(service = %self.service, "request rejected, circuit open");
            return Err(ResilienceError::CircuitOpen {
                service: self.service.clone(),
            });
        }

        let result = self.retry.execute(f).await;

        match &result {
            Ok(_) => self.breaker.record_success(&self.service).await,
            Err(err) => {
                let message = err.to_string();
                self.breaker
                    .record_failure(&self.service, Some(&message))
                    .await;
            }
        }

        result
    }
}
