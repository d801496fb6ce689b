//! Retry strategy with backoff
//!
//! Executes a single asynchronous operation, retrying transient failures
//! with exponential (or linear) backoff and jitter. Every error is kept in
//! attempt order; exhausting the budget surfaces an aggregate error, while
//! a predicate veto surfaces the original error unmodified.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{ResilienceError, RetryableError};
use crate::metrics::{MetricsSink, NoopMetrics};

/// Retry configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Base delay between attempts, in milliseconds
    pub base_delay_ms: u64,
    /// Upper bound for a single delay, in milliseconds
    pub max_delay_ms: u64,
    /// Backoff multiplier; 1.0 selects linear (constant) backoff
    pub exponential_base: f64,
    /// Whether to apply +/-20% jitter to each delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

type RetryPredicate<E> = Arc<dyn Fn(&E, u32) -> bool + Send + Sync>;
type RetryHook<E> = Arc<dyn Fn(&E, u32, u64) + Send + Sync>;

/// Per-execution bookkeeping, discarded when the call returns
struct RetryContext<E> {
    attempt: u32,
    total_delay_ms: u64,
    errors: Vec<E>,
}

/// Retry strategy implementation
///
/// One strategy per protected downstream dependency; the service name tags
/// logs and metrics. Concurrent `execute` calls are independent.
pub struct RetryStrategy<E> {
    service_name: String,
    config: RetryConfig,
    should_retry: RetryPredicate<E>,
    on_retry: Option<RetryHook<E>>,
    metrics: Arc<dyn MetricsSink>,
}

impl<E> Clone for RetryStrategy<E> {
    fn clone(&self) -> Self {
        Self {
            service_name: self.service_name.clone(),
            config: self.config.clone(),
            should_retry: self.should_retry.clone(),
            on_retry: self.on_retry.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<E> std::fmt::Debug for RetryStrategy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryStrategy")
            .field("service_name", &self.service_name)
            .field("config", &self.config)
            .finish()
    }
}

impl<E> RetryStrategy<E>
where
    E: RetryableError + std::error::Error + 'static,
{
    /// Create a strategy with the default retry predicate
    /// ([`RetryableError::is_retryable`]).
    pub fn new(service_name: impl Into<String>, config: RetryConfig) -> Self {
        Self::with_metrics(service_name, config, Arc::new(NoopMetrics))
    }

    /// Create a strategy with the default predicate, reporting to the given sink
    pub fn with_metrics(
        service_name: impl Into<String>,
        config: RetryConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            config,
            should_retry: Arc::new(|error: &E, _attempt| error.is_retryable()),
            on_retry: None,
            metrics,
        }
    }
}

impl<E> RetryStrategy<E>
where
    E: std::error::Error + 'static,
{
    /// Create a strategy with a custom retry predicate
    pub fn with_predicate<P>(
        service_name: impl Into<String>,
        config: RetryConfig,
        predicate: P,
    ) -> Self
    where
        P: Fn(&E, u32) -> bool + Send + Sync + 'static,
    {
        Self {
            service_name: service_name.into(),
            config,
            should_retry: Arc::new(predicate),
            on_retry: None,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Register a hook invoked before each sleep with
    /// `(error, attempt, delay_ms)`.
    pub fn on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(&E, u32, u64) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Execute function with retry logic
    pub async fn execute<T, F, Fut>(&self, f: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_inner(f, &self.config, &self.should_retry).await
    }

    /// Execute with exponential backoff and jitter
    pub async fn execute_with_backoff<T, F, Fut>(
        &self,
        f: F,
        max_attempts: u32,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let config = RetryConfig {
            max_attempts,
            exponential_base: 2.0,
            jitter: true,
            ..self.config.clone()
        };
        self.execute_inner(f, &config, &self.should_retry).await
    }

    /// Execute with a fixed delay between attempts and no jitter
    pub async fn execute_with_linear_backoff<T, F, Fut>(
        &self,
        f: F,
        max_attempts: u32,
        delay_ms: u64,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let config = RetryConfig {
            max_attempts,
            base_delay_ms: delay_ms,
            exponential_base: 1.0,
            jitter: false,
            ..self.config.clone()
        };
        self.execute_inner(f, &config, &self.should_retry).await
    }

    /// Execute with a custom retry condition and the configured backoff
    pub async fn execute_with_predicate<T, F, Fut, P>(
        &self,
        f: F,
        predicate: P,
        max_attempts: u32,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E, u32) -> bool + Send + Sync + 'static,
    {
        let config = RetryConfig {
            max_attempts,
            ..self.config.clone()
        };
        let predicate: RetryPredicate<E> = Arc::new(predicate);
        self.execute_inner(f, &config, &predicate).await
    }

    async fn execute_inner<T, F, Fut>(
        &self,
        mut f: F,
        config: &RetryConfig,
        should_retry: &RetryPredicate<E>,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut context = RetryContext {
            attempt: 0,
            total_delay_ms: 0,
            errors: Vec::new(),
        };

        while context.attempt < config.max_attempts {
            context.attempt += 1;

            match f().await {
                Ok(value) => {
                    if context.attempt > 1 {
                        info!(
                            service = %self.service_name,
                            attempt = context.attempt,
                            total_delay_ms = context.total_delay_ms,
                            "retry succeeded"
                        );
                        self.metrics.counter("retry.success", 1, &self.service_name);
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if context.attempt >= config.max_attempts {
                        error!(
                            service = %self.service_name,
                            attempts = context.attempt,
                            total_delay_ms = context.total_delay_ms,
                            error = %err,
                            "max retry attempts exceeded"
                        );
                        self.metrics.counter("retry.exhausted", 1, &self.service_name);
                        context.errors.push(err);
                        return Err(ResilienceError::RetryExhausted {
                            attempts: context.attempt,
                            errors: context.errors,
                        });
                    }

                    if !should_retry(&err, context.attempt) {
                        warn!(
                            service = %self.service_name,
                            attempt = context.attempt,
                            error = %err,
                            "retry aborted by predicate"
                        );
                        self.metrics.counter("retry.aborted", 1, &self.service_name);
                        return Err(ResilienceError::Inner(err));
                    }

                    let delay_ms = self.calculate_delay(context.attempt, config);
                    context.total_delay_ms += delay_ms;

                    warn!(
                        service = %self.service_name,
                        attempt = context.attempt,
                        delay_ms,
                        error = %err,
                        "retrying after error"
                    );

                    if let Some(hook) = &self.on_retry {
                        hook(&err, context.attempt, delay_ms);
                    }
                    self.metrics.counter("retry.attempt", 1, &self.service_name);
                    context.errors.push(err);

                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }

        // Only reachable with max_attempts == 0: the operation was never run
        Err(ResilienceError::RetryExhausted {
            attempts: context.attempt,
            errors: context.errors,
        })
    }

    /// Delay for the next attempt, with jitter applied
    fn calculate_delay(&self, attempt: u32, config: &RetryConfig) -> u64 {
        let mut delay = backoff_delay(
            attempt,
            config.base_delay_ms,
            config.max_delay_ms,
            config.exponential_base,
        ) as f64;

        if config.jitter {
            let jitter_factor = rand::thread_rng().gen_range(0.8..1.2);
            delay *= jitter_factor;
        }

        delay.round().max(0.0) as u64
    }
}

/// Pre-jitter backoff delay in milliseconds.
///
/// Linear when `exponential_base` is 1.0, otherwise
/// `base_delay * exponential_base^(attempt - 1)`; always capped at
/// `max_delay_ms`.
pub fn backoff_delay(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    exponential_base: f64,
) -> u64 {
    let delay = if exponential_base == 1.0 {
        base_delay_ms as f64
    } else {
        base_delay_ms as f64 * exponential_base.powi(attempt.saturating_sub(1) as i32)
    };

    delay.min(max_delay_ms as f64).round() as u64
}
