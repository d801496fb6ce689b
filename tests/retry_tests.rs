use anyhow::Result;
use breakwater::{backoff_delay, ResilienceError, RetryConfig, RetryStrategy, RetryableError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Downstream error with the shape the default classification inspects.
#[derive(Debug, Clone)]
struct FlakyError {
    status: Option<u16>,
    name: Option<&'static str>,
    network: bool,
}

impl FlakyError {
    fn transient() -> Self {
        Self {
            status: Some(503),
            name: None,
            network: false,
        }
    }

    fn client(status: u16) -> Self {
        Self {
            status: Some(status),
            name: None,
            network: false,
        }
    }
}

impl std::fmt::Display for FlakyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "flaky error (status: {:?}, name: {:?})", self.status, self.name)
    }
}

impl std::error::Error for FlakyError {}

impl RetryableError for FlakyError {
    fn is_network_error(&self) -> bool {
        self.network
    }

    fn status_code(&self) -> Option<u16> {
        self.status
    }

    fn error_name(&self) -> Option<&str> {
        self.name
    }
}

fn fast_config(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        base_delay_ms: 1,
        max_delay_ms: 5,
        ..RetryConfig::default()
    }
}

#[tokio::test]
async fn success_short_circuits_remaining_attempts() -> Result<()> {
    let retries = Arc::new(AtomicU32::new(0));
    let hook_count = retries.clone();

    let strategy: RetryStrategy<FlakyError> = RetryStrategy::new("api", fast_config(5))
        .on_retry(move |_error, _attempt, _delay| {
            hook_count.fetch_add(1, Ordering::SeqCst);
        });

    let calls = Arc::new(AtomicU32::new(0));
    let call_count = calls.clone();

    let result = strategy
        .execute(move || {
            let calls = call_count.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(FlakyError::transient())
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(retries.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn exhaustion_returns_aggregate_error() -> Result<()> {
    let strategy: RetryStrategy<FlakyError> = RetryStrategy::new("api", fast_config(3));

    let calls = Arc::new(AtomicU32::new(0));
    let call_count = calls.clone();

    let result: Result<u32, _> = strategy
        .execute(move || {
            let calls = call_count.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(FlakyError::transient())
            }
        })
        .await;

    match result {
        Err(ResilienceError::RetryExhausted { attempts, errors }) => {
            assert_eq!(attempts, 3);
            assert_eq!(errors.len(), 3);
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn veto_returns_original_error_after_single_call() -> Result<()> {
    let strategy: RetryStrategy<FlakyError> =
        RetryStrategy::with_predicate("api", fast_config(5), |_error: &FlakyError, _attempt| {
            false
        });

    let calls = Arc::new(AtomicU32::new(0));
    let call_count = calls.clone();

    let result: Result<u32, _> = strategy
        .execute(move || {
            let calls = call_count.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(FlakyError::client(404))
            }
        })
        .await;

    match result {
        Err(ResilienceError::Inner(error)) => assert_eq!(error.status, Some(404)),
        other => panic!("expected the original error, got {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn default_predicate_vetoes_client_errors() -> Result<()> {
    let strategy: RetryStrategy<FlakyError> = RetryStrategy::new("api", fast_config(5));

    let calls = Arc::new(AtomicU32::new(0));
    let call_count = calls.clone();

    let result: Result<u32, _> = strategy
        .execute(move || {
            let calls = call_count.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(FlakyError::client(400))
            }
        })
        .await;

    assert!(matches!(result, Err(ResilienceError::Inner(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn linear_backoff_uses_fixed_delay() -> Result<()> {
    let delays: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = delays.clone();

    let strategy: RetryStrategy<FlakyError> = RetryStrategy::new("api", RetryConfig::default())
        .on_retry(move |_error, _attempt, delay| {
            sink.lock().unwrap().push(delay);
        });

    let result: Result<u32, _> = strategy
        .execute_with_linear_backoff(|| async { Err::<u32, _>(FlakyError::transient()) }, 3, 7)
        .await;

    assert!(matches!(
        result,
        Err(ResilienceError::RetryExhausted { attempts: 3, .. })
    ));
    assert_eq!(delays.lock().unwrap().as_slice(), &[7, 7]);
    Ok(())
}

#[tokio::test]
async fn backoff_wrapper_overrides_attempt_budget() -> Result<()> {
    let strategy: RetryStrategy<FlakyError> = RetryStrategy::new("api", fast_config(5));

    let calls = Arc::new(AtomicU32::new(0));
    let call_count = calls.clone();

    let result: Result<u32, _> = strategy
        .execute_with_backoff(
            move || {
                let calls = call_count.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, _>(FlakyError::transient())
                }
            },
            2,
        )
        .await;

    assert!(matches!(
        result,
        Err(ResilienceError::RetryExhausted { attempts: 2, .. })
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn predicate_wrapper_overrides_default() -> Result<()> {
    // The default classification would retry a 503; the per-call
    // predicate only admits 429.
    let strategy: RetryStrategy<FlakyError> = RetryStrategy::new("api", fast_config(5));

    let result: Result<u32, _> = strategy
        .execute_with_predicate(
            || async { Err::<u32, _>(FlakyError::transient()) },
            |error: &FlakyError, _attempt: u32| error.status == Some(429),
            4,
        )
        .await;

    assert!(matches!(result, Err(ResilienceError::Inner(_))));
    Ok(())
}

#[test]
fn default_classification_table() {
    let network = FlakyError {
        status: None,
        name: None,
        network: true,
    };
    assert!(network.is_retryable());

    assert!(FlakyError::client(429).is_retryable());
    assert!(FlakyError::client(502).is_retryable());
    assert!(FlakyError::client(503).is_retryable());
    assert!(FlakyError::client(504).is_retryable());
    assert!(FlakyError::client(500).is_retryable());

    assert!(!FlakyError::client(400).is_retryable());
    assert!(!FlakyError::client(404).is_retryable());
    assert!(!FlakyError::client(403).is_retryable());

    let throttled = FlakyError {
        status: None,
        name: Some("ThrottlingException"),
        network: false,
    };
    assert!(throttled.is_retryable());

    let invalid = FlakyError {
        status: None,
        name: Some("ValidationException"),
        network: false,
    };
    assert!(!invalid.is_retryable());

    let opaque = FlakyError {
        status: None,
        name: None,
        network: false,
    };
    assert!(!opaque.is_retryable());
}

#[test]
fn backoff_caps_at_max_delay() {
    let delays: Vec<u64> = (1..=5)
        .map(|attempt| backoff_delay(attempt, 1_000, 5_000, 2.0))
        .collect();
    assert_eq!(delays, vec![1_000, 2_000, 4_000, 5_000, 5_000]);
}
