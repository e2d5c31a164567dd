//! Load driver behaviour against a real and a paused clock

use bedrock_loadtest::driver::{Attempt, DriverConfig, FnExecutor, LoadDriver, DRAIN_TIMEOUT_ERROR};
use bedrock_loadtest::metrics::MetricsStore;
use bedrock_loadtest::LoadTestError;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fast_requests_keep_concurrency_for_the_window() {
    let store = Arc::new(MetricsStore::new());
    let driver = LoadDriver::new(store.clone(), vec![1u32, 2, 3], DriverConfig::default());

    let executor = Arc::new(FnExecutor::new("fast", |_: u32| async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok::<_, LoadTestError>(Attempt::new(Duration::from_millis(5)))
    }));

    let outcome = driver
        .run_concurrent(executor, 5, Duration::from_secs(2))
        .await
        .unwrap();

    assert!(outcome.total_requests > 5);
    assert_eq!(outcome.successful_requests, outcome.total_requests);
    assert_eq!(outcome.abandoned_requests, 0);
    assert!(outcome.test_duration >= Duration::from_secs(2));
    assert_eq!(store.request_count(), outcome.total_requests);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_attempt_is_recorded_once() {
    let store = Arc::new(MetricsStore::new());
    let driver = LoadDriver::new(
        store.clone(),
        vec!["slow"],
        DriverConfig {
            drain_timeout: Duration::from_secs(30),
        },
    );

    let executor = Arc::new(FnExecutor::new("slow", |_: &'static str| async move {
        tokio::time::sleep(Duration::from_secs(40)).await;
        Ok::<_, LoadTestError>(Attempt::new(Duration::from_secs(40)))
    }));

    let outcome = driver
        .run_concurrent(executor, 1, Duration::from_secs(1))
        .await
        .unwrap();

    assert_eq!(outcome.total_requests, 0);
    assert_eq!(outcome.abandoned_requests, 1);
    assert!(outcome.test_duration >= Duration::from_secs(31));

    let errors = store.error_summary();
    assert_eq!(errors.total_errors, 1);
    assert_eq!(errors.error_counts[DRAIN_TIMEOUT_ERROR], 1);

    // the late completion is discarded
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(store.request_count(), 1);
    assert_eq!(store.performance_summary().overall.successful_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_mixed_failures_are_grouped() {
    let store = Arc::new(MetricsStore::new());
    let driver = LoadDriver::new(store.clone(), vec![0usize, 1, 2, 3], DriverConfig::default());

    let executor = Arc::new(FnExecutor::new("mixed", |i: usize| async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        match i {
            0 => Ok(Attempt::new(Duration::from_millis(100)).with_cost(0.01)),
            1 => Err(LoadTestError::timeout_error(100)),
            2 => Err(LoadTestError::throttling_error("rate_limited")),
            _ => panic!("executor bug"),
        }
    }));

    let outcome = driver
        .run_concurrent(executor, 4, Duration::from_secs(1))
        .await
        .unwrap();

    assert_eq!(outcome.total_requests, store.request_count());
    assert_eq!(outcome.successful_requests * 4, outcome.total_requests);

    let errors = store.error_summary();
    assert_eq!(errors.total_errors, outcome.failed_requests());
    assert_eq!(errors.errors_by_type["mixed"].len(), errors.total_errors);
    assert!(errors.error_counts.keys().any(|message| message.starts_with("panic")));
}
