//! Concurrent load generation
//!
//! The [`LoadDriver`] keeps a fixed number of request attempts in flight for a
//! bounded time window. Whenever an attempt completes, its outcome is recorded
//! in the [`MetricsStore`] and, while the window is still open, a replacement
//! attempt is launched with the next input from a round-robin pool.
//!
//! Once the window closes no new attempts start. The attempts still in flight
//! get a bounded drain period; whatever is still running afterwards is
//! abandoned, recorded once as a `drain_timeout` failure, and its late result
//! is discarded.
//!
//! ```rust,no_run
//! use bedrock_loadtest::driver::{Attempt, DriverConfig, FnExecutor, LoadDriver};
//! use bedrock_loadtest::metrics::MetricsStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> bedrock_loadtest::Result<()> {
//! let store = Arc::new(MetricsStore::new());
//! let driver = LoadDriver::new(store.clone(), vec!["ping"], DriverConfig::default());
//!
//! let executor = Arc::new(FnExecutor::new("echo", |input: &'static str| async move {
//!     let started = tokio::time::Instant::now();
//!     let _ = input.len();
//!     Ok::<_, bedrock_loadtest::LoadTestError>(Attempt::new(started.elapsed()))
//! }));
//!
//! let outcome = driver
//!     .run_concurrent(executor, 5, Duration::from_secs(10))
//!     .await?;
//! println!("{} requests", outcome.total_requests);
//! # Ok(())
//! # }
//! ```

use crate::error::LoadTestError;
use crate::metrics::{MetricsStore, RequestOutcome};
use crate::Result;
use async_trait::async_trait;
use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Error text recorded for attempts abandoned after the drain period
pub const DRAIN_TIMEOUT_ERROR: &str = "drain_timeout";

/// Default upper bound on draining in-flight attempts
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Measurements of one successful request attempt
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Attempt {
    pub latency: Duration,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub cost: f64,
}

impl Attempt {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            ..Default::default()
        }
    }

    pub fn with_tokens(mut self, tokens_input: u64, tokens_output: u64) -> Self {
        self.tokens_input = tokens_input;
        self.tokens_output = tokens_output;
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    fn into_outcome(self, category: &str) -> RequestOutcome {
        RequestOutcome::success(category, self.latency)
            .with_tokens(self.tokens_input, self.tokens_output)
            .with_cost(self.cost)
    }
}

/// The request function driven under load
///
/// `execute` returns the measurements of a successful attempt, or the error
/// that made it fail. Retries, if any, happen inside `execute`; the driver
/// records exactly one outcome per call.
#[async_trait]
pub trait RequestExecutor<I>: Send + Sync
where
    I: Send + 'static,
{
    /// Category under which outcomes are recorded
    fn category(&self) -> &str;

    /// Issue one request for `input`
    async fn execute(&self, input: I) -> Result<Attempt>;
}

/// [`RequestExecutor`] over an async closure
pub struct FnExecutor<I, F> {
    category: String,
    f: F,
    _input: PhantomData<fn(I)>,
}

impl<I, F> FnExecutor<I, F> {
    pub fn new(category: impl Into<String>, f: F) -> Self {
        Self {
            category: category.into(),
            f,
            _input: PhantomData,
        }
    }
}

#[async_trait]
impl<I, F, Fut> RequestExecutor<I> for FnExecutor<I, F>
where
    I: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Attempt>> + Send,
{
    fn category(&self) -> &str {
        &self.category
    }

    async fn execute(&self, input: I) -> Result<Attempt> {
        (self.f)(input).await
    }
}

/// Load driver configuration
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// How long in-flight attempts may keep running after the window closes
    pub drain_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

/// Result of one `run_concurrent` call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunOutcome {
    /// Attempts whose result was collected (successes and failures)
    pub total_requests: usize,
    pub successful_requests: usize,
    /// Attempts still running when the drain period ended
    pub abandoned_requests: usize,
    /// Wall time from the first launch to the end of the drain
    pub test_duration: Duration,
}

impl RunOutcome {
    pub fn failed_requests(&self) -> usize {
        self.total_requests - self.successful_requests
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }

    pub fn requests_per_second(&self) -> f64 {
        let secs = self.test_duration.as_secs_f64();
        if secs > 0.0 {
            self.total_requests as f64 / secs
        } else {
            0.0
        }
    }
}

#[derive(Default)]
struct Tally {
    total: usize,
    successful: usize,
}

/// Drives a request executor at a target concurrency
pub struct LoadDriver<I> {
    store: Arc<MetricsStore>,
    inputs: Vec<I>,
    config: DriverConfig,
}

impl<I> LoadDriver<I>
where
    I: Clone + Send + 'static,
{
    /// Create a driver drawing inputs round-robin from `inputs`
    pub fn new(store: Arc<MetricsStore>, inputs: Vec<I>, config: DriverConfig) -> Self {
        Self {
            store,
            inputs,
            config,
        }
    }

    pub fn store(&self) -> &Arc<MetricsStore> {
        &self.store
    }

    /// Keep `concurrency` attempts in flight for `duration`, then drain
    ///
    /// Attempt failures and panics are recorded as failed outcomes and never
    /// end the run. Only an empty input pool, zero concurrency, or a missing
    /// Tokio runtime are returned as errors.
    pub async fn run_concurrent<E>(
        &self,
        executor: Arc<E>,
        concurrency: usize,
        duration: Duration,
    ) -> Result<RunOutcome>
    where
        E: RequestExecutor<I> + ?Sized + 'static,
    {
        if self.inputs.is_empty() {
            return Err(LoadTestError::invalid_input(
                "Load driver needs at least one input",
            ));
        }
        if concurrency == 0 {
            return Err(LoadTestError::invalid_input(
                "Concurrency must be greater than 0",
            ));
        }
        tokio::runtime::Handle::try_current().map_err(|e| {
            LoadTestError::scheduling_error(format!("No Tokio runtime to spawn attempts on: {}", e))
        })?;

        let category = executor.category().to_string();
        info!(
            category = %category,
            concurrency,
            duration_secs = duration.as_secs_f64(),
            "Starting concurrent load run"
        );

        let start = Instant::now();
        let deadline = window_deadline(start, duration);
        let mut tasks = JoinSet::new();
        let mut tally = Tally::default();
        let mut cursor = 0;

        for _ in 0..concurrency {
            self.launch(&mut tasks, &executor, &mut cursor);
        }

        let window = tokio::time::sleep_until(deadline);
        tokio::pin!(window);

        loop {
            tokio::select! {
                _ = &mut window => break,
                joined = tasks.join_next() => match joined {
                    Some(joined) => {
                        self.settle(&category, joined, &mut tally);
                        if Instant::now() < deadline {
                            self.launch(&mut tasks, &executor, &mut cursor);
                        }
                    }
                    None => {
                        (&mut window).await;
                        break;
                    }
                },
            }
        }

        debug!(in_flight = tasks.len(), "Run window closed, draining attempts");

        let drained = tokio::time::timeout(self.config.drain_timeout, async {
            while let Some(joined) = tasks.join_next().await {
                self.settle(&category, joined, &mut tally);
            }
        })
        .await;

        let abandoned_requests = tasks.len();
        if drained.is_err() && abandoned_requests > 0 {
            warn!(
                category = %category,
                abandoned = abandoned_requests,
                drain_timeout_secs = self.config.drain_timeout.as_secs_f64(),
                "Attempts still running after drain timeout, abandoning them"
            );
            for _ in 0..abandoned_requests {
                self.store
                    .record(RequestOutcome::failure(category.as_str(), DRAIN_TIMEOUT_ERROR));
            }
            tasks.detach_all();
        }

        let outcome = RunOutcome {
            total_requests: tally.total,
            successful_requests: tally.successful,
            abandoned_requests,
            test_duration: start.elapsed(),
        };

        info!(
            category = %category,
            total_requests = outcome.total_requests,
            successful_requests = outcome.successful_requests,
            abandoned_requests = outcome.abandoned_requests,
            duration_secs = outcome.test_duration.as_secs_f64(),
            rps = outcome.requests_per_second(),
            "Concurrent load run completed"
        );

        Ok(outcome)
    }

    fn launch<E>(&self, tasks: &mut JoinSet<Result<Attempt>>, executor: &Arc<E>, cursor: &mut usize)
    where
        E: RequestExecutor<I> + ?Sized + 'static,
    {
        let input = self.inputs[*cursor % self.inputs.len()].clone();
        *cursor = cursor.wrapping_add(1);

        let executor = Arc::clone(executor);
        tasks.spawn(async move { executor.execute(input).await });
    }

    fn settle(
        &self,
        category: &str,
        joined: std::result::Result<Result<Attempt>, JoinError>,
        tally: &mut Tally,
    ) {
        tally.total += 1;

        let outcome = match joined {
            Ok(Ok(attempt)) => {
                tally.successful += 1;
                attempt.into_outcome(category)
            }
            Ok(Err(error)) => {
                debug!(category = %category, error = %error, "Request attempt failed");
                RequestOutcome::failure(category, error.to_string())
            }
            Err(join_error) => {
                let message = describe_join_error(join_error);
                warn!(category = %category, error = %message, "Request attempt did not complete");
                RequestOutcome::failure(category, message)
            }
        };

        self.store.record(outcome);
    }
}

/// End of the run window, saturating to roughly 30 years for oversized durations
fn window_deadline(start: Instant, duration: Duration) -> Instant {
    start
        .checked_add(duration)
        .unwrap_or_else(|| start + Duration::from_secs(86400 * 365 * 30))
}

fn describe_join_error(error: JoinError) -> String {
    if error.is_panic() {
        let payload: Box<dyn Any + Send> = error.into_panic();
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        format!("panic: {}", detail)
    } else {
        "cancelled".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_inputs_are_used_round_robin() {
        let store = Arc::new(MetricsStore::new());
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let driver = LoadDriver::new(store.clone(), vec![0usize, 1, 2], DriverConfig::default());

        let log = seen.clone();
        let executor = Arc::new(FnExecutor::new("rr", move |input: usize| {
            let log = log.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                log.lock().unwrap().push(input);
                Ok::<_, LoadTestError>(Attempt::new(Duration::from_millis(100)))
            }
        }));

        let outcome = driver
            .run_concurrent(executor, 1, Duration::from_millis(550))
            .await
            .unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(outcome.total_requests, seen.len());
        assert_eq!(&seen[..6], &[0, 1, 2, 0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_and_panics_are_recorded() {
        let store = Arc::new(MetricsStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let driver = LoadDriver::new(store.clone(), vec![()], DriverConfig::default());

        let counter = calls.clone();
        let executor = Arc::new(FnExecutor::new("mixed", move |_: ()| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                match n % 3 {
                    0 => Ok(Attempt::new(Duration::from_millis(10)).with_cost(0.01)),
                    1 => Err(LoadTestError::throttling_error("ThrottlingException")),
                    _ => panic!("executor blew up"),
                }
            }
        }));

        let outcome = driver
            .run_concurrent(executor, 2, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(outcome.total_requests >= 6);
        assert_eq!(outcome.abandoned_requests, 0);
        assert_eq!(store.request_count(), outcome.total_requests);

        let performance = store.performance_summary();
        assert_eq!(performance.overall.total_requests, outcome.total_requests);
        assert_eq!(
            performance.overall.successful_requests,
            outcome.successful_requests
        );

        let errors = store.error_summary();
        assert!(errors.error_counts.contains_key("panic: executor blew up"));
        assert!(errors
            .error_counts
            .keys()
            .any(|message| message.contains("ThrottlingException")));
    }

    #[tokio::test]
    async fn test_invalid_plans_are_rejected() {
        let store = Arc::new(MetricsStore::new());
        let executor = Arc::new(FnExecutor::new("noop", |_: u8| async {
            Ok::<_, LoadTestError>(Attempt::default())
        }));

        let empty: LoadDriver<u8> = LoadDriver::new(store.clone(), vec![], DriverConfig::default());
        assert!(matches!(
            empty
                .run_concurrent(executor.clone(), 1, Duration::from_secs(1))
                .await,
            Err(LoadTestError::InvalidInput { .. })
        ));

        let driver = LoadDriver::new(store.clone(), vec![1u8], DriverConfig::default());
        assert!(matches!(
            driver.run_concurrent(executor, 0, Duration::from_secs(1)).await,
            Err(LoadTestError::InvalidInput { .. })
        ));
        assert_eq!(store.request_count(), 0);
    }

    #[test]
    fn test_window_deadline_saturates() {
        let start = Instant::now();
        assert_eq!(
            window_deadline(start, Duration::from_secs(5)),
            start + Duration::from_secs(5)
        );
        assert!(window_deadline(start, Duration::MAX) > start + Duration::from_secs(86400 * 365));
    }

    #[tokio::test]
    async fn test_unbounded_duration_keeps_running() {
        let store = Arc::new(MetricsStore::new());
        let driver = LoadDriver::new(store.clone(), vec![()], DriverConfig::default());
        let executor = Arc::new(FnExecutor::new("endless", |_: ()| async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok::<_, LoadTestError>(Attempt::new(Duration::from_millis(5)))
        }));

        let run = tokio::spawn(async move {
            driver.run_concurrent(executor, 2, Duration::MAX).await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!run.is_finished());
        run.abort();
        assert!(store.request_count() > 0);
    }

    #[test]
    fn test_run_outcome_rates() {
        let outcome = RunOutcome {
            total_requests: 10,
            successful_requests: 8,
            abandoned_requests: 0,
            test_duration: Duration::from_secs(2),
        };
        assert_eq!(outcome.failed_requests(), 2);
        assert_eq!(outcome.success_rate(), 0.8);
        assert_eq!(outcome.requests_per_second(), 5.0);

        let empty = RunOutcome {
            total_requests: 0,
            successful_requests: 0,
            abandoned_requests: 0,
            test_duration: Duration::ZERO,
        };
        assert_eq!(empty.success_rate(), 0.0);
        assert_eq!(empty.requests_per_second(), 0.0);
    }
}
