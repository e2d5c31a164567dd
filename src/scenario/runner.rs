//! Test suite sequencing

use super::Prompt;
use crate::config::LoadTestConfig;
use crate::driver::{DriverConfig, LoadDriver, RequestExecutor, RunOutcome};
use crate::metrics::{MetricsStore, ResourceProbe, ResourceSampler};
use crate::{LoadTestError, Result};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// A named request executor the suite runs at every concurrency level
pub struct RunTarget<I = Prompt>
where
    I: Send + 'static,
{
    name: String,
    executor: Arc<dyn RequestExecutor<I>>,
}

impl<I> Clone for RunTarget<I>
where
    I: Send + 'static,
{
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            executor: Arc::clone(&self.executor),
        }
    }
}

impl<I> RunTarget<I>
where
    I: Send + 'static,
{
    pub fn new(name: impl Into<String>, executor: Arc<dyn RequestExecutor<I>>) -> Self {
        Self {
            name: name.into(),
            executor,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> &str {
        self.executor.category()
    }
}

impl<I> std::fmt::Debug for RunTarget<I>
where
    I: Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunTarget")
            .field("name", &self.name)
            .field("category", &self.executor.category())
            .finish()
    }
}

/// One completed run of the suite
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub target: String,
    pub concurrency: usize,
    pub outcome: RunOutcome,
}

/// Runs every target at every configured concurrency level
///
/// All runs of a suite share one [`MetricsStore`] and one monitoring session,
/// so the final report covers the whole suite.
pub struct LoadTestRunner {
    config: LoadTestConfig,
    store: Arc<MetricsStore>,
}

impl LoadTestRunner {
    pub fn new(config: LoadTestConfig) -> Self {
        let store = Arc::new(MetricsStore::with_retention(config.monitoring.retention));
        Self { config, store }
    }

    pub fn config(&self) -> &LoadTestConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MetricsStore> {
        &self.store
    }

    /// Run the suite while sampling resources through `probe`
    ///
    /// Monitoring is stopped before returning, on success and on error alike.
    /// Dropping the returned future mid-run tears the monitoring session down
    /// as well.
    pub async fn run_suite<I>(
        &self,
        targets: &[RunTarget<I>],
        inputs: Vec<I>,
        probe: impl ResourceProbe + 'static,
    ) -> Result<Vec<RunRecord>>
    where
        I: Clone + Send + 'static,
    {
        if targets.is_empty() {
            return Err(LoadTestError::invalid_input("No run targets given"));
        }

        self.monitored(probe, self.run_all(targets, inputs)).await
    }

    /// Await `work` inside one monitoring session
    ///
    /// Lets a scenario run its own sequence of requests (and then
    /// [`run_all`](Self::run_all)) under the same resource sampling as a suite.
    pub async fn monitored<F, T>(&self, probe: impl ResourceProbe + 'static, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let sampler = ResourceSampler::new(probe, self.config.monitoring.sample_interval)
            .with_stop_grace(self.config.monitoring.stop_grace);
        let session = self.store.start_monitoring(sampler)?;

        let result = work.await;

        if !session.stop_monitoring().await {
            warn!("Resource sampler did not stop within its grace period");
        }

        result
    }

    /// Run every target at every configured concurrency level, unmonitored
    pub async fn run_all<I>(&self, targets: &[RunTarget<I>], inputs: Vec<I>) -> Result<Vec<RunRecord>>
    where
        I: Clone + Send + 'static,
    {
        let profile = &self.config.load_test;
        let driver = LoadDriver::new(
            Arc::clone(&self.store),
            inputs,
            DriverConfig {
                drain_timeout: profile.drain_timeout,
            },
        );

        let total_runs = targets.len() * profile.concurrent_users.len();
        let mut records = Vec::with_capacity(total_runs);

        for target in targets {
            for &concurrency in &profile.concurrent_users {
                if !records.is_empty() && !profile.pause_between_tests.is_zero() {
                    info!(
                        pause_secs = profile.pause_between_tests.as_secs_f64(),
                        "Pausing between runs"
                    );
                    tokio::time::sleep(profile.pause_between_tests).await;
                }

                info!(
                    target = %target.name,
                    concurrency,
                    run = records.len() + 1,
                    total_runs,
                    "Starting run"
                );

                let outcome = driver
                    .run_concurrent(Arc::clone(&target.executor), concurrency, profile.test_duration)
                    .await?;

                records.push(RunRecord {
                    target: target.name.clone(),
                    concurrency,
                    outcome,
                });
            }
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Attempt, FnExecutor};
    use crate::metrics::ResourceMetric;
    use std::time::Duration;

    struct FixedProbe;

    impl ResourceProbe for FixedProbe {
        fn sample(&mut self) -> Result<Vec<(ResourceMetric, f64)>> {
            Ok(vec![
                (ResourceMetric::CpuPercent, 25.0),
                (ResourceMetric::MemoryPercent, 50.0),
            ])
        }
    }

    fn sleeping_target(name: &str, millis: u64) -> RunTarget {
        let executor = FnExecutor::new(format!("foundation_model_{}", name), move |_: Prompt| async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok::<_, LoadTestError>(Attempt::new(Duration::from_millis(millis)))
        });
        RunTarget::<Prompt>::new(name, Arc::new(executor))
    }

    fn test_config() -> LoadTestConfig {
        let mut config = LoadTestConfig::default();
        config.load_test.concurrent_users = vec![1, 2];
        config.load_test.test_duration = Duration::from_secs(1);
        config.load_test.pause_between_tests = Duration::from_secs(10);
        config.monitoring.sample_interval = Duration::from_secs(1);
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_suite_runs_every_target_and_level() {
        let runner = LoadTestRunner::new(test_config());
        let targets = vec![sleeping_target("a", 100), sleeping_target("b", 250)];
        let prompts = vec![Prompt::new("p", "Hello", 5)];

        let started = tokio::time::Instant::now();
        let records = runner.run_suite(&targets, prompts, FixedProbe).await.unwrap();

        let runs: Vec<(&str, usize)> = records
            .iter()
            .map(|r| (r.target.as_str(), r.concurrency))
            .collect();
        assert_eq!(runs, vec![("a", 1), ("a", 2), ("b", 1), ("b", 2)]);

        // four 1 s runs and three pauses
        assert!(started.elapsed() >= Duration::from_secs(34));

        let performance = runner.store().performance_summary();
        let total: usize = records.iter().map(|r| r.outcome.total_requests).sum();
        assert_eq!(performance.overall.total_requests, total);
        assert!(performance.categories.contains_key("foundation_model_a"));
        assert!(performance.categories.contains_key("foundation_model_b"));

        let raw = runner.store().export_raw_data();
        assert!(raw.test_info.end_time.is_some());
        assert!(!raw.system_metrics[&ResourceMetric::CpuPercent].is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_suite_stops_monitoring_on_error() {
        let runner = LoadTestRunner::new(test_config());
        let targets = vec![sleeping_target("a", 100)];

        let result = runner.run_suite(&targets, Vec::new(), FixedProbe).await;
        assert!(matches!(result, Err(LoadTestError::InvalidInput { .. })));

        let raw = runner.store().export_raw_data();
        assert!(raw.test_info.start_time.is_some());
        assert!(raw.test_info.end_time.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitored_work_is_sampled() {
        let runner = LoadTestRunner::new(test_config());
        let store = Arc::clone(runner.store());

        let value = runner
            .monitored(FixedProbe, async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Ok(7)
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert!(store.series(ResourceMetric::CpuPercent).len() >= 3);
        assert!(store.export_raw_data().test_info.end_time.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_suite_over_non_prompt_inputs() {
        let runner = LoadTestRunner::new(test_config());
        let executor = FnExecutor::new("knowledge_base", |query: &'static str| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, LoadTestError>(Attempt::new(Duration::from_millis(200)).with_tokens(query.len() as u64, 1))
        });
        let targets = vec![RunTarget::new("kb", Arc::new(executor) as Arc<dyn RequestExecutor<&'static str>>)];

        let records = runner
            .run_suite(&targets, vec!["factual", "analytical"], FixedProbe)
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert!(runner.store().performance_summary().categories.contains_key("knowledge_base"));
    }

    #[tokio::test]
    async fn test_suite_without_targets() {
        let runner = LoadTestRunner::new(test_config());
        let result = runner
            .run_suite(&[], vec![Prompt::new("p", "Hello", 5)], FixedProbe)
            .await;
        assert!(result.is_err());
        assert!(runner.store().export_raw_data().test_info.start_time.is_none());
    }
}
