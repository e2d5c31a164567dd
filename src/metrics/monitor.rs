//! Scoped monitoring of a test run

use super::{MetricsStore, ResourceSampler};
use crate::{LoadTestError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Running resource sampler bound to a [`MetricsStore`]
///
/// Created by [`MetricsStore::start_monitoring`]. Call
/// [`stop_monitoring`](Self::stop_monitoring) to stamp the end time and join
/// the sampler. If the session is dropped instead (early return, `?`, a
/// cancelled future) the sampler is cancelled and the end time stamped anyway.
pub struct MonitoringSession {
    store: Arc<MetricsStore>,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
    stop_grace: Duration,
}

impl MetricsStore {
    /// Stamp the start time and launch `sampler` in the background
    ///
    /// Starting again on the same store restarts the duration clock. Fails
    /// only when called outside a Tokio runtime.
    pub fn start_monitoring(self: &Arc<Self>, sampler: ResourceSampler) -> Result<MonitoringSession> {
        tokio::runtime::Handle::try_current().map_err(|e| {
            LoadTestError::scheduling_error(format!("Monitoring requires a Tokio runtime: {}", e))
        })?;

        self.mark_started();

        let token = CancellationToken::new();
        let stop_grace = sampler.stop_grace();
        let interval = sampler.interval();
        let handle = sampler.spawn(Arc::clone(self), token.clone());

        info!(
            interval_secs = interval.as_secs_f64(),
            retention = self.retention(),
            "Resource monitoring started"
        );

        Ok(MonitoringSession {
            store: Arc::clone(self),
            token,
            handle: Some(handle),
            stop_grace,
        })
    }
}

impl MonitoringSession {
    pub fn store(&self) -> &Arc<MetricsStore> {
        &self.store
    }

    /// Stamp the end time and wait for the sampler to exit
    ///
    /// The wait is bounded by the sampler's stop grace. Returns `false` when
    /// the sampler overran it; that is logged and the task is aborted, but the
    /// session still counts as stopped.
    pub async fn stop_monitoring(mut self) -> bool {
        self.token.cancel();
        self.store.mark_stopped();

        let Some(mut handle) = self.handle.take() else {
            return true;
        };

        match tokio::time::timeout(self.stop_grace, &mut handle).await {
            Ok(Ok(())) => {
                info!("Resource monitoring stopped");
                true
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Resource sampler ended abnormally");
                true
            }
            Err(_) => {
                warn!(
                    grace_secs = self.stop_grace.as_secs_f64(),
                    "Resource sampler did not stop within grace period"
                );
                handle.abort();
                false
            }
        }
    }
}

impl Drop for MonitoringSession {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.token.cancel();
            self.store.mark_stopped();
            warn!("Monitoring session dropped without stop_monitoring");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{ResourceMetric, ResourceProbe};

    struct ConstantProbe(f64);

    impl ResourceProbe for ConstantProbe {
        fn sample(&mut self) -> Result<Vec<(ResourceMetric, f64)>> {
            Ok(vec![(ResourceMetric::MemoryPercent, self.0)])
        }
    }

    struct BlockingProbe;

    impl ResourceProbe for BlockingProbe {
        fn sample(&mut self) -> Result<Vec<(ResourceMetric, f64)>> {
            std::thread::sleep(Duration::from_millis(400));
            Ok(vec![(ResourceMetric::CpuPercent, 1.0)])
        }
    }

    #[tokio::test]
    async fn test_start_and_stop_monitoring() {
        let store = Arc::new(MetricsStore::new());
        let sampler = ResourceSampler::new(ConstantProbe(42.0), Duration::from_millis(10));

        let session = store.start_monitoring(sampler).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(session.stop_monitoring().await);

        let stats = store.system_metrics_summary();
        assert_eq!(stats[&ResourceMetric::MemoryPercent].current, 42.0);

        let raw = store.export_raw_data();
        assert!(raw.test_info.end_time.is_some());
        assert!(raw.test_info.duration.unwrap() > 0.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_overrunning_grace_is_not_fatal() {
        let store = Arc::new(MetricsStore::new());
        let sampler = ResourceSampler::new(BlockingProbe, Duration::from_millis(1))
            .with_stop_grace(Duration::from_millis(50));

        let session = store.start_monitoring(sampler).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!session.stop_monitoring().await);
        assert!(store.export_raw_data().test_info.end_time.is_some());
    }

    #[tokio::test]
    async fn test_drop_stamps_end_time() {
        let store = Arc::new(MetricsStore::new());
        {
            let _session = store
                .start_monitoring(ResourceSampler::new(ConstantProbe(1.0), Duration::from_secs(1)))
                .unwrap();
        }

        assert!(store.export_raw_data().test_info.end_time.is_some());
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let store = Arc::new(MetricsStore::new());
        let result =
            store.start_monitoring(ResourceSampler::new(ConstantProbe(1.0), Duration::from_secs(1)));

        assert!(matches!(result, Err(LoadTestError::SchedulingError { .. })));
    }
}
