//! CloudWatch publishing of run summaries
//!
//! The headline numbers of a report (total requests, success rate and
//! throughput) are sent as custom metrics so runs can be graphed and alarmed
//! on next to the service's own Bedrock metrics.

use super::LoadTestReport;
use crate::bedrock::load_sdk_config;
use crate::config::AwsConfig;
use crate::metrics::OverallPerformance;
use crate::{LoadTestError, Result};
use async_trait::async_trait;
use aws_sdk_cloudwatch::error::DisplayErrorContext;
use aws_sdk_cloudwatch::primitives::DateTime;
use aws_sdk_cloudwatch::types::{MetricDatum, StandardUnit};
use aws_sdk_cloudwatch::Client as CloudWatchClient;
use std::time::SystemTime;
use tracing::{debug, info};

/// Namespace used when the configuration does not name one
pub const DEFAULT_NAMESPACE: &str = "BedrockLoadTest";

/// Most data points CloudWatch accepts in one `PutMetricData` call
pub const MAX_DATUMS_PER_REQUEST: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricUnit {
    Count,
    Percent,
    CountPerSecond,
}

impl MetricUnit {
    fn standard_unit(self) -> StandardUnit {
        match self {
            MetricUnit::Count => StandardUnit::Count,
            MetricUnit::Percent => StandardUnit::Percent,
            MetricUnit::CountPerSecond => StandardUnit::CountSecond,
        }
    }
}

/// One metric value to publish
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub name: String,
    pub value: f64,
    pub unit: MetricUnit,
}

impl MetricPoint {
    pub fn new(name: impl Into<String>, value: f64, unit: MetricUnit) -> Self {
        Self {
            name: name.into(),
            value,
            unit,
        }
    }
}

/// Metrics published for a run
pub fn summary_metrics(overall: &OverallPerformance) -> Vec<MetricPoint> {
    vec![
        MetricPoint::new("TotalRequests", overall.total_requests as f64, MetricUnit::Count),
        MetricPoint::new("SuccessRate", overall.success_rate * 100.0, MetricUnit::Percent),
        MetricPoint::new(
            "RequestsPerSecond",
            overall.requests_per_second,
            MetricUnit::CountPerSecond,
        ),
    ]
}

/// Sink for metric points
#[async_trait]
pub trait MetricsPublisher: Send + Sync {
    /// Publish one batch of at most [`MAX_DATUMS_PER_REQUEST`] points
    async fn publish(&self, namespace: &str, points: &[MetricPoint]) -> Result<()>;
}

/// Publishes to CloudWatch through `PutMetricData`
#[derive(Debug, Clone)]
pub struct CloudWatchPublisher {
    client: CloudWatchClient,
}

impl CloudWatchPublisher {
    pub async fn new(region: impl Into<String>, profile: Option<String>) -> Self {
        let config = load_sdk_config(region.into(), profile).await;
        Self {
            client: CloudWatchClient::new(&config),
        }
    }

    /// Create a publisher from the `aws` section of the test configuration
    pub async fn from_config(config: &AwsConfig) -> Self {
        Self::new(config.region.clone(), config.profile.clone()).await
    }
}

fn metric_datum(point: &MetricPoint, timestamp: DateTime) -> Result<MetricDatum> {
    Ok(MetricDatum::builder()
        .metric_name(&point.name)
        .value(point.value)
        .unit(point.unit.standard_unit())
        .timestamp(timestamp)
        .build())
}

#[async_trait]
impl MetricsPublisher for CloudWatchPublisher {
    async fn publish(&self, namespace: &str, points: &[MetricPoint]) -> Result<()> {
        let timestamp = DateTime::from(SystemTime::now());
        let data = points
            .iter()
            .map(|point| metric_datum(point, timestamp))
            .collect::<Result<Vec<_>>>()?;

        self.client
            .put_metric_data()
            .namespace(namespace)
            .set_metric_data(Some(data))
            .send()
            .await
            .map_err(|e| {
                LoadTestError::network_error(format!(
                    "Failed to publish metrics to CloudWatch: {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        debug!(namespace, count = points.len(), "Published metric batch");
        Ok(())
    }
}

/// Publish `points` in batches, returning how many were sent
pub async fn publish_metrics(
    publisher: &dyn MetricsPublisher,
    namespace: &str,
    points: &[MetricPoint],
) -> Result<usize> {
    for batch in points.chunks(MAX_DATUMS_PER_REQUEST) {
        publisher.publish(namespace, batch).await?;
    }
    Ok(points.len())
}

/// Publish the summary metrics of `report`
pub async fn publish_summary(
    publisher: &dyn MetricsPublisher,
    namespace: &str,
    report: &LoadTestReport,
) -> Result<usize> {
    let points = summary_metrics(&report.performance.overall);
    let sent = publish_metrics(publisher, namespace, &points).await?;
    info!(namespace, metrics = sent, "Published run summary to CloudWatch");
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricsStore, RequestOutcome};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingPublisher {
        batches: Mutex<Vec<(String, Vec<MetricPoint>)>>,
        fail: bool,
    }

    #[async_trait]
    impl MetricsPublisher for RecordingPublisher {
        async fn publish(&self, namespace: &str, points: &[MetricPoint]) -> Result<()> {
            if self.fail {
                return Err(LoadTestError::access_denied("AccessDeniedException"));
            }
            self.batches
                .lock()
                .unwrap()
                .push((namespace.to_string(), points.to_vec()));
            Ok(())
        }
    }

    #[test]
    fn test_summary_metric_values() {
        let overall = OverallPerformance {
            total_requests: 200,
            successful_requests: 190,
            failed_requests: 10,
            success_rate: 0.95,
            test_duration: 40.0,
            requests_per_second: 5.0,
        };

        let points = summary_metrics(&overall);
        assert_eq!(points.len(), 3);
        assert_eq!(points[0], MetricPoint::new("TotalRequests", 200.0, MetricUnit::Count));
        assert_eq!(points[1].name, "SuccessRate");
        assert!((points[1].value - 95.0).abs() < 1e-9);
        assert_eq!(points[1].unit, MetricUnit::Percent);
        assert_eq!(points[2], MetricPoint::new("RequestsPerSecond", 5.0, MetricUnit::CountPerSecond));
    }

    #[test]
    fn test_datum_carries_unit() {
        let point = MetricPoint::new("SuccessRate", 99.5, MetricUnit::Percent);
        let datum = metric_datum(&point, DateTime::from_secs(1_700_000_000)).unwrap();
        assert_eq!(datum.metric_name(), Some("SuccessRate"));
        assert_eq!(datum.value(), Some(99.5));
        assert_eq!(datum.unit(), Some(&StandardUnit::Percent));
    }

    #[tokio::test]
    async fn test_points_are_sent_in_batches() {
        let publisher = RecordingPublisher::default();
        let points: Vec<MetricPoint> = (0..45)
            .map(|i| MetricPoint::new(format!("Metric{}", i), i as f64, MetricUnit::Count))
            .collect();

        let sent = publish_metrics(&publisher, "Custom", &points).await.unwrap();
        assert_eq!(sent, 45);

        let batches = publisher.batches.lock().unwrap();
        let sizes: Vec<usize> = batches.iter().map(|(_, batch)| batch.len()).collect();
        assert_eq!(sizes, vec![20, 20, 5]);
        assert!(batches.iter().all(|(namespace, _)| namespace == "Custom"));
        assert_eq!(batches[2].1[4].name, "Metric44");
    }

    #[tokio::test]
    async fn test_publish_summary_of_report() {
        let store = MetricsStore::new();
        store.mark_started();
        store.record(RequestOutcome::success("foundation_model_haiku", Duration::from_millis(300)));
        store.record(RequestOutcome::failure("foundation_model_haiku", "ThrottlingException"));
        store.mark_stopped();
        let report = LoadTestReport::from_store(&store, "Smoke", &json!({})).unwrap();

        let publisher = RecordingPublisher::default();
        assert_eq!(publish_summary(&publisher, DEFAULT_NAMESPACE, &report).await.unwrap(), 3);

        let batches = publisher.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].0, "BedrockLoadTest");
        assert_eq!(batches[0].1[0].value, 2.0);
        assert!((batches[0].1[1].value - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_publish_failure_is_reported() {
        let publisher = RecordingPublisher {
            fail: true,
            ..Default::default()
        };
        let points = vec![MetricPoint::new("TotalRequests", 1.0, MetricUnit::Count)];

        let result = publish_metrics(&publisher, DEFAULT_NAMESPACE, &points).await;
        assert!(matches!(result, Err(LoadTestError::AccessDenied { .. })));
    }
}
