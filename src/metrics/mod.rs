//! Request outcome and resource metrics
//!
//! This module holds everything the harness measures:
//!
//! - [`RequestOutcome`] is what one request attempt reports back
//! - [`MetricsStore`] accumulates outcomes and resource snapshots behind one lock
//! - [`ResourceSampler`] periodically snapshots host counters into the store
//! - [`MonitoringSession`] scopes the sampler between start and stop of a test
//! - the [`summary`] types are the derived, serializable views used by reports
//!
//! ```rust
//! use bedrock_loadtest::metrics::{MetricsStore, RequestOutcome};
//! use std::time::Duration;
//!
//! let store = MetricsStore::new();
//! store.record(
//!     RequestOutcome::success("foundation_model_claude", Duration::from_millis(820))
//!         .with_tokens(12, 240)
//!         .with_cost(0.0036),
//! );
//! store.record(RequestOutcome::failure("foundation_model_claude", "ThrottlingException"));
//!
//! let performance = store.performance_summary();
//! assert_eq!(performance.overall.total_requests, 2);
//! assert_eq!(performance.overall.successful_requests, 1);
//! ```

pub mod monitor;
pub mod store;
pub mod summary;
pub mod system;

pub use monitor::MonitoringSession;
pub use store::MetricsStore;
pub use summary::{
    percentile, CategoryPerformance, CostSummary, ErrorSummary, OverallPerformance,
    PerformanceSummary, RawData, StoreSnapshot, SystemMetricStats, TestInterval, TokenTotals,
};
pub use system::{ResourceProbe, ResourceSampler, SysinfoProbe};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Key under which the grand total is kept in the cost mapping
pub const TOTAL_COST_KEY: &str = "total";

/// Default number of snapshots retained per resource metric
pub const DEFAULT_RETENTION: usize = 1000;

/// Result of one request attempt, before it is stamped and stored
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub category: String,
    /// Seconds; `0.0` when the attempt failed before a duration was measured
    pub latency: f64,
    pub success: bool,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub cost: f64,
    pub error: Option<String>,
}

impl RequestOutcome {
    /// Successful attempt that took `latency`
    pub fn success(category: impl Into<String>, latency: Duration) -> Self {
        Self {
            category: category.into(),
            latency: latency.as_secs_f64(),
            success: true,
            tokens_input: 0,
            tokens_output: 0,
            cost: 0.0,
            error: None,
        }
    }

    /// Failed attempt carrying its error text
    pub fn failure(category: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            latency: 0.0,
            success: false,
            tokens_input: 0,
            tokens_output: 0,
            cost: 0.0,
            error: Some(error.into()),
        }
    }

    pub fn with_tokens(mut self, tokens_input: u64, tokens_output: u64) -> Self {
        self.tokens_input = tokens_input;
        self.tokens_output = tokens_output;
        self
    }

    /// Negative or non-finite costs are clamped to zero
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = if cost.is_finite() { cost.max(0.0) } else { 0.0 };
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency.as_secs_f64();
        self
    }
}

/// A stored request outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Completion time of the attempt
    pub timestamp: DateTime<Utc>,
    pub request_category: String,
    pub latency: f64,
    pub success: bool,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A failed attempt's error, kept alongside the request list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub request_category: String,
    pub error: String,
}

/// Host resource counters tracked by the sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceMetric {
    CpuPercent,
    MemoryPercent,
    MemoryUsedGb,
    NetworkBytesSent,
    NetworkBytesRecv,
    DiskReadBytes,
    DiskWriteBytes,
}

impl ResourceMetric {
    pub const ALL: [ResourceMetric; 7] = [
        ResourceMetric::CpuPercent,
        ResourceMetric::MemoryPercent,
        ResourceMetric::MemoryUsedGb,
        ResourceMetric::NetworkBytesSent,
        ResourceMetric::NetworkBytesRecv,
        ResourceMetric::DiskReadBytes,
        ResourceMetric::DiskWriteBytes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceMetric::CpuPercent => "cpu_percent",
            ResourceMetric::MemoryPercent => "memory_percent",
            ResourceMetric::MemoryUsedGb => "memory_used_gb",
            ResourceMetric::NetworkBytesSent => "network_bytes_sent",
            ResourceMetric::NetworkBytesRecv => "network_bytes_recv",
            ResourceMetric::DiskReadBytes => "disk_read_bytes",
            ResourceMetric::DiskWriteBytes => "disk_write_bytes",
        }
    }
}

impl fmt::Display for ResourceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One point of a resource metric series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_builders() {
        let outcome = RequestOutcome::success("kb", Duration::from_millis(1500))
            .with_tokens(10, 20)
            .with_cost(0.5);
        assert!(outcome.success);
        assert_eq!(outcome.latency, 1.5);
        assert_eq!(outcome.tokens_output, 20);
        assert!(outcome.error.is_none());

        let failed = RequestOutcome::failure("kb", "timeout");
        assert!(!failed.success);
        assert_eq!(failed.latency, 0.0);
        assert_eq!(failed.error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_cost_is_never_negative() {
        assert_eq!(RequestOutcome::failure("x", "e").with_cost(-3.0).cost, 0.0);
        assert_eq!(RequestOutcome::failure("x", "e").with_cost(f64::NAN).cost, 0.0);
    }

    #[test]
    fn test_resource_metric_names() {
        let json = serde_json::to_string(&ResourceMetric::NetworkBytesRecv).unwrap();
        assert_eq!(json, "\"network_bytes_recv\"");
        for metric in ResourceMetric::ALL {
            assert_eq!(
                serde_json::to_string(&metric).unwrap(),
                format!("\"{}\"", metric)
            );
        }
    }
}
