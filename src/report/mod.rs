//! JSON test reports
//!
//! A [`LoadTestReport`] is a point-in-time rendering of a [`MetricsStore`]:
//! the test metadata, every summary, and the raw records. Reports are written
//! as pretty-printed JSON to `<dir>/<test-name>_<unix-timestamp>.json`.
//! [`cloudwatch`] publishes the headline numbers as CloudWatch metrics.

pub mod cloudwatch;

pub use cloudwatch::{
    publish_metrics, publish_summary, summary_metrics, CloudWatchPublisher, MetricPoint, MetricUnit,
    MetricsPublisher,
};

use crate::metrics::{
    CostSummary, ErrorSummary, MetricsStore, PerformanceSummary, RawData, ResourceMetric,
    SystemMetricStats,
};
use crate::Result;
use chrono::Utc;
use colored::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

/// Test type recorded by foundation model suites
pub const FOUNDATION_MODEL_TEST_TYPE: &str = "Foundation Model Load Test";

/// Test type recorded by knowledge base suites
pub const KNOWLEDGE_BASE_TEST_TYPE: &str = "Knowledge Base Load Test";

/// Report metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestInfo {
    /// UTC time the report was built, `%Y-%m-%d %H:%M:%S`
    pub timestamp: String,
    pub test_type: String,
    /// Configuration the suite ran with
    pub configuration: Value,
    /// Knowledge base under test, for knowledge base suites
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_base_id: Option<String>,
}

/// Complete report document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadTestReport {
    pub test_info: TestInfo,
    pub performance: PerformanceSummary,
    pub costs: CostSummary,
    pub errors: ErrorSummary,
    pub system_metrics: BTreeMap<ResourceMetric, SystemMetricStats>,
    pub raw_data: RawData,
    /// Scenario-specific results, such as per-category query patterns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_results: Option<Value>,
}

impl LoadTestReport {
    /// Build a report from the current contents of `store`
    pub fn from_store<C: Serialize + ?Sized>(
        store: &MetricsStore,
        test_type: impl Into<String>,
        configuration: &C,
    ) -> Result<Self> {
        let configuration = serde_json::to_value(configuration)?;
        let snapshot = store.snapshot();

        Ok(Self {
            test_info: TestInfo {
                timestamp: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
                test_type: test_type.into(),
                configuration,
                knowledge_base_id: None,
            },
            performance: snapshot.performance,
            costs: snapshot.costs,
            errors: snapshot.errors,
            system_metrics: snapshot.system_metrics,
            raw_data: snapshot.raw_data,
            test_results: None,
        })
    }

    pub fn with_knowledge_base_id(mut self, kb_id: impl Into<String>) -> Self {
        self.test_info.knowledge_base_id = Some(kb_id.into());
        self
    }

    /// Attach scenario-specific results
    pub fn with_test_results<R: Serialize + ?Sized>(mut self, results: &R) -> Result<Self> {
        self.test_results = Some(serde_json::to_value(results)?);
        Ok(self)
    }

    /// Write the report into `dir`, creating it if needed
    pub fn write_report(&self, dir: impl AsRef<Path>, test_name: &str) -> Result<PathBuf> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let path = dir.join(format!("{}_{}.json", test_name, Utc::now().timestamp()));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;

        info!(path = %path.display(), "Report written");
        Ok(path)
    }

    /// Human-readable summary of the run
    pub fn render_summary(&self) -> String {
        let overall = &self.performance.overall;
        let mut out = String::new();
        let rule = "=".repeat(60);

        let _ = writeln!(out, "\n{}", rule);
        let _ = writeln!(
            out,
            "{}",
            format!("{} SUMMARY", self.test_info.test_type.to_uppercase())
                .bright_cyan()
                .bold()
        );
        let _ = writeln!(out, "{}", rule);

        let _ = writeln!(out, "Total Requests: {}", overall.total_requests);
        let _ = writeln!(
            out,
            "Success Rate: {}",
            colored_rate(overall.success_rate)
        );
        let _ = writeln!(out, "Requests/Second: {:.2}", overall.requests_per_second);
        let _ = writeln!(out, "Test Duration: {:.2}s", overall.test_duration);
        let _ = writeln!(out, "Total Cost: ${:.4}", self.costs.total_cost());

        if self.errors.total_errors > 0 {
            let _ = writeln!(
                out,
                "{} {}",
                "Errors:".bright_red().bold(),
                self.errors.total_errors
            );
            for (message, count) in &self.errors.error_counts {
                let _ = writeln!(out, "  {} x{}", message, count);
            }
        }

        if !self.performance.categories.is_empty() {
            let _ = writeln!(out, "\n{}", "Per-Category Performance:".bright_blue().bold());
            for (category, stats) in &self.performance.categories {
                let _ = writeln!(out, "  {}:", category);
                let _ = writeln!(out, "    Success Rate: {}", colored_rate(stats.success_rate));
                let _ = writeln!(out, "    Avg Latency: {:.3}s", stats.avg_latency);
                let _ = writeln!(out, "    P95 Latency: {:.3}s", stats.p95_latency);
                let _ = writeln!(out, "    P99 Latency: {:.3}s", stats.p99_latency);
            }
        }

        out
    }

    /// Print [`render_summary`](Self::render_summary) to stdout
    pub fn print_summary(&self) {
        println!("{}", self.render_summary());
    }
}

fn colored_rate(rate: f64) -> ColoredString {
    let text = format!("{:.1}%", rate * 100.0);
    if rate >= 0.99 {
        text.bright_green()
    } else if rate >= 0.9 {
        text.bright_yellow()
    } else {
        text.bright_red()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RequestOutcome;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn populated_store() -> MetricsStore {
        let store = MetricsStore::new();
        store.mark_started();
        store.record(
            RequestOutcome::success("foundation_model_haiku", Duration::from_millis(500))
                .with_tokens(10, 40)
                .with_cost(0.0125),
        );
        store.record(RequestOutcome::failure("foundation_model_haiku", "ThrottlingException"));
        store.append_snapshots(Utc::now(), &[(ResourceMetric::CpuPercent, 12.5)]);
        store.mark_stopped();
        store
    }

    #[test]
    fn test_report_sections() {
        let store = populated_store();
        let report =
            LoadTestReport::from_store(&store, FOUNDATION_MODEL_TEST_TYPE, &json!({"concurrent_users": [1]}))
                .unwrap();

        assert_eq!(report.test_info.test_type, FOUNDATION_MODEL_TEST_TYPE);
        assert_eq!(report.test_info.timestamp.len(), 19);
        assert_eq!(report.performance.overall.total_requests, 2);
        assert_eq!(report.errors.total_errors, 1);
        assert!((report.costs.total_cost() - 0.0125).abs() < 1e-12);
        assert_eq!(report.raw_data.request_metrics.len(), 2);
        assert!(report.test_results.is_none());
    }

    #[test]
    fn test_knowledge_base_report_fields() {
        let report = LoadTestReport::from_store(&populated_store(), KNOWLEDGE_BASE_TEST_TYPE, &json!({}))
            .unwrap()
            .with_knowledge_base_id("KB12345")
            .with_test_results(&json!({"query_patterns": {"factual": {"total_queries": 2}}}))
            .unwrap();

        let written = serde_json::to_value(&report).unwrap();
        assert_eq!(written["test_info"]["test_type"], "Knowledge Base Load Test");
        assert_eq!(written["test_info"]["knowledge_base_id"], "KB12345");
        assert_eq!(written["test_results"]["query_patterns"]["factual"]["total_queries"], 2);

        let plain = LoadTestReport::from_store(&populated_store(), FOUNDATION_MODEL_TEST_TYPE, &json!({}))
            .unwrap();
        let written = serde_json::to_value(&plain).unwrap();
        assert!(written.get("test_results").is_none());
        assert!(written["test_info"].get("knowledge_base_id").is_none());
    }

    #[test]
    fn test_write_report() {
        let dir = TempDir::new().unwrap();
        let reports_dir = dir.path().join("reports");
        let report = LoadTestReport::from_store(&populated_store(), "Smoke", &json!({})).unwrap();

        let path = report.write_report(&reports_dir, "foundation_model_test").unwrap();
        let file_name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(file_name.starts_with("foundation_model_test_"));
        assert!(file_name.ends_with(".json"));

        let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let keys: Vec<&str> = written.as_object().unwrap().keys().map(String::as_str).collect();
        for key in ["test_info", "performance", "costs", "errors", "system_metrics", "raw_data"] {
            assert!(keys.contains(&key), "missing {}", key);
        }
        assert_eq!(written["performance"]["overall"]["total_requests"], 2);
        assert!(written["performance"]["foundation_model_haiku"].is_object());
        assert_eq!(written["costs"]["costs"]["total"], 0.0125);
        assert_eq!(written["system_metrics"]["cpu_percent"]["current"], 12.5);
    }

    #[test]
    fn test_render_summary() {
        let report = LoadTestReport::from_store(
            &populated_store(),
            FOUNDATION_MODEL_TEST_TYPE,
            &json!({}),
        )
        .unwrap();

        let summary = report.render_summary();
        assert!(summary.contains("Total Requests: 2"));
        assert!(summary.contains("Total Cost: $0.0125"));
        assert!(summary.contains("foundation_model_haiku:"));
        assert!(summary.contains("ThrottlingException x1"));
    }

    #[test]
    fn test_empty_store_report() {
        let store = MetricsStore::new();
        let report = LoadTestReport::from_store(&store, "Empty", &json!(null)).unwrap();
        assert_eq!(report.performance.overall.success_rate, 0.0);
        assert!(report.raw_data.test_info.duration.is_none());
        assert!(!report.render_summary().contains("Per-Category Performance"));
    }
}
