//! Derived summaries over stored metrics
//!
//! The reducers here are pure functions over borrowed store contents. The store
//! calls them while holding its lock, so a summary never mixes two states.
//! Every ratio and average degrades to `0` on empty input.

use super::{ErrorRecord, RequestRecord, ResourceMetric, ResourceSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Percentile with linear interpolation between closest ranks
///
/// The rank is `(p / 100) * (n - 1)` over the sorted values. An integral rank
/// selects that element; otherwise the result interpolates between the floor
/// and ceiling elements by the fractional part. Empty input yields `0`.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        sorted[lower]
    } else {
        let fraction = rank - lower as f64;
        sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Totals across every category
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverallPerformance {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    /// Fraction in `[0, 1]`
    pub success_rate: f64,
    /// Seconds
    pub test_duration: f64,
    pub requests_per_second: f64,
}

/// Latency statistics of one category, over successful attempts only
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryPerformance {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub success_rate: f64,
    pub avg_latency: f64,
    pub median_latency: f64,
    pub p95_latency: f64,
    pub p99_latency: f64,
    pub min_latency: f64,
    pub max_latency: f64,
}

/// Overall totals plus per-category latency detail
///
/// Categories without a single success are left out of the detail but still
/// count towards `overall`. Serialized, the categories sit next to `overall`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub overall: OverallPerformance,
    #[serde(flatten)]
    pub categories: BTreeMap<String, CategoryPerformance>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTotals {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_tokens: u64,
}

/// Cost per category (plus `"total"`) and token roll-ups per category
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub costs: BTreeMap<String, f64>,
    pub tokens: BTreeMap<String, TokenTotals>,
}

impl CostSummary {
    pub fn total_cost(&self) -> f64 {
        self.costs
            .get(super::TOTAL_COST_KEY)
            .copied()
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub total_errors: usize,
    /// Error message to occurrence count
    pub error_counts: BTreeMap<String, usize>,
    /// Category to its error messages, in recording order
    pub errors_by_type: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetricStats {
    pub avg: f64,
    pub max: f64,
    pub min: f64,
    /// Most recent sample
    pub current: f64,
}

/// Start, end and duration of the monitored interval
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestInterval {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Seconds; only known once monitoring stopped
    pub duration: Option<f64>,
}

/// Everything the store holds, for archival in reports
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawData {
    pub request_metrics: Vec<RequestRecord>,
    pub error_metrics: Vec<ErrorRecord>,
    pub system_metrics: BTreeMap<ResourceMetric, Vec<ResourceSnapshot>>,
    pub cost_metrics: BTreeMap<String, f64>,
    pub test_info: TestInterval,
}

/// All summaries and the raw export of one consistent store state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    pub performance: PerformanceSummary,
    pub costs: CostSummary,
    pub errors: ErrorSummary,
    pub system_metrics: BTreeMap<ResourceMetric, SystemMetricStats>,
    pub raw_data: RawData,
}

pub(crate) fn reduce_performance(
    requests: &[RequestRecord],
    test_duration: f64,
) -> PerformanceSummary {
    let total_requests = requests.len();
    let successful_requests = requests.iter().filter(|r| r.success).count();

    let overall = OverallPerformance {
        total_requests,
        successful_requests,
        failed_requests: total_requests - successful_requests,
        success_rate: ratio(successful_requests, total_requests),
        test_duration,
        requests_per_second: if test_duration > 0.0 {
            total_requests as f64 / test_duration
        } else {
            0.0
        },
    };

    // category -> (attempts, successful latencies)
    let mut by_category: BTreeMap<&str, (usize, Vec<f64>)> = BTreeMap::new();
    for record in requests {
        let entry = by_category
            .entry(record.request_category.as_str())
            .or_default();
        entry.0 += 1;
        if record.success {
            entry.1.push(record.latency);
        }
    }

    let categories = by_category
        .into_iter()
        .filter(|(_, (_, latencies))| !latencies.is_empty())
        .map(|(category, (attempts, latencies))| {
            let successes = latencies.len();
            let stats = CategoryPerformance {
                total_requests: attempts,
                successful_requests: successes,
                success_rate: ratio(successes, attempts),
                avg_latency: latencies.iter().sum::<f64>() / successes as f64,
                median_latency: percentile(&latencies, 50.0),
                p95_latency: percentile(&latencies, 95.0),
                p99_latency: percentile(&latencies, 99.0),
                min_latency: latencies.iter().copied().fold(f64::INFINITY, f64::min),
                max_latency: latencies.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            };
            (category.to_string(), stats)
        })
        .collect();

    PerformanceSummary {
        overall,
        categories,
    }
}

pub(crate) fn reduce_costs(
    requests: &[RequestRecord],
    costs: &BTreeMap<String, f64>,
) -> CostSummary {
    let mut tokens: BTreeMap<String, TokenTotals> = BTreeMap::new();
    for record in requests {
        let totals = tokens.entry(record.request_category.clone()).or_default();
        totals.total_input_tokens += record.tokens_input;
        totals.total_output_tokens += record.tokens_output;
        totals.total_tokens += record.tokens_input + record.tokens_output;
    }

    CostSummary {
        costs: costs.clone(),
        tokens,
    }
}

pub(crate) fn reduce_errors(errors: &[ErrorRecord]) -> ErrorSummary {
    let mut summary = ErrorSummary {
        total_errors: errors.len(),
        ..Default::default()
    };

    for record in errors {
        *summary.error_counts.entry(record.error.clone()).or_insert(0) += 1;
        summary
            .errors_by_type
            .entry(record.request_category.clone())
            .or_default()
            .push(record.error.clone());
    }

    summary
}

pub(crate) fn reduce_system(
    series: &BTreeMap<ResourceMetric, VecDeque<ResourceSnapshot>>,
) -> BTreeMap<ResourceMetric, SystemMetricStats> {
    series
        .iter()
        .filter_map(|(metric, samples)| {
            let current = samples.back()?.value;
            let (sum, min, max) = samples.iter().fold(
                (0.0, f64::INFINITY, f64::NEG_INFINITY),
                |(sum, min, max), sample| (sum + sample.value, min.min(sample.value), max.max(sample.value)),
            );
            Some((
                *metric,
                SystemMetricStats {
                    avg: sum / samples.len() as f64,
                    max,
                    min,
                    current,
                },
            ))
        })
        .collect()
}
