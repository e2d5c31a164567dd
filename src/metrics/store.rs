//! Thread-safe store of request outcomes and resource snapshots

use super::summary::{
    self, CostSummary, ErrorSummary, PerformanceSummary, RawData, StoreSnapshot,
    SystemMetricStats, TestInterval,
};
use super::{
    ErrorRecord, RequestOutcome, RequestRecord, ResourceMetric, ResourceSnapshot,
    DEFAULT_RETENTION, TOTAL_COST_KEY,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Append-only metrics collections guarded by a single mutex
///
/// One store instance backs one test suite. Share it as `Arc<MetricsStore>`
/// between the load driver, the resource sampler and the report writer.
///
/// Every mutation (`record`, snapshot appends, monitoring marks) and every
/// summary takes the same lock for its whole duration, so readers never see a
/// request without its cost contribution or a half-appended sample batch.
#[derive(Debug)]
pub struct MetricsStore {
    state: Mutex<StoreState>,
    retention: usize,
}

#[derive(Debug, Default)]
struct StoreState {
    requests: Vec<RequestRecord>,
    errors: Vec<ErrorRecord>,
    costs: BTreeMap<String, f64>,
    system: BTreeMap<ResourceMetric, VecDeque<ResourceSnapshot>>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

impl StoreState {
    /// Seconds between start and end, or until now while still running
    fn test_duration(&self, now: DateTime<Utc>) -> f64 {
        match self.start_time {
            Some(start) => {
                let end = self.end_time.unwrap_or(now);
                (end - start)
                    .to_std()
                    .map(|elapsed| elapsed.as_secs_f64())
                    .unwrap_or(0.0)
            }
            None => 0.0,
        }
    }

    fn raw_data(&self) -> RawData {
        let duration = match (self.start_time, self.end_time) {
            (Some(_), Some(end)) => Some(self.test_duration(end)),
            _ => None,
        };

        RawData {
            request_metrics: self.requests.clone(),
            error_metrics: self.errors.clone(),
            system_metrics: self
                .system
                .iter()
                .map(|(metric, series)| (*metric, series.iter().copied().collect()))
                .collect(),
            cost_metrics: self.costs.clone(),
            test_info: TestInterval {
                start_time: self.start_time,
                end_time: self.end_time,
                duration,
            },
        }
    }
}

impl Default for MetricsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsStore {
    /// Create a store retaining [`DEFAULT_RETENTION`] samples per resource metric
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    /// Create a store retaining at most `retention` samples per resource metric
    pub fn with_retention(retention: usize) -> Self {
        let mut costs = BTreeMap::new();
        costs.insert(TOTAL_COST_KEY.to_string(), 0.0);

        Self {
            state: Mutex::new(StoreState {
                costs,
                ..Default::default()
            }),
            retention: retention.max(1),
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    // A panic while holding the lock cannot leave the collections half-written,
    // so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one request outcome
    ///
    /// Failures with a non-empty error text also get an error record. The
    /// cost is added to the category entry and to the `"total"` entry.
    pub fn record(&self, outcome: RequestOutcome) {
        let timestamp = Utc::now();
        let mut state = self.lock();

        if !outcome.success {
            if let Some(error) = outcome.error.as_deref().filter(|e| !e.is_empty()) {
                state.errors.push(ErrorRecord {
                    timestamp,
                    request_category: outcome.category.clone(),
                    error: error.to_string(),
                });
            }
        }

        *state.costs.entry(outcome.category.clone()).or_insert(0.0) += outcome.cost;
        *state.costs.entry(TOTAL_COST_KEY.to_string()).or_insert(0.0) += outcome.cost;

        state.requests.push(RequestRecord {
            timestamp,
            request_category: outcome.category,
            latency: outcome.latency,
            success: outcome.success,
            tokens_input: outcome.tokens_input,
            tokens_output: outcome.tokens_output,
            cost: outcome.cost,
            error: if outcome.success { None } else { outcome.error },
        });
    }

    /// Append one sample per metric, all stamped with `timestamp`
    ///
    /// Each series keeps at most `retention` samples; the oldest are evicted.
    pub fn append_snapshots(&self, timestamp: DateTime<Utc>, samples: &[(ResourceMetric, f64)]) {
        let mut state = self.lock();

        for (metric, value) in samples {
            let series = state.system.entry(*metric).or_default();
            series.push_back(ResourceSnapshot {
                timestamp,
                value: *value,
            });
            while series.len() > self.retention {
                series.pop_front();
            }
        }
    }

    /// Stamp the monitoring start, restarting the duration clock
    pub fn mark_started(&self) -> DateTime<Utc> {
        let now = Utc::now();
        let mut state = self.lock();
        state.start_time = Some(now);
        state.end_time = None;
        info!(start_time = %now, "Metrics monitoring started");
        now
    }

    /// Stamp the monitoring end
    pub fn mark_stopped(&self) -> DateTime<Utc> {
        let now = Utc::now();
        let mut state = self.lock();
        state.end_time = Some(now);
        debug!(
            end_time = %now,
            duration_secs = state.test_duration(now),
            "Metrics monitoring stopped"
        );
        now
    }

    /// Number of request outcomes recorded so far
    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    /// Copy of every request record, in recording order
    pub fn requests(&self) -> Vec<RequestRecord> {
        self.lock().requests.clone()
    }

    /// Copy of one metric's retained series, oldest first
    pub fn series(&self, metric: ResourceMetric) -> Vec<ResourceSnapshot> {
        self.lock()
            .system
            .get(&metric)
            .map(|series| series.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn test_duration(&self) -> f64 {
        self.lock().test_duration(Utc::now())
    }

    pub fn performance_summary(&self) -> PerformanceSummary {
        let state = self.lock();
        summary::reduce_performance(&state.requests, state.test_duration(Utc::now()))
    }

    pub fn cost_summary(&self) -> CostSummary {
        let state = self.lock();
        summary::reduce_costs(&state.requests, &state.costs)
    }

    pub fn error_summary(&self) -> ErrorSummary {
        summary::reduce_errors(&self.lock().errors)
    }

    pub fn system_metrics_summary(&self) -> BTreeMap<ResourceMetric, SystemMetricStats> {
        summary::reduce_system(&self.lock().system)
    }

    /// Full contents of the store
    pub fn export_raw_data(&self) -> RawData {
        self.lock().raw_data()
    }

    /// Every summary plus the raw export, all read under one lock
    ///
    /// Unlike calling the individual summaries in turn, the sections always
    /// describe the same set of records even while requests are still being
    /// recorded.
    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.lock();
        let now = Utc::now();

        StoreSnapshot {
            performance: summary::reduce_performance(&state.requests, state.test_duration(now)),
            costs: summary::reduce_costs(&state.requests, &state.costs),
            errors: summary::reduce_errors(&state.errors),
            system_metrics: summary::reduce_system(&state.system),
            raw_data: state.raw_data(),
        }
    }
}
