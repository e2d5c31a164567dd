//! Knowledge base scenario
//!
//! Queries carry a `category` (factual, analytical, troubleshooting and so on).
//! Under load every query is recorded as [`KNOWLEDGE_BASE_CATEGORY`]; the
//! per-category breakdown comes from [`query_patterns`], which sends each query
//! once, sequentially, before the concurrent runs.

use super::foundation::{estimate_tokens, request_cost};
use super::runner::RunTarget;
use crate::bedrock::{KnowledgeBaseRetriever, RetrievalRequest};
use crate::config::KnowledgeBaseConfig;
use crate::driver::{Attempt, RequestExecutor};
use crate::metrics::{MetricsStore, RequestOutcome};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Category every knowledge base outcome is recorded under
pub const KNOWLEDGE_BASE_CATEGORY: &str = "knowledge_base";

/// Default location of the query file
pub const DEFAULT_QUERIES_PATH: &str = "data/knowledge_base_queries.json";

/// Pause between two queries of the pattern pass
pub const QUERY_PATTERN_PAUSE: Duration = Duration::from_secs(1);

/// A question asked of the knowledge base
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseQuery {
    pub name: String,
    pub text: String,
    #[serde(default = "default_query_category")]
    pub category: String,
    /// Rough number of passages the question should draw on
    #[serde(default)]
    pub expected_results: u32,
}

fn default_query_category() -> String {
    "unknown".to_string()
}

impl KnowledgeBaseQuery {
    pub fn new(
        name: impl Into<String>,
        text: impl Into<String>,
        category: impl Into<String>,
        expected_results: u32,
    ) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            category: category.into(),
            expected_results,
        }
    }
}

/// Built-in queries, one per question category
pub fn default_queries() -> Vec<KnowledgeBaseQuery> {
    vec![
        KnowledgeBaseQuery::new(
            "simple_factual",
            "What is the main purpose of this service?",
            "factual",
            5,
        ),
        KnowledgeBaseQuery::new(
            "complex_analytical",
            "Compare the advantages and disadvantages of different approaches mentioned in the \
             documentation. Provide specific examples and use cases.",
            "analytical",
            10,
        ),
        KnowledgeBaseQuery::new(
            "technical_details",
            "What are the technical requirements and specifications for implementation?",
            "technical",
            8,
        ),
        KnowledgeBaseQuery::new(
            "troubleshooting",
            "How do I resolve common errors and issues that might occur during setup?",
            "troubleshooting",
            7,
        ),
        KnowledgeBaseQuery::new(
            "best_practices",
            "What are the recommended best practices and optimization techniques?",
            "best_practices",
            6,
        ),
        KnowledgeBaseQuery::new(
            "integration",
            "How does this integrate with other AWS services and third-party tools?",
            "integration",
            8,
        ),
        KnowledgeBaseQuery::new(
            "cost_optimization",
            "What are the cost considerations and how can I optimize expenses?",
            "cost",
            5,
        ),
        KnowledgeBaseQuery::new(
            "security",
            "What security measures and compliance requirements should I be aware of?",
            "security",
            9,
        ),
        KnowledgeBaseQuery::new(
            "performance",
            "How can I monitor and improve performance metrics?",
            "performance",
            6,
        ),
        KnowledgeBaseQuery::new(
            "scalability",
            "What are the scalability options and limitations I should consider?",
            "scalability",
            7,
        ),
    ]
}

/// Load queries from a JSON array file
///
/// Falls back to [`default_queries`] the same way prompt files fall back.
pub fn load_queries(path: impl AsRef<Path>) -> Result<Vec<KnowledgeBaseQuery>> {
    super::load_inputs(path.as_ref(), "knowledge base queries", default_queries)
}

/// USD cost of one query: generation tokens plus the flat retrieval charge
pub fn knowledge_base_cost(config: &KnowledgeBaseConfig, tokens_input: u64, tokens_output: u64) -> f64 {
    request_cost(&config.pricing, tokens_input, tokens_output) + config.retrieval_cost
}

/// Concurrency levels the knowledge base is run at
///
/// Levels above `max_concurrency` are skipped.
pub fn knowledge_base_levels(levels: &[usize], max_concurrency: usize) -> Vec<usize> {
    levels
        .iter()
        .copied()
        .filter(|&level| {
            let keep = level <= max_concurrency;
            if !keep {
                warn!(level, max_concurrency, "Skipping knowledge base concurrency level");
            }
            keep
        })
        .collect()
}

/// Measurements of one successful query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryResult {
    pub latency: Duration,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub cost: f64,
    pub citations: usize,
}

/// Sends queries to one knowledge base
pub struct KnowledgeBaseExecutor {
    config: KnowledgeBaseConfig,
    model_arn: String,
    retriever: Arc<dyn KnowledgeBaseRetriever>,
}

impl KnowledgeBaseExecutor {
    /// Executor for `config`, resolving the default model ARN in `region`
    pub fn new(config: KnowledgeBaseConfig, region: &str, retriever: Arc<dyn KnowledgeBaseRetriever>) -> Self {
        Self {
            model_arn: config.model_arn(region),
            config,
            retriever,
        }
    }

    pub fn knowledge_base_id(&self) -> &str {
        &self.config.kb_id
    }

    pub fn model_arn(&self) -> &str {
        &self.model_arn
    }

    /// Send one query
    ///
    /// Tokens are estimated from the query and answer text; the service does
    /// not report usage for knowledge base generation.
    pub async fn query(&self, query: &KnowledgeBaseQuery) -> Result<QueryResult> {
        let request = RetrievalRequest {
            knowledge_base_id: &self.config.kb_id,
            model_arn: &self.model_arn,
            number_of_results: self.config.number_of_results,
            query: &query.text,
        };
        let retrieval = self.retriever.retrieve_and_generate(&request).await?;

        let tokens_input = estimate_tokens(&query.text);
        let tokens_output = estimate_tokens(&retrieval.text);

        debug!(
            query = %query.name,
            category = %query.category,
            citations = retrieval.citations,
            session_id = ?retrieval.session_id,
            "Knowledge base query succeeded"
        );

        Ok(QueryResult {
            latency: retrieval.latency,
            tokens_input,
            tokens_output,
            cost: knowledge_base_cost(&self.config, tokens_input, tokens_output),
            citations: retrieval.citations,
        })
    }

    /// Run target sharing this executor
    pub fn target(self: &Arc<Self>) -> RunTarget<KnowledgeBaseQuery> {
        let executor: Arc<dyn RequestExecutor<KnowledgeBaseQuery>> = Arc::clone(self) as _;
        RunTarget::new(self.config.kb_id.clone(), executor)
    }
}

#[async_trait]
impl RequestExecutor<KnowledgeBaseQuery> for KnowledgeBaseExecutor {
    fn category(&self) -> &str {
        KNOWLEDGE_BASE_CATEGORY
    }

    async fn execute(&self, query: KnowledgeBaseQuery) -> Result<Attempt> {
        let result = self.query(&query).await?;
        Ok(Attempt::new(result.latency)
            .with_tokens(result.tokens_input, result.tokens_output)
            .with_cost(result.cost))
    }
}

/// Results of one query category
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPatternStats {
    pub total_queries: usize,
    pub successful_queries: usize,
    /// Seconds, over successful queries
    pub avg_latency: f64,
    /// Over successful queries
    pub avg_citations: f64,
    pub total_cost: f64,
}

/// Send every query once, in order, and summarize per query category
///
/// Each outcome is also recorded in `store`. `pause` separates two queries.
pub async fn query_patterns(
    executor: &KnowledgeBaseExecutor,
    store: &MetricsStore,
    queries: &[KnowledgeBaseQuery],
    pause: Duration,
) -> BTreeMap<String, QueryPatternStats> {
    // category -> (attempts, successful results)
    let mut by_category: BTreeMap<&str, (usize, Vec<QueryResult>)> = BTreeMap::new();

    for (index, query) in queries.iter().enumerate() {
        if index > 0 && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }

        let entry = by_category.entry(query.category.as_str()).or_default();
        entry.0 += 1;

        match executor.query(query).await {
            Ok(result) => {
                store.record(
                    RequestOutcome::success(KNOWLEDGE_BASE_CATEGORY, result.latency)
                        .with_tokens(result.tokens_input, result.tokens_output)
                        .with_cost(result.cost),
                );
                entry.1.push(result);
            }
            Err(e) => {
                warn!(query = %query.name, error = %e, "Knowledge base query failed");
                store.record(RequestOutcome::failure(KNOWLEDGE_BASE_CATEGORY, e.to_string()));
            }
        }
    }

    let patterns: BTreeMap<String, QueryPatternStats> = by_category
        .into_iter()
        .map(|(category, (attempts, results))| {
            let successes = results.len();
            let per_success = |total: f64| if successes == 0 { 0.0 } else { total / successes as f64 };
            let stats = QueryPatternStats {
                total_queries: attempts,
                successful_queries: successes,
                avg_latency: per_success(results.iter().map(|r| r.latency.as_secs_f64()).sum()),
                avg_citations: per_success(results.iter().map(|r| r.citations as f64).sum()),
                total_cost: results.iter().map(|r| r.cost).sum(),
            };
            (category.to_string(), stats)
        })
        .collect();

    info!(categories = patterns.len(), queries = queries.len(), "Query pattern test completed");
    patterns
}

/// Console lines for [`query_patterns`] results
pub fn render_query_patterns(patterns: &BTreeMap<String, QueryPatternStats>) -> String {
    let mut out = String::from("\nQuery Pattern Results:\n");
    for (category, stats) in patterns {
        out.push_str(&format!(
            "  {}:\n    Success Rate: {}/{}\n    Avg Latency: {:.3}s\n    Avg Citations: {:.1}\n    Cost: ${:.4}\n",
            category,
            stats.successful_queries,
            stats.total_queries,
            stats.avg_latency,
            stats.avg_citations,
            stats.total_cost
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bedrock::Retrieval;
    use crate::LoadTestError;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Answers every query with a fixed text; fails queries containing "errors"
    struct ScriptedRetriever {
        answer: String,
        requests: Mutex<Vec<(String, String, Option<u32>)>>,
    }

    impl ScriptedRetriever {
        fn new(answer: &str) -> Self {
            Self {
                answer: answer.to_string(),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl KnowledgeBaseRetriever for ScriptedRetriever {
        async fn retrieve_and_generate(&self, request: &RetrievalRequest<'_>) -> Result<Retrieval> {
            self.requests.lock().unwrap().push((
                request.knowledge_base_id.to_string(),
                request.model_arn.to_string(),
                request.number_of_results,
            ));
            if request.query.contains("errors") {
                return Err(LoadTestError::throttling_error("ThrottlingException"));
            }
            Ok(Retrieval {
                text: self.answer.clone(),
                citations: 3,
                session_id: Some("session-1".to_string()),
                latency: Duration::from_millis(800),
            })
        }
    }

    fn executor(retriever: Arc<ScriptedRetriever>) -> KnowledgeBaseExecutor {
        let mut config = KnowledgeBaseConfig::new("KB12345");
        config.number_of_results = Some(5);
        KnowledgeBaseExecutor::new(config, "us-west-2", retriever)
    }

    #[test]
    fn test_default_queries() {
        let queries = default_queries();
        assert_eq!(queries.len(), 10);
        assert_eq!(queries[0].category, "factual");
        assert_eq!(queries[6].category, "cost");
        assert_eq!(queries[1].expected_results, 10);
    }

    #[test]
    fn test_cost_includes_retrieval_charge() {
        let config = KnowledgeBaseConfig::new("KB1");
        let cost = knowledge_base_cost(&config, 1000, 1000);
        assert!((cost - (0.0008 + 0.004 + 0.0002)).abs() < 1e-12);
        assert!((knowledge_base_cost(&config, 0, 0) - 0.0002).abs() < 1e-12);
    }

    #[test]
    fn test_levels_above_cap_are_skipped() {
        assert_eq!(knowledge_base_levels(&[1, 10, 25, 20, 50], 20), vec![1, 10, 20]);
        assert!(knowledge_base_levels(&[50], 20).is_empty());
    }

    #[test]
    fn test_query_file_defaults_category() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queries.json");
        std::fs::write(&path, r#"[{"name": "q", "text": "What is it?"}]"#).unwrap();

        let queries = load_queries(&path).unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].category, "unknown");
        assert_eq!(load_queries(dir.path().join("missing.json")).unwrap(), default_queries());
    }

    #[tokio::test]
    async fn test_execute_estimates_tokens_and_cost() {
        let retriever = Arc::new(ScriptedRetriever::new(&"a".repeat(400)));
        let executor = executor(retriever.clone());
        assert_eq!(executor.category(), KNOWLEDGE_BASE_CATEGORY);

        let query = KnowledgeBaseQuery::new("q", "x".repeat(40), "factual", 5);
        let attempt = executor.execute(query).await.unwrap();

        assert_eq!(attempt.latency, Duration::from_millis(800));
        assert_eq!(attempt.tokens_input, 10);
        assert_eq!(attempt.tokens_output, 100);
        let expected = 10.0 / 1000.0 * 0.0008 + 100.0 / 1000.0 * 0.004 + 0.0002;
        assert!((attempt.cost - expected).abs() < 1e-12);

        let requests = retriever.requests.lock().unwrap();
        assert_eq!(requests[0].0, "KB12345");
        assert_eq!(
            requests[0].1,
            "arn:aws:bedrock:us-west-2::foundation-model/anthropic.claude-3-haiku-20240307-v1:0"
        );
        assert_eq!(requests[0].2, Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_patterns_group_by_category() {
        let executor = executor(Arc::new(ScriptedRetriever::new("answer text")));
        let store = MetricsStore::new();
        let queries = vec![
            KnowledgeBaseQuery::new("a", "What is it?", "factual", 5),
            KnowledgeBaseQuery::new("b", "How do I fix errors?", "troubleshooting", 7),
            KnowledgeBaseQuery::new("c", "Who built it?", "factual", 5),
        ];

        let started = tokio::time::Instant::now();
        let patterns = query_patterns(&executor, &store, &queries, Duration::from_secs(1)).await;
        assert!(started.elapsed() >= Duration::from_secs(2));

        let factual = &patterns["factual"];
        assert_eq!(factual.total_queries, 2);
        assert_eq!(factual.successful_queries, 2);
        assert!((factual.avg_latency - 0.8).abs() < 1e-9);
        assert_eq!(factual.avg_citations, 3.0);
        assert!(factual.total_cost > 0.0);

        let troubleshooting = &patterns["troubleshooting"];
        assert_eq!(troubleshooting.successful_queries, 0);
        assert_eq!(troubleshooting.avg_latency, 0.0);
        assert_eq!(troubleshooting.total_cost, 0.0);

        let performance = store.performance_summary();
        assert_eq!(performance.overall.total_requests, 3);
        assert_eq!(performance.categories[KNOWLEDGE_BASE_CATEGORY].successful_requests, 2);
        assert_eq!(store.error_summary().error_counts.len(), 1);

        let rendered = render_query_patterns(&patterns);
        assert!(rendered.contains("factual:"));
        assert!(rendered.contains("Success Rate: 0/1"));
    }

    #[test]
    fn test_target_is_named_after_knowledge_base() {
        let executor = Arc::new(executor(Arc::new(ScriptedRetriever::new("answer"))));
        let target = executor.target();
        assert_eq!(target.name(), "KB12345");
        assert_eq!(target.category(), KNOWLEDGE_BASE_CATEGORY);
        assert_eq!(Arc::strong_count(&executor), 2);
    }
}
