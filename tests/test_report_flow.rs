//! Suite run through to the written report

use async_trait::async_trait;
use bedrock_loadtest::bedrock::{
    Invocation, KnowledgeBaseRetriever, ModelInvoker, Retrieval, RetrievalRequest,
};
use bedrock_loadtest::config::{KnowledgeBaseConfig, LoadTestConfig, ModelConfig, ModelsConfig};
use bedrock_loadtest::metrics::{ResourceMetric, ResourceProbe};
use bedrock_loadtest::report::{LoadTestReport, FOUNDATION_MODEL_TEST_TYPE, KNOWLEDGE_BASE_TEST_TYPE};
use bedrock_loadtest::scenario::{
    default_prompts, default_queries, foundation_targets, query_patterns, KnowledgeBaseExecutor,
    LoadTestRunner, KNOWLEDGE_BASE_CATEGORY,
};
use bedrock_loadtest::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct MockInvoker;

#[async_trait]
impl ModelInvoker for MockInvoker {
    async fn invoke(&self, _model_id: &str, _payload: &Value) -> Result<Invocation> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(Invocation {
            body: json!({
                "content": [{"type": "text", "text": "ok"}],
                "usage": {"input_tokens": 100, "output_tokens": 200}
            }),
            latency: Duration::from_millis(200),
            request_id: None,
        })
    }
}

struct MockRetriever;

#[async_trait]
impl KnowledgeBaseRetriever for MockRetriever {
    async fn retrieve_and_generate(&self, _request: &RetrievalRequest<'_>) -> Result<Retrieval> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(Retrieval {
            text: "a".repeat(80),
            citations: 2,
            session_id: None,
            latency: Duration::from_millis(500),
        })
    }
}

struct StaticProbe;

impl ResourceProbe for StaticProbe {
    fn sample(&mut self) -> Result<Vec<(ResourceMetric, f64)>> {
        Ok(ResourceMetric::ALL.iter().map(|metric| (*metric, 1.0)).collect())
    }
}

#[tokio::test(start_paused = true)]
async fn test_suite_report_on_disk() {
    let mut config = LoadTestConfig::default();
    config.load_test.concurrent_users = vec![2];
    config.load_test.test_duration = Duration::from_secs(2);

    let mut models = ModelsConfig::default();
    models.foundation_models.insert(
        "haiku".to_string(),
        ModelConfig::new("anthropic.claude-3-haiku-20240307-v1:0").with_pricing(0.25, 1.25),
    );

    let targets = foundation_targets(&models, None, Arc::new(MockInvoker)).unwrap();
    let runner = LoadTestRunner::new(config.clone());
    let records = runner
        .run_suite(&targets, default_prompts(), StaticProbe)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);

    let report = LoadTestReport::from_store(runner.store(), FOUNDATION_MODEL_TEST_TYPE, &config).unwrap();
    let dir = TempDir::new().unwrap();
    let path = report.write_report(dir.path(), "foundation_model_test").unwrap();

    let written: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    let total = written["performance"]["overall"]["total_requests"].as_u64().unwrap();
    assert_eq!(total as usize, records[0].outcome.total_requests);
    assert!(written["performance"]["foundation_model_haiku"]["p95_latency"].as_f64().unwrap() > 0.0);

    // 100 input and 200 output tokens per request
    let per_request = 0.1 * 0.25 + 0.2 * 1.25;
    let total_cost = written["costs"]["costs"]["total"].as_f64().unwrap();
    assert!((total_cost - per_request * total as f64).abs() < 1e-9);

    assert_eq!(written["test_info"]["test_type"], FOUNDATION_MODEL_TEST_TYPE);
    assert_eq!(written["test_info"]["configuration"]["load_test"]["test_duration"], 2);
    assert!(written["system_metrics"]["cpu_percent"].is_object());
    assert!(written["raw_data"]["test_info"]["duration"].is_number());
}

#[tokio::test(start_paused = true)]
async fn test_knowledge_base_report_on_disk() {
    let mut config = LoadTestConfig::default();
    config.load_test.concurrent_users = vec![2];
    config.load_test.test_duration = Duration::from_secs(2);

    let kb = KnowledgeBaseConfig::new("KB12345");
    let executor = Arc::new(KnowledgeBaseExecutor::new(kb, "us-east-1", Arc::new(MockRetriever)));
    let targets = [executor.target()];
    let queries = default_queries();

    let runner = LoadTestRunner::new(config.clone());
    let (patterns, records) = runner
        .monitored(StaticProbe, async {
            let patterns = query_patterns(&executor, runner.store(), &queries, Duration::from_secs(1)).await;
            let records = runner.run_all(&targets, queries.clone()).await?;
            Ok::<_, bedrock_loadtest::LoadTestError>((patterns, records))
        })
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(patterns.len(), 10);
    assert!(patterns.values().all(|stats| stats.successful_queries == stats.total_queries));

    let report = LoadTestReport::from_store(runner.store(), KNOWLEDGE_BASE_TEST_TYPE, &config)
        .unwrap()
        .with_knowledge_base_id("KB12345")
        .with_test_results(&json!({ "query_patterns": patterns }))
        .unwrap();
    let dir = TempDir::new().unwrap();
    let path = report.write_report(dir.path(), "knowledge_base_test").unwrap();

    let written: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    let total = written["performance"]["overall"]["total_requests"].as_u64().unwrap() as usize;
    assert_eq!(total, queries.len() + records[0].outcome.total_requests);
    assert!(written["performance"][KNOWLEDGE_BASE_CATEGORY].is_object());
    assert_eq!(written["test_info"]["knowledge_base_id"], "KB12345");
    assert_eq!(written["test_results"]["query_patterns"]["security"]["avg_citations"], 2.0);

    // 20 output tokens per answer plus the flat retrieval charge
    let total_cost = written["costs"]["costs"]["total"].as_f64().unwrap();
    assert!(total_cost >= total as f64 * (0.02 * 0.004 + 0.0002));
}
