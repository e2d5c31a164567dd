//! Bedrock load test

use anyhow::{bail, Context, Result};
use bedrock_loadtest::bedrock::{BedrockAgentClient, BedrockClient, KnowledgeBaseRetriever, ModelInvoker};
use bedrock_loadtest::config::{KnowledgeBaseConfig, LoadTestConfig, ModelsConfig};
use bedrock_loadtest::logging::{init_logging, LoggingConfig};
use bedrock_loadtest::metrics::SysinfoProbe;
use bedrock_loadtest::report::cloudwatch::{self, CloudWatchPublisher};
use bedrock_loadtest::report::{LoadTestReport, FOUNDATION_MODEL_TEST_TYPE, KNOWLEDGE_BASE_TEST_TYPE};
use bedrock_loadtest::scenario::{
    self, foundation_targets, knowledge_base_levels, query_patterns, render_query_patterns,
    KnowledgeBaseExecutor, LoadTestRunner, QUERY_PATTERN_PAUSE,
};
use clap::{Parser, ValueEnum};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scenario {
    /// Invoke foundation models directly
    FoundationModel,
    /// Query a knowledge base through RetrieveAndGenerate
    KnowledgeBase,
}

#[derive(Parser)]
#[command(name = "bedrock-loadtest")]
#[command(about = "Load test AWS Bedrock foundation models and knowledge bases")]
struct Args {
    /// Scenario to run
    #[arg(long, value_enum, default_value_t = Scenario::FoundationModel)]
    scenario: Scenario,

    /// Test configuration file (TOML, YAML or JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Models configuration file
    #[arg(long, default_value = "config/models_config.yaml")]
    models_config: PathBuf,

    /// Comma-separated model names to test; all configured models by default
    #[arg(long, value_delimiter = ',')]
    models: Option<Vec<String>>,

    /// JSON file with test prompts
    #[arg(long, default_value = scenario::DEFAULT_PROMPTS_PATH)]
    prompts: PathBuf,

    /// Knowledge base id, overriding the models configuration
    #[arg(long)]
    kb_id: Option<String>,

    /// JSON file with knowledge base queries
    #[arg(long, default_value = scenario::DEFAULT_QUERIES_PATH)]
    queries: PathBuf,

    /// Comma-separated concurrency levels, overriding the configuration
    #[arg(long, value_delimiter = ',')]
    concurrency: Option<Vec<usize>>,

    /// Duration of each run in seconds, overriding the configuration
    #[arg(long)]
    duration: Option<u64>,

    /// Report output directory, overriding the configuration
    #[arg(long)]
    report_dir: Option<PathBuf>,

    /// Publish the run summary to this CloudWatch namespace
    #[arg(long, num_args = 0..=1, default_missing_value = cloudwatch::DEFAULT_NAMESPACE)]
    cloudwatch_namespace: Option<String>,

    /// Console log level (trace, debug, info, warn, error); LOADTEST_LOG_LEVEL or info when unset
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn logging_config(&self, base: LoggingConfig) -> LoggingConfig {
        match &self.log_level {
            Some(level) => base.with_console_level(level),
            None => base,
        }
    }

    fn load_config(&self) -> Result<LoadTestConfig> {
        let mut config = match &self.config {
            Some(path) => LoadTestConfig::from_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => LoadTestConfig::default(),
        }
        .merge_with_env()?;

        if let Some(levels) = &self.concurrency {
            config.load_test.concurrent_users = levels.clone();
        }
        if let Some(seconds) = self.duration {
            config.load_test.test_duration = Duration::from_secs(seconds);
        }
        if let Some(dir) = &self.report_dir {
            config.reports.output_dir = dir.clone();
        }
        if let Some(namespace) = &self.cloudwatch_namespace {
            config.reports.cloudwatch_namespace = Some(namespace.clone());
        }

        config.validate()?;
        Ok(config)
    }

    /// Knowledge base from the models configuration, with `--kb-id` applied
    fn knowledge_base(&self, models: &ModelsConfig) -> Result<KnowledgeBaseConfig> {
        match (models.knowledge_base.clone(), &self.kb_id) {
            (Some(mut kb), Some(kb_id)) => {
                kb.kb_id = kb_id.clone();
                Ok(kb)
            }
            (Some(kb), None) => Ok(kb),
            (None, Some(kb_id)) => Ok(KnowledgeBaseConfig::new(kb_id.clone())),
            (None, None) => bail!("No knowledge base configured; pass --kb-id or add knowledge_base to the models configuration"),
        }
    }
}

async fn run_foundation_models(
    args: &Args,
    config: &LoadTestConfig,
    models: &ModelsConfig,
) -> Result<LoadTestReport> {
    let prompts = scenario::load_prompts(&args.prompts)?;

    let invoker: Arc<dyn ModelInvoker> = Arc::new(BedrockClient::from_config(&config.aws).await);
    let targets = foundation_targets(models, args.models.as_deref(), invoker)?;

    info!(
        models = targets.len(),
        levels = ?config.load_test.concurrent_users,
        duration_secs = config.load_test.test_duration.as_secs(),
        "Starting foundation model load test"
    );

    let runner = LoadTestRunner::new(config.clone());

    tokio::select! {
        result = runner.run_suite(&targets, prompts, SysinfoProbe::new()) => {
            let records = result?;
            info!(runs = records.len(), "Load test completed");
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, writing report for the completed requests");
        }
    }

    let report = LoadTestReport::from_store(
        runner.store(),
        FOUNDATION_MODEL_TEST_TYPE,
        &serde_json::json!({
            "test_config": config,
            "models": models,
        }),
    )?;
    let path = report.write_report(&config.reports.output_dir, "foundation_model_test")?;

    report.print_summary();
    println!("Report saved to: {}", path.display());
    Ok(report)
}

async fn run_knowledge_base(
    args: &Args,
    config: &LoadTestConfig,
    models: &ModelsConfig,
) -> Result<LoadTestReport> {
    let kb = args.knowledge_base(models)?;
    let queries = scenario::load_queries(&args.queries)?;

    let mut kb_config = config.clone();
    kb_config.load_test.concurrent_users =
        knowledge_base_levels(&config.load_test.concurrent_users, kb.max_concurrency);
    if kb_config.load_test.concurrent_users.is_empty() {
        bail!(
            "Every concurrency level exceeds the knowledge base limit of {}",
            kb.max_concurrency
        );
    }

    let retriever: Arc<dyn KnowledgeBaseRetriever> =
        Arc::new(BedrockAgentClient::from_config(&config.aws).await);
    let executor = Arc::new(KnowledgeBaseExecutor::new(kb.clone(), &config.aws.region, retriever));
    let targets = [executor.target()];

    info!(
        knowledge_base_id = %kb.kb_id,
        model_arn = %executor.model_arn(),
        queries = queries.len(),
        levels = ?kb_config.load_test.concurrent_users,
        "Starting knowledge base load test"
    );

    let runner = LoadTestRunner::new(kb_config.clone());
    let mut patterns = BTreeMap::new();

    let suite = runner.monitored(SysinfoProbe::new(), async {
        patterns = query_patterns(&executor, runner.store(), &queries, QUERY_PATTERN_PAUSE).await;
        runner.run_all(&targets, queries.clone()).await
    });

    tokio::select! {
        result = suite => {
            let records = result?;
            info!(runs = records.len(), "Load test completed");
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, writing report for the completed requests");
        }
    }

    let report = LoadTestReport::from_store(
        runner.store(),
        KNOWLEDGE_BASE_TEST_TYPE,
        &serde_json::json!({
            "test_config": kb_config,
            "knowledge_base": kb,
        }),
    )?
    .with_knowledge_base_id(kb.kb_id.clone())
    .with_test_results(&serde_json::json!({ "query_patterns": patterns }))?;
    let path = report.write_report(&config.reports.output_dir, "knowledge_base_test")?;

    report.print_summary();
    println!("{}", render_query_patterns(&patterns));
    println!("Report saved to: {}", path.display());
    Ok(report)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _logging = init_logging(args.logging_config(LoggingConfig::from_env()))?;

    let config = args.load_config()?;
    let models = ModelsConfig::from_file(&args.models_config)
        .with_context(|| format!("Failed to load {}", args.models_config.display()))?;
    models.validate()?;

    let report = match args.scenario {
        Scenario::FoundationModel => run_foundation_models(&args, &config, &models).await?,
        Scenario::KnowledgeBase => run_knowledge_base(&args, &config, &models).await?,
    };

    if let Some(namespace) = &config.reports.cloudwatch_namespace {
        let publisher = CloudWatchPublisher::from_config(&config.aws).await;
        if let Err(e) = cloudwatch::publish_summary(&publisher, namespace, &report).await {
            warn!(error = %e, namespace = %namespace, "CloudWatch publishing failed");
        }
    }

    Ok(())
}
