//! Load test configuration
//!
//! Two documents drive a test suite: the test configuration ([`LoadTestConfig`])
//! describing AWS access, concurrency levels, monitoring and report output, and
//! the models configuration ([`ModelsConfig`]) naming the Bedrock models under
//! test together with their inference parameters and pricing.
//!
//! Both load from TOML, YAML or JSON files. The test configuration additionally
//! accepts environment variable overrides so that CI jobs can shorten a run
//! without editing files.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

/// Longest accepted duration of a single run
pub const MAX_TEST_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Model the knowledge base generates answers with unless configured otherwise
pub const DEFAULT_KNOWLEDGE_BASE_MODEL: &str = "anthropic.claude-3-haiku-20240307-v1:0";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable parsing error: {0}")]
    EnvVarParse(String),
    #[error("File parsing error: {0}")]
    FileParse(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Test suite configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoadTestConfig {
    /// AWS access configuration
    #[serde(default)]
    pub aws: AwsConfig,
    /// Load profile of every run
    #[serde(default)]
    pub load_test: LoadProfileConfig,
    /// Resource sampling configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    /// Report output configuration
    #[serde(default)]
    pub reports: ReportsConfig,
}

/// AWS access configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    /// AWS region hosting the Bedrock endpoint
    #[serde(default = "default_region")]
    pub region: String,
    /// Named credentials profile; the default chain is used when absent
    #[serde(default)]
    pub profile: Option<String>,
    /// Retries after the first attempt for throttled or transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay in milliseconds, doubled on every retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

/// Load profile shared by every run of a suite
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadProfileConfig {
    /// Concurrency levels to run each model at, in order
    #[serde(default = "default_concurrent_users")]
    pub concurrent_users: Vec<usize>,
    /// Duration of a single run
    #[serde(with = "duration_seconds", default = "default_test_duration")]
    pub test_duration: Duration,
    /// Pause between two consecutive runs
    #[serde(with = "duration_seconds", default = "default_pause_between_tests")]
    pub pause_between_tests: Duration,
    /// Upper bound on waiting for in-flight attempts after the run window
    #[serde(with = "duration_seconds", default = "default_drain_timeout")]
    pub drain_timeout: Duration,
}

/// Resource sampler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Time between two resource snapshots
    #[serde(with = "duration_seconds", default = "default_sample_interval")]
    pub sample_interval: Duration,
    /// Samples retained per resource metric
    #[serde(default = "default_retention")]
    pub retention: usize,
    /// Time the sampler is given to exit after monitoring stops
    #[serde(with = "duration_seconds", default = "default_stop_grace")]
    pub stop_grace: Duration,
}

/// Report output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportsConfig {
    /// Directory receiving JSON reports
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// CloudWatch namespace receiving the run summary; nothing is published when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloudwatch_namespace: Option<String>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            profile: None,
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl Default for LoadProfileConfig {
    fn default() -> Self {
        Self {
            concurrent_users: default_concurrent_users(),
            test_duration: default_test_duration(),
            pause_between_tests: default_pause_between_tests(),
            drain_timeout: default_drain_timeout(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            sample_interval: default_sample_interval(),
            retention: default_retention(),
            stop_grace: default_stop_grace(),
        }
    }
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            cloudwatch_namespace: None,
        }
    }
}

impl LoadTestConfig {
    /// Load configuration from a file (supports TOML, YAML, JSON)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        parse_file(path.as_ref())
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().merge_with_env()
    }

    /// Apply environment variable overrides (environment takes precedence)
    pub fn merge_with_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(region) = env::var("AWS_REGION") {
            self.aws.region = region;
        }
        if let Ok(profile) = env::var("AWS_PROFILE") {
            self.aws.profile = Some(profile);
        }
        if let Ok(duration) = env::var("LOADTEST_TEST_DURATION") {
            self.load_test.test_duration =
                Duration::from_secs(duration.trim().parse().map_err(|e| {
                    ConfigError::EnvVarParse(format!("LOADTEST_TEST_DURATION: {}", e))
                })?);
        }
        if let Ok(levels) = env::var("LOADTEST_CONCURRENT_USERS") {
            self.load_test.concurrent_users = parse_concurrency_levels(&levels)?;
        }
        if let Ok(dir) = env::var("LOADTEST_REPORT_DIR") {
            self.reports.output_dir = PathBuf::from(dir);
        }
        if let Ok(namespace) = env::var("LOADTEST_CLOUDWATCH_NAMESPACE") {
            self.reports.cloudwatch_namespace = Some(namespace);
        }

        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.aws.region.is_empty() {
            return Err(ConfigError::Validation(
                "AWS region cannot be empty".to_string(),
            ));
        }

        if self.load_test.concurrent_users.is_empty() {
            return Err(ConfigError::Validation(
                "At least one concurrency level is required".to_string(),
            ));
        }
        if self.load_test.concurrent_users.contains(&0) {
            return Err(ConfigError::Validation(
                "Concurrency levels must be greater than 0".to_string(),
            ));
        }
        if self.load_test.test_duration.is_zero() {
            return Err(ConfigError::Validation(
                "Test duration must be greater than 0".to_string(),
            ));
        }
        if self.load_test.test_duration > MAX_TEST_DURATION {
            return Err(ConfigError::Validation(format!(
                "Test duration cannot exceed {} seconds",
                MAX_TEST_DURATION.as_secs()
            )));
        }
        if self.load_test.drain_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "Drain timeout must be greater than 0".to_string(),
            ));
        }

        if self.monitoring.sample_interval.is_zero() {
            return Err(ConfigError::Validation(
                "Sample interval must be greater than 0".to_string(),
            ));
        }
        if self.monitoring.retention == 0 {
            return Err(ConfigError::Validation(
                "Sample retention must be greater than 0".to_string(),
            ));
        }
        if self.monitoring.stop_grace.is_zero() {
            return Err(ConfigError::Validation(
                "Sampler stop grace must be greater than 0".to_string(),
            ));
        }

        if matches!(&self.reports.cloudwatch_namespace, Some(namespace) if namespace.is_empty()) {
            return Err(ConfigError::Validation(
                "CloudWatch namespace cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Models under test, keyed by the short name used in categories and reports
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelsConfig {
    #[serde(default)]
    pub foundation_models: BTreeMap<String, ModelConfig>,
    /// Knowledge base for the retrieval-augmented generation scenario
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_base: Option<KnowledgeBaseConfig>,
}

/// Bedrock knowledge base queried through `RetrieveAndGenerate`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseConfig {
    pub kb_id: String,
    /// ARN of the generating model; Claude 3 Haiku in the client region when absent
    #[serde(default)]
    pub model_arn: Option<String>,
    /// Passages retrieved per query; the service default when absent
    #[serde(default)]
    pub number_of_results: Option<u32>,
    /// Concurrency levels above this are skipped to stay clear of throttling
    #[serde(default = "default_kb_max_concurrency")]
    pub max_concurrency: usize,
    /// Generating model price per 1000 tokens
    #[serde(default = "default_kb_pricing")]
    pub pricing: ModelPricing,
    /// Flat retrieval charge per query in USD
    #[serde(default = "default_kb_retrieval_cost")]
    pub retrieval_cost: f64,
}

impl KnowledgeBaseConfig {
    pub fn new(kb_id: impl Into<String>) -> Self {
        Self {
            kb_id: kb_id.into(),
            model_arn: None,
            number_of_results: None,
            max_concurrency: default_kb_max_concurrency(),
            pricing: default_kb_pricing(),
            retrieval_cost: default_kb_retrieval_cost(),
        }
    }

    /// Configured model ARN, or the default model's ARN in `region`
    pub fn model_arn(&self, region: &str) -> String {
        self.model_arn.clone().unwrap_or_else(|| {
            format!(
                "arn:aws:bedrock:{}::foundation-model/{}",
                region, DEFAULT_KNOWLEDGE_BASE_MODEL
            )
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.kb_id.is_empty() {
            return Err(ConfigError::Validation(
                "Knowledge base kb_id cannot be empty".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Validation(
                "Knowledge base max_concurrency must be greater than 0".to_string(),
            ));
        }
        if self.number_of_results == Some(0) {
            return Err(ConfigError::Validation(
                "Knowledge base number_of_results must be greater than 0".to_string(),
            ));
        }
        if self.pricing.input_tokens < 0.0
            || self.pricing.output_tokens < 0.0
            || self.retrieval_cost < 0.0
        {
            return Err(ConfigError::Validation(
                "Knowledge base pricing cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// A single Bedrock model and its inference parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Bedrock model id or inference profile id
    pub model_id: String,
    /// Maximum tokens generated per request
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default)]
    pub pricing: ModelPricing,
}

/// Price per 1000 tokens in USD
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelPricing {
    #[serde(default)]
    pub input_tokens: f64,
    #[serde(default)]
    pub output_tokens: f64,
}

impl ModelConfig {
    /// Model with default inference parameters and no pricing
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            pricing: ModelPricing::default(),
        }
    }

    /// Set the pricing (USD per 1000 tokens)
    pub fn with_pricing(mut self, input_tokens: f64, output_tokens: f64) -> Self {
        self.pricing = ModelPricing {
            input_tokens,
            output_tokens,
        };
        self
    }
}

impl ModelsConfig {
    /// Load configuration from a file (supports TOML, YAML, JSON)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        parse_file(path.as_ref())
    }

    /// Look up a model by name
    pub fn model(&self, name: &str) -> Option<&ModelConfig> {
        self.foundation_models.get(name)
    }

    /// Validate the configuration
    ///
    /// At least one foundation model or a knowledge base must be configured.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.foundation_models.is_empty() && self.knowledge_base.is_none() {
            return Err(ConfigError::Validation(
                "At least one foundation model or a knowledge base must be configured".to_string(),
            ));
        }

        if let Some(knowledge_base) = &self.knowledge_base {
            knowledge_base.validate()?;
        }

        for (name, model) in &self.foundation_models {
            if model.model_id.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Model '{}' has an empty model_id",
                    name
                )));
            }
            if model.max_tokens == 0 {
                return Err(ConfigError::Validation(format!(
                    "Model '{}' max_tokens must be greater than 0",
                    name
                )));
            }
            if model.pricing.input_tokens < 0.0 || model.pricing.output_tokens < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "Model '{}' pricing cannot be negative",
                    name
                )));
            }
        }

        Ok(())
    }
}

fn parse_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = fs::read_to_string(path)?;
    let extension = path.extension().and_then(|s| s.to_str());

    match extension {
        Some("toml") => toml::from_str(&content).map_err(|e| ConfigError::FileParse(e.to_string())),
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&content).map_err(|e| ConfigError::FileParse(e.to_string()))
        }
        Some("json") => {
            serde_json::from_str(&content).map_err(|e| ConfigError::FileParse(e.to_string()))
        }
        _ => Err(ConfigError::FileParse(
            "Unsupported file format. Use .toml, .yaml, .yml, or .json".to_string(),
        )),
    }
}

/// Parse concurrency levels from environment variable format
/// Expected format: "1,5,10"
fn parse_concurrency_levels(levels: &str) -> Result<Vec<usize>, ConfigError> {
    levels
        .split(',')
        .map(str::trim)
        .filter(|level| !level.is_empty())
        .map(|level| {
            level.parse::<usize>().map_err(|e| {
                ConfigError::EnvVarParse(format!("LOADTEST_CONCURRENT_USERS '{}': {}", level, e))
            })
        })
        .collect()
}

/// Custom serialization for Duration as seconds
mod duration_seconds {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Default value functions for serde
fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_retries() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_concurrent_users() -> Vec<usize> {
    vec![1, 5, 10]
}

fn default_kb_max_concurrency() -> usize {
    20
}

fn default_kb_pricing() -> ModelPricing {
    ModelPricing {
        input_tokens: 0.0008,
        output_tokens: 0.004,
    }
}

// 0.001 OCU-hour per query at $0.20 per OCU-hour
fn default_kb_retrieval_cost() -> f64 {
    0.0002
}

fn default_test_duration() -> Duration {
    Duration::from_secs(60)
}

fn default_pause_between_tests() -> Duration {
    Duration::from_secs(10)
}

fn default_drain_timeout() -> Duration {
    crate::driver::DEFAULT_DRAIN_TIMEOUT
}

fn default_sample_interval() -> Duration {
    crate::metrics::system::DEFAULT_SAMPLE_INTERVAL
}

fn default_retention() -> usize {
    crate::metrics::DEFAULT_RETENTION
}

fn default_stop_grace() -> Duration {
    crate::metrics::system::DEFAULT_STOP_GRACE
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f64 {
    0.7
}

fn default_top_p() -> f64 {
    0.9
}
