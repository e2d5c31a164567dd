//! Knowledge base retrieval-augmented generation
//!
//! A knowledge base query retrieves passages from the indexed documents and
//! has a foundation model answer from them in one `RetrieveAndGenerate` call.

use super::{load_sdk_config, retry_policy};
use crate::config::AwsConfig;
use crate::error::{retry_with_backoff, RetryConfig};
use crate::{LoadTestError, Result};
use async_trait::async_trait;
use aws_sdk_bedrockagentruntime::types::{
    KnowledgeBaseRetrievalConfiguration, KnowledgeBaseRetrieveAndGenerateConfiguration,
    KnowledgeBaseVectorSearchConfiguration, RetrieveAndGenerateConfiguration,
    RetrieveAndGenerateInput, RetrieveAndGenerateType,
};
use aws_sdk_bedrockagentruntime::Client as AgentRuntimeClient;
use std::time::{Duration, Instant};
use tracing::debug;

/// One `RetrieveAndGenerate` request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalRequest<'a> {
    pub knowledge_base_id: &'a str,
    /// ARN of the model generating the answer
    pub model_arn: &'a str,
    /// Passages to retrieve; the service default when `None`
    pub number_of_results: Option<u32>,
    pub query: &'a str,
}

/// Successful knowledge base query
#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval {
    /// Generated answer
    pub text: String,
    /// Number of citations backing the answer
    pub citations: usize,
    pub session_id: Option<String>,
    /// Time spent in the successful call, excluding earlier retried attempts
    pub latency: Duration,
}

/// Queries a knowledge base
#[async_trait]
pub trait KnowledgeBaseRetriever: Send + Sync {
    async fn retrieve_and_generate(&self, request: &RetrievalRequest<'_>) -> Result<Retrieval>;
}

/// Bedrock agent runtime client with retry
#[derive(Debug, Clone)]
pub struct BedrockAgentClient {
    client: AgentRuntimeClient,
    region: String,
    retry: RetryConfig,
}

impl BedrockAgentClient {
    /// Create a client for `region`, optionally from a named credentials profile
    pub async fn new(region: impl Into<String>, profile: Option<String>) -> Self {
        let region = region.into();
        let aws_config = load_sdk_config(region.clone(), profile).await;

        Self {
            client: AgentRuntimeClient::new(&aws_config),
            region,
            retry: RetryConfig::default(),
        }
    }

    /// Create a client from the `aws` section of the test configuration
    pub async fn from_config(config: &AwsConfig) -> Self {
        Self::new(config.region.clone(), config.profile.clone())
            .await
            .with_retry(retry_policy(config))
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Region the client sends requests to
    pub fn region(&self) -> &str {
        &self.region
    }

    async fn retrieve_once(&self, request: &RetrievalRequest<'_>) -> Result<Retrieval> {
        let configuration = retrieve_and_generate_configuration(request)?;
        let input = RetrieveAndGenerateInput::builder()
            .text(request.query)
            .build()
            .map_err(|e| LoadTestError::invalid_input(format!("Invalid knowledge base query: {}", e)))?;

        let start = Instant::now();
        let response = self
            .client
            .retrieve_and_generate()
            .input(input)
            .retrieve_and_generate_configuration(configuration)
            .send()
            .await?;
        let latency = start.elapsed();

        let session_id = response.session_id();
        Ok(Retrieval {
            text: response
                .output()
                .map(|output| output.text().to_string())
                .unwrap_or_default(),
            citations: response.citations().len(),
            session_id: (!session_id.is_empty()).then(|| session_id.to_string()),
            latency,
        })
    }
}

fn retrieve_and_generate_configuration(
    request: &RetrievalRequest<'_>,
) -> Result<RetrieveAndGenerateConfiguration> {
    let invalid = |e: aws_sdk_bedrockagentruntime::error::BuildError| {
        LoadTestError::invalid_input(format!("Invalid knowledge base configuration: {}", e))
    };

    let mut knowledge_base = KnowledgeBaseRetrieveAndGenerateConfiguration::builder()
        .knowledge_base_id(request.knowledge_base_id)
        .model_arn(request.model_arn);

    if let Some(results) = request.number_of_results {
        let vector_search = KnowledgeBaseVectorSearchConfiguration::builder()
            .number_of_results(i32::try_from(results).unwrap_or(i32::MAX))
            .build();
        knowledge_base = knowledge_base.retrieval_configuration(
            KnowledgeBaseRetrievalConfiguration::builder()
                .vector_search_configuration(vector_search)
                .build(),
        );
    }

    RetrieveAndGenerateConfiguration::builder()
        .r#type(RetrieveAndGenerateType::KnowledgeBase)
        .knowledge_base_configuration(knowledge_base.build().map_err(invalid)?)
        .build()
        .map_err(invalid)
}

#[async_trait]
impl KnowledgeBaseRetriever for BedrockAgentClient {
    async fn retrieve_and_generate(&self, request: &RetrievalRequest<'_>) -> Result<Retrieval> {
        let retrieval = retry_with_backoff(|| self.retrieve_once(request), &self.retry)
            .await
            .inspect_err(|e| {
                debug!(
                    knowledge_base_id = %request.knowledge_base_id,
                    error = %e,
                    "Knowledge base query failed"
                )
            })?;

        debug!(
            knowledge_base_id = %request.knowledge_base_id,
            latency_ms = retrieval.latency.as_millis() as u64,
            citations = retrieval.citations,
            "Knowledge base query completed"
        );

        Ok(retrieval)
    }
}
