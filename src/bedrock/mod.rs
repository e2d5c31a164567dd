//! AWS Bedrock model invocation
//!
//! [`ModelInvoker`] is the seam between scenarios and the remote service. The
//! production implementation, [`BedrockClient`], calls `InvokeModel` through the
//! AWS SDK and retries throttled or transiently failing calls with exponential
//! backoff before reporting a final success or failure.
//!
//! Knowledge base queries go through the [`knowledge_base`] counterpart,
//! [`KnowledgeBaseRetriever`], backed by the Bedrock agent runtime.

pub mod knowledge_base;
pub mod payload;

pub use knowledge_base::{BedrockAgentClient, KnowledgeBaseRetriever, Retrieval, RetrievalRequest};
pub use payload::{ModelFamily, TokenUsage};

use crate::config::AwsConfig;
use crate::error::{retry_with_backoff, RetryConfig};
use crate::Result;
use async_trait::async_trait;
use aws_sdk_bedrockruntime::operation::RequestId;
use aws_sdk_bedrockruntime::Client as BedrockRuntimeClient;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::debug;

/// Successful model invocation
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Parsed JSON response body
    pub body: Value,
    /// Time spent in the successful call, excluding earlier retried attempts
    pub latency: Duration,
    pub request_id: Option<String>,
}

/// Invokes a model with a JSON payload
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(&self, model_id: &str, payload: &Value) -> Result<Invocation>;
}

/// Shared AWS configuration for `region`, optionally from a named profile
pub(crate) async fn load_sdk_config(region: String, profile: Option<String>) -> aws_config::SdkConfig {
    let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region));

    if let Some(profile) = profile {
        config_loader = config_loader.profile_name(profile);
    }

    config_loader.load().await
}

/// Backoff policy from the `aws` section of the test configuration
pub(crate) fn retry_policy(config: &AwsConfig) -> RetryConfig {
    RetryConfig {
        max_retries: config.max_retries,
        base_delay_ms: config.base_delay_ms,
        exponential_backoff: true,
        ..Default::default()
    }
}

/// Bedrock runtime client with retry
#[derive(Debug, Clone)]
pub struct BedrockClient {
    client: BedrockRuntimeClient,
    retry: RetryConfig,
}

impl BedrockClient {
    /// Create a client for `region`, optionally from a named credentials profile
    pub async fn new(region: impl Into<String>, profile: Option<String>) -> Self {
        let aws_config = load_sdk_config(region.into(), profile).await;

        Self {
            client: BedrockRuntimeClient::new(&aws_config),
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

    async fn invoke_once(&self, model_id: &str, request_body: &[u8]) -> Result<Invocation> {
        let start = Instant::now();

        let response = self
            .client
            .invoke_model()
            .model_id(model_id)
            .content_type("application/json")
            .accept("application/json")
            .body(aws_sdk_bedrockruntime::primitives::Blob::new(request_body))
            .send()
            .await?;

        let latency = start.elapsed();
        let body: Value = serde_json::from_slice(response.body().as_ref())?;

        Ok(Invocation {
            body,
            latency,
            request_id: response.request_id().map(str::to_string),
        })
    }
}

#[async_trait]
impl ModelInvoker for BedrockClient {
    async fn invoke(&self, model_id: &str, payload: &Value) -> Result<Invocation> {
        let request_body = serde_json::to_vec(payload)?;

        let invocation = retry_with_backoff(
            || self.invoke_once(model_id, &request_body),
            &self.retry,
        )
        .await
        .inspect_err(|e| debug!(model_id = %model_id, error = %e, "Bedrock invocation failed"))?;

        debug!(
            model_id = %model_id,
            latency_ms = invocation.latency.as_millis() as u64,
            request_id = ?invocation.request_id,
            "Bedrock invocation completed"
        );

        Ok(invocation)
    }
}
