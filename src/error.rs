//! Error handling for the load-testing harness
//!
//! Every failure the harness can observe is expressed as a [`LoadTestError`].
//! The variants are grouped so that callers can decide what to do with them:
//!
//! - **Input / configuration** - bad test plans, unreadable config files
//! - **Remote service** - Bedrock exceptions mapped from the AWS SDK
//! - **Engine** - scheduling failures of the load driver and sampler faults
//!
//! Transient remote failures are retried by the Bedrock collaborator through
//! [`retry_with_backoff`] before the load driver ever sees them; the driver only
//! records the final outcome of an attempt.
//!
//! ```rust
//! use bedrock_loadtest::error::{retry_with_backoff, LoadTestError, RetryConfig};
//!
//! # async fn example() -> Result<(), LoadTestError> {
//! let config = RetryConfig {
//!     max_retries: 2,
//!     base_delay_ms: 1000,
//!     exponential_backoff: true,
//!     ..Default::default()
//! };
//!
//! let body = retry_with_backoff(|| async { invoke().await }, &config).await?;
//! # let _ = body;
//! # Ok(())
//! # }
//! # async fn invoke() -> Result<String, LoadTestError> { Ok("ok".to_string()) }
//! ```

use thiserror::Error;
use tracing::warn;

/// Main error type for the harness
#[derive(Error, Debug, Clone)]
pub enum LoadTestError {
    /// Invalid test plan or caller-supplied data
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Configuration errors (files, environment, credentials)
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    /// Model-related errors from AWS Bedrock
    #[error("Model error: {message}")]
    ModelError { message: String },

    /// AWS authentication or permission errors
    #[error("AWS access denied: {message}")]
    AccessDenied { message: String },

    /// AWS service is temporarily unavailable
    #[error("AWS service unavailable: {message}")]
    ServiceUnavailable { message: String },

    /// AWS request validation failed
    #[error("AWS validation error: {message}")]
    ValidationError { message: String },

    /// AWS throttling/rate limiting
    #[error("AWS throttling: {message}")]
    ThrottlingError { message: String },

    /// AWS resource not found
    #[error("AWS resource not found: {message}")]
    ResourceNotFound { message: String },

    /// AWS quota/limit exceeded
    #[error("AWS quota exceeded: {message}")]
    QuotaExceeded { message: String },

    /// Network-related errors
    #[error("Network error: {message}")]
    NetworkError { message: String },

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {message}")]
    SerializationError { message: String },

    /// Timeout errors
    #[error("Timeout error: operation timed out after {timeout_ms}ms")]
    TimeoutError { timeout_ms: u64 },

    /// The load driver could not schedule request attempts
    #[error("Scheduling error: {message}")]
    SchedulingError { message: String },

    /// Reading host resource counters failed
    #[error("Sampler error: {message}")]
    SamplerError { message: String },

    /// Filesystem errors while reading inputs or writing reports
    #[error("IO error: {message}")]
    IoError { message: String },
}

impl LoadTestError {
    /// Create a simple InvalidInput error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a simple ConfigurationError
    pub fn configuration_error(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    /// Create a simple ModelError
    pub fn model_error(message: impl Into<String>) -> Self {
        Self::ModelError {
            message: message.into(),
        }
    }

    /// Create an AccessDenied error
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::AccessDenied {
            message: message.into(),
        }
    }

    /// Create a ServiceUnavailable error
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            message: message.into(),
        }
    }

    /// Create a ValidationError
    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    /// Create a ThrottlingError
    pub fn throttling_error(message: impl Into<String>) -> Self {
        Self::ThrottlingError {
            message: message.into(),
        }
    }

    /// Create a ResourceNotFound error
    pub fn resource_not_found(message: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            message: message.into(),
        }
    }

    /// Create a QuotaExceeded error
    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::QuotaExceeded {
            message: message.into(),
        }
    }

    /// Create a NetworkError
    pub fn network_error(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Create a TimeoutError
    pub fn timeout_error(timeout_ms: u64) -> Self {
        Self::TimeoutError { timeout_ms }
    }

    /// Create a SchedulingError
    pub fn scheduling_error(message: impl Into<String>) -> Self {
        Self::SchedulingError {
            message: message.into(),
        }
    }

    /// Create a SamplerError
    pub fn sampler_error(message: impl Into<String>) -> Self {
        Self::SamplerError {
            message: message.into(),
        }
    }

    /// Create an IoError
    pub fn io_error(message: impl Into<String>) -> Self {
        Self::IoError {
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LoadTestError::ServiceUnavailable { .. }
                | LoadTestError::ThrottlingError { .. }
                | LoadTestError::NetworkError { .. }
                | LoadTestError::TimeoutError { .. }
        )
    }
}

/// Map AWS SDK `SdkError<InvokeModelError>` to LoadTestError
impl
    From<
        aws_sdk_bedrockruntime::error::SdkError<
            aws_sdk_bedrockruntime::operation::invoke_model::InvokeModelError,
        >,
    > for LoadTestError
{
    fn from(
        error: aws_sdk_bedrockruntime::error::SdkError<
            aws_sdk_bedrockruntime::operation::invoke_model::InvokeModelError,
        >,
    ) -> Self {
        use aws_sdk_bedrockruntime::error::{ProvideErrorMetadata, SdkError};
        use aws_sdk_bedrockruntime::operation::invoke_model::InvokeModelError;
        use aws_sdk_bedrockruntime::operation::RequestId;

        match error {
            SdkError::ServiceError(context) => {
                let http_status = context.raw().status().as_u16();
                let service_error = context.err();
                let message = format!(
                    "{} (HTTP {}, Request ID: {})",
                    service_error.message().unwrap_or("service error"),
                    http_status,
                    service_error.request_id().unwrap_or("unknown")
                );

                match service_error {
                    InvokeModelError::ThrottlingException(_) => {
                        LoadTestError::throttling_error(message)
                    }
                    InvokeModelError::AccessDeniedException(_) => {
                        LoadTestError::access_denied(message)
                    }
                    InvokeModelError::ValidationException(_) => {
                        LoadTestError::validation_error(message)
                    }
                    InvokeModelError::ServiceUnavailableException(_)
                    | InvokeModelError::ModelNotReadyException(_) => {
                        LoadTestError::service_unavailable(message)
                    }
                    InvokeModelError::ResourceNotFoundException(_) => {
                        LoadTestError::resource_not_found(message)
                    }
                    InvokeModelError::ServiceQuotaExceededException(_) => {
                        LoadTestError::quota_exceeded(message)
                    }
                    InvokeModelError::ModelTimeoutException(_) => LoadTestError::timeout_error(60000),
                    _ => LoadTestError::model_error(message),
                }
            }
            SdkError::TimeoutError(_) => LoadTestError::timeout_error(30000),
            SdkError::ResponseError(context) => {
                LoadTestError::network_error(format!("Bedrock response error: {:?}", context))
            }
            SdkError::DispatchFailure(context) => {
                LoadTestError::network_error(format!("Bedrock dispatch failure: {:?}", context))
            }
            SdkError::ConstructionFailure(context) => LoadTestError::configuration_error(format!(
                "Bedrock construction failure: {:?}",
                context
            )),
            other => LoadTestError::model_error(format!("Bedrock SDK error: {}", other)),
        }
    }
}

/// Map AWS SDK `SdkError<RetrieveAndGenerateError>` to LoadTestError
impl
    From<
        aws_sdk_bedrockagentruntime::error::SdkError<
            aws_sdk_bedrockagentruntime::operation::retrieve_and_generate::RetrieveAndGenerateError,
        >,
    > for LoadTestError
{
    fn from(
        error: aws_sdk_bedrockagentruntime::error::SdkError<
            aws_sdk_bedrockagentruntime::operation::retrieve_and_generate::RetrieveAndGenerateError,
        >,
    ) -> Self {
        use aws_sdk_bedrockagentruntime::error::{ProvideErrorMetadata, SdkError};
        use aws_sdk_bedrockagentruntime::operation::retrieve_and_generate::RetrieveAndGenerateError;
        use aws_sdk_bedrockagentruntime::operation::RequestId;

        match error {
            SdkError::ServiceError(context) => {
                let http_status = context.raw().status().as_u16();
                let service_error = context.err();
                let message = format!(
                    "{} (HTTP {}, Request ID: {})",
                    service_error.message().unwrap_or("service error"),
                    http_status,
                    service_error.request_id().unwrap_or("unknown")
                );

                match service_error {
                    RetrieveAndGenerateError::ThrottlingException(_) => {
                        LoadTestError::throttling_error(message)
                    }
                    RetrieveAndGenerateError::AccessDeniedException(_) => {
                        LoadTestError::access_denied(message)
                    }
                    RetrieveAndGenerateError::ValidationException(_)
                    | RetrieveAndGenerateError::ConflictException(_) => {
                        LoadTestError::validation_error(message)
                    }
                    RetrieveAndGenerateError::InternalServerException(_)
                    | RetrieveAndGenerateError::BadGatewayException(_)
                    | RetrieveAndGenerateError::DependencyFailedException(_) => {
                        LoadTestError::service_unavailable(message)
                    }
                    RetrieveAndGenerateError::ResourceNotFoundException(_) => {
                        LoadTestError::resource_not_found(message)
                    }
                    RetrieveAndGenerateError::ServiceQuotaExceededException(_) => {
                        LoadTestError::quota_exceeded(message)
                    }
                    _ => LoadTestError::model_error(message),
                }
            }
            SdkError::TimeoutError(_) => LoadTestError::timeout_error(30000),
            SdkError::ResponseError(context) => LoadTestError::network_error(format!(
                "Bedrock agent response error: {:?}",
                context
            )),
            SdkError::DispatchFailure(context) => LoadTestError::network_error(format!(
                "Bedrock agent dispatch failure: {:?}",
                context
            )),
            SdkError::ConstructionFailure(context) => LoadTestError::configuration_error(format!(
                "Bedrock agent construction failure: {:?}",
                context
            )),
            other => LoadTestError::model_error(format!("Bedrock agent SDK error: {}", other)),
        }
    }
}

/// Map JSON serialization errors to LoadTestError
impl From<serde_json::Error> for LoadTestError {
    fn from(error: serde_json::Error) -> Self {
        LoadTestError::serialization_error(format!("JSON serialization failed: {}", error))
    }
}

impl From<std::io::Error> for LoadTestError {
    fn from(error: std::io::Error) -> Self {
        LoadTestError::io_error(error.to_string())
    }
}

impl From<crate::config::ConfigError> for LoadTestError {
    fn from(error: crate::config::ConfigError) -> Self {
        LoadTestError::configuration_error(error.to_string())
    }
}

/// Retry configuration for remote calls
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the first call)
    pub max_retries: u32,
    /// Base delay between retries in milliseconds
    pub base_delay_ms: u64,
    /// Whether to use exponential backoff
    pub exponential_backoff: bool,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 to 1.0) to add randomness to delays
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    /// Three attempts in total, waiting 1s and then 2s.
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 1000,
            exponential_backoff: true,
            max_delay_ms: 30000,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Calculate the delay for a specific retry attempt (1-based)
    pub fn calculate_delay(&self, attempt: u32) -> u64 {
        let delay = if self.exponential_backoff && attempt > 0 {
            let exponential_delay = self
                .base_delay_ms
                .saturating_mul(2_u64.saturating_pow(attempt - 1));
            exponential_delay.min(self.max_delay_ms)
        } else {
            self.base_delay_ms
        };

        if self.jitter_factor > 0.0 {
            let jitter = (delay as f64 * self.jitter_factor * fastrand::f64()).round() as u64;
            delay + jitter
        } else {
            delay
        }
    }
}

/// Retry an operation while its error is retryable and attempts remain
pub async fn retry_with_backoff<F, Fut, T>(
    mut operation: F,
    config: &RetryConfig,
) -> Result<T, LoadTestError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, LoadTestError>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if !error.is_retryable() || attempt >= config.max_retries {
                    return Err(error);
                }

                let delay_ms = config.calculate_delay(attempt + 1);
                warn!(
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    delay_ms,
                    error = %error,
                    "Retryable failure, backing off"
                );
                tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;

                attempt += 1;
            }
        }
    }
}
