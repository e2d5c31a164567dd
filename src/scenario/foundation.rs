//! Foundation model scenario

use super::runner::RunTarget;
use super::Prompt;
use crate::bedrock::payload::{self, ModelFamily};
use crate::bedrock::ModelInvoker;
use crate::config::{ModelConfig, ModelPricing, ModelsConfig};
use crate::driver::{Attempt, RequestExecutor};
use crate::{LoadTestError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;

/// Rough token estimate: four characters per token
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() / 4) as u64
}

/// USD cost of a request given per-1000-token pricing
pub fn request_cost(pricing: &ModelPricing, tokens_input: u64, tokens_output: u64) -> f64 {
    (tokens_input as f64 / 1000.0) * pricing.input_tokens
        + (tokens_output as f64 / 1000.0) * pricing.output_tokens
}

/// Sends prompts to one configured Bedrock model
pub struct FoundationModelExecutor {
    category: String,
    model: ModelConfig,
    family: ModelFamily,
    invoker: Arc<dyn ModelInvoker>,
}

impl FoundationModelExecutor {
    /// Executor for the model configured under `name`
    pub fn new(name: &str, model: ModelConfig, invoker: Arc<dyn ModelInvoker>) -> Self {
        Self {
            category: format!("foundation_model_{}", name),
            family: ModelFamily::from_model_id(&model.model_id),
            model,
            invoker,
        }
    }

    pub fn family(&self) -> ModelFamily {
        self.family
    }
}

#[async_trait]
impl RequestExecutor<Prompt> for FoundationModelExecutor {
    fn category(&self) -> &str {
        &self.category
    }

    async fn execute(&self, prompt: Prompt) -> Result<Attempt> {
        let body = payload::build_request_body(self.family, &prompt.text, &self.model);
        let invocation = self.invoker.invoke(&self.model.model_id, &body).await?;

        let response_text = payload::extract_response_text(self.family, &invocation.body);
        let (tokens_input, tokens_output) = match payload::extract_usage(self.family, &invocation.body) {
            Some(usage) => (usage.input_tokens, usage.output_tokens),
            None => (estimate_tokens(&prompt.text), estimate_tokens(&response_text)),
        };
        let cost = request_cost(&self.model.pricing, tokens_input, tokens_output);

        trace!(
            category = %self.category,
            prompt = %prompt.name,
            tokens_input,
            tokens_output,
            response_chars = response_text.len(),
            "Foundation model request succeeded"
        );

        Ok(Attempt::new(invocation.latency)
            .with_tokens(tokens_input, tokens_output)
            .with_cost(cost))
    }
}

/// One run target per selected model, in configuration order
///
/// `selected` restricts and orders the models by name; `None` selects all.
pub fn foundation_targets(
    models: &ModelsConfig,
    selected: Option<&[String]>,
    invoker: Arc<dyn ModelInvoker>,
) -> Result<Vec<RunTarget>> {
    let names: Vec<String> = match selected {
        Some(names) => names.to_vec(),
        None => models.foundation_models.keys().cloned().collect(),
    };

    if names.is_empty() {
        return Err(LoadTestError::invalid_input("No models selected for testing"));
    }

    names
        .into_iter()
        .map(|name| {
            let model = models.model(&name).cloned().ok_or_else(|| {
                LoadTestError::invalid_input(format!("Model '{}' is not configured", name))
            })?;
            let executor = FoundationModelExecutor::new(&name, model, Arc::clone(&invoker));
            Ok(RunTarget::<Prompt>::new(name, Arc::new(executor)))
        })
        .collect()
}
