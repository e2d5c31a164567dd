//! Model-family specific request bodies and response parsing

use crate::config::ModelConfig;
use serde_json::{json, Value};

/// Anthropic API version expected by Claude models on Bedrock
pub const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

/// Request/response dialect of a Bedrock model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    Claude,
    Titan,
    Llama,
    Generic,
}

impl ModelFamily {
    /// Detect the family from a model id or inference profile id
    pub fn from_model_id(model_id: &str) -> Self {
        if model_id.contains("anthropic.claude") {
            ModelFamily::Claude
        } else if model_id.contains("amazon.titan") {
            ModelFamily::Titan
        } else if model_id.contains("meta.llama") {
            ModelFamily::Llama
        } else {
            ModelFamily::Generic
        }
    }
}

/// Token usage reported by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Build the InvokeModel body for `prompt`
pub fn build_request_body(family: ModelFamily, prompt: &str, model: &ModelConfig) -> Value {
    match family {
        ModelFamily::Claude => json!({
            "anthropic_version": ANTHROPIC_VERSION,
            "max_tokens": model.max_tokens,
            "temperature": model.temperature,
            "top_p": model.top_p,
            "messages": [
                {
                    "role": "user",
                    "content": prompt
                }
            ]
        }),
        ModelFamily::Titan => json!({
            "inputText": prompt,
            "textGenerationConfig": {
                "maxTokenCount": model.max_tokens,
                "temperature": model.temperature,
                "topP": model.top_p
            }
        }),
        ModelFamily::Llama => json!({
            "prompt": prompt,
            "max_gen_len": model.max_tokens,
            "temperature": model.temperature,
            "top_p": model.top_p
        }),
        ModelFamily::Generic => json!({
            "prompt": prompt,
            "max_tokens": model.max_tokens,
            "temperature": model.temperature
        }),
    }
}

/// Extract the generated text
///
/// Known families yield an empty string when the expected field is missing;
/// generic models yield the raw JSON body.
pub fn extract_response_text(family: ModelFamily, body: &Value) -> String {
    let text = match family {
        ModelFamily::Claude => body
            .get("content")
            .and_then(|content| content.get(0))
            .and_then(|block| block.get("text"))
            .and_then(Value::as_str),
        ModelFamily::Titan => body
            .get("results")
            .and_then(|results| results.get(0))
            .and_then(|result| result.get("outputText"))
            .and_then(Value::as_str),
        ModelFamily::Llama => body.get("generation").and_then(Value::as_str),
        ModelFamily::Generic => return body.to_string(),
    };

    text.unwrap_or_default().to_string()
}

/// Token usage from the response body, when the family reports it
pub fn extract_usage(family: ModelFamily, body: &Value) -> Option<TokenUsage> {
    let (input, output) = match family {
        ModelFamily::Claude => {
            let usage = body.get("usage")?;
            (
                usage.get("input_tokens")?.as_u64()?,
                usage.get("output_tokens")?.as_u64()?,
            )
        }
        ModelFamily::Titan => {
            let output = body
                .get("results")?
                .as_array()?
                .iter()
                .filter_map(|result| result.get("tokenCount").and_then(Value::as_u64))
                .sum();
            (body.get("inputTextTokenCount")?.as_u64()?, output)
        }
        ModelFamily::Llama => (
            body.get("prompt_token_count")?.as_u64()?,
            body.get("generation_token_count")?.as_u64()?,
        ),
        ModelFamily::Generic => return None,
    };

    Some(TokenUsage {
        input_tokens: input,
        output_tokens: output,
    })
}
