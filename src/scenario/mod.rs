//! Load test scenarios
//!
//! A scenario pairs the inputs sent under load with the request executors that
//! send them. [`foundation`] drives Bedrock foundation models directly;
//! [`knowledge_base`] queries a Bedrock knowledge base; [`runner`] sequences
//! runs over targets and concurrency levels while the resource monitor is
//! active.

pub mod foundation;
pub mod knowledge_base;
pub mod runner;

pub use foundation::{estimate_tokens, foundation_targets, request_cost, FoundationModelExecutor};
pub use knowledge_base::{
    default_queries, knowledge_base_cost, knowledge_base_levels, load_queries, query_patterns,
    render_query_patterns, KnowledgeBaseExecutor, KnowledgeBaseQuery, QueryPatternStats,
    DEFAULT_QUERIES_PATH, KNOWLEDGE_BASE_CATEGORY, QUERY_PATTERN_PAUSE,
};
pub use runner::{LoadTestRunner, RunRecord, RunTarget};

use crate::{LoadTestError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Default location of the prompt file
pub const DEFAULT_PROMPTS_PATH: &str = "data/test_prompts.json";

/// A prompt sent to the model under test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub name: String,
    pub text: String,
    /// Rough size of the answer the prompt asks for
    #[serde(default)]
    pub expected_tokens: u64,
}

impl Prompt {
    pub fn new(name: impl Into<String>, text: impl Into<String>, expected_tokens: u64) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            expected_tokens,
        }
    }
}

/// Built-in prompts of increasing length and different task types
pub fn default_prompts() -> Vec<Prompt> {
    vec![
        Prompt::new("short_prompt", "What is artificial intelligence?", 50),
        Prompt::new(
            "medium_prompt",
            "Explain the concept of machine learning and how it differs from traditional \
             programming. Include examples of common algorithms and their applications in \
             real-world scenarios.",
            200,
        ),
        Prompt::new(
            "long_prompt",
            "Write a comprehensive analysis of cloud computing technologies, covering the \
             following aspects:\n\
             1. Infrastructure as a Service (IaaS) - definition, benefits, and major providers\n\
             2. Platform as a Service (PaaS) - use cases and comparison with IaaS\n\
             3. Software as a Service (SaaS) - examples and business models\n\
             4. Serverless computing - advantages and limitations\n\
             5. Multi-cloud strategies and their implementation challenges\n\
             6. Security considerations in cloud environments\n\
             7. Cost optimization techniques for cloud resources\n\
             8. Future trends in cloud computing including edge computing and quantum \
             computing integration\n\n\
             Please provide detailed explanations with practical examples and industry best \
             practices.",
            800,
        ),
        Prompt::new(
            "code_generation",
            "Write a Python function that implements a binary search algorithm. Include error \
             handling, documentation, and unit tests.",
            300,
        ),
        Prompt::new(
            "creative_writing",
            "Write a short story about a robot that discovers emotions. The story should be \
             engaging, have a clear beginning, middle, and end, and explore themes of \
             consciousness and humanity.",
            500,
        ),
    ]
}

/// Load prompts from a JSON array file
///
/// A missing file or an empty array falls back to [`default_prompts`] with a
/// warning. Unreadable or malformed files are errors.
pub fn load_prompts(path: impl AsRef<Path>) -> Result<Vec<Prompt>> {
    load_inputs(path.as_ref(), "prompts", default_prompts)
}

/// Read a JSON array of scenario inputs, falling back to `defaults`
pub(crate) fn load_inputs<T: DeserializeOwned>(
    path: &Path,
    kind: &str,
    defaults: fn() -> Vec<T>,
) -> Result<Vec<T>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "{} file not found, using defaults", kind);
            return Ok(defaults());
        }
        Err(e) => {
            return Err(LoadTestError::io_error(format!(
                "Failed to read {} from {}: {}",
                kind,
                path.display(),
                e
            )))
        }
    };

    let inputs: Vec<T> = serde_json::from_str(&content)?;
    if inputs.is_empty() {
        warn!(path = %path.display(), "{} file is empty, using defaults", kind);
        return Ok(defaults());
    }

    info!(path = %path.display(), count = inputs.len(), "Loaded {}", kind);
    Ok(inputs)
}
