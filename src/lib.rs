//! Load test AWS Bedrock models and report latency, throughput, cost and errors.
//!
//! The harness keeps a configurable number of requests in flight against a
//! model for a bounded time window, records every outcome in a thread-safe
//! metrics store, samples host resources in the background, and renders the
//! results into a JSON report.
//!
//! # Quick Start
//!
//! Drive any async request function under load and summarize the results:
//!
//! ```no_run
//! use bedrock_loadtest::driver::{Attempt, DriverConfig, FnExecutor, LoadDriver};
//! use bedrock_loadtest::metrics::{MetricsStore, ResourceSampler};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MetricsStore::new());
//!     let session = store.start_monitoring(ResourceSampler::system(Duration::from_secs(5)))?;
//!
//!     let executor = Arc::new(FnExecutor::new("echo", |prompt: String| async move {
//!         let started = tokio::time::Instant::now();
//!         tokio::time::sleep(Duration::from_millis(prompt.len() as u64)).await;
//!         Ok::<_, bedrock_loadtest::LoadTestError>(Attempt::new(started.elapsed()))
//!     }));
//!
//!     let driver = LoadDriver::new(store.clone(), vec!["hello".to_string()], DriverConfig::default());
//!     driver.run_concurrent(executor, 10, Duration::from_secs(30)).await?;
//!     session.stop_monitoring().await;
//!
//!     let performance = store.performance_summary();
//!     println!("{:.1} req/s", performance.overall.requests_per_second);
//!     Ok(())
//! }
//! ```
//!
//! # Bedrock Suites
//!
//! [`scenario::LoadTestRunner`] runs every configured model at every configured
//! concurrency level through [`bedrock::BedrockClient`], or a knowledge base
//! through [`bedrock::BedrockAgentClient`], and [`report::LoadTestReport`] turns
//! the store into the persisted report. The `bedrock-loadtest` binary wires them
//! together from configuration files and can publish the summary to CloudWatch.
//!
//! # Key Modules
//!
//! - [`metrics`] - Outcome records, the metrics store, resource sampling and summaries
//! - [`driver`] - Concurrent load generation with bounded drain
//! - [`bedrock`] - Bedrock model invocation and knowledge base queries with retry
//! - [`scenario`] - Prompts, queries, scenario executors and suite sequencing
//! - [`report`] - JSON reports, console summaries and CloudWatch metrics
//! - [`config`] - Test and model configuration
//! - [`logging`] - Console and rolling file logging
//! - [`error`] - Error types and retry policy

pub mod bedrock;
pub mod config;
pub mod driver;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod report;
pub mod scenario;

pub use error::LoadTestError;

pub type Result<T> = std::result::Result<T, LoadTestError>;
