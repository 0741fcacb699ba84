//! # crcheck-runtime
//!
//! Remote half of the journalism-ethics evaluation pipeline.
//!
//! `crcheck-core` owns the rules, evidence resolution and output contract.
//! This crate adds the two model calls around them: a cheap classification
//! pass and a retried report-generation pass.
//!
//! ## Example
//!
//! ```rust,ignore
//! use crcheck_runtime::{build_orchestrator, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_yaml_file("crcheck.yaml")?;
//! let orchestrator = build_orchestrator(config)?;
//!
//! match orchestrator.evaluate(&request).await? {
//!     EvaluationOutcome::Completed(report) => println!("{}", report.result.reports[&ReportAudience::Student]),
//!     EvaluationOutcome::Ineligible { reason, .. } => println!("skipped: {reason}"),
//! }
//! ```

#[cfg(feature = "anthropic")]
use std::sync::Arc;
use thiserror::Error;

use crcheck_core::{Rulebook, RulebookError};

pub mod config;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod resilience;

pub use config::{ConfigError, FallbackConfig, ModelSettings, RetryConfig, RuntimeConfig};
pub use orchestrator::{
    AttemptError, EvaluationError, EvaluationOutcome, EvaluationReport, Orchestrator,
    OrchestratorBuilder, PipelineStage,
};
pub use providers::{
    ApiKey, ChatMessage, Completion, KeyOrigin, LlmProvider, ProviderError, Role, TokenUsage,
};
pub use resilience::{LlmUsage, RetryPolicy, UsageRecorder};

#[cfg(feature = "anthropic")]
pub use providers::AnthropicProvider;

/// Errors raised while assembling an orchestrator.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Rules(#[from] RulebookError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}

/// Load the rulebook named by `config`, applying configured default issue ids.
pub fn load_rulebook(config: &RuntimeConfig) -> Result<Rulebook, RulebookError> {
    let rulebook = Rulebook::load(&config.sources)?;
    match &config.fallback.issue_ids {
        Some(ids) => rulebook.with_default_issue_ids(ids.clone()),
        None => Ok(rulebook),
    }
}

/// Provider described by `config`, reading the API key from the
/// environment when the config has none.
#[cfg(feature = "anthropic")]
pub fn provider_from_config(config: &RuntimeConfig) -> Result<Arc<dyn LlmProvider>, ProviderError> {
    let provider =
        AnthropicProvider::connect(config.provider.api_key.as_deref(), &config.provider.base_url)?;
    Ok(Arc::new(provider))
}

/// Validate `config`, load its rulebook and connect its provider.
#[cfg(feature = "anthropic")]
pub fn build_orchestrator(config: RuntimeConfig) -> Result<Orchestrator, RuntimeError> {
    config.validate()?;
    let rulebook = load_rulebook(&config)?;
    let provider = provider_from_config(&config)?;

    tracing::debug!(
        categories = rulebook.category_count(),
        subcategories = rulebook.subcategory_count(),
        provider = provider.name(),
        "Orchestrator assembled"
    );

    Ok(OrchestratorBuilder::new()
        .provider(provider)
        .rulebook(Arc::new(rulebook))
        .config(config)
        .build()?)
}
