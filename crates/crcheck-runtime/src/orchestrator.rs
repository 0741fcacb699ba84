//! Evaluation pipeline orchestrator.
//!
//! One independent flow per request:
//!
//! ```text
//! PreScreened -> Classified -> (Ineligible) -> EvidenceResolved
//!             -> Generated -> Validated -> Done
//!                      \__ retry __/        \-> Failed
//! ```
//!
//! Requests share only the immutable [`Rulebook`]. Dropping the future
//! returned by [`Orchestrator::evaluate`] cancels the request; no partial
//! result is produced.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crcheck_core::{
    accept_generation, decode, merge_metadata, ClassificationResponse, GenerationResponse,
    OutputError, PipelineRequest, PipelineResult, PreScreen, ResponseOutcome, Rulebook,
};

use crate::config::{ModelSettings, RuntimeConfig};
use crate::prompts;
use crate::providers::{ChatMessage, LlmProvider, ProviderError};
use crate::resilience::{LlmUsage, RetryPolicy, UsageRecorder};

/// Pipeline states, used as the `stage` field in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    PreScreened,
    Classified,
    Ineligible,
    EvidenceResolved,
    Generated,
    Validated,
    Done,
    Failed,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineStage::PreScreened => "pre_screened",
            PipelineStage::Classified => "classified",
            PipelineStage::Ineligible => "ineligible",
            PipelineStage::EvidenceResolved => "evidence_resolved",
            PipelineStage::Generated => "generated",
            PipelineStage::Validated => "validated",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why a single generation attempt failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttemptError {
    #[error("Remote call failed: {0}")]
    Remote(#[from] ProviderError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error("Output cut off at the token limit after {output_tokens} tokens")]
    Truncated { output_tokens: u32 },
}

impl AttemptError {
    /// Output contract violations are always worth another attempt;
    /// remote failures only when the provider says so.
    pub fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Remote(e) => e.is_retryable(),
            AttemptError::Output(_) | AttemptError::Truncated { .. } => true,
        }
    }
}

/// Errors from the pipeline. Ineligible input is not an error.
#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("Report generation failed after {attempts} attempt(s): {last_cause}")]
    GenerationFailed {
        attempts: u32,
        last_cause: AttemptError,
        categories: Vec<String>,
        issue_ids: BTreeSet<String>,
    },

    #[error("Provider error: {0}")]
    Provider(ProviderError),

    #[error("Orchestrator not configured: {0}")]
    NotConfigured(String),
}

/// A completed evaluation with the context it was produced in.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationReport {
    #[serde(flatten)]
    pub result: PipelineResult,

    /// Categories returned by (or substituted for) classification
    pub categories: Vec<String>,

    /// Subcategories evidence was resolved for
    pub issue_ids: BTreeSet<String>,

    /// Special topics detected in the article
    pub special_topics: BTreeSet<String>,

    /// Local keyword scan output
    pub pre_screen: PreScreen,

    /// Classification failed and default categories were used
    pub classification_fell_back: bool,

    /// Expansion resolved nothing and default issue ids were used
    pub issue_ids_fell_back: bool,

    /// Generation attempts made
    pub attempts: u32,

    pub usage: LlmUsage,
}

/// Terminal state of a request that did not error.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EvaluationOutcome {
    Completed(Box<EvaluationReport>),
    Ineligible { reason: String, usage: LlmUsage },
}

impl EvaluationOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, EvaluationOutcome::Completed(_))
    }
}

/// Drives the two-stage evaluation for each request.
pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    rulebook: Arc<Rulebook>,
    config: RuntimeConfig,
    retry: RetryPolicy,
}

impl Orchestrator {
    /// Create a new orchestrator.
    pub fn new(provider: Arc<dyn LlmProvider>, rulebook: Arc<Rulebook>, config: RuntimeConfig) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);
        Self {
            provider,
            rulebook,
            config,
            retry,
        }
    }

    pub fn rulebook(&self) -> &Rulebook {
        &self.rulebook
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Evaluate one article.
    pub async fn evaluate(
        &self,
        request: &PipelineRequest,
    ) -> Result<EvaluationOutcome, EvaluationError> {
        let usage = UsageRecorder::new();
        let scan_text = request.scan_text();

        let pre_screen = self.rulebook.pre_screen(&scan_text);
        tracing::info!(
            stage = %PipelineStage::PreScreened,
            hints = ?pre_screen.triggered_subcategory_ids,
            "Pre-screen complete"
        );

        let (classification, classification_fell_back) = self
            .classify(request, &pre_screen.triggered_subcategory_ids, &usage)
            .await;

        if !classification.is_evaluable {
            let reason = classification
                .non_evaluable_reason
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| "No reason given".to_string());
            tracing::info!(stage = %PipelineStage::Ineligible, reason = %reason, "Article is out of scope");
            return Ok(EvaluationOutcome::Ineligible {
                reason,
                usage: usage.into_usage(),
            });
        }

        let categories = classification.categories;
        let bundle = self.rulebook.evidence_bundle(&categories, &scan_text);
        tracing::info!(
            stage = %PipelineStage::EvidenceResolved,
            categories = ?categories,
            issue_ids = ?bundle.issue_ids,
            special_topics = ?bundle.special_topics,
            fell_back = bundle.fell_back,
            "Evidence resolved"
        );

        let messages =
            prompts::generation_messages(request, &bundle.text, self.config.article_char_limit);
        let settings = &self.config.generation;
        let attempts = AtomicU32::new(0);

        let outcome = {
            let (messages, usage, attempts) = (&messages, &usage, &attempts);
            self.retry
                .run(
                    move || {
                        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                        self.generate_once(attempt, messages, settings, usage)
                    },
                    AttemptError::is_retryable,
                )
                .await
        };
        let attempts = attempts.load(Ordering::SeqCst);

        let generated = match outcome {
            Ok(generated) => generated,
            Err(AttemptError::Remote(e)) if !e.is_retryable() => {
                tracing::error!(stage = %PipelineStage::Failed, error = %e, "Provider rejected the request");
                return Err(EvaluationError::Provider(e));
            }
            Err(last_cause) => {
                tracing::error!(
                    stage = %PipelineStage::Failed,
                    attempts,
                    error = %last_cause,
                    issue_ids = ?bundle.issue_ids,
                    "Report generation failed"
                );
                return Err(EvaluationError::GenerationFailed {
                    attempts,
                    last_cause,
                    categories,
                    issue_ids: bundle.issue_ids,
                });
            }
        };

        let result = PipelineResult {
            article_info: merge_metadata(request, &generated.article_analysis),
            reports: generated.reports,
            evaluated_at: Utc::now(),
        };
        let usage = usage.into_usage();
        tracing::info!(
            stage = %PipelineStage::Done,
            attempts,
            llm_calls = usage.llm_calls,
            total_tokens = usage.total_tokens(),
            "Evaluation complete"
        );

        Ok(EvaluationOutcome::Completed(Box::new(EvaluationReport {
            result,
            categories,
            issue_ids: bundle.issue_ids,
            special_topics: bundle.special_topics,
            pre_screen,
            classification_fell_back,
            issue_ids_fell_back: bundle.fell_back,
            attempts,
            usage,
        })))
    }

    /// Evaluate several independent articles concurrently. Outcomes are
    /// returned in input order.
    pub async fn evaluate_batch(
        &self,
        requests: &[PipelineRequest],
    ) -> Vec<Result<EvaluationOutcome, EvaluationError>> {
        futures::future::join_all(requests.iter().map(|request| self.evaluate(request))).await
    }

    /// Eligibility and categorization. Never fails: any remote or parse
    /// problem yields the configured default verdict.
    async fn classify(
        &self,
        request: &PipelineRequest,
        hints: &BTreeSet<String>,
        usage: &UsageRecorder,
    ) -> (ClassificationResponse, bool) {
        let messages = prompts::classification_messages(
            request,
            &self.rulebook.list_categories(),
            hints,
            self.config.article_char_limit,
        );

        let fallback = || {
            ClassificationResponse::fallback(self.config.fallback.classification_categories.clone())
        };

        let response = match self.provider.complete(messages, &self.config.classification).await {
            Ok(response) => response,
            Err(e) => {
                usage.record_failure();
                tracing::warn!(error = %e, "Classification call failed, using default categories");
                return (fallback(), true);
            }
        };
        usage.record(response.usage, &response.model);

        match decode::<ClassificationResponse>(&response.text) {
            ResponseOutcome::Success(classification) => {
                tracing::info!(
                    stage = %PipelineStage::Classified,
                    is_evaluable = classification.is_evaluable,
                    categories = ?classification.categories,
                    "Classification complete"
                );
                (classification, false)
            }
            ResponseOutcome::StructuralFailure(e) => {
                tracing::warn!(error = %e, "Unexpected classification shape, using default categories");
                (fallback(), true)
            }
            ResponseOutcome::ParseFailure(e) => {
                tracing::warn!(error = %e, excerpt = %e.excerpt, "Unparseable classification, using default categories");
                (fallback(), true)
            }
        }
    }

    /// One generation call followed by the output contract checks.
    async fn generate_once(
        &self,
        attempt: u32,
        messages: &[ChatMessage],
        settings: &ModelSettings,
        usage: &UsageRecorder,
    ) -> Result<GenerationResponse, AttemptError> {
        tracing::debug!(attempt, provider = self.provider.name(), "Requesting reports");

        let response = self
            .provider
            .complete(messages.to_vec(), settings)
            .await
            .map_err(|e| {
                usage.record_failure();
                AttemptError::Remote(e)
            })?;
        usage.record(response.usage, &response.model);
        tracing::info!(stage = %PipelineStage::Generated, attempt, "Reports received");

        // Repair would close a cut-off document, so reject it before decoding.
        if response.is_truncated() {
            return Err(AttemptError::Truncated {
                output_tokens: response.usage.output_tokens,
            });
        }

        let generated = accept_generation(&response.text)?;
        tracing::info!(stage = %PipelineStage::Validated, attempt, "Reports passed validation");
        Ok(generated)
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    rulebook: Option<Arc<Rulebook>>,
    config: RuntimeConfig,
}

impl OrchestratorBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            provider: None,
            rulebook: None,
            config: RuntimeConfig::default(),
        }
    }

    /// Set the LLM provider.
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the rulebook.
    pub fn rulebook(mut self, rulebook: Arc<Rulebook>) -> Self {
        self.rulebook = Some(rulebook);
        self
    }

    /// Set the configuration.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the orchestrator.
    pub fn build(self) -> Result<Orchestrator, EvaluationError> {
        let provider = self
            .provider
            .ok_or_else(|| EvaluationError::NotConfigured("No provider set".to_string()))?;
        let rulebook = self
            .rulebook
            .ok_or_else(|| EvaluationError::NotConfigured("No rulebook set".to_string()))?;
        Ok(Orchestrator::new(provider, rulebook, self.config))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{Completion, Role, TokenUsage};
    use async_trait::async_trait;
    use crcheck_core::{ReportAudience, StructuralFailure};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Response text and stop reason, or a remote failure.
    type Scripted = Mutex<VecDeque<Result<(String, &'static str), ProviderError>>>;

    /// Replays scripted responses. Generation calls are recognised by their
    /// system message.
    #[derive(Default)]
    struct ScriptedProvider {
        classification: Scripted,
        generation: Scripted,
        classification_calls: AtomicU32,
        generation_calls: AtomicU32,
        last_generation_prompt: Mutex<Option<String>>,
    }

    impl ScriptedProvider {
        fn new() -> Self {
            Self::default()
        }

        fn classify(self, response: Result<&str, ProviderError>) -> Self {
            self.classification
                .lock()
                .push_back(response.map(|text| (text.to_string(), "end_turn")));
            self
        }

        fn generate(self, response: Result<&str, ProviderError>) -> Self {
            self.generation
                .lock()
                .push_back(response.map(|text| (text.to_string(), "end_turn")));
            self
        }

        /// A generation response that hit the output token limit.
        fn generate_cut_off(self, text: &str) -> Self {
            self.generation.lock().push_back(Ok((text.to_string(), "max_tokens")));
            self
        }

        fn generation_calls(&self) -> u32 {
            self.generation_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn complete(
            &self,
            messages: Vec<ChatMessage>,
            settings: &ModelSettings,
        ) -> Result<Completion, ProviderError> {
            let is_generation = messages.first().map(|m| m.role == Role::System).unwrap_or(false);
            let next = if is_generation {
                self.generation_calls.fetch_add(1, Ordering::SeqCst);
                *self.last_generation_prompt.lock() = messages.last().map(|m| m.content.clone());
                self.generation.lock().pop_front()
            } else {
                self.classification_calls.fetch_add(1, Ordering::SeqCst);
                self.classification.lock().pop_front()
            };

            let (text, stop_reason) =
                next.unwrap_or_else(|| Err(ProviderError::Transport("script exhausted".into())))?;
            Ok(Completion {
                text,
                usage: TokenUsage {
                    input_tokens: 100,
                    output_tokens: 50,
                    ..Default::default()
                },
                model: settings.model.clone(),
                stop_reason: Some(stop_reason.to_string()),
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    const CHECKLIST: &str = r#"{"categories": [
        {"id": "1", "name": "Accuracy", "subcategories": [
            {"id": "1-1", "name": "Fact checking", "definition": "Verify claims.",
             "diagnostic_questions": [{"q_id": "1-1-1", "question": "Were claims verified?"}],
             "red_flags": ["reportedly"], "ethics_code_refs": ["C-1"]},
            {"id": "1-2", "name": "Sourcing", "red_flags": ["sources say"]}
        ]},
        {"id": "2", "name": "Fairness", "subcategories": [
            {"id": "2-1", "name": "Right of reply", "ethics_code_refs": ["C-2"]}
        ]},
        {"id": "3", "name": "Dignity", "subcategories": [
            {"id": "3-1", "name": "Privacy"}
        ]}
    ]}"#;

    const LIBRARY: &str = r#"{"codes": {
        "C-1": {"source": "Code", "article": "Article 1", "title": "Truth", "full_text": "Verify facts."},
        "C-2": {"source": "Code", "article": "Article 2", "title": "Reply", "full_text": "Hear both sides."}
    }}"#;

    const GOOD_REPORTS: &str = r#"{
        "reports": {
            "comprehensive": "The article relies on unnamed sources.",
            "journalist": "Name your sources where possible.",
            "student": "Ask who is speaking."
        },
        "article_analysis": {"articleType": "straight news", "journalist": "Inferred Reporter"}
    }"#;

    const MISSING_STUDENT: &str =
        r#"{"reports": {"comprehensive": "c", "journalist": "j"}}"#;

    const CUT_OFF: &str = r#"{"reports": {"comprehensive": "Full overview.", "journalist": "Full advice.", "student": "Ask who is speak"#;

    fn rulebook() -> Arc<Rulebook> {
        Arc::new(
            Rulebook::from_parts(
                serde_json::from_str(CHECKLIST).unwrap(),
                serde_json::from_str(LIBRARY).unwrap(),
                Default::default(),
            )
            .unwrap(),
        )
    }

    fn orchestrator(provider: Arc<ScriptedProvider>) -> Orchestrator {
        OrchestratorBuilder::new()
            .provider(provider)
            .rulebook(rulebook())
            .config(RuntimeConfig::default())
            .build()
            .unwrap()
    }

    fn request() -> PipelineRequest {
        PipelineRequest {
            journalist: Some("미확인".to_string()),
            publisher: Some("Daily Ledger".to_string()),
            ..PipelineRequest::new(
                "Minister reportedly resigns",
                "Sources say the minister resigned.",
                "https://example.com/news/1",
            )
        }
    }

    fn completed(outcome: EvaluationOutcome) -> EvaluationReport {
        match outcome {
            EvaluationOutcome::Completed(report) => *report,
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .classify(Ok(r#"{"is_evaluable": true, "categories": ["1"]}"#))
                .generate(Ok(GOOD_REPORTS)),
        );
        let report = completed(orchestrator(provider.clone()).evaluate(&request()).await.unwrap());

        assert_eq!(report.attempts, 1);
        assert_eq!(report.categories, vec!["1"]);
        assert_eq!(report.issue_ids.iter().collect::<Vec<_>>(), vec!["1-1", "1-2"]);
        assert!(!report.classification_fell_back);
        assert!(report.pre_screen.triggered_subcategory_ids.contains("1-1"));
        assert_eq!(report.usage.llm_calls, 2);
        assert_eq!(
            report.result.report(ReportAudience::Student),
            Some("Ask who is speaking.")
        );

        let prompt = provider.last_generation_prompt.lock().clone().unwrap();
        assert!(prompt.contains("### 1-1. Fact checking"));
        assert!(prompt.contains("'Truth'"));
        assert!(!prompt.contains("'Reply'"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_metadata_precedence() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .classify(Ok(r#"{"is_evaluable": true, "categories": ["1"]}"#))
                .generate(Ok(GOOD_REPORTS)),
        );
        let report = completed(orchestrator(provider).evaluate(&request()).await.unwrap());
        let info = &report.result.article_info;

        assert_eq!(info.journalist.as_deref(), Some("Inferred Reporter"));
        assert_eq!(info.publisher.as_deref(), Some("Daily Ledger"));
        assert_eq!(info.article_type.as_deref(), Some("straight news"));
        assert_eq!(info.url, "https://example.com/news/1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ineligible_skips_generation() {
        let provider = Arc::new(ScriptedProvider::new().classify(Ok(
            r#"{"is_evaluable": false, "non_evaluable_reason": "Advertisement", "categories": []}"#,
        )));
        let outcome = orchestrator(provider.clone()).evaluate(&request()).await.unwrap();

        match outcome {
            EvaluationOutcome::Ineligible { reason, usage } => {
                assert_eq!(reason, "Advertisement");
                assert_eq!(usage.llm_calls, 1);
            }
            other => panic!("expected ineligible, got {:?}", other),
        }
        assert_eq!(provider.generation_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_key_retried_once() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .classify(Ok(r#"{"is_evaluable": true, "categories": ["2"]}"#))
                .generate(Ok(MISSING_STUDENT))
                .generate(Ok(GOOD_REPORTS)),
        );
        let start = tokio::time::Instant::now();
        let report = completed(orchestrator(provider.clone()).evaluate(&request()).await.unwrap());

        assert_eq!(report.attempts, 2);
        assert_eq!(provider.generation_calls(), 2);
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_name_the_key() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .classify(Ok(r#"{"is_evaluable": true, "categories": ["1-2"]}"#))
                .generate(Ok(MISSING_STUDENT))
                .generate(Ok(MISSING_STUDENT))
                .generate(Ok(MISSING_STUDENT)),
        );
        let err = orchestrator(provider.clone()).evaluate(&request()).await.unwrap_err();

        match &err {
            EvaluationError::GenerationFailed {
                attempts,
                last_cause,
                categories,
                issue_ids,
            } => {
                assert_eq!(*attempts, 3);
                assert_eq!(
                    last_cause,
                    &AttemptError::Output(OutputError::Structural(StructuralFailure::MissingReport {
                        key: "student".to_string()
                    }))
                );
                assert_eq!(categories, &vec!["1-2".to_string()]);
                assert!(issue_ids.contains("1-2"));
            }
            other => panic!("expected generation failure, got {:?}", other),
        }
        assert!(err.to_string().contains("student"));
        assert_eq!(provider.generation_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scoring_triggers_retry() {
        let scored = r#"{"comprehensive": "Overall 7.5/10.", "journalist": "j", "student": "s"}"#;
        let provider = Arc::new(
            ScriptedProvider::new()
                .classify(Ok(r#"{"categories": ["1"]}"#))
                .generate(Ok(scored))
                .generate(Ok(GOOD_REPORTS)),
        );
        let report = completed(orchestrator(provider).evaluate(&request()).await.unwrap());
        assert_eq!(report.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cut_off_output_is_retried() {
        // Repair alone would turn the cut-off text into three "complete" reports.
        assert!(accept_generation(CUT_OFF).is_ok());

        let provider = Arc::new(
            ScriptedProvider::new()
                .classify(Ok(r#"{"categories": ["1"]}"#))
                .generate_cut_off(CUT_OFF)
                .generate(Ok(GOOD_REPORTS)),
        );
        let report = completed(orchestrator(provider.clone()).evaluate(&request()).await.unwrap());

        assert_eq!(report.attempts, 2);
        assert_eq!(provider.generation_calls(), 2);
        assert_eq!(
            report.result.report(ReportAudience::Student),
            Some("Ask who is speaking.")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_cut_off_fails() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .classify(Ok(r#"{"categories": ["1"]}"#))
                .generate_cut_off(CUT_OFF)
                .generate_cut_off(CUT_OFF)
                .generate_cut_off(CUT_OFF),
        );
        let err = orchestrator(provider).evaluate(&request()).await.unwrap_err();

        assert!(matches!(
            err,
            EvaluationError::GenerationFailed {
                attempts: 3,
                last_cause: AttemptError::Truncated { output_tokens: 50 },
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_timeout_is_retried() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .classify(Ok(r#"{"categories": ["1"]}"#))
                .generate(Err(ProviderError::Timeout(Duration::from_secs(120))))
                .generate(Ok(GOOD_REPORTS)),
        );
        let report = completed(orchestrator(provider.clone()).evaluate(&request()).await.unwrap());

        assert_eq!(report.attempts, 2);
        assert_eq!(report.usage.failed_calls, 1);
        assert_eq!(provider.generation_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_evaluation_makes_no_further_calls() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .classify(Ok(r#"{"categories": ["1"]}"#))
                .generate(Ok(MISSING_STUDENT))
                .generate(Ok(GOOD_REPORTS)),
        );
        let orchestrator = orchestrator(provider.clone());
        let request = request();

        // The first attempt fails and the 1s backoff starts; the deadline
        // drops the evaluation while it sleeps.
        let result = tokio::time::timeout(
            Duration::from_millis(500),
            orchestrator.evaluate(&request),
        )
        .await;
        assert!(result.is_err());

        tokio::time::advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;

        assert_eq!(provider.generation_calls(), 1);
        assert_eq!(provider.generation.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_classification_failure_falls_back() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .classify(Err(ProviderError::Timeout(Duration::from_secs(30))))
                .generate(Ok(GOOD_REPORTS)),
        );
        let report = completed(orchestrator(provider).evaluate(&request()).await.unwrap());

        assert!(report.classification_fell_back);
        assert_eq!(report.categories, vec!["1", "2", "3"]);
        assert_eq!(report.issue_ids.len(), 4);
        assert_eq!(report.usage.failed_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_classification_falls_back() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .classify(Ok("I think this is about accuracy."))
                .generate(Ok(GOOD_REPORTS)),
        );
        let report = completed(orchestrator(provider).evaluate(&request()).await.unwrap());
        assert!(report.classification_fell_back);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_categories_use_default_issue_ids() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .classify(Ok(r#"{"is_evaluable": true, "categories": ["nonsense"]}"#))
                .generate(Ok(GOOD_REPORTS)),
        );
        let report = completed(orchestrator(provider).evaluate(&request()).await.unwrap());

        assert!(report.issue_ids_fell_back);
        assert_eq!(report.issue_ids.iter().collect::<Vec<_>>(), vec!["1-1", "2-1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_is_not_retried() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .classify(Ok(r#"{"categories": ["1"]}"#))
                .generate(Err(ProviderError::Unauthorized)),
        );
        let err = orchestrator(provider.clone()).evaluate(&request()).await.unwrap_err();

        assert!(matches!(err, EvaluationError::Provider(ProviderError::Unauthorized)));
        assert_eq!(provider.generation_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_preserves_order() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .classify(Ok(r#"{"is_evaluable": false, "non_evaluable_reason": "Recipe"}"#))
                .classify(Ok(r#"{"is_evaluable": false, "non_evaluable_reason": "Recipe"}"#)),
        );
        let results = orchestrator(provider)
            .evaluate_batch(&[request(), request()])
            .await;

        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|r| matches!(r, Ok(EvaluationOutcome::Ineligible { .. }))));
    }

    #[test]
    fn test_builder_requires_provider_and_rulebook() {
        assert!(matches!(
            OrchestratorBuilder::new().rulebook(rulebook()).build(),
            Err(EvaluationError::NotConfigured(_))
        ));
        assert!(matches!(
            OrchestratorBuilder::new()
                .provider(Arc::new(ScriptedProvider::new()))
                .build(),
            Err(EvaluationError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = EvaluationOutcome::Ineligible {
            reason: "Advertisement".to_string(),
            usage: LlmUsage::default(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "ineligible");
        assert_eq!(json["reason"], "Advertisement");
    }
}
