//! # crcheck-core
//!
//! Deterministic building blocks of the journalism-ethics evaluation
//! pipeline. Nothing in this crate performs network I/O.
//!
//! ## Key Guarantees
//!
//! 1. **Immutable rules**: the [`Rulebook`] is built once and shared read-only
//! 2. **Scoped evidence**: only the criteria and citations for detected issues
//!    are resolved
//! 3. **Typed recovery**: model text decodes into a value or a typed failure,
//!    never partial data
//! 4. **Descriptive only**: reports containing quantitative scoring are rejected
//!
//! ## Example
//!
//! ```rust,ignore
//! use crcheck_core::{accept_generation, RuleSources, Rulebook};
//!
//! let rulebook = Rulebook::load(&RuleSources::default())?;
//! let bundle = rulebook.evidence_bundle(["1", "3"], &article_text);
//! // ... send bundle.text to the generator ...
//! let response = accept_generation(&raw_model_text)?;
//! ```

pub mod recovery;
pub mod response;
pub mod rules;
pub mod types;
pub mod validator;

// Re-export main types at crate root
pub use recovery::{
    decode, parse_json, DecodeError, ParseError, ResponseContract, ResponseOutcome,
    StructuralFailure,
};
pub use response::{ClassificationResponse, GenerationResponse};
pub use rules::{
    Category, Citation, EvidenceBundle, Expansion, PreScreen, RedFlag, RuleRef, RuleSources,
    Rulebook, RulebookError, Severity, Subcategory,
};
pub use types::{
    is_placeholder, merge_metadata, ArticleAnalysis, ArticleInfo, PipelineRequest,
    PipelineResult, ReportAudience, Reports,
};
pub use validator::{find_scoring, validate_reports, ScoringViolation};

use thiserror::Error;

/// Why a generation response was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OutputError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Structural(#[from] StructuralFailure),

    #[error(transparent)]
    Scoring(#[from] ScoringViolation),
}

impl From<DecodeError> for OutputError {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::Parse(e) => OutputError::Parse(e),
            DecodeError::Structural(e) => OutputError::Structural(e),
        }
    }
}

/// Decode a raw generation response and enforce the output contract:
/// all three audience reports present as text, none containing scoring.
pub fn accept_generation(text: &str) -> Result<GenerationResponse, OutputError> {
    let response = decode::<GenerationResponse>(text).into_result()?;
    validate_reports(&response.reports)?;
    Ok(response)
}
