//! Criteria and evidence management.
//!
//! The [`Rulebook`] owns the rule hierarchy, the citation library and the
//! special-topic rule sets. It is built once at startup and never calls
//! the reasoning service.

mod evidence;
mod model;
mod rulebook;
mod schema;

pub use evidence::{EvidenceBundle, NO_RELATED_CITATION};
pub use model::{
    Category, Checklist, Citation, CitationLibrary, DiagnosticQuestion, RedFlag, RuleRef,
    Severity, SpecialTopic, SpecialTopics, Subcategory, ID_SEPARATOR,
};
pub use rulebook::{Expansion, PreScreen, RuleSources, Rulebook, RulebookError};
pub use schema::validate_checklist_schema;
