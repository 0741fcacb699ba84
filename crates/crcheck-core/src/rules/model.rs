//! Declarative rule data: the checklist hierarchy, the citation library
//! and the special-topic rule sets.
//!
//! Field names follow the on-disk source format (`q_id`,
//! `ethics_code_refs`, ...) so existing rule files load unchanged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Separator between levels of a rule id (`"1"`, `"1-2"`, `"1-2-3"`).
pub const ID_SEPARATOR: char = '-';

/// How serious a subcategory's issues are considered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Normal,
    #[default]
    Major,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Normal => write!(f, "normal"),
            Severity::Major => write!(f, "major"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A question the reviewer asks of the article for one subcategory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiagnosticQuestion {
    /// Question id (`"<subcategory>-<k>"`)
    #[serde(rename = "q_id")]
    pub id: String,

    /// Question text
    pub question: String,

    /// Informational weight. Never surfaced as a score.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    0.5
}

/// The unit evidence and citations attach to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subcategory {
    /// Subcategory id (`"<category>-<n>"`)
    pub id: String,

    /// Display name
    pub name: String,

    /// Free-text definition
    #[serde(default)]
    pub definition: String,

    /// Severity tag
    #[serde(default)]
    pub severity: Severity,

    /// Ordered diagnostic questions
    #[serde(default)]
    pub diagnostic_questions: Vec<DiagnosticQuestion>,

    /// Keywords whose presence in the raw text hints at this issue
    #[serde(default)]
    pub red_flags: Vec<String>,

    /// Citation ids backing this subcategory
    #[serde(default, rename = "ethics_code_refs")]
    pub citation_refs: Vec<String>,
}

/// A top-level group of related subcategories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Category {
    /// Top-level ordinal id
    pub id: String,

    /// Display name
    pub name: String,

    /// Subcategories in source order
    #[serde(default)]
    pub subcategories: Vec<Subcategory>,
}

/// The full rule hierarchy as loaded from disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checklist {
    /// Source format version
    #[serde(default)]
    pub version: Option<String>,

    /// Categories in source order
    pub categories: Vec<Category>,
}

/// One immutable reference record used to justify a finding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    /// Issuing body (e.g. "Journalists' Code of Ethics")
    pub source: String,

    /// Article label (e.g. "Article 3")
    pub article: String,

    /// Optional clause label
    #[serde(default)]
    pub clause: Option<String>,

    /// Short title
    pub title: String,

    /// Verbatim text
    pub full_text: String,
}

impl Citation {
    /// Render as a quoted citation block.
    pub fn render(&self) -> String {
        let clause = match self.clause.as_deref() {
            Some(c) if !c.trim().is_empty() => format!(" {}", c.trim()),
            _ => String::new(),
        };
        format!(
            "**{} {}{} '{}'**\n> {}",
            self.source, self.article, clause, self.title, self.full_text
        )
    }
}

/// Citation id → citation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CitationLibrary {
    #[serde(default)]
    pub codes: BTreeMap<String, Citation>,
}

/// A keyword-gated supplementary rule set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpecialTopic {
    /// Any of these in the article triggers the topic
    pub keywords: Vec<String>,

    /// Citations to attach when triggered
    #[serde(default, rename = "ethics_code_refs")]
    pub citation_refs: Vec<String>,

    /// Supplementary guideline text
    pub guideline: String,
}

/// Topic key → special topic.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SpecialTopics {
    #[serde(default)]
    pub topics: BTreeMap<String, SpecialTopic>,
}

/// A rule id classified against the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleRef {
    Category(String),
    Subcategory(String),
}

/// A red-flag keyword with the subcategory it points at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RedFlag {
    pub keyword: String,
    pub subcategory_id: String,
    pub severity: Severity,
}
