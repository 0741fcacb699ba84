//! Request and result types shared by the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Values the scraping collaborator writes into publisher, publish date and
/// byline when it could not find them.
pub const PLACEHOLDER_VALUES: &[&str] = &["미확인", "unconfirmed", "unknown"];

/// True when a metadata value carries no information.
pub fn is_placeholder(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || PLACEHOLDER_VALUES
            .iter()
            .any(|p| trimmed.eq_ignore_ascii_case(p))
}

/// An already-scraped article submitted for evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRequest {
    pub title: String,

    #[serde(alias = "content")]
    pub body: String,

    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub publisher: Option<String>,

    #[serde(default, alias = "publish_date")]
    pub publish_date: Option<String>,

    #[serde(default)]
    pub journalist: Option<String>,
}

impl PipelineRequest {
    pub fn new(title: impl Into<String>, body: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    /// Title and body, the text keyword scans run against.
    pub fn scan_text(&self) -> String {
        format!("{}\n{}", self.title, self.body)
    }
}

/// Who a report is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportAudience {
    /// General public
    Comprehensive,
    /// The article's author
    Journalist,
    /// Media-literacy education
    Student,
}

impl ReportAudience {
    pub const ALL: [ReportAudience; 3] = [
        ReportAudience::Comprehensive,
        ReportAudience::Journalist,
        ReportAudience::Student,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            ReportAudience::Comprehensive => "comprehensive",
            ReportAudience::Journalist => "journalist",
            ReportAudience::Student => "student",
        }
    }
}

impl std::fmt::Display for ReportAudience {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Audience → report text.
pub type Reports = BTreeMap<ReportAudience, String>;

/// Article metadata inferred by the generator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ArticleAnalysis {
    #[serde(deserialize_with = "lenient_text")]
    pub title: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub url: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub publisher: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub journalist: Option<String>,
    #[serde(alias = "publish_date", deserialize_with = "lenient_text")]
    pub publish_date: Option<String>,
    #[serde(alias = "article_type", deserialize_with = "lenient_text")]
    pub article_type: Option<String>,
    #[serde(alias = "article_elements", deserialize_with = "lenient_text")]
    pub article_elements: Option<String>,
    #[serde(alias = "edit_structure", deserialize_with = "lenient_text")]
    pub edit_structure: Option<String>,
    #[serde(alias = "reporting_method", deserialize_with = "lenient_text")]
    pub reporting_method: Option<String>,
    #[serde(alias = "content_flow", deserialize_with = "lenient_text")]
    pub content_flow: Option<String>,
}

/// Accept a string, a list of strings (joined) or anything else (dropped).
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Merged article metadata returned to the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArticleInfo {
    pub title: String,
    pub url: String,
    pub publisher: Option<String>,
    pub journalist: Option<String>,
    pub publish_date: Option<String>,
    pub article_type: Option<String>,
    pub article_elements: Option<String>,
    pub edit_structure: Option<String>,
    pub reporting_method: Option<String>,
    pub content_flow: Option<String>,
}

fn present(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty()).map(str::to_string)
}

fn supplied(value: Option<&str>) -> Option<String> {
    value.filter(|v| !is_placeholder(v)).map(str::to_string)
}

/// Merge scraper-supplied metadata with generator-inferred metadata.
///
/// A scraper value wins whenever it is present. Publisher, publish date and
/// byline also give way when they hold a placeholder; title and URL are
/// taken as written, so a headline such as "Unknown" is kept.
pub fn merge_metadata(request: &PipelineRequest, analysis: &ArticleAnalysis) -> ArticleInfo {
    let as_written = |scraped: Option<&str>, inferred: &Option<String>| {
        present(scraped).or_else(|| present(inferred.as_deref()))
    };
    let unless_placeholder = |scraped: Option<&str>, inferred: &Option<String>| {
        supplied(scraped).or_else(|| supplied(inferred.as_deref()))
    };

    ArticleInfo {
        title: as_written(Some(&request.title), &analysis.title).unwrap_or_default(),
        url: as_written(Some(&request.url), &analysis.url).unwrap_or_default(),
        publisher: unless_placeholder(request.publisher.as_deref(), &analysis.publisher),
        journalist: unless_placeholder(request.journalist.as_deref(), &analysis.journalist),
        publish_date: unless_placeholder(request.publish_date.as_deref(), &analysis.publish_date),
        article_type: present(analysis.article_type.as_deref()),
        article_elements: present(analysis.article_elements.as_deref()),
        edit_structure: present(analysis.edit_structure.as_deref()),
        reporting_method: present(analysis.reporting_method.as_deref()),
        content_flow: present(analysis.content_flow.as_deref()),
    }
}

/// A completed evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub article_info: ArticleInfo,
    pub reports: Reports,
    pub evaluated_at: DateTime<Utc>,
}

impl PipelineResult {
    pub fn report(&self, audience: ReportAudience) -> Option<&str> {
        self.reports.get(&audience).map(String::as_str)
    }
}
