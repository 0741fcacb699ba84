//! Output contracts for the two model calls.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::recovery::{ResponseContract, StructuralFailure};
use crate::types::{ArticleAnalysis, ReportAudience, Reports};

/// Eligibility and categorization verdict from the classification call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResponse {
    #[serde(default = "default_evaluable")]
    pub is_evaluable: bool,

    #[serde(default)]
    pub non_evaluable_reason: Option<String>,

    #[serde(default, deserialize_with = "id_list")]
    pub categories: Vec<String>,
}

fn default_evaluable() -> bool {
    true
}

/// Category ids may come back as numbers or strings.
fn id_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    };
    Ok(items
        .into_iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect())
}

impl ClassificationResponse {
    /// The verdict used when classification fails.
    pub fn fallback(categories: Vec<String>) -> Self {
        Self {
            is_evaluable: true,
            non_evaluable_reason: None,
            categories,
        }
    }
}

impl ResponseContract for ClassificationResponse {
    fn from_value(value: Value) -> Result<Self, StructuralFailure> {
        if !value.is_object() {
            return Err(StructuralFailure::Shape(
                "classification response is not an object".to_string(),
            ));
        }
        serde_json::from_value(value).map_err(|e| StructuralFailure::Shape(e.to_string()))
    }
}

/// Audience reports plus optional inferred metadata from the generation
/// call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationResponse {
    pub reports: Reports,
    pub article_analysis: ArticleAnalysis,
}

impl ResponseContract for GenerationResponse {
    /// Accepts `{"reports": {...}, "article_analysis": {...}}` or the three
    /// report keys at the top level. Every audience key must hold
    /// non-blank text.
    fn from_value(value: Value) -> Result<Self, StructuralFailure> {
        let Value::Object(mut root) = value else {
            return Err(StructuralFailure::Shape(
                "generation response is not an object".to_string(),
            ));
        };

        let analysis_value = root.remove("article_analysis");
        let report_map: Map<String, Value> = match root.remove("reports") {
            Some(Value::Object(nested)) => nested,
            Some(_) => {
                return Err(StructuralFailure::Shape(
                    "\"reports\" is not an object".to_string(),
                ))
            }
            None => root,
        };

        let mut reports = Reports::new();
        for audience in ReportAudience::ALL {
            let key = audience.key();
            match report_map.get(key) {
                Some(Value::String(text)) if !text.trim().is_empty() => {
                    reports.insert(audience, text.clone());
                }
                Some(Value::String(_)) | Some(Value::Null) | None => {
                    return Err(StructuralFailure::MissingReport {
                        key: key.to_string(),
                    })
                }
                Some(_) => {
                    return Err(StructuralFailure::NonTextReport {
                        key: key.to_string(),
                    })
                }
            }
        }

        let article_analysis = match analysis_value {
            Some(v @ Value::Object(_)) => serde_json::from_value(v).unwrap_or_else(|e| {
                tracing::debug!(error = %e, "Ignoring malformed article analysis");
                ArticleAnalysis::default()
            }),
            _ => ArticleAnalysis::default(),
        };

        Ok(Self {
            reports,
            article_analysis,
        })
    }
}
