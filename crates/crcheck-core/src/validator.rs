//! Descriptive-evaluation validator.
//!
//! Reports must describe, never score. Any quantitative scoring phrase in
//! any report fails the whole response. Text is never edited.

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::types::{ReportAudience, Reports};

lazy_static! {
    /// (label, pattern) pairs checked in order.
    static ref SCORING_PATTERNS: Vec<(&'static str, Regex)> = vec![
        ("ratio", Regex::new(r"\d+(?:\.\d+)?/\d+").unwrap()),
        ("points", Regex::new(r"(?i)\b\d+(?:\.\d+)?\s*points?\b").unwrap()),
        ("score_label", Regex::new(r"(?i)\bscore\s*[:：]\s*\d+").unwrap()),
        ("grade_label", Regex::new(r"(?i)\bgrade\s*[:：]\s*[A-F]\b").unwrap()),
        ("points_ko", Regex::new(r"\d+(?:\.\d+)?점\s*(?:만점|입니다|이다)").unwrap()),
        ("grade_label_ko", Regex::new(r"등급\s*[:：]\s*[A-F]").unwrap()),
        ("grade_suffix_ko", Regex::new(r"[A-F]등급\s*(?:입니다|이다)").unwrap()),
        ("score_label_ko", Regex::new(r"점수\s*[:：]\s*\d+").unwrap()),
    ];
}

/// A report contained a forbidden scoring expression.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Report {report} contains forbidden scoring pattern {pattern}: {matched:?}")]
pub struct ScoringViolation {
    pub report: ReportAudience,
    pub pattern: &'static str,
    pub matched: String,
}

/// First scoring expression found in `text`, as (label, matched text).
pub fn find_scoring(text: &str) -> Option<(&'static str, String)> {
    SCORING_PATTERNS
        .iter()
        .find_map(|(label, re)| re.find(text).map(|m| (*label, m.as_str().to_string())))
}

/// Check every report; the first violation found is returned.
pub fn validate_reports(reports: &Reports) -> Result<(), ScoringViolation> {
    for (audience, text) in reports {
        if let Some((pattern, matched)) = find_scoring(text) {
            return Err(ScoringViolation {
                report: *audience,
                pattern,
                matched,
            });
        }
    }
    Ok(())
}
