//! Staged extraction of a JSON value from free-form generator text.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use super::repair::repair_json;

/// Length of the response excerpt kept on failure, in characters.
pub const EXCERPT_CHARS: usize = 500;

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"```[A-Za-z0-9_+-]*").unwrap();
    static ref WHITESPACE_RUN: Regex = Regex::new(r"\s+").unwrap();
}

/// Every recovery stage failed.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Failed to parse JSON response: {last_error}")]
pub struct ParseError {
    /// Leading excerpt of the raw response
    pub excerpt: String,

    /// Error reported by the last stage attempted
    pub last_error: String,
}

impl ParseError {
    fn new(text: &str, last_error: impl Into<String>) -> Self {
        Self {
            excerpt: text.chars().take(EXCERPT_CHARS).collect(),
            last_error: last_error.into(),
        }
    }
}

/// Which stage produced the value. Reported in debug logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStage {
    Direct,
    FenceStripped,
    BalancedExtraction,
    Repaired,
}

/// Parse `text` into a JSON value, trying progressively more tolerant
/// stages until one succeeds.
pub fn parse_json(text: &str) -> Result<Value, ParseError> {
    parse_json_staged(text).map(|(value, _)| value)
}

/// Like [`parse_json`], also reporting the stage that succeeded.
pub fn parse_json_staged(text: &str) -> Result<(Value, ParseStage), ParseError> {
    let direct_err = match serde_json::from_str(text.trim()) {
        Ok(value) => return Ok((value, ParseStage::Direct)),
        Err(e) => e,
    };

    let stripped = strip_fences(text);
    if let Ok(value) = serde_json::from_str(&stripped) {
        return Ok((value, ParseStage::FenceStripped));
    }

    if let Some(candidate) = extract_balanced(&stripped) {
        if let Ok(value) = serde_json::from_str(&normalize_candidate(candidate)) {
            return Ok((value, ParseStage::BalancedExtraction));
        }
    }

    match serde_json::from_str(&repair_json(&stripped)) {
        Ok(value) => {
            tracing::debug!(direct_error = %direct_err, "Response needed JSON repair");
            Ok((value, ParseStage::Repaired))
        }
        Err(e) => Err(ParseError::new(text, e.to_string())),
    }
}

/// Remove markdown code-fence delimiters, with or without a language tag.
pub fn strip_fences(text: &str) -> String {
    CODE_FENCE.replace_all(text, "").trim().to_string()
}

/// The first brace-balanced `{...}` span in `text`.
///
/// Braces inside string literals are ignored; a backslash consumes the
/// next character whatever it is. Returns `None` if no span closes.
pub fn extract_balanced(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Replace newlines not preceded by a backslash with spaces, then collapse
/// whitespace runs.
///
/// Lossy: intentional line breaks inside string values become spaces.
pub fn normalize_candidate(candidate: &str) -> String {
    let mut flattened = String::with_capacity(candidate.len());
    let mut prev = '\0';
    for c in candidate.chars() {
        if c == '\n' && prev != '\\' {
            flattened.push(' ');
        } else {
            flattened.push(c);
        }
        prev = c;
    }
    WHITESPACE_RUN.replace_all(&flattened, " ").into_owned()
}
