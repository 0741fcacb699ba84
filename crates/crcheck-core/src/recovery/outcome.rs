//! Typed decoding of model responses.

use serde_json::Value;
use thiserror::Error;

use super::parser::{parse_json_staged, ParseError};

/// A response that parsed but violates its output contract.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StructuralFailure {
    #[error("Missing required report key: {key}")]
    MissingReport { key: String },

    #[error("Report {key} is not text")]
    NonTextReport { key: String },

    #[error("Unexpected response shape: {0}")]
    Shape(String),
}

/// Result of decoding a model response into `T`.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome<T> {
    Success(T),
    StructuralFailure(StructuralFailure),
    ParseFailure(ParseError),
}

impl<T> ResponseOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, ResponseOutcome::Success(_))
    }

    /// Collapse into a `Result`, keeping the failure kind.
    pub fn into_result(self) -> Result<T, DecodeError> {
        match self {
            ResponseOutcome::Success(value) => Ok(value),
            ResponseOutcome::StructuralFailure(e) => Err(DecodeError::Structural(e)),
            ResponseOutcome::ParseFailure(e) => Err(DecodeError::Parse(e)),
        }
    }
}

/// Either failure kind of [`ResponseOutcome`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Structural(#[from] StructuralFailure),
}

/// A response type with an output contract checked after parsing.
pub trait ResponseContract: Sized {
    fn from_value(value: Value) -> Result<Self, StructuralFailure>;
}

/// Recover a JSON value from `text` and check it against `T`'s contract.
pub fn decode<T: ResponseContract>(text: &str) -> ResponseOutcome<T> {
    let value = match parse_json_staged(text) {
        Ok((value, stage)) => {
            tracing::debug!(?stage, "Recovered JSON from response");
            value
        }
        Err(e) => return ResponseOutcome::ParseFailure(e),
    };

    match T::from_value(value) {
        Ok(decoded) => ResponseOutcome::Success(decoded),
        Err(e) => ResponseOutcome::StructuralFailure(e),
    }
}
