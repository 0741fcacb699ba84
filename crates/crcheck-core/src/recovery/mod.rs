//! Recovery of structured data from free-form generator output.
//!
//! [`parse_json`] runs the staged fallback chain (direct, fence-stripped,
//! balanced extraction, repair); [`decode`] adds a typed contract check on
//! top and reports the outcome as a [`ResponseOutcome`].

mod outcome;
mod parser;
mod repair;

pub use outcome::{decode, DecodeError, ResponseContract, ResponseOutcome, StructuralFailure};
pub use parser::{
    extract_balanced, normalize_candidate, parse_json, parse_json_staged, strip_fences, ParseError,
    ParseStage, EXCERPT_CHARS,
};
pub use repair::repair_json;
