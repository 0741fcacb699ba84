//! JSON Schema validation for the criteria checklist.
//!
//! The checklist is validated before deserialization so that authoring
//! mistakes surface with a path into the document rather than as a serde
//! error about a missing field.

use std::sync::OnceLock;

/// Embedded checklist schema (loaded at compile time).
const CHECKLIST_SCHEMA_JSON: &str = include_str!("../../schema/criteria_checklist.schema.json");

/// Compiled JSON Schema validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

fn get_validator() -> Result<&'static jsonschema::Validator, String> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = serde_json::from_str(CHECKLIST_SCHEMA_JSON)
            .map_err(|e| format!("Invalid schema JSON: {}", e))?;

        jsonschema::options()
            .build(&schema_value)
            .map_err(|e| format!("Failed to compile schema: {}", e))
    });

    result.as_ref().map_err(|e| e.clone())
}

/// Validate a checklist document against the schema.
///
/// Returns every violation, each suffixed with its instance path.
pub fn validate_checklist_schema(checklist: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e])?;

    let errors: Vec<String> = validator
        .iter_errors(checklist)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_checklist_passes() {
        let value = serde_json::json!({
            "categories": [
                { "id": "1", "name": "Accuracy", "subcategories": [
                    { "id": "1-1", "name": "Fact checking" }
                ]}
            ]
        });
        assert!(validate_checklist_schema(&value).is_ok());
    }

    #[test]
    fn test_empty_categories_fail() {
        let value = serde_json::json!({ "categories": [] });
        assert!(validate_checklist_schema(&value).is_err());
    }

    #[test]
    fn test_malformed_id_fails() {
        let value = serde_json::json!({
            "categories": [
                { "id": "one", "name": "Accuracy", "subcategories": [] }
            ]
        });
        let errors = validate_checklist_schema(&value).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("/categories/0/id")));
    }

    #[test]
    fn test_unknown_severity_fails() {
        let value = serde_json::json!({
            "categories": [
                { "id": "1", "name": "Accuracy", "subcategories": [
                    { "id": "1-1", "name": "Fact checking", "severity": "catastrophic" }
                ]}
            ]
        });
        assert!(validate_checklist_schema(&value).is_err());
    }
}
