//! JSON Schema validation for delegated rule output.
//!
//! The rule parsing model answers with a bare rule object (`type` plus that
//! kind's parameters). Before such an object is deserialized it is checked
//! against the embedded Draft 7 schema `schemas/rule.schema.json`.
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use ledgermerge::validation::validate_rule_object;
//!
//! let rule = json!({ "type": "page_break", "every_n_rows": 50 });
//! assert!(validate_rule_object(&rule).is_ok());
//!
//! let rule = json!({ "type": "page_break", "every_n_rows": 0 });
//! assert!(validate_rule_object(&rule).is_err());
//! ```

use once_cell::sync::Lazy;
use serde_json::Value;

/// Embedded rule object schema.
pub const RULE_SCHEMA: &str = include_str!("../../schemas/rule.schema.json");

static RULE_SCHEMA_VALUE: Lazy<Value> =
    Lazy::new(|| serde_json::from_str(RULE_SCHEMA).unwrap_or(Value::Bool(true)));

/// Validate `data` against a JSON schema.
///
/// Returns every validation message on failure.
pub fn validate(schema: &Value, data: &Value) -> Result<(), Vec<String>> {
    let validator = jsonschema::draft7::new(schema).map_err(|e| vec![format!("Invalid schema: {}", e)])?;

    let errors: Vec<String> = validator.iter_errors(data).map(|e| e.to_string()).collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Boolean form of [`validate`].
pub fn is_valid(schema: &Value, data: &Value) -> bool {
    jsonschema::draft7::is_valid(schema, data)
}

/// The parsed rule object schema.
pub fn rule_schema() -> &'static Value {
    &RULE_SCHEMA_VALUE
}

/// Validate a delegated rule object.
pub fn validate_rule_object(data: &Value) -> Result<(), Vec<String>> {
    validate(rule_schema(), data)
}
