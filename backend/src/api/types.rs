//! REST API request and response types.
//!
//! All bodies are camelCase JSON.

use std::path::PathBuf;

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{MergeError, ServerError};
use crate::models::{SourceFile, StandardField};
use crate::rules::Rule;

/// Body of `POST /api/rules/parse`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseRuleRequest {
    pub text: String,
    pub bank_scope: String,
    /// Persist the parsed rule into the rule store.
    #[serde(default)]
    pub save: bool,
}

/// Response of `POST /api/rules/parse`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseRuleResponse {
    pub rule: Rule,
    /// Canonical description, parseable back into the same rule.
    pub description: String,
    pub saved: bool,
}

/// Response of `GET /api/rules/{scope}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleListResponse {
    pub bank_scope: String,
    pub rules: Vec<Rule>,
}

/// Body of `POST /api/merge`. No paths merges every imported file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    #[serde(default)]
    pub strict: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldsResponse {
    pub fields: Vec<StandardField>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesResponse {
    pub files: Vec<SourceFile>,
}

/// Create an error body
pub fn error_response(error: &str) -> Value {
    json!({
        "status": "error",
        "error": error,
    })
}

impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) | ServerError::Merge(MergeError::EmptyInput) => StatusCode::BAD_REQUEST,
            ServerError::Merge(_) | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl axum::response::IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        (self.status_code(), Json(error_response(&self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_request_defaults() {
        let req: MergeRequest = serde_json::from_str("{}").unwrap();
        assert!(req.paths.is_empty());
        assert_eq!(req.strict, None);

        let req: MergeRequest = serde_json::from_value(json!({"paths": ["a.xlsx"], "strict": true})).unwrap();
        assert_eq!(req.paths, vec![PathBuf::from("a.xlsx")]);
        assert_eq!(req.strict, Some(true));
    }

    #[test]
    fn test_parse_request_is_camel_case() {
        let req: ParseRuleRequest =
            serde_json::from_value(json!({"text": "每10行分页", "bankScope": "招商银行"})).unwrap();
        assert_eq!(req.bank_scope, "招商银行");
        assert!(!req.save);
    }

    #[test]
    fn test_error_status() {
        assert_eq!(ServerError::Merge(MergeError::EmptyInput).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ServerError::Internal("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error_response("bad")["error"], "bad");
    }
}
