//! Error types for the ledgermerge pipeline.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`SheetError`] - reading raw spreadsheet files
//! - [`SchemaError`] - standard field definitions
//! - [`HeaderError`] - header row detection
//! - [`StoreError`] - JSON persistence shared by every store
//! - [`MappingError`] - field mapping validation
//! - [`RegistryError`] - imported-files registry
//! - [`RuleError`] - rule storage and rule execution
//! - [`AiError`] / [`ParseFailure`] - delegated rule parsing
//! - [`FileError`] - per-file merge failure (recorded in the manifest)
//! - [`MergeError`] - top-level merge errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use std::time::Duration;

use thiserror::Error;

// =============================================================================
// Sheet Reading Errors
// =============================================================================

/// Errors while reading a source spreadsheet.
#[derive(Debug, Error)]
pub enum SheetError {
    /// Failed to read file.
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    /// Extension not handled by any reader.
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// Workbook could not be opened or has no worksheet.
    #[error("Workbook error: {0}")]
    Workbook(String),

    /// Failed to decode text content.
    #[error("Failed to decode content: {0}")]
    Encoding(String),

    /// Invalid CSV content.
    #[error("Invalid CSV format: {0}")]
    Csv(String),

    /// The sheet has no rows at all.
    #[error("Sheet is empty")]
    Empty,
}

// =============================================================================
// Schema Errors
// =============================================================================

/// Errors loading a standard field definition.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Two fields share a name.
    #[error("Duplicate standard field: {0}")]
    DuplicateField(String),

    /// The definition declares no fields.
    #[error("Schema declares no standard fields")]
    Empty,

    /// Definition file unreadable.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// =============================================================================
// Header Detection Errors
// =============================================================================

/// Errors from the header detector.
#[derive(Debug, Error)]
pub enum HeaderError {
    /// No row in the scanned window looks like a header.
    #[error("No header row found in the first {scanned} rows")]
    NotFound { scanned: usize },
}

// =============================================================================
// Persistence Errors
// =============================================================================

/// Errors reading or writing a JSON configuration file.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error.
    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("Store JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Field Mapping Errors
// =============================================================================

/// Errors from the field mapping store. Raised before anything is persisted.
#[derive(Debug, Error)]
pub enum MappingError {
    /// Mapping references a standard field the schema does not declare.
    #[error("Unknown standard field: {0}")]
    UnknownField(String),

    /// Mapping references a column the file does not have.
    #[error("Column '{column}' is not among the detected columns of {file_key}")]
    InvalidColumn { file_key: String, column: String },

    /// Two entries target the same standard field.
    #[error("Standard field '{0}' is mapped more than once")]
    DuplicateField(String),

    /// Persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// =============================================================================
// Imported Files Registry Errors
// =============================================================================

/// Errors from the imported-files registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The resolved path is already registered.
    #[error("File already imported: {0}")]
    DuplicateImport(String),

    /// File not registered.
    #[error("File not imported: {0}")]
    NotFound(String),

    /// Persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// =============================================================================
// Rule Errors
// =============================================================================

/// Errors from rule storage and rule execution.
#[derive(Debug, Error)]
pub enum RuleError {
    /// A custom rule carries parameters the engine cannot execute.
    #[error("Unsupported custom rule '{rule_id}' at row {row}: {reason}")]
    UnsupportedCustomRule {
        rule_id: String,
        row: usize,
        reason: String,
    },

    /// Rule not found in the given scope.
    #[error("Rule '{id}' not found in scope '{scope}'")]
    NotFound { scope: String, id: String },

    /// Persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// =============================================================================
// AI Client Errors
// =============================================================================

/// Transport-level errors from the AI client.
#[derive(Debug, Error)]
pub enum AiError {
    /// Missing API key.
    #[error("Missing API key (set LEDGERMERGE_AI_API_KEY)")]
    MissingApiKey,

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    /// Non-success status from the API.
    #[error("API error {status}: {body}")]
    ApiError { status: u16, body: String },

    /// Invalid response envelope.
    #[error("Invalid AI response: {0}")]
    InvalidResponse(String),

    /// Timeout.
    #[error("Request timed out")]
    Timeout,
}

/// Why a delegated rule parse was rejected.
///
/// Never returned from [`crate::rules::RuleParser::parse`]: every variant is
/// logged and absorbed into the heuristic fallback.
#[derive(Debug, Error)]
pub enum ParseFailure {
    /// Delegated strategy is not configured.
    #[error("Delegated parsing is disabled")]
    Disabled,

    /// The call itself failed.
    #[error("Transport failure: {0}")]
    Transport(#[from] AiError),

    /// The call exceeded its time budget.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Response is not a JSON object.
    #[error("Malformed JSON: {0}")]
    MalformedJson(String),

    /// JSON object violates the rule schema.
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    /// `type` is not one of the rule kinds.
    #[error("Unknown rule type: {0}")]
    UnknownType(String),

    /// A required parameter is absent.
    #[error("Missing parameter '{param}' for {kind}")]
    MissingParameter { kind: String, param: String },

    /// A parameter not belonging to the kind.
    #[error("Unexpected parameter '{param}' for {kind}")]
    UnexpectedParameter { kind: String, param: String },

    /// A referenced target field is not a standard field.
    #[error("Unknown standard field: {0}")]
    UnknownField(String),
}

// =============================================================================
// Output Errors
// =============================================================================

/// Errors writing the merged table.
#[derive(Debug, Error)]
pub enum WriteError {
    /// IO error.
    #[error("Failed to write output: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoder error.
    #[error("CSV writer error: {0}")]
    Csv(#[from] csv::Error),

    /// Workbook encoder error.
    #[error("XLSX writer error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
}

// =============================================================================
// Merge Errors
// =============================================================================

/// Failure confined to a single source file.
///
/// Recorded in the merge manifest; never aborts the merge.
#[derive(Debug, Error)]
pub enum FileError {
    /// File could not be read.
    #[error(transparent)]
    Sheet(#[from] SheetError),

    /// Header detection failed.
    #[error(transparent)]
    Header(#[from] HeaderError),

    /// Strict mode turned a row failure into a file failure.
    #[error(transparent)]
    Rule(#[from] RuleError),
}

impl FileError {
    /// Stable name of the failure kind, as shown in manifests.
    pub fn kind(&self) -> &'static str {
        match self {
            FileError::Sheet(_) => "SheetReadError",
            FileError::Header(_) => "HeaderNotFoundError",
            FileError::Rule(RuleError::UnsupportedCustomRule { .. }) => {
                "UnsupportedCustomRuleError"
            }
            FileError::Rule(_) => "RuleError",
        }
    }
}

/// Top-level merge errors (only raised outside per-file processing).
#[derive(Debug, Error)]
pub enum MergeError {
    /// Could not write the output artifact.
    #[error("Write error: {0}")]
    Write(#[from] WriteError),

    /// Mapping store error.
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// Rule store error.
    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    /// Registry error.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// No input files.
    #[error("No source files to merge")]
    EmptyInput,
}

// =============================================================================
// Server Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Merge error.
    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    /// Invalid request.
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Server internal error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for sheet reading.
pub type SheetResult<T> = Result<T, SheetError>;

/// Result type for store persistence.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for mapping operations.
pub type MappingResult<T> = Result<T, MappingError>;

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Result type for rule operations.
pub type RuleResult<T> = Result<T, RuleError>;

/// Result type for AI operations.
pub type AiResult<T> = Result<T, AiError>;

/// Result type for merge operations.
pub type MergeResult<T> = Result<T, MergeError>;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        // StoreError -> MappingError -> MergeError
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let mapping_err: MappingError = StoreError::from(io).into();
        let merge_err: MergeError = mapping_err.into();
        assert!(merge_err.to_string().contains("disk full"));

        // AiError -> ParseFailure
        let failure: ParseFailure = AiError::Timeout.into();
        assert!(failure.to_string().contains("timed out"));
    }

    #[test]
    fn test_file_error_kind() {
        let err: FileError = HeaderError::NotFound { scanned: 10 }.into();
        assert_eq!(err.kind(), "HeaderNotFoundError");

        let err: FileError = RuleError::UnsupportedCustomRule {
            rule_id: "custom-1".into(),
            row: 4,
            reason: "unknown op".into(),
        }
        .into();
        assert_eq!(err.kind(), "UnsupportedCustomRuleError");
        assert!(err.to_string().contains("row 4"));
    }

    #[test]
    fn test_invalid_column_format() {
        let err = MappingError::InvalidColumn {
            file_key: "/data/a.xlsx".into(),
            column: "余额".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("余额"));
        assert!(msg.contains("/data/a.xlsx"));
    }
}
