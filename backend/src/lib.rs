//! # Ledgermerge - rule-driven merging of bank statement exports
//!
//! Ledgermerge reads spreadsheets exported by different banks, maps their
//! columns onto one canonical set of standard fields, applies per-bank
//! transformation rules (optionally parsed from natural language by a
//! language model) and writes a single consolidated table.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ XLSX / CSV  │────▶│   Header    │────▶│   Mapping   │────▶│ Rule Engine │────▶│ Merged XLSX │
//! │ (per bank)  │     │  Detector   │     │ (suggested) │     │ (by stage)  │     │ (canonical) │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//!                                                                    ▲
//!                                              ┌─────────────┐       │
//!                                              │ Rule Parser │───────┘
//!                                              │ (AI + regex)│
//!                                              └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ledgermerge::{merge_files, AppConfig, MergeOptions};
//!
//! let config = AppConfig::from_env();
//! let schema = Arc::new(config.load_schema()?);
//! let outcome = merge_files(&config, schema, &[], MergeOptions::default())?;
//! println!("{} rows, {} files failed", outcome.report.table.len(), outcome.report.failed());
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`models`] - Domain models (StandardField, SourceFile, Cell, MergeRow)
//! - [`schema`] - Standard field registry
//! - [`parser`] - Spreadsheet reading with encoding detection
//! - [`header`] - Header row and balance column detection
//! - [`store`] - Field mappings and imported-files registry
//! - [`rules`] - Rule model, store and parsers
//! - [`transform`] - Rule engine and merge pipeline
//! - [`validation`] - JSON Schema validation of model answers
//! - [`writer`] - Output table writing
//! - [`ai`] - Language model client
//! - [`config`] - Environment configuration
//! - [`api`] - HTTP API server and log streaming

// Core modules
pub mod config;
pub mod error;
pub mod models;
pub mod schema;

// Reading
pub mod header;
pub mod parser;

// Persistence
pub mod store;

// Rules and transformation
pub mod rules;
pub mod transform;

// Validation
pub mod validation;

// Output
pub mod writer;

// AI
pub mod ai;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    AiError, FileError, HeaderError, MappingError, MergeError, ParseFailure, RegistryError, RuleError,
    SchemaError, ServerError, SheetError, StoreError, WriteError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{Cell, FieldMapping, FieldValue, MergeRow, OutputTable, SourceFile, StandardField, ValueType};

pub use schema::SchemaRegistry;

// =============================================================================
// Re-exports - Reading
// =============================================================================

pub use header::{HeaderDetector, HeaderInfo};
pub use parser::{FileSheetReader, RawSheet, SheetReader};

// =============================================================================
// Re-exports - Stores
// =============================================================================

pub use store::{FieldMappingStore, FileRegistry};

// =============================================================================
// Re-exports - Rules
// =============================================================================

pub use rules::{Condition, DelegatedStrategy, HeuristicParser, Rule, RuleKind, RuleOrigin, RuleParser, RuleStore, Stage};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use transform::engine::{EngineOutput, RuleEngine, SkippedRow};
pub use transform::operations::Operation;
pub use transform::pipeline::{
    merge_files, FileReport, FileStatus, MergeOptions, MergeOutcome, MergeProcessor, MergeReport,
};

// =============================================================================
// Re-exports - Output, AI and config
// =============================================================================

pub use ai::{AiClient, AiConfig};
pub use config::AppConfig;
pub use writer::{CsvTableWriter, OutputFormat, TableWriter, XlsxTableWriter};

// Server
pub mod server {
    pub use crate::api::server::{router, start_server, AppState};
}
