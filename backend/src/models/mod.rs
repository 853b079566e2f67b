//! Domain models for the merge pipeline.
//!
//! This module contains the core data structures used throughout the pipeline:
//!
//! - [`StandardField`] / [`ValueType`] - canonical output columns
//! - [`SourceFile`] - one imported spreadsheet
//! - [`FieldMapping`] - source column → standard field assignment
//! - [`Cell`] - raw, lightly typed spreadsheet cell
//! - [`FieldValue`] - typed value of a standard field
//! - [`MergeRow`] / [`OutputTable`] - merge results

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::schema::SchemaRegistry;
use crate::transform::values::{parse_amount, parse_date};

// =============================================================================
// Standard Fields
// =============================================================================

/// Value type of a standard field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Text,
    Date,
    Decimal,
    Integer,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Text => "text",
            ValueType::Date => "date",
            ValueType::Decimal => "decimal",
            ValueType::Integer => "integer",
        };
        f.write_str(name)
    }
}

/// A canonical output column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StandardField {
    /// Unique machine name (`transaction_date`).
    pub name: String,
    /// Human description, usually the label seen in bank exports.
    pub description: String,
    pub value_type: ValueType,
    /// Extra keywords used when suggesting mappings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

impl StandardField {
    pub fn new(name: impl Into<String>, description: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            value_type,
            aliases: Vec::new(),
        }
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Name, description and aliases: every label this field answers to.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str())
            .chain(std::iter::once(self.description.as_str()))
            .chain(self.aliases.iter().map(|a| a.as_str()))
            .filter(|l| !l.is_empty())
    }
}

// =============================================================================
// Source Files
// =============================================================================

/// One imported spreadsheet, as recorded in the imported-files registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceFile {
    /// Resolved path, the registry key.
    pub path: String,
    pub display_name: String,
    pub import_timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_header_row: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detected_columns: Vec<String>,
    /// Bank scope whose rules apply; resolved from the rule store when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_scope: Option<String>,
}

impl SourceFile {
    /// Create a source record for `path`, stamped now.
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let display_name = Path::new(&path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.clone());
        Self {
            path,
            display_name,
            import_timestamp: Utc::now(),
            detected_header_row: None,
            detected_columns: Vec::new(),
            bank_scope: None,
        }
    }

    pub fn with_bank_scope(mut self, scope: impl Into<String>) -> Self {
        self.bank_scope = Some(scope.into());
        self
    }
}

// =============================================================================
// Field Mapping
// =============================================================================

/// Assignment of a source column to one standard field for one file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldMapping {
    pub source_file_key: String,
    pub standard_field: String,
    /// `None` leaves the target blank.
    pub source_column: Option<String>,
    pub is_mapped: bool,
}

impl FieldMapping {
    pub fn mapped(file_key: &str, field: &str, column: &str) -> Self {
        Self {
            source_file_key: file_key.to_string(),
            standard_field: field.to_string(),
            source_column: Some(column.to_string()),
            is_mapped: true,
        }
    }

    pub fn unmapped(file_key: &str, field: &str) -> Self {
        Self {
            source_file_key: file_key.to_string(),
            standard_field: field.to_string(),
            source_column: None,
            is_mapped: false,
        }
    }

    /// The column to copy from, if this entry is active.
    pub fn active_column(&self) -> Option<&str> {
        if self.is_mapped {
            self.source_column.as_deref()
        } else {
            None
        }
    }
}

// =============================================================================
// Raw Cells
// =============================================================================

/// A raw spreadsheet cell. Only numeric, text and date typing is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Cell {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Date(NaiveDateTime),
}

impl Cell {
    /// Text cell, trimmed; blank text becomes [`Cell::Empty`].
    pub fn text(s: impl AsRef<str>) -> Self {
        let trimmed = s.as_ref().trim();
        if trimmed.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(trimmed.to_string())
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Number cell, or text that reads as an amount.
    pub fn is_numeric(&self) -> bool {
        match self {
            Cell::Number(_) => true,
            Cell::Text(s) => parse_amount(s).is_some(),
            _ => false,
        }
    }

    /// Date cell, or text that reads as a date.
    pub fn is_date(&self) -> bool {
        match self {
            Cell::Date(_) => true,
            Cell::Text(s) => parse_date(s).is_some(),
            _ => false,
        }
    }

    /// Non-empty, neither numeric nor date.
    pub fn is_label(&self) -> bool {
        !self.is_empty() && !self.is_numeric() && !self.is_date()
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Empty => Ok(()),
            Cell::Text(s) => f.write_str(s),
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Cell::Number(n) => write!(f, "{}", n),
            Cell::Date(dt) if dt.time() == chrono::NaiveTime::MIN => {
                write!(f, "{}", dt.format("%Y-%m-%d"))
            }
            Cell::Date(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

// =============================================================================
// Typed Field Values
// =============================================================================

/// Value of a standard field inside a [`MergeRow`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum FieldValue {
    #[default]
    Empty,
    Date(NaiveDate),
    Decimal(Decimal),
    Integer(i64),
    Text(String),
}

impl FieldValue {
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Empty => true,
            FieldValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Numeric view of the value; text is parsed as an amount.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            FieldValue::Decimal(d) => Some(*d),
            FieldValue::Integer(i) => Some(Decimal::from(*i)),
            FieldValue::Text(s) => parse_amount(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Empty => Ok(()),
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            FieldValue::Decimal(d) => write!(f, "{}", d),
            FieldValue::Integer(i) => write!(f, "{}", i),
        }
    }
}

// =============================================================================
// Merge Results
// =============================================================================

/// One transformed source row, keyed by standard field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeRow {
    pub values: HashMap<String, FieldValue>,
    /// Index of the originating row in the raw sheet.
    pub source_row: usize,
    /// Writer emits a row-group boundary after this row.
    pub page_break_after: bool,
}

impl MergeRow {
    pub fn new(source_row: usize) -> Self {
        Self {
            source_row,
            ..Default::default()
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: FieldValue) {
        self.values.insert(field.into(), value);
    }

    /// Values in schema declaration order; fields outside the schema are dropped.
    pub fn ordered(&self, schema: &SchemaRegistry) -> Vec<FieldValue> {
        schema
            .fields()
            .iter()
            .map(|f| self.values.get(&f.name).cloned().unwrap_or_default())
            .collect()
    }
}

/// The consolidated output: schema columns plus ordered rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct OutputTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<FieldValue>>,
    /// Row indices after which a row-group boundary is written.
    #[serde(default)]
    pub page_breaks: Vec<usize>,
}

impl OutputTable {
    /// Empty table with the schema's columns.
    pub fn new(schema: &SchemaRegistry) -> Self {
        Self {
            columns: schema.names(),
            rows: Vec::new(),
            page_breaks: Vec::new(),
        }
    }

    /// Append a row in canonical column order.
    pub fn push(&mut self, row: &MergeRow, schema: &SchemaRegistry) {
        self.rows.push(row.ordered(schema));
        if row.page_break_after {
            self.page_breaks.push(self.rows.len() - 1);
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `column` in row `index`.
    pub fn value(&self, index: usize, column: &str) -> Option<&FieldValue> {
        let col = self.columns.iter().position(|c| c == column)?;
        self.rows.get(index)?.get(col)
    }
}
