//! Schema registry: the canonical, ordered list of standard fields.
//!
//! The registry is loaded once at startup and read-only afterwards. Its field
//! order is the output column order of every merge.

use std::collections::HashSet;
use std::path::Path;

use crate::error::{SchemaError, StoreError};
use crate::models::{StandardField, ValueType};

/// Embedded default definition (bank statement fields).
const DEFAULT_FIELDS: &str = include_str!("../../schemas/standard-fields.json");

/// Ordered set of standard fields.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaRegistry {
    fields: Vec<StandardField>,
}

impl SchemaRegistry {
    /// Build a registry, rejecting duplicate names and empty definitions.
    pub fn new(fields: Vec<StandardField>) -> Result<Self, SchemaError> {
        if fields.is_empty() {
            return Err(SchemaError::Empty);
        }
        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }
        }
        Ok(Self { fields })
    }

    /// Load a JSON array of standard fields.
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        let fields: Vec<StandardField> = serde_json::from_str(json).map_err(StoreError::from)?;
        Self::new(fields)
    }

    /// Load a definition file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path).map_err(StoreError::from)?;
        Self::from_json(&content)
    }

    pub fn fields(&self) -> &[StandardField] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&StandardField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Declaration index of `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Value type of `name`, text when undeclared.
    pub fn value_type(&self, name: &str) -> ValueType {
        self.get(name).map(|f| f.value_type).unwrap_or(ValueType::Text)
    }

    /// First field of `value_type` whose labels contain one of `hints`,
    /// else the first field of that type.
    pub fn first_of_type(&self, value_type: ValueType, hints: &[&str]) -> Option<&StandardField> {
        let typed = || self.fields.iter().filter(move |f| f.value_type == value_type);
        typed()
            .find(|f| {
                f.labels().any(|label| {
                    let label = label.to_lowercase();
                    hints.iter().any(|h| label.contains(&h.to_lowercase()))
                })
            })
            .or_else(|| typed().next())
    }

    /// First field of any type whose labels contain one of `hints`.
    pub fn find_by_hint(&self, hints: &[&str]) -> Option<&StandardField> {
        self.fields.iter().find(|f| {
            f.labels().any(|label| {
                let label = label.to_lowercase();
                hints.iter().any(|h| label.contains(&h.to_lowercase()))
            })
        })
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        let fields: Vec<StandardField> = serde_json::from_str(DEFAULT_FIELDS).unwrap_or_default();
        Self { fields }
    }
}
