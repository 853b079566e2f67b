//! Value operations for `transform` custom rules.
//!
//! Text operations work on the value's display form and produce text; numeric
//! operations (`negate`, `abs`) keep the value numeric and leave non-numeric
//! values untouched.

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::FieldValue;

/// All available value operations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Remove leading and trailing whitespace
    Trim,

    /// Convert to uppercase
    Uppercase,

    /// Convert to lowercase
    Lowercase,

    /// Replace using regex pattern
    Replace {
        pattern: String,
        #[serde(default)]
        value: String,
    },

    /// Map values using a lookup table
    Map {
        mapping: HashMap<String, String>,
        #[serde(default)]
        case_insensitive: bool,
        /// Value used when nothing matches; the value is kept otherwise
        #[serde(default)]
        default_unmapped: Option<String>,
    },

    /// Characters from `start`, optionally limited to `length`
    Substring {
        start: usize,
        #[serde(default)]
        length: Option<usize>,
    },

    /// Remove all non-digit characters
    DigitsOnly,

    /// Ensure string starts with given prefix
    EnsurePrefix { value: String },

    /// Ensure string ends with given suffix
    EnsureSuffix { value: String },

    /// Flip the sign of a numeric value
    Negate,

    /// Absolute value of a numeric value
    Abs,
}

impl Operation {
    /// Apply this operation to a value. Empty values stay empty.
    pub fn apply(&self, value: &FieldValue) -> FieldValue {
        if value.is_empty() {
            return FieldValue::Empty;
        }
        match self {
            Operation::Negate => Self::numeric(value, |d| -d),
            Operation::Abs => Self::numeric(value, |d| d.abs()),
            _ => {
                let text = value.to_string();
                match self.apply_text(&text) {
                    Some(result) if result.is_empty() => FieldValue::Empty,
                    Some(result) => FieldValue::Text(result),
                    None => value.clone(),
                }
            }
        }
    }

    fn numeric(value: &FieldValue, f: impl Fn(rust_decimal::Decimal) -> rust_decimal::Decimal) -> FieldValue {
        match value {
            FieldValue::Integer(i) => FieldValue::Integer(f((*i).into()).trunc().try_into().unwrap_or(*i)),
            other => other
                .as_decimal()
                .map(|d| FieldValue::Decimal(f(d)))
                .unwrap_or_else(|| other.clone()),
        }
    }

    fn apply_text(&self, s: &str) -> Option<String> {
        let result = match self {
            Operation::Trim => s.trim().to_string(),
            Operation::Uppercase => s.to_uppercase(),
            Operation::Lowercase => s.to_lowercase(),
            Operation::Replace { pattern, value } => {
                let re = Regex::new(pattern).ok()?;
                re.replace_all(s, value.as_str()).to_string()
            }
            Operation::Map { mapping, case_insensitive, default_unmapped } => {
                let found = if *case_insensitive {
                    let key = s.to_lowercase();
                    mapping.iter().find(|(k, _)| k.to_lowercase() == key).map(|(_, v)| v)
                } else {
                    mapping.get(s)
                };
                match (found, default_unmapped) {
                    (Some(v), _) => v.clone(),
                    (None, Some(d)) => d.clone(),
                    (None, None) => return None,
                }
            }
            Operation::Substring { start, length } => {
                let chars: Vec<char> = s.chars().collect();
                let start = (*start).min(chars.len());
                let end = length.map(|l| start + l).unwrap_or(chars.len()).min(chars.len());
                chars[start..end].iter().collect()
            }
            Operation::DigitsOnly => s.chars().filter(|c| c.is_ascii_digit()).collect(),
            Operation::EnsurePrefix { value } => {
                if s.starts_with(value.as_str()) {
                    s.to_string()
                } else {
                    format!("{}{}", value, s)
                }
            }
            Operation::EnsureSuffix { value } => {
                if s.ends_with(value.as_str()) {
                    s.to_string()
                } else {
                    format!("{}{}", s, value)
                }
            }
            Operation::Negate | Operation::Abs => return None,
        };
        Some(result)
    }
}

/// Apply operations left to right.
pub fn apply_all(operations: &[Operation], value: &FieldValue) -> FieldValue {
    operations.iter().fold(value.clone(), |acc, op| op.apply(&acc))
}
