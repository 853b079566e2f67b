//! Typed transformation rules.
//!
//! A rule is one of a closed set of kinds, serialized with a `type` tag:
//!
//! ```json
//! {
//!   "id": "balance_adjust-4be0643f1d98",
//!   "bank_scope": "招商银行",
//!   "created_from": "nl_heuristic",
//!   "type": "balance_adjust",
//!   "target_field": "balance",
//!   "delta": "100",
//!   "apply_condition": { "kind": "always" }
//! }
//! ```

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Which path produced a rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RuleOrigin {
    Manual,
    NlHeuristic,
    NlLlm,
}

impl fmt::Display for RuleOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RuleOrigin::Manual => "manual",
            RuleOrigin::NlHeuristic => "nl_heuristic",
            RuleOrigin::NlLlm => "nl_llm",
        })
    }
}

/// Row predicate gating a balance adjustment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    #[default]
    Always,
    FieldNonEmpty { field: String },
    FieldEquals { field: String, value: String },
    AmountPositive { field: String },
    AmountNegative { field: String },
}

impl Condition {
    fn describe(&self) -> String {
        match self {
            Condition::Always => String::new(),
            Condition::FieldNonEmpty { field } => format!(" when \"{}\" is not empty", field),
            Condition::FieldEquals { field, value } => {
                format!(" when \"{}\" equals \"{}\"", field, value)
            }
            Condition::AmountPositive { field } => format!(" when \"{}\" is positive", field),
            Condition::AmountNegative { field } => format!(" when \"{}\" is negative", field),
        }
    }
}

/// Kind-specific rule parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleKind {
    /// Copy a source column (or already built field) into a standard field.
    FieldCopy { source_field: String, target_field: String },

    /// Complete partial dates with the year taken from a statement's date
    /// range line.
    DateRangeMerge {
        date_part_fields: Vec<String>,
        /// Zero-based raw row holding the range text.
        range_source_row: usize,
        target_field: String,
    },

    /// Running adjustment: each row's adjusted value is the next row's baseline.
    BalanceAdjust {
        target_field: String,
        delta: Decimal,
        #[serde(default)]
        apply_condition: Condition,
    },

    /// Label rows by the sign of an amount.
    IncomeExpenseClassify {
        amount_field: String,
        target_field: String,
        positive_label: String,
        negative_label: String,
    },

    /// Row-group boundary every `every_n_rows` rows; consumed by the writer.
    PageBreak { every_n_rows: usize },

    /// Free-form instruction with optional executable parameters.
    Custom {
        raw_description: String,
        #[serde(default, skip_serializing_if = "Map::is_empty")]
        structured_params: Map<String, Value>,
    },
}

/// Application stage; rules run in ascending stage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Copy,
    DateMerge,
    Balance,
    Classify,
    Layout,
    Custom,
}

impl RuleKind {
    /// Every `type` tag, in application order.
    pub const TYPE_NAMES: [&'static str; 6] = [
        "field_copy",
        "date_range_merge",
        "balance_adjust",
        "income_expense_classify",
        "page_break",
        "custom",
    ];

    pub fn type_name(&self) -> &'static str {
        match self {
            RuleKind::FieldCopy { .. } => "field_copy",
            RuleKind::DateRangeMerge { .. } => "date_range_merge",
            RuleKind::BalanceAdjust { .. } => "balance_adjust",
            RuleKind::IncomeExpenseClassify { .. } => "income_expense_classify",
            RuleKind::PageBreak { .. } => "page_break",
            RuleKind::Custom { .. } => "custom",
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            RuleKind::FieldCopy { .. } => Stage::Copy,
            RuleKind::DateRangeMerge { .. } => Stage::DateMerge,
            RuleKind::BalanceAdjust { .. } => Stage::Balance,
            RuleKind::IncomeExpenseClassify { .. } => Stage::Classify,
            RuleKind::PageBreak { .. } => Stage::Layout,
            RuleKind::Custom { .. } => Stage::Custom,
        }
    }

    /// Required and optional parameter keys of a `type` tag.
    pub fn parameters(type_name: &str) -> Option<(&'static [&'static str], &'static [&'static str])> {
        let params: (&[&str], &[&str]) = match type_name {
            "field_copy" => (&["source_field", "target_field"], &[]),
            "date_range_merge" => (&["date_part_fields", "range_source_row", "target_field"], &[]),
            "balance_adjust" => (&["target_field", "delta"], &["apply_condition"]),
            "income_expense_classify" => (
                &["amount_field", "target_field", "positive_label", "negative_label"],
                &[],
            ),
            "page_break" => (&["every_n_rows"], &[]),
            "custom" => (&["raw_description"], &["structured_params"]),
            _ => return None,
        };
        Some(params)
    }

    /// Standard fields this rule writes.
    pub fn target_fields(&self) -> Vec<&str> {
        match self {
            RuleKind::FieldCopy { target_field, .. }
            | RuleKind::DateRangeMerge { target_field, .. }
            | RuleKind::BalanceAdjust { target_field, .. }
            | RuleKind::IncomeExpenseClassify { target_field, .. } => vec![target_field.as_str()],
            RuleKind::PageBreak { .. } | RuleKind::Custom { .. } => Vec::new(),
        }
    }

    /// Canonical English description. The heuristic parser reads it back
    /// into an identical rule.
    pub fn describe(&self) -> String {
        match self {
            RuleKind::FieldCopy { source_field, target_field } => {
                format!("copy field \"{}\" to \"{}\"", source_field, target_field)
            }
            RuleKind::DateRangeMerge { date_part_fields, range_source_row, target_field } => {
                let parts: Vec<String> = date_part_fields.iter().map(|p| format!("\"{}\"", p)).collect();
                format!(
                    "merge date parts {} with the date range in row {} into \"{}\"",
                    parts.join(", "),
                    range_source_row + 1,
                    target_field
                )
            }
            RuleKind::BalanceAdjust { target_field, delta, apply_condition } => {
                let sign = if delta.is_sign_negative() { "" } else { "+" };
                format!(
                    "adjust balance \"{}\" by {}{}{}",
                    target_field,
                    sign,
                    delta,
                    apply_condition.describe()
                )
            }
            RuleKind::IncomeExpenseClassify { amount_field, target_field, positive_label, negative_label } => {
                format!(
                    "classify amount \"{}\" into \"{}\" as \"{}\" for income and \"{}\" for expense",
                    amount_field, target_field, positive_label, negative_label
                )
            }
            RuleKind::PageBreak { every_n_rows } => format!("page break every {} rows", every_n_rows),
            RuleKind::Custom { raw_description, .. } => raw_description.clone(),
        }
    }
}

/// A transformation rule bound to a bank scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    /// Unique within `bank_scope`.
    pub id: String,
    pub bank_scope: String,
    pub created_from: RuleOrigin,
    #[serde(flatten)]
    pub kind: RuleKind,
}

impl Rule {
    /// Build a rule with its deterministic id.
    pub fn new(bank_scope: impl Into<String>, kind: RuleKind, created_from: RuleOrigin) -> Self {
        let bank_scope = bank_scope.into();
        let id = rule_id(&bank_scope, &kind);
        Self { id, bank_scope, created_from, kind }
    }

    pub fn describe(&self) -> String {
        self.kind.describe()
    }

    pub fn stage(&self) -> Stage {
        self.kind.stage()
    }
}

/// `<type>-<12 hex>`: a name-based UUID over scope and canonical content,
/// so identical rules in a scope share an id.
pub fn rule_id(bank_scope: &str, kind: &RuleKind) -> String {
    let mut name = format!("{}\n{}", bank_scope, kind.describe());
    if let RuleKind::Custom { structured_params, .. } = kind {
        if !structured_params.is_empty() {
            name.push('\n');
            name.push_str(&Value::Object(structured_params.clone()).to_string());
        }
    }
    let uuid = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes());
    let hex = uuid.simple().to_string();
    format!("{}-{}", kind.type_name(), &hex[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serialized_shape() {
        let rule = Rule::new(
            "招商银行",
            RuleKind::PageBreak { every_n_rows: 50 },
            RuleOrigin::Manual,
        );
        let value = serde_json::to_value(&rule).unwrap();
        assert_eq!(value["type"], "page_break");
        assert_eq!(value["every_n_rows"], 50);
        assert_eq!(value["created_from"], "manual");
        assert_eq!(value["bank_scope"], "招商银行");
        assert!(value["id"].as_str().unwrap().starts_with("page_break-"));

        let back: Rule = serde_json::from_value(value).unwrap();
        assert_eq!(back, rule);
    }

    #[test]
    fn test_balance_adjust_accepts_numeric_delta() {
        let rule: Rule = serde_json::from_value(json!({
            "id": "r1",
            "bank_scope": "b",
            "created_from": "nl_llm",
            "type": "balance_adjust",
            "target_field": "balance",
            "delta": 100.5
        }))
        .unwrap();
        match rule.kind {
            RuleKind::BalanceAdjust { delta, apply_condition, .. } => {
                assert_eq!(delta, Decimal::new(1005, 1));
                assert_eq!(apply_condition, Condition::Always);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_id_is_deterministic_per_scope() {
        let kind = RuleKind::PageBreak { every_n_rows: 10 };
        let a = Rule::new("A", kind.clone(), RuleOrigin::Manual);
        let b = Rule::new("A", kind.clone(), RuleOrigin::NlHeuristic);
        let c = Rule::new("B", kind, RuleOrigin::Manual);
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_custom_params_change_id() {
        let plain = RuleKind::Custom {
            raw_description: "drop totals".into(),
            structured_params: Map::new(),
        };
        let mut params = Map::new();
        params.insert("op".into(), json!("exclude_keywords"));
        let with_params = RuleKind::Custom {
            raw_description: "drop totals".into(),
            structured_params: params,
        };
        assert_ne!(rule_id("s", &plain), rule_id("s", &with_params));
    }

    #[test]
    fn test_describe() {
        let kind = RuleKind::BalanceAdjust {
            target_field: "balance".into(),
            delta: Decimal::new(-50, 0),
            apply_condition: Condition::FieldNonEmpty { field: "摘要".into() },
        };
        assert_eq!(
            kind.describe(),
            "adjust balance \"balance\" by -50 when \"摘要\" is not empty"
        );
        let kind = RuleKind::DateRangeMerge {
            date_part_fields: vec!["月".into(), "日".into()],
            range_source_row: 1,
            target_field: "transaction_date".into(),
        };
        assert_eq!(
            kind.describe(),
            "merge date parts \"月\", \"日\" with the date range in row 2 into \"transaction_date\""
        );
    }

    #[test]
    fn test_parameters_cover_every_type() {
        for name in RuleKind::TYPE_NAMES {
            assert!(RuleKind::parameters(name).is_some(), "{}", name);
        }
        assert!(RuleKind::parameters("sort").is_none());
    }

    #[test]
    fn test_stage_order() {
        assert!(Stage::Copy < Stage::DateMerge);
        assert!(Stage::Balance < Stage::Classify);
        assert!(Stage::Layout < Stage::Custom);
    }
}
