//! Rule engine: turns raw data rows into merge rows.
//!
//! Application order is fixed by [`crate::rules::Stage`], not by storage order:
//!
//! ```text
//! mapping copies ─▶ field_copy ─▶ date_range_merge ─▶ balance_adjust
//!                ─▶ income_expense_classify ─▶ page_break ─▶ custom
//! ```
//!
//! Rules of the same stage run in storage order. `balance_adjust` walks the
//! rows in source order and carries its running value from row to row.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::logs::log_warning;
use crate::error::{RuleError, RuleResult};
use crate::header::HeaderInfo;
use crate::models::{Cell, FieldMapping, FieldValue, MergeRow, ValueType};
use crate::rules::{Condition, Rule, RuleKind};
use crate::schema::SchemaRegistry;
use crate::transform::operations::{apply_all, Operation};
use crate::transform::values::{coerce, coerce_text, parse_date, retype};

static RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(\d{4})\s*[年/.\-]\s*(\d{1,2})\s*[月/.\-]\s*(\d{1,2})\s*日?(?:\s*(?:-|~|～|至|到|—)\s*|\s+)(\d{4})\s*[年/.\-]\s*(\d{1,2})\s*[月/.\-]\s*(\d{1,2})",
    )
    .unwrap()
});

static MONTH_DAY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{1,2})\D+(\d{1,2})").unwrap());

static COMPACT_MONTH_DAY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{2})(\d{2})$").unwrap());

/// Executable form of a custom rule's `structured_params`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", deny_unknown_fields)]
pub enum CustomOp {
    /// Drop rows where any value contains one of the keywords.
    ExcludeKeywords { keywords: Vec<String> },
    /// Write a constant into a standard field.
    SetConstant { field: String, value: String },
    /// Run value operations on a standard field.
    Transform { field: String, operations: Vec<Operation> },
    /// Sign an unsigned amount column by a debit/credit flag column.
    DebitCredit {
        flag_column: String,
        amount_column: String,
        /// Flag text to sign, `{"贷": "+", "借": "-"}` unless given.
        #[serde(default = "default_flag_signs")]
        mapping: BTreeMap<String, Sign>,
        #[serde(default = "default_amount_field")]
        target_field: String,
        /// Receives the income/expense label when set.
        #[serde(default)]
        type_field: Option<String>,
        #[serde(default = "default_income_label")]
        income_label: String,
        #[serde(default = "default_expense_label")]
        expense_label: String,
    },
    /// Fold separate debit and credit amount columns into one signed amount.
    SplitColumns {
        debit_column: String,
        credit_column: String,
        #[serde(default = "default_amount_field")]
        target_field: String,
        #[serde(default)]
        type_field: Option<String>,
        #[serde(default = "default_income_label")]
        income_label: String,
        #[serde(default = "default_expense_label")]
        expense_label: String,
    },
}

/// Direction of a flagged amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sign {
    #[serde(rename = "+")]
    Credit,
    #[serde(rename = "-")]
    Debit,
}

/// Output side shared by `debit_credit` and `split_columns`.
struct SignedOutput<'o> {
    target_field: &'o str,
    type_field: Option<&'o str>,
    income_label: &'o str,
    expense_label: &'o str,
}

impl SignedOutput<'_> {
    fn write(&self, row: &mut MergeRow, sign: Sign, amount: Decimal) {
        let amount = amount.abs();
        let (signed, label) = match sign {
            Sign::Credit => (amount, self.income_label),
            Sign::Debit => (-amount, self.expense_label),
        };
        row.set(self.target_field, FieldValue::Decimal(signed));
        if let Some(field) = self.type_field {
            row.set(field, FieldValue::Text(label.to_string()));
        }
    }

    fn unknown_field(&self, schema: &SchemaRegistry) -> Option<String> {
        std::iter::once(self.target_field)
            .chain(self.type_field)
            .find(|f| !schema.contains(f))
            .map(str::to_string)
    }
}

fn default_flag_signs() -> BTreeMap<String, Sign> {
    BTreeMap::from([("贷".to_string(), Sign::Credit), ("借".to_string(), Sign::Debit)])
}

fn default_amount_field() -> String {
    "transaction_amount".into()
}

fn default_income_label() -> String {
    "收入".into()
}

fn default_expense_label() -> String {
    "支出".into()
}

/// Sign for a flag cell: exact key first, then the first key it contains.
fn flag_sign(mapping: &BTreeMap<String, Sign>, flag: &str) -> Option<Sign> {
    let flag = flag.trim();
    if flag.is_empty() {
        return None;
    }
    mapping
        .get(flag)
        .or_else(|| mapping.iter().find(|(k, _)| !k.is_empty() && flag.contains(k.as_str())).map(|(_, s)| s))
        .copied()
}

impl CustomOp {
    /// Parse structured params. `Ok(None)` for empty (descriptive) params.
    pub fn from_params(params: &Map<String, Value>) -> Result<Option<Self>, String> {
        if params.is_empty() {
            return Ok(None);
        }
        serde_json::from_value(Value::Object(params.clone()))
            .map(Some)
            .map_err(|e| format!("unrecognized structured_params: {}", e))
    }
}

/// A data row dropped by a failing rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRow {
    /// One-based row number in the source sheet.
    pub row: usize,
    pub rule_id: String,
    pub reason: String,
}

/// Rows produced for one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineOutput {
    pub rows: Vec<MergeRow>,
    pub skipped: Vec<SkippedRow>,
    /// Rows removed by `exclude_keywords`.
    pub filtered: usize,
}

/// Start and end of a statement's date range line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Find a `start - end` date pair in `text`.
    pub fn parse(text: &str) -> Option<Self> {
        let caps = RANGE_RE.captures(text)?;
        let num = |i: usize| caps[i].parse::<u32>().ok();
        let start = NaiveDate::from_ymd_opt(num(1)? as i32, num(2)?, num(3)?)?;
        let end = NaiveDate::from_ymd_opt(num(4)? as i32, num(5)?, num(6)?)?;
        Some(Self { start, end })
    }

    /// Year a month falls in: months before the start month belong to the
    /// end year (ranges crossing new year).
    pub fn year_for(&self, month: u32) -> i32 {
        if month < self.start.month() {
            self.end.year()
        } else {
            self.start.year()
        }
    }

    /// Complete a month/day text (`01月05日`, `1/5`, `0105`) to a date.
    pub fn complete(&self, parts: &str) -> Option<NaiveDate> {
        let parts = parts.trim();
        let caps = MONTH_DAY_RE
            .captures(parts)
            .or_else(|| COMPACT_MONTH_DAY_RE.captures(parts))?;
        let month: u32 = caps[1].parse().ok()?;
        let day: u32 = caps[2].parse().ok()?;
        NaiveDate::from_ymd_opt(self.year_for(month), month, day)
    }
}

/// Applies rule sets to the data rows of one sheet.
pub struct RuleEngine<'a> {
    schema: &'a SchemaRegistry,
    strict: bool,
}

/// Raw data row together with the merge row built from it.
struct WorkRow<'r> {
    raw: &'r [Cell],
    row: MergeRow,
    skipped: Option<SkippedRow>,
}

impl<'a> RuleEngine<'a> {
    pub fn new(schema: &'a SchemaRegistry) -> Self {
        Self { schema, strict: false }
    }

    /// In strict mode a custom rule failure aborts the file.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Build merge rows from `rows` (the whole raw sheet) below the header.
    pub fn apply(
        &self,
        rules: &[Rule],
        rows: &[Vec<Cell>],
        header: &HeaderInfo,
        mapping: &[FieldMapping],
    ) -> RuleResult<EngineOutput> {
        let mut work: Vec<WorkRow> = rows
            .iter()
            .enumerate()
            .skip(header.data_start_row)
            .filter(|(_, raw)| !raw.iter().all(Cell::is_empty))
            .map(|(index, raw)| WorkRow { raw, row: MergeRow::new(index), skipped: None })
            .collect();

        self.apply_mapping(&mut work, header, mapping);

        let mut ordered: Vec<&Rule> = rules.iter().collect();
        ordered.sort_by_key(|r| r.stage());

        let mut output = EngineOutput::default();
        let mut custom: Vec<&Rule> = Vec::new();
        for rule in ordered {
            match &rule.kind {
                RuleKind::FieldCopy { source_field, target_field } => {
                    let value_type = self.schema.value_type(target_field);
                    for w in work.iter_mut() {
                        let value = self.lookup(w, header, source_field);
                        w.row.set(target_field.clone(), retype(&value, value_type));
                    }
                }
                RuleKind::DateRangeMerge { date_part_fields, range_source_row, target_field } => {
                    self.merge_dates(&mut work, rows, header, date_part_fields, *range_source_row, target_field);
                }
                RuleKind::BalanceAdjust { target_field, delta, apply_condition } => {
                    self.adjust_balance(&mut work, header, &rule.id, target_field, *delta, apply_condition);
                }
                RuleKind::IncomeExpenseClassify { amount_field, target_field, positive_label, negative_label } => {
                    for w in work.iter_mut() {
                        let amount = self.lookup(w, header, amount_field).as_decimal();
                        let label = match amount {
                            Some(a) if a.is_sign_positive() && !a.is_zero() => positive_label,
                            Some(a) if a.is_sign_negative() && !a.is_zero() => negative_label,
                            _ => continue,
                        };
                        w.row.set(target_field.clone(), FieldValue::Text(label.clone()));
                    }
                }
                RuleKind::PageBreak { every_n_rows } => {
                    let n = (*every_n_rows).max(1);
                    for (i, w) in work.iter_mut().enumerate() {
                        if (i + 1) % n == 0 {
                            w.row.page_break_after = true;
                        }
                    }
                }
                RuleKind::Custom { .. } => custom.push(rule),
            }
        }

        for mut w in work {
            if let Some(skipped) = w.skipped.take() {
                output.skipped.push(skipped);
                continue;
            }
            match self.apply_custom(&custom, &w, header) {
                Ok(None) => output.filtered += 1,
                Ok(Some(row)) => output.rows.push(row),
                Err(e) if self.strict => return Err(e),
                Err(e) => {
                    if let RuleError::UnsupportedCustomRule { rule_id, row, reason } = e {
                        output.skipped.push(SkippedRow { row, rule_id, reason });
                    }
                }
            }
        }
        Ok(output)
    }

    fn apply_mapping(&self, work: &mut [WorkRow], header: &HeaderInfo, mapping: &[FieldMapping]) {
        let columns: Vec<(&str, usize, ValueType)> = mapping
            .iter()
            .filter_map(|m| {
                let column = m.active_column()?;
                let index = header.column_index(column)?;
                Some((m.standard_field.as_str(), index, self.schema.value_type(&m.standard_field)))
            })
            .collect();

        for w in work.iter_mut() {
            for (field, index, value_type) in &columns {
                let cell = w.raw.get(*index).cloned().unwrap_or_default();
                w.row.set(*field, coerce(&cell, *value_type));
            }
        }
    }

    /// Value of `name`: the standard field when set, else the source column.
    fn lookup(&self, w: &WorkRow, header: &HeaderInfo, name: &str) -> FieldValue {
        if let Some(value) = w.row.get(name).filter(|v| !v.is_empty()) {
            return value.clone();
        }
        header
            .column_index(name)
            .and_then(|i| w.raw.get(i))
            .map(|cell| coerce(cell, ValueType::Text))
            .unwrap_or_default()
    }

    fn merge_dates(
        &self,
        work: &mut [WorkRow],
        rows: &[Vec<Cell>],
        header: &HeaderInfo,
        parts: &[String],
        range_row: usize,
        target: &str,
    ) {
        let range = rows.get(range_row).and_then(|row| {
            let text: Vec<String> = row.iter().map(Cell::to_string).collect();
            DateRange::parse(&text.join(" "))
        });
        let Some(range) = range else {
            log_warning(format!("No date range found in row {}, date merge into '{}' skipped", range_row + 1, target));
            return;
        };

        for w in work.iter_mut() {
            let joined = parts
                .iter()
                .map(|p| self.lookup(w, header, p).to_string())
                .filter(|s| !s.trim().is_empty())
                .collect::<Vec<_>>()
                .join("-");
            if joined.is_empty() {
                continue;
            }
            if let Some(date) = parse_date(&joined).or_else(|| range.complete(&joined)) {
                w.row.set(target, FieldValue::Date(date));
            }
        }
    }

    fn adjust_balance(
        &self,
        work: &mut [WorkRow],
        header: &HeaderInfo,
        rule_id: &str,
        target: &str,
        delta: Decimal,
        condition: &Condition,
    ) {
        let Some(first) = work.first() else {
            return;
        };
        let mut running = self.lookup(first, header, target).as_decimal().unwrap_or_default();

        for w in work.iter_mut() {
            if w.skipped.is_some() || !self.holds(condition, w, header) {
                continue;
            }
            match running.checked_add(delta) {
                Some(next) => {
                    running = next;
                    w.row.set(target, FieldValue::Decimal(running));
                }
                // the running value stays at the last representable balance
                None => {
                    w.skipped = Some(SkippedRow {
                        row: w.row.source_row + 1,
                        rule_id: rule_id.to_string(),
                        reason: format!("balance '{}' overflows adding {}", target, delta),
                    });
                }
            }
        }
    }

    fn holds(&self, condition: &Condition, w: &WorkRow, header: &HeaderInfo) -> bool {
        match condition {
            Condition::Always => true,
            Condition::FieldNonEmpty { field } => !self.lookup(w, header, field).is_empty(),
            Condition::FieldEquals { field, value } => self.lookup(w, header, field).to_string().trim() == value.trim(),
            Condition::AmountPositive { field } => self
                .lookup(w, header, field)
                .as_decimal()
                .is_some_and(|d| d > Decimal::ZERO),
            Condition::AmountNegative { field } => self
                .lookup(w, header, field)
                .as_decimal()
                .is_some_and(|d| d < Decimal::ZERO),
        }
    }

    /// Run custom rules on one finished row. `Ok(None)` means filtered out.
    fn apply_custom(&self, rules: &[&Rule], w: &WorkRow, header: &HeaderInfo) -> RuleResult<Option<MergeRow>> {
        let mut row = w.row.clone();
        let row_number = w.row.source_row + 1;
        let unsupported = |rule: &Rule, reason: String| RuleError::UnsupportedCustomRule {
            rule_id: rule.id.clone(),
            row: row_number,
            reason,
        };

        for &rule in rules {
            let RuleKind::Custom { structured_params, .. } = &rule.kind else {
                continue;
            };
            let op = match CustomOp::from_params(structured_params) {
                Ok(Some(op)) => op,
                Ok(None) => continue,
                Err(reason) => return Err(unsupported(rule, reason)),
            };
            match op {
                CustomOp::ExcludeKeywords { keywords } => {
                    let hit = keywords.iter().filter(|k| !k.is_empty()).any(|k| {
                        row.values.values().any(|v| v.to_string().contains(k.as_str()))
                            || w.raw.iter().any(|c| c.to_string().contains(k.as_str()))
                    });
                    if hit {
                        return Ok(None);
                    }
                }
                CustomOp::SetConstant { field, value } => {
                    if !self.schema.contains(&field) {
                        return Err(unsupported(rule, format!("unknown standard field '{}'", field)));
                    }
                    let value_type = self.schema.value_type(&field);
                    row.set(field, coerce_text(&value, value_type));
                }
                CustomOp::Transform { field, operations } => {
                    if !self.schema.contains(&field) {
                        return Err(unsupported(rule, format!("unknown standard field '{}'", field)));
                    }
                    let current = row
                        .get(&field)
                        .filter(|v| !v.is_empty())
                        .cloned()
                        .unwrap_or_else(|| self.lookup(w, header, &field));
                    row.set(field, apply_all(&operations, &current));
                }
                CustomOp::DebitCredit {
                    flag_column,
                    amount_column,
                    mapping,
                    target_field,
                    type_field,
                    income_label,
                    expense_label,
                } => {
                    let output = SignedOutput {
                        target_field: &target_field,
                        type_field: type_field.as_deref(),
                        income_label: &income_label,
                        expense_label: &expense_label,
                    };
                    if let Some(field) = output.unknown_field(self.schema) {
                        return Err(unsupported(rule, format!("unknown standard field '{}'", field)));
                    }
                    let flag = self.lookup(w, header, &flag_column).to_string();
                    let amount = self.lookup(w, header, &amount_column).as_decimal();
                    if let (Some(sign), Some(amount)) = (flag_sign(&mapping, &flag), amount) {
                        output.write(&mut row, sign, amount);
                    }
                }
                CustomOp::SplitColumns {
                    debit_column,
                    credit_column,
                    target_field,
                    type_field,
                    income_label,
                    expense_label,
                } => {
                    let output = SignedOutput {
                        target_field: &target_field,
                        type_field: type_field.as_deref(),
                        income_label: &income_label,
                        expense_label: &expense_label,
                    };
                    if let Some(field) = output.unknown_field(self.schema) {
                        return Err(unsupported(rule, format!("unknown standard field '{}'", field)));
                    }
                    let nonzero = |column: &str| self.lookup(w, header, column).as_decimal().filter(|d| !d.is_zero());
                    if let Some(credit) = nonzero(&credit_column) {
                        output.write(&mut row, Sign::Credit, credit);
                    } else if let Some(debit) = nonzero(&debit_column) {
                        output.write(&mut row, Sign::Debit, debit);
                    }
                }
            }
        }
        Ok(Some(row))
    }
}
