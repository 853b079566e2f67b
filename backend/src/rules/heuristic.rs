//! Keyword and pattern based rule extraction.
//!
//! Total by construction: any text yields a rule, `Custom` carrying the raw
//! text when no family matches or parameters cannot be extracted. Families
//! are checked in a fixed order on the text with quoted names blanked out,
//! so a field called "余额" cannot steer the family choice:
//!
//! 1. page break      (分页, 每页, page break)
//! 2. classification  (收支, 收入, 支出, classify, income, expense)
//! 3. balance         (余额, 结余, 调整, balance, adjust)
//! 4. date            (日期, 年份, 起止, date)
//! 5. field copy      (映射, 复制, copy, map, ->)

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::Map;

use crate::models::ValueType;
use crate::rules::model::{Condition, Rule, RuleKind, RuleOrigin};
use crate::schema::SchemaRegistry;

const PAGE_BREAK_KEYWORDS: &[&str] = &["分页", "每页", "page break", "pagebreak"];
const CLASSIFY_KEYWORDS: &[&str] = &["收支", "收入", "支出", "classify", "income", "expense"];
const BALANCE_KEYWORDS: &[&str] = &["余额", "结余", "调整", "balance", "adjust"];
const DATE_KEYWORDS: &[&str] = &["日期", "年份", "起止", "date"];
const COPY_KEYWORDS: &[&str] = &["映射", "复制", "对应", "copy", "map", "->", "→"];

/// Range row used when the text names none (the line under the title).
const DEFAULT_RANGE_ROW: usize = 1;

static QUOTED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""([^"]*)"|“([^”]*)”|「([^」]*)」|『([^』]*)』|【([^】]*)】|‘([^’]*)’"#).unwrap()
});

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)").unwrap());

static ROW_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(?:row\s*(\d+)|第\s*(\d+)\s*行)").unwrap());

static DELTA_BY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bby\s*([+-]?)\s*(\d+(?:\.\d+)?)").unwrap());

// A bare sign only counts when no digit precedes it, so dates like
// `2022-01` are not read as deltas.
static DELTA_UP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:增加|加上|上调|加|(?:^|[^\d.])\+)\s*(\d+(?:\.\d+)?)").unwrap());

static DELTA_DOWN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:减少|减去|下调|扣除|减|(?:^|[^\d.])-)\s*(\d+(?:\.\d+)?)").unwrap());

static CONDITION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\s*when\s+"([^"]+)"\s+(?:(is not empty)|equals\s+"([^"]*)"|(is positive)|(is negative))"#)
        .unwrap()
});

static CONDITION_ZH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"当?「([^」]+)」(?:(非空|不为空)|为正|为负)").unwrap());

static COPY_ARROW_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\S+)\s*(?:->|→)\s*(\S+)").unwrap());

static COPY_ZH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"将?\s*(\S+?)(?:字段|列)?\s*(?:映射|复制|对应)到\s*(\S+?)(?:字段|列)?$").unwrap());

/// Deterministic rule parser over keyword families.
#[derive(Debug, Clone)]
pub struct HeuristicParser {
    schema: Arc<SchemaRegistry>,
}

impl HeuristicParser {
    pub fn new(schema: Arc<SchemaRegistry>) -> Self {
        Self { schema }
    }

    /// Parse `text` into a rule of `bank_scope`. Never fails.
    pub fn parse(&self, text: &str, bank_scope: &str) -> Rule {
        let kind = self.parse_kind(text).unwrap_or_else(|| custom(text));
        Rule::new(bank_scope, kind, RuleOrigin::NlHeuristic)
    }

    fn parse_kind(&self, text: &str) -> Option<RuleKind> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let bare = blank_quotes(text).to_lowercase();
        let has = |keywords: &[&str]| keywords.iter().any(|k| bare.contains(k));

        if has(PAGE_BREAK_KEYWORDS) {
            self.page_break(&bare)
        } else if has(CLASSIFY_KEYWORDS) {
            self.classify(text, &bare)
        } else if has(BALANCE_KEYWORDS) {
            self.balance(text)
        } else if has(DATE_KEYWORDS) {
            self.date_merge(text, &bare)
        } else if has(COPY_KEYWORDS) {
            self.field_copy(text)
        } else {
            None
        }
    }

    fn page_break(&self, bare: &str) -> Option<RuleKind> {
        let n: usize = NUMBER_RE.captures(bare)?[1].parse().ok()?;
        (n > 0).then_some(RuleKind::PageBreak { every_n_rows: n })
    }

    fn classify(&self, text: &str, bare: &str) -> Option<RuleKind> {
        let names = quoted(text);
        if let [amount, target, positive, negative, ..] = names.as_slice() {
            return Some(RuleKind::IncomeExpenseClassify {
                amount_field: amount.clone(),
                target_field: target.clone(),
                positive_label: positive.clone(),
                negative_label: negative.clone(),
            });
        }

        let amount_field = match names.first() {
            Some(name) => name.clone(),
            None => self.schema.first_of_type(ValueType::Decimal, &["amount", "金额"])?.name.clone(),
        };
        let target_field = match names.get(1) {
            Some(name) => name.clone(),
            None => self.schema.find_by_hint(&["type", "类型", "收支"])?.name.clone(),
        };
        let (positive_label, negative_label) = if bare.contains("income") && !bare.contains("收入") {
            ("income", "expense")
        } else {
            ("收入", "支出")
        };
        Some(RuleKind::IncomeExpenseClassify {
            amount_field,
            target_field,
            positive_label: positive_label.to_string(),
            negative_label: negative_label.to_string(),
        })
    }

    fn balance(&self, text: &str) -> Option<RuleKind> {
        let (text, apply_condition) = extract_condition(text);
        let bare = blank_quotes(&text);

        let delta = if let Some(caps) = DELTA_BY_RE.captures(&bare) {
            let value: Decimal = caps[2].parse().ok()?;
            if &caps[1] == "-" {
                -value
            } else {
                value
            }
        } else if let Some(caps) = DELTA_DOWN_RE.captures(&bare) {
            -caps[1].parse::<Decimal>().ok()?
        } else if let Some(caps) = DELTA_UP_RE.captures(&bare) {
            caps[1].parse::<Decimal>().ok()?
        } else {
            return None;
        };

        let target_field = match quoted(&text).into_iter().next() {
            Some(name) => name,
            None => self
                .schema
                .first_of_type(ValueType::Decimal, &["balance", "余额"])?
                .name
                .clone(),
        };
        Some(RuleKind::BalanceAdjust { target_field, delta, apply_condition })
    }

    fn date_merge(&self, text: &str, bare: &str) -> Option<RuleKind> {
        let mut names = quoted(text);
        let default_date = || {
            self.schema
                .first_of_type(ValueType::Date, &["date", "日期"])
                .map(|f| f.name.clone())
        };
        let target_field = match names.len() {
            0 => default_date()?,
            1 => names[0].clone(),
            _ => names.pop()?,
        };
        if names.is_empty() {
            names.push(target_field.clone());
        }

        let range_source_row = ROW_RE
            .captures(bare)
            .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
            .and_then(|m| m.as_str().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .map(|n| n - 1)
            .unwrap_or(DEFAULT_RANGE_ROW);

        Some(RuleKind::DateRangeMerge {
            date_part_fields: names,
            range_source_row,
            target_field,
        })
    }

    fn field_copy(&self, text: &str) -> Option<RuleKind> {
        let names = quoted(text);
        let (source, target) = match names.as_slice() {
            [source, target, ..] => (source.clone(), target.clone()),
            _ => {
                let caps = COPY_ARROW_RE.captures(text).or_else(|| COPY_ZH_RE.captures(text))?;
                (caps[1].to_string(), caps[2].to_string())
            }
        };
        if source.is_empty() || target.is_empty() {
            return None;
        }
        Some(RuleKind::FieldCopy { source_field: source, target_field: target })
    }
}

fn custom(text: &str) -> RuleKind {
    RuleKind::Custom {
        raw_description: text.to_string(),
        structured_params: Map::new(),
    }
}

/// Quoted names in order of appearance.
fn quoted(text: &str) -> Vec<String> {
    QUOTED_RE
        .captures_iter(text)
        .filter_map(|caps| caps.iter().skip(1).flatten().next().map(|m| m.as_str().to_string()))
        .collect()
}

fn blank_quotes(text: &str) -> String {
    QUOTED_RE.replace_all(text, " ").to_string()
}

/// Split a trailing row condition off `text`.
fn extract_condition(text: &str) -> (String, Condition) {
    if let Some(caps) = CONDITION_RE.captures(text) {
        let field = caps[1].to_string();
        let condition = if caps.get(2).is_some() {
            Condition::FieldNonEmpty { field }
        } else if let Some(value) = caps.get(3) {
            Condition::FieldEquals { field, value: value.as_str().to_string() }
        } else if caps.get(4).is_some() {
            Condition::AmountPositive { field }
        } else {
            Condition::AmountNegative { field }
        };
        return (CONDITION_RE.replace(text, "").to_string(), condition);
    }

    if let Some(caps) = CONDITION_ZH_RE.captures(text) {
        let field = caps[1].to_string();
        let whole = caps[0].to_string();
        let condition = if caps.get(2).is_some() {
            Condition::FieldNonEmpty { field }
        } else if whole.ends_with("为正") {
            Condition::AmountPositive { field }
        } else {
            Condition::AmountNegative { field }
        };
        return (CONDITION_ZH_RE.replace(text, "").to_string(), condition);
    }

    (text.to_string(), Condition::Always)
}
