//! Value parsing and coercion into standard field types.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;

use crate::models::{Cell, FieldValue, ValueType};

static AMOUNT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+(\.\d+)?$").unwrap());

static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})\s*[-/.年]\s*(\d{1,2})\s*[-/.月]\s*(\d{1,2})\s*日?(?:$|[\sT])").unwrap()
});

static COMPACT_DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})(\d{2})(\d{2})$").unwrap());

/// Currency markers stripped before parsing an amount.
const CURRENCY_MARKERS: &[&str] = &["¥", "￥", "$", "€", "£", "RMB", "CNY", "元"];

/// Parse a bank amount: thousands separators, currency markers, a leading
/// `+`, and accounting parentheses for negatives are accepted.
pub fn parse_amount(s: &str) -> Option<Decimal> {
    let mut text = s.trim().to_string();
    if text.is_empty() {
        return None;
    }

    let mut negative = false;
    if text.starts_with('(') && text.ends_with(')') {
        negative = true;
        text = text[1..text.len() - 1].to_string();
    }
    for marker in CURRENCY_MARKERS {
        text = text.replace(marker, "");
    }
    let mut text: String = text.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    if let Some(rest) = text.strip_prefix('+') {
        text = rest.to_string();
    }

    if !AMOUNT_RE.is_match(&text) {
        return None;
    }
    let value: Decimal = text.parse().ok()?;
    Some(if negative { -value } else { value })
}

/// Parse a calendar date in the layouts banks export
/// (`2022-01-05`, `2022/1/5`, `2022年01月05日`, `20220105`), ignoring any time part.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let text = s.trim();
    let caps = DATE_RE
        .captures(text)
        .or_else(|| COMPACT_DATE_RE.captures(text))?;
    let year = caps[1].parse().ok()?;
    let month = caps[2].parse().ok()?;
    let day = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Decimal from a spreadsheet float without binary noise.
pub fn decimal_from_f64(n: f64) -> Option<Decimal> {
    if !n.is_finite() {
        return None;
    }
    n.to_string().parse().ok()
}

/// Convert a raw cell to a typed value. Values that do not fit the target
/// type are kept as text rather than dropped.
pub fn coerce(cell: &Cell, value_type: ValueType) -> FieldValue {
    match (cell, value_type) {
        (c, _) if c.is_empty() => FieldValue::Empty,
        (Cell::Date(dt), ValueType::Date) => FieldValue::Date(dt.date()),
        (Cell::Number(n), ValueType::Decimal) => decimal_from_f64(*n)
            .map(FieldValue::Decimal)
            .unwrap_or_else(|| FieldValue::Text(cell.to_string())),
        (Cell::Number(n), ValueType::Integer) if n.fract() == 0.0 => FieldValue::Integer(*n as i64),
        _ => coerce_text(&cell.to_string(), value_type),
    }
}

/// Convert text to a typed value, falling back to text.
pub fn coerce_text(text: &str, value_type: ValueType) -> FieldValue {
    let text = text.trim();
    if text.is_empty() {
        return FieldValue::Empty;
    }
    let typed = match value_type {
        ValueType::Text => None,
        ValueType::Date => parse_date(text).map(FieldValue::Date),
        ValueType::Decimal => parse_amount(text).map(FieldValue::Decimal),
        ValueType::Integer => parse_amount(text)
            .filter(|d| d.fract().is_zero())
            .and_then(|d| d.to_string().parse::<i64>().ok())
            .map(FieldValue::Integer),
    };
    typed.unwrap_or_else(|| FieldValue::Text(text.to_string()))
}

/// Re-type an already built value (used when copying between fields).
pub fn retype(value: &FieldValue, value_type: ValueType) -> FieldValue {
    match (value, value_type) {
        (FieldValue::Empty, _) => FieldValue::Empty,
        (FieldValue::Date(_), ValueType::Date)
        | (FieldValue::Decimal(_), ValueType::Decimal)
        | (FieldValue::Integer(_), ValueType::Integer)
        | (FieldValue::Text(_), ValueType::Text) => value.clone(),
        (FieldValue::Integer(i), ValueType::Decimal) => FieldValue::Decimal(Decimal::from(*i)),
        _ => coerce_text(&value.to_string(), value_type),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount_formats() {
        assert_eq!(parse_amount("1,234.50"), Some(Decimal::new(123450, 2)));
        assert_eq!(parse_amount("¥ 100"), Some(Decimal::from(100)));
        assert_eq!(parse_amount("(50.25)"), Some(Decimal::new(-5025, 2)));
        assert_eq!(parse_amount("+8"), Some(Decimal::from(8)));
        assert_eq!(parse_amount("-0.5"), Some(Decimal::new(-5, 1)));
    }

    #[test]
    fn test_parse_amount_rejects_non_amounts() {
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("余额"), None);
        assert_eq!(parse_amount("2022-01-05"), None);
        assert_eq!(parse_amount("1.2.3"), None);
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2022, 1, 5);
        assert_eq!(parse_date("2022-01-05"), expected);
        assert_eq!(parse_date("2022/1/5"), expected);
        assert_eq!(parse_date("2022年01月05日"), expected);
        assert_eq!(parse_date("20220105"), expected);
        assert_eq!(parse_date("2022-01-05 13:45:00"), expected);
        assert_eq!(parse_date("2022-13-05"), None);
        assert_eq!(parse_date("01月05日"), None);
    }

    #[test]
    fn test_coerce_cells() {
        assert_eq!(
            coerce(&Cell::Number(12.5), ValueType::Decimal),
            FieldValue::Decimal(Decimal::new(125, 1))
        );
        assert_eq!(coerce(&Cell::Number(7.0), ValueType::Integer), FieldValue::Integer(7));
        assert_eq!(
            coerce(&Cell::text("2022/03/01"), ValueType::Date),
            FieldValue::Date(NaiveDate::from_ymd_opt(2022, 3, 1).unwrap())
        );
        assert_eq!(coerce(&Cell::Number(6222.0), ValueType::Text), FieldValue::Text("6222".into()));
        assert_eq!(coerce(&Cell::Empty, ValueType::Date), FieldValue::Empty);
    }

    #[test]
    fn test_coerce_keeps_unparseable_text() {
        assert_eq!(coerce_text("n/a", ValueType::Decimal), FieldValue::Text("n/a".into()));
        assert_eq!(coerce_text("  ", ValueType::Decimal), FieldValue::Empty);
    }

    #[test]
    fn test_retype() {
        assert_eq!(
            retype(&FieldValue::Integer(3), ValueType::Decimal),
            FieldValue::Decimal(Decimal::from(3))
        );
        assert_eq!(
            retype(&FieldValue::Decimal(Decimal::new(15, 1)), ValueType::Text),
            FieldValue::Text("1.5".into())
        );
    }
}
