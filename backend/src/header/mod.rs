//! Header row detection for raw statement sheets.
//!
//! Bank exports rarely start with their column labels: titles, account
//! summaries and date-range lines come first, and some banks split the header
//! over two rows. The detector scans a bounded window of leading rows and
//! scores each by how much of it is label text.
//!
//! ```text
//! row 0  │ 中国银行交易流水                          │  title (1 label)
//! row 1  │ 起止日期: 2022年01月01日-2022年12月31日   │  title
//! row 2  │ 交易信息 │        │ 金额    │           │  group header
//! row 3  │ 日期     │ 摘要   │ 发生额  │ 余额      │  ← header (last candidate)
//! row 4  │ 01月05日 │ 工资   │ 8000.00 │ 8000.00   │  first data row
//! ```

use serde::{Deserialize, Serialize};

use crate::error::HeaderError;
use crate::models::Cell;

/// Rows scanned from the top of the sheet.
pub const HEADER_SCAN_ROWS: usize = 10;

/// Keywords identifying the balance column (case-insensitive substring).
pub const BALANCE_KEYWORDS: &[&str] = &[
    "余额", "结余", "balance", "结存", "可用余额", "账户余额", "当前余额", "余额金额", "账户结余",
    "资金余额",
];

/// Minimum share of the sheet width a header row must cover with labels.
const MIN_LABEL_RATIO: f64 = 0.5;

/// Minimum label cells in a header row.
const MIN_LABEL_CELLS: usize = 2;

/// Where the header is and what it says.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderInfo {
    pub header_row_index: usize,
    pub columns: Vec<String>,
    pub balance_column: Option<String>,
    /// First row after the header.
    pub data_start_row: usize,
    /// Label ratio of the chosen row.
    pub score: f64,
}

impl HeaderInfo {
    /// Index of `column` in the header.
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct RowProfile {
    labels: usize,
    values: usize,
    non_empty: usize,
}

impl RowProfile {
    fn of(row: &[Cell]) -> Self {
        let mut profile = RowProfile::default();
        for cell in row.iter().filter(|c| !c.is_empty()) {
            profile.non_empty += 1;
            if cell.is_numeric() || cell.is_date() {
                profile.values += 1;
            } else {
                profile.labels += 1;
            }
        }
        profile
    }

    fn ratio(&self, width: usize) -> f64 {
        self.labels as f64 / width.max(1) as f64
    }

    fn is_candidate(&self, width: usize) -> bool {
        self.labels >= MIN_LABEL_CELLS && self.labels > self.values && self.ratio(width) >= MIN_LABEL_RATIO
    }
}

/// Locates the header row and balance column of a raw sheet.
#[derive(Debug, Clone)]
pub struct HeaderDetector {
    scan_rows: usize,
    balance_keywords: Vec<String>,
}

impl Default for HeaderDetector {
    fn default() -> Self {
        Self {
            scan_rows: HEADER_SCAN_ROWS,
            balance_keywords: BALANCE_KEYWORDS.iter().map(|k| k.to_lowercase()).collect(),
        }
    }
}

impl HeaderDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scan_rows(mut self, rows: usize) -> Self {
        self.scan_rows = rows.max(1);
        self
    }

    /// Detect the header of `rows`.
    ///
    /// The data boundary is the first row below a candidate that holds any
    /// numeric or date cell; the last candidate above it wins. Without such a
    /// row in the window, the candidate with the highest label ratio wins,
    /// earliest first on ties.
    pub fn detect(&self, rows: &[Vec<Cell>]) -> Result<HeaderInfo, HeaderError> {
        let window = self.scan_rows.min(rows.len());
        let scanned = &rows[..window];
        let width = scanned.iter().map(|r| used_width(r)).max().unwrap_or(0);
        let profiles: Vec<RowProfile> = scanned.iter().map(|r| RowProfile::of(r)).collect();

        let candidates: Vec<usize> = (0..window).filter(|&i| profiles[i].is_candidate(width)).collect();
        let first = *candidates.first().ok_or(HeaderError::NotFound { scanned: window })?;
        let boundary = (first + 1..window).find(|&i| profiles[i].values > 0);

        let chosen = match boundary {
            Some(b) => candidates.iter().copied().filter(|&i| i < b).last().unwrap_or(first),
            None => candidates
                .iter()
                .copied()
                .fold(first, |best, i| if profiles[i].ratio(width) > profiles[best].ratio(width) { i } else { best }),
        };

        let columns = self.column_names(scanned, chosen, width);
        let balance_column = self.find_balance_column(&columns);

        Ok(HeaderInfo {
            header_row_index: chosen,
            columns,
            balance_column,
            data_start_row: chosen + 1,
            score: profiles[chosen].ratio(width),
        })
    }

    /// First column whose name contains a balance keyword.
    pub fn find_balance_column(&self, columns: &[String]) -> Option<String> {
        columns
            .iter()
            .find(|c| {
                let lower = c.to_lowercase();
                self.balance_keywords.iter().any(|k| lower.contains(k.as_str()))
            })
            .cloned()
    }

    fn column_names(&self, rows: &[Vec<Cell>], header: usize, width: usize) -> Vec<String> {
        // a preceding label-only row acts as the upper half of a split header
        let upper = header
            .checked_sub(1)
            .map(|i| &rows[i])
            .filter(|r| RowProfile::of(r).values == 0);

        let mut names: Vec<String> = Vec::with_capacity(width);
        for col in 0..width {
            let own = rows[header].get(col).filter(|c| !c.is_empty());
            let inherited = upper.and_then(|r| r.get(col)).filter(|c| c.is_label());
            let base = match own.or(inherited) {
                Some(cell) => cell.to_string(),
                None => format!("column_{}", col + 1),
            };

            let mut name = base.clone();
            let mut n = 2;
            while names.contains(&name) {
                name = format!("{}_{}", base, n);
                n += 1;
            }
            names.push(name);
        }
        names
    }
}

/// Row length without trailing empty cells.
fn used_width(row: &[Cell]) -> usize {
    row.iter().rposition(|c| !c.is_empty()).map(|i| i + 1).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(rows: &[&[&str]]) -> Vec<Vec<Cell>> {
        rows.iter()
            .map(|r| r.iter().map(|c| Cell::text(c)).collect())
            .collect()
    }

    #[test]
    fn test_header_in_first_row() {
        let rows = sheet(&[
            &["Date", "Description", "Amount", "Balance"],
            &["2022-01-01", "salary", "100", "100"],
        ]);
        let info = HeaderDetector::new().detect(&rows).unwrap();
        assert_eq!(info.header_row_index, 0);
        assert_eq!(info.data_start_row, 1);
        assert_eq!(info.columns, vec!["Date", "Description", "Amount", "Balance"]);
        assert_eq!(info.balance_column.as_deref(), Some("Balance"));
    }

    #[test]
    fn test_header_after_title_rows() {
        let rows = sheet(&[
            &["中国银行交易流水"],
            &["起止日期:2022年01月01日-2022年12月31日"],
            &["交易日期", "摘要", "交易金额", "账户余额"],
            &["2022-01-05", "工资", "8000.00", "8000.00"],
        ]);
        let info = HeaderDetector::new().detect(&rows).unwrap();
        assert_eq!(info.header_row_index, 2);
        assert_eq!(info.balance_column.as_deref(), Some("账户余额"));
    }

    #[test]
    fn test_multi_row_header_picks_last_candidate() {
        let rows = sheet(&[
            &["账户", "户名", "币种", "类型"],
            &["日期", "摘要", "发生额", "余额"],
            &["2022-01-05", "工资", "8000.00", "8000.00"],
            &["2022-01-06", "房租", "-2000.00", "6000.00"],
        ]);
        let info = HeaderDetector::new().detect(&rows).unwrap();
        assert_eq!(info.header_row_index, 1);
        assert_eq!(info.columns[2], "发生额");
    }

    #[test]
    fn test_split_header_inherits_upper_labels() {
        let rows = sheet(&[
            &["交易信息", "", "", "对方户名"],
            &["日期", "摘要", "金额", ""],
            &["2022-01-05", "工资", "8000.00", "公司"],
        ]);
        let info = HeaderDetector::new().detect(&rows).unwrap();
        assert_eq!(info.header_row_index, 1);
        assert_eq!(info.columns, vec!["日期", "摘要", "金额", "对方户名"]);
        assert_eq!(info.balance_column, None);
    }

    #[test]
    fn test_duplicate_and_blank_column_names() {
        let rows = sheet(&[
            &["金额", "金额", "备注", "", "余额"],
            &["1", "2", "x", "", "3"],
        ]);
        let info = HeaderDetector::new().detect(&rows).unwrap();
        assert_eq!(info.columns, vec!["金额", "金额_2", "备注", "column_4", "余额"]);
    }

    #[test]
    fn test_text_heavy_data_rows_stay_below_header() {
        let rows = sheet(&[
            &["交易日期", "摘要", "对方户名", "备注", "渠道", "金额"],
            &["2022-01-05", "工资", "某公司", "一月", "网银", "8000"],
            &["2022-01-06", "房租", "张三", "二月", "柜面", "-2000"],
            &["2022-01-07", "餐费", "李四", "三月", "手机", "-30"],
        ]);
        let info = HeaderDetector::new().detect(&rows).unwrap();
        assert_eq!(info.header_row_index, 0);
        assert_eq!(info.data_start_row, 1);
        assert_eq!(info.columns[2], "对方户名");
    }

    #[test]
    fn test_summary_row_before_header_is_not_a_boundary() {
        let rows = sheet(&[
            &["期初余额", "1000.00"],
            &["日期", "摘要", "备注", "余额"],
            &["2022-01-05", "工资", "一月", "9000.00"],
        ]);
        let info = HeaderDetector::new().detect(&rows).unwrap();
        assert_eq!(info.header_row_index, 1);
    }

    #[test]
    fn test_text_only_sheet_takes_best_ratio() {
        let rows = sheet(&[
            &["说明", "见下表", "", ""],
            &["姓名", "部门", "职位", "备注"],
            &["张三", "财务", "会计", "无"],
        ]);
        let info = HeaderDetector::new().detect(&rows).unwrap();
        assert_eq!(info.header_row_index, 1);
    }

    #[test]
    fn test_no_header_found() {
        let rows = sheet(&[&["1", "2", "3"], &["4", "5", "6"]]);
        let err = HeaderDetector::new().detect(&rows).unwrap_err();
        assert!(matches!(err, HeaderError::NotFound { scanned: 2 }));

        assert!(HeaderDetector::new().detect(&[]).is_err());
    }

    #[test]
    fn test_header_beyond_window_not_found() {
        let mut rows = vec![vec![Cell::text("标题")]; 12];
        rows.push(vec![Cell::text("日期"), Cell::text("余额")]);
        let detector = HeaderDetector::new();
        assert!(detector.detect(&rows).is_err());
        assert!(detector.with_scan_rows(20).detect(&rows).is_ok());
    }

    #[test]
    fn test_numeric_cells_typed() {
        let rows = vec![
            vec![Cell::text("Date"), Cell::text("Amount")],
            vec![Cell::Number(44562.0), Cell::Number(10.0)],
        ];
        let info = HeaderDetector::new().detect(&rows).unwrap();
        assert_eq!(info.header_row_index, 0);
    }
}
