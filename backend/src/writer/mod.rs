//! Output writing for the merged table.
//!
//! The core only depends on [`TableWriter`]. [`XlsxTableWriter`] is the
//! default and keeps dates and amounts typed; [`CsvTableWriter`] produces a
//! UTF-8 CSV (with BOM so spreadsheet software picks the encoding). Both
//! write under a timestamped name, so earlier runs are never overwritten.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{Datelike, Local};
use rust_decimal::prelude::ToPrimitive;
use rust_xlsxwriter::{ExcelDateTime, Format, Workbook, Worksheet};

use crate::error::WriteError;
use crate::models::{FieldValue, OutputTable};

/// Prefix of output file names.
pub const OUTPUT_PREFIX: &str = "merged_data";

/// Name of the single worksheet in xlsx output.
pub const SHEET_NAME: &str = "merged";

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Most manual page breaks a worksheet accepts.
const MAX_PAGE_BREAKS: usize = 1023;

/// Capability to persist the output table into a directory.
pub trait TableWriter {
    /// Write `table` into `dir`, returning the created file.
    fn write(&self, table: &OutputTable, dir: &Path) -> Result<PathBuf, WriteError>;
}

/// Output file format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Xlsx,
    Csv,
}

impl OutputFormat {
    pub fn writer(self) -> Box<dyn TableWriter + Send + Sync> {
        match self {
            OutputFormat::Xlsx => Box::new(XlsxTableWriter),
            OutputFormat::Csv => Box::new(CsvTableWriter),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xlsx" | "excel" => Ok(OutputFormat::Xlsx),
            "csv" => Ok(OutputFormat::Csv),
            other => Err(format!("unknown output format '{}'", other)),
        }
    }
}

/// Timestamped path in `dir` with `extension` that does not exist yet.
pub fn output_path(dir: &Path, extension: &str) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let base = format!("{}_{}", OUTPUT_PREFIX, stamp);
    let mut path = dir.join(format!("{}.{}", base, extension));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{}_{}.{}", base, n, extension));
        n += 1;
    }
    path
}

/// Writes the table as CSV; a blank record marks each page break.
#[derive(Debug, Clone, Default)]
pub struct CsvTableWriter;

impl TableWriter for CsvTableWriter {
    fn write(&self, table: &OutputTable, dir: &Path) -> Result<PathBuf, WriteError> {
        std::fs::create_dir_all(dir)?;
        let path = output_path(dir, "csv");

        let mut file = File::create(&path)?;
        file.write_all(UTF8_BOM)?;

        let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(file);
        writer.write_record(&table.columns)?;

        let blank = vec![""; table.columns.len()];
        for (i, row) in table.rows.iter().enumerate() {
            writer.write_record(row.iter().map(|v| v.to_string()))?;
            if breaks_after(table, i) {
                writer.write_record(&blank)?;
            }
        }
        writer.flush()?;
        Ok(path)
    }
}

/// Writes the table as a single-sheet workbook.
///
/// A page break leaves one blank row and starts a new printed page below it.
#[derive(Debug, Clone, Default)]
pub struct XlsxTableWriter;

impl TableWriter for XlsxTableWriter {
    fn write(&self, table: &OutputTable, dir: &Path) -> Result<PathBuf, WriteError> {
        std::fs::create_dir_all(dir)?;
        let path = output_path(dir, "xlsx");

        let header = Format::new().set_bold();
        let date = Format::new().set_num_format("yyyy-mm-dd");
        let amount = Format::new().set_num_format("0.00");

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name(SHEET_NAME)?;
        for (col, name) in table.columns.iter().enumerate() {
            sheet.write_string_with_format(0, col as u16, name, &header)?;
        }
        sheet.set_freeze_panes(1, 0)?;

        let mut line: u32 = 1;
        let mut page_breaks = Vec::new();
        for (i, row) in table.rows.iter().enumerate() {
            for (col, value) in row.iter().enumerate() {
                write_value(sheet, line, col as u16, value, &date, &amount)?;
            }
            line += 1;
            if breaks_after(table, i) {
                line += 1;
                page_breaks.push(line);
            }
        }
        page_breaks.truncate(MAX_PAGE_BREAKS);
        if !page_breaks.is_empty() {
            sheet.set_page_breaks(&page_breaks)?;
        }

        workbook.save(&path)?;
        Ok(path)
    }
}

fn write_value(
    sheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: &FieldValue,
    date: &Format,
    amount: &Format,
) -> Result<(), WriteError> {
    match value {
        FieldValue::Empty => {}
        FieldValue::Text(s) => {
            sheet.write_string(row, col, s)?;
        }
        FieldValue::Integer(i) => {
            sheet.write_number(row, col, *i as f64)?;
        }
        FieldValue::Decimal(d) => match d.to_f64() {
            Some(f) => {
                sheet.write_number_with_format(row, col, f, amount)?;
            }
            None => {
                sheet.write_string(row, col, d.to_string())?;
            }
        },
        FieldValue::Date(d) => {
            let excel = ExcelDateTime::from_ymd(d.year() as u16, d.month() as u8, d.day() as u8)?;
            sheet.write_datetime_with_format(row, col, &excel, date)?;
        }
    }
    Ok(())
}

/// Whether a separator follows row `i`; never after the last row.
fn breaks_after(table: &OutputTable, i: usize) -> bool {
    i + 1 < table.rows.len() && table.page_breaks.binary_search(&i).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MergeRow;
    use crate::schema::SchemaRegistry;
    use calamine::{open_workbook, Data, DataType, Range, Reader, Xlsx};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use tempfile::tempdir;

    fn table(rows: usize, break_every: usize) -> OutputTable {
        let schema = SchemaRegistry::default();
        let mut table = OutputTable::new(&schema);
        for i in 0..rows {
            let mut row = MergeRow::new(i);
            row.set("description", FieldValue::Text(format!("第{}笔", i + 1)));
            row.set("balance", FieldValue::Decimal(Decimal::new(1050, 2)));
            row.set("transaction_date", FieldValue::Date(NaiveDate::from_ymd_opt(2022, 1, 5).unwrap()));
            row.page_break_after = (i + 1) % break_every == 0;
            table.push(&row, &schema);
        }
        table
    }

    fn read_back(path: &Path) -> Range<Data> {
        let mut workbook: Xlsx<_> = open_workbook(path).unwrap();
        workbook.worksheet_range(SHEET_NAME).unwrap()
    }

    fn column(table: &OutputTable, name: &str) -> usize {
        table.columns.iter().position(|c| c == name).unwrap()
    }

    #[test]
    fn test_write_csv_with_bom_and_header() {
        let dir = tempdir().unwrap();
        let path = CsvTableWriter.write(&table(2, 100), dir.path()).unwrap();

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("merged_data_"));
        assert!(name.ends_with(".csv"));

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));
        let text = String::from_utf8(bytes[3..].to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("account_number,account_name,transaction_date"));
        assert!(lines[1].contains("第1笔"));
        assert!(lines[1].contains("10.50"));
    }

    #[test]
    fn test_page_breaks_become_blank_records() {
        let dir = tempdir().unwrap();
        let path = CsvTableWriter.write(&table(5, 2), dir.path()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        // header + 5 rows + breaks after rows 2 and 4
        assert_eq!(lines.len(), 8);
        assert!(lines[3].chars().all(|c| c == ','));
        assert!(lines[6].chars().all(|c| c == ','));
    }

    #[test]
    fn test_does_not_overwrite() {
        let dir = tempdir().unwrap();
        let first = CsvTableWriter.write(&table(1, 10), dir.path()).unwrap();
        let second = CsvTableWriter.write(&table(1, 10), dir.path()).unwrap();
        assert_ne!(first, second);
        assert!(first.exists() && second.exists());
    }

    #[test]
    fn test_write_xlsx_typed_cells() {
        let dir = tempdir().unwrap();
        let table = table(2, 100);
        let path = XlsxTableWriter.write(&table, dir.path()).unwrap();

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("merged_data_"));
        assert!(name.ends_with(".xlsx"));

        let range = read_back(&path);
        assert_eq!(range.get_size(), (3, table.columns.len()));
        assert_eq!(range.get_value((0, 0)), Some(&Data::String("account_number".into())));

        let description = column(&table, "description") as u32;
        let balance = column(&table, "balance") as u32;
        let date = column(&table, "transaction_date") as u32;
        assert_eq!(range.get_value((2, description)), Some(&Data::String("第2笔".into())));
        assert_eq!(range.get_value((1, balance)), Some(&Data::Float(10.5)));
        assert_eq!(
            range.get_value((1, date)).and_then(|d| d.as_date()),
            NaiveDate::from_ymd_opt(2022, 1, 5)
        );
    }

    #[test]
    fn test_xlsx_page_breaks_become_blank_rows() {
        let dir = tempdir().unwrap();
        let table = table(5, 2);
        let path = XlsxTableWriter.write(&table, dir.path()).unwrap();

        let range = read_back(&path);
        // header + 5 rows + breaks after rows 2 and 4
        assert_eq!(range.height(), 8);
        let blank = |r: u32| (0..table.columns.len() as u32).all(|c| matches!(range.get_value((r, c)), None | Some(Data::Empty)));
        assert!(blank(3));
        assert!(blank(6));
        let description = column(&table, "description") as u32;
        assert_eq!(range.get_value((4, description)), Some(&Data::String("第3笔".into())));
        assert_eq!(range.get_value((7, description)), Some(&Data::String("第5笔".into())));
    }

    #[test]
    fn test_output_format() {
        assert_eq!(OutputFormat::default(), OutputFormat::Xlsx);
        assert_eq!(" CSV ".parse::<OutputFormat>(), Ok(OutputFormat::Csv));
        assert_eq!("excel".parse::<OutputFormat>(), Ok(OutputFormat::Xlsx));
        assert!("pdf".parse::<OutputFormat>().is_err());

        let dir = tempdir().unwrap();
        let path = OutputFormat::Csv.writer().write(&table(1, 10), dir.path()).unwrap();
        assert_eq!(path.extension().unwrap(), "csv");
    }
}
