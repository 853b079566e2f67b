//! Raw sheet reading with encoding and delimiter auto-detection.
//!
//! Produces rows of [`Cell`]s without assuming where the header is; header
//! location is the job of [`crate::header`]. Workbooks go through `calamine`,
//! delimited text through the `csv` crate.

use std::path::Path;

use calamine::{open_workbook_auto, Data, DataType, Reader};

use crate::error::{SheetError, SheetResult};
use crate::models::Cell;

/// Extensions opened as workbooks.
const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

/// Extensions opened as delimited text.
const TEXT_EXTENSIONS: &[&str] = &["csv", "tsv", "txt"];

/// Lines sampled for delimiter detection.
const DELIMITER_SAMPLE_LINES: usize = 20;

/// Raw rows of one sheet plus how they were read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSheet {
    pub rows: Vec<Vec<Cell>>,
    /// Sheet name for workbooks, encoding label for text files.
    pub source: String,
}

impl RawSheet {
    pub fn new(rows: Vec<Vec<Cell>>) -> Self {
        Self { rows, source: String::new() }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|r| r.iter().all(Cell::is_empty))
    }

    /// Widest row length.
    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }
}

/// Capability to read a spreadsheet file into raw rows.
pub trait SheetReader {
    fn read(&self, path: &Path) -> SheetResult<RawSheet>;
}

/// Reads workbooks and delimited text from disk, dispatching on extension.
#[derive(Debug, Clone, Default)]
pub struct FileSheetReader;

impl SheetReader for FileSheetReader {
    fn read(&self, path: &Path) -> SheetResult<RawSheet> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let sheet = if WORKBOOK_EXTENSIONS.contains(&ext.as_str()) {
            read_workbook(path)?
        } else if TEXT_EXTENSIONS.contains(&ext.as_str()) {
            let bytes = std::fs::read(path)?;
            parse_bytes_auto(&bytes)?
        } else {
            return Err(SheetError::UnsupportedFormat(path.display().to_string()));
        };

        if sheet.is_empty() {
            return Err(SheetError::Empty);
        }
        Ok(sheet)
    }
}

// =============================================================================
// Workbooks
// =============================================================================

/// Read the first worksheet of a workbook.
///
/// Rows and columns before the used range are padded back in so row indices
/// match what a user sees in the spreadsheet application.
pub fn read_workbook(path: &Path) -> SheetResult<RawSheet> {
    let mut workbook = open_workbook_auto(path).map_err(|e| SheetError::Workbook(e.to_string()))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| SheetError::Workbook("workbook has no worksheet".to_string()))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| SheetError::Workbook(e.to_string()))?;

    let (row_offset, col_offset) = range
        .start()
        .map(|(r, c)| (r as usize, c as usize))
        .unwrap_or((0, 0));

    let mut rows: Vec<Vec<Cell>> = vec![Vec::new(); row_offset];
    for row in range.rows() {
        let mut cells = vec![Cell::Empty; col_offset];
        cells.extend(row.iter().map(workbook_cell));
        rows.push(cells);
    }

    Ok(RawSheet { rows, source: sheet_name })
}

fn workbook_cell(data: &Data) -> Cell {
    match data {
        Data::Empty | Data::Error(_) => Cell::Empty,
        Data::String(s) => Cell::text(s),
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Bool(b) => Cell::Text(b.to_string()),
        other => match other.as_datetime() {
            Some(dt) => Cell::Date(dt),
            None => Cell::text(other.to_string()),
        },
    }
}

// =============================================================================
// Delimited Text
// =============================================================================

/// Detect the encoding of raw bytes using chardet.
pub fn detect_encoding(bytes: &[u8]) -> String {
    if std::str::from_utf8(bytes).is_ok() {
        return "utf-8".to_string();
    }
    let result = chardet::detect(bytes);
    let charset = result.0;

    // Normalize charset names
    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" => "utf-8".to_string(),
        // Chinese bank exports are GBK even when sniffed as its subset
        "gb2312" | "gbk" | "gb18030" => "gb18030".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        other => other.to_string(),
    }
}

/// Decode bytes to string using the specified encoding label.
pub fn decode_content(bytes: &[u8], encoding: &str) -> SheetResult<String> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match encoding.to_lowercase().as_str() {
        "utf-8" | "utf8" | "ascii" => Ok(String::from_utf8_lossy(bytes).to_string()),
        label => {
            let codec = encoding_rs::Encoding::for_label(label.as_bytes())
                .ok_or_else(|| SheetError::Encoding(format!("unknown encoding '{}'", label)))?;
            let (text, _, had_errors) = codec.decode(bytes);
            if had_errors {
                return Err(SheetError::Encoding(format!("invalid {} content", codec.name())));
            }
            Ok(text.to_string())
        }
    }
}

/// Detect the delimiter by the most frequent separator over the sampled lines.
///
/// Statements often open with title lines that hold no separator at all, so
/// a single first line is not enough.
pub fn detect_delimiter(content: &str) -> char {
    let separators = [',', ';', '\t', '|'];
    let mut best_sep = ',';
    let mut best_count = 0;

    for &sep in &separators {
        let count = content
            .lines()
            .take(DELIMITER_SAMPLE_LINES)
            .map(|line| line.matches(sep).count())
            .max()
            .unwrap_or(0);
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

/// Parse delimited text into raw rows. Rows may have different lengths.
pub fn parse_delimited(content: &str, delimiter: char) -> SheetResult<Vec<Vec<Cell>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter as u8)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| SheetError::Csv(format!("line {}: {}", line + 1, e)))?;
        rows.push(record.iter().map(Cell::text).collect());
    }
    Ok(rows)
}

/// Parse bytes with auto-detection of encoding and delimiter.
pub fn parse_bytes_auto(bytes: &[u8]) -> SheetResult<RawSheet> {
    let encoding = detect_encoding(bytes);
    let content = decode_content(bytes, &encoding)?;
    let delimiter = detect_delimiter(&content);
    let rows = parse_delimited(&content, delimiter)?;
    Ok(RawSheet { rows, source: encoding })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_delimiter_skips_title_line() {
        let content = "招商银行交易明细\n日期;摘要;金额;余额\n2022-01-01;工资;100;100";
        assert_eq!(detect_delimiter(content), ';');
        assert_eq!(detect_delimiter("a,b,c\n1,2,3"), ',');
        assert_eq!(detect_delimiter("a\tb\tc"), '\t');
    }

    #[test]
    fn test_detect_encoding_utf8() {
        assert_eq!(detect_encoding("余额,balance".as_bytes()), "utf-8");
    }

    #[test]
    fn test_decode_gbk() {
        let (encoded, _, _) = encoding_rs::GBK.encode("交易日期,余额");
        let text = decode_content(&encoded, "gb18030").unwrap();
        assert_eq!(text, "交易日期,余额");
    }

    #[test]
    fn test_decode_strips_bom() {
        let text = decode_content(b"\xEF\xBB\xBFa,b", "utf-8").unwrap();
        assert_eq!(text, "a,b");
    }

    #[test]
    fn test_decode_unknown_label() {
        assert!(matches!(
            decode_content(b"abc", "no-such-charset"),
            Err(SheetError::Encoding(_))
        ));
    }

    #[test]
    fn test_parse_delimited_flexible_rows() {
        let rows = parse_delimited("对账单\n日期,金额\n2022-01-01,\"1,000.00\"", ',').unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], vec![Cell::Text("对账单".into())]);
        assert_eq!(rows[2][1], Cell::Text("1,000.00".into()));
    }

    #[test]
    fn test_parse_bytes_auto() {
        let sheet = parse_bytes_auto("日期;金额\n2022-01-01; 5 ".as_bytes()).unwrap();
        assert_eq!(sheet.source, "utf-8");
        assert_eq!(sheet.rows[1][1], Cell::Text("5".into()));
        assert_eq!(sheet.width(), 2);
    }

    #[test]
    fn test_reader_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statement.pdf");
        std::fs::write(&path, "x").unwrap();
        assert!(matches!(
            FileSheetReader.read(&path),
            Err(SheetError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_reader_reads_csv_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statement.csv");
        std::fs::write(&path, "日期,金额,余额\n2022-01-01,10,10\n").unwrap();
        let sheet = FileSheetReader.read(&path).unwrap();
        assert_eq!(sheet.len(), 2);
    }

    #[test]
    fn test_reader_rejects_blank_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.csv");
        std::fs::write(&path, ",,\n").unwrap();
        assert!(matches!(FileSheetReader.read(&path), Err(SheetError::Empty)));
    }
}
