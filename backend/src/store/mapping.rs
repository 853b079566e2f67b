//! Field Mapping Store - per-file source column → standard field assignments
//!
//! Persists one ordered mapping list per file key and suggests a mapping for
//! files that were never configured.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{MappingError, MappingResult, StoreResult};
use crate::models::{FieldMapping, StandardField};
use crate::schema::SchemaRegistry;
use crate::store::{load_json, resolve_file_key, save_json};

/// File name of the mapping configuration inside the data directory.
pub const MAPPING_FILE: &str = "field_mapping_config.json";

/// Token overlap below this is not considered a match.
const MIN_TOKEN_OVERLAP: f64 = 0.25;

/// One persisted mapping entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MappingRecord {
    pub standard_field: String,
    pub imported_column: Option<String>,
    pub is_mapped: bool,
}

impl MappingRecord {
    fn into_mapping(self, file_key: &str) -> FieldMapping {
        FieldMapping {
            source_file_key: file_key.to_string(),
            standard_field: self.standard_field,
            source_column: self.imported_column,
            is_mapped: self.is_mapped,
        }
    }
}

impl From<&FieldMapping> for MappingRecord {
    fn from(m: &FieldMapping) -> Self {
        Self {
            standard_field: m.standard_field.clone(),
            imported_column: m.source_column.clone(),
            is_mapped: m.is_mapped,
        }
    }
}

/// Store of per-file field mappings, persisted as one JSON object.
pub struct FieldMappingStore {
    path: PathBuf,
    schema: Arc<SchemaRegistry>,
    entries: BTreeMap<String, Vec<MappingRecord>>,
}

impl FieldMappingStore {
    /// Open the store at `path`, loading existing mappings.
    pub fn open(path: impl AsRef<Path>, schema: Arc<SchemaRegistry>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = load_json(&path)?;
        Ok(Self { path, schema, entries })
    }

    /// Stored file keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Stored key that `file_key` resolves to, if any.
    pub fn resolve_key(&self, file_key: &str) -> Option<&str> {
        resolve_file_key(self.entries.keys().map(String::as_str), file_key)
    }

    /// Whether a persisted mapping applies to `file_key`.
    pub fn has_mapping(&self, file_key: &str) -> bool {
        self.resolve_key(file_key).is_some()
    }

    /// Persisted mapping for `file_key`, or a suggestion over `columns`.
    pub fn get_mapping(&self, file_key: &str, columns: &[String]) -> Vec<FieldMapping> {
        match self.resolve_key(file_key) {
            Some(key) => self.entries[key]
                .iter()
                .cloned()
                .map(|r| r.into_mapping(key))
                .collect(),
            None => self.suggest(file_key, columns),
        }
    }

    /// Validate and persist a mapping for `file_key`.
    ///
    /// Every referenced field must be a standard field (once), and every
    /// non-null column must be one of `columns`. Nothing is stored on error.
    pub fn set_mapping(
        &mut self,
        file_key: &str,
        columns: &[String],
        mappings: &[FieldMapping],
    ) -> MappingResult<()> {
        let mut seen = BTreeSet::new();
        for mapping in mappings {
            if !self.schema.contains(&mapping.standard_field) {
                return Err(MappingError::UnknownField(mapping.standard_field.clone()));
            }
            if !seen.insert(mapping.standard_field.as_str()) {
                return Err(MappingError::DuplicateField(mapping.standard_field.clone()));
            }
            if let Some(column) = &mapping.source_column {
                if !columns.contains(column) {
                    return Err(MappingError::InvalidColumn {
                        file_key: file_key.to_string(),
                        column: column.clone(),
                    });
                }
            }
        }

        let records = mappings.iter().map(MappingRecord::from).collect();
        let previous = self.entries.insert(file_key.to_string(), records);
        if let Err(e) = save_json(&self.path, &self.entries) {
            match previous {
                Some(old) => self.entries.insert(file_key.to_string(), old),
                None => self.entries.remove(file_key),
            };
            return Err(e.into());
        }
        Ok(())
    }

    /// Delete the mapping stored under exactly `file_key`.
    pub fn remove_mapping(&mut self, file_key: &str) -> MappingResult<bool> {
        let Some(old) = self.entries.remove(file_key) else {
            return Ok(false);
        };
        if let Err(e) = save_json(&self.path, &self.entries) {
            self.entries.insert(file_key.to_string(), old);
            return Err(e.into());
        }
        Ok(true)
    }

    /// Suggest one entry per standard field from `columns`.
    ///
    /// Candidate pairs are ranked by match tier (case-insensitive exact, then
    /// substring, then token overlap), then by score, then by field
    /// declaration order; each field and column is used at most once.
    pub fn suggest(&self, file_key: &str, columns: &[String]) -> Vec<FieldMapping> {
        let fields = self.schema.fields();

        let mut candidates: Vec<(u8, f64, usize, usize)> = Vec::new();
        for (fi, field) in fields.iter().enumerate() {
            for (ci, column) in columns.iter().enumerate() {
                if let Some((tier, score)) = match_column(field, column) {
                    candidates.push((tier, score, fi, ci));
                }
            }
        }
        candidates.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then(b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal))
                .then(a.2.cmp(&b.2))
                .then(a.3.cmp(&b.3))
        });

        let mut assigned: Vec<Option<usize>> = vec![None; fields.len()];
        let mut used_columns = BTreeSet::new();
        for (_, _, fi, ci) in candidates {
            if assigned[fi].is_none() && !used_columns.contains(&ci) {
                assigned[fi] = Some(ci);
                used_columns.insert(ci);
            }
        }

        fields
            .iter()
            .zip(assigned)
            .map(|(field, column)| match column {
                Some(ci) => FieldMapping::mapped(file_key, &field.name, &columns[ci]),
                None => FieldMapping::unmapped(file_key, &field.name),
            })
            .collect()
    }
}

/// Match tier (0 exact, 1 substring, 2 token overlap) and score of a column
/// against any label of `field`.
fn match_column(field: &StandardField, column: &str) -> Option<(u8, f64)> {
    let column = column.trim().to_lowercase();
    if column.is_empty() {
        return None;
    }
    let labels: Vec<String> = field.labels().map(|l| l.trim().to_lowercase()).collect();

    if labels.iter().any(|l| *l == column) {
        return Some((0, 1.0));
    }

    let column_len = column.chars().count() as f64;
    let substring = labels
        .iter()
        .filter_map(|label| {
            let label_len = label.chars().count() as f64;
            if column.contains(label.as_str()) {
                // banks put the head noun last: "账户余额" is a balance
                let suffix_bonus = if column.ends_with(label.as_str()) { 0.5 } else { 0.0 };
                Some(label_len / column_len + suffix_bonus)
            } else if label.contains(column.as_str()) {
                Some(column_len / label_len)
            } else {
                None
            }
        })
        .fold(None, |best: Option<f64>, s| Some(best.map_or(s, |b| b.max(s))));
    if let Some(score) = substring {
        return Some((1, score));
    }

    let column_tokens = tokens(&column);
    let overlap = labels
        .iter()
        .map(|label| jaccard(&column_tokens, &tokens(label)))
        .fold(0.0, f64::max);
    (overlap >= MIN_TOKEN_OVERLAP).then_some((2, overlap))
}

/// Normalized tokens: ASCII alphanumeric runs, and each other alphanumeric
/// character (CJK) on its own.
fn tokens(text: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let mut run = String::new();
    for c in text.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            run.push(c);
            continue;
        }
        if !run.is_empty() {
            out.insert(std::mem::take(&mut run));
        }
        if c.is_alphanumeric() {
            out.insert(c.to_string());
        }
    }
    if !run.is_empty() {
        out.insert(run);
    }
    out
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ValueType;
    use tempfile::tempdir;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn open_store(dir: &Path) -> FieldMappingStore {
        FieldMappingStore::open(dir.join(MAPPING_FILE), Arc::new(SchemaRegistry::default())).unwrap()
    }

    fn column_for<'a>(mappings: &'a [FieldMapping], field: &str) -> Option<&'a str> {
        mappings
            .iter()
            .find(|m| m.standard_field == field)
            .and_then(|m| m.source_column.as_deref())
    }

    #[test]
    fn test_suggest_chinese_statement() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        let cols = columns(&["交易时间", "摘要", "交易金额", "账户余额", "账号", "户名"]);

        let mapping = store.get_mapping("/data/icbc.xlsx", &cols);
        assert_eq!(mapping.len(), 10);
        assert_eq!(column_for(&mapping, "transaction_date"), Some("交易时间"));
        assert_eq!(column_for(&mapping, "description"), Some("摘要"));
        assert_eq!(column_for(&mapping, "transaction_amount"), Some("交易金额"));
        assert_eq!(column_for(&mapping, "balance"), Some("账户余额"));
        assert_eq!(column_for(&mapping, "account_number"), Some("账号"));
        assert_eq!(column_for(&mapping, "account_name"), Some("户名"));
        assert_eq!(column_for(&mapping, "currency"), None);
        assert!(mapping.iter().all(|m| m.source_file_key == "/data/icbc.xlsx"));
    }

    #[test]
    fn test_suggest_case_insensitive_exact() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        let mapping = store.suggest("k", &columns(&["BALANCE", "Currency"]));
        assert_eq!(column_for(&mapping, "balance"), Some("BALANCE"));
        assert_eq!(column_for(&mapping, "currency"), Some("Currency"));
    }

    #[test]
    fn test_suggest_tie_goes_to_earliest_field() {
        let schema = SchemaRegistry::new(vec![
            StandardField::new("first", "value", ValueType::Text),
            StandardField::new("second", "value", ValueType::Text),
        ])
        .unwrap();
        let dir = tempdir().unwrap();
        let store = FieldMappingStore::open(dir.path().join(MAPPING_FILE), Arc::new(schema)).unwrap();
        let mapping = store.suggest("k", &columns(&["Value"]));
        assert_eq!(column_for(&mapping, "first"), Some("Value"));
        assert_eq!(column_for(&mapping, "second"), None);
    }

    #[test]
    fn test_set_then_get_is_identity() {
        let dir = tempdir().unwrap();
        let mut store = open_store(dir.path());
        let cols = columns(&["日期", "余额"]);
        let key = "/data/a.xlsx";
        let set = vec![
            FieldMapping::mapped(key, "balance", "余额"),
            FieldMapping::mapped(key, "transaction_date", "日期"),
            FieldMapping::unmapped(key, "currency"),
        ];

        store.set_mapping(key, &cols, &set).unwrap();
        assert_eq!(store.get_mapping(key, &cols), set);

        let first = std::fs::read_to_string(dir.path().join(MAPPING_FILE)).unwrap();
        store.set_mapping(key, &cols, &set).unwrap();
        let second = std::fs::read_to_string(dir.path().join(MAPPING_FILE)).unwrap();
        assert_eq!(first, second);

        let reopened = open_store(dir.path());
        assert_eq!(reopened.get_mapping(key, &cols), set);
    }

    #[test]
    fn test_set_rejects_unknown_field() {
        let dir = tempdir().unwrap();
        let mut store = open_store(dir.path());
        let bad = vec![FieldMapping::mapped("k", "iswc", "日期")];
        let err = store.set_mapping("k", &columns(&["日期"]), &bad).unwrap_err();
        assert!(matches!(err, MappingError::UnknownField(f) if f == "iswc"));
        assert!(!store.has_mapping("k"));
        assert!(!dir.path().join(MAPPING_FILE).exists());
    }

    #[test]
    fn test_set_rejects_invalid_column() {
        let dir = tempdir().unwrap();
        let mut store = open_store(dir.path());
        let good = vec![FieldMapping::mapped("k", "balance", "余额")];
        store.set_mapping("k", &columns(&["余额"]), &good).unwrap();

        let bad = vec![FieldMapping::mapped("k", "balance", "结余")];
        let err = store.set_mapping("k", &columns(&["余额"]), &bad).unwrap_err();
        assert!(matches!(err, MappingError::InvalidColumn { column, .. } if column == "结余"));
        // previous state untouched
        assert_eq!(store.get_mapping("k", &[]), good);
    }

    #[test]
    fn test_set_rejects_duplicate_field() {
        let dir = tempdir().unwrap();
        let mut store = open_store(dir.path());
        let dup = vec![
            FieldMapping::mapped("k", "balance", "a"),
            FieldMapping::mapped("k", "balance", "b"),
        ];
        let err = store.set_mapping("k", &columns(&["a", "b"]), &dup).unwrap_err();
        assert!(matches!(err, MappingError::DuplicateField(_)));
    }

    #[test]
    fn test_windows_key_found_from_unix_path() {
        let dir = tempdir().unwrap();
        let mut store = open_store(dir.path());
        let stored = r"C:\data\a.xlsx";
        let set = vec![FieldMapping::mapped(stored, "balance", "余额")];
        store.set_mapping(stored, &columns(&["余额"]), &set).unwrap();

        assert_eq!(store.resolve_key("/data/a.xlsx"), Some(stored));
        let got = store.get_mapping("/data/a.xlsx", &columns(&["余额"]));
        assert_eq!(got, set);
    }

    #[test]
    fn test_remove_mapping() {
        let dir = tempdir().unwrap();
        let mut store = open_store(dir.path());
        let set = vec![FieldMapping::mapped("k", "balance", "余额")];
        store.set_mapping("k", &columns(&["余额"]), &set).unwrap();
        assert!(store.remove_mapping("k").unwrap());
        assert!(!store.remove_mapping("k").unwrap());
        assert!(open_store(dir.path()).keys().is_empty());
    }

    #[test]
    fn test_persisted_format() {
        let dir = tempdir().unwrap();
        let mut store = open_store(dir.path());
        let set = vec![FieldMapping::mapped("k", "balance", "余额")];
        store.set_mapping("k", &columns(&["余额"]), &set).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(MAPPING_FILE)).unwrap()).unwrap();
        assert_eq!(raw["k"][0]["standard_field"], "balance");
        assert_eq!(raw["k"][0]["imported_column"], "余额");
        assert_eq!(raw["k"][0]["is_mapped"], true);
    }

    #[test]
    fn test_tokens() {
        let t = tokens("Txn_Date 交易");
        assert!(t.contains("txn"));
        assert!(t.contains("date"));
        assert!(t.contains("交"));
        assert_eq!(t.len(), 4);
    }
}
