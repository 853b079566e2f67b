//! Merge pipeline: many statement files into one canonical table.
//!
//! Files are processed strictly one after another, in the order given. A
//! failure confined to one file is recorded in that file's report and the
//! merge moves on; partial success is the normal outcome.
//!
//! # Example
//!
//! ```rust,ignore
//! use ledgermerge::transform::pipeline::{MergeOptions, MergeProcessor};
//!
//! let processor = MergeProcessor::new(&schema, &reader, &mappings, &rules, MergeOptions::default());
//! let report = processor.merge(&sources);
//! for file in &report.files {
//!     println!("{}: {:?}", file.display_name, file.status);
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::api::logs::{log_error, log_info, log_info_indent, log_success, log_warning, log_warning_indent};
use crate::config::AppConfig;
use crate::error::{FileError, MappingError, MergeError, MergeResult, RegistryError, RuleError, SheetError};
use crate::header::HeaderDetector;
use crate::models::{OutputTable, SourceFile};
use crate::parser::{FileSheetReader, SheetReader};
use crate::rules::RuleStore;
use crate::schema::SchemaRegistry;
use crate::store::files::resolve_path;
use crate::store::{FieldMappingStore, FileRegistry};
use crate::transform::engine::{EngineOutput, RuleEngine, SkippedRow};
use crate::writer::TableWriter;

/// Options for a merge run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeOptions {
    /// Abort a file on its first row-level rule failure
    pub strict: bool,
}

/// Outcome of one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    Succeeded,
    Failed { kind: String, message: String },
}

/// Manifest entry for one source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReport {
    pub path: String,
    pub display_name: String,
    pub bank_scope: Option<String>,
    #[serde(flatten)]
    pub status: FileStatus,
    /// Rows appended to the output
    pub rows: usize,
    pub skipped: Vec<SkippedRow>,
    /// Rows dropped by exclusion rules
    pub filtered: usize,
    /// Whether the mapping was auto-suggested rather than configured
    pub suggested_mapping: bool,
}

impl FileReport {
    fn new(source: &SourceFile, bank_scope: Option<String>) -> Self {
        Self {
            path: source.path.clone(),
            display_name: source.display_name.clone(),
            bank_scope,
            status: FileStatus::Succeeded,
            rows: 0,
            skipped: Vec::new(),
            filtered: 0,
            suggested_mapping: false,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == FileStatus::Succeeded
    }
}

/// Result of a merge: the table plus a manifest per input file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeReport {
    pub table: OutputTable,
    pub files: Vec<FileReport>,
}

impl MergeReport {
    pub fn succeeded(&self) -> usize {
        self.files.iter().filter(|f| f.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.files.len() - self.succeeded()
    }

    pub fn skipped_rows(&self) -> usize {
        self.files.iter().map(|f| f.skipped.len()).sum()
    }
}

/// Orchestrates header detection, mapping and rules for each file.
pub struct MergeProcessor<'a, R: SheetReader> {
    schema: &'a SchemaRegistry,
    reader: &'a R,
    detector: HeaderDetector,
    mappings: &'a FieldMappingStore,
    rules: &'a RuleStore,
    options: MergeOptions,
}

impl<'a, R: SheetReader> MergeProcessor<'a, R> {
    pub fn new(
        schema: &'a SchemaRegistry,
        reader: &'a R,
        mappings: &'a FieldMappingStore,
        rules: &'a RuleStore,
        options: MergeOptions,
    ) -> Self {
        Self {
            schema,
            reader,
            detector: HeaderDetector::new(),
            mappings,
            rules,
            options,
        }
    }

    pub fn with_detector(mut self, detector: HeaderDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Merge every source.
    pub fn merge(&self, sources: &[SourceFile]) -> MergeReport {
        self.merge_with(sources, |_| true)
    }

    /// Merge sources in order, calling `on_file` after each one. Returning
    /// `false` stops before the next file.
    pub fn merge_with(&self, sources: &[SourceFile], mut on_file: impl FnMut(&FileReport) -> bool) -> MergeReport {
        let mut table = OutputTable::new(self.schema);
        let mut files = Vec::with_capacity(sources.len());

        for (i, source) in sources.iter().enumerate() {
            log_info(format!("[{}/{}] {}", i + 1, sources.len(), source.display_name));

            let scope = self.bank_scope(source);
            let mut report = FileReport::new(source, scope.clone());

            match self.process(source, scope.as_deref(), &mut report) {
                Ok(output) => {
                    for row in &output.rows {
                        table.push(row, self.schema);
                    }
                    report.rows = output.rows.len();
                    report.skipped = output.skipped;
                    report.filtered = output.filtered;
                    if report.skipped.is_empty() {
                        log_success(format!("{}: {} rows", source.display_name, report.rows));
                    } else {
                        log_warning(format!(
                            "{}: {} rows, {} skipped",
                            source.display_name,
                            report.rows,
                            report.skipped.len()
                        ));
                        for skipped in &report.skipped {
                            log_warning_indent(format!("row {}: {}", skipped.row, skipped.reason), 1);
                        }
                    }
                }
                Err(e) => {
                    log_error(format!("{}: {} ({})", source.display_name, e, e.kind()));
                    report.status = FileStatus::Failed {
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    };
                }
            }

            let proceed = on_file(&report);
            files.push(report);
            if !proceed {
                log_warning(format!("Merge stopped after {} of {} files", i + 1, sources.len()));
                break;
            }
        }

        MergeReport { table, files }
    }

    fn bank_scope(&self, source: &SourceFile) -> Option<String> {
        source
            .bank_scope
            .clone()
            .or_else(|| self.rules.resolve_scope(&source.display_name).map(String::from))
    }

    fn process(&self, source: &SourceFile, scope: Option<&str>, report: &mut FileReport) -> Result<EngineOutput, FileError> {
        let sheet = self.reader.read(Path::new(&source.path))?;
        if sheet.is_empty() {
            return Err(SheetError::Empty.into());
        }
        let header = self.detector.detect(&sheet.rows)?;
        log_info_indent(
            format!("header at row {}, {} columns", header.header_row_index + 1, header.columns.len()),
            1,
        );

        report.suggested_mapping = !self.mappings.has_mapping(&source.path);
        if report.suggested_mapping {
            log_warning(format!("{}: no saved mapping, using suggestions", source.display_name));
        }
        let mapping = self.mappings.get_mapping(&source.path, &header.columns);

        let rules = scope.map(|s| self.rules.rules_for(s)).unwrap_or(&[]);
        if let Some(scope) = scope {
            log_info_indent(format!("{} rules for {}", rules.len(), scope), 1);
        }
        let output = RuleEngine::new(self.schema)
            .strict(self.options.strict)
            .apply(rules, &sheet.rows, &header, &mapping)?;
        Ok(output)
    }
}

/// A finished merge run: the report plus the written artifact, if any.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    #[serde(flatten)]
    pub report: MergeReport,
    /// `None` when no file succeeded.
    pub output_path: Option<PathBuf>,
}

/// Merge files with the stores under `config.data_dir` and write the result
/// into `config.output_dir` as `config.output_format`.
///
/// With no `paths`, every registered file is merged in import order. Given
/// paths use their registry entry when there is one.
pub fn merge_files(
    config: &AppConfig,
    schema: Arc<SchemaRegistry>,
    paths: &[PathBuf],
    options: MergeOptions,
) -> MergeResult<MergeOutcome> {
    let registry = FileRegistry::open(config.files_path()).map_err(RegistryError::from)?;
    let sources: Vec<SourceFile> = if paths.is_empty() {
        registry.list().to_vec()
    } else {
        paths
            .iter()
            .map(|p| {
                registry
                    .get(p)
                    .cloned()
                    .unwrap_or_else(|| SourceFile::new(resolve_path(p)))
            })
            .collect()
    };
    if sources.is_empty() {
        return Err(MergeError::EmptyInput);
    }

    let mappings = FieldMappingStore::open(config.mapping_path(), schema.clone())
        .map_err(MappingError::from)?;
    let rules = RuleStore::open(config.rules_path()).map_err(RuleError::from)?;

    let reader = FileSheetReader;
    let report = MergeProcessor::new(&schema, &reader, &mappings, &rules, options).merge(&sources);

    let output_path = if report.succeeded() > 0 {
        let path = config.output_format.writer().write(&report.table, &config.output_dir)?;
        log_success(format!("Wrote {} rows to {}", report.table.len(), path.display()));
        Some(path)
    } else {
        log_error("No file could be merged, nothing written");
        None
    };

    Ok(MergeOutcome { report, output_path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldValue;
    use crate::parser::FileSheetReader;
    use crate::rules::{Rule, RuleKind, RuleOrigin, RULES_FILE};
    use crate::store::mapping::MAPPING_FILE;
    use crate::writer::OutputFormat;
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        dir: TempDir,
        schema: Arc<SchemaRegistry>,
        mappings: FieldMappingStore,
        rules: RuleStore,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let schema = Arc::new(SchemaRegistry::default());
            let mappings = FieldMappingStore::open(dir.path().join(MAPPING_FILE), schema.clone()).unwrap();
            let rules = RuleStore::open(dir.path().join(RULES_FILE)).unwrap();
            Self { dir, schema, mappings, rules }
        }

        fn file(&self, name: &str, content: &str) -> SourceFile {
            let path = self.dir.path().join(name);
            std::fs::write(&path, content).unwrap();
            SourceFile::new(path.display().to_string())
        }

        fn merge(&self, sources: &[SourceFile], strict: bool) -> MergeReport {
            let reader = FileSheetReader;
            MergeProcessor::new(&self.schema, &reader, &self.mappings, &self.rules, MergeOptions { strict })
                .merge(sources)
        }
    }

    #[test]
    fn test_partial_success_merge() {
        let fx = Fixture::new();
        let sources = [
            fx.file("a.csv", "交易日期,摘要,交易金额,余额\n2022-01-05,工资,8000.00,8000.00\n"),
            fx.file("b.csv", "1,2,3\n4,5,6\n"),
            fx.file("c.csv", "日期,金额,余额,摘要\n2022-02-01,-20,7980,餐费\n2022-02-02,-30,7950,交通\n"),
        ];

        let report = fx.merge(&sources, false);
        assert_eq!(report.table.len(), 3);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert!(report.files[0].succeeded());
        assert!(matches!(
            &report.files[1].status,
            FileStatus::Failed { kind, .. } if kind == "HeaderNotFoundError"
        ));
        assert!(report.files[2].succeeded());
        assert_eq!(report.files[2].rows, 2);
    }

    #[test]
    fn test_canonical_column_order() {
        let fx = Fixture::new();
        let sources = [
            fx.file("a.csv", "余额,交易日期,交易金额\n100,2022-01-05,100\n"),
            fx.file("b.csv", "交易金额,余额,交易日期\n-5,95,2022-01-06\n"),
        ];

        let report = fx.merge(&sources, false);
        assert_eq!(report.table.columns, fx.schema.names());
        assert_eq!(report.table.value(0, "balance"), Some(&FieldValue::Decimal(Decimal::from(100))));
        assert_eq!(report.table.value(1, "balance"), Some(&FieldValue::Decimal(Decimal::from(95))));
        assert_eq!(
            report.table.value(1, "transaction_amount"),
            Some(&FieldValue::Decimal(Decimal::from(-5)))
        );
    }

    #[test]
    fn test_rules_resolved_by_scope() {
        let mut fx = Fixture::new();
        fx.rules
            .upsert(Rule::new(
                "招商银行",
                RuleKind::BalanceAdjust {
                    target_field: "balance".into(),
                    delta: Decimal::from(100),
                    apply_condition: Default::default(),
                },
                RuleOrigin::Manual,
            ))
            .unwrap();
        let sources = [
            fx.file("招商银行_2022.csv", "日期,摘要,余额\n2022-01-01,a,0\n2022-01-02,b,0\n2022-01-03,c,0\n"),
            fx.file("其他.csv", "日期,摘要,余额\n2022-01-01,a,0\n"),
        ];

        let report = fx.merge(&sources, false);
        assert_eq!(report.files[0].bank_scope.as_deref(), Some("招商银行"));
        assert_eq!(report.files[1].bank_scope, None);
        let balances: Vec<String> = (0..4)
            .map(|i| report.table.value(i, "balance").map(|v| v.to_string()).unwrap_or_default())
            .collect();
        assert_eq!(balances, vec!["100", "200", "300", "0"]);
    }

    #[test]
    fn test_strict_mode_fails_file() {
        let mut fx = Fixture::new();
        let mut params = serde_json::Map::new();
        params.insert("op".into(), json!("pivot"));
        fx.rules
            .upsert(Rule::new(
                "s",
                RuleKind::Custom { raw_description: "pivot by month".into(), structured_params: params },
                RuleOrigin::Manual,
            ))
            .unwrap();
        let sources = [fx.file("a.csv", "日期,摘要\n2022-01-01,a\n2022-01-02,b\n").with_bank_scope("s")];

        let lenient = fx.merge(&sources, false);
        assert!(lenient.files[0].succeeded());
        assert_eq!(lenient.files[0].skipped.len(), 2);
        assert_eq!(lenient.skipped_rows(), 2);
        assert!(lenient.table.is_empty());

        let strict = fx.merge(&sources, true);
        assert!(matches!(
            &strict.files[0].status,
            FileStatus::Failed { kind, .. } if kind == "UnsupportedCustomRuleError"
        ));
    }

    #[test]
    fn test_merge_can_stop_between_files() {
        let fx = Fixture::new();
        let sources = [
            fx.file("a.csv", "日期,摘要\n2022-01-01,a\n"),
            fx.file("b.csv", "日期,摘要\n2022-01-02,b\n"),
        ];
        let reader = FileSheetReader;
        let processor = MergeProcessor::new(&fx.schema, &reader, &fx.mappings, &fx.rules, MergeOptions::default());
        let report = processor.merge_with(&sources, |_| false);
        assert_eq!(report.files.len(), 1);
        assert_eq!(report.table.len(), 1);
    }

    #[test]
    fn test_missing_file_is_recorded() {
        let fx = Fixture::new();
        let report = fx.merge(&[SourceFile::new("/missing/x.csv")], false);
        assert_eq!(report.failed(), 1);
        assert!(matches!(&report.files[0].status, FileStatus::Failed { kind, .. } if kind == "SheetReadError"));
    }

    #[test]
    fn test_merge_files_uses_registry_and_writes_output() {
        let fx = Fixture::new();
        let config = AppConfig {
            output_dir: fx.dir.path().join("out"),
            ..AppConfig::with_data_dir(fx.dir.path())
        };

        let empty = merge_files(&config, fx.schema.clone(), &[], MergeOptions::default());
        assert!(matches!(empty, Err(MergeError::EmptyInput)));

        let a = fx.file("a.csv", "交易日期,摘要,交易金额\n2022-01-05,工资,8000\n");
        let mut registry = FileRegistry::open(config.files_path()).unwrap();
        registry.import(a).unwrap();

        let outcome = merge_files(&config, fx.schema.clone(), &[], MergeOptions::default()).unwrap();
        assert_eq!(outcome.report.table.len(), 1);
        let path = outcome.output_path.unwrap();
        assert!(path.starts_with(fx.dir.path().join("out")));
        assert!(path.exists());
        assert_eq!(path.extension().unwrap(), "xlsx");

        let csv_config = AppConfig { output_format: OutputFormat::Csv, ..config };
        let outcome = merge_files(&csv_config, fx.schema.clone(), &[], MergeOptions::default()).unwrap();
        let text = std::fs::read_to_string(outcome.output_path.unwrap()).unwrap();
        assert!(text.contains("工资"));
    }

    #[test]
    fn test_merge_files_without_success_writes_nothing() {
        let fx = Fixture::new();
        let config = AppConfig {
            output_dir: fx.dir.path().join("out"),
            ..AppConfig::with_data_dir(fx.dir.path())
        };
        let outcome = merge_files(
            &config,
            fx.schema.clone(),
            &[PathBuf::from("/missing/x.csv")],
            MergeOptions::default(),
        )
        .unwrap();
        assert_eq!(outcome.report.failed(), 1);
        assert!(outcome.output_path.is_none());
        assert!(!fx.dir.path().join("out").exists());
    }
}
