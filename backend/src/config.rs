//! Application configuration.
//!
//! Built once at startup from the environment (after loading `.env`) and
//! passed down explicitly; nothing reads the environment afterwards.
//!
//! | Variable                      | Default        |
//! |-------------------------------|----------------|
//! | `LEDGERMERGE_DATA_DIR`        | `.ledgermerge` |
//! | `LEDGERMERGE_OUTPUT_DIR`      | `output`       |
//! | `LEDGERMERGE_OUTPUT_FORMAT`   | `xlsx`         |
//! | `LEDGERMERGE_SCHEMA`          | embedded       |
//! | `LEDGERMERGE_STRICT`          | `false`        |
//! | `LEDGERMERGE_AI_*`            | see [`AiConfig`] |

use std::env;
use std::path::PathBuf;

use crate::ai::{parse_flag, AiConfig};
use crate::error::SchemaError;
use crate::rules::RULES_FILE;
use crate::schema::SchemaRegistry;
use crate::store::files::FILES_REGISTRY_FILE;
use crate::store::mapping::MAPPING_FILE;
use crate::store::DEFAULT_DATA_DIR;
use crate::writer::OutputFormat;

/// Default directory for merged output.
pub const DEFAULT_OUTPUT_DIR: &str = "output";

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Holds the mapping, rules and registry JSON files.
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub output_format: OutputFormat,
    /// Custom standard field definition.
    pub schema_path: Option<PathBuf>,
    pub strict: bool,
    pub ai: AiConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            output_format: OutputFormat::default(),
            schema_path: None,
            strict: false,
            ai: AiConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        Self {
            data_dir: env::var("LEDGERMERGE_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            output_dir: env::var("LEDGERMERGE_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            output_format: env::var("LEDGERMERGE_OUTPUT_FORMAT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.output_format),
            schema_path: env::var("LEDGERMERGE_SCHEMA").ok().map(PathBuf::from),
            strict: env::var("LEDGERMERGE_STRICT").map(|v| parse_flag(&v)).unwrap_or(false),
            ai: AiConfig::from_env(),
        }
    }

    /// Config rooted at `data_dir`, AI disabled.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn mapping_path(&self) -> PathBuf {
        self.data_dir.join(MAPPING_FILE)
    }

    pub fn rules_path(&self) -> PathBuf {
        self.data_dir.join(RULES_FILE)
    }

    pub fn files_path(&self) -> PathBuf {
        self.data_dir.join(FILES_REGISTRY_FILE)
    }

    /// Custom schema when configured, else the embedded one.
    pub fn load_schema(&self) -> Result<SchemaRegistry, SchemaError> {
        match &self.schema_path {
            Some(path) => SchemaRegistry::from_file(path),
            None => Ok(SchemaRegistry::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_paths_under_data_dir() {
        let config = AppConfig::with_data_dir("/tmp/lm");
        assert_eq!(config.mapping_path(), PathBuf::from("/tmp/lm/field_mapping_config.json"));
        assert_eq!(config.rules_path(), PathBuf::from("/tmp/lm/rules_config.json"));
        assert_eq!(config.files_path(), PathBuf::from("/tmp/lm/imported_files.json"));
        assert!(!config.ai.enabled);
        assert_eq!(config.output_format, OutputFormat::Xlsx);
    }

    #[test]
    fn test_load_schema() {
        let config = AppConfig::default();
        assert_eq!(config.load_schema().unwrap().len(), 10);

        let dir = tempdir().unwrap();
        let path = dir.path().join("fields.json");
        std::fs::write(
            &path,
            r#"[{"name": "date", "description": "日期", "value_type": "date"},
                {"name": "amount", "description": "金额", "value_type": "decimal"}]"#,
        )
        .unwrap();
        let config = AppConfig { schema_path: Some(path), ..AppConfig::default() };
        assert_eq!(config.load_schema().unwrap().names(), vec!["date", "amount"]);
    }
}
