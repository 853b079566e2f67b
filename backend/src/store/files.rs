//! Imported-files registry.
//!
//! Remembers which spreadsheets were imported, across sessions, and rejects a
//! second import of the same resolved path.

use std::path::{Path, PathBuf};

use crate::error::{RegistryError, RegistryResult, StoreResult};
use crate::header::HeaderInfo;
use crate::models::SourceFile;
use crate::store::{load_json, normalize_path, save_json};

/// File name of the registry inside the data directory.
pub const FILES_REGISTRY_FILE: &str = "imported_files.json";

/// Ordered registry of imported source files.
pub struct FileRegistry {
    path: PathBuf,
    files: Vec<SourceFile>,
}

/// Resolve a path the way the registry keys it: canonical when the file
/// exists, lexically normalized otherwise.
pub fn resolve_path(path: &Path) -> String {
    match std::fs::canonicalize(path) {
        Ok(canonical) => canonical.display().to_string(),
        Err(_) => normalize_path(&path.display().to_string()),
    }
}

impl FileRegistry {
    /// Open the registry at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let files = load_json(&path)?;
        Ok(Self { path, files })
    }

    pub fn list(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Registered entry for `path`, matched on the resolved path.
    pub fn get(&self, path: &Path) -> Option<&SourceFile> {
        let resolved = resolve_path(path);
        let raw = path.display().to_string();
        self.files.iter().find(|f| f.path == resolved || f.path == raw)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.get(path).is_some()
    }

    /// Register a new source. Its path is resolved first; an already
    /// registered path is rejected and the registry left unchanged.
    pub fn import(&mut self, mut source: SourceFile) -> RegistryResult<SourceFile> {
        source.path = resolve_path(Path::new(&source.path));
        if self.files.iter().any(|f| f.path == source.path) {
            return Err(RegistryError::DuplicateImport(source.path));
        }

        self.files.push(source.clone());
        if let Err(e) = save_json(&self.path, &self.files) {
            self.files.pop();
            return Err(e.into());
        }
        Ok(source)
    }

    /// Register `path` with an optional header detection result.
    pub fn import_path(&mut self, path: &Path, header: Option<&HeaderInfo>) -> RegistryResult<SourceFile> {
        let mut source = SourceFile::new(path.display().to_string());
        if let Some(info) = header {
            source.detected_header_row = Some(info.header_row_index);
            source.detected_columns = info.columns.clone();
        }
        self.import(source)
    }

    /// Remove a registered file.
    pub fn remove(&mut self, path: &Path) -> RegistryResult<SourceFile> {
        let resolved = resolve_path(path);
        let raw = path.display().to_string();
        let index = self
            .files
            .iter()
            .position(|f| f.path == resolved || f.path == raw)
            .ok_or_else(|| RegistryError::NotFound(raw.clone()))?;

        let removed = self.files.remove(index);
        if let Err(e) = save_json(&self.path, &self.files) {
            self.files.insert(index, removed);
            return Err(e.into());
        }
        Ok(removed)
    }
}
