//! Persisted configuration stores.
//!
//! Each concern owns one JSON file under the data directory:
//!
//! - [`mapping`] - field mappings keyed by file key
//! - [`files`] - the imported-files registry
//!
//! (Rules live in [`crate::rules::store`].) Writes go to a sibling temporary
//! file that is then renamed over the target, so a reader never observes a
//! half-written file.

pub mod files;
pub mod mapping;

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreResult;

pub use files::FileRegistry;
pub use mapping::{FieldMappingStore, MappingRecord};

/// Directory where configuration files are stored (relative to current dir)
pub const DEFAULT_DATA_DIR: &str = ".ledgermerge";

/// Load a JSON file, or the default value when it does not exist yet.
pub fn load_json<T: DeserializeOwned + Default>(path: &Path) -> StoreResult<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(&content)?)
}

/// Write `value` as pretty JSON; complete before returning.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(value)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Lexically normalize a path string: forward slashes, no empty or `.`
/// segments, `..` resolved where possible.
pub fn normalize_path(path: &str) -> String {
    let unified = path.trim().replace('\\', "/");
    let absolute = unified.starts_with('/');

    let mut parts: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(last) if *last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            s => parts.push(s),
        }
    }

    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Final path component, separator-agnostic.
pub fn base_name(path: &str) -> String {
    normalize_path(path)
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Resolve a live file path against stored keys.
///
/// Tiers, first match wins:
/// 1. exact equality
/// 2. equality after [`normalize_path`]
/// 3. equal base file names
/// 4. live base file name is a substring of the stored key
///
/// Several keys on one tier resolve to the lexicographically first. This is
/// a deterministic tie-break, not proof that the right mapping was found.
pub fn resolve_file_key<'a, I>(keys: I, live: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut sorted: Vec<&'a str> = keys.into_iter().collect();
    sorted.sort_unstable();

    let live_norm = normalize_path(live);
    let live_base = base_name(live);

    let tiers: [&dyn Fn(&str) -> bool; 4] = [
        &|k: &str| k == live,
        &|k: &str| normalize_path(k) == live_norm,
        &|k: &str| !live_base.is_empty() && base_name(k) == live_base,
        &|k: &str| !live_base.is_empty() && k.contains(live_base.as_str()),
    ];

    tiers
        .iter()
        .find_map(|matches| sorted.iter().copied().find(|&k| matches(k)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/data/./a.xlsx"), "/data/a.xlsx");
        assert_eq!(normalize_path("/data//in/../a.xlsx"), "/data/a.xlsx");
        assert_eq!(normalize_path(r"C:\data\a.xlsx"), "C:/data/a.xlsx");
        assert_eq!(normalize_path("../x/a.csv"), "../x/a.csv");
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name(r"C:\data\a.xlsx"), "a.xlsx");
        assert_eq!(base_name("/data/a.xlsx"), "a.xlsx");
        assert_eq!(base_name("a.xlsx"), "a.xlsx");
    }

    #[test]
    fn test_resolve_tiers() {
        let keys = ["/data/a.xlsx", "/old/b.xlsx"];
        assert_eq!(resolve_file_key(keys, "/data/a.xlsx"), Some("/data/a.xlsx"));
        assert_eq!(resolve_file_key(keys, "/data/x/../a.xlsx"), Some("/data/a.xlsx"));
        assert_eq!(resolve_file_key(keys, "/new/b.xlsx"), Some("/old/b.xlsx"));
        assert_eq!(resolve_file_key(keys, "/nowhere/c.xlsx"), None);
    }

    #[test]
    fn test_windows_key_matches_on_basename() {
        let keys = [r"C:\data\a.xlsx"];
        assert_eq!(resolve_file_key(keys, "/data/a.xlsx"), Some(r"C:\data\a.xlsx"));
    }

    #[test]
    fn test_substring_tier_and_tie_break() {
        // live basename embedded in stored keys with a different basename
        let keys = ["/z/2022_a.xlsx.bak", "/b/a.xlsx.orig"];
        assert_eq!(resolve_file_key(keys, "/live/a.xlsx"), Some("/b/a.xlsx.orig"));

        // two basename matches: lexicographically first wins
        let keys = ["/y/a.xlsx", "/x/a.xlsx"];
        assert_eq!(resolve_file_key(keys, "/live/a.xlsx"), Some("/x/a.xlsx"));
    }

    #[test]
    fn test_higher_tier_beats_lexicographic_order() {
        let keys = ["/a/stmt.csv", "/b/stmt.csv"];
        assert_eq!(resolve_file_key(keys, "/b/stmt.csv"), Some("/b/stmt.csv"));
    }

    #[test]
    fn test_save_and_load_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("conf.json");

        let missing: Vec<String> = load_json(&path).unwrap();
        assert!(missing.is_empty());

        save_json(&path, &vec!["a".to_string()]).unwrap();
        let loaded: Vec<String> = load_json(&path).unwrap();
        assert_eq!(loaded, vec!["a"]);
        assert!(!dir.path().join("nested").join("conf.json.tmp").exists());
    }
}
