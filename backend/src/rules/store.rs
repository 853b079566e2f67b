//! Rule store - active rule sets keyed by bank scope.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::api::logs::log_warning;
use crate::error::{RuleError, RuleResult, StoreResult};
use crate::rules::model::Rule;
use crate::store::{load_json, save_json};

/// File name of the rules configuration inside the data directory.
pub const RULES_FILE: &str = "rules_config.json";

/// Persisted rules, one ordered list per bank scope.
pub struct RuleStore {
    path: PathBuf,
    rules: BTreeMap<String, Vec<Rule>>,
}

impl RuleStore {
    /// Open the store at `path`. Duplicate ids in a scope keep the last entry.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let loaded: BTreeMap<String, Vec<Rule>> = load_json(&path)?;

        let mut rules = BTreeMap::new();
        for (scope, list) in loaded {
            let mut deduped: Vec<Rule> = Vec::with_capacity(list.len());
            for mut rule in list {
                rule.bank_scope = scope.clone();
                if let Some(existing) = deduped.iter_mut().find(|r| r.id == rule.id) {
                    log_warning(format!("Duplicate rule id '{}' in scope '{}', keeping the last", rule.id, scope));
                    *existing = rule;
                } else {
                    deduped.push(rule);
                }
            }
            rules.insert(scope, deduped);
        }
        Ok(Self { path, rules })
    }

    /// Bank scopes with at least one rule.
    pub fn scopes(&self) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(scope, _)| scope.as_str())
            .collect()
    }

    /// Rules of `scope` in storage order.
    pub fn rules_for(&self, scope: &str) -> &[Rule] {
        self.rules.get(scope).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, scope: &str, id: &str) -> Option<&Rule> {
        self.rules_for(scope).iter().find(|r| r.id == id)
    }

    /// Insert `rule`, replacing the rule with the same id in its scope.
    /// Returns the replaced rule.
    pub fn upsert(&mut self, rule: Rule) -> RuleResult<Option<Rule>> {
        let scope = rule.bank_scope.clone();
        let list = self.rules.entry(scope.clone()).or_default();

        let (replaced, index) = match list.iter().position(|r| r.id == rule.id) {
            Some(i) => (Some(std::mem::replace(&mut list[i], rule)), i),
            None => {
                list.push(rule);
                (None, list.len() - 1)
            }
        };

        if let Err(e) = save_json(&self.path, &self.rules) {
            let list = self.rules.entry(scope).or_default();
            match &replaced {
                Some(old) => list[index] = old.clone(),
                None => {
                    list.pop();
                }
            }
            return Err(e.into());
        }
        Ok(replaced)
    }

    /// Delete a rule.
    pub fn remove(&mut self, scope: &str, id: &str) -> RuleResult<Rule> {
        let not_found = || RuleError::NotFound {
            scope: scope.to_string(),
            id: id.to_string(),
        };
        let list = self.rules.get_mut(scope).ok_or_else(not_found)?;
        let index = list.iter().position(|r| r.id == id).ok_or_else(not_found)?;
        let removed = list.remove(index);

        if let Err(e) = save_json(&self.path, &self.rules) {
            if let Some(list) = self.rules.get_mut(scope) {
                list.insert(index, removed);
            }
            return Err(e.into());
        }
        Ok(removed)
    }

    /// Scope whose name appears in a file's display name. The longest name
    /// wins, then the lexicographically first.
    pub fn resolve_scope(&self, display_name: &str) -> Option<&str> {
        self.scopes()
            .into_iter()
            .filter(|scope| display_name.contains(scope))
            .fold(None, |best: Option<&str>, scope| match best {
                Some(b) if b.chars().count() >= scope.chars().count() => Some(b),
                _ => Some(scope),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::model::{RuleKind, RuleOrigin};
    use tempfile::tempdir;

    fn page_break(scope: &str, n: usize) -> Rule {
        Rule::new(scope, RuleKind::PageBreak { every_n_rows: n }, RuleOrigin::Manual)
    }

    #[test]
    fn test_upsert_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(RULES_FILE);
        let mut store = RuleStore::open(&path).unwrap();

        store.upsert(page_break("招商银行", 10)).unwrap();
        store.upsert(page_break("招商银行", 20)).unwrap();
        store.upsert(page_break("工商银行", 10)).unwrap();

        let reloaded = RuleStore::open(&path).unwrap();
        assert_eq!(reloaded.rules_for("招商银行").len(), 2);
        assert_eq!(reloaded.scopes(), vec!["工商银行", "招商银行"]);
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let dir = tempdir().unwrap();
        let mut store = RuleStore::open(dir.path().join(RULES_FILE)).unwrap();

        let first = page_break("s", 10);
        store.upsert(first.clone()).unwrap();

        let mut edited = first.clone();
        edited.created_from = RuleOrigin::NlLlm;
        let replaced = store.upsert(edited).unwrap();

        assert_eq!(replaced, Some(first));
        assert_eq!(store.rules_for("s").len(), 1);
        assert_eq!(store.rules_for("s")[0].created_from, RuleOrigin::NlLlm);
    }

    #[test]
    fn test_remove() {
        let dir = tempdir().unwrap();
        let mut store = RuleStore::open(dir.path().join(RULES_FILE)).unwrap();
        let rule = page_break("s", 10);
        store.upsert(rule.clone()).unwrap();

        assert_eq!(store.remove("s", &rule.id).unwrap(), rule);
        assert!(matches!(store.remove("s", &rule.id), Err(RuleError::NotFound { .. })));
        assert!(store.scopes().is_empty());
    }

    #[test]
    fn test_duplicate_ids_on_disk_keep_last() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(RULES_FILE);
        let mut a = page_break("s", 10);
        a.created_from = RuleOrigin::Manual;
        let mut b = a.clone();
        b.created_from = RuleOrigin::NlLlm;
        let mut on_disk = BTreeMap::new();
        on_disk.insert("s".to_string(), vec![a, b]);
        std::fs::write(&path, serde_json::to_string(&on_disk).unwrap()).unwrap();

        let store = RuleStore::open(&path).unwrap();
        assert_eq!(store.rules_for("s").len(), 1);
        assert_eq!(store.rules_for("s")[0].created_from, RuleOrigin::NlLlm);
    }

    #[test]
    fn test_resolve_scope_by_display_name() {
        let dir = tempdir().unwrap();
        let mut store = RuleStore::open(dir.path().join(RULES_FILE)).unwrap();
        store.upsert(page_break("银行", 5)).unwrap();
        store.upsert(page_break("招商银行", 5)).unwrap();

        assert_eq!(store.resolve_scope("招商银行_2022.xlsx"), Some("招商银行"));
        assert_eq!(store.resolve_scope("农业银行.xlsx"), Some("银行"));
        assert_eq!(store.resolve_scope("statement.csv"), None);
    }
}
