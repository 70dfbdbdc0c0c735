use crate::store::replace_file;
use anyhow::Context;
use async_trait::async_trait;
use echodraft_engine::traits::DictionaryStore;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// File-backed custom vocabulary. Entries keep their original casing but
/// dedupe case-insensitively; the bias prompt and the echo guard both treat
/// casing as irrelevant.
#[derive(Debug)]
pub struct FileDictionaryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileDictionaryStore {
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn terms(&self) -> anyhow::Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read dictionary: {}", self.path.display()))?;
        let terms: Vec<String> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse dictionary: {}", self.path.display()))?;
        Ok(terms)
    }

    /// Returns false when the term was already present (ignoring case).
    pub fn add_term(&self, term: &str) -> anyhow::Result<bool> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(false);
        }

        let _guard = self.lock();
        let mut terms = self.terms()?;
        if terms.iter().any(|t| t.eq_ignore_ascii_case(term)) {
            return Ok(false);
        }
        terms.push(term.to_string());
        self.write_all(&terms)?;
        Ok(true)
    }

    pub fn remove_term(&self, term: &str) -> anyhow::Result<bool> {
        let _guard = self.lock();
        let mut terms = self.terms()?;
        let before = terms.len();
        terms.retain(|t| !t.eq_ignore_ascii_case(term.trim()));
        if terms.len() == before {
            return Ok(false);
        }
        self.write_all(&terms)?;
        Ok(true)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write_all(&self, terms: &[String]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create dir: {}", parent.display()))?;
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string_pretty(terms)?)
            .with_context(|| format!("failed to write dictionary temp: {}", tmp.display()))?;
        replace_file(&tmp, &self.path)
            .with_context(|| format!("failed to replace dictionary: {}", self.path.display()))
    }
}

#[async_trait]
impl DictionaryStore for FileDictionaryStore {
    async fn get_dictionary(&self) -> anyhow::Result<Vec<String>> {
        self.terms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_and_dedupes_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDictionaryStore::at_path(dir.path().join("dictionary.json"));

        assert!(store.add_term("Kubernetes").unwrap());
        assert!(!store.add_term("kubernetes").unwrap());
        assert!(!store.add_term("  ").unwrap());
        assert!(store.add_term("EchoDraft").unwrap());

        assert_eq!(store.terms().unwrap(), vec!["Kubernetes", "EchoDraft"]);
    }

    #[test]
    fn removes_ignoring_case() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDictionaryStore::at_path(dir.path().join("dictionary.json"));

        store.add_term("Kubernetes").unwrap();
        assert!(store.remove_term("KUBERNETES").unwrap());
        assert!(!store.remove_term("Kubernetes").unwrap());
        assert!(store.terms().unwrap().is_empty());
    }

    #[tokio::test]
    async fn serves_the_engine_trait() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDictionaryStore::at_path(dir.path().join("dictionary.json"));
        store.add_term("Grafana").unwrap();

        let terms = store.get_dictionary().await.unwrap();
        assert_eq!(terms, vec!["Grafana"]);
    }
}
