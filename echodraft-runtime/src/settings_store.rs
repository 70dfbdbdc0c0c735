use crate::store::replace_file;
use anyhow::Context;
use echodraft_engine::settings::{Settings, SettingsProvider};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// JSON-file settings store. Keeps an in-memory snapshot so the engine can
/// read settings at session boundaries without touching the disk.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    cached: Mutex<Settings>,
}

impl SettingsStore {
    /// Opens the store, falling back to defaults when the file is missing.
    /// A corrupt file is an error; silently discarding user settings would
    /// be worse than failing startup.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let settings = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("decode settings JSON: {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Settings::default(),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("read settings: {}", path.display()));
            }
        };

        Ok(Self {
            path,
            cached: Mutex::new(settings),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, settings: &Settings) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(settings).context("encode settings JSON")?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create settings directory: {}", parent.display()))?;
        }

        // Atomic-ish write: write temp then replace.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("write temp: {}", tmp.display()))?;
        replace_file(&tmp, &self.path)
            .with_context(|| format!("replace file: {}", self.path.display()))?;

        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        *cached = settings.clone();
        Ok(())
    }

    pub fn update(&self, f: impl FnOnce(&mut Settings)) -> anyhow::Result<Settings> {
        let mut settings = self.settings();
        f(&mut settings);
        self.save(&settings)?;
        Ok(settings)
    }
}

impl SettingsProvider for SettingsStore {
    fn settings(&self) -> Settings {
        self.cached
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }
}
