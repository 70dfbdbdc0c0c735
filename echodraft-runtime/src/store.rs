use anyhow::Context;
use async_trait::async_trait;
use echodraft_engine::traits::{RecordPatch, TranscriptionRecord, TranscriptionStore};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Replaces `dst` with `tmp`, keeping a `.bak` of the previous file so a
/// failed rename never leaves the store empty.
pub fn replace_file(tmp: &Path, dst: &Path) -> anyhow::Result<()> {
    let backup = dst.with_extension("bak");

    if dst.exists() {
        let _ = fs::remove_file(&backup);
        fs::rename(dst, &backup)
            .with_context(|| format!("failed rename {} -> {}", dst.display(), backup.display()))?;
    }

    if let Err(e) = fs::rename(tmp, dst) {
        // Try to restore previous file if we had one.
        if backup.exists() {
            let _ = fs::rename(&backup, dst);
        }
        let _ = fs::remove_file(tmp);
        return Err(anyhow::Error::new(e).context(format!(
            "failed rename {} -> {}",
            tmp.display(),
            dst.display()
        )));
    }

    let _ = fs::remove_file(&backup);
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTranscription {
    pub id: String,
    pub saved_at_unix_ms: u64,
    #[serde(flatten)]
    pub record: TranscriptionRecord,
}

/// File-backed transcription history: one pretty-printed JSON array, newest
/// last, trimmed to `max_entries` on every save.
#[derive(Debug)]
pub struct FileTranscriptionStore {
    path: PathBuf,
    max_entries: usize,
    // Serializes the read-modify-write cycle; saves and late timing patches
    // can land concurrently.
    write_lock: Mutex<()>,
}

impl FileTranscriptionStore {
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_entries: 200,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> anyhow::Result<Vec<StoredTranscription>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read history: {}", self.path.display()))?;
        let entries: Vec<StoredTranscription> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse history: {}", self.path.display()))?;
        Ok(entries)
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        let _guard = self.lock();
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("failed to remove history: {}", self.path.display()))?;
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write_all(&self, entries: &[StoredTranscription]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create dir: {}", parent.display()))?;
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string_pretty(entries)?)
            .with_context(|| format!("failed to write history temp: {}", tmp.display()))?;
        replace_file(&tmp, &self.path)
            .with_context(|| format!("failed to replace history: {}", self.path.display()))
    }

    fn now_unix_ms() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

#[async_trait]
impl TranscriptionStore for FileTranscriptionStore {
    async fn save_transcription(&self, record: &TranscriptionRecord) -> anyhow::Result<String> {
        let _guard = self.lock();

        let mut entries = self.load()?;
        let id = uuid::Uuid::new_v4().to_string();
        entries.push(StoredTranscription {
            id: id.clone(),
            saved_at_unix_ms: Self::now_unix_ms(),
            record: record.clone(),
        });
        if entries.len() > self.max_entries {
            let start = entries.len() - self.max_entries;
            entries = entries.split_off(start);
        }

        self.write_all(&entries)?;
        Ok(id)
    }

    async fn patch_transcription_meta(&self, id: &str, patch: &RecordPatch) -> anyhow::Result<()> {
        let _guard = self.lock();

        let mut entries = self.load()?;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .with_context(|| format!("no stored transcription with id {id}"))?;

        if let Some(ms) = patch.save_duration_ms {
            entry.record.meta.timings.insert("save_duration_ms".into(), ms);
        }
        if let Some(ms) = patch.total_duration_ms {
            entry.record.meta.timings.insert("total_duration_ms".into(), ms);
        }

        self.write_all(&entries)
    }
}
