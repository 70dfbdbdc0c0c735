use crate::session::ms;
use crate::traits::{RecordPatch, TranscriptionRecord, TranscriptionStore};
use echodraft_core::error::DictationError;
use std::sync::Arc;
use std::time::Instant;

/// Persists the diagnostic record for a finished dictation.
///
/// The save happens synchronously with delivery so the record exists before
/// the pipeline reports done; the save and total durations are only known
/// once that round-trip is measured, so they are patched in afterwards
/// without blocking the caller.
pub struct HistoryWriter {
    store: Arc<dyn TranscriptionStore>,
}

impl HistoryWriter {
    pub fn new(store: Arc<dyn TranscriptionStore>) -> Self {
        Self { store }
    }

    pub async fn persist(
        &self,
        record: TranscriptionRecord,
        pipeline_started: Instant,
    ) -> Result<String, DictationError> {
        let save_start = Instant::now();
        let id = self
            .store
            .save_transcription(&record)
            .await
            .map_err(|e| DictationError::PersistenceFailed(format!("{e:#}")))?;

        let patch = RecordPatch {
            save_duration_ms: Some(ms(save_start.elapsed())),
            total_duration_ms: Some(ms(pipeline_started.elapsed())),
        };

        let store = Arc::clone(&self.store);
        let patch_id = id.clone();
        tokio::spawn(async move {
            if let Err(e) = store.patch_transcription_meta(&patch_id, &patch).await {
                log::warn!("failed to patch timing metadata onto record {patch_id}: {e:#}");
            }
        });

        Ok(id)
    }
}
