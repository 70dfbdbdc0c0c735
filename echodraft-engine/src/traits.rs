use async_trait::async_trait;
use echodraft_core::types::InsertionTarget;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub struct AudioInput {
    // Audio is mono PCM samples at `sample_rate_hz`.
    // Capture/resampling happened at the boundary.
    pub sample_rate_hz: u32,
    pub samples: Vec<f32>,
}

impl AudioInput {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate_hz == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate_hz as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TranscribeOptions {
    pub language: Option<String>,
    /// Vocabulary bias prompt. Omitted entirely on an echo-guard retry.
    pub initial_prompt: Option<String>,
    /// Overrides the backend's configured model; set on fallback retries.
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendTranscript {
    pub text: String,
    pub provider: String,
    pub model: String,

    // Hosted-tier quota fields; None for BYOK and local backends.
    #[serde(default)]
    pub limit_reached: Option<bool>,
    #[serde(default)]
    pub words_used: Option<u64>,
    #[serde(default)]
    pub words_remaining: Option<u64>,
}

impl BackendTranscript {
    pub fn new(
        text: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            provider: provider.into(),
            model: model.into(),
            limit_reached: None,
            words_used: None,
            words_remaining: None,
        }
    }
}

/// One interchangeable transcription tier (local model, cloud HTTP, hosted).
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    async fn transcribe(
        &self,
        audio: &AudioInput,
        opts: &TranscribeOptions,
    ) -> Result<BackendTranscript, echodraft_core::error::DictationError>;
}

#[async_trait]
pub trait CleanupBackend: Send + Sync {
    async fn cleanup(&self, text: &str) -> anyhow::Result<String>;
}

/// Window/clipboard primitives the host supplies.
#[async_trait]
pub trait HostActions: Send + Sync {
    async fn capture_insertion_target(&self) -> anyhow::Result<Option<InsertionTarget>>;
    /// Pastes into the given target. Errors when the target window is gone
    /// or rejects input; the caller decides how to degrade.
    async fn paste_text(&self, text: &str, target: &InsertionTarget) -> anyhow::Result<()>;
    async fn write_clipboard(&self, text: &str) -> anyhow::Result<()>;
    async fn read_clipboard(&self) -> anyhow::Result<Option<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub session_id: String,
    pub output_mode: echodraft_core::types::OutputMode,
    pub status: String,
    pub source: String,
    pub provider: String,
    pub model: String,
    pub insertion_target: Option<InsertionTarget>,
    pub paste_succeeded: Option<bool>,
    pub timings: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionRecord {
    pub text: String,
    pub raw_text: String,
    pub meta: RecordMeta,
}

/// Late-arriving metadata patched onto an already-saved record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordPatch {
    pub save_duration_ms: Option<u64>,
    pub total_duration_ms: Option<u64>,
}

#[async_trait]
pub trait TranscriptionStore: Send + Sync {
    async fn save_transcription(&self, record: &TranscriptionRecord) -> anyhow::Result<String>;
    async fn patch_transcription_meta(&self, id: &str, patch: &RecordPatch) -> anyhow::Result<()>;
}

#[async_trait]
pub trait DictionaryStore: Send + Sync {
    async fn get_dictionary(&self) -> anyhow::Result<Vec<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Prompt,
    Denied,
    Unknown,
}

/// Microphone capture as the host provides it. `open` hands back a channel of
/// mono f32 chunks; `stop` asks the producer to flush its tail and close the
/// channel; `cancel` closes immediately and discards.
#[async_trait]
pub trait MicrophoneCapture: Send + Sync {
    async fn permission_state(&self) -> PermissionState;
    async fn open(&self, sample_rate_hz: u32) -> anyhow::Result<mpsc::Receiver<Vec<f32>>>;
    async fn stop(&self) -> anyhow::Result<()>;
    async fn cancel(&self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutcome {
    pub live_text: String,
    pub termination_text: Option<String>,
}

/// An already-started streaming transcription session, audio in / text out.
#[async_trait]
pub trait StreamingTranscriber: Send + Sync {
    /// Returns false once the session can no longer accept audio.
    async fn send_audio(&self, samples: Vec<f32>) -> bool;
    async fn force_endpoint(&self);
    async fn stop(&self) -> anyhow::Result<StreamOutcome>;
}

/// Opens streaming sessions on demand; lets the engine pre-authenticate with
/// `warmup` before any speech arrives.
#[async_trait]
pub trait StreamingFactory: Send + Sync {
    async fn warmup(&self) -> anyhow::Result<()>;
    async fn start(&self) -> anyhow::Result<std::sync::Arc<dyn StreamingTranscriber>>;
}
