use echodraft_core::types::{InsertionTarget, OutputMode, SessionId, StopSource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictationSession {
    pub session_id: SessionId,
    pub output_mode: OutputMode,

    // Epoch-ms markers filled in as the session moves through its life.
    pub triggered_at: Option<u64>,
    pub started_at: Option<u64>,
    pub released_at: Option<u64>,

    pub insertion_target: Option<InsertionTarget>,
    pub stop_source: Option<StopSource>,
}

impl DictationSession {
    pub fn new(output_mode: OutputMode) -> Self {
        Self {
            session_id: SessionId::generate(),
            output_mode,
            triggered_at: None,
            started_at: None,
            released_at: None,
            insertion_target: None,
            stop_source: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Recording,
    Queued,
    Processing,
    Done,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error | JobStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub job_id: u64,
    pub session_id: SessionId,
    pub status: JobStatus,
    pub output_mode: OutputMode,
    pub provider: String,
    pub model: String,
    pub recorded_ms: Option<u64>,
    pub started_at: Option<u64>,
    pub stopped_at: Option<u64>,
}

/// Immutable once constructed; downstream consumers read, never mutate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub success: bool,
    /// Delivered text, post-cleanup when cleanup ran.
    pub text: String,
    /// Transcript as the provider returned it.
    pub raw_text: String,
    /// `local`, `openai`, `openai-reasoned`, `openai-fallback`, ...
    pub source: String,
    pub provider: String,
    pub model: String,
    pub timings: BTreeMap<String, u64>,

    pub limit_reached: Option<bool>,
    pub words_used: Option<u64>,
    pub words_remaining: Option<u64>,

    pub paste_succeeded: Option<bool>,
    /// Set when insert mode fell back to leaving text in the clipboard.
    pub delivery_degraded: bool,
    pub error: Option<String>,
}

pub fn ms(d: Duration) -> u64 {
    d.as_millis().try_into().unwrap_or(u64::MAX)
}

pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(ms)
        .unwrap_or(0)
}
