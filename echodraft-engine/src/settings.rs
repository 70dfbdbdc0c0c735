use echodraft_core::types::{OutputMode, PROVIDER_LOCAL_WHISPER, PROVIDER_OPENAI};
use serde::{Deserialize, Serialize};

/// User-facing pipeline settings. Persisted by the runtime settings store;
/// the engine reads a fresh snapshot at each session boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub provider: String,
    pub model: String,
    pub language: Option<String>,
    pub output_mode: OutputMode,
    pub sample_rate_hz: u32,

    /// Custom OpenAI-compatible endpoint; https (or loopback) only,
    /// anything else is replaced by the provider default downstream.
    pub custom_base_url: Option<String>,

    pub cleanup_enabled: bool,

    pub allow_cloud_fallback: bool,
    pub fallback_cloud_provider: String,
    pub fallback_cloud_model: String,

    pub allow_local_fallback: bool,
    pub fallback_local_model: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: PROVIDER_LOCAL_WHISPER.into(),
            model: "whisper-base".into(),
            language: None,
            output_mode: OutputMode::Insert,
            sample_rate_hz: 16_000,
            custom_base_url: None,
            cleanup_enabled: false,
            allow_cloud_fallback: false,
            fallback_cloud_provider: PROVIDER_OPENAI.into(),
            fallback_cloud_model: "whisper-1".into(),
            allow_local_fallback: false,
            fallback_local_model: "whisper-base".into(),
        }
    }
}

pub trait SettingsProvider: Send + Sync {
    fn settings(&self) -> Settings;
}

/// In-memory provider for tests and the demo CLI.
#[derive(Debug, Default)]
pub struct StaticSettings(std::sync::Mutex<Settings>);

impl StaticSettings {
    pub fn new(settings: Settings) -> Self {
        Self(std::sync::Mutex::new(settings))
    }

    pub fn update(&self, f: impl FnOnce(&mut Settings)) {
        if let Ok(mut guard) = self.0.lock() {
            f(&mut guard);
        }
    }
}

impl SettingsProvider for StaticSettings {
    fn settings(&self) -> Settings {
        self.0.lock().map(|s| s.clone()).unwrap_or_default()
    }
}
