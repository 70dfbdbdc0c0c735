use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    Insert,
    Clipboard,
}

/// Destination window handle snapshotted at recording start.
///
/// Opaque to the pipeline: only the host can tell whether it is still valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertionTarget {
    pub hwnd: u64,
    pub pid: u32,
    pub process_name: Option<String>,
    pub title: Option<String>,
}

impl InsertionTarget {
    pub fn new(hwnd: u64, pid: u32) -> Self {
        Self {
            hwnd,
            pid,
            process_name: None,
            title: None,
        }
    }

    pub fn with_process_name(mut self, name: impl Into<String>) -> Self {
        self.process_name = Some(name.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopSource {
    Manual,
    Release,
    TrackEnded,
}

// Provider selectors as exposed in settings.
pub const PROVIDER_LOCAL_WHISPER: &str = "local-whisper";
pub const PROVIDER_LOCAL_PARAKEET: &str = "local-parakeet";
pub const PROVIDER_STREAMING: &str = "streaming";
pub const PROVIDER_OPENAI: &str = "openai";
pub const PROVIDER_GROQ: &str = "groq";
pub const PROVIDER_MISTRAL: &str = "mistral";
pub const PROVIDER_CUSTOM: &str = "custom";
pub const PROVIDER_ECHODRAFT_CLOUD: &str = "echodraft-cloud";

pub fn is_local_provider(provider: &str) -> bool {
    matches!(provider, PROVIDER_LOCAL_WHISPER | PROVIDER_LOCAL_PARAKEET)
}

pub fn is_cloud_http_provider(provider: &str) -> bool {
    matches!(
        provider,
        PROVIDER_OPENAI | PROVIDER_GROQ | PROVIDER_MISTRAL | PROVIDER_CUSTOM
    )
}

/// Source tag for a result produced by a fallback retry, e.g. `openai-fallback`.
pub fn fallback_source_tag(provider: &str) -> String {
    format!("{provider}-fallback")
}

/// Source tag for a result that went through reasoning cleanup.
pub fn reasoned_source_tag(provider: &str) -> String {
    format!("{provider}-reasoned")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_providers() {
        assert!(is_local_provider(PROVIDER_LOCAL_WHISPER));
        assert!(is_local_provider(PROVIDER_LOCAL_PARAKEET));
        assert!(!is_local_provider(PROVIDER_OPENAI));

        assert!(is_cloud_http_provider(PROVIDER_OPENAI));
        assert!(is_cloud_http_provider(PROVIDER_CUSTOM));
        assert!(!is_cloud_http_provider(PROVIDER_STREAMING));
        assert!(!is_cloud_http_provider(PROVIDER_ECHODRAFT_CLOUD));
    }

    #[test]
    fn builds_source_tags() {
        assert_eq!(fallback_source_tag("openai"), "openai-fallback");
        assert_eq!(reasoned_source_tag("openai"), "openai-reasoned");
    }

    #[test]
    fn generated_session_ids_are_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }
}
