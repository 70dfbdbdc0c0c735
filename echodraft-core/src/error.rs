use thiserror::Error;

/// Pipeline error taxonomy.
///
/// `ProviderFailed` is the only variant eligible for a fallback retry; the
/// rest are terminal for the session (though `DeliveryFailed`,
/// `PersistenceFailed` and `CleanupFailed` degrade rather than abort).
#[derive(Debug, Error)]
pub enum DictationError {
    /// Terminal: silence never triggers fallback, a second provider would
    /// only hallucinate on the same audio.
    #[error("no audio detected")]
    NoAudioDetected,

    /// Missing/invalid credentials; user-actionable, terminal.
    #[error("{provider} is not available: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    #[error("network appears offline: {0}")]
    NetworkOffline(String),

    /// The transcription echoed the vocabulary bias prompt back.
    #[error("transcription echoed the custom vocabulary; no speech was recognized")]
    PromptEcho,

    #[error("delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("could not save to history: {0}")]
    PersistenceFailed(String),

    #[error("cleanup failed: {0}")]
    CleanupFailed(String),

    /// Recoverable provider/process failure; fallback chains apply.
    #[error("{provider} transcription failed: {message}")]
    ProviderFailed { provider: String, message: String },
}

impl DictationError {
    pub fn provider_failed(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderFailed {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn unavailable(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Whether a configured fallback provider may be tried after this error.
    pub fn allows_fallback(&self) -> bool {
        matches!(self, Self::ProviderFailed { .. })
    }
}
