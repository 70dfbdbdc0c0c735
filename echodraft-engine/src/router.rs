use crate::settings::Settings;
use crate::traits::{AudioInput, BackendTranscript, TranscribeOptions, TranscriptionBackend};
use echodraft_core::error::DictationError;
use echodraft_core::types::{
    PROVIDER_LOCAL_WHISPER, fallback_source_tag, is_cloud_http_provider, is_local_provider,
};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedTranscript {
    pub transcript: BackendTranscript,
    /// Provider tag, suffixed `-fallback` when a fallback retry produced it.
    pub source: String,
    pub used_fallback: bool,
}

/// Dispatches transcription to the backend registered for the selected
/// provider and applies the fallback policy: one retry on the opposite tier,
/// then surface a combined error.
pub struct ProviderRouter {
    backends: HashMap<String, Arc<dyn TranscriptionBackend>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    pub fn register(&mut self, provider: impl Into<String>, backend: Arc<dyn TranscriptionBackend>) {
        self.backends.insert(provider.into(), backend);
    }

    pub fn has_backend(&self, provider: &str) -> bool {
        self.backends.contains_key(provider)
    }

    fn backend(&self, provider: &str) -> Result<&Arc<dyn TranscriptionBackend>, DictationError> {
        self.backends
            .get(provider)
            .ok_or_else(|| DictationError::unavailable(provider, "no backend registered"))
    }

    pub async fn transcribe(
        &self,
        settings: &Settings,
        audio: &AudioInput,
        opts: &TranscribeOptions,
    ) -> Result<RoutedTranscript, DictationError> {
        let primary = settings.provider.as_str();
        let primary_err = match self.backend(primary)?.transcribe(audio, opts).await {
            Ok(transcript) => {
                return Ok(RoutedTranscript {
                    transcript,
                    source: primary.to_string(),
                    used_fallback: false,
                });
            }
            Err(e) => e,
        };

        if !primary_err.allows_fallback() {
            return Err(primary_err);
        }

        let fallback = if is_local_provider(primary) && settings.allow_cloud_fallback {
            Some((
                settings.fallback_cloud_provider.as_str(),
                settings.fallback_cloud_model.clone(),
            ))
        } else if is_cloud_http_provider(primary) && settings.allow_local_fallback {
            Some((PROVIDER_LOCAL_WHISPER, settings.fallback_local_model.clone()))
        } else {
            None
        };

        let Some((fallback_provider, fallback_model)) = fallback else {
            return Err(primary_err);
        };

        log::warn!(
            "{primary} transcription failed ({primary_err}); retrying with {fallback_provider} ({fallback_model})"
        );

        let backend = self.backend(fallback_provider).map_err(|_| {
            DictationError::provider_failed(
                primary,
                format!("{primary_err}; no {fallback_provider} backend registered for fallback"),
            )
        })?;

        let retry_opts = TranscribeOptions {
            model: Some(fallback_model),
            ..opts.clone()
        };

        match backend.transcribe(audio, &retry_opts).await {
            Ok(transcript) => Ok(RoutedTranscript {
                transcript,
                source: fallback_source_tag(fallback_provider),
                used_fallback: true,
            }),
            Err(fallback_err) => Err(DictationError::provider_failed(
                primary,
                format!("{primary_err}; {fallback_provider} fallback also failed: {fallback_err}"),
            )),
        }
    }
}

impl Default for ProviderRouter {
    fn default() -> Self {
        Self::new()
    }
}
