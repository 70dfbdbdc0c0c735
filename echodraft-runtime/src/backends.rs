use crate::wav::{encode_wav_mono_f32le, peak_amplitude};
use async_trait::async_trait;
use echodraft_core::error::DictationError;
use echodraft_core::types::PROVIDER_ECHODRAFT_CLOUD;
use echodraft_engine::traits::{
    AudioInput, BackendTranscript, TranscribeOptions, TranscriptionBackend,
};
use echodraft_providers::cloud_http::{
    AudioFile, CloudSttConfig, ECHODRAFT_CLOUD_BASE_URL, build_transcription_request,
};
use echodraft_providers::runtime::execute;

/// Peak amplitude below this is treated as a silent capture and rejected
/// before any upload.
const SILENCE_PEAK: f32 = 0.003;

pub fn is_effectively_silent(samples: &[f32]) -> bool {
    peak_amplitude(samples) < SILENCE_PEAK
}

/// Transcription over an OpenAI-compatible `audio/transcriptions` endpoint.
/// Covers the BYOK cloud providers, loopback inference servers, and the
/// hosted tier (which adds quota fields to the response).
#[derive(Clone)]
pub struct CloudHttpBackend {
    provider: String,
    model: String,
    base_url: String,
    api_key: String,
    require_api_key: bool,
}

impl std::fmt::Debug for CloudHttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudHttpBackend")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl CloudHttpBackend {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            require_api_key: true,
        }
    }

    pub fn hosted(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::new(
            PROVIDER_ECHODRAFT_CLOUD,
            model,
            ECHODRAFT_CLOUD_BASE_URL,
            api_key,
        )
    }

    /// Loopback inference servers usually run without authentication.
    pub fn local_server(
        provider: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let mut b = Self::new(provider, model, base_url, "");
        b.require_api_key = false;
        b
    }
}

#[async_trait]
impl TranscriptionBackend for CloudHttpBackend {
    async fn transcribe(
        &self,
        audio: &AudioInput,
        opts: &TranscribeOptions,
    ) -> Result<BackendTranscript, DictationError> {
        if audio.samples.is_empty() || is_effectively_silent(&audio.samples) {
            return Err(DictationError::NoAudioDetected);
        }

        if self.require_api_key && self.api_key.trim().is_empty() {
            return Err(DictationError::unavailable(&self.provider, "missing API key"));
        }

        let model = opts.model.clone().unwrap_or_else(|| self.model.clone());
        let cfg = CloudSttConfig {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: model.clone(),
            language: opts.language.clone(),
            initial_prompt: opts.initial_prompt.clone(),
        };

        let wav = encode_wav_mono_f32le(&audio.samples, audio.sample_rate_hz);
        let req = build_transcription_request(
            &cfg,
            &AudioFile {
                filename: "input.wav".into(),
                mime_type: "audio/wav".into(),
                bytes: wav,
            },
        );

        let resp = execute(&req)
            .await
            .map_err(|e| DictationError::NetworkOffline(format!("{e:#}")))?;

        match resp.status {
            401 | 403 => {
                return Err(DictationError::unavailable(
                    &self.provider,
                    format!("authentication rejected (status {})", resp.status),
                ));
            }
            s if !resp.is_success() => {
                return Err(DictationError::provider_failed(
                    &self.provider,
                    format!("status={} body={}", s, resp.body_preview()),
                ));
            }
            _ => {}
        }

        let payload = echodraft_providers::parse::parse_transcription(&resp.body)
            .map_err(|e| DictationError::provider_failed(&self.provider, format!("{e:#}")))?;

        if payload.limit_reached == Some(true) {
            log::warn!("{} word quota exhausted for this period", self.provider);
        }

        Ok(BackendTranscript {
            text: payload.text,
            provider: self.provider.clone(),
            model,
            limit_reached: payload.limit_reached,
            words_used: payload.words_used,
            words_remaining: payload.words_remaining,
        })
    }
}

/// Canned backend for tests and the demo CLI.
#[derive(Debug, Clone)]
pub struct MockTranscriptionBackend {
    pub text: String,
    pub provider: String,
    pub model: String,
}

impl MockTranscriptionBackend {
    pub fn new(text: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            provider: provider.into(),
            model: "mock".into(),
        }
    }
}

#[async_trait]
impl TranscriptionBackend for MockTranscriptionBackend {
    async fn transcribe(
        &self,
        audio: &AudioInput,
        opts: &TranscribeOptions,
    ) -> Result<BackendTranscript, DictationError> {
        if audio.samples.is_empty() || is_effectively_silent(&audio.samples) {
            return Err(DictationError::NoAudioDetected);
        }
        Ok(BackendTranscript::new(
            self.text.clone(),
            self.provider.clone(),
            opts.model.clone().unwrap_or_else(|| self.model.clone()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use echodraft_core::types::PROVIDER_OPENAI;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn speech() -> AudioInput {
        AudioInput {
            sample_rate_hz: 16_000,
            samples: vec![0.2; 1600],
        }
    }

    #[tokio::test]
    async fn transcribes_and_carries_quota_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"text":"hello there","limit_reached":false,"words_used":2,"words_remaining":9998}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let backend = CloudHttpBackend::new(PROVIDER_OPENAI, "whisper-1", server.uri(), "sk-test");
        let t = backend
            .transcribe(&speech(), &TranscribeOptions::default())
            .await
            .unwrap();

        assert_eq!(t.text, "hello there");
        assert_eq!(t.provider, PROVIDER_OPENAI);
        assert_eq!(t.words_remaining, Some(9998));
    }

    #[tokio::test]
    async fn model_override_reaches_the_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .and(wiremock::matchers::body_string_contains("whisper-large-v3"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"text":"ok"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let backend = CloudHttpBackend::new(PROVIDER_OPENAI, "whisper-1", server.uri(), "sk-test");
        let opts = TranscribeOptions {
            model: Some("whisper-large-v3".into()),
            ..Default::default()
        };
        let t = backend.transcribe(&speech(), &opts).await.unwrap();
        assert_eq!(t.model, "whisper-large-v3");
    }

    #[tokio::test]
    async fn silent_audio_is_rejected_before_upload() {
        // No mock server: a network hit would fail the test by erroring.
        let backend =
            CloudHttpBackend::new(PROVIDER_OPENAI, "whisper-1", "http://127.0.0.1:9", "sk-test");
        let audio = AudioInput {
            sample_rate_hz: 16_000,
            samples: vec![0.0005; 1600],
        };
        let err = backend
            .transcribe(&audio, &TranscribeOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DictationError::NoAudioDetected));
    }

    #[tokio::test]
    async fn missing_key_is_unavailable() {
        let backend = CloudHttpBackend::new(PROVIDER_OPENAI, "whisper-1", "http://127.0.0.1:9", "");
        let err = backend
            .transcribe(&speech(), &TranscribeOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DictationError::ProviderUnavailable { .. }));
    }

    #[tokio::test]
    async fn auth_rejection_is_unavailable_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let backend = CloudHttpBackend::new(PROVIDER_OPENAI, "whisper-1", server.uri(), "sk-bad");
        let err = backend
            .transcribe(&speech(), &TranscribeOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DictationError::ProviderUnavailable { .. }));
        assert!(!err.allows_fallback());
    }

    #[tokio::test]
    async fn server_error_allows_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let backend = CloudHttpBackend::new(PROVIDER_OPENAI, "whisper-1", server.uri(), "sk-test");
        let err = backend
            .transcribe(&speech(), &TranscribeOptions::default())
            .await
            .err()
            .unwrap();
        assert!(err.allows_fallback());
        assert!(err.to_string().contains("overloaded"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_offline() {
        let backend =
            CloudHttpBackend::new(PROVIDER_OPENAI, "whisper-1", "http://127.0.0.1:9", "sk-test");
        let err = backend
            .transcribe(&speech(), &TranscribeOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DictationError::NetworkOffline(_)));
    }

    #[tokio::test]
    async fn local_server_needs_no_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"text":"local result"}"#),
            )
            .mount(&server)
            .await;

        let backend = CloudHttpBackend::local_server("local-whisper", "whisper-base", server.uri());
        let t = backend
            .transcribe(&speech(), &TranscribeOptions::default())
            .await
            .unwrap();
        assert_eq!(t.text, "local result");
        assert_eq!(t.limit_reached, None);
    }

    #[test]
    fn debug_redacts_the_key() {
        let b = CloudHttpBackend::hosted("echodraft-1", "sk-secret");
        let s = format!("{b:?}");
        assert!(!s.contains("sk-secret"));
        assert!(s.contains("[REDACTED]"));
    }
}
