use crate::request::{Body, HttpRequest};
use echodraft_core::types::{
    PROVIDER_ECHODRAFT_CLOUD, PROVIDER_GROQ, PROVIDER_MISTRAL, PROVIDER_OPENAI,
};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const MISTRAL_BASE_URL: &str = "https://api.mistral.ai/v1";
pub const ECHODRAFT_CLOUD_BASE_URL: &str = "https://cloud.echodraft.app/v1";

pub fn default_base_url(provider: &str) -> &'static str {
    match provider {
        PROVIDER_GROQ => GROQ_BASE_URL,
        PROVIDER_MISTRAL => MISTRAL_BASE_URL,
        PROVIDER_ECHODRAFT_CLOUD => ECHODRAFT_CLOUD_BASE_URL,
        // `custom` with no usable endpoint falls back to the OpenAI default.
        _ => OPENAI_BASE_URL,
    }
}

fn is_loopback_host(url: &str) -> bool {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .is_some_and(|h| h == "localhost" || h == "127.0.0.1" || h == "::1")
}

/// Resolves the base URL for a provider, applying the secure-transport rule:
/// a custom endpoint that is not https (and not loopback, for BYOK local
/// inference servers) is silently replaced by the provider default rather
/// than surfaced as an error.
pub fn resolve_base_url(provider: &str, custom: Option<&str>) -> String {
    let Some(custom) = custom.map(str::trim).filter(|s| !s.is_empty()) else {
        return default_base_url(provider).to_string();
    };

    if custom.starts_with("https://") || is_loopback_host(custom) {
        custom.trim_end_matches('/').to_string()
    } else {
        log::warn!("rejecting insecure custom endpoint; using the default instead");
        default_base_url(provider).to_string()
    }
}

pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[derive(Clone, PartialEq, Eq)]
pub struct CloudSttConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub language: Option<String>,
    /// Vocabulary bias prompt; omitted entirely on an echo-guard retry.
    pub initial_prompt: Option<String>,
}

impl std::fmt::Debug for CloudSttConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudSttConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("language", &self.language)
            .field("initial_prompt_len", &self.initial_prompt.as_ref().map(|p| p.len()))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFile {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Builds an OpenAI-compatible `audio/transcriptions` multipart upload.
pub fn build_transcription_request(cfg: &CloudSttConfig, audio: &AudioFile) -> HttpRequest {
    let boundary = format!("Boundary-{}", uuid::Uuid::new_v4());

    let mut body: Vec<u8> = Vec::new();

    append_file(
        &mut body,
        &boundary,
        "file",
        &audio.filename,
        &audio.mime_type,
        &audio.bytes,
    );
    append_field(&mut body, &boundary, "model", &cfg.model);
    append_field(&mut body, &boundary, "temperature", "0");
    append_field(&mut body, &boundary, "response_format", "json");

    if let Some(lang) = cfg.language.as_ref().filter(|s| !s.trim().is_empty()) {
        append_field(&mut body, &boundary, "language", lang);
    }

    if let Some(prompt) = cfg.initial_prompt.as_ref().filter(|s| !s.trim().is_empty()) {
        append_field(&mut body, &boundary, "prompt", prompt);
    }

    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    let url = join_url(&cfg.base_url, "/audio/transcriptions");
    let mut req = HttpRequest::post(url)
        .bearer(&cfg.api_key)
        .header("Accept", "application/json")
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={boundary}"),
        );
    req.body = Body::MultipartFormData { boundary, bytes: body };
    req
}

fn append_field(body: &mut Vec<u8>, boundary: &str, name: &str, value: &str) {
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
    );
    body.extend_from_slice(value.as_bytes());
    body.extend_from_slice(b"\r\n");
}

fn append_file(
    body: &mut Vec<u8>,
    boundary: &str,
    name: &str,
    filename: &str,
    mime_type: &str,
    bytes: &[u8],
) {
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {mime_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(b"\r\n");
}
