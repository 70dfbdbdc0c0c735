use crate::cloud_http::join_url;
use crate::request::HttpRequest;
use serde_json::json;

/// Bring-your-own-key cleanup: one chat-completions round trip against any
/// OpenAI-compatible endpoint (cloud or local inference server).
#[derive(Clone, PartialEq, Eq)]
pub struct CleanupHttpConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl std::fmt::Debug for CleanupHttpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupHttpConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .finish()
    }
}

pub const CLEANUP_SYSTEM_PROMPT: &str = "You clean up dictated text. Fix grammar, punctuation, \
     and capitalization. Remove filler words. Do not add content. Output only the cleaned text.";

pub fn build_cleanup_request(cfg: &CleanupHttpConfig, transcript: &str) -> HttpRequest {
    let payload = json!({
        "model": cfg.model,
        "messages": [
            {"role": "system", "content": CLEANUP_SYSTEM_PROMPT},
            {"role": "user", "content": transcript},
        ],
        "temperature": 0.2,
    });

    HttpRequest::post(join_url(&cfg.base_url, "/chat/completions"))
        .bearer(&cfg.api_key)
        .json(payload)
}

/// Hosted-tier cleanup: a single round trip to the EchoDraft Cloud reason
/// endpoint, which carries its own prompt server-side.
pub fn build_hosted_reason_request(base_url: &str, api_key: &str, transcript: &str) -> HttpRequest {
    HttpRequest::post(join_url(base_url, "/reason"))
        .bearer(api_key)
        .json(json!({ "text": transcript }))
}
