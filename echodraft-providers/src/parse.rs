use anyhow::{Context, anyhow};
use serde::Deserialize;

/// Transcription response body. The hosted tier adds quota fields that BYOK
/// providers never send; they deserialize to None there.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TranscriptionPayload {
    pub text: String,

    #[serde(default)]
    pub limit_reached: Option<bool>,
    #[serde(default)]
    pub words_used: Option<u64>,
    #[serde(default)]
    pub words_remaining: Option<u64>,
}

pub fn parse_transcription(body: &[u8]) -> anyhow::Result<TranscriptionPayload> {
    serde_json::from_slice(body).context("decode transcription JSON")
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

pub fn parse_chat_completion(body: &[u8]) -> anyhow::Result<String> {
    let resp: ChatResponse = serde_json::from_slice(body).context("decode chat JSON")?;
    resp.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| anyhow!("no content in chat completion response"))
}

#[derive(Debug, Deserialize)]
struct ReasonResponse {
    text: String,
}

pub fn parse_hosted_reason(body: &[u8]) -> anyhow::Result<String> {
    let resp: ReasonResponse = serde_json::from_slice(body).context("decode reason JSON")?;
    Ok(resp.text)
}
