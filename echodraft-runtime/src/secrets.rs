use anyhow::Context;
use echodraft_core::types::{
    PROVIDER_CUSTOM, PROVIDER_ECHODRAFT_CLOUD, PROVIDER_GROQ, PROVIDER_MISTRAL, PROVIDER_OPENAI,
    PROVIDER_STREAMING,
};

/// Where we store secrets in the OS keyring.
///
/// This is intentionally constant so upgrades don't orphan secrets.
const SERVICE: &str = "echodraft";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKey {
    OpenAiApiKey,
    GroqApiKey,
    MistralApiKey,
    CustomEndpointApiKey,
    StreamingApiKey,
    HostedApiKey,
    CleanupApiKey,
}

impl SecretKey {
    fn user(self) -> &'static str {
        match self {
            SecretKey::OpenAiApiKey => "openai_api_key",
            SecretKey::GroqApiKey => "groq_api_key",
            SecretKey::MistralApiKey => "mistral_api_key",
            SecretKey::CustomEndpointApiKey => "custom_endpoint_api_key",
            SecretKey::StreamingApiKey => "streaming_api_key",
            SecretKey::HostedApiKey => "hosted_api_key",
            SecretKey::CleanupApiKey => "cleanup_api_key",
        }
    }

    /// The transcription key slot for a provider tag, None for local models.
    pub fn for_provider(provider: &str) -> Option<Self> {
        match provider {
            PROVIDER_OPENAI => Some(SecretKey::OpenAiApiKey),
            PROVIDER_GROQ => Some(SecretKey::GroqApiKey),
            PROVIDER_MISTRAL => Some(SecretKey::MistralApiKey),
            PROVIDER_CUSTOM => Some(SecretKey::CustomEndpointApiKey),
            PROVIDER_STREAMING => Some(SecretKey::StreamingApiKey),
            PROVIDER_ECHODRAFT_CLOUD => Some(SecretKey::HostedApiKey),
            _ => None,
        }
    }
}

pub fn set_secret(key: SecretKey, value: &str) -> anyhow::Result<()> {
    let entry = keyring::Entry::new(SERVICE, key.user()).context("create keyring entry")?;
    entry.set_password(value).context("set secret")
}

pub fn get_secret(key: SecretKey) -> anyhow::Result<Option<String>> {
    let entry = keyring::Entry::new(SERVICE, key.user()).context("create keyring entry")?;

    match entry.get_password() {
        Ok(v) => Ok(Some(v)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(anyhow::Error::new(e)).context("get secret"),
    }
}

pub fn delete_secret(key: SecretKey) -> anyhow::Result<()> {
    let entry = keyring::Entry::new(SERVICE, key.user()).context("create keyring entry")?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(anyhow::Error::new(e)).context("delete secret"),
    }
}
