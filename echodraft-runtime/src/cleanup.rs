use anyhow::bail;
use async_trait::async_trait;
use echodraft_engine::traits::CleanupBackend;
use echodraft_providers::cleanup_http::{
    CleanupHttpConfig, build_cleanup_request, build_hosted_reason_request,
};
use echodraft_providers::parse::{parse_chat_completion, parse_hosted_reason};
use echodraft_providers::runtime::execute;

/// Bring-your-own-key reasoning cleanup over any OpenAI-compatible
/// chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct ByokCleanup {
    cfg: CleanupHttpConfig,
}

impl ByokCleanup {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            cfg: CleanupHttpConfig {
                base_url: base_url.into(),
                api_key: api_key.into(),
                model: model.into(),
            },
        }
    }
}

#[async_trait]
impl CleanupBackend for ByokCleanup {
    async fn cleanup(&self, text: &str) -> anyhow::Result<String> {
        let req = build_cleanup_request(&self.cfg, text);
        let resp = execute(&req).await?;
        if !resp.is_success() {
            bail!(
                "cleanup failed: status={} body={}",
                resp.status,
                resp.body_preview()
            );
        }
        Ok(parse_chat_completion(&resp.body)?.trim().to_string())
    }
}

/// Hosted-tier cleanup against the reason endpoint; the prompt lives
/// server-side.
#[derive(Clone)]
pub struct HostedCleanup {
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for HostedCleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostedCleanup")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl HostedCleanup {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl CleanupBackend for HostedCleanup {
    async fn cleanup(&self, text: &str) -> anyhow::Result<String> {
        let req = build_hosted_reason_request(&self.base_url, &self.api_key, text);
        let resp = execute(&req).await?;
        if !resp.is_success() {
            bail!(
                "hosted cleanup failed: status={} body={}",
                resp.status,
                resp.body_preview()
            );
        }
        Ok(parse_hosted_reason(&resp.body)?.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn byok_cleanup_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains("um hello"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"choices":[{"message":{"content":"  Hello.  "}}]}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let backend = ByokCleanup::new(server.uri(), "sk-test", "gpt-4o-mini");
        assert_eq!(backend.cleanup("um hello").await.unwrap(), "Hello.");
    }

    #[tokio::test]
    async fn byok_cleanup_surfaces_http_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let backend = ByokCleanup::new(server.uri(), "sk-test", "gpt-4o-mini");
        let err = backend.cleanup("hello").await.err().unwrap();
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn hosted_cleanup_hits_the_reason_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/reason"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"text":"Cleaned."}"#))
            .expect(1)
            .mount(&server)
            .await;

        let backend = HostedCleanup::new(server.uri(), "sk-test");
        assert_eq!(backend.cleanup("raw").await.unwrap(), "Cleaned.");
    }

    #[test]
    fn debug_redacts_the_key() {
        let b = HostedCleanup::new("https://cloud.echodraft.app/v1", "sk-secret");
        let s = format!("{b:?}");
        assert!(!s.contains("sk-secret"));
        assert!(s.contains("[REDACTED]"));
    }
}
