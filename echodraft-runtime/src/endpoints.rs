use crate::secrets::{SecretKey, get_secret};
use echodraft_providers::cloud_http::resolve_base_url;
use std::collections::HashMap;
use std::sync::Mutex;

/// A provider's effective endpoint and credential for one dictation.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    pub base_url: String,
    /// Empty when no key is stored; backends treat that as unavailable.
    pub api_key: String,
}

impl std::fmt::Debug for ResolvedEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedEndpoint")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

type KeyFetcher = dyn Fn(&str) -> anyhow::Result<Option<String>> + Send + Sync;

/// Caches base-URL resolution and keyring lookups per provider. The keyring
/// round trip can prompt or block on some platforms, so it should happen
/// once per configuration, not once per dictation.
pub struct EndpointResolver {
    fetch_key: Box<KeyFetcher>,
    cache: Mutex<HashMap<(String, Option<String>), ResolvedEndpoint>>,
}

impl std::fmt::Debug for EndpointResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointResolver").finish_non_exhaustive()
    }
}

impl Default for EndpointResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointResolver {
    pub fn new() -> Self {
        Self::with_key_fetcher(|provider| match SecretKey::for_provider(provider) {
            Some(key) => get_secret(key),
            None => Ok(None),
        })
    }

    pub fn with_key_fetcher(
        fetch: impl Fn(&str) -> anyhow::Result<Option<String>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            fetch_key: Box::new(fetch),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn resolve(&self, provider: &str, custom: Option<&str>) -> anyhow::Result<ResolvedEndpoint> {
        let cache_key = (provider.to_string(), custom.map(str::to_string));

        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = cache.get(&cache_key) {
                return Ok(hit.clone());
            }
        }

        let resolved = ResolvedEndpoint {
            base_url: resolve_base_url(provider, custom),
            api_key: (self.fetch_key)(provider)?.unwrap_or_default(),
        };

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(cache_key, resolved.clone());
        Ok(resolved)
    }

    /// Drops everything cached. Call on any settings or secret change.
    pub fn invalidate(&self) {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use echodraft_core::types::{PROVIDER_CUSTOM, PROVIDER_OPENAI};
    use echodraft_providers::cloud_http::OPENAI_BASE_URL;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_resolver(counter: &'static AtomicUsize) -> EndpointResolver {
        EndpointResolver::with_key_fetcher(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Some("sk-test".into()))
        })
    }

    #[test]
    fn caches_the_keyring_lookup() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        CALLS.store(0, Ordering::SeqCst);
        let resolver = counting_resolver(&CALLS);

        let a = resolver.resolve(PROVIDER_OPENAI, None).unwrap();
        let b = resolver.resolve(PROVIDER_OPENAI, None).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.base_url, OPENAI_BASE_URL);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalidate_forces_a_fresh_lookup() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        CALLS.store(0, Ordering::SeqCst);
        let resolver = counting_resolver(&CALLS);

        resolver.resolve(PROVIDER_OPENAI, None).unwrap();
        resolver.invalidate();
        resolver.resolve(PROVIDER_OPENAI, None).unwrap();
        assert_eq!(CALLS.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn insecure_custom_endpoint_resolves_to_the_default() {
        let resolver = EndpointResolver::with_key_fetcher(|_| Ok(None));
        let r = resolver
            .resolve(PROVIDER_CUSTOM, Some("http://stt.example.com/v1"))
            .unwrap();
        assert_eq!(r.base_url, OPENAI_BASE_URL);
        assert!(r.api_key.is_empty());
    }

    #[test]
    fn debug_redacts_the_key() {
        let r = ResolvedEndpoint {
            base_url: OPENAI_BASE_URL.into(),
            api_key: "sk-secret".into(),
        };
        let s = format!("{r:?}");
        assert!(!s.contains("sk-secret"));
        assert!(s.contains("[REDACTED]"));
    }
}
