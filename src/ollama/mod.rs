//! Ollama registration for the kernel pool.
//!
//! Epistemic foundation:
//! - K_i: Ollama serves chat, completion and embedding kernels
//! - K_i: Transport clients are shared by backends with identical client
//!   settings (model, endpoint, timeout, API key)
//! - B_i: The requested kind is servable (checked at dispatch, not registration)
//!
//! Unregistering removes the pool entry first and the cached client second.
//! A dispatch racing with unregister may rebuild the client just before it
//! is evicted; the next build with those settings creates a fresh one.
//! Re-registering a key evicts the replaced config's client when its
//! settings changed.

mod factory;
mod kernel;

pub use factory::*;
pub use kernel::*;

use crate::client::HttpClientCache;
use crate::models::{BackendConfig, Config, Result};
use crate::pool::KernelPool;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::info;

/// Provider name reported by Ollama kernels and errors.
pub const PROVIDER: &str = "ollama";

/// Client cache identity for an Ollama backend.
///
/// Covers every setting baked into the HTTP client, so backends only share
/// a client when it would be built identically. The API key is reduced to a
/// fingerprint: `"ollama:{model}@{endpoint}#{timeout}s#{key}"`.
pub fn client_identity(config: &BackendConfig) -> String {
    let key = match &config.api_key {
        Some(api_key) => {
            let mut hasher = DefaultHasher::new();
            api_key.hash(&mut hasher);
            format!("{:x}", hasher.finish())
        }
        None => "anonymous".to_string(),
    };

    format!(
        "{PROVIDER}:{}@{}#{}s#{key}",
        config.model_id, config.endpoint, config.timeout_secs
    )
}

/// Ollama registration methods on [`KernelPool`].
pub trait KernelPoolOllamaExt {
    /// Register an Ollama backend under `key`.
    ///
    /// Only stores configuration; the HTTP client and kernel are built on
    /// first dispatch.
    fn register_ollama(&self, key: &str, config: BackendConfig, clients: &Arc<HttpClientCache>);

    /// Unregister an Ollama backend and evict its cached HTTP client.
    ///
    /// Returns whether the key was registered. Absent keys are a no-op.
    fn unregister_ollama(&self, key: &str, clients: &HttpClientCache) -> bool;

    /// Register every backend in `config`, returning how many were registered.
    ///
    /// B_i(config valid) → `PoolError::Config` otherwise; nothing is
    /// registered when any backend is invalid.
    fn register_ollama_config(
        &self,
        config: &Config,
        clients: &Arc<HttpClientCache>,
    ) -> Result<usize>;
}

impl KernelPoolOllamaExt for KernelPool {
    fn register_ollama(&self, key: &str, config: BackendConfig, clients: &Arc<HttpClientCache>) {
        let identity = client_identity(&config);
        let factory = OllamaKernelFactory::new(Arc::clone(clients));

        if let Some(previous) = self.register(key, config, Arc::new(factory)) {
            let stale = client_identity(&previous);
            if stale != identity && clients.remove(&stale) {
                info!(key = %key, identity = %stale, "Replaced Ollama client released");
            }
        }
    }

    fn unregister_ollama(&self, key: &str, clients: &HttpClientCache) -> bool {
        let Some(config) = self.unregister(key) else {
            return false;
        };

        let identity = client_identity(&config);
        if clients.remove(&identity) {
            info!(key = %key, identity = %identity, "Ollama client released");
        }
        true
    }

    fn register_ollama_config(
        &self,
        config: &Config,
        clients: &Arc<HttpClientCache>,
    ) -> Result<usize> {
        let backends = config.backend_configs()?;
        let count = backends.len();
        for (key, backend) in backends {
            self.register_ollama(&key, backend, clients);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConstructionStage, KernelKind, PoolError};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn backend(model: &str, kind: KernelKind) -> BackendConfig {
        BackendConfig::new(model, "http://localhost:11434", kind)
    }

    #[tokio::test]
    async fn test_register_is_deferred() {
        let pool = KernelPool::new();
        let clients = Arc::new(HttpClientCache::new());

        pool.register_ollama("chat", backend("llama3.2", KernelKind::Chat), &clients);

        assert!(pool.contains("chat"));
        assert!(clients.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_builds_chat_kernel() {
        let pool = KernelPool::new();
        let clients = Arc::new(HttpClientCache::new());
        let cancel = CancellationToken::new();

        let config = backend("llama3.2", KernelKind::Chat)
            .with_temperature(0.1)
            .with_max_tokens(128);
        let identity = client_identity(&config);
        pool.register_ollama("chat", config, &clients);

        let handle = pool.dispatch("chat", &cancel).await.unwrap();
        assert_eq!(handle.provider(), "ollama");
        assert_eq!(handle.kind(), KernelKind::Chat);

        let kernel = handle.as_any().downcast_ref::<OllamaKernel>().unwrap();
        assert_eq!(kernel.url().as_str(), "http://localhost:11434/api/chat");
        assert_eq!(kernel.options().temperature, Some(0.1));
        assert_eq!(kernel.options().num_predict, Some(128));
        assert!(clients.contains(&identity));
    }

    #[tokio::test]
    async fn test_keys_for_same_model_share_client() {
        let pool = KernelPool::new();
        let clients = Arc::new(HttpClientCache::new());
        let cancel = CancellationToken::new();

        pool.register_ollama("chat", backend("llama3.2", KernelKind::Chat), &clients);
        pool.register_ollama("generate", backend("llama3.2", KernelKind::Completion), &clients);
        pool.register_ollama("embed", backend("nomic-embed-text", KernelKind::Embedding), &clients);

        let generate = pool.get_or_create_handle("generate", &cancel).await.unwrap();
        pool.get_or_create_handle("chat", &cancel).await.unwrap();
        pool.get_or_create_handle("embed", &cancel).await.unwrap();

        assert_eq!(clients.len(), 2);
        let kernel = generate.as_any().downcast_ref::<OllamaKernel>().unwrap();
        assert_eq!(kernel.route(), OllamaRoute::Generate);
    }

    #[tokio::test]
    async fn test_unsupported_kind_builds_no_client() {
        let pool = KernelPool::new();
        let clients = Arc::new(HttpClientCache::new());
        let cancel = CancellationToken::new();

        pool.register_ollama("image", backend("llava", KernelKind::Image), &clients);

        let err = pool.dispatch("image", &cancel).await.unwrap_err();
        assert!(matches!(
            err,
            PoolError::UnsupportedKind {
                kind: KernelKind::Image,
                provider: "ollama"
            }
        ));
        assert!(clients.is_empty());
        assert!(pool.contains("image"));
    }

    #[tokio::test]
    async fn test_bad_endpoint_is_construction_failure() {
        let pool = KernelPool::new();
        let clients = Arc::new(HttpClientCache::new());
        let cancel = CancellationToken::new();

        let config = BackendConfig::new("llama3.2", "not a url", KernelKind::Chat);
        pool.register_ollama("chat", config, &clients);

        let err = pool.get_or_create_handle("chat", &cancel).await.unwrap_err();
        assert!(matches!(
            err,
            PoolError::ConstructionFailed {
                stage: ConstructionStage::Client,
                ..
            }
        ));
        assert!(clients.is_empty());
    }

    #[tokio::test]
    async fn test_unregister_releases_client() {
        let pool = KernelPool::new();
        let clients = Arc::new(HttpClientCache::new());
        let cancel = CancellationToken::new();

        let config = backend("llama3.2", KernelKind::Chat);
        let identity = client_identity(&config);
        pool.register_ollama("chat", config, &clients);
        let handle = pool.get_or_create_handle("chat", &cancel).await.unwrap();
        assert!(clients.contains(&identity));

        assert!(pool.unregister_ollama("chat", &clients));
        assert!(!pool.contains("chat"));
        assert!(!clients.contains(&identity));

        // Handles already given out stay usable
        let kernel = handle.as_any().downcast_ref::<OllamaKernel>().unwrap();
        assert_eq!(kernel.client().base_url().as_str(), "http://localhost:11434/");

        assert!(!pool.unregister_ollama("chat", &clients));
        let err = pool.get_or_create_handle("chat", &cancel).await.unwrap_err();
        assert!(matches!(err, PoolError::NotFound(_)));
    }

    #[test]
    fn test_client_identity_covers_client_settings() {
        let base = backend("llama3.2", KernelKind::Chat);
        let identity = client_identity(&base);
        assert!(identity.starts_with("ollama:llama3.2@http://localhost:11434#300s#"));

        // Kind and sampling options do not shape the client
        let completion = backend("llama3.2", KernelKind::Completion).with_temperature(0.2);
        assert_eq!(client_identity(&completion), identity);

        let moved = BackendConfig::new("llama3.2", "http://gpu-box:11434", KernelKind::Chat);
        assert_ne!(client_identity(&moved), identity);

        let slower = backend("llama3.2", KernelKind::Chat).with_timeout(Duration::from_secs(30));
        assert_ne!(client_identity(&slower), identity);

        let keyed = backend("llama3.2", KernelKind::Chat).with_api_key("secret-token");
        let rekeyed = backend("llama3.2", KernelKind::Chat).with_api_key("other-token");
        let keyed_identity = client_identity(&keyed);
        assert_ne!(keyed_identity, identity);
        assert_ne!(client_identity(&rekeyed), keyed_identity);
        assert!(!keyed_identity.contains("secret-token"));
    }

    #[tokio::test]
    async fn test_reregister_with_new_endpoint_rebuilds_client() {
        let pool = KernelPool::new();
        let clients = Arc::new(HttpClientCache::new());
        let cancel = CancellationToken::new();

        let first = BackendConfig::new("llama3.2", "http://host-one:11434", KernelKind::Chat);
        let first_identity = client_identity(&first);
        pool.register_ollama("k", first, &clients);
        pool.get_or_create_handle("k", &cancel).await.unwrap();
        assert!(clients.contains(&first_identity));

        let second = BackendConfig::new("llama3.2", "http://host-two:11434", KernelKind::Chat)
            .with_api_key("token");
        let second_identity = client_identity(&second);
        pool.register_ollama("k", second, &clients);

        let handle = pool.get_or_create_handle("k", &cancel).await.unwrap();
        let kernel = handle.as_any().downcast_ref::<OllamaKernel>().unwrap();
        assert_eq!(kernel.url().as_str(), "http://host-two:11434/api/chat");
        assert_eq!(kernel.client().base_url().as_str(), "http://host-two:11434/");

        assert!(!clients.contains(&first_identity));
        assert!(clients.contains(&second_identity));
        assert_eq!(clients.len(), 1);
    }

    #[tokio::test]
    async fn test_same_model_on_different_hosts_gets_separate_clients() {
        let pool = KernelPool::new();
        let clients = Arc::new(HttpClientCache::new());
        let cancel = CancellationToken::new();

        let local = backend("llama3.2", KernelKind::Chat);
        let remote = BackendConfig::new("llama3.2", "http://gpu-box:11434", KernelKind::Chat)
            .with_api_key("remote-token");
        pool.register_ollama("local", local, &clients);
        pool.register_ollama("remote", remote, &clients);

        let local = pool.get_or_create_handle("local", &cancel).await.unwrap();
        let remote = pool.get_or_create_handle("remote", &cancel).await.unwrap();
        let local = local.as_any().downcast_ref::<OllamaKernel>().unwrap();
        let remote = remote.as_any().downcast_ref::<OllamaKernel>().unwrap();

        assert_eq!(clients.len(), 2);
        assert_eq!(local.client().base_url().as_str(), "http://localhost:11434/");
        assert_eq!(remote.client().base_url().as_str(), "http://gpu-box:11434/");
    }

    #[tokio::test]
    async fn test_invalid_config_is_config_error() {
        let config: Config = toml::from_str(
            r#"
[backends.chat]
model = ""
"#,
        )
        .unwrap();

        let pool = KernelPool::new();
        let clients = Arc::new(HttpClientCache::new());

        let err = pool.register_ollama_config(&config, &clients).unwrap_err();
        assert!(matches!(err, PoolError::Config(_)));
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_register_from_config() {
        let config: Config = toml::from_str(
            r#"
[backends.chat]
model = "llama3.2"
requests_per_minute = 30

[backends.embed]
model = "nomic-embed-text"
kind = "embedding"
"#,
        )
        .unwrap();

        let pool = KernelPool::new();
        let clients = Arc::new(HttpClientCache::new());

        let count = pool.register_ollama_config(&config, &clients).unwrap();
        assert_eq!(count, 2);
        assert_eq!(pool.keys(), vec!["chat".to_string(), "embed".to_string()]);
        assert_eq!(
            pool.config("chat").unwrap().requests_per_minute,
            Some(30)
        );
    }
}
