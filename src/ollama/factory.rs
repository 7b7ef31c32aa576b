//! Kernel factory for Ollama backends.

use crate::client::{HttpClient, HttpClientCache, HttpClientOptions};
use crate::models::{BackendConfig, ConstructionStage, PoolError, Result};
use crate::ollama::{OllamaKernel, OllamaRoute, PROVIDER, SamplingOptions, client_identity};
use crate::pool::{KernelFactory, KernelHandle};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Builds [`OllamaKernel`]s on top of shared, cached HTTP clients.
///
/// Clients are cached under [`client_identity`], so keys registered with
/// the same model, endpoint, timeout and API key share one connection pool.
#[derive(Debug, Clone)]
pub struct OllamaKernelFactory {
    clients: Arc<HttpClientCache>,
}

impl OllamaKernelFactory {
    pub fn new(clients: Arc<HttpClientCache>) -> Self {
        Self { clients }
    }
}

#[async_trait]
impl KernelFactory for OllamaKernelFactory {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    async fn create(
        &self,
        key: &str,
        config: &BackendConfig,
        cancel: &CancellationToken,
    ) -> Result<KernelHandle> {
        // Reject unsupported kinds before touching the client cache
        let route = OllamaRoute::for_kind(config.kind)?;

        let options = HttpClientOptions {
            base_url: config.endpoint.clone(),
            timeout: config.timeout(),
            api_key: config.api_key.clone(),
        };

        let client = self
            .clients
            .get_or_create(
                &client_identity(config),
                || async {
                    HttpClient::build(&options)
                        .map_err(|e| PoolError::construction(key, ConstructionStage::Client, e))
                },
                cancel,
            )
            .await?;

        let url = client
            .endpoint(route.path())
            .map_err(|e| PoolError::construction(key, ConstructionStage::Kernel, e))?;

        debug!(key = %key, url = %url, "Ollama kernel bound");

        Ok(Arc::new(OllamaKernel::new(
            config.kind,
            route,
            config.model_id.clone(),
            client,
            url,
            SamplingOptions {
                temperature: config.temperature,
                num_predict: config.max_tokens,
            },
        )))
    }
}
