//! A single registration in the pool.
//!
//! Epistemic foundation:
//! - K_i: Config is fixed for the entry's lifetime
//! - K_i: The handle is built at most once per entry
//! - B_i: The build may fail or be cancelled → retried on next use

use crate::client::RateLimiter;
use crate::models::{BackendConfig, PoolError, Result};
use crate::pool::{KernelFactory, KernelHandle};
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Registration state for one key: config, limiter, factory and the
/// lazily-built handle.
///
/// The handle slot is a `OnceCell`: uninitialized until the first
/// successful build, with concurrent callers awaiting the one in flight.
/// Failed or cancelled builds leave it uninitialized.
pub struct PoolEntry {
    key: String,
    config: BackendConfig,
    limiter: RateLimiter,
    factory: Arc<dyn KernelFactory>,
    handle: OnceCell<KernelHandle>,
}

impl PoolEntry {
    pub fn new(key: String, config: BackendConfig, factory: Arc<dyn KernelFactory>) -> Self {
        let limiter = RateLimiter::new(config.limits());
        Self {
            key,
            config,
            limiter,
            factory,
            handle: OnceCell::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Get the handle if it has been built.
    pub fn handle(&self) -> Option<&KernelHandle> {
        self.handle.get()
    }

    pub fn is_built(&self) -> bool {
        self.handle.initialized()
    }

    /// Get the handle, building it with the entry's factory on first use.
    pub async fn get_or_build(&self, cancel: &CancellationToken) -> Result<KernelHandle> {
        if let Some(handle) = self.handle.get() {
            return Ok(Arc::clone(handle));
        }

        let build = self.handle.get_or_try_init(|| async {
            debug!(
                key = %self.key,
                provider = self.factory.provider(),
                kind = %self.config.kind,
                model = %self.config.model_id,
                "Building kernel"
            );
            let handle = self.factory.create(&self.key, &self.config, cancel).await?;
            info!(key = %self.key, model = %self.config.model_id, "Kernel ready");
            Ok::<_, PoolError>(handle)
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PoolError::Cancelled {
                key: self.key.clone(),
            }),
            result = build => result.map(Arc::clone),
        }
    }
}

impl fmt::Debug for PoolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolEntry")
            .field("key", &self.key)
            .field("model", &self.config.model_id)
            .field("kind", &self.config.kind)
            .field("provider", &self.factory.provider())
            .field("built", &self.is_built())
            .finish()
    }
}
