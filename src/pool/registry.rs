//! Kernel pool: the registry of backends by key.
//!
//! Epistemic foundation:
//! - K_i: One entry per key; the last registration wins
//! - K_i: Registration stores configuration only (no I/O)
//! - B_i: Key is registered at dispatch time → NotFound otherwise
//! - I^B: Provider construction may fail → surfaced, never cached

use crate::client::Acquire;
use crate::models::{BackendConfig, PoolError, Result};
use crate::pool::{KernelFactory, KernelHandle, PoolEntry};
use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Registry of kernel backends.
///
/// Provides lazily-built kernel handles by registration key.
///
/// Thread-safe: entries live in a `DashMap` of `Arc<PoolEntry>`, so
/// operations on different keys do not contend on one lock, and handle
/// construction for a key is serialized inside its entry.
///
/// # Example
///
/// ```ignore
/// use kernel_pool::{BackendConfig, KernelKind, KernelPool};
///
/// let pool = KernelPool::new();
/// let config = BackendConfig::new("llama3.2", "http://localhost:11434", KernelKind::Chat);
/// pool.register("chat", config, factory);
///
/// let kernel = pool.dispatch("chat", &CancellationToken::new()).await?;
/// ```
#[derive(Debug, Default)]
pub struct KernelPool {
    entries: DashMap<String, Arc<PoolEntry>>,
}

impl KernelPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under `key`, replacing any existing entry.
    ///
    /// A replaced entry's handle is dropped with it; the next dispatch
    /// builds from the new config. Returns the replaced config, if any.
    pub fn register(
        &self,
        key: impl Into<String>,
        config: BackendConfig,
        factory: Arc<dyn KernelFactory>,
    ) -> Option<BackendConfig> {
        let key = key.into();
        let entry = Arc::new(PoolEntry::new(key.clone(), config, factory));
        let model = entry.config().model_id.clone();
        let kind = entry.config().kind;

        match self.entries.insert(key.clone(), entry) {
            Some(previous) => {
                info!(
                    key = %key,
                    model = %model,
                    kind = %kind,
                    replaced_model = %previous.config().model_id,
                    "Kernel re-registered"
                );
                Some(previous.config().clone())
            }
            None => {
                info!(key = %key, model = %model, kind = %kind, "Kernel registered");
                None
            }
        }
    }

    /// Remove the entry for `key`.
    ///
    /// Returns the removed config, or `None` if the key was not registered.
    /// Unregistering an absent key is not an error.
    pub fn unregister(&self, key: &str) -> Option<BackendConfig> {
        match self.entries.remove(key) {
            Some((_, entry)) => {
                info!(key = %key, built = entry.is_built(), "Kernel unregistered");
                Some(entry.config().clone())
            }
            None => {
                debug!(key = %key, "Unregister of unknown key ignored");
                None
            }
        }
    }

    /// Get the kernel for `key`, building it on first use.
    ///
    /// If the entry is replaced or removed while its kernel is being built,
    /// the result is discarded and the current entry is used instead, so a
    /// returned handle always matches the config registered at return time.
    pub async fn get_or_create_handle(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<KernelHandle> {
        loop {
            let entry = self.entry(key)?;
            let handle = entry.get_or_build(cancel).await?;

            if self.is_current(key, &entry) {
                return Ok(handle);
            }

            debug!(key = %key, "Entry replaced during build, retrying");
        }
    }

    /// Admit one request through the entry's rate limiter, then return its
    /// kernel.
    ///
    /// B_i(quota available) → `PoolError::RateLimited` otherwise
    pub async fn dispatch(&self, key: &str, cancel: &CancellationToken) -> Result<KernelHandle> {
        let entry = self.entry(key)?;

        if let Acquire::Denied { retry_after } = entry.limiter().try_acquire() {
            warn!(key = %key, retry_after = ?retry_after, "Dispatch rate limited");
            return Err(PoolError::RateLimited {
                key: key.to_string(),
                retry_after,
            });
        }

        self.get_or_create_handle(key, cancel).await
    }

    /// Charge tokens used by a request against the entry's daily budget.
    pub fn record_usage(&self, key: &str, tokens: u64) -> Result<()> {
        self.entry(key)?.limiter().record_tokens(tokens);
        Ok(())
    }

    /// Get the registered config for `key`.
    pub fn config(&self, key: &str) -> Option<BackendConfig> {
        self.entries.get(key).map(|e| e.config().clone())
    }

    /// Get the entry for `key`, for inspection.
    pub fn get(&self, key: &str) -> Option<Arc<PoolEntry>> {
        self.entries.get(key).map(|e| Arc::clone(e.value()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Get all registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, key: &str) -> Result<Arc<PoolEntry>> {
        self.get(key)
            .ok_or_else(|| PoolError::NotFound(key.to_string()))
    }

    fn is_current(&self, key: &str, entry: &Arc<PoolEntry>) -> bool {
        self.entries
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current.value(), entry))
    }
}
