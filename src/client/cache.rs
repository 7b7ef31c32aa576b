//! Identity-keyed cache of transport clients.
//!
//! Epistemic foundation:
//! - K_i: One client per identity string (e.g. "ollama:llama3.2")
//! - K_i: Construction runs at most once per identity, even when racing
//! - B_i: Construction may fail or be cancelled → nothing is cached
//! - I^R: Clients are opaque here; callers decide what an identity means

use crate::client::HttpClient;
use crate::models::{PoolError, Result};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Cache of shared HTTP clients, the one the Ollama integration uses.
pub type HttpClientCache = ClientCache<HttpClient>;

/// Memoizes client construction by identity.
///
/// Thread-safe: identities live in a `DashMap`, and each slot is a
/// `OnceCell` so concurrent callers for one identity wait on a single
/// construction instead of racing.
#[derive(Debug)]
pub struct ClientCache<C> {
    clients: DashMap<String, Arc<OnceCell<C>>>,
}

impl<C> Default for ClientCache<C> {
    fn default() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }
}

impl<C> ClientCache<C>
where
    C: Clone + Send + Sync,
{
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the client for `identity`, building it with `factory` if absent.
    ///
    /// B_i(factory succeeds) → Result
    ///
    /// A failed or cancelled build leaves no entry behind; the next caller
    /// runs its own factory.
    pub async fn get_or_create<F, Fut>(
        &self,
        identity: &str,
        factory: F,
        cancel: &CancellationToken,
    ) -> Result<C>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<C>>,
    {
        let cell = Arc::clone(self.clients.entry(identity.to_string()).or_default().value());

        if let Some(client) = cell.get() {
            return Ok(client.clone());
        }

        let init = cell.get_or_try_init(move || async move {
            debug!(identity = %identity, "Building client");
            let client = factory().await?;
            info!(identity = %identity, "Client cached");
            Ok::<_, PoolError>(client)
        });

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PoolError::Cancelled {
                key: identity.to_string(),
            }),
            result = init => result.cloned(),
        };

        if result.is_err() {
            // Drop the empty slot only if no other caller is waiting on it.
            // Holders are the map and this call; a waiter keeps its own clone
            // and may already be running the next build.
            self.clients.remove_if(identity, |_, c| {
                Arc::ptr_eq(c, &cell) && !c.initialized() && Arc::strong_count(c) == 2
            });
        }

        result
    }

    /// Get the client for `identity` if one has been built.
    pub fn get(&self, identity: &str) -> Option<C> {
        self.clients
            .get(identity)
            .and_then(|cell| cell.get().cloned())
    }

    /// Evict the client for `identity`.
    ///
    /// Returns whether anything was removed. Clones already handed out keep
    /// working; the next `get_or_create` builds a fresh client.
    pub fn remove(&self, identity: &str) -> bool {
        let removed = self.clients.remove(identity).is_some();
        if removed {
            info!(identity = %identity, "Client evicted");
        }
        removed
    }

    /// Check if a built client exists for `identity`.
    pub fn contains(&self, identity: &str) -> bool {
        self.clients
            .get(identity)
            .is_some_and(|cell| cell.initialized())
    }

    /// Number of built clients.
    pub fn len(&self) -> usize {
        self.clients.iter().filter(|c| c.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use crate::models::ConstructionStage;
    use tokio::task::JoinSet;

    fn refused(identity: &str) -> PoolError {
        PoolError::construction(
            identity,
            ConstructionStage::Client,
            std::io::Error::other("connection refused"),
        )
    }

    #[tokio::test]
    async fn test_builds_once_and_reuses() {
        let cache: ClientCache<Arc<String>> = ClientCache::new();
        let calls = AtomicUsize::new(0);
        let cancel = CancellationToken::new();

        let first = cache
            .get_or_create(
                "ollama:llama3.2",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new("client".to_string()))
                },
                &cancel,
            )
            .await
            .unwrap();
        let second = cache
            .get_or_create(
                "ollama:llama3.2",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new("other".to_string()))
                },
                &cancel,
            )
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("ollama:llama3.2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_build() {
        let cache: Arc<ClientCache<Arc<usize>>> = Arc::new(ClientCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();

        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            tasks.spawn(async move {
                cache
                    .get_or_create(
                        "ollama:shared",
                        || async move {
                            let n = calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(Arc::new(n))
                        },
                        &CancellationToken::new(),
                    )
                    .await
            });
        }

        let mut clients = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            clients.push(joined.unwrap().unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(clients.len(), 16);
        assert!(clients.iter().all(|c| Arc::ptr_eq(c, &clients[0])));
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let cache: ClientCache<u32> = ClientCache::new();
        let cancel = CancellationToken::new();

        let err = cache
            .get_or_create(
                "ollama:broken",
                || async { Err(refused("ollama:broken")) },
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::ConstructionFailed { .. }));
        assert!(cache.is_empty());
        assert!(cache.get("ollama:broken").is_none());

        let client = cache
            .get_or_create("ollama:broken", || async { Ok(7) }, &cancel)
            .await
            .unwrap();
        assert_eq!(client, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_build_keeps_slot_for_waiting_caller() {
        let cache: Arc<ClientCache<u32>> = Arc::new(ClientCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let failing = {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cache
                    .get_or_create(
                        "ollama:flaky",
                        || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Err(refused("ollama:flaky"))
                        },
                        &CancellationToken::new(),
                    )
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        let waiting = {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cache
                    .get_or_create(
                        "ollama:flaky",
                        || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok(2)
                        },
                        &CancellationToken::new(),
                    )
                    .await
            })
        };

        assert!(failing.await.unwrap().is_err());
        assert_eq!(waiting.await.unwrap().unwrap(), 2);
        assert!(cache.contains("ollama:flaky"));
        assert_eq!(cache.len(), 1);

        let third = cache
            .get_or_create("ollama:flaky", || async { Ok(3) }, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(third, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_build_is_not_cached() {
        let cache: ClientCache<u32> = ClientCache::new();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = cache
            .get_or_create(
                "ollama:slow",
                || async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(1)
                },
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Cancelled { .. }));
        assert!(!cache.contains("ollama:slow"));

        let client = cache
            .get_or_create("ollama:slow", || async { Ok(2) }, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(client, 2);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let cache: ClientCache<u32> = ClientCache::new();
        let cancel = CancellationToken::new();

        assert!(!cache.remove("ollama:absent"));

        cache
            .get_or_create("ollama:a", || async { Ok(1) }, &cancel)
            .await
            .unwrap();
        assert!(cache.remove("ollama:a"));
        assert!(!cache.remove("ollama:a"));

        let rebuilt = cache
            .get_or_create("ollama:a", || async { Ok(2) }, &cancel)
            .await
            .unwrap();
        assert_eq!(rebuilt, 2);
    }
}
