//! kernel-pool - Rate-limited, lazily-built kernel pool for Ollama backends.
//!
//! ## Architecture
//!
//! - **KernelPool**: Registry mapping a key to a backend config and a
//!   kernel built on first dispatch
//! - **RateLimiter**: Fixed second / minute / day windows plus a daily token
//!   budget, one per registered key
//! - **ClientCache**: Transport clients memoized by identity, shared across
//!   keys with identical client settings
//!
//! ## Lifecycle
//!
//! Register (store config) → Dispatch (limit → build once → reuse) →
//! Unregister (drop entry → evict client)
//!
//! ## Epistemic Design
//!
//! - K_i (Knowledge): Compile-time enforced invariants (types, enums)
//! - B_i (Beliefs): Runtime fallible operations (Result, Option)
//! - I^R (Resolvable): User-configurable parameters
//! - I^B (Bounded): Quotas and provider failures, surfaced to the caller

pub mod client;
pub mod models;
pub mod ollama;
pub mod pool;

// Re-exports for convenience
pub use client::{Acquire, ClientCache, HttpClient, HttpClientCache, RateLimiter, RateLimits};
pub use models::{BackendConfig, Config, KernelKind, PoolError, Result};
pub use ollama::{KernelPoolOllamaExt, OllamaKernel, OllamaKernelFactory};
pub use pool::{Kernel, KernelFactory, KernelHandle, KernelPool};
