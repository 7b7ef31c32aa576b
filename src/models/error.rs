//! Error types for kernel-pool.
//!
//! Epistemic taxonomy:
//! - B_i falsified: Expected failures (not registered, unsupported kind)
//! - I^B materialized: Quota exhaustion, provider construction failures

use crate::models::KernelKind;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Boxed provider error carried by [`PoolError::ConstructionFailed`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for kernel-pool.
#[derive(Debug, Error)]
pub enum PoolError {
    // ═══════════════════════════════════════════════════════════════════
    // B_i FALSIFIED — Belief proven wrong (expected failures)
    // ═══════════════════════════════════════════════════════════════════

    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Kernel not registered: '{0}'")]
    NotFound(String),

    #[error("Unsupported kernel kind '{kind}' for {provider} registration")]
    UnsupportedKind {
        kind: KernelKind,
        provider: &'static str,
    },

    // ═══════════════════════════════════════════════════════════════════
    // I^B MATERIALIZED — Bounded ignorance became known-bad
    // ═══════════════════════════════════════════════════════════════════

    #[error("Rate limited for '{key}': retry after {retry_after:?}")]
    RateLimited { key: String, retry_after: Duration },

    #[error("Failed to construct {stage} for '{key}': {source}")]
    ConstructionFailed {
        key: String,
        stage: ConstructionStage,
        #[source]
        source: BoxError,
    },

    #[error("Cancelled while building '{key}'")]
    Cancelled { key: String },
}

/// Which step of kernel construction failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructionStage {
    /// Building or fetching the cached transport client
    Client,
    /// Building the kernel handle on top of the client
    Kernel,
}

impl fmt::Display for ConstructionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstructionStage::Client => write!(f, "client"),
            ConstructionStage::Kernel => write!(f, "kernel"),
        }
    }
}

impl PoolError {
    /// Wrap a provider error with the key and stage it came from.
    pub fn construction(
        key: impl Into<String>,
        stage: ConstructionStage,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::ConstructionFailed {
            key: key.into(),
            stage,
            source: source.into(),
        }
    }

    /// Check if this error is retryable.
    ///
    /// Construction failures are surfaced as-is; retrying them is the
    /// caller's decision, so they are not reported as retryable here.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Cancelled { .. })
    }

    /// Get retry delay hint, if applicable.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Result type alias for kernel-pool.
pub type Result<T> = std::result::Result<T, PoolError>;
