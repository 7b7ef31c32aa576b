//! Kernel handles and the factories that build them.

use crate::models::{BackendConfig, KernelKind, Result};
use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A constructed, ready-to-use backend object.
pub trait Kernel: Send + Sync + fmt::Debug {
    /// Capability this kernel serves.
    fn kind(&self) -> KernelKind;

    /// Model the kernel talks to.
    fn model_id(&self) -> &str;

    /// Provider name (e.g. "ollama").
    fn provider(&self) -> &'static str;

    /// Downcast support for provider-specific access.
    fn as_any(&self) -> &dyn Any;
}

/// Shared kernel handle. Two handles for one entry are the same allocation.
pub type KernelHandle = Arc<dyn Kernel>;

/// Builds kernels for a provider.
///
/// The pool calls [`KernelFactory::create`] at most once per registered
/// entry, on first dispatch. Errors are returned to the caller unchanged and
/// are never cached, so a later dispatch runs the factory again.
#[async_trait]
pub trait KernelFactory: Send + Sync {
    /// Provider name, used in logs.
    fn provider(&self) -> &'static str;

    /// Build a kernel for `config`, registered under `key`.
    async fn create(
        &self,
        key: &str,
        config: &BackendConfig,
        cancel: &CancellationToken,
    ) -> Result<KernelHandle>;
}
