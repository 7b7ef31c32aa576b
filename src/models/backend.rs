//! Backend descriptions stored by the pool.
//!
//! Epistemic foundation:
//! - K_i: A backend is fully described at registration time (immutable)
//! - K_i: Kernel kind is a closed enumeration
//! - B_i: The provider can build the requested kind (checked at dispatch)

use crate::client::RateLimits;
use crate::models::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Category of model capability requested from a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelKind {
    /// Chat completion (message list in, message out)
    #[default]
    Chat,
    /// Raw text generation (prompt in, text out)
    Completion,
    /// Embedding generation (text in, vector out)
    Embedding,
    /// Image generation
    Image,
    /// Audio transcription / synthesis
    Audio,
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelKind::Chat => write!(f, "chat"),
            KernelKind::Completion => write!(f, "completion"),
            KernelKind::Embedding => write!(f, "embedding"),
            KernelKind::Image => write!(f, "image"),
            KernelKind::Audio => write!(f, "audio"),
        }
    }
}

/// Default transport timeout for backend clients.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Immutable description of one registered backend.
///
/// Built once at registration and never mutated afterwards; the pool only
/// hands out shared references to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Model identifier as the provider knows it (e.g. "llama3.2")
    pub model_id: String,
    /// Base URI of the provider endpoint
    pub endpoint: String,
    /// Capability requested from the model
    pub kind: KernelKind,
    /// API key (optional, local endpoints usually have none)
    #[serde(default)]
    pub api_key: Option<String>,
    /// Request cap per second
    #[serde(default)]
    pub requests_per_second: Option<u32>,
    /// Request cap per minute
    #[serde(default)]
    pub requests_per_minute: Option<u32>,
    /// Request cap per day
    #[serde(default)]
    pub requests_per_day: Option<u32>,
    /// Token budget per day
    #[serde(default)]
    pub tokens_per_day: Option<u32>,
    /// Maximum output tokens per request
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Transport client timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl BackendConfig {
    /// Create a config with no limits or sampling overrides.
    pub fn new(model_id: impl Into<String>, endpoint: impl Into<String>, kind: KernelKind) -> Self {
        Self {
            model_id: model_id.into(),
            endpoint: endpoint.into(),
            kind,
            api_key: None,
            requests_per_second: None,
            requests_per_minute: None,
            requests_per_day: None,
            tokens_per_day: None,
            max_tokens: None,
            temperature: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the per-second, per-minute and per-day request caps.
    pub fn with_request_caps(
        mut self,
        per_second: Option<u32>,
        per_minute: Option<u32>,
        per_day: Option<u32>,
    ) -> Self {
        self.requests_per_second = per_second;
        self.requests_per_minute = per_minute;
        self.requests_per_day = per_day;
        self
    }

    pub fn with_tokens_per_day(mut self, tokens: u32) -> Self {
        self.tokens_per_day = Some(tokens);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    /// Transport client timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Limits for this backend's rate limiter.
    pub fn limits(&self) -> RateLimits {
        RateLimits {
            requests_per_second: self.requests_per_second,
            requests_per_minute: self.requests_per_minute,
            requests_per_day: self.requests_per_day,
            tokens_per_day: self.tokens_per_day,
        }
    }

    /// Check the config for values no provider could accept.
    ///
    /// Registration itself never calls this: the pool stores whatever it is
    /// given and problems surface at dispatch. Config loading and the CLI
    /// validate up front.
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidBackend {
            name: name.to_string(),
            reason,
        };

        if self.model_id.trim().is_empty() {
            return Err(invalid("model id is empty".to_string()));
        }

        let url = reqwest::Url::parse(&self.endpoint)
            .map_err(|e| invalid(format!("endpoint '{}' is not a valid URL: {e}", self.endpoint)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!(
                "endpoint scheme '{}' is not http or https",
                url.scheme()
            )));
        }

        for (label, cap) in [
            ("requests_per_second", self.requests_per_second),
            ("requests_per_minute", self.requests_per_minute),
            ("requests_per_day", self.requests_per_day),
            ("tokens_per_day", self.tokens_per_day),
            ("max_tokens", self.max_tokens),
        ] {
            if cap == Some(0) {
                return Err(invalid(format!("{label} must be greater than zero")));
            }
        }

        if let Some(t) = self.temperature {
            if !t.is_finite() || t < 0.0 {
                return Err(invalid(format!("temperature {t} must be a non-negative number")));
            }
        }

        if self.timeout_secs == 0 {
            return Err(invalid("timeout_secs must be greater than zero".to_string()));
        }

        Ok(())
    }
}
