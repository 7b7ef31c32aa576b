//! Configuration models for kernel-pool.
//!
//! All I^R (resolvable ignorance) is parameterized here.
//! The user resolves these unknowns at runtime via config file.

use crate::models::{BackendConfig, DEFAULT_TIMEOUT_SECS, KernelKind};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Top-level configuration for kernel-pool.
///
/// I^R resolved: All configurable parameters are explicit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Pool-wide defaults applied to every backend
    #[serde(default)]
    pub pool: PoolSettings,

    /// Backends to register, keyed by registration key
    #[serde(default)]
    pub backends: BTreeMap<String, BackendSpec>,
}

/// Defaults shared by all backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Endpoint used when a backend does not name one
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Transport client timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_secs: default_timeout(),
        }
    }
}

/// One backend entry in the config file.
///
/// K_i: Model ID is whatever the Ollama server has pulled (e.g., "llama3.2:3b").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSpec {
    /// Model ID
    pub model: String,

    /// Endpoint override (defaults to [pool].endpoint)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Kernel kind (default: chat)
    #[serde(default)]
    pub kind: KernelKind,

    /// API key (may contain ${ENV_VAR})
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default)]
    pub requests_per_second: Option<u32>,

    #[serde(default)]
    pub requests_per_minute: Option<u32>,

    #[serde(default)]
    pub requests_per_day: Option<u32>,

    #[serde(default)]
    pub tokens_per_day: Option<u32>,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub temperature: Option<f64>,

    /// Timeout override in seconds (defaults to [pool].timeout_secs)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// B_i(file exists) → Result
    /// B_i(file is valid TOML) → Result
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Resolve API key for a backend from config or environment.
    ///
    /// B_i(api key available) → Result
    pub fn resolve_api_key(&self, name: &str) -> Result<Option<String>, ConfigError> {
        let spec = self
            .backends
            .get(name)
            .ok_or_else(|| ConfigError::BackendNotFound(name.to_string()))?;

        // Check explicit api_key
        if let Some(key) = &spec.api_key {
            return Ok(Some(expand_env_vars(key)));
        }

        // Check environment variable
        if let Some(env_var) = &spec.api_key_env {
            return std::env::var(env_var)
                .map(Some)
                .map_err(|_| ConfigError::MissingApiKey {
                    backend: name.to_string(),
                    env_var: env_var.clone(),
                });
        }

        // No API key configured (valid for local endpoints)
        Ok(None)
    }

    /// Build the registration config for one backend, applying pool defaults.
    pub fn backend_config(&self, name: &str) -> Result<BackendConfig, ConfigError> {
        let spec = self
            .backends
            .get(name)
            .ok_or_else(|| ConfigError::BackendNotFound(name.to_string()))?;

        let endpoint = spec
            .endpoint
            .as_deref()
            .map(expand_env_vars)
            .unwrap_or_else(|| self.pool.endpoint.clone());

        let config = BackendConfig {
            model_id: spec.model.clone(),
            endpoint,
            kind: spec.kind,
            api_key: self.resolve_api_key(name)?,
            requests_per_second: spec.requests_per_second,
            requests_per_minute: spec.requests_per_minute,
            requests_per_day: spec.requests_per_day,
            tokens_per_day: spec.tokens_per_day,
            max_tokens: spec.max_tokens,
            temperature: spec.temperature,
            timeout_secs: spec.timeout_secs.unwrap_or(self.pool.timeout_secs),
        };

        config.validate(name)?;
        Ok(config)
    }

    /// Build registration configs for every backend, in key order.
    pub fn backend_configs(&self) -> Result<Vec<(String, BackendConfig)>, ConfigError> {
        self.backends
            .keys()
            .map(|name| Ok((name.clone(), self.backend_config(name)?)))
            .collect()
    }

    /// Validate every backend entry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.backend_configs().map(|_| ())
    }
}

static ENV_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();

    for cap in ENV_VAR.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Configuration errors.
///
/// Epistemic origin:
/// - B_i falsified: File not found, parse error
/// - I^B materialized: Missing required values
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing API key for backend '{backend}': set {env_var} env var or api_key in config")]
    MissingApiKey { backend: String, env_var: String },

    #[error("Backend not found: '{0}' (not configured in [backends.*])")]
    BackendNotFound(String),

    #[error("Invalid backend '{name}': {reason}")]
    InvalidBackend { name: String, reason: String },
}
