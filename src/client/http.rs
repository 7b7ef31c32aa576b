//! Transport clients held by the client cache.
//!
//! Epistemic foundation:
//! - K_i: Building a client is local work (no request is sent)
//! - B_i: Endpoint string parses as an http(s) URL (might fail)
//! - B_i: API key is a valid header value (might fail)

use reqwest::Url;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use std::time::Duration;
use thiserror::Error;

/// Options for constructing an [`HttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpClientOptions {
    /// Base address every kernel route is joined onto
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Bearer token sent with every request, if any
    pub api_key: Option<String>,
}

/// Errors building an [`HttpClient`].
#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Invalid API key header value")]
    InvalidApiKey,

    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),

    #[error("Invalid route '{route}' for base URL {base}")]
    InvalidRoute { base: String, route: String },
}

/// A configured `reqwest::Client` bound to a base URL.
///
/// Cheap to clone: the inner client is reference counted, so every clone
/// shares one connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpClient {
    /// Build a client from options.
    pub fn build(options: &HttpClientOptions) -> Result<Self, HttpClientError> {
        let mut base_url =
            Url::parse(&options.base_url).map_err(|e| HttpClientError::InvalidBaseUrl {
                url: options.base_url.clone(),
                reason: e.to_string(),
            })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(HttpClientError::InvalidBaseUrl {
                url: options.base_url.clone(),
                reason: format!("unsupported scheme '{}'", base_url.scheme()),
            });
        }

        // Routes are joined relative to the base, so it must end in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        if let Some(ref api_key) = options.api_key {
            let mut value = HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|_| HttpClientError::InvalidApiKey)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let inner = reqwest::Client::builder()
            .timeout(options.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            inner,
            base_url,
            timeout: options.timeout,
        })
    }

    /// Get the underlying reqwest client.
    pub fn inner(&self) -> &reqwest::Client {
        &self.inner
    }

    /// Get the base URL (always ends in '/').
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve a route such as "api/chat" against the base URL.
    pub fn endpoint(&self, route: &str) -> Result<Url, HttpClientError> {
        self.base_url
            .join(route.trim_start_matches('/'))
            .map_err(|_| HttpClientError::InvalidRoute {
                base: self.base_url.to_string(),
                route: route.to_string(),
            })
    }
}
