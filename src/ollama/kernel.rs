//! Ollama kernel handles and their request payloads.
//!
//! Epistemic foundation:
//! - K_i: Ollama serves chat, generate and embed routes
//! - K_i: Sampling options map to `temperature` and `num_predict`
//! - I^R: Sending the request is the caller's business

use crate::client::HttpClient;
use crate::models::{KernelKind, PoolError, Result};
use crate::ollama::PROVIDER;
use crate::pool::Kernel;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::any::Any;

/// Message in a chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Ollama HTTP route serving a kernel kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OllamaRoute {
    Chat,
    Generate,
    Embed,
}

impl OllamaRoute {
    /// Map a kernel kind to the route that serves it.
    ///
    /// Ollama has no image or audio endpoints; those kinds are rejected here
    /// rather than falling through to a default route.
    pub fn for_kind(kind: KernelKind) -> Result<Self> {
        match kind {
            KernelKind::Chat => Ok(OllamaRoute::Chat),
            KernelKind::Completion => Ok(OllamaRoute::Generate),
            KernelKind::Embedding => Ok(OllamaRoute::Embed),
            KernelKind::Image | KernelKind::Audio => Err(PoolError::UnsupportedKind {
                kind,
                provider: PROVIDER,
            }),
        }
    }

    /// Path relative to the server base URL.
    pub fn path(&self) -> &'static str {
        match self {
            OllamaRoute::Chat => "api/chat",
            OllamaRoute::Generate => "api/generate",
            OllamaRoute::Embed => "api/embed",
        }
    }
}

/// Sampling options sent with chat and generate requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SamplingOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

impl SamplingOptions {
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.num_predict.is_none()
    }
}

/// `/api/chat` payload.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub stream: bool,
    #[serde(skip_serializing_if = "SamplingOptions::is_empty")]
    pub options: SamplingOptions,
}

/// `/api/generate` payload.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub stream: bool,
    #[serde(skip_serializing_if = "SamplingOptions::is_empty")]
    pub options: SamplingOptions,
}

/// `/api/embed` payload.
#[derive(Debug, Clone, Serialize)]
pub struct EmbedRequest {
    pub model: String,
    pub input: String,
}

/// Request body for whichever route a kernel serves.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OllamaRequest {
    Chat(ChatRequest),
    Generate(GenerateRequest),
    Embed(EmbedRequest),
}

/// A kernel bound to one Ollama model and route.
///
/// Holds a clone of the cached HTTP client, so it keeps working after the
/// cache entry is evicted.
#[derive(Debug, Clone)]
pub struct OllamaKernel {
    kind: KernelKind,
    route: OllamaRoute,
    model_id: String,
    client: HttpClient,
    url: Url,
    options: SamplingOptions,
}

impl OllamaKernel {
    pub(crate) fn new(
        kind: KernelKind,
        route: OllamaRoute,
        model_id: String,
        client: HttpClient,
        url: Url,
        options: SamplingOptions,
    ) -> Self {
        Self {
            kind,
            route,
            model_id,
            client,
            url,
            options,
        }
    }

    pub fn route(&self) -> OllamaRoute {
        self.route
    }

    /// Full URL requests for this kernel go to.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Shared transport client.
    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    pub fn options(&self) -> SamplingOptions {
        self.options
    }

    /// Build the request body for a single prompt.
    pub fn request(&self, prompt: &str) -> OllamaRequest {
        self.build_request(None, prompt)
    }

    /// Build the request body for a system prompt plus a user prompt.
    ///
    /// Embedding requests have no system slot; the system prompt is dropped.
    pub fn request_with_system(&self, system: &str, prompt: &str) -> OllamaRequest {
        self.build_request(Some(system), prompt)
    }

    /// Build a chat request from a full message history.
    ///
    /// Non-chat kernels receive the last user message as their prompt.
    pub fn chat_request(&self, messages: Vec<Message>) -> OllamaRequest {
        match self.route {
            OllamaRoute::Chat => OllamaRequest::Chat(ChatRequest {
                model: self.model_id.clone(),
                messages,
                stream: false,
                options: self.options,
            }),
            OllamaRoute::Generate | OllamaRoute::Embed => {
                let prompt = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == "user")
                    .map(|m| m.content.as_str())
                    .unwrap_or_default();
                self.build_request(None, prompt)
            }
        }
    }

    fn build_request(&self, system: Option<&str>, prompt: &str) -> OllamaRequest {
        match self.route {
            OllamaRoute::Chat => {
                let mut messages = Vec::with_capacity(2);
                if let Some(system) = system {
                    messages.push(Message::system(system));
                }
                messages.push(Message::user(prompt));
                OllamaRequest::Chat(ChatRequest {
                    model: self.model_id.clone(),
                    messages,
                    stream: false,
                    options: self.options,
                })
            }
            OllamaRoute::Generate => OllamaRequest::Generate(GenerateRequest {
                model: self.model_id.clone(),
                prompt: prompt.to_string(),
                system: system.map(str::to_string),
                stream: false,
                options: self.options,
            }),
            OllamaRoute::Embed => OllamaRequest::Embed(EmbedRequest {
                model: self.model_id.clone(),
                input: prompt.to_string(),
            }),
        }
    }
}

impl Kernel for OllamaKernel {
    fn kind(&self) -> KernelKind {
        self.kind
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
