//! Agronomy chat relay to a hosted text-completion service
//!
//! The relay never fails a request because of the collaborator: a missing
//! credential yields a fixed demo reply and a failing call yields a fixed
//! apology. Only an empty message is rejected.

use async_trait::async_trait;
use plantdoc_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Reply when no credential is configured
pub const DEMO_REPLY: &str = "Hello! Full AI mode is disabled. Please configure `GEMINI_API_KEY` on the backend so I can answer intelligently.";

/// Reply when the collaborator fails
pub const APOLOGY_REPLY: &str = "Sorry, I am having trouble connecting to my AI brain right now.";

const PERSONA: &str = "You are 'Dr Plant', an expert agronomist and botanist. \
Your goal is to help users with their plants in a warm, short and concise way \
(at most 3 sentences). Never use complex markdown, keep the text plain. \
If the question has nothing to do with nature, plants or agriculture, politely say that you are only a plant expert.";

/// Chat collaborator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL of the Generative Language API
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            endpoint: default_endpoint(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// Wrap the user's message in the agronomist persona
pub fn build_prompt(message: &str) -> String {
    format!("{}\n\nUser: {}", PERSONA, message)
}

/// Hosted text completion
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Complete `prompt` and return plain text
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Backend name for logs
    fn name(&self) -> &str;
}

/// Gemini `generateContent` REST client
pub struct GeminiClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

impl GeminiClient {
    /// Create a client for `config.model` authenticated with `api_key`
    pub fn new(config: &ChatConfig, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            url: format!(
                "{}/models/{}:generateContent",
                config.endpoint.trim_end_matches('/'),
                config.model
            ),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl CompletionBackend for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let response = self
            .http
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::collaborator(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::collaborator(format!("Gemini returned {}", status)));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| Error::collaborator(format!("Malformed response: {}", e)))?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(Error::collaborator("Gemini returned no text"));
        }
        Ok(text)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

/// Outcome of a chat turn
#[derive(Debug, Clone, PartialEq)]
pub enum ChatReply {
    /// Collaborator answer with `*` stripped
    Answer(String),
    /// No credential configured
    Demo,
    /// Collaborator failed
    Unavailable,
}

impl ChatReply {
    /// `status` field of the response
    pub fn status(&self) -> &'static str {
        match self {
            Self::Answer(_) | Self::Demo => "success",
            Self::Unavailable => "error",
        }
    }

    /// `response` field of the response
    pub fn text(&self) -> &str {
        match self {
            Self::Answer(text) => text,
            Self::Demo => DEMO_REPLY,
            Self::Unavailable => APOLOGY_REPLY,
        }
    }
}

/// Routes chat messages to the configured backend, or answers in demo mode
#[derive(Clone)]
pub struct ChatRelay {
    backend: Option<Arc<dyn CompletionBackend>>,
}

impl ChatRelay {
    /// Gemini if the credential variable is set and non-empty, demo otherwise
    pub fn from_config(config: &ChatConfig) -> Result<Self> {
        match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => {
                info!("Chat relay using {} via {}", config.model, config.endpoint);
                Ok(Self::with_backend(Arc::new(GeminiClient::new(config, key.trim())?)))
            }
            _ => {
                warn!(
                    "{} is not set, chat relay runs in demo mode",
                    config.api_key_env
                );
                Ok(Self::demo())
            }
        }
    }

    /// Relay that always answers with the demo reply
    pub fn demo() -> Self {
        Self { backend: None }
    }

    /// Relay backed by `backend`
    pub fn with_backend(backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// True when no backend is configured
    pub fn is_demo(&self) -> bool {
        self.backend.is_none()
    }

    /// Backend name, or `demo`
    pub fn mode(&self) -> &str {
        self.backend.as_ref().map_or("demo", |b| b.name())
    }

    /// Answer one message. Empty or whitespace-only messages are rejected.
    pub async fn reply(&self, message: &str) -> Result<ChatReply> {
        let message = message.trim();
        if message.is_empty() {
            return Err(Error::invalid_input("The message is empty."));
        }

        let Some(backend) = &self.backend else {
            return Ok(ChatReply::Demo);
        };

        match backend.complete(&build_prompt(message)).await {
            Ok(text) => {
                debug!(backend = backend.name(), len = text.len(), "Chat reply received");
                Ok(ChatReply::Answer(text.replace('*', "")))
            }
            Err(e) => {
                error!("Chat backend {} failed: {}", backend.name(), e);
                metrics::counter!("plantdoc_errors_total", "kind" => "chat").increment(1);
                Ok(ChatReply::Unavailable)
            }
        }
    }
}
