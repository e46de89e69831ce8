use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::prompt::PromptPair;

/// Sampling temperature for extraction calls.
pub const EXTRACTION_TEMPERATURE: f32 = 0.2;

#[derive(Error, Debug)]
pub enum ModelInvocationError {
    #[error("request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("authentication rejected ({status}): {body}")]
    Auth { status: u16, body: String },

    #[error("rate limited ({status}): {body}")]
    RateLimited { status: u16, body: String },

    #[error("provider error ({status}): {body}")]
    Provider { status: u16, body: String },

    #[error("malformed provider response: {0}")]
    MalformedEnvelope(String),

    #[error("provider returned no completion text")]
    EmptyCompletion,
}

impl ModelInvocationError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err)
        } else {
            Self::Transport(err)
        }
    }

    fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Auth { status, body },
            429 => Self::RateLimited { status, body },
            _ => Self::Provider { status, body },
        }
    }

    /// Whether repeating the identical request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) | Self::RateLimited { .. } => true,
            Self::Provider { status, .. } => *status >= 500,
            Self::Auth { .. } | Self::MalformedEnvelope(_) | Self::EmptyCompletion => false,
        }
    }
}

/// The external text-completion capability.
#[allow(async_fn_in_trait)]
pub trait CompletionModel {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
    ) -> Result<String, ModelInvocationError>;
}

/// One outbound completion per call, at the fixed extraction temperature.
/// Retrying is the caller's decision.
pub struct ModelInvoker<M> {
    model: M,
    temperature: f32,
}

impl<M: CompletionModel> ModelInvoker<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            temperature: EXTRACTION_TEMPERATURE,
        }
    }

    pub async fn invoke(&self, prompt: &PromptPair) -> Result<String, ModelInvocationError> {
        tracing::debug!(
            system_len = prompt.system.len(),
            user_len = prompt.user.len(),
            temperature = self.temperature,
            "Invoking model"
        );

        self.model
            .complete(&prompt.system, &prompt.user, self.temperature)
            .await
    }

    pub fn model(&self) -> &M {
        &self.model
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAi,
    Ollama,
}

// ---------------------------------------------------------------------------
// OpenAI chat completions
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct OpenAiClient {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(base_url: String, model: String, api_key: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
            client,
        })
    }

    fn request_body<'a>(&'a self, system: &'a str, user: &'a str, temperature: f32) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature,
        }
    }
}

fn parse_chat_response(body: &str) -> Result<String, ModelInvocationError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| ModelInvocationError::MalformedEnvelope(e.to_string()))?;

    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or(ModelInvocationError::EmptyCompletion)
}

impl CompletionModel for OpenAiClient {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
    ) -> Result<String, ModelInvocationError> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(system, user, temperature))
            .send()
            .await
            .map_err(ModelInvocationError::from_reqwest)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(ModelInvocationError::from_reqwest)?;

        if !status.is_success() {
            return Err(ModelInvocationError::from_status(status.as_u16(), body));
        }

        parse_chat_response(&body)
    }
}

// ---------------------------------------------------------------------------
// Ollama generate
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'static str, // "json" for structured output
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: String, model: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client,
        })
    }
}

impl CompletionModel for OllamaClient {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
    ) -> Result<String, ModelInvocationError> {
        let url = format!("{}/api/generate", self.base_url);

        let request = OllamaRequest {
            model: &self.model,
            system,
            prompt: user,
            stream: false,
            format: "json",
            options: OllamaOptions { temperature },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(ModelInvocationError::from_reqwest)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(ModelInvocationError::from_reqwest)?;

        if !status.is_success() {
            return Err(ModelInvocationError::from_status(status.as_u16(), body));
        }

        let ollama_response: OllamaResponse = serde_json::from_str(&body)
            .map_err(|e| ModelInvocationError::MalformedEnvelope(e.to_string()))?;

        Ok(ollama_response.response)
    }
}

/// Provider chosen at startup from configuration.
#[derive(Clone)]
pub enum LlmClient {
    OpenAi(OpenAiClient),
    Ollama(OllamaClient),
}

impl CompletionModel for LlmClient {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
    ) -> Result<String, ModelInvocationError> {
        match self {
            LlmClient::OpenAi(client) => client.complete(system, user, temperature).await,
            LlmClient::Ollama(client) => client.complete(system, user, temperature).await,
        }
    }
}
