//! Client for the OpenAI-compatible chat-completions gateway that writes the docs.

use async_openai::{
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error};

pub const DEFAULT_DOCS_MODEL: &str = "google/gemini-2.5-flash";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Rate limit exceeded. Please try again in a moment.")]
    RateLimited,
    #[error("AI usage limit reached. Please add credits to your workspace.")]
    QuotaExhausted,
    #[error("Failed to generate documentation")]
    Upstream { status: u16, body: String },
    #[error("Failed to reach the AI gateway: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Failed to build the completion request: {0}")]
    Request(#[from] OpenAIError),
    #[error("AI gateway returned no content")]
    EmptyResponse,
    #[error("Failed to serialize the API specification: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Produces one piece of content for one prompt.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait DocGenerator: Send + Sync {
    async fn generate(&self, prompt: String) -> Result<String, GenerationError>;
}

#[derive(Deserialize)]
struct CompletionReply {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

/// A [`DocGenerator`] backed by a single non-streaming chat-completions call.
pub struct GatewayDocGenerator {
    http: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    model: String,
}

impl GatewayDocGenerator {
    /// # Arguments
    ///
    /// * `base_url` - Gateway root, e.g. `https://ai.gateway.lovable.dev/v1`.
    /// * `api_key` - Bearer credential for the gateway.
    /// * `model` - Model identifier forwarded in every request.
    pub fn new(base_url: &str, api_key: SecretString, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: model.into(),
        }
    }
}

#[async_trait]
impl DocGenerator for GatewayDocGenerator {
    async fn generate(&self, prompt: String) -> Result<String, GenerationError> {
        let message: ChatCompletionRequestMessage = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()?
            .into();
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![message])
            .build()?;

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                429 => GenerationError::RateLimited,
                402 => GenerationError::QuotaExhausted,
                code => {
                    let body = response.text().await.unwrap_or_default();
                    error!(status = code, %body, "AI gateway error");
                    GenerationError::Upstream { status: code, body }
                }
            });
        }

        let reply: CompletionReply = response.json().await?;
        debug!(choices = reply.choices.len(), "AI gateway replied");
        reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(GenerationError::EmptyResponse)
    }
}
