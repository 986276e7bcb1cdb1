//! Language-model collaborator.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::security::SecretValue;
use crate::state::Stage;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
}

/// A single system + user prompt exchange.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub stage: Stage,
    pub system: String,
    pub user: String,
    pub format: ResponseFormat,
}

impl CompletionRequest {
    pub fn new(stage: Stage, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            stage,
            system: system.into(),
            user: user.into(),
            format: ResponseFormat::Text,
        }
    }

    pub fn with_format(mut self, format: ResponseFormat) -> Self {
        self.format = format;
        self
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Return the raw text of the model's reply.
    async fn complete(&self, request: CompletionRequest) -> Result<String>;

    fn name(&self) -> &str;
}

pub type DynLanguageModel = Arc<dyn LanguageModel>;

/// Chat-completions client for OpenAI and API-compatible providers.
#[derive(Clone)]
pub struct OpenAiChatModel {
    client: Client,
    api_key: SecretValue,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OpenAiChatModel {
    pub fn new(api_key: SecretValue, model: impl Into<String>) -> Result<Self> {
        Self::with_timeout(api_key, model, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(
        api_key: SecretValue,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self {
            client,
            api_key,
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: model.into(),
            temperature: 0.0,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn to_chat_request<'a>(&'a self, request: &'a CompletionRequest) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            response_format: match request.format {
                ResponseFormat::Json => Some(ChatResponseFormat {
                    format_type: "json_object",
                }),
                ResponseFormat::Text => None,
            },
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.to_chat_request(&request);

        debug!(stage = %request.stage, model = %self.model, "sending chat completion");

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose())
            .json(&body)
            .send()
            .await
            .context("failed to send chat completion request")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            bail!("chat completion failed with status {status}: {error_body}");
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("failed to parse chat completion response")?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .context("chat completion returned no choices")?
            .message
            .content
            .context("chat completion returned no content")?;

        debug!(stage = %request.stage, chars = content.len(), "received chat completion");
        Ok(content)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ChatResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
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
