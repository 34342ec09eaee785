use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use tally_core::event::{ChatMessage, Role};

/// One generation request: the system prompt (including any grounding data),
/// the sanitized requester message, and prior thread history oldest-first.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub message: String,
    pub history: Vec<ChatMessage>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationReply {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Classified provider failure. Classification exists purely to drive retry
/// decisions; none of these strings are ever shown to a requester.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("provider throttled the request")]
    Throttled,
    #[error("provider returned server error {status}")]
    Upstream { status: u16 },
    #[error("network failure reaching provider: {0}")]
    Network(String),
    #[error("provider rejected credentials")]
    Auth,
    #[error("conversation exceeds the provider context window")]
    ContextTooLarge,
    #[error("provider rejected the request: {0}")]
    Invalid(String),
}

impl LlmError {
    /// Throttling, 5xx responses, and transient network failures are worth
    /// retrying; everything else fails after a single attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled | Self::Upstream { .. } | Self::Network(_))
    }

    pub fn from_status(status: u16, detail: &str) -> Self {
        match status {
            429 => Self::Throttled,
            401 | 403 => Self::Auth,
            413 => Self::ContextTooLarge,
            500..=599 => Self::Upstream { status },
            _ => Self::Invalid(format!("status {status}: {detail}")),
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationReply, LlmError>;
}

#[async_trait]
impl<T: LlmClient + ?Sized> LlmClient for Arc<T> {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationReply, LlmError> {
        (**self).generate(request).await
    }
}

/// OpenAI-compatible chat-completions client.
pub struct HttpLlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
}

impl HttpLlmClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| LlmError::Invalid(format!("http client construction failed: {err}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key,
            model: model.into(),
        })
    }

    fn wire_messages(request: &GenerationRequest) -> Vec<serde_json::Value> {
        let mut messages = vec![json!({ "role": "system", "content": request.system_prompt })];
        for entry in &request.history {
            let role = match entry.role {
                Role::Requester => "user",
                Role::Assistant => "assistant",
            };
            messages.push(json!({ "role": role, "content": entry.content }));
        }
        messages.push(json!({ "role": "user", "content": request.message }));
        messages
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationReply, LlmError> {
        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&json!({
                "model": self.model,
                "messages": Self::wire_messages(request),
            }));
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }

        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                LlmError::Network("request timed out".to_owned())
            } else {
                LlmError::Network(err.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status.as_u16(), &detail));
        }

        let payload: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| LlmError::Invalid(format!("malformed provider response: {err}")))?;

        let text = payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Invalid("provider returned no completion".to_owned()))?;

        let (input_tokens, output_tokens) = payload
            .usage
            .map(|usage| (usage.prompt_tokens, usage.completion_tokens))
            .unwrap_or((0, 0));

        Ok(GenerationReply { text, input_tokens, output_tokens })
    }
}
