//! Chat-completion clients that return schema-constrained JSON.
//!
//! Both adapters issue HTTP requests directly: Ollama's `/api/chat` with a `format` schema and
//! OpenAI's `/chat/completions` with a `json_schema` response format. Use
//! [`complete_structured`] to turn the raw reply into a validated Rust value.

mod structured;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::config::{Config, LlmProvider};

pub(crate) use structured::check_unit_interval;
pub use structured::{ValidateResponse, complete_structured, response_schema, strip_code_fences};

/// Errors surfaced while requesting a completion.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// Provider was unreachable or not configured.
    #[error("Completion provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate completion: {0}")]
    GenerationFailed(String),
    /// Provider reply could not be parsed or failed validation.
    #[error("Malformed completion response: {0}")]
    InvalidResponse(String),
}

/// Request sent to a completion provider.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model identifier understood by the provider.
    pub model: String,
    /// System prompt describing the task.
    pub system_prompt: String,
    /// User message carrying the task input.
    pub user_content: String,
    /// Name of the expected response type.
    pub schema_name: String,
    /// JSON schema the reply must satisfy.
    pub response_schema: Value,
}

/// Raw reply from a completion provider.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Text content of the assistant message.
    pub content: String,
    /// Model that actually served the request.
    pub model: String,
    /// Provider-reported token usage.
    pub usage: Option<Value>,
}

/// Interface implemented by chat-completion providers.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Run a single-turn completion.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError>;
}

/// Build a completion client for the loaded configuration.
pub fn get_completion_client(config: &Config) -> Arc<dyn CompletionClient> {
    match config.llm_provider {
        LlmProvider::Ollama => Arc::new(OllamaCompletionClient::new(config.ollama_url.clone())),
        LlmProvider::OpenAI => Arc::new(OpenAiCompletionClient::new(
            config.openai_base_url.clone(),
            config.openai_api_key.clone(),
        )),
    }
}

fn http_client() -> Client {
    Client::builder()
        .user_agent("doculens/completion")
        .build()
        .unwrap_or_default()
}

/// Client for the Ollama `/api/chat` endpoint.
pub struct OllamaCompletionClient {
    http: Client,
    base_url: String,
}

impl OllamaCompletionClient {
    /// Create a client against an Ollama runtime.
    pub fn new(base_url: String) -> Self {
        Self {
            http: http_client(),
            base_url,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    model: Option<String>,
    message: OllamaMessage,
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: String,
}

#[async_trait]
impl CompletionClient for OllamaCompletionClient {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        let payload = json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_content }
            ],
            "stream": false,
            "format": request.response_schema,
            "options": {
                "temperature": 0.1,
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                CompletionError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(CompletionError::ProviderUnavailable(format!(
                "Ollama endpoint {} returned 404",
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaChatResponse = response.json().await.map_err(|error| {
            CompletionError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;

        if !body.done {
            return Err(CompletionError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        let usage = match (body.prompt_eval_count, body.eval_count) {
            (None, None) => None,
            (prompt, completion) => Some(json!({
                "prompt_tokens": prompt,
                "completion_tokens": completion,
            })),
        };

        Ok(CompletionResponse {
            content: body.message.content.trim().to_string(),
            model: body.model.unwrap_or(request.model),
            usage,
        })
    }
}

/// Client for OpenAI-compatible `/chat/completions` endpoints.
pub struct OpenAiCompletionClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompletionClient {
    /// Create a client against `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            http: http_client(),
            base_url,
            api_key,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        let Some(api_key) = self.api_key.as_deref().filter(|key| !key.is_empty()) else {
            return Err(CompletionError::ProviderUnavailable(
                "OPENAI_API_KEY is not set".into(),
            ));
        };

        let payload = json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_content }
            ],
            "temperature": 0.1,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema_name,
                    "schema": request.response_schema,
                    "strict": false
                }
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                CompletionError::ProviderUnavailable(format!(
                    "failed to reach {}: {error}",
                    self.base_url
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::GenerationFailed(format!(
                "OpenAI returned {status}: {body}"
            )));
        }

        let body: OpenAiChatResponse = response.json().await.map_err(|error| {
            CompletionError::InvalidResponse(format!("failed to decode OpenAI response: {error}"))
        })?;

        let message = body
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| CompletionError::InvalidResponse("response had no choices".into()))?;

        if let Some(refusal) = message.refusal.filter(|text| !text.is_empty()) {
            return Err(CompletionError::GenerationFailed(format!(
                "model refused: {refusal}"
            )));
        }

        let content = message
            .content
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| CompletionError::InvalidResponse("empty message content".into()))?;

        Ok(CompletionResponse {
            content: content.trim().to_string(),
            model: body.model.unwrap_or(request.model),
            usage: body.usage,
        })
    }
}
