//! Generation (chat completion) service abstraction
//!
//! `complete` returns a whole message and backs the query rewriter and
//! expander. `stream` returns the provider's raw server-sent-event bytes so
//! the relay can forward them untouched.

use crate::config::GenerationConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Raw bytes of a streamed completion
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// A role-tagged conversation turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".into(), content: content.into() }
    }
}

/// Per-call generation parameters
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationOptions {
    /// Parameters for the streamed, user-facing answer
    pub fn answer(config: &GenerationConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    /// Parameters for short auxiliary calls (rewrite, expansion)
    pub fn auxiliary(config: &GenerationConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.auxiliary_temperature,
            max_tokens: config.auxiliary_max_tokens,
        }
    }
}

/// Trait for chat completion providers
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Run a non-streaming completion and return the message text
    async fn complete(&self, messages: &[ChatMessage], options: &GenerationOptions) -> Result<String>;

    /// Open a streaming completion; the stream yields provider SSE bytes
    async fn stream(&self, messages: &[ChatMessage], options: &GenerationOptions) -> Result<ByteStream>;
}

// ─── OpenAI-compatible client ────────────────────────────

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
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

/// Client for `/chat/completions` on OpenAI or a compatible gateway.
///
/// `timeout` bounds a whole `complete` call. A stream is only bounded per
/// read, so a long answer that keeps producing tokens is never cut off.
pub struct OpenAiChatClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl OpenAiChatClient {
    pub fn new(api_key: String, base_url: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create generation HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            timeout,
        })
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let request = CompletionRequest {
            model: &options.model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream,
        };

        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request);
        if !stream {
            builder = builder.timeout(self.timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AppError::GenerationError {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Chat completion error");
            return Err(AppError::GenerationError {
                message: format!("API error {}", status),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatClient {
    async fn complete(&self, messages: &[ChatMessage], options: &GenerationOptions) -> Result<String> {
        let response = self.send(messages, options, false).await?;

        let body: CompletionResponse = response.json().await.map_err(|e| AppError::GenerationError {
            message: format!("Failed to parse response: {}", e),
        })?;

        Ok(body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn stream(&self, messages: &[ChatMessage], options: &GenerationOptions) -> Result<ByteStream> {
        let response = self.send(messages, options, true).await?;

        let stream = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| AppError::GenerationError {
                message: format!("Stream read error: {}", e),
            })
        });

        Ok(Box::pin(stream))
    }
}

// ─── Mock provider ───────────────────────────────────────

const MOCK_ANSWER: &str = "This is a mock answer assembled without contacting a model provider. \
The retrieved passages were used only to build the prompt.\n\n\
ANSWER_TYPE: INFERRED\n\
SOURCES:\n\
- Mock Source — Local development";

/// Offline provider with canned, well-formed output
#[derive(Debug, Default)]
pub struct MockLanguageModel;

#[async_trait]
impl LanguageModel for MockLanguageModel {
    /// Always empty, so rewrite and expansion fall back to their input
    async fn complete(&self, _messages: &[ChatMessage], _options: &GenerationOptions) -> Result<String> {
        Ok(String::new())
    }

    async fn stream(&self, _messages: &[ChatMessage], _options: &GenerationOptions) -> Result<ByteStream> {
        let mut frames: Vec<Result<Bytes>> = MOCK_ANSWER
            .split_inclusive(' ')
            .map(|piece| {
                let chunk = serde_json::json!({ "choices": [{ "delta": { "content": piece } }] });
                Ok(Bytes::from(format!("data: {}\n\n", chunk)))
            })
            .collect();
        frames.push(Ok(Bytes::from_static(b"data: [DONE]\n\n")));

        Ok(Box::pin(futures::stream::iter(frames)))
    }
}

/// Create a language model client based on configuration
pub fn create_language_model(config: &GenerationConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "openai" => {
            let key = config
                .api_key
                .clone()
                .ok_or_else(|| AppError::Configuration {
                    message: "generation.api_key is required for the openai provider".to_string(),
                })?;
            Ok(Arc::new(OpenAiChatClient::new(
                key,
                config.api_base.clone(),
                Duration::from_secs(config.timeout_secs),
            )?))
        }
        "mock" => Ok(Arc::new(MockLanguageModel)),
        other => Err(AppError::Configuration {
            message: format!("Unknown generation provider: {}", other),
        }),
    }
}
