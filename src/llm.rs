//! Model access for SQL generation.
//!
//! The generator only sees [`CompletionService`]: one prompt in, the raw
//! reply text out. [`LlmClient`] implements it over HTTP and sends every
//! prompt with a fixed system instruction asking for a single read-only
//! `SELECT`, at temperature 0.
//!
//! | Provider | Endpoint | Authentication |
//! |----------|----------|----------------|
//! | OpenAI | `api.openai.com/v1/chat/completions` | Bearer token |
//! | Anthropic | `api.anthropic.com/v1/messages` | x-api-key header |
//! | Ollama | `<base_url>/api/generate` | None |
//!
//! # Transport retries
//!
//! A single completion is retried when the round trip itself failed:
//! timeouts, refused connections, 429 and 5xx responses. Other statuses and
//! unreadable bodies fail at once. Delays grow by `backoff_factor` up to
//! `max_delay_ms`. Whatever error is left reaches the workflow as a
//! generation failure.
//!
//! # Example
//!
//! ```
//! use nl2sql_guard::{
//!     config::RetryConfig,
//!     llm::{LlmClient, LlmProvider}
//! };
//!
//! let provider = LlmProvider::Ollama {
//!     base_url: "http://localhost:11434".into(),
//!     model:    "llama3.2".into()
//! };
//!
//! let client = LlmClient::with_retry_config(provider, RetryConfig::default());
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    config::RetryConfig,
    error::{AppError, AppResult, http_error, llm_api_error}
};

/// Instruction sent ahead of every generation prompt
pub const SYSTEM_INSTRUCTION: &str = "You translate analytics questions into SQL for a \
     read-only warehouse. Answer with exactly one SELECT statement and no explanation.";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_REPLY_TOKENS: u32 = 1024;

/// Model endpoint and credentials.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    /// OpenAI chat completions
    OpenAI {
        /// API key (sk-...)
        api_key: String,
        model:   String
    },
    /// Anthropic messages API
    Anthropic {
        api_key: String,
        /// Model identifier (e.g., "claude-sonnet-4-20250514")
        model:   String
    },
    /// Local Ollama instance
    Ollama {
        /// Base URL (e.g., "http://localhost:11434")
        base_url: String,
        /// Model name (e.g., "llama3.2", "sqlcoder")
        model:    String
    }
}

impl LlmProvider {
    /// Provider name used in error messages and logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenAI { .. } => "OpenAI",
            Self::Anthropic { .. } => "Anthropic",
            Self::Ollama { .. } => "Ollama"
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Self::OpenAI { model, .. }
            | Self::Anthropic { model, .. }
            | Self::Ollama { model, .. } => model
        }
    }
}

/// Text completion capability used by the SQL generator.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Complete a prompt, returning the raw model text.
    async fn complete(&self, prompt: &str) -> AppResult<String>;
}

/// HTTP completion client with transport retries.
pub struct LlmClient {
    provider:     LlmProvider,
    client:       reqwest::Client,
    retry_config: RetryConfig
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role:    &'static str,
    content: &'a str
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    model:       &'a str,
    messages:    [ChatMessage<'a>; 2],
    temperature: f32
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIReply
}

#[derive(Deserialize)]
struct OpenAIReply {
    content: Option<String>
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model:       &'a str,
    system:      &'static str,
    max_tokens:  u32,
    temperature: f32,
    messages:    [ChatMessage<'a>; 1]
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(default)]
    text: Option<String>
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model:   &'a str,
    system:  &'static str,
    prompt:  &'a str,
    stream:  bool,
    options: OllamaOptions
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String
}

/// A round trip that produced no completion
#[derive(Debug)]
enum CallFailure {
    /// Timeouts, refused connections, 429 and 5xx
    Transient(AppError),
    Permanent(AppError)
}

impl CallFailure {
    fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::Transient(http_error(err))
        } else {
            Self::Permanent(http_error(err))
        }
    }

    fn from_status(provider: &str, status: StatusCode, body: &str) -> Self {
        let error = llm_api_error(format!("{} API error {}: {}", provider, status, body));
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Self::Transient(error)
        } else {
            Self::Permanent(error)
        }
    }

    fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    fn into_error(self) -> AppError {
        match self {
            Self::Transient(error) | Self::Permanent(error) => error
        }
    }
}

impl LlmClient {
    /// Create a client with the default retry policy
    pub fn new(provider: LlmProvider) -> Self {
        Self::with_retry_config(provider, RetryConfig::default())
    }

    pub fn with_retry_config(provider: LlmProvider, retry_config: RetryConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            provider,
            client,
            retry_config
        }
    }

    pub fn provider(&self) -> &LlmProvider {
        &self.provider
    }

    async fn complete_with_retry(&self, prompt: &str) -> AppResult<String> {
        let retry = &self.retry_config;
        let mut delay = retry.initial_delay_ms;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.request_completion(prompt).await {
                Ok(text) => {
                    debug!(
                        provider = self.provider.name(),
                        attempt,
                        chars = text.len(),
                        "completion received"
                    );
                    return Ok(text);
                }
                Err(failure) if failure.is_transient() && attempt <= retry.max_retries => {
                    warn!(
                        provider = self.provider.name(),
                        attempt,
                        max_attempts = retry.max_retries + 1,
                        delay_ms = delay,
                        error = %failure.into_error(),
                        "model call failed, retrying"
                    );
                    sleep(Duration::from_millis(delay)).await;
                    delay = ((delay as f64 * retry.backoff_factor) as u64).min(retry.max_delay_ms);
                }
                Err(failure) => return Err(failure.into_error())
            }
        }
    }

    async fn request_completion(&self, prompt: &str) -> Result<String, CallFailure> {
        match &self.provider {
            LlmProvider::OpenAI {
                api_key,
                model
            } => {
                let request = OpenAIRequest {
                    model,
                    messages: [
                        ChatMessage {
                            role:    "system",
                            content: SYSTEM_INSTRUCTION
                        },
                        ChatMessage {
                            role:    "user",
                            content: prompt
                        }
                    ],
                    temperature: 0.0
                };
                let builder = self
                    .client
                    .post("https://api.openai.com/v1/chat/completions")
                    .bearer_auth(api_key);
                let reply: OpenAIResponse = self.send(builder, &request).await?;
                reply
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.message.content)
                    .ok_or_else(|| self.empty_reply())
            }
            LlmProvider::Anthropic {
                api_key,
                model
            } => {
                let request = AnthropicRequest {
                    model,
                    system: SYSTEM_INSTRUCTION,
                    max_tokens: MAX_REPLY_TOKENS,
                    temperature: 0.0,
                    messages: [ChatMessage {
                        role:    "user",
                        content: prompt
                    }]
                };
                let builder = self
                    .client
                    .post("https://api.anthropic.com/v1/messages")
                    .header("x-api-key", api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION);
                let reply: AnthropicResponse = self.send(builder, &request).await?;
                reply
                    .content
                    .into_iter()
                    .find_map(|block| block.text)
                    .ok_or_else(|| self.empty_reply())
            }
            LlmProvider::Ollama {
                base_url,
                model
            } => {
                let request = OllamaRequest {
                    model,
                    system: SYSTEM_INSTRUCTION,
                    prompt,
                    stream: false,
                    options: OllamaOptions {
                        temperature: 0.0
                    }
                };
                let url = format!("{}/api/generate", base_url.trim_end_matches('/'));
                let reply: OllamaResponse = self.send(self.client.post(url), &request).await?;
                Ok(reply.response)
            }
        }
    }

    async fn send<B, R>(&self, builder: RequestBuilder, body: &B) -> Result<R, CallFailure>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned
    {
        let response = builder
            .json(body)
            .send()
            .await
            .map_err(CallFailure::from_transport)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CallFailure::from_status(self.provider.name(), status, &text));
        }
        response
            .json()
            .await
            .map_err(|e| CallFailure::Permanent(http_error(e)))
    }

    fn empty_reply(&self) -> CallFailure {
        CallFailure::Permanent(llm_api_error(format!(
            "{} returned no completion text",
            self.provider.name()
        )))
    }
}

#[async_trait]
impl CompletionService for LlmClient {
    async fn complete(&self, prompt: &str) -> AppResult<String> {
        self.complete_with_retry(prompt).await
    }
}
