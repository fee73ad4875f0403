//! Chat model providers.
//!
//! Supports OpenAI, Azure OpenAI, and any endpoint that follows the OpenAI
//! chat completions API format. The [`ChatModel`] trait covers the two calls
//! the assistant makes: answering a prompt pair and captioning an attached
//! image. [`MockChatModel`] backs tests with queued replies.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::types::{ChatCompletion, TokenUsage};

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// One-shot completion for a system prompt and a user message.
    async fn complete(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<ChatCompletion, LlmError>;

    /// Produce a searchable text description of an image.
    async fn caption_image(
        &self,
        file_name: &str,
        image_bytes: &[u8],
    ) -> Result<String, LlmError>;

    fn model_name(&self) -> &str;
}

/// Chat model backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiChatModel {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    caption_temperature: f32,
    caption_max_tokens: usize,
    max_output_tokens: usize,
    timeout: Duration,
}

impl OpenAiChatModel {
    /// Create a provider, reading the API key from the environment variable
    /// named in `config.api_key_env`. Local endpoints (localhost/127.0.0.1)
    /// get a dummy bearer token when no key is set.
    pub fn new(config: &LlmConfig, max_output_tokens: usize) -> Result<Self, LlmError> {
        let is_local = config
            .base_url
            .as_deref()
            .map(|u| u.contains("localhost") || u.contains("127.0.0.1"))
            .unwrap_or(false);

        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| is_local.then(|| "local".to_string()))
            .ok_or_else(|| LlmError::AuthFailed {
                provider: format!("chat: env var '{}' not set", config.api_key_env),
            })?;
        Ok(Self::new_with_key(config, max_output_tokens, api_key))
    }

    pub fn new_with_key(config: &LlmConfig, max_output_tokens: usize, api_key: String) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            caption_temperature: config.caption_temperature,
            caption_max_tokens: config.caption_max_tokens,
            max_output_tokens,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    async fn send_chat(&self, body: Value) -> Result<Value, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(url = %url, model = %self.model, "Sending chat completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error("chat", self.timeout.as_secs(), e))?;

        let status = response.status();
        let response_body = response.text().await.map_err(|e| LlmError::ApiRequest {
            message: format!("Failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(map_http_error("chat", status, &response_body));
        }

        serde_json::from_str(&response_body).map_err(|e| LlmError::ResponseParse {
            message: format!("Invalid JSON: {e}"),
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<ChatCompletion, LlmError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_message},
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_output_tokens,
            "stream": false,
        });

        let response = self.send_chat(body).await?;
        let text = extract_message_content(&response)?;
        Ok(ChatCompletion {
            text,
            usage: parse_usage(&response),
        })
    }

    async fn caption_image(
        &self,
        file_name: &str,
        image_bytes: &[u8],
    ) -> Result<String, LlmError> {
        let data_url = format!(
            "data:{};base64,{}",
            image_mime(file_name),
            BASE64.encode(image_bytes)
        );
        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": caption_instruction(file_name)},
                    {"type": "image_url", "image_url": {"url": data_url}},
                ],
            }],
            "temperature": self.caption_temperature,
            "max_tokens": self.caption_max_tokens,
            "stream": false,
        });

        let response = self.send_chat(body).await?;
        extract_message_content(&response)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn caption_instruction(file_name: &str) -> String {
    format!(
        "Describe this image in detail from a work/professional perspective. \
         This description will be used later for text-based search to find the \
         image or understand the situation depicted. The image filename is \
         '{file_name}'. Mention key objects, states, possible contexts, and any \
         elements relevant to GMP/SOP if applicable."
    )
}

fn image_mime(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        _ => "image/jpeg",
    }
}

/// Pull `choices[0].message.content` out of an OpenAI-format response.
fn extract_message_content(body: &Value) -> Result<String, LlmError> {
    body.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| LlmError::ResponseParse {
            message: "No message content in response".to_string(),
        })
}

fn parse_usage(body: &Value) -> Option<TokenUsage> {
    let usage = body.get("usage")?;
    let prompt_tokens = usage
        .get("prompt_tokens")
        .and_then(|t| t.as_u64())
        .unwrap_or(0) as usize;
    let completion_tokens = usage
        .get("completion_tokens")
        .and_then(|t| t.as_u64())
        .unwrap_or(0) as usize;
    let total_tokens = usage
        .get("total_tokens")
        .and_then(|t| t.as_u64())
        .map(|t| t as usize)
        .unwrap_or(prompt_tokens + completion_tokens);
    Some(TokenUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
    })
}

/// Map an HTTP status code to the appropriate LlmError.
pub(crate) fn map_http_error(provider: &str, status: reqwest::StatusCode, body: &str) -> LlmError {
    match status.as_u16() {
        401 => {
            debug!(body = %body, "Authentication failed (401)");
            LlmError::AuthFailed {
                provider: provider.to_string(),
            }
        }
        429 => {
            // Try to parse "try again in Xs" out of the error message
            let retry_secs = serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|v| {
                    v.get("error")?
                        .get("message")?
                        .as_str()
                        .map(|s| s.to_string())
                })
                .and_then(|msg| {
                    msg.rsplit("in ")
                        .next()
                        .and_then(|s| s.trim_end_matches('s').parse::<u64>().ok())
                })
                .unwrap_or(5);
            LlmError::RateLimited {
                retry_after_secs: retry_secs,
            }
        }
        status if status >= 500 => LlmError::ApiRequest {
            message: format!("Server error ({status}): {body}"),
        },
        _ => LlmError::ApiRequest {
            message: format!("HTTP {status}: {body}"),
        },
    }
}

/// Map a reqwest transport failure to the appropriate LlmError.
pub(crate) fn map_transport_error(provider: &str, timeout_secs: u64, e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout { timeout_secs }
    } else if e.is_connect() {
        LlmError::Connection {
            message: format!("{provider}: {e}"),
        }
    } else {
        LlmError::ApiRequest {
            message: format!("{provider} request failed: {e}"),
        }
    }
}

/// Scripted chat model for tests. Replies and captions are consumed in FIFO
/// order; an empty queue yields a canned response. Every `complete` call is
/// recorded so tests can inspect the prompts the pipeline built.
#[derive(Default)]
pub struct MockChatModel {
    replies: Mutex<VecDeque<Result<ChatCompletion, LlmError>>>,
    captions: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<(String, String)>>,
}

impl MockChatModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(text: &str) -> Self {
        let mock = Self::new();
        mock.queue_reply(text);
        mock
    }

    pub fn queue_reply(&self, text: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Ok(ChatCompletion {
                text: text.to_string(),
                usage: Some(TokenUsage::from_counts(10, 5)),
            }));
    }

    /// Queue a reply whose provider reported no usage block.
    pub fn queue_reply_without_usage(&self, text: &str) {
        self.replies.lock().unwrap().push_back(Ok(ChatCompletion {
            text: text.to_string(),
            usage: None,
        }));
    }

    pub fn queue_error(&self, error: LlmError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    pub fn queue_caption(&self, caption: &str) {
        self.captions
            .lock()
            .unwrap()
            .push_back(Ok(caption.to_string()));
    }

    pub fn queue_caption_error(&self, error: LlmError) {
        self.captions.lock().unwrap().push_back(Err(error));
    }

    /// All `(system_prompt, user_message)` pairs seen so far.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_system_prompt(&self) -> Option<String> {
        self.requests.lock().unwrap().last().map(|(s, _)| s.clone())
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn complete(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<ChatCompletion, LlmError> {
        self.requests
            .lock()
            .unwrap()
            .push((system_prompt.to_string(), user_message.to_string()));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(ChatCompletion {
                    text: "(mock reply)".to_string(),
                    usage: Some(TokenUsage::from_counts(10, 5)),
                })
            })
    }

    async fn caption_image(
        &self,
        file_name: &str,
        _image_bytes: &[u8],
    ) -> Result<String, LlmError> {
        self.captions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("(mock caption of {file_name})")))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}
