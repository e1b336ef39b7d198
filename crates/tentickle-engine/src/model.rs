//! The abstract model-provider contract (spec §1: "model provider SDKs ...
//! only the abstract `ModelClient` contract is used"). Concrete vendor SDKs
//! are external collaborators; this crate ships one reference
//! implementation ([`crate::anthropic::AnthropicProvider`]) plus a generic
//! OpenAI-compatible adapter ([`crate::openai::OpenAiProvider`]) that also
//! covers self-hosted/local endpoints.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::prompt::SystemPrompt;
use crate::stream::StreamEvent;
use crate::thinking::ThinkingLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// Tool definition sent to the model (spec §4.1 step 1 render: "the active
/// tool catalogue").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A tool call extracted from the model's response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Request to a model provider. `raw_messages` carries the full multimodal
/// content-block history (text/image/tool_use/tool_result/...) built by
/// [`crate::execution`] from the compacted timeline; it is the primary path
/// once any tool call has occurred in the execution.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub system_prompt: Option<SystemPrompt>,
    pub raw_messages: Vec<serde_json::Value>,
    pub max_tokens: u32,
    pub stream: bool,
    pub thinking: Option<ThinkingLevel>,
    pub tools: Vec<ToolDefinition>,
}

/// Non-streaming response from a model provider. `blocks` preserves ordering
/// of text and tool_use blocks as the model emitted them (spec §3
/// ContentBlock — an assistant message may interleave text and tool calls).
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub blocks: Vec<ResponseBlock>,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub stop_reason: String,
}

#[derive(Debug, Clone)]
pub enum ResponseBlock {
    Text { text: String },
    ToolUse(ToolCall),
}

impl ChatResponse {
    /// Concatenated text content, in order (for previews/logging).
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ResponseBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ResponseBlock::ToolUse(tc) => Some(tc),
                _ => None,
            })
            .collect()
    }
}

/// Common interface for all model providers (spec §1 `ModelClient`
/// contract). The engine never speaks to a vendor SDK directly — only
/// through this trait.
#[async_trait]
pub trait ModelClient: Send + Sync {
    fn name(&self) -> &str;

    /// Send a non-streaming chat request, wait for the full response.
    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ModelError>;

    /// Stream response events through a channel. Default falls back to
    /// `send` and emits one `TextDelta` + `Done`.
    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ModelError> {
        let resp = self.send(req).await?;
        let _ = tx
            .send(StreamEvent::TextDelta { text: resp.text() })
            .await;
        let _ = tx
            .send(StreamEvent::Done {
                model: resp.model.clone(),
                tokens_in: resp.tokens_in,
                tokens_out: resp.tokens_out,
                stop_reason: resp.stop_reason.clone(),
            })
            .await;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl ModelError {
    /// Network/rate-limit errors are retried with backoff (spec §7); parse
    /// errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ModelError::Http(_) | ModelError::RateLimited { .. } | ModelError::Unavailable(_)
        )
    }
}

/// In-memory `ModelClient` double for tests (spec §11.5 "a local in-memory
/// fake stands in for a vendor SDK in unit tests") — stands in for
/// `AnthropicProvider`/`OpenAiProvider` wherever a test needs a model
/// without network access. Returns a queued script of responses in order;
/// the last response repeats once the queue is exhausted.
#[cfg(test)]
pub struct FakeModelClient {
    responses: std::sync::Mutex<Vec<ChatResponse>>,
}

#[cfg(test)]
impl FakeModelClient {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
        }
    }

    pub fn text_only(text: impl Into<String>) -> Self {
        Self::new(vec![ChatResponse {
            blocks: vec![ResponseBlock::Text { text: text.into() }],
            model: "fake-model".to_string(),
            tokens_in: 0,
            tokens_out: 0,
            stop_reason: "end_turn".to_string(),
        }])
    }
}

#[cfg(test)]
#[async_trait]
impl ModelClient for FakeModelClient {
    fn name(&self) -> &str {
        "fake"
    }

    async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ModelError> {
        let mut responses = self.responses.lock().unwrap();
        if responses.len() > 1 {
            Ok(responses.remove(0))
        } else {
            Ok(responses
                .first()
                .cloned()
                .unwrap_or_else(|| ChatResponse {
                    blocks: vec![],
                    model: "fake-model".to_string(),
                    tokens_in: 0,
                    tokens_out: 0,
                    stop_reason: "end_turn".to_string(),
                }))
        }
    }
}

/// Retry a model call with exponential backoff up to `max_attempts` (spec §7:
/// "Model error (network/rate): Retry with backoff up to N attempts, N=3
/// default"). Parse/protocol errors are not retried.
pub async fn send_with_retry(
    client: &dyn ModelClient,
    req: &ChatRequest,
    max_attempts: u32,
) -> Result<ChatResponse, ModelError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match client.send(req).await {
            Ok(resp) => return Ok(resp),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let backoff_ms = 250u64 * (1 << (attempt - 1));
                tracing::warn!(
                    attempt,
                    max_attempts,
                    error = %e,
                    backoff_ms,
                    "model call failed, retrying"
                );
                tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
