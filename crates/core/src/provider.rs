//! Provider trait: the abstraction over LLM backends.
//!
//! A Provider sends a conversation to a model and returns either a complete
//! message or a stream of [`StreamChunk`]s. It may also produce embeddings,
//! which the retrieval index uses when available.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::Message;
use crate::tool::ToolCall;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gpt-4o")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,
}

fn default_temperature() -> f32 {
    0.7
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message
    pub message: Message,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single increment of a streamed response.
///
/// A chunk carries text, tool calls, or both at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    Text(String),
    ToolCalls(Vec<ToolCall>),
    Both { text: String, tool_calls: Vec<ToolCall> },
}

impl StreamChunk {
    /// Build the right variant from optional parts. `None` when both are empty.
    pub fn from_parts(text: Option<String>, tool_calls: Vec<ToolCall>) -> Option<Self> {
        let text = text.filter(|t| !t.is_empty());
        match (text, tool_calls.is_empty()) {
            (Some(text), true) => Some(StreamChunk::Text(text)),
            (None, false) => Some(StreamChunk::ToolCalls(tool_calls)),
            (Some(text), false) => Some(StreamChunk::Both { text, tool_calls }),
            (None, true) => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            StreamChunk::Text(text) | StreamChunk::Both { text, .. } => Some(text),
            StreamChunk::ToolCalls(_) => None,
        }
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            StreamChunk::ToolCalls(calls) | StreamChunk::Both { tool_calls: calls, .. } => calls,
            StreamChunk::Text(_) => &[],
        }
    }
}

/// Receiving half of a chunk stream.
pub type ChunkStream = mpsc::Receiver<Result<StreamChunk, ProviderError>>;

/// An embedding request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub inputs: Vec<String>,
}

/// An embedding response: one vector per input text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub embeddings: Vec<Vec<f32>>,
    pub model: String,
}

/// The core Provider trait.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a single chunk.
    async fn stream(&self, request: ProviderRequest) -> Result<ChunkStream, ProviderError> {
        let response = self.complete(request).await?;
        let (tx, rx) = mpsc::channel(1);
        let message = response.message;
        if let Some(chunk) = StreamChunk::from_parts(Some(message.content), message.tool_calls) {
            let _ = tx.send(Ok(chunk)).await;
        }
        Ok(rx)
    }

    /// Generate embeddings for the given texts.
    ///
    /// Default implementation returns an error indicating embeddings aren't supported.
    async fn embed(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        Err(ProviderError::NotConfigured(format!(
            "Provider '{}' does not support embeddings",
            self.name()
        )))
    }
}
