//! Agent trait and the shapes an agent run can return.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;
use crate::provider::{ChunkStream, StreamChunk};

/// Input to one agent run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentInput {
    pub prompt: String,
    /// Prior conversation, oldest first.
    #[serde(default)]
    pub history: Vec<Message>,
    /// Ask for incremental output.
    #[serde(default)]
    pub stream: bool,
}

impl AgentInput {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }
}

/// What an agent run hands back.
///
/// Callers must accept every shape: a single complete chunk, plain text,
/// raw bytes, or a live stream of chunks.
#[derive(Debug)]
pub enum AgentOutput {
    Single(StreamChunk),
    Text(String),
    Bytes(Vec<u8>),
    Stream(ChunkStream),
}

/// A runnable agent.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Display name, e.g. "Data Analyst".
    fn name(&self) -> &str;

    /// Short role description.
    fn role(&self) -> &str {
        ""
    }

    async fn run(&self, input: AgentInput) -> Result<AgentOutput, ProviderError>;
}
