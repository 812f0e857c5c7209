//! # CoFinance Core
//!
//! Domain types, traits, and error definitions shared by every CoFinance crate:
//! the chat message record, the agent-to-agent event protocol and bus, and the
//! `Provider`, `Tool` and `Agent` seams that the memory and agent crates
//! implement against.

pub mod agent;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod text;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{Agent, AgentInput, AgentOutput};
pub use error::{Error, LogOnError, Result};
pub use event::{AgentMessage, Event, EventBus, EventType, MessageKind};
pub use message::{Message, Role, SessionId};
pub use provider::{ChunkStream, Provider, ProviderRequest, ProviderResponse, StreamChunk};
pub use tool::{Tool, ToolCall, ToolCallRecord, ToolRegistry, ToolResult};
