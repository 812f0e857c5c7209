//! Agent-to-agent protocol and the in-process event bus.
//!
//! Agents exchange [`AgentMessage`]s; everything observable about a session
//! (tool calls, persisted messages, pinned facts) is published as an
//! [`Event`]. The bus delivers synchronously, in subscription order, and a
//! failing subscriber never prevents delivery to the rest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use tracing::warn;

use crate::error::EventError;
use crate::message::SessionId;
use crate::tool::ToolCallRecord;

/// Kind of an observable event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    ToolCall,
    ToolResult,
    AgentMessage,
    Error,
    PinFact,
    CodeExec,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ToolCall => "TOOL_CALL",
            EventType::ToolResult => "TOOL_RESULT",
            EventType::AgentMessage => "AGENT_MESSAGE",
            EventType::Error => "ERROR",
            EventType::PinFact => "PIN_FACT",
            EventType::CodeExec => "CODE_EXEC",
        }
    }
}

impl FromStr for EventType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "TOOL_CALL" => EventType::ToolCall,
            "TOOL_RESULT" => EventType::ToolResult,
            "AGENT_MESSAGE" => EventType::AgentMessage,
            "ERROR" => EventType::Error,
            "PIN_FACT" => EventType::PinFact,
            "CODE_EXEC" => EventType::CodeExec,
            other => return Err(EventError::UnknownType(other.to_string())),
        })
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An observable occurrence within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub session_id: SessionId,
    pub event_type: EventType,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(session_id: SessionId, event_type: EventType, payload: serde_json::Value) -> Self {
        Self {
            session_id,
            event_type,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Purpose of an agent-to-agent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Task,
    Result,
    Status,
}

/// A message exchanged between agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub session_id: SessionId,
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    pub kind: MessageKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    pub created_at: DateTime<Utc>,
}

impl AgentMessage {
    pub fn new(
        session_id: SessionId,
        sender: impl Into<String>,
        kind: MessageKind,
        content: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            sender: sender.into(),
            receiver: None,
            kind,
            content: content.into(),
            tool_calls: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn to(mut self, receiver: impl Into<String>) -> Self {
        self.receiver = Some(receiver.into());
        self
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCallRecord>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Wrap this message as an AGENT_MESSAGE event.
    pub fn to_event(&self) -> Event {
        Event {
            session_id: self.session_id.clone(),
            event_type: EventType::AgentMessage,
            payload: serde_json::to_value(self).unwrap_or_default(),
            timestamp: self.created_at,
        }
    }
}

/// A bus subscriber.
pub type EventHandler = Arc<dyn Fn(&Event) -> Result<(), EventError> + Send + Sync>;

/// Synchronous fan-out bus.
///
/// `publish` works on a snapshot of the subscriber list, so handlers may
/// subscribe further handlers without deadlocking; those receive the next
/// event, not the current one.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<Vec<EventHandler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Handlers are invoked in registration order.
    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&Event) -> Result<(), EventError> + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.push(Arc::new(handler));
    }

    /// Deliver an event to every handler. Returns how many accepted it.
    pub fn publish(&self, event: &Event) -> usize {
        let snapshot: Vec<EventHandler> = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let mut delivered = 0;
        for (index, handler) in snapshot.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!(handler = index, event_type = %event.event_type, "Event handler failed: {e}"),
                Err(_) => warn!(handler = index, event_type = %event.event_type, "Event handler panicked"),
            }
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
