//! Session-facing entry point: resolves the cached team for a session and
//! logs the supervisor's tool calls as events.

use cofinance_core::error::{Error, LogOnError};
use cofinance_core::event::{Event, EventBus, EventType};
use cofinance_core::message::SessionId;
use cofinance_core::provider::StreamChunk;
use cofinance_memory::MemoryStore;
use std::sync::Arc;

use crate::model_agent::AgentModel;
use crate::team::{Team, TeamCache, TeamFactory, TeamKey};

pub struct Orchestrator {
    model: AgentModel,
    session: SessionId,
    thinking_mode: bool,
    bus: Arc<EventBus>,
    memory: Option<MemoryStore>,
    cache: Arc<TeamCache>,
    factory: Arc<dyn TeamFactory>,
}

impl Orchestrator {
    pub fn new(
        model: AgentModel,
        session: SessionId,
        thinking_mode: bool,
        cache: Arc<TeamCache>,
        factory: Arc<dyn TeamFactory>,
    ) -> Self {
        Self {
            model,
            session,
            thinking_mode,
            bus: Arc::new(EventBus::new()),
            memory: None,
            cache,
            factory,
        }
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = bus;
        self
    }

    /// Persist logged tool calls to `memory` as well.
    pub fn with_memory(mut self, memory: MemoryStore) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn thinking_mode(&self) -> bool {
        self.thinking_mode
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn key(&self) -> TeamKey {
        TeamKey::new(&self.model, &self.session, self.thinking_mode)
    }

    /// The team for this session, model and mode; built on first use.
    pub fn team(&self) -> Arc<Team> {
        self.cache.get_or_build(self.key(), || {
            self.factory.build(&self.model, &self.session, self.thinking_mode)
        })
    }

    /// Publish and persist one `TOOL_CALL` event per call in `chunk`.
    ///
    /// Best-effort: every call is attempted and failures are logged here.
    /// The first persistence error, if any, is returned for inspection.
    pub async fn log_tool_calls(&self, chunk: &StreamChunk) -> Result<usize, Error> {
        let mut first_error = None;
        let calls = chunk.tool_calls();

        for call in calls {
            let event = Event::new(
                self.session.clone(),
                EventType::ToolCall,
                serde_json::json!({
                    "name": call.name,
                    "arguments": call.arguments,
                }),
            );
            self.bus.publish(&event);

            if let Some(memory) = &self.memory
                && let Err(e) = memory.record_event(&event).await.log_on_error("persist tool call event")
                && first_error.is_none()
            {
                first_error = Some(e);
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(calls.len()),
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("model", &self.model)
            .field("session", &self.session)
            .field("thinking_mode", &self.thinking_mode)
            .finish()
    }
}
