//! Model-backed agent with a streaming tool loop.
//!
//! Each run sends `system prompt + history + prompt` to the provider,
//! forwards every chunk to the caller as it arrives, executes the tool calls
//! the model asks for and feeds their results back, until the model answers
//! without tools or the round limit is hit.

use async_trait::async_trait;
use cofinance_core::agent::{Agent, AgentInput, AgentOutput};
use cofinance_core::error::ProviderError;
use cofinance_core::message::Message;
use cofinance_core::provider::{ChunkStream, Provider, ProviderRequest, StreamChunk};
use cofinance_core::tool::{ToolCall, ToolRegistry};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Who an agent is and how it should behave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentProfile {
    pub name: String,
    pub role: String,
    pub instructions: Vec<String>,
}

impl AgentProfile {
    pub fn new(name: impl Into<String>, role: impl Into<String>, instructions: Vec<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            instructions,
        }
    }

    pub fn system_prompt(&self) -> String {
        let mut prompt = format!("You are {}, {}.\n", self.name, self.role);
        if !self.instructions.is_empty() {
            prompt.push_str("\n## Instructions\n");
            for line in &self.instructions {
                prompt.push_str(line);
                prompt.push('\n');
            }
        }
        prompt
    }
}

/// A provider plus the generation settings an agent runs with.
#[derive(Clone)]
pub struct AgentModel {
    pub provider: Arc<dyn Provider>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub max_tool_rounds: u32,
}

impl AgentModel {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.3,
            max_tokens: None,
            max_tool_rounds: 8,
        }
    }

    pub fn from_config(provider: Arc<dyn Provider>, config: &cofinance_config::ModelConfig) -> Self {
        Self {
            provider,
            model: config.id.clone(),
            temperature: config.temperature,
            max_tokens: Some(config.max_tokens),
            max_tool_rounds: config.max_tool_rounds,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    /// Identity of the backing provider, used to key cached teams.
    pub fn identity(&self) -> &str {
        self.provider.name()
    }
}

impl std::fmt::Debug for AgentModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentModel")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

pub struct ModelAgent {
    profile: AgentProfile,
    model: AgentModel,
    tools: Arc<ToolRegistry>,
}

impl ModelAgent {
    pub fn new(profile: AgentProfile, model: AgentModel) -> Self {
        Self {
            profile,
            model,
            tools: Arc::new(ToolRegistry::new()),
        }
    }

    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    fn conversation(&self, input: AgentInput) -> Vec<Message> {
        let mut messages = Vec::with_capacity(input.history.len() + 2);
        messages.push(Message::system(self.profile.system_prompt()));
        messages.extend(input.history);
        messages.push(Message::user(input.prompt));
        messages
    }

    /// Start a run and return its chunk stream. Provider errors arrive as
    /// the last item of the stream.
    pub fn run_stream(&self, input: AgentInput) -> ChunkStream {
        let (tx, rx) = mpsc::channel(128);

        // ── Prepare everything we need to move into the spawned task ──
        let model = self.model.clone();
        let tools = self.tools.clone();
        let agent = self.profile.name.clone();
        let mut messages = self.conversation(input);

        tokio::spawn(async move {
            let tool_defs = tools.definitions();

            for round in 0..model.max_tool_rounds.max(1) {
                let request = ProviderRequest {
                    model: model.model.clone(),
                    messages: messages.clone(),
                    temperature: model.temperature,
                    max_tokens: model.max_tokens,
                    tools: tool_defs.clone(),
                    stream: true,
                };

                let mut stream_rx = match model.provider.stream(request).await {
                    Ok(rx) => rx,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };

                let mut content = String::new();
                let mut calls: Vec<ToolCall> = Vec::new();
                while let Some(item) = stream_rx.recv().await {
                    match item {
                        Ok(chunk) => {
                            if let Some(text) = chunk.text() {
                                content.push_str(text);
                            }
                            calls.extend_from_slice(chunk.tool_calls());
                            if tx.send(Ok(chunk)).await.is_err() {
                                debug!(agent = %agent, "Stream receiver dropped");
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }

                // ── Final answer ──
                if calls.is_empty() {
                    return;
                }

                // ── Execute tool calls ──
                messages.push(Message::assistant(content).with_tool_calls(calls.clone()));
                for call in &calls {
                    debug!(agent = %agent, tool = %call.name, round, "Executing tool");
                    let output = match tools.execute(call).await {
                        Ok(result) => result.output,
                        Err(e) => {
                            warn!(agent = %agent, tool = %call.name, "Tool failed: {e}");
                            format!("Error: {e}")
                        }
                    };
                    messages.push(Message::tool_result(call.id.clone(), output));
                }
            }

            warn!(agent = %agent, rounds = model.max_tool_rounds, "Tool round limit reached");
        });

        rx
    }

    /// Run to completion and fold every chunk into one.
    pub async fn run_to_end(&self, input: AgentInput) -> Result<Option<StreamChunk>, ProviderError> {
        let mut rx = self.run_stream(input);
        let mut text = String::new();
        let mut calls = Vec::new();
        while let Some(item) = rx.recv().await {
            let chunk = item?;
            if let Some(t) = chunk.text() {
                text.push_str(t);
            }
            calls.extend_from_slice(chunk.tool_calls());
        }
        Ok(StreamChunk::from_parts(Some(text), calls))
    }
}

#[async_trait]
impl Agent for ModelAgent {
    fn name(&self) -> &str {
        &self.profile.name
    }

    fn role(&self) -> &str {
        &self.profile.role
    }

    async fn run(&self, input: AgentInput) -> Result<AgentOutput, ProviderError> {
        if input.stream {
            return Ok(AgentOutput::Stream(self.run_stream(input)));
        }
        Ok(match self.run_to_end(input).await? {
            Some(chunk) => AgentOutput::Single(chunk),
            None => AgentOutput::Text(String::new()),
        })
    }
}

impl std::fmt::Debug for ModelAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelAgent")
            .field("name", &self.profile.name)
            .field("model", &self.model)
            .field("tools", &self.tools)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use cofinance_core::message::Role;

    fn profile() -> AgentProfile {
        AgentProfile::new("Data Analyst", "Market Data Analyst", vec!["Report numbers exactly.".into()])
    }

    #[test]
    fn system_prompt_lists_instructions() {
        let prompt = profile().system_prompt();
        assert!(prompt.starts_with("You are Data Analyst, Market Data Analyst."));
        assert!(prompt.contains("Report numbers exactly."));
    }

    #[tokio::test]
    async fn single_answer_without_tools() {
        let provider = Arc::new(SequentialMockProvider::single_text("NVDA trades at $120"));
        let agent = ModelAgent::new(profile(), AgentModel::new(provider.clone(), "mock-model"));

        let input = AgentInput::new("Get NVDA price").with_history(vec![Message::user("hi")]);
        match agent.run(input).await.unwrap() {
            AgentOutput::Single(chunk) => assert_eq!(chunk.text(), Some("NVDA trades at $120")),
            other => panic!("expected a single chunk, got {other:?}"),
        }

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        let roles: Vec<Role> = requests[0].messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::User]);
        assert_eq!(requests[0].messages[2].content, "Get NVDA price");
    }

    #[tokio::test]
    async fn tool_calls_are_executed_and_fed_back() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("get_market_data", serde_json::json!({"symbol": "NVDA"}))],
            "Fetching price",
            "NVDA is up 3%",
        ));
        let tool = Arc::new(RecordingTool::new("get_market_data", "price: 120"));
        let mut registry = ToolRegistry::new();
        registry.register(tool.clone());

        let agent = ModelAgent::new(profile(), AgentModel::new(provider.clone(), "mock-model"))
            .with_tools(Arc::new(registry));
        let mut rx = match agent.run(AgentInput::new("price?").streaming()).await.unwrap() {
            AgentOutput::Stream(rx) => rx,
            other => panic!("expected a stream, got {other:?}"),
        };

        let mut chunks = Vec::new();
        while let Some(item) = rx.recv().await {
            chunks.push(item.unwrap());
        }
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].tool_calls()[0].name, "get_market_data");
        assert_eq!(chunks[1].text(), Some("NVDA is up 3%"));
        assert_eq!(tool.calls(), 1);

        let requests = provider.requests();
        let second = &requests[1];
        let last = second.messages.last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert_eq!(last.content, "price: 120");
        assert_eq!(last.tool_call_id.as_deref(), Some("call_get_market_data"));
    }

    #[tokio::test]
    async fn unknown_tool_result_is_an_error_message() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("plot_stock_history", serde_json::json!({}))],
            "",
            "done",
        ));
        let agent = ModelAgent::new(profile(), AgentModel::new(provider.clone(), "mock-model"));
        let chunk = agent.run_to_end(AgentInput::new("chart")).await.unwrap().unwrap();
        assert_eq!(chunk.text(), Some("done"));

        let feedback = provider.requests()[1].messages.last().unwrap().content.clone();
        assert!(feedback.starts_with("Error: "), "{feedback}");
    }

    #[tokio::test]
    async fn round_limit_stops_the_loop() {
        let call = make_tool_call("get_market_data", serde_json::json!({}));
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(vec![call.clone()], "one"),
            make_tool_call_response(vec![call], "two"),
        ]));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(RecordingTool::new("get_market_data", "ok")));
        let agent = ModelAgent::new(
            profile(),
            AgentModel::new(provider.clone(), "mock-model").with_max_tool_rounds(2),
        )
        .with_tools(Arc::new(registry));

        let chunk = agent.run_to_end(AgentInput::new("loop")).await.unwrap().unwrap();
        assert_eq!(chunk.text(), Some("onetwo"));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn provider_error_surfaces() {
        let agent = ModelAgent::new(profile(), AgentModel::new(Arc::new(FailingProvider), "mock-model"));
        let err = agent.run(AgentInput::new("x")).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { .. }));
    }
}
