//! One user turn, end to end.
//!
//! reset turn state → persist the prompt and what it mentions → recall
//! context → stream the supervisor through the reasoning processor while
//! logging its tool calls → surface the specialists' tool calls → persist
//! the answer → compact the history.

use cofinance_config::AppConfig;
use cofinance_core::agent::{AgentInput, AgentOutput};
use cofinance_core::error::{LogOnError, ProviderError};
use cofinance_core::message::{Role, SessionId};
use cofinance_core::provider::{ChunkStream, Provider, StreamChunk};
use cofinance_memory::{ContextRecall, Embedder, HashingEmbedder, MemoryStore, ProviderEmbedder, RecalledContext, extract_entities};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::activity::ToolActivity;
use crate::compaction::{CompactionOutcome, HistoryCompactor, MemoryAgent};
use crate::model_agent::AgentModel;
use crate::orchestrator::Orchestrator;
use crate::reasoning::{ReasoningProcessor, final_cleanup};
use crate::team::{MarketTeamFactory, TeamCache};

/// Shown instead of an answer that came out empty after cleanup.
pub const EMPTY_RESPONSE_NOTICE: &str = "⚠️ The analysis completed but produced no output. This may indicate:\n\n\
1. The model quota is exhausted\n\
2. The query was too complex\n\
3. A configuration issue with the selected LLM provider\n\n\
Please try:\n\
- Switching to a different LLM provider\n\
- Simplifying your query\n\
- Checking your API key/quota\n";

const TICKER_ENTITY: &str = "ticker";
const INTENT_FACT: &str = "intent";
const INTENT_SCORE: f64 = 0.9;
const HISTORY_WINDOW: usize = 20;

/// Everything a turn produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    /// Cleaned answer, as persisted.
    pub response: String,
    /// De-duplicated "Thinking" entries.
    pub reasoning: String,
    /// Markdown summary of delegations and tool calls.
    pub activity: String,
    pub agents_active: Vec<String>,
    pub tool_calls: Vec<ToolActivity>,
    pub context: RecalledContext,
    pub compaction: CompactionOutcome,
}

pub struct TurnRunner {
    orchestrator: Orchestrator,
    memory: MemoryStore,
    recall: ContextRecall,
    compactor: HistoryCompactor,
    history_window: usize,
}

impl TurnRunner {
    pub fn new(orchestrator: Orchestrator, memory: MemoryStore, recall: ContextRecall, compactor: HistoryCompactor) -> Self {
        Self {
            orchestrator,
            memory,
            recall,
            compactor,
            history_window: HISTORY_WINDOW,
        }
    }

    /// Wire a runner from configuration. `factory` supplies the host's
    /// tools; the `[delegation]` budget is applied on top.
    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn Provider>,
        memory: MemoryStore,
        session: SessionId,
        cache: Arc<TeamCache>,
        factory: MarketTeamFactory,
    ) -> Self {
        if provider.name() != config.model.provider {
            warn!(
                configured = %config.model.provider,
                supplied = provider.name(),
                "Provider differs from [model] provider"
            );
        }
        let model = AgentModel::from_config(provider.clone(), &config.model);

        let embedder: Arc<dyn Embedder> = match &config.retrieval.embedding_model {
            Some(name) => Arc::new(ProviderEmbedder::new(provider, name.clone(), config.retrieval.dimension)),
            None => Arc::new(HashingEmbedder::new(config.retrieval.dimension)),
        };
        let recall = ContextRecall::new(memory.clone(), embedder, config.retrieval.clone());

        let summarizer = Arc::new(MemoryAgent::new(model.clone(), config.compaction.summary_max_tokens));
        let compactor = HistoryCompactor::new(memory.clone(), summarizer, config.compaction.clone());

        let factory = factory.with_delegation_budget(config.delegation.max_calls_per_turn);
        let orchestrator = Orchestrator::new(model, session, config.model.thinking_mode, cache, Arc::new(factory))
            .with_memory(memory.clone());

        Self::new(orchestrator, memory, recall, compactor)
    }

    /// How many stored messages are replayed to the supervisor.
    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn session(&self) -> &SessionId {
        self.orchestrator.session()
    }

    /// Run one turn. Only a failing supervisor run is an error; every
    /// bookkeeping step is best-effort.
    pub async fn run_turn(&self, prompt: &str) -> Result<TurnReport, ProviderError> {
        let session = self.orchestrator.session().clone();
        let team = self.orchestrator.team();
        team.begin_turn();

        let history = self
            .memory
            .get_messages(&session, Some(self.history_window))
            .await
            .log_on_error("load history")
            .unwrap_or_default();

        self.remember_prompt(&session, prompt).await;

        let context = self.recall.recall(&session, prompt).await;
        let input = AgentInput::new(context.compose_prompt(prompt))
            .with_history(history)
            .streaming();

        let mut chunks = into_chunks(team.supervisor.run(input).await?);
        let mut processor = ReasoningProcessor::new();
        while let Some(item) = chunks.recv().await {
            let chunk = item?;
            if let Some(text) = chunk.text() {
                processor.push(text);
            }
            let calls = chunk.tool_calls();
            if !calls.is_empty() {
                for call in calls {
                    team.tracker.log_tool_call(&call.name, call.argument_map(), None);
                }
                let _ = self.orchestrator.log_tool_calls(&chunk).await;
            }
        }

        for call in team.delegated.drain() {
            team.tracker.log_tool_call(&call.tool, call.arguments, Some(&call.agent));
        }

        let mut response = final_cleanup(&processor.finish());
        if response.trim().is_empty() {
            response = EMPTY_RESPONSE_NOTICE.to_string();
        }

        self.remember_answer(&session, &response).await;
        let compaction = self.compactor.compact(&session).await;

        info!(
            session_id = %session,
            thoughts = processor.thoughts().len(),
            tool_calls = team.tracker.tool_calls().len(),
            "Turn complete"
        );
        Ok(TurnReport {
            response,
            reasoning: processor.thoughts().as_str().to_string(),
            activity: team.tracker.format(),
            agents_active: team.tracker.agents_active(),
            tool_calls: team.tracker.tool_calls(),
            context,
            compaction,
        })
    }

    async fn remember_prompt(&self, session: &SessionId, prompt: &str) {
        let _ = self
            .memory
            .save_message(session, Role::User, prompt)
            .await
            .log_on_error("save user message");

        let found = extract_entities(prompt);
        for ticker in &found.tickers {
            let _ = self
                .memory
                .add_entity(session, TICKER_ENTITY, ticker)
                .await
                .log_on_error("save ticker entity");
        }
        for intent in &found.intents {
            let _ = self
                .memory
                .add_fact(session, INTENT_FACT, intent, INTENT_SCORE)
                .await
                .log_on_error("save intent fact");
        }
        debug!(session_id = %session, tickers = ?found.tickers, intents = ?found.intents, "Prompt remembered");
    }

    async fn remember_answer(&self, session: &SessionId, response: &str) {
        let _ = self
            .memory
            .save_message(session, Role::Assistant, response)
            .await
            .log_on_error("save assistant message");

        for ticker in extract_entities(response).tickers {
            let _ = self
                .memory
                .add_entity(session, TICKER_ENTITY, &ticker)
                .await
                .log_on_error("save ticker entity");
        }
    }
}

/// Present any output shape as a stream.
fn into_chunks(output: AgentOutput) -> ChunkStream {
    let chunk = match output {
        AgentOutput::Stream(rx) => return rx,
        AgentOutput::Single(chunk) => Some(chunk),
        AgentOutput::Text(text) => StreamChunk::from_parts(Some(text), Vec::new()),
        AgentOutput::Bytes(bytes) => {
            StreamChunk::from_parts(Some(String::from_utf8_lossy(&bytes).into_owned()), Vec::new())
        }
    };
    let (tx, rx) = mpsc::channel(1);
    if let Some(chunk) = chunk {
        let _ = tx.try_send(Ok(chunk));
    }
    rx
}
