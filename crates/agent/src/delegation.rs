//! Supervisor-to-specialist delegation.
//!
//! Delegation is exposed to the supervisor as ordinary tools. Every outcome,
//! including bad input, a missing specialist or a failed run, comes back as
//! the tool's text so the supervisor can recover in-band.

use async_trait::async_trait;
use cofinance_core::agent::{Agent, AgentInput, AgentOutput};
use cofinance_core::error::{ProviderError, ToolError};
use cofinance_core::provider::StreamChunk;
use cofinance_core::tool::{Tool, ToolResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::activity::{ActivityTracker, DATA_ANALYST, NEWS_RESEARCHER, TEAM_LEAD};

pub const CALL_DATA_ANALYST: &str = "call_data_analyst";
pub const CALL_NEWS_RESEARCHER: &str = "call_news_researcher";

/// A tool call a specialist made while serving a delegation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatedCall {
    pub agent: String,
    pub tool: String,
    pub arguments: BTreeMap<String, String>,
}

/// Turn-scoped buffer of [`DelegatedCall`]s, drained by the turn runner.
#[derive(Debug, Default)]
pub struct DelegatedCallBuffer {
    calls: Mutex<Vec<DelegatedCall>>,
}

impl DelegatedCallBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, call: DelegatedCall) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }

    /// Take every buffered call, leaving the buffer empty.
    pub fn drain(&self) -> Vec<DelegatedCall> {
        std::mem::take(&mut *self.calls.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn record_calls(agent: &str, chunk: &StreamChunk, buffer: &DelegatedCallBuffer) {
    for call in chunk.tool_calls() {
        let tool = if call.name.is_empty() { "Unknown" } else { call.name.as_str() };
        buffer.push(DelegatedCall {
            agent: agent.to_string(),
            tool: tool.to_string(),
            arguments: call.argument_map(),
        });
    }
}

/// Fold any agent output shape into one string, in arrival order. Tool calls
/// carried by chunks are recorded in `buffer` under `agent`.
pub async fn aggregate_output(
    agent: &str,
    output: AgentOutput,
    buffer: &DelegatedCallBuffer,
) -> Result<String, ProviderError> {
    let mut text = String::new();
    match output {
        AgentOutput::Single(chunk) => {
            text.push_str(chunk.text().unwrap_or_default());
            record_calls(agent, &chunk, buffer);
        }
        AgentOutput::Text(s) => text = s,
        AgentOutput::Bytes(bytes) => text = String::from_utf8_lossy(&bytes).into_owned(),
        AgentOutput::Stream(mut rx) => {
            while let Some(item) = rx.recv().await {
                let chunk = item?;
                if let Some(t) = chunk.text() {
                    text.push_str(t);
                }
                record_calls(agent, &chunk, buffer);
            }
        }
    }
    Ok(text)
}

fn missing_query(target: &str) -> String {
    match target {
        DATA_ANALYST => {
            "Error: Please provide a query for the Data Analyst. Example: 'Get price data for NVDA'".to_string()
        }
        NEWS_RESEARCHER => {
            "Error: Please provide a query for the News Researcher. Example: 'Get recent news for NVDA'".to_string()
        }
        other => format!("Error: Please provide a query for the {other}."),
    }
}

/// Resolves specialists by name and runs them once per call.
pub struct Delegator {
    from: String,
    members: HashMap<String, Arc<dyn Agent>>,
    tracker: Arc<ActivityTracker>,
    delegated: Arc<DelegatedCallBuffer>,
    budget: Option<u32>,
    used: AtomicU32,
}

impl Delegator {
    pub fn new(tracker: Arc<ActivityTracker>, delegated: Arc<DelegatedCallBuffer>) -> Self {
        Self {
            from: TEAM_LEAD.to_string(),
            members: HashMap::new(),
            tracker,
            delegated,
            budget: None,
            used: AtomicU32::new(0),
        }
    }

    pub fn with_member(mut self, agent: Arc<dyn Agent>) -> Self {
        self.members.insert(agent.name().to_string(), agent);
        self
    }

    /// Cap delegations per turn. `None` leaves the limit to the instructions.
    pub fn with_budget(mut self, max_calls_per_turn: Option<u32>) -> Self {
        self.budget = max_calls_per_turn;
        self
    }

    pub fn member(&self, name: &str) -> Option<&Arc<dyn Agent>> {
        self.members.get(name)
    }

    pub fn calls_this_turn(&self) -> u32 {
        self.used.load(Ordering::SeqCst)
    }

    /// Start a new turn's budget.
    pub fn reset(&self) {
        self.used.store(0, Ordering::SeqCst);
    }

    pub async fn delegate_to_data_agent(&self, query: Option<&str>) -> String {
        self.delegate(DATA_ANALYST, query).await
    }

    pub async fn delegate_to_news_agent(&self, query: Option<&str>) -> String {
        self.delegate(NEWS_RESEARCHER, query).await
    }

    /// Run `target` once on `query` and return its aggregated answer or a
    /// diagnostic string.
    pub async fn delegate(&self, target: &str, query: Option<&str>) -> String {
        let Some(query) = query.map(str::trim).filter(|q| !q.is_empty()) else {
            return missing_query(target);
        };
        let Some(agent) = self.members.get(target).cloned() else {
            return format!("Error: {target} not found.");
        };
        if let Some(limit) = self.budget
            && self.used.fetch_add(1, Ordering::SeqCst) >= limit
        {
            warn!(target, limit, "Delegation budget exhausted");
            return format!(
                "Error: {target} was not called. The limit of {limit} delegations per request is reached; answer with the results you already have."
            );
        }

        self.tracker.log_delegation(&self.from, target, query);
        info!(from = %self.from, to = target, "Delegating");

        // Run on its own task so a panicking specialist cannot take the turn down.
        let name = target.to_string();
        let input = AgentInput::new(query).streaming();
        let delegated = self.delegated.clone();
        let run = tokio::spawn(async move {
            let output = agent.run(input).await?;
            aggregate_output(&name, output, &delegated).await
        });

        match run.await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(target, "Delegation failed: {e}");
                format!("Error calling {target}: {e}")
            }
            Err(e) => {
                warn!(target, "Delegation task aborted: {e}");
                format!("Error calling {target}: {e}")
            }
        }
    }
}

impl std::fmt::Debug for Delegator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut members: Vec<&String> = self.members.keys().collect();
        members.sort();
        f.debug_struct("Delegator")
            .field("from", &self.from)
            .field("members", &members)
            .field("budget", &self.budget)
            .finish()
    }
}

/// A delegation bound into the supervisor's tool set.
pub struct DelegationTool {
    name: &'static str,
    target: &'static str,
    description: &'static str,
    delegator: Arc<Delegator>,
}

impl DelegationTool {
    pub fn data_analyst(delegator: Arc<Delegator>) -> Self {
        Self {
            name: CALL_DATA_ANALYST,
            target: DATA_ANALYST,
            description: "Delegates a task to the Data Analyst to fetch financial data, prices, charts, or fundamentals.",
            delegator,
        }
    }

    pub fn news_researcher(delegator: Arc<Delegator>) -> Self {
        Self {
            name: CALL_NEWS_RESEARCHER,
            target: NEWS_RESEARCHER,
            description: "Delegates a task to the News Researcher to find recent news, sentiment, or articles.",
            delegator,
        }
    }
}

#[async_trait]
impl Tool for DelegationTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": format!("The specific question or instruction for the {}.", self.target)
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments.get("query").and_then(|q| q.as_str());
        Ok(ToolResult::ok(self.delegator.delegate(self.target, query).await))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{MockAgent, Reply, make_tool_call};
    use cofinance_core::tool::ToolCall;

    struct Fixture {
        tracker: Arc<ActivityTracker>,
        buffer: Arc<DelegatedCallBuffer>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                tracker: Arc::new(ActivityTracker::new()),
                buffer: Arc::new(DelegatedCallBuffer::new()),
            }
        }

        fn delegator(&self, agents: &[Arc<MockAgent>]) -> Delegator {
            agents.iter().fold(
                Delegator::new(self.tracker.clone(), self.buffer.clone()),
                |d, a| d.with_member(a.clone()),
            )
        }
    }

    fn nvda_call() -> ToolCall {
        make_tool_call("get_market_data", serde_json::json!({"symbol": "NVDA"}))
    }

    #[tokio::test]
    async fn single_response_object_is_returned_verbatim() {
        let fx = Fixture::new();
        let data = Arc::new(MockAgent::new(
            DATA_ANALYST,
            Reply::Single(StreamChunk::Text("Market data for NVDA".into())),
        ));
        let delegator = fx.delegator(&[data.clone()]);

        let out = delegator.delegate_to_data_agent(Some("Get price for NVDA")).await;
        assert_eq!(out, "Market data for NVDA");
        assert_eq!(data.runs(), 1);
        assert_eq!(data.prompts(), vec!["Get price for NVDA"]);

        let delegations = fx.tracker.delegations();
        assert_eq!(delegations.len(), 1);
        assert_eq!(delegations[0].from_agent, TEAM_LEAD);
        assert_eq!(delegations[0].to_agent, DATA_ANALYST);
    }

    #[tokio::test]
    async fn stream_is_aggregated_and_inner_calls_buffered() {
        let fx = Fixture::new();
        let unnamed = ToolCall::new("c2", "", serde_json::json!({}));
        let news = Arc::new(MockAgent::new(
            NEWS_RESEARCHER,
            Reply::Stream(vec![
                Ok(StreamChunk::Text("📰 [News Researcher] ".into())),
                Ok(StreamChunk::Both {
                    text: "NVDA beats".into(),
                    tool_calls: vec![nvda_call()],
                }),
                Ok(StreamChunk::ToolCalls(vec![unnamed])),
                Ok(StreamChunk::Text(" estimates".into())),
            ]),
        ));
        let delegator = fx.delegator(&[news.clone()]);

        let out = delegator.delegate_to_news_agent(Some("Get recent news for NVDA")).await;
        assert_eq!(out, "📰 [News Researcher] NVDA beats estimates");

        let calls = fx.buffer.drain();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].agent, NEWS_RESEARCHER);
        assert_eq!(calls[0].tool, "get_market_data");
        assert_eq!(calls[0].arguments.get("symbol").map(String::as_str), Some("NVDA"));
        assert_eq!(calls[1].tool, "Unknown");
        assert!(fx.buffer.is_empty());
    }

    #[tokio::test]
    async fn raw_payloads_are_accepted() {
        let fx = Fixture::new();
        let text = Arc::new(MockAgent::new(DATA_ANALYST, Reply::Text("plain".into())));
        assert_eq!(fx.delegator(&[text]).delegate(DATA_ANALYST, Some("q")).await, "plain");

        let bytes = Arc::new(MockAgent::new(DATA_ANALYST, Reply::Bytes(b"raw bytes".to_vec())));
        assert_eq!(fx.delegator(&[bytes]).delegate(DATA_ANALYST, Some("q")).await, "raw bytes");
    }

    #[tokio::test]
    async fn missing_query_is_a_local_error() {
        let fx = Fixture::new();
        let data = Arc::new(MockAgent::new(DATA_ANALYST, Reply::Text("x".into())));
        let delegator = fx.delegator(&[data.clone()]);

        assert_eq!(
            delegator.delegate_to_data_agent(None).await,
            "Error: Please provide a query for the Data Analyst. Example: 'Get price data for NVDA'"
        );
        assert!(delegator.delegate_to_data_agent(Some("   ")).await.starts_with("Error: Please provide"));
        assert_eq!(data.runs(), 0);
        assert!(fx.tracker.is_empty());
    }

    #[tokio::test]
    async fn unknown_target_is_a_local_error() {
        let fx = Fixture::new();
        let delegator = fx.delegator(&[]);
        assert_eq!(
            delegator.delegate_to_news_agent(Some("news")).await,
            "Error: News Researcher not found."
        );
    }

    #[tokio::test]
    async fn failures_become_error_strings() {
        let fx = Fixture::new();
        let failing = Arc::new(MockAgent::new(
            DATA_ANALYST,
            Reply::Fail(ProviderError::AgentFailed("boom".into())),
        ));
        assert_eq!(
            fx.delegator(&[failing]).delegate_to_data_agent(Some("q")).await,
            "Error calling Data Analyst: Agent run failed: boom"
        );

        let broken_stream = Arc::new(MockAgent::new(
            DATA_ANALYST,
            Reply::Stream(vec![
                Ok(StreamChunk::Text("partial".into())),
                Err(ProviderError::StreamInterrupted("reset".into())),
            ]),
        ));
        let out = fx.delegator(&[broken_stream]).delegate_to_data_agent(Some("q")).await;
        assert_eq!(out, "Error calling Data Analyst: Stream interrupted: reset");
    }

    #[tokio::test]
    async fn budget_limits_calls_until_reset() {
        let fx = Fixture::new();
        let data = Arc::new(MockAgent::new(DATA_ANALYST, Reply::Text("ok".into())));
        let delegator = fx.delegator(&[data.clone()]).with_budget(Some(1));

        assert_eq!(delegator.delegate_to_data_agent(Some("first")).await, "ok");
        let second = delegator.delegate_to_data_agent(Some("second")).await;
        assert!(second.starts_with("Error: Data Analyst was not called."), "{second}");
        assert_eq!(data.runs(), 1);

        delegator.reset();
        assert_eq!(delegator.delegate_to_data_agent(Some("third")).await, "ok");
        assert_eq!(data.runs(), 2);
    }

    #[tokio::test]
    async fn tool_wraps_delegation() {
        let fx = Fixture::new();
        let data = Arc::new(MockAgent::new(DATA_ANALYST, Reply::Text("chart ready".into())));
        let tool = DelegationTool::data_analyst(Arc::new(fx.delegator(&[data.clone()])));

        assert_eq!(tool.name(), CALL_DATA_ANALYST);
        assert_eq!(tool.parameters_schema()["required"][0], "query");

        let result = tool
            .execute(serde_json::json!({"query": "Get price data AND CREATE A CHART for NVDA"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, "chart ready");

        let result = tool.execute(serde_json::json!({})).await.unwrap();
        assert!(result.output.starts_with("Error: Please provide a query for the Data Analyst."));
        assert_eq!(data.runs(), 1);
    }
}
