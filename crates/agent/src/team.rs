//! Team assembly and the process-wide team cache.
//!
//! A team is one supervisor wired to the specialists through delegation
//! tools, plus the turn-scoped state those tools write into. Teams are
//! cached under an explicit [`TeamKey`]; equal keys always resolve to the
//! same `Arc<Team>`.

use cofinance_core::agent::Agent;
use cofinance_core::message::SessionId;
use cofinance_core::tool::{Tool, ToolRegistry};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::activity::ActivityTracker;
use crate::delegation::{DelegatedCallBuffer, DelegationTool, Delegator};
use crate::instructions;
use crate::model_agent::{AgentModel, ModelAgent};

/// Everything a cached team depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TeamKey {
    pub model_identity: String,
    pub model_id: String,
    pub session_id: SessionId,
    pub thinking_mode: bool,
}

impl TeamKey {
    pub fn new(model: &AgentModel, session_id: &SessionId, thinking_mode: bool) -> Self {
        Self {
            model_identity: model.identity().to_string(),
            model_id: model.model.clone(),
            session_id: session_id.clone(),
            thinking_mode,
        }
    }
}

pub struct Team {
    pub supervisor: Arc<dyn Agent>,
    pub delegator: Arc<Delegator>,
    pub tracker: Arc<ActivityTracker>,
    pub delegated: Arc<DelegatedCallBuffer>,
}

impl Team {
    /// Reset all turn-scoped state.
    pub fn begin_turn(&self) {
        self.tracker.clear();
        self.delegated.drain();
        self.delegator.reset();
    }
}

impl std::fmt::Debug for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Team")
            .field("supervisor", &self.supervisor.name())
            .field("delegator", &self.delegator)
            .finish()
    }
}

/// Builds a team for one cache key.
pub trait TeamFactory: Send + Sync {
    fn build(&self, model: &AgentModel, session_id: &SessionId, thinking_mode: bool) -> Team;
}

/// The market research team: a supervisor over the Data Analyst and the
/// News Researcher. Specialist tools are supplied by the host.
#[derive(Clone, Default)]
pub struct MarketTeamFactory {
    data_tools: Arc<ToolRegistry>,
    news_tools: Arc<ToolRegistry>,
    supervisor_tools: ToolRegistry,
    delegation_budget: Option<u32>,
}

impl MarketTeamFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data_tools(mut self, tools: ToolRegistry) -> Self {
        self.data_tools = Arc::new(tools);
        self
    }

    pub fn with_news_tools(mut self, tools: ToolRegistry) -> Self {
        self.news_tools = Arc::new(tools);
        self
    }

    /// Extra supervisor tool, e.g. a watchlist writer.
    pub fn with_supervisor_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.supervisor_tools.register(tool);
        self
    }

    pub fn with_delegation_budget(mut self, max_calls_per_turn: Option<u32>) -> Self {
        self.delegation_budget = max_calls_per_turn;
        self
    }
}

impl TeamFactory for MarketTeamFactory {
    fn build(&self, model: &AgentModel, session_id: &SessionId, thinking_mode: bool) -> Team {
        let data = ModelAgent::new(instructions::data_analyst(), model.clone()).with_tools(self.data_tools.clone());
        let news = ModelAgent::new(instructions::news_researcher(), model.clone()).with_tools(self.news_tools.clone());

        let tracker = Arc::new(ActivityTracker::new());
        let delegated = Arc::new(DelegatedCallBuffer::new());
        let delegator = Arc::new(
            Delegator::new(tracker.clone(), delegated.clone())
                .with_member(Arc::new(data))
                .with_member(Arc::new(news))
                .with_budget(self.delegation_budget),
        );

        let mut tools = self.supervisor_tools.clone();
        tools.register(Arc::new(DelegationTool::data_analyst(delegator.clone())));
        tools.register(Arc::new(DelegationTool::news_researcher(delegator.clone())));

        let supervisor =
            ModelAgent::new(instructions::supervisor(thinking_mode), model.clone()).with_tools(Arc::new(tools));

        info!(session_id = %session_id, model = %model.model, thinking_mode, "Built market team");
        Team {
            supervisor: Arc::new(supervisor),
            delegator,
            tracker,
            delegated,
        }
    }
}

/// Shared team store. Construction happens outside the lock; when two
/// callers race on one key the first insert wins and both get that team.
#[derive(Default)]
pub struct TeamCache {
    teams: Mutex<HashMap<TeamKey, Arc<Team>>>,
}

impl TeamCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TeamKey, Arc<Team>>> {
        self.teams.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &TeamKey) -> Option<Arc<Team>> {
        self.lock().get(key).cloned()
    }

    pub fn get_or_build(&self, key: TeamKey, build: impl FnOnce() -> Team) -> Arc<Team> {
        if let Some(team) = self.get(&key) {
            return team;
        }
        let team = Arc::new(build());
        let mut teams = self.lock();
        let team = teams.entry(key).or_insert(team).clone();
        debug!(cached = teams.len(), "Team cache updated");
        team
    }

    /// Drop every team of `session`; returns how many were removed.
    pub fn evict_session(&self, session: &SessionId) -> usize {
        let mut teams = self.lock();
        let before = teams.len();
        teams.retain(|k, _| &k.session_id != session);
        before - teams.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for TeamCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeamCache").field("teams", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{DATA_ANALYST, NEWS_RESEARCHER};
    use crate::delegation::{CALL_DATA_ANALYST, CALL_NEWS_RESEARCHER};
    use crate::instructions::SUPERVISOR_NAME;
    use crate::test_helpers::{RecordingTool, SequentialMockProvider};
    use cofinance_core::agent::AgentInput;

    fn model() -> AgentModel {
        AgentModel::new(Arc::new(SequentialMockProvider::new(vec![])), "gpt-4o")
    }

    #[tokio::test]
    async fn market_team_wires_delegation_tools() {
        let provider = Arc::new(SequentialMockProvider::single_text("Let me analyze NVDA for you..."));
        let factory = MarketTeamFactory::new()
            .with_supervisor_tool(Arc::new(RecordingTool::new("add_to_watchlist", "added")));
        let team = factory.build(&AgentModel::new(provider.clone(), "gpt-4o"), &SessionId::from("s"), true);

        assert_eq!(team.supervisor.name(), SUPERVISOR_NAME);
        assert_eq!(team.supervisor.role(), instructions::SUPERVISOR_ROLE);
        assert!(team.delegator.member(DATA_ANALYST).is_some());
        assert!(team.delegator.member(NEWS_RESEARCHER).is_some());

        team.supervisor.run(AgentInput::new("Analyze NVDA")).await.unwrap();
        let requests = provider.requests();
        let request = &requests[0];
        let tools: Vec<&str> = request.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(tools, vec!["add_to_watchlist", CALL_DATA_ANALYST, CALL_NEWS_RESEARCHER]);
        assert!(request.messages[0].content.contains("<think> and </think>"));
    }

    #[test]
    fn keys_capture_every_dimension() {
        let m = model();
        let s = SessionId::from("s");
        assert_eq!(TeamKey::new(&m, &s, false), TeamKey::new(&m, &s, false));
        assert_ne!(TeamKey::new(&m, &s, false), TeamKey::new(&m, &s, true));
        assert_ne!(TeamKey::new(&m, &s, false), TeamKey::new(&m, &SessionId::from("t"), false));

        let other = AgentModel::new(m.provider.clone(), "gpt-4o-mini");
        assert_ne!(TeamKey::new(&m, &s, false), TeamKey::new(&other, &s, false));
        assert_eq!(TeamKey::new(&m, &s, false).model_identity, "sequential_mock");
    }

    #[test]
    fn cache_hit_does_not_rebuild() {
        let cache = TeamCache::new();
        let factory = MarketTeamFactory::new();
        let m = model();
        let s = SessionId::from("s");
        let key = TeamKey::new(&m, &s, false);

        let first = cache.get_or_build(key.clone(), || factory.build(&m, &s, false));
        let second = cache.get_or_build(key, || panic!("cache hit must not rebuild"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn racing_builds_converge_on_one_team() {
        let cache = TeamCache::new();
        let factory = MarketTeamFactory::new();
        let m = model();
        let s = SessionId::from("s");
        let key = TeamKey::new(&m, &s, true);

        let inner = cache.get_or_build(key.clone(), || {
            // A competing caller finishes first while this build is in flight.
            cache.get_or_build(key.clone(), || factory.build(&m, &s, true));
            factory.build(&m, &s, true)
        });
        assert!(Arc::ptr_eq(&inner, &cache.get(&key).unwrap()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evicting_a_session_keeps_others() {
        let cache = TeamCache::new();
        let factory = MarketTeamFactory::new();
        let m = model();
        for (session, thinking) in [("a", false), ("a", true), ("b", false)] {
            let s = SessionId::from(session);
            cache.get_or_build(TeamKey::new(&m, &s, thinking), || factory.build(&m, &s, thinking));
        }
        assert_eq!(cache.evict_session(&SessionId::from("a")), 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn begin_turn_clears_turn_state() {
        let team = MarketTeamFactory::new().build(&model(), &SessionId::from("s"), false);
        team.tracker.log_delegation("Team Lead", DATA_ANALYST, "q");
        team.delegated.push(crate::delegation::DelegatedCall {
            agent: DATA_ANALYST.into(),
            tool: "get_market_data".into(),
            arguments: Default::default(),
        });
        team.begin_turn();
        assert!(team.tracker.is_empty());
        assert!(team.delegated.is_empty());
        assert_eq!(team.delegator.calls_this_turn(), 0);
    }
}
