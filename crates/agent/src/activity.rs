//! Per-turn activity log: which agent called which tool, and who
//! delegated to whom.
//!
//! The tracker is shared by the supervisor's delegation tools and the turn
//! runner, so it uses interior mutability. Call [`ActivityTracker::clear`]
//! at the start of every turn.

use chrono::{DateTime, Utc};
use cofinance_core::text::truncate_chars;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

pub const DATA_ANALYST: &str = "Data Analyst";
pub const NEWS_RESEARCHER: &str = "News Researcher";
pub const TEAM_LEAD: &str = "Team Lead";
pub const SYSTEM: &str = "System";

/// Owning agent of every known tool.
const TOOL_OWNERS: &[(&str, &str)] = &[
    ("get_market_data", DATA_ANALYST),
    ("plot_stock_history", DATA_ANALYST),
    ("get_fundamental_metrics", DATA_ANALYST),
    ("get_analyst_recommendations", DATA_ANALYST),
    ("compare_stocks", DATA_ANALYST),
    ("get_watchlist_summary", DATA_ANALYST),
    ("get_company_news", NEWS_RESEARCHER),
    ("get_watchlist_news", NEWS_RESEARCHER),
    ("add_to_watchlist", TEAM_LEAD),
    ("call_data_analyst", TEAM_LEAD),
    ("call_news_researcher", TEAM_LEAD),
];

const QUERY_PREVIEW_CHARS: usize = 60;
const ARG_PREVIEW_COUNT: usize = 3;

/// Agent that owns `tool`; unknown tools belong to `"System"`.
pub fn agent_for_tool(tool: &str) -> &'static str {
    TOOL_OWNERS
        .iter()
        .find(|(name, _)| *name == tool)
        .map(|(_, agent)| *agent)
        .unwrap_or(SYSTEM)
}

pub fn emoji_for_agent(agent: &str) -> &'static str {
    match agent {
        DATA_ANALYST => "📊",
        NEWS_RESEARCHER => "📰",
        TEAM_LEAD => "👔",
        _ => "🔧",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolActivity {
    pub tool: String,
    pub agent: String,
    pub args: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delegation {
    pub from_agent: String,
    pub to_agent: String,
    pub query: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Log {
    tools: Vec<ToolActivity>,
    delegations: Vec<Delegation>,
}

#[derive(Debug, Default)]
pub struct ActivityTracker {
    log: Mutex<Log>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_log<R>(&self, f: impl FnOnce(&mut Log) -> R) -> R {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut log)
    }

    /// Record a tool call. Without `agent`, the owner comes from the tool registry.
    pub fn log_tool_call(&self, tool: &str, args: BTreeMap<String, String>, agent: Option<&str>) {
        let agent = agent.unwrap_or_else(|| agent_for_tool(tool)).to_string();
        self.with_log(|log| {
            log.tools.push(ToolActivity {
                tool: tool.to_string(),
                agent,
                args,
                timestamp: Utc::now(),
            })
        });
    }

    pub fn log_delegation(&self, from_agent: &str, to_agent: &str, query: &str) {
        self.with_log(|log| {
            log.delegations.push(Delegation {
                from_agent: from_agent.to_string(),
                to_agent: to_agent.to_string(),
                query: query.to_string(),
                timestamp: Utc::now(),
            })
        });
    }

    pub fn tool_calls(&self) -> Vec<ToolActivity> {
        self.with_log(|log| log.tools.clone())
    }

    pub fn delegations(&self) -> Vec<Delegation> {
        self.with_log(|log| log.delegations.clone())
    }

    /// Every agent seen in either log, sorted.
    pub fn agents_active(&self) -> Vec<String> {
        self.with_log(|log| {
            let mut agents = BTreeSet::new();
            for d in &log.delegations {
                agents.insert(d.from_agent.clone());
                agents.insert(d.to_agent.clone());
            }
            for t in &log.tools {
                agents.insert(t.agent.clone());
            }
            agents.into_iter().collect()
        })
    }

    pub fn clear(&self) {
        self.with_log(|log| {
            log.tools.clear();
            log.delegations.clear();
        });
    }

    pub fn is_empty(&self) -> bool {
        self.with_log(|log| log.tools.is_empty() && log.delegations.is_empty())
    }

    /// Markdown summary: delegations first, then tool calls grouped by agent
    /// in order of first appearance.
    pub fn format(&self) -> String {
        self.with_log(|log| {
            let mut out = String::new();

            if !log.delegations.is_empty() {
                out.push_str("### 🤝 Agent Collaboration\n");
                for d in &log.delegations {
                    out.push_str(&format!(
                        "{} **{}** → {} **{}**\n",
                        emoji_for_agent(&d.from_agent),
                        d.from_agent,
                        emoji_for_agent(&d.to_agent),
                        d.to_agent
                    ));
                    let preview = truncate_chars(&d.query, QUERY_PREVIEW_CHARS);
                    let ellipsis = if preview.len() < d.query.len() { "..." } else { "" };
                    out.push_str(&format!("   └─ _\"{preview}{ellipsis}\"_\n"));
                }
                out.push('\n');
            }

            if !log.tools.is_empty() {
                out.push_str("### 🔧 Tools Called\n");

                let mut groups: Vec<(&str, Vec<&ToolActivity>)> = Vec::new();
                for t in &log.tools {
                    match groups.iter_mut().find(|(agent, _)| *agent == t.agent) {
                        Some((_, calls)) => calls.push(t),
                        None => groups.push((t.agent.as_str(), vec![t])),
                    }
                }

                for (agent, calls) in groups {
                    out.push_str(&format!("\n{} **{agent}:**\n", emoji_for_agent(agent)));
                    for call in calls {
                        out.push_str(&format!("   • `{}()`", call.tool));
                        if !call.args.is_empty() {
                            let shown: Vec<String> = call
                                .args
                                .iter()
                                .take(ARG_PREVIEW_COUNT)
                                .map(|(k, v)| format!("{k}='{v}'"))
                                .collect();
                            let more = if call.args.len() > ARG_PREVIEW_COUNT { ", ..." } else { "" };
                            out.push_str(&format!(" — {}{more}", shown.join(", ")));
                        }
                        out.push('\n');
                    }
                }
            }

            out
        })
    }
}
