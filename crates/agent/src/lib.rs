//! The CoFinance agent team.
//!
//! A supervisor ("Market Team Lead") answers each user turn, delegating to
//! two specialists through tool calls:
//!
//! 1. **Reset** the per-turn activity log and delegation budget
//! 2. **Remember** the prompt, its tickers and intents
//! 3. **Recall** relevant context and prefix it to the prompt
//! 4. **Stream** the supervisor's answer, separating `<think>` reasoning
//!    from the visible transcript and logging every tool call
//! 5. **Persist** the cleaned answer and compact long histories
//!
//! Teams are cached per session, model and thinking mode.

pub mod activity;
pub mod compaction;
pub mod delegation;
pub mod instructions;
pub mod model_agent;
pub mod orchestrator;
pub mod reasoning;
pub mod team;
pub mod turn;

#[cfg(test)]
mod test_helpers;

pub use activity::{ActivityTracker, Delegation, ToolActivity, agent_for_tool};
pub use compaction::{CompactionOutcome, HistoryCompactor, MemoryAgent, Summarizer};
pub use delegation::{DelegatedCall, DelegatedCallBuffer, DelegationTool, Delegator};
pub use model_agent::{AgentModel, AgentProfile, ModelAgent};
pub use orchestrator::Orchestrator;
pub use reasoning::{ReasoningProcessor, ThinkParser, ThoughtLog, final_cleanup};
pub use team::{MarketTeamFactory, Team, TeamCache, TeamFactory, TeamKey};
pub use turn::{EMPTY_RESPONSE_NOTICE, TurnReport, TurnRunner};
