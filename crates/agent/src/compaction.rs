//! History compaction.
//!
//! Once a session's transcript grows past the threshold, everything between
//! an optional leading system message and the most recent messages is
//! replaced by one summary message. The rewrite is atomic: on any failure
//! the stored transcript is left exactly as it was.

use async_trait::async_trait;
use cofinance_config::CompactionConfig;
use cofinance_core::agent::AgentInput;
use cofinance_core::error::ProviderError;
use cofinance_core::message::{Message, Role, SessionId};
use cofinance_core::text::truncate_marked;
use cofinance_memory::MemoryStore;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::instructions;
use crate::model_agent::{AgentModel, ModelAgent};

pub const SUMMARY_MARKER: &str = "**[PREVIOUS CONVERSATION SUMMARY]**: ";

const SUMMARY_REQUEST: &str = "Review the following conversation history and create a concise summary:\n\n";

/// Condenses a run of messages into a short text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, history: &[Message]) -> Result<String, ProviderError>;
}

/// The model-backed summarizer.
pub struct MemoryAgent {
    agent: ModelAgent,
}

impl MemoryAgent {
    pub fn new(model: AgentModel, summary_max_tokens: u32) -> Self {
        let model = model.with_max_tokens(summary_max_tokens).with_max_tool_rounds(1);
        Self {
            agent: ModelAgent::new(instructions::memory_agent(), model),
        }
    }

    pub fn prompt(history: &[Message]) -> String {
        let lines: Vec<String> = history
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect();
        format!("{SUMMARY_REQUEST}{}", lines.join("\n"))
    }
}

#[async_trait]
impl Summarizer for MemoryAgent {
    async fn summarize(&self, history: &[Message]) -> Result<String, ProviderError> {
        let chunk = self.agent.run_to_end(AgentInput::new(Self::prompt(history))).await?;
        let summary = chunk
            .as_ref()
            .and_then(|c| c.text())
            .map(str::trim)
            .unwrap_or_default();
        if summary.is_empty() {
            return Err(ProviderError::AgentFailed("summarizer returned no text".into()));
        }
        Ok(summary.to_string())
    }
}

/// What a compaction pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// Nothing to do: disabled, or the transcript is short enough.
    Skipped,
    Compacted { summarized: usize, kept: usize },
    /// The transcript is unchanged.
    Failed(String),
}

pub struct HistoryCompactor {
    store: MemoryStore,
    summarizer: Arc<dyn Summarizer>,
    config: CompactionConfig,
}

impl HistoryCompactor {
    pub fn new(store: MemoryStore, summarizer: Arc<dyn Summarizer>, config: CompactionConfig) -> Self {
        Self {
            store,
            summarizer,
            config,
        }
    }

    pub async fn compact(&self, session: &SessionId) -> CompactionOutcome {
        if !self.config.enabled {
            return CompactionOutcome::Skipped;
        }

        let messages = match self.store.get_messages(session, None).await {
            Ok(m) => m,
            Err(e) => {
                error!(session_id = %session, "Compaction could not read history: {e}");
                return CompactionOutcome::Failed(e.to_string());
            }
        };
        if messages.len() <= self.config.threshold {
            return CompactionOutcome::Skipped;
        }

        let (system, rest) = match messages.split_first() {
            Some((first, rest)) if first.role == Role::System => (Some(first), rest),
            _ => (None, messages.as_slice()),
        };
        if rest.len() <= self.config.keep_recent {
            return CompactionOutcome::Skipped;
        }
        let (older, recent) = rest.split_at(rest.len() - self.config.keep_recent);

        let bounded: Vec<Message> = older
            .iter()
            .map(|m| Message {
                content: truncate_marked(&m.content, self.config.max_message_chars),
                ..m.clone()
            })
            .collect();

        let summary = match self.summarizer.summarize(&bounded).await {
            Ok(s) => s,
            Err(e) => {
                error!(session_id = %session, "Compaction summary failed, history unchanged: {e}");
                return CompactionOutcome::Failed(e.to_string());
            }
        };

        let mut summary_message = Message::system(format!("{SUMMARY_MARKER}{summary}"));
        if let Some(last) = older.last() {
            summary_message.timestamp = last.timestamp;
        }

        let mut rewritten = Vec::with_capacity(recent.len() + 2);
        rewritten.extend(system.cloned());
        rewritten.push(summary_message);
        rewritten.extend_from_slice(recent);

        if let Err(e) = self.store.replace_messages(session, &rewritten).await {
            error!(session_id = %session, "Compaction rewrite failed, history unchanged: {e}");
            return CompactionOutcome::Failed(e.to_string());
        }

        info!(session_id = %session, summarized = older.len(), kept = recent.len(), "History compacted");
        debug!(session_id = %session, total = rewritten.len(), "Transcript after compaction");
        CompactionOutcome::Compacted {
            summarized: older.len(),
            kept: recent.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::SequentialMockProvider;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedSummarizer {
        fail: bool,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    #[async_trait]
    impl Summarizer for ScriptedSummarizer {
        async fn summarize(&self, history: &[Message]) -> Result<String, ProviderError> {
            self.seen.lock().unwrap().push(history.to_vec());
            if self.fail {
                Err(ProviderError::Timeout("summary".into()))
            } else {
                Ok(format!("{} messages about NVDA", history.len()))
            }
        }
    }

    async fn seeded(count: usize, with_system: bool) -> (MemoryStore, SessionId) {
        let store = MemoryStore::new("sqlite::memory:").await.unwrap();
        let sid = SessionId::from("s");
        if with_system {
            store.save_message(&sid, Role::System, "You are helpful").await.unwrap();
        }
        for i in 0..count {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            store.save_message(&sid, role, &format!("message {i}")).await.unwrap();
        }
        (store, sid)
    }

    fn compactor(store: &MemoryStore, summarizer: Arc<ScriptedSummarizer>) -> HistoryCompactor {
        HistoryCompactor::new(store.clone(), summarizer, CompactionConfig::default())
    }

    #[tokio::test]
    async fn twelve_messages_become_summary_plus_last_five() {
        let (store, sid) = seeded(12, false).await;
        let summarizer = Arc::new(ScriptedSummarizer::default());

        let outcome = compactor(&store, summarizer.clone()).compact(&sid).await;
        assert_eq!(outcome, CompactionOutcome::Compacted { summarized: 7, kept: 5 });

        let after = store.get_messages(&sid, None).await.unwrap();
        assert_eq!(after.len(), 6);
        assert_eq!(after[0].role, Role::System);
        assert_eq!(after[0].content, format!("{SUMMARY_MARKER}7 messages about NVDA"));
        let tail: Vec<&str> = after[1..].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(tail, vec!["message 7", "message 8", "message 9", "message 10", "message 11"]);
        assert_eq!(summarizer.seen.lock().unwrap()[0].len(), 7);
    }

    #[tokio::test]
    async fn short_history_is_untouched() {
        let (store, sid) = seeded(10, false).await;
        let summarizer = Arc::new(ScriptedSummarizer::default());
        assert_eq!(compactor(&store, summarizer.clone()).compact(&sid).await, CompactionOutcome::Skipped);
        assert_eq!(store.count_messages(&sid).await.unwrap(), 10);
        assert!(summarizer.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn leading_system_message_is_preserved() {
        let (store, sid) = seeded(12, true).await;
        let outcome = compactor(&store, Arc::new(ScriptedSummarizer::default())).compact(&sid).await;
        assert_eq!(outcome, CompactionOutcome::Compacted { summarized: 7, kept: 5 });

        let after = store.get_messages(&sid, None).await.unwrap();
        assert_eq!(after.len(), 7);
        assert_eq!(after[0].content, "You are helpful");
        assert!(after[1].content.starts_with(SUMMARY_MARKER));
        assert_eq!(after[6].content, "message 11");
    }

    #[tokio::test]
    async fn failed_summary_leaves_history_unchanged() {
        let (store, sid) = seeded(12, false).await;
        let before = store.get_messages(&sid, None).await.unwrap();
        let summarizer = Arc::new(ScriptedSummarizer {
            fail: true,
            ..Default::default()
        });

        let outcome = compactor(&store, summarizer).compact(&sid).await;
        assert!(matches!(outcome, CompactionOutcome::Failed(ref r) if r.contains("timed out")));
        assert_eq!(store.get_messages(&sid, None).await.unwrap(), before);
    }

    #[tokio::test]
    async fn long_messages_are_truncated_for_the_summarizer() {
        let store = MemoryStore::new("sqlite::memory:").await.unwrap();
        let sid = SessionId::from("s");
        store.save_message(&sid, Role::Assistant, &"x".repeat(800)).await.unwrap();
        for i in 0..11 {
            store.save_message(&sid, Role::User, &format!("q{i}")).await.unwrap();
        }
        let summarizer = Arc::new(ScriptedSummarizer::default());
        compactor(&store, summarizer.clone()).compact(&sid).await;

        let seen = summarizer.seen.lock().unwrap();
        assert_eq!(seen[0][0].content, format!("{}...[truncated]", "x".repeat(500)));
        assert_eq!(seen[0][1].content, "q0");
    }

    #[tokio::test]
    async fn disabled_compaction_skips() {
        let (store, sid) = seeded(20, false).await;
        let config = CompactionConfig {
            enabled: false,
            ..CompactionConfig::default()
        };
        let c = HistoryCompactor::new(store.clone(), Arc::new(ScriptedSummarizer::default()), config);
        assert_eq!(c.compact(&sid).await, CompactionOutcome::Skipped);
        assert_eq!(store.count_messages(&sid).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn memory_agent_prompts_with_transcript() {
        let provider = Arc::new(SequentialMockProvider::single_text("  User analyzed NVDA; recommendation HOLD.  "));
        let agent = MemoryAgent::new(AgentModel::new(provider.clone(), "gpt-4o"), 200);

        let history = vec![Message::user("Analyze NVDA"), Message::assistant("HOLD")];
        let summary = agent.summarize(&history).await.unwrap();
        assert_eq!(summary, "User analyzed NVDA; recommendation HOLD.");

        let requests = provider.requests();
        assert_eq!(requests[0].max_tokens, Some(200));
        assert!(requests[0].tools.is_empty());
        assert_eq!(
            requests[0].messages.last().unwrap().content,
            "Review the following conversation history and create a concise summary:\n\nuser: Analyze NVDA\nassistant: HOLD"
        );
    }

    #[tokio::test]
    async fn empty_summary_is_an_error() {
        let provider = Arc::new(SequentialMockProvider::single_text("   "));
        let agent = MemoryAgent::new(AgentModel::new(provider, "gpt-4o"), 200);
        assert!(agent.summarize(&[Message::user("hi")]).await.is_err());
    }
}
