//! Per-turn retrieval context.
//!
//! Gathers recent messages and facts of the current session plus a small
//! sample of other recent sessions, indexes them, and renders the best
//! matches for the incoming prompt as a compact context block.

use cofinance_config::RetrievalConfig;
use cofinance_core::error::MemoryError;
use cofinance_core::message::SessionId;
use cofinance_core::text::{truncate_chars, truncate_marked};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::embedding::Embedder;
use crate::retrieval::{ItemKind, Retriever, VectorItem};
use crate::store::{Fact, MemoryStore, PINNED_FACT};


/// The rendered outcome of a recall.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecalledContext {
    pub items: Vec<VectorItem>,
    /// Rendered lines, already capped in length. Empty when nothing matched.
    pub text: String,
}

impl RecalledContext {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Prefix `prompt` with the context block, or return it unchanged.
    pub fn compose_prompt(&self, prompt: &str) -> String {
        if self.is_empty() {
            prompt.to_string()
        } else {
            format!("Relevant Context (retrieved):\n{}\n\n{prompt}", self.text)
        }
    }
}

pub struct ContextRecall {
    store: MemoryStore,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
}

impl ContextRecall {
    pub fn new(store: MemoryStore, embedder: Arc<dyn Embedder>, config: RetrievalConfig) -> Self {
        Self { store, embedder, config }
    }

    /// Retrieve context for `query`. Any failure degrades to an empty context.
    pub async fn recall(&self, session: &SessionId, query: &str) -> RecalledContext {
        if !self.config.enabled {
            return RecalledContext::default();
        }
        match self.try_recall(session, query).await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(session_id = %session, "Context recall failed, continuing without context: {e}");
                RecalledContext::default()
            }
        }
    }

    async fn try_recall(&self, session: &SessionId, query: &str) -> Result<RecalledContext, MemoryError> {
        let (texts, kinds) = self.gather(session).await?;
        if texts.is_empty() {
            return Ok(RecalledContext::default());
        }

        let mut retriever = Retriever::new(self.embedder.clone());
        retriever.build(&texts, &kinds).await?;
        let items = retriever.search(query, self.config.top_k).await;

        let lines: Vec<String> = items
            .iter()
            .map(|item| {
                format!(
                    "- ({}, {:.2}) {}",
                    item.kind,
                    item.score,
                    truncate_chars(&item.text, self.config.snippet_chars)
                )
            })
            .collect();
        let text = truncate_marked(&lines.join("\n"), self.config.max_context_chars);

        debug!(session_id = %session, corpus = texts.len(), hits = items.len(), "Context recalled");
        Ok(RecalledContext { items, text })
    }

    async fn gather(&self, session: &SessionId) -> Result<(Vec<String>, Vec<ItemKind>), MemoryError> {
        let mut texts = Vec::new();
        let mut kinds = Vec::new();

        let messages = self
            .store
            .get_messages(session, Some(self.config.message_window))
            .await?;
        for m in messages {
            texts.push(m.content);
            kinds.push(ItemKind::Message);
        }

        for fact in self.store.get_facts(session, self.config.fact_limit).await? {
            let line = fact_line(&fact);
            if fact.key == PINNED_FACT {
                texts.push(line.clone());
                kinds.push(ItemKind::Fact);
            }
            texts.push(line);
            kinds.push(ItemKind::Fact);
        }

        let others: Vec<SessionId> = self
            .store
            .list_sessions(self.config.cross_session_count + 1)
            .await?
            .into_iter()
            .filter(|s| s != session)
            .take(self.config.cross_session_count)
            .collect();

        for other in &others {
            match self.sample_session(other).await {
                Ok(sample) => {
                    kinds.extend(std::iter::repeat_n(ItemKind::Cross, sample.len()));
                    texts.extend(sample);
                }
                Err(e) => warn!(session_id = %other, "Skipping cross-session sample: {e}"),
            }
        }

        Ok((texts, kinds))
    }

    async fn sample_session(&self, session: &SessionId) -> Result<Vec<String>, MemoryError> {
        let n = self.config.cross_session_sample;
        let mut sample: Vec<String> = self
            .store
            .get_messages(session, Some(n))
            .await?
            .into_iter()
            .map(|m| m.content)
            .collect();
        sample.extend(self.store.get_facts(session, n).await?.iter().map(fact_line));
        Ok(sample)
    }
}

fn fact_line(fact: &Fact) -> String {
    format!("{}: {}", fact.key, fact.value)
}
