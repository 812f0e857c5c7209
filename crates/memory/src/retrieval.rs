//! Semantic retrieval over a small, per-turn corpus.
//!
//! The corpus is rebuilt for every query context, so the retriever keeps
//! everything in memory. Search goes through an exact [`VectorIndex`] when
//! one is configured and accepts the vectors; otherwise the normalized
//! embedding matrix is scored directly by cosine similarity.

use cofinance_core::error::MemoryError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::embedding::{Embedder, HashingEmbedder};
use crate::vector::{FlatIpIndex, VectorIndex, cosine_similarity, top_k};

/// Where a retrievable text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Message,
    Fact,
    Cross,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Message => "message",
            ItemKind::Fact => "fact",
            ItemKind::Cross => "cross",
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorItem {
    pub text: String,
    pub kind: ItemKind,
    pub score: f32,
}

/// What the retriever is running on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalStatus {
    /// `"model"` or `"hash-fallback"`
    pub embeddings: String,
    /// Whether an exact index is in use
    pub index: bool,
    pub dim: usize,
}

type IndexFactory = Arc<dyn Fn(usize) -> Box<dyn VectorIndex> + Send + Sync>;

enum Backend {
    Empty,
    Index(Box<dyn VectorIndex>),
    Matrix(Vec<Vec<f32>>),
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index_factory: Option<IndexFactory>,
    items: Vec<(String, ItemKind)>,
    backend: Backend,
    /// Embedding backend the stored vectors came from
    built_with: &'static str,
}

impl Retriever {
    /// Retriever over `embedder` with the flat inner-product index.
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            index_factory: Some(Arc::new(|dim| Box::new(FlatIpIndex::new(dim)) as Box<dyn VectorIndex>)),
            items: Vec::new(),
            backend: Backend::Empty,
            built_with: "",
        }
    }

    /// Hashing embeddings of the given dimension; needs no model.
    pub fn hashing(dim: usize) -> Self {
        Self::new(Arc::new(HashingEmbedder::new(dim)))
    }

    /// Use a different exact index implementation.
    pub fn with_index<F>(mut self, factory: F) -> Self
    where
        F: Fn(usize) -> Box<dyn VectorIndex> + Send + Sync + 'static,
    {
        self.index_factory = Some(Arc::new(factory));
        self
    }

    /// Score the embedding matrix directly instead of using an index.
    pub fn without_index(mut self) -> Self {
        self.index_factory = None;
        self
    }

    pub fn status(&self) -> RetrievalStatus {
        RetrievalStatus {
            embeddings: self.embedder.backend().to_string(),
            index: match &self.backend {
                Backend::Index(_) => true,
                Backend::Matrix(_) => false,
                Backend::Empty => self.index_factory.is_some(),
            },
            dim: self.embedder.dimension(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Replace the corpus. Texts and kinds are paired positionally; any
    /// surplus on either side is ignored.
    pub async fn build(&mut self, texts: &[String], kinds: &[ItemKind]) -> Result<(), MemoryError> {
        self.items = texts.iter().cloned().zip(kinds.iter().copied()).collect();
        self.backend = Backend::Empty;
        if self.items.is_empty() {
            return Ok(());
        }

        let corpus: Vec<String> = self.items.iter().map(|(t, _)| t.clone()).collect();
        let vectors = self.embedder.embed(&corpus).await?;
        self.built_with = self.embedder.backend();
        self.backend = self.index_vectors(vectors);
        debug!(items = self.items.len(), embeddings = self.built_with, "Retriever built");
        Ok(())
    }

    fn index_vectors(&self, vectors: Vec<Vec<f32>>) -> Backend {
        if let Some(factory) = &self.index_factory {
            let mut index = factory(self.embedder.dimension());
            match index.add(&vectors) {
                Ok(()) => return Backend::Index(index),
                Err(e) => info!("Vector index unavailable, using cosine scan: {e}"),
            }
        }
        Backend::Matrix(vectors)
    }

    /// Up to `k` items, best score first. Never fails; problems yield an
    /// empty result.
    pub async fn search(&self, query: &str, k: usize) -> Vec<VectorItem> {
        if self.items.is_empty() || k == 0 {
            return Vec::new();
        }
        match self.try_search(query, k).await {
            Ok(items) => items,
            Err(e) => {
                warn!("Retrieval search failed: {e}");
                Vec::new()
            }
        }
    }

    async fn try_search(&self, query: &str, k: usize) -> Result<Vec<VectorItem>, MemoryError> {
        let mut q = self.embedder.embed(&[query.to_string()]).await?;
        let q = q.pop().ok_or_else(|| MemoryError::EmbeddingFailed("empty query embedding".into()))?;

        // The embedder degraded after build: stored vectors are from another space.
        if self.embedder.backend() != self.built_with {
            let corpus: Vec<String> = self.items.iter().map(|(t, _)| t.clone()).collect();
            let vectors = self.embedder.embed(&corpus).await?;
            let scores = vectors.iter().map(|v| cosine_similarity(v, &q));
            return Ok(self.hits(top_k(scores, k)));
        }

        let ranked = match &self.backend {
            Backend::Empty => Vec::new(),
            Backend::Index(index) => index.search(&q, k.min(self.items.len()))?,
            Backend::Matrix(matrix) => top_k(matrix.iter().map(|v| cosine_similarity(v, &q)), k),
        };
        Ok(self.hits(ranked))
    }

    fn hits(&self, ranked: Vec<(usize, f32)>) -> Vec<VectorItem> {
        ranked
            .into_iter()
            .filter_map(|(i, score)| {
                let (text, kind) = self.items.get(i)?;
                Some(VectorItem { text: text.clone(), kind: *kind, score })
            })
            .collect()
    }
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("items", &self.items.len())
            .field("status", &self.status())
            .finish()
    }
}
