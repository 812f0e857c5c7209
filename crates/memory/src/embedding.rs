//! Text embedders.
//!
//! [`ProviderEmbedder`] asks the configured model provider for embeddings
//! and quietly degrades to [`HashingEmbedder`] the first time the provider
//! cannot serve them. The hashing embedder is deterministic and needs no
//! model at all.

use async_trait::async_trait;
use cofinance_core::error::MemoryError;
use cofinance_core::provider::{EmbeddingRequest, Provider};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

use crate::vector::l2_normalize;

pub const DEFAULT_DIMENSION: usize = 384;

/// Turns texts into fixed-dimension, unit-length vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Which embedding backend is currently serving requests.
    fn backend(&self) -> &'static str;

    fn dimension(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemoryError>;
}

/// Bag-of-tokens embedding: each lowercased whitespace token is hashed
/// into one of `dimension` buckets.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension: dimension.max(1) }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for token in text.to_lowercase().split_whitespace() {
            let digest = Sha256::digest(token.as_bytes());
            let mut head = [0u8; 8];
            head.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_be_bytes(head) % self.dimension as u64) as usize;
            v[bucket] += 1.0;
        }
        l2_normalize(&mut v);
        v
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn backend(&self) -> &'static str {
        "hash-fallback"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemoryError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Model-backed embeddings with a sticky hashing fallback.
pub struct ProviderEmbedder {
    provider: Arc<dyn Provider>,
    model: String,
    fallback: HashingEmbedder,
    degraded: AtomicBool,
}

impl ProviderEmbedder {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            provider,
            model: model.into(),
            fallback: HashingEmbedder::new(dimension),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn degrade(&self, reason: &str) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            info!(provider = self.provider.name(), model = %self.model, "Embedding model unavailable, using hashing fallback: {reason}");
        }
    }

    async fn embed_with_model(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, String> {
        let response = self
            .provider
            .embed(EmbeddingRequest {
                model: self.model.clone(),
                inputs: texts.to_vec(),
            })
            .await
            .map_err(|e| e.to_string())?;

        if response.embeddings.len() != texts.len() {
            return Err(format!(
                "provider returned {} embeddings for {} inputs",
                response.embeddings.len(),
                texts.len()
            ));
        }
        let dim = self.fallback.dimension;
        if let Some(v) = response.embeddings.iter().find(|v| v.len() != dim) {
            return Err(format!("provider returned dimension {}, expected {dim}", v.len()));
        }

        let mut vectors = response.embeddings;
        for v in vectors.iter_mut() {
            l2_normalize(v);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for ProviderEmbedder {
    fn backend(&self) -> &'static str {
        if self.is_degraded() { "hash-fallback" } else { "model" }
    }

    fn dimension(&self) -> usize {
        self.fallback.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemoryError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if !self.is_degraded() {
            match self.embed_with_model(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(reason) => self.degrade(&reason),
            }
        }
        self.fallback.embed(texts).await
    }
}
