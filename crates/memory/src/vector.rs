//! Vector math and the exact inner-product index.
//!
//! Pure-Rust implementations of:
//! - Cosine similarity and L2 normalization
//! - A flat (brute-force, exact) inner-product index

use cofinance_core::error::MemoryError;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length or empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Scale `v` to unit length in place. Zero vectors are left as they are.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    if norm < 1e-12 {
        return;
    }
    for x in v.iter_mut() {
        *x = (*x as f64 / norm) as f32;
    }
}

fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Indices of the `k` best scores, best first. Ties keep insertion order.
pub fn top_k(scores: impl IntoIterator<Item = f32>, k: usize) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = scores.into_iter().enumerate().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(k);
    ranked
}

/// An exact nearest-neighbour index over fixed-dimension vectors.
pub trait VectorIndex: Send + Sync {
    /// Append vectors; positions continue from the current length.
    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), MemoryError>;

    /// Up to `k` `(position, score)` pairs, best first.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, MemoryError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Brute-force inner-product index over a contiguous buffer.
///
/// With normalized inputs the inner product is the cosine similarity.
#[derive(Debug, Clone)]
pub struct FlatIpIndex {
    dim: usize,
    data: Vec<f32>,
}

impl FlatIpIndex {
    pub fn new(dim: usize) -> Self {
        Self { dim, data: Vec::new() }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

impl VectorIndex for FlatIpIndex {
    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), MemoryError> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dim) {
            return Err(MemoryError::IndexFailed(format!(
                "vector of dimension {} does not fit index of dimension {}",
                bad.len(),
                self.dim
            )));
        }
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, MemoryError> {
        if query.len() != self.dim {
            return Err(MemoryError::IndexFailed(format!(
                "query of dimension {} against index of dimension {}",
                query.len(),
                self.dim
            )));
        }
        let scores = self.data.chunks_exact(self.dim).map(|row| inner_product(row, query));
        Ok(top_k(scores, k))
    }

    fn len(&self) -> usize {
        if self.dim == 0 { 0 } else { self.data.len() / self.dim }
    }
}
