//! Vector similarity search over catalog entries.

use crate::catalog::schema::CatalogEntry;
use crate::catalog::ScoredEntry;
use crate::error::TierError;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Turns text into a fixed-length vector.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, TierError>;

    fn dimensions(&self) -> usize;
}

/// Semantic nearest-neighbour search, the contract of the semantic tier.
pub trait SemanticSearch: Send + Sync {
    /// Entries ordered by similarity (best first), at most `limit`.
    /// Implementations must give up with [`TierError::Timeout`] once
    /// `timeout` has elapsed.
    fn search(
        &self,
        query: &str,
        limit: usize,
        timeout: Duration,
    ) -> Result<Vec<ScoredEntry>, TierError>;
}

/// Offline embedder: character trigrams hashed into a fixed number of
/// buckets (FNV-1a), L2-normalized.
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        HashingEmbedder { dims: dims.max(1) }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf29ce484222325, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(0x100000001b3)
    })
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, TierError> {
        let mut vector = vec![0f32; self.dims];
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let padded: Vec<char> = format!(" {word} ").chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                let bucket = (fnv1a(gram.as_bytes()) % self.dims as u64) as usize;
                vector[bucket] += 1.0;
            }
        }
        normalize(&mut vector);
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Cosine similarity; 0 for mismatched or zero vectors.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    f64::from(dot / (na * nb))
}

/// Brute-force vector index. Entries carrying a precomputed embedding of
/// the right width use it; the rest are embedded from their search text.
pub struct VectorIndex {
    entries: Vec<(Arc<CatalogEntry>, Vec<f32>)>,
    embedder: Box<dyn Embedder>,
}

impl VectorIndex {
    pub fn build(
        entries: &[Arc<CatalogEntry>],
        embedder: Box<dyn Embedder>,
    ) -> Result<Self, TierError> {
        let dims = embedder.dimensions();
        let mut vectors = Vec::with_capacity(entries.len());
        for entry in entries {
            let vector = match &entry.embedding {
                Some(v) if v.len() == dims => v.clone(),
                _ => embedder.embed(&entry.search_text())?,
            };
            vectors.push((Arc::clone(entry), vector));
        }
        Ok(VectorIndex {
            entries: vectors,
            embedder,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SemanticSearch for VectorIndex {
    fn search(
        &self,
        query: &str,
        limit: usize,
        timeout: Duration,
    ) -> Result<Vec<ScoredEntry>, TierError> {
        let started = Instant::now();
        let q = self.embedder.embed(query)?;

        let mut scored: Vec<ScoredEntry> = Vec::new();
        for (i, (entry, v)) in self.entries.iter().enumerate() {
            if i % 256 == 0 && started.elapsed() > timeout {
                return Err(TierError::Timeout(timeout));
            }
            scored.push(ScoredEntry {
                entry: Arc::clone(entry),
                score: cosine(&q, v),
            });
        }
        if started.elapsed() > timeout {
            return Err(TierError::Timeout(timeout));
        }

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.entry.id.cmp(&b.entry.id))
        });
        scored.truncate(limit);
        Ok(scored)
    }
}
