//! Embedding capability and vector utilities.
//!
//! Defines the [`Embedder`] trait that every embedding backend implements,
//! the batch limits it enforces, and pure helpers for vector
//! serialization and similarity.
//!
//! Concrete providers (OpenAI-compatible, Ollama) live in the `repo-chat`
//! app crate.

use anyhow::Result;
use async_trait::async_trait;

use crate::error::RepoChatError;

/// Vectors returned for one batch, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct Embeddings {
    pub vectors: Vec<Vec<f32>>,
    /// Dimensionality shared by every vector in `vectors`.
    pub dims: usize,
}

impl Embeddings {
    /// Build from raw vectors, checking they share one length.
    ///
    /// An empty vector or a length mismatch inside one response is a
    /// consistency error.
    pub fn from_vectors(vectors: Vec<Vec<f32>>) -> Result<Self> {
        let dims = vectors.first().map(Vec::len).unwrap_or(0);
        if dims == 0 {
            return Err(RepoChatError::consistency("embedding response contained an empty vector").into());
        }
        if let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dims) {
            return Err(RepoChatError::consistency(format!(
                "embedding {} has {} dims, expected {}",
                i,
                v.len(),
                dims
            ))
            .into());
        }
        Ok(Self { vectors, dims })
    }
}

/// A batched remote embedding capability.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Configured vector dimensionality.
    fn dims(&self) -> usize;

    /// Maximum texts per [`embed`](Embedder::embed) call.
    fn max_batch_size(&self) -> usize;

    /// Character budget for a multi-text batch.
    fn max_batch_chars(&self) -> usize;

    /// Embed `texts`, preserving length and order.
    ///
    /// Implementations call [`validate_batch`] first.
    async fn embed(&self, texts: &[String]) -> Result<Embeddings>;
}

/// Reject batches that break the provider's limits.
///
/// A single text longer than `max_chars` is allowed through; the remote
/// side decides whether to truncate it.
pub fn validate_batch(texts: &[String], max_size: usize, max_chars: usize) -> Result<()> {
    if texts.is_empty() {
        return Err(RepoChatError::validation("embedding batch is empty").into());
    }
    if texts.len() > max_size {
        return Err(RepoChatError::validation(format!(
            "embedding batch has {} texts, limit is {}",
            texts.len(),
            max_size
        ))
        .into());
    }
    if texts.len() > 1 {
        let total: usize = texts.iter().map(|t| t.chars().count()).sum();
        if total > max_chars {
            return Err(RepoChatError::validation(format!(
                "embedding batch has {} chars, limit is {}",
                total, max_chars
            ))
            .into());
        }
    }
    Ok(())
}

/// Group item indices into batches bounded by count and total chars.
///
/// An item that alone exceeds `max_chars` gets a batch of its own.
pub fn plan_batches(lengths: &[usize], max_size: usize, max_chars: usize) -> Vec<Vec<usize>> {
    let max_size = max_size.max(1);
    let mut batches = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut current_chars = 0usize;

    for (i, &len) in lengths.iter().enumerate() {
        let over_count = current.len() >= max_size;
        let over_chars = !current.is_empty() && current_chars + len > max_chars;
        if over_count || over_chars {
            batches.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        current.push(i);
        current_chars += len;
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Encode a float vector as little-endian f32 bytes.
///
/// # Example
///
/// ```rust
/// use repo_chat_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Reverse of [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-magnitude operand.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}
