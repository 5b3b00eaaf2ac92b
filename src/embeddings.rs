//! Embedding vectors: blob encoding, cosine similarity and the generator seam.
//!
//! The mirror never produces vectors itself. An [`EmbeddingGenerator`]
//! supplied by the caller turns text into vectors; the mirror stores them as
//! little-endian `f32` blobs and compares them by cosine similarity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::MirrorError;
use crate::paper::{Paper, PaperId};
use crate::store::StoredEmbedding;

/// Default number of semantic search results.
pub const DEFAULT_SEMANTIC_LIMIT: usize = 20;

/// Turns text into a fixed-width vector.
#[async_trait]
pub trait EmbeddingGenerator: Send + Sync {
    /// Model name recorded next to each stored vector.
    fn model(&self) -> &str;

    /// Embeds `text`.
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// Extracts plain text from a downloaded PDF.
///
/// Implemented outside this crate by whatever full-text pipeline indexes
/// PDFs; the mirror only hands it artifact paths.
pub trait TextExtractor: Send + Sync {
    /// Returns the text content of the file at `path`.
    fn extract(&self, path: &std::path::Path) -> anyhow::Result<String>;
}

/// One semantic search result, best first.
#[derive(Debug, Clone, Serialize)]
pub struct SemanticHit {
    pub paper: Paper,
    pub score: f32,
}

/// A decoded embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embedding {
    pub paper_id: PaperId,
    pub model: String,
    pub dimensions: u32,
    pub vector: Vec<f32>,
    pub created: Option<DateTime<Utc>>,
}

impl TryFrom<StoredEmbedding> for Embedding {
    type Error = MirrorError;

    fn try_from(stored: StoredEmbedding) -> Result<Self, Self::Error> {
        let vector = decode_vector(&stored.blob)?;
        if vector.len() != stored.dimensions as usize {
            return Err(MirrorError::validation(
                "embedding vector",
                format!(
                    "{} values stored for {} dimensions",
                    vector.len(),
                    stored.dimensions
                ),
            ));
        }
        Ok(Self {
            paper_id: stored.paper_id,
            model: stored.model,
            dimensions: stored.dimensions,
            vector,
            created: stored.created,
        })
    }
}

/// Checks that a vector can be stored: non-empty and finite.
///
/// # Errors
///
/// Returns [`MirrorError::Validation`] describing the problem.
pub fn validate_vector(vector: &[f32]) -> Result<u32, MirrorError> {
    if vector.is_empty() {
        return Err(MirrorError::validation("embedding vector", "empty vector"));
    }
    if let Some(index) = vector.iter().position(|v| !v.is_finite()) {
        return Err(MirrorError::validation(
            "embedding vector",
            format!("value at index {index} is not finite"),
        ));
    }
    u32::try_from(vector.len())
        .map_err(|_| MirrorError::validation("embedding vector", "too many dimensions"))
}

/// Encodes a vector as a little-endian `f32` blob.
#[must_use]
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|value| value.to_le_bytes()).collect()
}

/// Decodes a little-endian `f32` blob.
///
/// # Errors
///
/// Returns [`MirrorError::Validation`] if the length is not a multiple of 4.
pub fn decode_vector(blob: &[u8]) -> Result<Vec<f32>, MirrorError> {
    if blob.len() % 4 != 0 {
        return Err(MirrorError::validation(
            "embedding vector",
            format!("{} bytes is not a whole number of f32 values", blob.len()),
        ));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Cosine similarity of two equal-length vectors, accumulated in `f64`.
///
/// Returns 0.0 for mismatched lengths or a zero-norm input.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return 0.0;
    }
    #[allow(clippy::cast_possible_truncation)]
    let score = (dot / denom) as f32;
    score
}

/// Scores `candidates` against `query`, keeping positive scores only.
///
/// Returns `(index, score)` pairs sorted best first, truncated to `limit`.
#[must_use]
pub fn rank_by_similarity(query: &[f32], candidates: &[Vec<f32>], limit: usize) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = candidates
        .iter()
        .enumerate()
        .map(|(index, vector)| (index, cosine_similarity(query, vector)))
        .filter(|(_, score)| *score > 0.0)
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.truncate(limit);
    scored
}
