//! Vector store abstraction.
//!
//! Each knowledge item is stored as one point with two named vectors:
//! a dense text embedding and a sparse label vector. Queries run in two
//! stages: an optional sparse prefetch narrows the candidate set, then the
//! dense vector ranks the survivors.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Sparse vector over the label index space.
///
/// `indices` are strictly ascending and `values.len() == indices.len()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Dot product with another sparse vector (both sorted by index).
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let (mut i, mut j, mut sum) = (0, 0, 0.0f32);
        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    sum += self.values[i] * other.values[j];
                    i += 1;
                    j += 1;
                }
            }
        }
        sum
    }
}

/// Payload stored next to each point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointPayload {
    pub repo_name: String,
    pub content: String,
    pub labels: Vec<String>,
    pub summary: String,
}

/// A point to upsert.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
    pub payload: PointPayload,
}

/// A two-stage query.
#[derive(Debug, Clone)]
pub struct VectorQuery {
    pub dense: Vec<f32>,
    /// Prefetch vector; `None` runs a plain dense query.
    pub sparse: Option<SparseVector>,
    /// How many candidates the sparse stage keeps.
    pub prefetch_limit: usize,
    /// Restrict to one repository.
    pub repo_name: Option<String>,
    pub limit: usize,
}

/// A hit returned from the vector store. Ids only; callers hydrate.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f64,
}

/// Collection-oriented vector database.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace a point by id.
    async fn upsert(&self, point: VectorPoint) -> Result<()>;

    /// Run a (possibly prefetch-restricted) nearest-neighbor query.
    async fn query(&self, query: &VectorQuery) -> Result<Vec<ScoredPoint>>;
}

/// Cosine similarity, `0.0` for empty or mismatched vectors.
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

    dot / denom
}
