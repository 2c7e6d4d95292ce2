//! Exact inner-product similarity index over one pool.
//!
//! Vectors are unit length, so the inner product is the cosine similarity.
//! The index is read-only after construction and safe to query from many
//! threads at once.
use std::sync::Arc;

use crate::dictionary::Pool;

/// Tolerance on the unit-norm invariant of indexed rows.
pub(crate) const NORM_TOLERANCE: f32 = 1e-3;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("row {row} has zero norm")]
    ZeroNormVector { row: usize },

    #[error("row {row} is not unit length (norm {norm})")]
    NotNormalized { row: usize, norm: f32 },
}

/// One search result: a row of the indexed pool and its score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub score: f32,
}

/// Brute-force top-k search over a pool's vectors.
#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    vectors: Arc<[f32]>,
    dimensions: usize,
    len: usize,
    generation: u64,
}

impl SimilarityIndex {
    /// Index the current contents of `pool`.
    pub fn build(pool: &Pool) -> Result<Self, IndexError> {
        let index = Self {
            vectors: pool.vectors(),
            dimensions: pool.dimensions(),
            len: pool.len(),
            generation: pool.generation(),
        };
        if index.vectors.len() != index.len * index.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: index.len * index.dimensions,
                got: index.vectors.len(),
            });
        }
        for row in 0..index.len {
            let norm = index.row(row).iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm < f32::EPSILON {
                return Err(IndexError::ZeroNormVector { row });
            }
            if (norm - 1.0).abs() > NORM_TOLERANCE {
                return Err(IndexError::NotNormalized { row, norm });
            }
        }
        Ok(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Generation of the pool this index was built from.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn row(&self, i: usize) -> &[f32] {
        &self.vectors[i * self.dimensions..(i + 1) * self.dimensions]
    }

    /// The `k` rows most similar to `query`, best first.
    ///
    /// Equal scores are ordered by ascending row so results are
    /// deterministic. Fewer than `k` rows yields all of them.
    pub fn query(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }
        if k == 0 || self.len == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<Neighbor> = (0..self.len)
            .map(|index| Neighbor {
                index,
                score: dot(self.row(index), query).clamp(-1.0, 1.0),
            })
            .collect();

        let order = |a: &Neighbor, b: &Neighbor| {
            b.score.total_cmp(&a.score).then(a.index.cmp(&b.index))
        };
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, order);
            scored.truncate(k);
        }
        scored.sort_unstable_by(order);
        Ok(scored)
    }

    /// Like [`query`](Self::query) but never returns row `exclude`.
    ///
    /// Duplicates of the excluded row (other rows with score 1.0) are kept.
    pub fn query_excluding(
        &self,
        query: &[f32],
        k: usize,
        exclude: usize,
    ) -> Result<Vec<Neighbor>, IndexError> {
        let mut hits = self.query(query, k.saturating_add(1))?;
        hits.retain(|n| n.index != exclude);
        hits.truncate(k);
        Ok(hits)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
