//! Flat L2 vector index.
//!
//! Brute-force exact nearest-neighbor search over a dense row-major buffer.
//! Positions double as ids: the vector added n-th has id n, which is what ties
//! index rows to their metadata entries. Suited to corpora in the thousands of
//! chunks; there is no approximate structure to tune or rebuild.

use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// A single search match: vector id plus squared L2 distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub id: usize,
    pub distance: f32,
}

/// Exact flat index over fixed-dimension `f32` vectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append a vector. Its id is the index it lands at.
    pub fn add(&mut self, vector: &[f32]) -> Result<usize, IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let id = self.len();
        self.data.extend_from_slice(vector);
        Ok(id)
    }

    /// Exact k-nearest-neighbor search by squared L2 distance, ascending.
    ///
    /// Returns fewer than `k` hits when the index holds fewer vectors, and
    /// none at all when it is empty, whatever the query looks like.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        let mut hits: Vec<SearchHit> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(id, row)| SearchHit {
                id,
                distance: squared_l2(query, row),
            })
            .collect();
        hits.sort_unstable_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    /// Serialize for blob storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>, IndexError> {
        bincode::serialize(self).map_err(|e| IndexError::Corrupt {
            message: e.to_string(),
        })
    }

    /// Deserialize from blob storage, rejecting structurally impossible data.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexError> {
        let index: Self = bincode::deserialize(bytes).map_err(|e| IndexError::Corrupt {
            message: e.to_string(),
        })?;
        if index.dimension == 0 && !index.data.is_empty() {
            return Err(IndexError::Corrupt {
                message: "zero dimension with non-empty data".to_string(),
            });
        }
        if index.dimension > 0 && !index.data.len().is_multiple_of(index.dimension) {
            return Err(IndexError::Corrupt {
                message: format!(
                    "data length {} is not a multiple of dimension {}",
                    index.data.len(),
                    index.dimension
                ),
            });
        }
        Ok(index)
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
