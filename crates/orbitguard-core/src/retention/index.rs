//! Flat cosine-similarity index kept in lockstep with the store's arena.
//!
//! Row `i` holds the unit-normalised embedding of arena slot `i`. Removal
//! mirrors `Vec::swap_remove` so slot numbers stay aligned with the arena.

/// Cosine similarity of two equal-length vectors; 0.0 when either is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    dim: usize,
    rows: Vec<f64>,
}

impl SimilarityIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            rows: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.rows.len() / self.dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Unit-normalise a vector; a zero vector stays zero.
    pub fn normalize(v: &[f32]) -> Vec<f64> {
        let norm = v.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
        if norm == 0.0 {
            return vec![0.0; v.len()];
        }
        v.iter().map(|x| *x as f64 / norm).collect()
    }

    /// Append a row for the newest arena slot.
    pub fn push(&mut self, embedding: &[f32]) {
        debug_assert_eq!(embedding.len(), self.dim);
        self.rows.extend(Self::normalize(embedding));
    }

    /// Remove row `slot`, moving the last row into its place.
    pub fn swap_remove(&mut self, slot: usize) {
        let len = self.len();
        if slot >= len {
            return;
        }
        let last = len - 1;
        if slot != last {
            let (head, tail) = self.rows.split_at_mut(last * self.dim);
            head[slot * self.dim..(slot + 1) * self.dim].copy_from_slice(&tail[..self.dim]);
        }
        self.rows.truncate(last * self.dim);
    }

    /// Cosine similarity between row `slot` and an already-normalised query.
    pub fn similarity(&self, slot: usize, unit_query: &[f64]) -> f64 {
        let start = slot * self.dim;
        match self.rows.get(start..start + self.dim) {
            Some(row) => row.iter().zip(unit_query).map(|(a, b)| a * b).sum(),
            None => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cosine_basics() {
        assert_relative_eq!(cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]), 1.0);
        assert_relative_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 3.0]), 0.0);
        assert_relative_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), -1.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_index_matches_cosine() {
        let mut idx = SimilarityIndex::new(3);
        idx.push(&[1.0, 2.0, 3.0]);
        idx.push(&[-1.0, 0.5, 0.0]);
        let q = [0.3f32, 0.1, 0.9];
        let unit = SimilarityIndex::normalize(&q);
        assert_relative_eq!(
            idx.similarity(0, &unit),
            cosine_similarity(&[1.0, 2.0, 3.0], &q),
            epsilon = 1e-9
        );
        assert_relative_eq!(
            idx.similarity(1, &unit),
            cosine_similarity(&[-1.0, 0.5, 0.0], &q),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_swap_remove_moves_last_row() {
        let mut idx = SimilarityIndex::new(2);
        idx.push(&[1.0, 0.0]);
        idx.push(&[0.0, 1.0]);
        idx.push(&[1.0, 1.0]);
        idx.swap_remove(0);
        assert_eq!(idx.len(), 2);
        let unit = SimilarityIndex::normalize(&[1.0, 1.0]);
        assert_relative_eq!(idx.similarity(0, &unit), 1.0, epsilon = 1e-9);
        idx.swap_remove(1);
        idx.swap_remove(0);
        assert!(idx.is_empty());
    }
}
