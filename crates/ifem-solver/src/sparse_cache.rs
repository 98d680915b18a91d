//! Reusable sparse matrix storage for repeated Hessian assembly.
//!
//! The first assembly accumulates triplets in a `(row, col)` map, builds a
//! COO matrix and converts it to CSR. The CSR pattern and a
//! `(row, col) -> value index` map are kept, so later assemblies with the
//! same sparsity only zero and refill the value array.

use std::collections::HashMap;

use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use tracing::trace;

use crate::error::{FemError, Result};

/// One `(row, col, value)` contribution
pub type Triplet = (usize, usize, f64);

/// CSR matrix with a cached pattern.
#[derive(Debug, Clone, Default)]
pub struct SparseMatrixCache {
    size: usize,
    matrix: Option<CsrMatrix<f64>>,
    entry_index: HashMap<(usize, usize), usize>,
    rebuilds: usize,
}

impl SparseMatrixCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times the pattern was (re)built
    pub fn rebuilds(&self) -> usize {
        self.rebuilds
    }

    /// Stored entries of the cached pattern
    pub fn nnz(&self) -> usize {
        self.matrix.as_ref().map_or(0, |m| m.nnz())
    }

    /// Sum all triplets into a `size x size` matrix.
    ///
    /// Duplicate entries are summed. The cached pattern is reused when every
    /// triplet falls inside it; otherwise it is rebuilt.
    pub fn assemble(&mut self, size: usize, blocks: &[Vec<Triplet>]) -> Result<CsrMatrix<f64>> {
        if self.size == size && self.try_refill(blocks) {
            if let Some(matrix) = &self.matrix {
                return Ok(matrix.clone());
            }
        }
        self.rebuild(size, blocks)
    }

    fn try_refill(&mut self, blocks: &[Vec<Triplet>]) -> bool {
        let Some(matrix) = self.matrix.as_mut() else {
            return false;
        };
        let values = matrix.values_mut();
        values.iter_mut().for_each(|v| *v = 0.0);
        for &(r, c, v) in blocks.iter().flatten() {
            match self.entry_index.get(&(r, c)) {
                Some(&idx) => values[idx] += v,
                None => return false,
            }
        }
        true
    }

    fn rebuild(&mut self, size: usize, blocks: &[Vec<Triplet>]) -> Result<CsrMatrix<f64>> {
        let mut entry_map: HashMap<(usize, usize), f64> = HashMap::new();
        for &(r, c, v) in blocks.iter().flatten() {
            *entry_map.entry((r, c)).or_insert(0.0) += v;
        }

        let mut rows = Vec::with_capacity(entry_map.len());
        let mut cols = Vec::with_capacity(entry_map.len());
        let mut values = Vec::with_capacity(entry_map.len());
        for ((r, c), v) in entry_map {
            rows.push(r);
            cols.push(c);
            values.push(v);
        }

        let coo = CooMatrix::try_from_triplets(size, size, rows, cols, values)
            .map_err(|e| FemError::SparsePattern(format!("Failed to create COO matrix: {:?}", e)))?;
        let csr = CsrMatrix::from(&coo);

        self.entry_index.clear();
        let offsets = csr.row_offsets();
        let col_indices = csr.col_indices();
        for row in 0..size {
            for idx in offsets[row]..offsets[row + 1] {
                self.entry_index.insert((row, col_indices[idx]), idx);
            }
        }

        self.size = size;
        self.rebuilds += 1;
        trace!(size, nnz = csr.nnz(), "rebuilt sparse pattern");
        self.matrix = Some(csr.clone());
        Ok(csr)
    }

    /// Drop the cached pattern
    pub fn clear(&mut self) {
        *self = Self {
            rebuilds: self.rebuilds,
            ..Self::default()
        };
    }
}

/// Dense copy of a CSR matrix
pub fn to_dense(matrix: &CsrMatrix<f64>) -> DMatrix<f64> {
    let mut dense = DMatrix::zeros(matrix.nrows(), matrix.ncols());
    for (row_idx, row) in matrix.row_iter().enumerate() {
        for (&col_idx, &value) in row.col_indices().iter().zip(row.values().iter()) {
            dense[(row_idx, col_idx)] += value;
        }
    }
    dense
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_duplicates_across_blocks() {
        let mut cache = SparseMatrixCache::new();
        let blocks = vec![
            vec![(0, 0, 1.0), (0, 1, 2.0)],
            vec![(0, 0, 3.0), (2, 2, 5.0)],
        ];
        let m = cache.assemble(3, &blocks).unwrap();
        let dense = to_dense(&m);
        assert_eq!(dense[(0, 0)], 4.0);
        assert_eq!(dense[(0, 1)], 2.0);
        assert_eq!(dense[(2, 2)], 5.0);
        assert_eq!(dense[(1, 1)], 0.0);
        assert_eq!(m.nnz(), 3);
    }

    #[test]
    fn reuses_pattern_for_same_sparsity() {
        let mut cache = SparseMatrixCache::new();
        let first = vec![vec![(0, 0, 1.0), (1, 0, -1.0), (1, 1, 2.0)]];
        cache.assemble(2, &first).unwrap();
        assert_eq!(cache.rebuilds(), 1);

        // subset of the pattern with new values
        let second = vec![vec![(1, 1, 7.0)], vec![(1, 1, 1.0)]];
        let m = cache.assemble(2, &second).unwrap();
        assert_eq!(cache.rebuilds(), 1);
        let dense = to_dense(&m);
        assert_eq!(dense[(1, 1)], 8.0);
        assert_eq!(dense[(0, 0)], 0.0);
        assert_eq!(m.nnz(), 3);
    }

    #[test]
    fn rebuilds_on_new_entry_or_size() {
        let mut cache = SparseMatrixCache::new();
        cache.assemble(2, &[vec![(0, 0, 1.0)]]).unwrap();
        let m = cache.assemble(2, &[vec![(0, 0, 1.0), (0, 1, 1.0)]]).unwrap();
        assert_eq!(cache.rebuilds(), 2);
        assert_eq!(to_dense(&m)[(0, 1)], 1.0);

        cache.assemble(3, &[vec![(0, 0, 1.0)]]).unwrap();
        assert_eq!(cache.rebuilds(), 3);
    }

    #[test]
    fn rejects_out_of_range_entries() {
        let mut cache = SparseMatrixCache::new();
        let result = cache.assemble(2, &[vec![(2, 0, 1.0)]]);
        assert!(matches!(result, Err(FemError::SparsePattern(_))));
    }
}
