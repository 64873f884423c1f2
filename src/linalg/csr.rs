//! Compressed sparse row matrices over complex numbers.
//!
//! Per-pencil mass and linear operators are assembled as triplets, then
//! compressed with small entries dropped. The matrices are used for
//! matrix-vector products when forming multistep right-hand sides and are
//! densified once per factorization.

use faer::{Mat, c64};
use num_complex::Complex64;
use std::collections::BTreeMap;

/// Complex CSR matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    n_rows: usize,
    n_cols: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<Complex64>,
}

impl CsrMatrix {
    /// Empty (all-zero) matrix.
    pub fn zeros(n_rows: usize, n_cols: usize) -> Self {
        Self {
            n_rows,
            n_cols,
            row_ptr: vec![0; n_rows + 1],
            col_idx: Vec::new(),
            values: Vec::new(),
        }
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    #[inline]
    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    #[inline]
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Value at (row, col), zero when not stored.
    pub fn get(&self, row: usize, col: usize) -> Complex64 {
        let (start, end) = (self.row_ptr[row], self.row_ptr[row + 1]);
        match self.col_idx[start..end].binary_search(&col) {
            Ok(i) => self.values[start + i],
            Err(_) => Complex64::new(0.0, 0.0),
        }
    }

    /// Stored (col, value) pairs of one row.
    pub fn row(&self, row: usize) -> impl Iterator<Item = (usize, Complex64)> + '_ {
        let (start, end) = (self.row_ptr[row], self.row_ptr[row + 1]);
        self.col_idx[start..end]
            .iter()
            .copied()
            .zip(self.values[start..end].iter().copied())
    }

    /// y = A x.
    pub fn mul_vec(&self, x: &[Complex64]) -> Vec<Complex64> {
        debug_assert_eq!(x.len(), self.n_cols);
        (0..self.n_rows)
            .map(|i| self.row(i).map(|(j, v)| v * x[j]).sum())
            .collect()
    }

    /// Dense a·A + b·B for two matrices of equal shape.
    pub fn combine_dense(a: f64, lhs: &Self, b: f64, rhs: &Self) -> Mat<c64> {
        debug_assert_eq!((lhs.n_rows, lhs.n_cols), (rhs.n_rows, rhs.n_cols));
        let mut out = Mat::<c64>::zeros(lhs.n_rows, lhs.n_cols);
        for (scale, m) in [(a, lhs), (b, rhs)] {
            if scale == 0.0 {
                continue;
            }
            for i in 0..m.n_rows {
                for (j, v) in m.row(i) {
                    let cur = out[(i, j)];
                    out[(i, j)] = c64::new(cur.re + scale * v.re, cur.im + scale * v.im);
                }
            }
        }
        out
    }

    /// Dense copy.
    pub fn to_dense(&self) -> Mat<c64> {
        Self::combine_dense(1.0, self, 0.0, self)
    }
}

/// Triplet accumulator for [`CsrMatrix`].
///
/// Duplicate entries are summed. Entries whose magnitude falls below
/// `drop_tolerance × max|entry|` are dropped when building.
#[derive(Debug, Clone)]
pub struct CsrBuilder {
    n_rows: usize,
    n_cols: usize,
    entries: BTreeMap<(usize, usize), Complex64>,
}

impl CsrBuilder {
    pub fn new(n_rows: usize, n_cols: usize) -> Self {
        Self {
            n_rows,
            n_cols,
            entries: BTreeMap::new(),
        }
    }

    /// Accumulate `value` at (row, col).
    pub fn add(&mut self, row: usize, col: usize, value: Complex64) {
        debug_assert!(row < self.n_rows && col < self.n_cols);
        if value.re == 0.0 && value.im == 0.0 {
            return;
        }
        *self.entries.entry((row, col)).or_insert(Complex64::new(0.0, 0.0)) += value;
    }

    pub fn build(self, drop_tolerance: f64) -> CsrMatrix {
        let max = self.entries.values().map(|v| v.norm()).fold(0.0, f64::max);
        let cutoff = drop_tolerance * max;
        let mut row_ptr = vec![0; self.n_rows + 1];
        let mut col_idx = Vec::with_capacity(self.entries.len());
        let mut values = Vec::with_capacity(self.entries.len());
        // BTreeMap iterates in (row, col) order.
        for ((row, col), v) in self.entries {
            if v.norm() <= cutoff {
                continue;
            }
            row_ptr[row + 1] += 1;
            col_idx.push(col);
            values.push(v);
        }
        for i in 0..self.n_rows {
            row_ptr[i + 1] += row_ptr[i];
        }
        CsrMatrix {
            n_rows: self.n_rows,
            n_cols: self.n_cols,
            row_ptr,
            col_idx,
            values,
        }
    }
}
