//! Dense LU factorization of per-pencil systems.

use crate::error::SingularSystemError;
use faer::linalg::solvers::{PartialPivLu, Solve};
use faer::{Mat, c64};
use num_complex::Complex64;

/// A factorized square system.
pub struct LuFactor {
    lu: PartialPivLu<c64>,
    n: usize,
}

impl std::fmt::Debug for LuFactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuFactor").field("n", &self.n).finish()
    }
}

impl LuFactor {
    /// Factorize `matrix` with partial pivoting.
    ///
    /// Fails when a pivot of U is non-finite or smaller than
    /// `pivot_tolerance` times the largest pivot.
    pub fn new(matrix: Mat<c64>, pivot_tolerance: f64, pencil: &str) -> Result<Self, SingularSystemError> {
        let n = matrix.nrows();
        if n != matrix.ncols() {
            return Err(SingularSystemError {
                pencil: pencil.to_string(),
                pivot: 0.0,
                max_pivot: 0.0,
            });
        }
        let lu = matrix.as_ref().partial_piv_lu();
        let u = lu.U();
        let mut min_pivot = f64::INFINITY;
        let mut max_pivot: f64 = 0.0;
        for i in 0..n {
            let d = u[(i, i)];
            let mag = (d.re * d.re + d.im * d.im).sqrt();
            if !mag.is_finite() {
                return Err(SingularSystemError {
                    pencil: pencil.to_string(),
                    pivot: mag,
                    max_pivot,
                });
            }
            min_pivot = min_pivot.min(mag);
            max_pivot = max_pivot.max(mag);
        }
        if n > 0 && (max_pivot == 0.0 || min_pivot < pivot_tolerance * max_pivot) {
            return Err(SingularSystemError {
                pencil: pencil.to_string(),
                pivot: min_pivot,
                max_pivot,
            });
        }
        Ok(Self { lu, n })
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    /// Solve for one right-hand side.
    pub fn solve(&self, rhs: &[Complex64]) -> Vec<Complex64> {
        self.solve_many(&[rhs.to_vec()]).pop().unwrap_or_default()
    }

    /// Solve for several right-hand sides at once.
    pub fn solve_many(&self, rhs: &[Vec<Complex64>]) -> Vec<Vec<Complex64>> {
        if rhs.is_empty() || self.n == 0 {
            return rhs.iter().map(|_| Vec::new()).collect();
        }
        let b = Mat::<c64>::from_fn(self.n, rhs.len(), |i, j| c64::new(rhs[j][i].re, rhs[j][i].im));
        let x = self.lu.solve(&b);
        (0..rhs.len())
            .map(|j| {
                (0..self.n)
                    .map(|i| {
                        let v = x[(i, j)];
                        Complex64::new(v.re, v.im)
                    })
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solve_complex_system() {
        // [[2, i], [0, 1]] x = [2 + i, 1] -> x = [1, 1]
        let mut a = Mat::<c64>::zeros(2, 2);
        a[(0, 0)] = c64::new(2.0, 0.0);
        a[(0, 1)] = c64::new(0.0, 1.0);
        a[(1, 1)] = c64::new(1.0, 0.0);
        let lu = LuFactor::new(a, 1e-13, "test").unwrap();
        let x = lu.solve(&[Complex64::new(2.0, 1.0), Complex64::new(1.0, 0.0)]);
        assert!((x[0] - Complex64::new(1.0, 0.0)).norm() < 1e-14);
        assert!((x[1] - Complex64::new(1.0, 0.0)).norm() < 1e-14);
    }

    #[test]
    fn test_singular_detected() {
        let mut a = Mat::<c64>::zeros(2, 2);
        a[(0, 0)] = c64::new(1.0, 0.0);
        a[(1, 0)] = c64::new(2.0, 0.0);
        let err = LuFactor::new(a, 1e-13, "k=3").unwrap_err();
        assert_eq!(err.pencil, "k=3");
    }

    #[test]
    fn test_solve_many_columns() {
        let mut a = Mat::<c64>::zeros(2, 2);
        a[(0, 0)] = c64::new(4.0, 0.0);
        a[(1, 1)] = c64::new(2.0, 0.0);
        let lu = LuFactor::new(a, 1e-13, "diag").unwrap();
        let x = lu.solve_many(&[
            vec![Complex64::new(4.0, 0.0), Complex64::new(2.0, 0.0)],
            vec![Complex64::new(8.0, 0.0), Complex64::new(0.0, 2.0)],
        ]);
        assert!((x[1][0] - Complex64::new(2.0, 0.0)).norm() < 1e-14);
        assert!((x[1][1] - Complex64::new(0.0, 1.0)).norm() < 1e-14);
    }
}
