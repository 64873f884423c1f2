//! Grid reductions over the local block of a field.
//!
//! Field data is replicated on every rank, so a reduction splits the first
//! grid axis into contiguous blocks, reduces its own block and combines the
//! partial results with an all-reduce.

use crate::basis::{AxisBasis, JacobiBasis, radial_quadrature};
use crate::distributor::{Distributor, ReduceOp};
use crate::error::{BasisError, Result};
use crate::field::{Space, grid_axes};
use crate::polynomial::JacobiFamily;
use faer::Mat;
use faer::linalg::solvers::Solve;
use std::f64::consts::PI;
use std::ops::Range;

/// Grid points of a space and the flat range owned by this rank.
#[derive(Clone, Debug)]
pub(crate) struct LocalGrid {
    pub axes: Vec<Vec<f64>>,
    /// Points per component.
    pub per_component: usize,
    /// Flat indices (within one component) of the local block.
    pub local: Range<usize>,
}

impl LocalGrid {
    pub(crate) fn new(space: &Space, distributor: &Distributor) -> Self {
        let axes = grid_axes(space);
        let per_component: usize = axes.iter().map(Vec::len).product();
        let first = axes.first().map_or(1, Vec::len);
        let rest = per_component / first.max(1);
        let block = distributor.local_block(first);
        Self {
            axes,
            per_component,
            local: block.start * rest..block.end * rest,
        }
    }

    /// Index along each axis of the flat point `flat`.
    pub(crate) fn unravel(&self, flat: usize) -> Vec<usize> {
        let mut rem = flat;
        let mut out = vec![0; self.axes.len()];
        for (a, ax) in self.axes.iter().enumerate().rev() {
            out[a] = rem % ax.len();
            rem /= ax.len();
        }
        out
    }
}

/// Reduce `local` on this rank, then across ranks.
pub(crate) fn all_reduce(distributor: &Distributor, local: impl Iterator<Item = f64>, op: ReduceOp) -> f64 {
    let partial = local.fold(op.identity(), |acc, v| op.combine(acc, v));
    distributor.comm().all_reduce(partial, op)
}

/// Integration weights of every grid axis, so that the volume integral of
/// grid data g is Σ g w_0 w_1 ... over all points.
pub(crate) fn grid_weights(space: &Space) -> Result<Vec<Vec<f64>>> {
    match space {
        Space::Cartesian(c) => c
            .axes()
            .iter()
            .map(|b| match b {
                None => Ok(vec![1.0]),
                Some(AxisBasis::Fourier(f)) => {
                    let n = f.grid().len();
                    Ok(vec![f.length() / n as f64; n])
                }
                Some(AxisBasis::Jacobi(j)) => interval_weights(j),
            })
            .collect(),
        Space::Ball(b) => {
            let sphere = b.sphere();
            let n_phi = sphere.phi_grid().len();
            let n_r = b.radial_grid().len();
            // Σ w (1+z)^{1/2} dz = 4√2 ∫ x² dx with z = 2x² - 1.
            let (_, w) = radial_quadrature(0.0, n_r, b.radius())?;
            let scale = b.radius().powi(3) / (4.0 * 2f64.sqrt());
            Ok(vec![
                vec![2.0 * PI / n_phi as f64; n_phi],
                sphere.theta_weights().to_vec(),
                w.into_iter().map(|wi| wi * scale).collect(),
            ])
        }
        Space::Sphere(s) => {
            let n_phi = s.phi_grid().len();
            let r2 = s.radius() * s.radius();
            Ok(vec![
                vec![2.0 * PI / n_phi as f64; n_phi],
                s.theta_weights().iter().map(|w| w * r2).collect(),
            ])
        }
    }
}

/// Interpolatory weights on the grid of a Jacobi axis: exact for
/// polynomials of degree below the grid size.
fn interval_weights(basis: &JacobiBasis) -> Result<Vec<f64>> {
    let y = basis.grid();
    let n = y.len();
    if n == 0 {
        return Err(BasisError::InvalidParameter("empty Jacobi grid".into()).into());
    }
    let legendre = JacobiFamily::legendre();
    let values: Vec<Vec<f64>> = y.iter().map(|&yi| legendre.values(n, basis.to_native(yi))).collect();
    // Σ_i w_i p_k(x_i) = ∫ p_k dx = √2 δ_k0 for orthonormal Legendre p_k.
    let a = Mat::<f64>::from_fn(n, n, |k, i| values[i][k]);
    let mut rhs = Mat::<f64>::zeros(n, 1);
    rhs[(0, 0)] = 2f64.sqrt();
    let w = a.as_ref().partial_piv_lu().solve(&rhs);
    let half = basis.length() / 2.0;
    Ok((0..n).map(|i| w[(i, 0)] * half).collect())
}

/// Local grid spacing around each node of a sorted grid line.
pub(crate) fn local_spacing(nodes: &[f64]) -> Vec<f64> {
    let n = nodes.len();
    (0..n)
        .map(|i| match (i.checked_sub(1), nodes.get(i + 1)) {
            (Some(l), Some(r)) => (r - nodes[l]).abs() / 2.0,
            (None, Some(r)) => (r - nodes[i]).abs(),
            (Some(l), None) => (nodes[i] - nodes[l]).abs(),
            (None, None) => f64::INFINITY,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::{CartesianCoordinates, Dtype, FourierBasis, JacobiBasis};
    use crate::field::CartesianSpace;
    use approx::assert_relative_eq;

    #[test]
    fn test_chebyshev_weights_integrate_polynomials() {
        let c = CartesianCoordinates::new(&["y"]);
        let y = JacobiBasis::chebyshev(c.coord(0).clone(), 12, (0.0, 2.0), 1.5).unwrap();
        let w = interval_weights(&y).unwrap();
        let grid = y.grid();
        let total: f64 = w.iter().sum();
        assert_relative_eq!(total, 2.0, epsilon = 1e-12);
        // ∫_0^2 y³ dy = 4
        let cubic: f64 = grid.iter().zip(&w).map(|(y, w)| y.powi(3) * w).sum();
        assert_relative_eq!(cubic, 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cartesian_volume() {
        let c = CartesianCoordinates::new(&["x", "y"]);
        let x = FourierBasis::real(c.coord(0).clone(), 8, (0.0, 3.0), 1.5).unwrap();
        let y = JacobiBasis::chebyshev(c.coord(1).clone(), 6, (-1.0, 1.0), 1.5).unwrap();
        let s = CartesianSpace::new(c, Dtype::Real, vec![Some(x.into()), Some(y.into())]).unwrap();
        let w = grid_weights(&Space::Cartesian(s)).unwrap();
        let volume: f64 = w.iter().map(|ax| ax.iter().sum::<f64>()).product();
        assert_relative_eq!(volume, 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_local_spacing() {
        let s = local_spacing(&[0.0, 1.0, 3.0]);
        assert_eq!(s, vec![1.0, 1.5, 2.0]);
    }
}
