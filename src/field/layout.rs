//! Coefficient and grid layouts, and the transforms between them.
//!
//! All data is stored as row-major `Complex64` arrays with the tensor
//! component as the slowest index:
//! - Cartesian: `[component][axis₀][axis₁]...`, with extent 1 on constant axes
//! - Ball coefficients: `[component][order][ℓ][n]`, padded to `ℓ_max + 1`
//!   degrees and `N_r` radial modes; vector components are regularity
//!   components σ = -1, 0, +1
//! - Sphere coefficients: `[component][order][ℓ]`; vector components are
//!   (R, s̃, t̃)
//! - Ball grid: `[component][φ][θ][r]`; sphere grid: `[component][φ][θ]`;
//!   vector grid components are ordered (φ, θ, r)
//!
//! Entries of invalid (ℓ, σ, n) slots are kept at zero.

use super::space::{CartesianSpace, Space};
use crate::basis::{
    AxisBasis, Basis, BallBasis, Dtype, SphereBasis, regularity_to_spherical, spherical_to_regularity,
};
use crate::error::{BasisError, FieldError};
use num_complex::Complex64;

const ZERO: Complex64 = Complex64::new(0.0, 0.0);

/// Number of tensor components of a rank-`rank` field.
pub fn n_components(space: &Space, rank: usize) -> usize {
    space.dim().pow(rank as u32)
}

fn check_rank(space: &Space, rank: usize) -> Result<(), FieldError> {
    match space {
        Space::Ball(_) | Space::Sphere(_) if rank > 1 => Err(FieldError::UnsupportedRank {
            rank,
            context: "curvilinear field storage",
        }),
        _ => Ok(()),
    }
}

/// Length of the coefficient array.
pub fn coeff_len(space: &Space, rank: usize) -> Result<usize, FieldError> {
    check_rank(space, rank)?;
    let per = match space {
        Space::Cartesian(c) => c.coeff_shape().iter().product(),
        Space::Ball(b) => b.sphere().n_orders() * (b.l_max() + 1) * b.n_r(),
        Space::Sphere(s) => s.n_orders() * (s.l_max() + 1),
    };
    Ok(per * n_components(space, rank))
}

/// Length of the grid array.
pub fn grid_len(space: &Space, rank: usize) -> Result<usize, FieldError> {
    check_rank(space, rank)?;
    let per = match space {
        Space::Cartesian(c) => c.grid_shape().iter().product(),
        Space::Ball(b) => {
            let (a, t, r) = b.grid_shape();
            a * t * r
        }
        Space::Sphere(s) => {
            let (a, t) = s.grid_shape();
            a * t
        }
    };
    Ok(per * n_components(space, rank))
}

/// Offset of the radial block (comp, order, ℓ) in ball coefficients.
pub fn ball_offset(ball: &BallBasis, comp: usize, mi: usize, ell: usize) -> usize {
    ((comp * ball.sphere().n_orders() + mi) * (ball.l_max() + 1) + ell) * ball.n_r()
}

/// Offset of (comp, order, ℓ) in sphere coefficients.
pub fn sphere_offset(sphere: &SphereBasis, comp: usize, mi: usize, ell: usize) -> usize {
    (comp * sphere.n_orders() + mi) * (sphere.l_max() + 1) + ell
}

/// Regularity component σ of storage index 0, 1, 2.
pub fn sigma_of(comp: usize) -> i32 {
    comp as i32 - 1
}

/// Apply `f` to every line along `axis` of a row-major array.
pub(crate) fn map_axis<F>(
    data: &[Complex64],
    shape: &[usize],
    axis: usize,
    out_len: usize,
    mut f: F,
) -> Result<Vec<Complex64>, BasisError>
where
    F: FnMut(&[Complex64]) -> Result<Vec<Complex64>, BasisError>,
{
    let outer: usize = shape[..axis].iter().product();
    let inner: usize = shape[axis + 1..].iter().product();
    let n = shape[axis];
    let mut out = vec![ZERO; outer * out_len * inner];
    let mut line = vec![ZERO; n];
    for o in 0..outer {
        for i in 0..inner {
            for (j, v) in line.iter_mut().enumerate() {
                *v = data[(o * n + j) * inner + i];
            }
            let result = f(&line)?;
            debug_assert_eq!(result.len(), out_len);
            for (j, v) in result.into_iter().enumerate() {
                out[(o * out_len + j) * inner + i] = v;
            }
        }
    }
    Ok(out)
}

/// Axis order for forward transforms: the half-spectrum axis first.
fn forward_order(space: &CartesianSpace) -> Vec<usize> {
    let mut order: Vec<usize> = (0..space.dim()).collect();
    if let Some(real) = space.real_fourier_axis() {
        order.retain(|&a| a != real);
        order.insert(0, real);
    }
    order
}

fn cartesian_to_coeff(space: &CartesianSpace, ncomp: usize, grid: &[Complex64]) -> Result<Vec<Complex64>, BasisError> {
    let mut shape = vec![ncomp];
    shape.extend(space.grid_shape());
    let mut data = grid.to_vec();
    for axis in forward_order(space) {
        if let Some(basis) = space.axis(axis) {
            let basis = basis.as_basis();
            data = map_axis(&data, &shape, axis + 1, basis.coeff_size(), |l| basis.to_coeff(l))?;
            shape[axis + 1] = basis.coeff_size();
        }
    }
    Ok(data)
}

fn cartesian_to_grid(space: &CartesianSpace, ncomp: usize, coeff: &[Complex64]) -> Result<Vec<Complex64>, BasisError> {
    let mut shape = vec![ncomp];
    shape.extend(space.coeff_shape());
    let mut data = coeff.to_vec();
    for axis in forward_order(space).into_iter().rev() {
        if let Some(basis) = space.axis(axis) {
            let basis = basis.as_basis();
            data = map_axis(&data, &shape, axis + 1, basis.grid_size(), |l| basis.to_grid(l))?;
            shape[axis + 1] = basis.grid_size();
        }
    }
    if space.dtype() == Dtype::Real {
        for v in &mut data {
            v.im = 0.0;
        }
    }
    Ok(data)
}

/// Angular forward transform of one shell: grid `[comp][φ][θ]` to
/// coefficients `[comp][order][ℓ]`.
fn sphere_forward(sphere: &SphereBasis, rank: usize, grid: &[Complex64]) -> Result<Vec<Complex64>, BasisError> {
    let (n_phi, n_theta) = sphere.grid_shape();
    let ncomp = if rank == 0 { 1 } else { 3 };
    let no = sphere.n_orders();
    let mut by_order = vec![ZERO; ncomp * no * n_theta];
    let mut line = vec![ZERO; n_phi];
    for c in 0..ncomp {
        for t in 0..n_theta {
            for (p, v) in line.iter_mut().enumerate() {
                *v = grid[(c * n_phi + p) * n_theta + t];
            }
            for (mi, v) in sphere.phi_forward(&line)?.into_iter().enumerate() {
                by_order[(c * no + mi) * n_theta + t] = v;
            }
        }
    }
    let block = |c: usize, mi: usize| &by_order[(c * no + mi) * n_theta..(c * no + mi + 1) * n_theta];
    let mut out = vec![ZERO; ncomp * no * (sphere.l_max() + 1)];
    for mi in 0..no {
        let ells = sphere.ells(mi);
        if rank == 0 {
            let c = sphere.scalar_forward(mi, block(0, mi))?;
            for (ell, v) in ells.zip(c) {
                out[sphere_offset(sphere, 0, mi, ell)] = v;
            }
        } else {
            let parts = sphere.vector_forward(mi, block(0, mi), block(1, mi), block(2, mi))?;
            for (comp, part) in parts.into_iter().enumerate() {
                for (ell, v) in ells.clone().zip(part) {
                    out[sphere_offset(sphere, comp, mi, ell)] = v;
                }
            }
        }
    }
    Ok(out)
}

/// Angular backward transform of one shell.
fn sphere_backward(sphere: &SphereBasis, rank: usize, coeff: &[Complex64]) -> Result<Vec<Complex64>, BasisError> {
    let (n_phi, n_theta) = sphere.grid_shape();
    let ncomp = if rank == 0 { 1 } else { 3 };
    let no = sphere.n_orders();
    let mut by_order = vec![ZERO; ncomp * no * n_theta];
    for mi in 0..no {
        let ells = sphere.ells(mi);
        let take = |comp: usize| -> Vec<Complex64> {
            ells.clone().map(|ell| coeff[sphere_offset(sphere, comp, mi, ell)]).collect()
        };
        let lines = if rank == 0 {
            vec![sphere.scalar_backward(mi, &take(0))?]
        } else {
            let (r, s, t) = (take(0), take(1), take(2));
            sphere.vector_backward(mi, [&r, &s, &t])?.into_iter().collect()
        };
        for (c, line) in lines.into_iter().enumerate() {
            by_order[(c * no + mi) * n_theta..(c * no + mi + 1) * n_theta].copy_from_slice(&line);
        }
    }
    let mut grid = vec![ZERO; ncomp * n_phi * n_theta];
    let mut coeffs = vec![ZERO; no];
    for c in 0..ncomp {
        for t in 0..n_theta {
            for (mi, v) in coeffs.iter_mut().enumerate() {
                *v = by_order[(c * no + mi) * n_theta + t];
            }
            for (p, v) in sphere.phi_backward(&coeffs)?.into_iter().enumerate() {
                grid[(c * n_phi + p) * n_theta + t] = v;
            }
        }
    }
    Ok(grid)
}

fn ball_to_coeff(ball: &BallBasis, rank: usize, grid: &[Complex64]) -> Result<Vec<Complex64>, BasisError> {
    let sphere = ball.sphere();
    let (n_phi, n_theta, n_rg) = ball.grid_shape();
    let ncomp = if rank == 0 { 1 } else { 3 };
    let shell_len = ncomp * n_phi * n_theta;

    // Angular transforms shell by shell: shells[j] is [comp][order][ℓ].
    let mut shell = vec![ZERO; shell_len];
    let mut shells = Vec::with_capacity(n_rg);
    for j in 0..n_rg {
        for (i, v) in shell.iter_mut().enumerate() {
            *v = grid[i * n_rg + j];
        }
        shells.push(sphere_forward(sphere, rank, &shell)?);
    }

    let mut out = vec![ZERO; ncomp * sphere.n_orders() * (ball.l_max() + 1) * ball.n_r()];
    let mut lines = vec![vec![ZERO; n_rg]; ncomp];
    for mi in 0..sphere.n_orders() {
        for ell in sphere.ells(mi) {
            for (j, sh) in shells.iter().enumerate() {
                if rank == 0 {
                    lines[0][j] = sh[sphere_offset(sphere, 0, mi, ell)];
                } else {
                    let v = [0, 1, 2].map(|c| sh[sphere_offset(sphere, c, mi, ell)]);
                    for (c, u) in spherical_to_regularity(ell, v).into_iter().enumerate() {
                        lines[c][j] = u;
                    }
                }
            }
            for (c, line) in lines.iter().enumerate() {
                let sigma = if rank == 0 { 0 } else { sigma_of(c) };
                let k = match (rank, BallBasis::regularity(ell, sigma)) {
                    (0, _) => ell,
                    (_, Some(k)) => k,
                    (_, None) => continue,
                };
                let coeffs = ball.radial_forward(k, line)?;
                let start = ball_offset(ball, c, mi, ell);
                let n = ball.radial_count(ell);
                out[start..start + n].copy_from_slice(&coeffs[..n]);
            }
        }
    }
    Ok(out)
}

fn ball_to_grid(ball: &BallBasis, rank: usize, coeff: &[Complex64]) -> Result<Vec<Complex64>, BasisError> {
    let sphere = ball.sphere();
    let (n_phi, n_theta, n_rg) = ball.grid_shape();
    let ncomp = if rank == 0 { 1 } else { 3 };
    let shell_len = ncomp * sphere.n_orders() * (sphere.l_max() + 1);
    let mut shells = vec![vec![ZERO; shell_len]; n_rg];

    for mi in 0..sphere.n_orders() {
        for ell in sphere.ells(mi) {
            let mut lines = vec![vec![ZERO; n_rg]; ncomp];
            for (c, line) in lines.iter_mut().enumerate() {
                let sigma = if rank == 0 { 0 } else { sigma_of(c) };
                let k = match (rank, BallBasis::regularity(ell, sigma)) {
                    (0, _) => ell,
                    (_, Some(k)) => k,
                    (_, None) => continue,
                };
                let start = ball_offset(ball, c, mi, ell);
                *line = ball.radial_backward(k, &coeff[start..start + ball.radial_count(ell)])?;
            }
            for (j, sh) in shells.iter_mut().enumerate() {
                if rank == 0 {
                    sh[sphere_offset(sphere, 0, mi, ell)] = lines[0][j];
                } else {
                    let u = [lines[0][j], lines[1][j], lines[2][j]];
                    for (c, v) in regularity_to_spherical(ell, u).into_iter().enumerate() {
                        sh[sphere_offset(sphere, c, mi, ell)] = v;
                    }
                }
            }
        }
    }

    let mut grid = vec![ZERO; ncomp * n_phi * n_theta * n_rg];
    for (j, sh) in shells.iter().enumerate() {
        for (i, v) in sphere_backward(sphere, rank, sh)?.into_iter().enumerate() {
            grid[i * n_rg + j] = v;
        }
    }
    Ok(grid)
}

/// Grid values to coefficients.
pub fn to_coeff(space: &Space, rank: usize, grid: &[Complex64]) -> Result<Vec<Complex64>, FieldError> {
    let expected = grid_len(space, rank)?;
    if grid.len() != expected {
        return Err(BasisError::ShapeMismatch {
            context: "field to_coeff",
            expected,
            actual: grid.len(),
        }
        .into());
    }
    let ncomp = n_components(space, rank);
    Ok(match space {
        Space::Cartesian(c) => cartesian_to_coeff(c, ncomp, grid)?,
        Space::Ball(b) => ball_to_coeff(b, rank, grid)?,
        Space::Sphere(s) => sphere_forward(s, rank, grid)?,
    })
}

/// Coefficients to grid values.
pub fn to_grid(space: &Space, rank: usize, coeff: &[Complex64]) -> Result<Vec<Complex64>, FieldError> {
    let expected = coeff_len(space, rank)?;
    if coeff.len() != expected {
        return Err(BasisError::ShapeMismatch {
            context: "field to_grid",
            expected,
            actual: coeff.len(),
        }
        .into());
    }
    let ncomp = n_components(space, rank);
    Ok(match space {
        Space::Cartesian(c) => cartesian_to_grid(c, ncomp, coeff)?,
        Space::Ball(b) => ball_to_grid(b, rank, coeff)?,
        Space::Sphere(s) => sphere_backward(s, rank, coeff)?,
    })
}

/// Physical grid coordinates of each axis: Cartesian axes in order, or
/// (φ, θ, r) for the ball and (φ, θ) for a sphere. Constant axes yield
/// a single `NaN` placeholder.
pub fn grid_axes(space: &Space) -> Vec<Vec<f64>> {
    match space {
        Space::Cartesian(c) => c
            .axes()
            .iter()
            .map(|b| match b {
                Some(AxisBasis::Fourier(f)) => f.grid(),
                Some(AxisBasis::Jacobi(j)) => j.grid(),
                None => vec![f64::NAN],
            })
            .collect(),
        Space::Ball(b) => vec![
            b.sphere().phi_grid(),
            b.sphere().theta_grid().to_vec(),
            b.radial_grid().to_vec(),
        ],
        Space::Sphere(s) => vec![s.phi_grid(), s.theta_grid().to_vec()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::{CartesianCoordinates, FourierBasis, JacobiBasis, SphericalCoordinates};
    use std::sync::Arc;

    fn cartesian() -> Space {
        let c = CartesianCoordinates::new(&["x", "y"]);
        let x = FourierBasis::real(c.coord(0).clone(), 8, (0.0, 2.0 * std::f64::consts::PI), 1.5).unwrap();
        let y = JacobiBasis::chebyshev(c.coord(1).clone(), 6, (0.0, 1.0), 1.5).unwrap();
        Space::Cartesian(CartesianSpace::new(c, Dtype::Real, vec![Some(x.into()), Some(y.into())]).unwrap())
    }

    fn ball() -> Arc<BallBasis> {
        Arc::new(BallBasis::new(SphericalCoordinates::default(), (8, 6, 6), 1.0, 1.5, Dtype::Real).unwrap())
    }

    #[test]
    fn test_map_axis_middle() {
        // shape [2, 3, 2], sum along axis 1
        let data: Vec<Complex64> = (0..12).map(|i| Complex64::new(i as f64, 0.0)).collect();
        let out = map_axis(&data, &[2, 3, 2], 1, 1, |l| Ok(vec![l.iter().sum()])).unwrap();
        let re: Vec<f64> = out.iter().map(|v| v.re).collect();
        assert_eq!(re, vec![6.0, 9.0, 24.0, 27.0]);
    }

    #[test]
    fn test_cartesian_grid_values() {
        let space = cartesian();
        let axes = grid_axes(&space);
        let (xs, ys) = (&axes[0], &axes[1]);
        let grid: Vec<Complex64> = xs
            .iter()
            .flat_map(|x| ys.iter().map(move |y| Complex64::new(x.sin() * y * y + 1.0, 0.0)))
            .collect();
        let c = to_coeff(&space, 0, &grid).unwrap();
        assert_eq!(c.len(), coeff_len(&space, 0).unwrap());
        let back = to_grid(&space, 0, &c).unwrap();
        for (a, b) in grid.iter().zip(&back) {
            assert!((a - b).norm() < 1e-12);
        }
    }

    #[test]
    fn test_ball_scalar_round_trip() {
        let b = ball();
        let space = Space::Ball(b.clone());
        let axes = grid_axes(&space);
        let mut grid = Vec::new();
        for &p in &axes[0] {
            for &t in &axes[1] {
                for &r in &axes[2] {
                    let (x, z) = (r * t.sin() * p.cos(), r * t.cos());
                    grid.push(Complex64::new(1.0 - r * r + x * z + 0.5 * x * x * x, 0.0));
                }
            }
        }
        let c = to_coeff(&space, 0, &grid).unwrap();
        let back = to_grid(&space, 0, &c).unwrap();
        for (a, b) in grid.iter().zip(&back) {
            assert!((a - b).norm() < 1e-11);
        }
    }

    #[test]
    fn test_ball_vector_round_trip() {
        // Smooth field u = (y, -x, z²) in Cartesian components.
        let b = ball();
        let space = Space::Ball(b.clone());
        let axes = grid_axes(&space);
        let n = axes[0].len() * axes[1].len() * axes[2].len();
        let mut grid = vec![Complex64::new(0.0, 0.0); 3 * n];
        let mut i = 0;
        for &p in &axes[0] {
            for &t in &axes[1] {
                for &r in &axes[2] {
                    let (x, y, z) = (r * t.sin() * p.cos(), r * t.sin() * p.sin(), r * t.cos());
                    let (ux, uy, uz) = (y, -x, z * z);
                    let u_r = ux * t.sin() * p.cos() + uy * t.sin() * p.sin() + uz * t.cos();
                    let u_t = ux * t.cos() * p.cos() + uy * t.cos() * p.sin() - uz * t.sin();
                    let u_p = -ux * p.sin() + uy * p.cos();
                    grid[i] = Complex64::new(u_p, 0.0);
                    grid[n + i] = Complex64::new(u_t, 0.0);
                    grid[2 * n + i] = Complex64::new(u_r, 0.0);
                    i += 1;
                }
            }
        }
        let c = to_coeff(&space, 1, &grid).unwrap();
        let back = to_grid(&space, 1, &c).unwrap();
        for (a, b) in grid.iter().zip(&back) {
            assert!((a - b).norm() < 1e-11);
        }
    }

    #[test]
    fn test_rank_two_ball_rejected() {
        assert!(matches!(
            coeff_len(&Space::Ball(ball()), 2),
            Err(FieldError::UnsupportedRank { rank: 2, .. })
        ));
    }
}
