//! Coefficient-space kernels of the ball operators.
//!
//! Each (ℓ, m) block is independent. With regularity components
//! (u₋, u₀, u₊) and ξ± from [`xi`]:
//! - grad f = (ξ₋ D₋ f, 0, -ξ₊ D₊ f)
//! - div u = ξ₋ D₊ u₋ - ξ₊ D₋ u₊
//! - curl u = (-ξ₊ D₋ u₀, ξ₊ D₊ u₋ + ξ₋ D₋ u₊, -ξ₋ D₊ u₀)
//! - lap acts as Δ_{ℓ+σ} on every component

use crate::basis::{BallBasis, RadialLiftBasis, RadialOp, apply_real, regularity_to_spherical, spherical_to_regularity, xi};
use crate::error::ExprError;
use crate::field::{ball_offset, sigma_of, sphere_offset};
use num_complex::Complex64;
use std::collections::HashMap;

const ZERO: Complex64 = Complex64::new(0.0, 0.0);

/// Every stored (order index, degree) pair.
fn blocks(ball: &BallBasis) -> impl Iterator<Item = (usize, usize)> + '_ {
    let sphere = ball.sphere();
    (0..sphere.n_orders()).flat_map(move |mi| sphere.ells(mi).map(move |ell| (mi, ell)))
}

/// out[comp_out] += scale · op(input[comp_in]) on block (mi, ℓ).
#[allow(clippy::too_many_arguments)]
fn apply(
    ball: &BallBasis,
    op: RadialOp,
    scale: f64,
    input: &[Complex64],
    comp_in: usize,
    out: &mut [Complex64],
    comp_out: usize,
    block: (usize, usize),
    k: usize,
) -> Result<(), ExprError> {
    if scale == 0.0 {
        return Ok(());
    }
    let (mi, ell) = block;
    if op.output_regularity(k).is_none() {
        return Ok(());
    }
    let matrix = ball.radial_matrix(op, k)?;
    let src = ball_offset(ball, comp_in, mi, ell);
    let dst = ball_offset(ball, comp_out, mi, ell);
    let n = ball.radial_count(ell);
    let result = apply_real(&matrix, &input[src..src + n]);
    for (o, v) in out[dst..dst + n].iter_mut().zip(result) {
        *o += v * scale;
    }
    Ok(())
}

fn per_comp(ball: &BallBasis) -> usize {
    ball.sphere().n_orders() * (ball.l_max() + 1) * ball.n_r()
}

/// Gradient of a scalar.
pub(crate) fn grad(ball: &BallBasis, f: &[Complex64]) -> Result<Vec<Complex64>, ExprError> {
    let mut out = vec![ZERO; 3 * per_comp(ball)];
    for block in blocks(ball) {
        let ell = block.1;
        let (xm, xp) = xi(ell);
        if ell > 0 {
            apply(ball, RadialOp::DMinus, xm, f, 0, &mut out, 0, block, ell)?;
        }
        apply(ball, RadialOp::DPlus, -xp, f, 0, &mut out, 2, block, ell)?;
    }
    Ok(out)
}

/// Divergence of a vector.
pub(crate) fn div(ball: &BallBasis, u: &[Complex64]) -> Result<Vec<Complex64>, ExprError> {
    let mut out = vec![ZERO; per_comp(ball)];
    for block in blocks(ball) {
        let ell = block.1;
        let (xm, xp) = xi(ell);
        if ell > 0 {
            apply(ball, RadialOp::DPlus, xm, u, 0, &mut out, 0, block, ell - 1)?;
        }
        apply(ball, RadialOp::DMinus, -xp, u, 2, &mut out, 0, block, ell + 1)?;
    }
    Ok(out)
}

/// Curl of a vector.
pub(crate) fn curl(ball: &BallBasis, u: &[Complex64]) -> Result<Vec<Complex64>, ExprError> {
    let mut out = vec![ZERO; 3 * per_comp(ball)];
    for block in blocks(ball) {
        let ell = block.1;
        if ell == 0 {
            continue;
        }
        let (xm, xp) = xi(ell);
        apply(ball, RadialOp::DMinus, -xp, u, 1, &mut out, 0, block, ell)?;
        apply(ball, RadialOp::DPlus, xp, u, 0, &mut out, 1, block, ell - 1)?;
        apply(ball, RadialOp::DMinus, xm, u, 2, &mut out, 1, block, ell + 1)?;
        apply(ball, RadialOp::DPlus, -xm, u, 1, &mut out, 2, block, ell)?;
    }
    Ok(out)
}

/// Scalar or vector Laplacian.
pub(crate) fn lap(ball: &BallBasis, u: &[Complex64], rank: usize) -> Result<Vec<Complex64>, ExprError> {
    let mut out = vec![ZERO; u.len()];
    for block in blocks(ball) {
        let ell = block.1;
        if rank == 0 {
            apply(ball, RadialOp::Laplacian, 1.0, u, 0, &mut out, 0, block, ell)?;
            continue;
        }
        for comp in 0..3 {
            if let Some(k) = BallBasis::regularity(ell, sigma_of(comp)) {
                apply(ball, RadialOp::Laplacian, 1.0, u, comp, &mut out, comp, block, k)?;
            }
        }
    }
    Ok(out)
}

/// Lift sphere coefficients onto mode `mode(k)` of the lift family,
/// expressed in the ball's own radial functions.
pub(crate) fn lift(
    lb: &RadialLiftBasis,
    surface: &[Complex64],
    rank: usize,
    index: i64,
) -> Result<Vec<Complex64>, ExprError> {
    let ball = lb.ball();
    let sphere = ball.sphere();
    let ncomp = if rank == 0 { 1 } else { 3 };
    let mut out = vec![ZERO; ncomp * per_comp(ball)];
    let mut profiles: HashMap<(usize, usize), Vec<Complex64>> = HashMap::new();
    let mut profile = |ell: usize, k: usize| -> Result<Vec<Complex64>, ExprError> {
        if let Some(p) = profiles.get(&(ell, k)) {
            return Ok(p.clone());
        }
        let count = lb.radial_count(ell);
        let mode = super::linearize::resolve_index(count, index)?;
        let values = ball
            .radial_grid()
            .iter()
            .map(|&r| Ok(Complex64::new(lb.jets(k, mode + 1, r)?[mode][0], 0.0)))
            .collect::<Result<Vec<_>, ExprError>>()?;
        let mut coeffs = ball.radial_forward(k, &values)?;
        coeffs.truncate(count);
        profiles.insert((ell, k), coeffs.clone());
        Ok(coeffs)
    };
    for (mi, ell) in blocks(ball) {
        let values: Vec<(usize, usize, Complex64)> = if rank == 0 {
            vec![(0, ell, surface[sphere_offset(sphere, 0, mi, ell)])]
        } else {
            let v = [0, 1, 2].map(|c| surface[sphere_offset(sphere, c, mi, ell)]);
            spherical_to_regularity(ell, v)
                .into_iter()
                .enumerate()
                .filter_map(|(c, value)| BallBasis::regularity(ell, sigma_of(c)).map(|k| (c, k, value)))
                .collect()
        };
        for (comp, k, value) in values {
            if value == ZERO {
                continue;
            }
            let p = profile(ell, k)?;
            let dst = ball_offset(ball, comp, mi, ell);
            for (o, pn) in out[dst..dst + p.len()].iter_mut().zip(&p) {
                *o += value * pn;
            }
        }
    }
    Ok(out)
}

/// Restrict to radius `r`, returning sphere coefficients (R, s̃, t̃ for vectors).
pub(crate) fn interp_radius(ball: &BallBasis, u: &[Complex64], rank: usize, r: f64) -> Result<Vec<Complex64>, ExprError> {
    let sphere = ball.sphere();
    let ncomp = if rank == 0 { 1 } else { 3 };
    let mut out = vec![ZERO; ncomp * sphere.n_orders() * (sphere.l_max() + 1)];
    for (mi, ell) in blocks(ball) {
        let value = |comp: usize, k: usize| -> Result<Complex64, ExprError> {
            let src = ball_offset(ball, comp, mi, ell);
            Ok(ball.radial_interpolate(k, &u[src..src + ball.radial_count(ell)], r)?)
        };
        if rank == 0 {
            out[sphere_offset(sphere, 0, mi, ell)] = value(0, ell)?;
            continue;
        }
        let mut reg = [ZERO; 3];
        for (c, slot) in reg.iter_mut().enumerate() {
            if let Some(k) = BallBasis::regularity(ell, sigma_of(c)) {
                *slot = value(c, k)?;
            }
        }
        for (c, v) in regularity_to_spherical(ell, reg).into_iter().enumerate() {
            out[sphere_offset(sphere, c, mi, ell)] = if ell == 0 && c > 0 { ZERO } else { v };
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::{Dtype, SphericalCoordinates};
    use crate::field::{Field, Space};
    use std::sync::Arc;

    fn ball() -> Arc<BallBasis> {
        Arc::new(BallBasis::new(SphericalCoordinates::default(), (8, 6, 8), 1.0, 1.5, Dtype::Real).unwrap())
    }

    #[test]
    fn test_div_grad_is_lap() {
        let b = ball();
        let mut f = Field::scalar("f", Space::Ball(Arc::clone(&b))).unwrap();
        // x² + y z, expressed in spherical coordinates (φ, θ, r).
        f.set_grid_fn(|_, p| {
            let (phi, theta, r) = (p[0], p[1], p[2]);
            let x = r * theta.sin() * phi.cos();
            let y = r * theta.sin() * phi.sin();
            let z = r * theta.cos();
            x * x + y * z
        })
        .unwrap();
        let c = f.coeff().unwrap().to_vec();
        let dg = div(&b, &grad(&b, &c).unwrap()).unwrap();
        let l = lap(&b, &c, 0).unwrap();
        for (a, e) in dg.iter().zip(&l) {
            assert!((a - e).norm() < 1e-9);
        }
        let mut out = Field::scalar("lap", Space::Ball(Arc::clone(&b))).unwrap();
        out.set_coeff(l).unwrap();
        for v in out.grid_real().unwrap() {
            assert!((v - 2.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_curl_of_gradient_vanishes() {
        let b = ball();
        let mut f = Field::scalar("f", Space::Ball(Arc::clone(&b))).unwrap();
        f.set_grid_fn(|_, p| p[2].powi(3) * p[1].cos()).unwrap();
        let c = f.coeff().unwrap().to_vec();
        let cg = curl(&b, &grad(&b, &c).unwrap()).unwrap();
        assert!(cg.iter().all(|v| v.norm() < 1e-9));
    }

    #[test]
    fn test_lift_profile_restricts_to_one() {
        let b = ball();
        let s = b.surface();
        let mut tau = Field::scalar("tau", Space::Sphere(Arc::clone(&s))).unwrap();
        tau.set_grid_fn(|_, _| 1.0).unwrap();
        let lifted = lift(&b.lift_basis(2), tau.coeff().unwrap(), 0, -1).unwrap();
        let at_surface = interp_radius(&b, &lifted, 0, 1.0).unwrap();
        let lb = b.lift_basis(2);
        let mode = b.radial_count(0) - 1;
        let psi = lb.jets(0, mode + 1, 1.0).unwrap()[mode][0];
        let mut edge = Field::scalar("edge", Space::Sphere(s)).unwrap();
        edge.set_coeff(at_surface).unwrap();
        for v in edge.grid_real().unwrap() {
            assert!((v - psi).abs() < 1e-9);
        }
    }
}
