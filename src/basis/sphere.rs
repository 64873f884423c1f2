//! Spherical-harmonic basis on S2.
//!
//! Scalars expand as f = Σ c_ℓm Y_ℓm with Y_ℓm = P̄_ℓ^m(cos θ) e^{imφ}/√(2π).
//! Tangential and full vectors use the vector harmonics
//! - Y r̂ (radial)
//! - Ψ = r∇Y = θ̂ ∂_θY + φ̂ (im/sin θ) Y
//! - Φ = r̂ × Ψ = φ̂ ∂_θY - θ̂ (im/sin θ) Y
//!
//! with coefficients (R, s̃, t̃) where s̃ and t̃ are scaled by √(ℓ(ℓ+1)) so
//! that the map to regularity components is an orthogonal rotation:
//! - u₋ = ξ₋ R + ξ₊ s̃
//! - u₀ = t̃
//! - u₊ = -ξ₊ R + ξ₋ s̃
//!
//! with ξ₋ = √(ℓ/(2ℓ+1)), ξ₊ = √((ℓ+1)/(2ℓ+1)).
//!
//! Grids are uniform in φ and Gauss-Legendre in cos θ, sorted by
//! increasing θ. Grid components of vectors are ordered (φ, θ, r).

use super::fourier::check_len;
use super::{Dtype, grid_size_for};
use super::coords::SphericalCoordinates;
use crate::error::BasisError;
use crate::polynomial::{assoc_legendre, assoc_legendre_with_derivative, gauss_legendre};
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

/// ξ₋ and ξ₊ for degree ℓ.
pub fn xi(ell: usize) -> (f64, f64) {
    let l = ell as f64;
    ((l / (2.0 * l + 1.0)).sqrt(), ((l + 1.0) / (2.0 * l + 1.0)).sqrt())
}

/// (R, s̃, t̃) to regularity components (u₋, u₀, u₊).
pub fn spherical_to_regularity(ell: usize, v: [Complex64; 3]) -> [Complex64; 3] {
    let (xm, xp) = xi(ell);
    let [r, s, t] = v;
    [r * xm + s * xp, t, -r * xp + s * xm]
}

/// Regularity components (u₋, u₀, u₊) to (R, s̃, t̃).
pub fn regularity_to_spherical(ell: usize, u: [Complex64; 3]) -> [Complex64; 3] {
    let (xm, xp) = xi(ell);
    let [um, u0, up] = u;
    [um * xm - up * xp, um * xp + up * xm, u0]
}

#[derive(Clone, Debug)]
struct OrderTable {
    m: i64,
    /// values[j][ℓ - |m|] at colatitude node j.
    values: Vec<Vec<f64>>,
    dtheta: Vec<Vec<f64>>,
}

/// Spherical-harmonic basis.
#[derive(Clone)]
pub struct SphereBasis {
    coords: SphericalCoordinates,
    n_phi: usize,
    n_theta: usize,
    dealias: f64,
    dtype: Dtype,
    radius: f64,
    phi_grid_size: usize,
    l_max: usize,
    theta: Vec<f64>,
    cos_theta: Vec<f64>,
    sin_theta: Vec<f64>,
    weights: Vec<f64>,
    orders: Vec<OrderTable>,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl fmt::Debug for SphereBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SphereBasis")
            .field("n_phi", &self.n_phi)
            .field("n_theta", &self.n_theta)
            .field("dealias", &self.dealias)
            .field("dtype", &self.dtype)
            .field("radius", &self.radius)
            .finish()
    }
}

impl SphereBasis {
    /// Create an S2 basis with `n_phi` longitudes and `n_theta` degrees.
    pub fn new(
        coords: SphericalCoordinates,
        shape: (usize, usize),
        radius: f64,
        dealias: f64,
        dtype: Dtype,
    ) -> Result<Self, BasisError> {
        let (n_phi, n_theta) = shape;
        if n_phi == 0 || n_phi % 2 != 0 || n_theta == 0 {
            return Err(BasisError::InvalidParameter(format!(
                "sphere shape must have even positive n_phi and positive n_theta, got {shape:?}"
            )));
        }
        if !(radius > 0.0) {
            return Err(BasisError::InvalidParameter(format!("radius must be positive, got {radius}")));
        }
        let phi_grid_size = grid_size_for(n_phi, dealias)?;
        let theta_grid_size = grid_size_for(n_theta, dealias)?;
        let l_max = n_theta - 1;

        let (x, w) = gauss_legendre(theta_grid_size)?;
        // Descending cos θ is ascending θ.
        let cos_theta: Vec<f64> = x.iter().rev().copied().collect();
        let weights: Vec<f64> = w.iter().rev().copied().collect();
        let theta = cos_theta.iter().map(|c| c.acos()).collect();
        let sin_theta = cos_theta.iter().map(|c| (1.0 - c * c).sqrt()).collect();

        let half = n_phi as i64 / 2;
        let m_values: Vec<i64> = match dtype {
            Dtype::Real => (0..half).collect(),
            Dtype::Complex => (0..n_phi as i64)
                .map(|i| if i < half { i } else { i - n_phi as i64 })
                .filter(|&m| m != -half)
                .collect(),
        };
        let orders = m_values
            .into_iter()
            .filter(|m| m.unsigned_abs() as usize <= l_max)
            .map(|m| {
                let am = m.unsigned_abs() as usize;
                let (values, dtheta) = cos_theta
                    .iter()
                    .map(|&c| assoc_legendre_with_derivative(am, l_max, c))
                    .unzip();
                OrderTable { m, values, dtheta }
            })
            .collect();

        let mut planner = FftPlanner::<f64>::new();
        Ok(Self {
            coords,
            n_phi,
            n_theta,
            dealias,
            dtype,
            radius,
            phi_grid_size,
            l_max,
            theta,
            cos_theta,
            sin_theta,
            weights,
            orders,
            forward: planner.plan_fft_forward(phi_grid_size),
            inverse: planner.plan_fft_inverse(phi_grid_size),
        })
    }

    pub fn coords(&self) -> &SphericalCoordinates {
        &self.coords
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_phi, self.n_theta)
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn dealias(&self) -> f64 {
        self.dealias
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn l_max(&self) -> usize {
        self.l_max
    }

    /// Grid shape (n_φ, n_θ).
    pub fn grid_shape(&self) -> (usize, usize) {
        (self.phi_grid_size, self.theta.len())
    }

    /// Number of stored azimuthal orders.
    pub fn n_orders(&self) -> usize {
        self.orders.len()
    }

    /// Azimuthal order of storage index `mi`.
    pub fn m(&self, mi: usize) -> i64 {
        self.orders[mi].m
    }

    /// Degrees ℓ = |m| ..= ℓ_max stored for order index `mi`.
    pub fn ells(&self, mi: usize) -> std::ops::RangeInclusive<usize> {
        self.orders[mi].m.unsigned_abs() as usize..=self.l_max
    }

    pub fn n_ells(&self, mi: usize) -> usize {
        self.l_max + 1 - self.orders[mi].m.unsigned_abs() as usize
    }

    pub fn phi_grid(&self) -> Vec<f64> {
        let dphi = 2.0 * PI / self.phi_grid_size as f64;
        (0..self.phi_grid_size).map(|j| dphi * j as f64).collect()
    }

    pub fn theta_grid(&self) -> &[f64] {
        &self.theta
    }

    pub fn sin_theta(&self) -> &[f64] {
        &self.sin_theta
    }

    /// Gauss-Legendre weights in cos θ, aligned with [`Self::theta_grid`].
    pub fn theta_weights(&self) -> &[f64] {
        &self.weights
    }

    fn phi_index(&self, m: i64) -> usize {
        if m >= 0 {
            m as usize
        } else {
            (self.phi_grid_size as i64 + m) as usize
        }
    }

    /// Azimuthal forward transform of one grid line, returning one
    /// coefficient per stored order.
    pub fn phi_forward(&self, line: &[Complex64]) -> Result<Vec<Complex64>, BasisError> {
        check_len("sphere phi_forward", self.phi_grid_size, line.len())?;
        let mut buf = line.to_vec();
        self.forward.process(&mut buf);
        let scale = 1.0 / self.phi_grid_size as f64;
        Ok(self.orders.iter().map(|o| buf[self.phi_index(o.m)] * scale).collect())
    }

    /// Azimuthal backward transform to one grid line.
    pub fn phi_backward(&self, coeffs: &[Complex64]) -> Result<Vec<Complex64>, BasisError> {
        check_len("sphere phi_backward", self.orders.len(), coeffs.len())?;
        let mut buf = vec![Complex64::new(0.0, 0.0); self.phi_grid_size];
        for (o, c) in self.orders.iter().zip(coeffs) {
            buf[self.phi_index(o.m)] += c;
            if self.dtype == Dtype::Real && o.m > 0 {
                buf[self.phi_index(-o.m)] += c.conj();
            }
        }
        self.inverse.process(&mut buf);
        if self.dtype == Dtype::Real {
            for v in &mut buf {
                v.im = 0.0;
            }
        }
        Ok(buf)
    }

    /// Colatitude forward transform of order `mi`: c_ℓ = √(2π) Σ_j w_j P̄_ℓ^m g_j.
    pub fn scalar_forward(&self, mi: usize, g: &[Complex64]) -> Result<Vec<Complex64>, BasisError> {
        check_len("sphere scalar_forward", self.theta.len(), g.len())?;
        let table = &self.orders[mi];
        let norm = (2.0 * PI).sqrt();
        let mut out = vec![Complex64::new(0.0, 0.0); self.n_ells(mi)];
        for (j, gj) in g.iter().enumerate() {
            let wg = gj * (self.weights[j] * norm);
            for (l, p) in table.values[j].iter().enumerate() {
                out[l] += wg * *p;
            }
        }
        Ok(out)
    }

    /// Colatitude backward transform of order `mi`.
    pub fn scalar_backward(&self, mi: usize, c: &[Complex64]) -> Result<Vec<Complex64>, BasisError> {
        check_len("sphere scalar_backward", self.n_ells(mi), c.len())?;
        let table = &self.orders[mi];
        let norm = 1.0 / (2.0 * PI).sqrt();
        Ok(table
            .values
            .iter()
            .map(|row| row.iter().zip(c).map(|(p, cl)| cl * (*p * norm)).sum())
            .collect())
    }

    /// Vector forward transform of order `mi` from grid components
    /// (u_φ, u_θ, u_r) to harmonic coefficients (R, s̃, t̃).
    pub fn vector_forward(
        &self,
        mi: usize,
        u_phi: &[Complex64],
        u_theta: &[Complex64],
        u_r: &[Complex64],
    ) -> Result<[Vec<Complex64>; 3], BasisError> {
        let nt = self.theta.len();
        check_len("sphere vector_forward", nt, u_phi.len())?;
        check_len("sphere vector_forward", nt, u_theta.len())?;
        let radial = self.scalar_forward(mi, u_r)?;
        let table = &self.orders[mi];
        let am = table.m.unsigned_abs() as usize;
        let im = Complex64::new(0.0, table.m as f64);
        let norm = (2.0 * PI).sqrt();
        let n = self.n_ells(mi);
        let mut s = vec![Complex64::new(0.0, 0.0); n];
        let mut t = vec![Complex64::new(0.0, 0.0); n];
        for j in 0..nt {
            let w = self.weights[j] * norm;
            let inv_sin = 1.0 / self.sin_theta[j];
            for l in 0..n {
                let p = table.values[j][l];
                let dp = table.dtheta[j][l];
                s[l] += (u_theta[j] * dp - im * u_phi[j] * (p * inv_sin)) * w;
                t[l] += (im * u_theta[j] * (p * inv_sin) + u_phi[j] * dp) * w;
            }
        }
        for l in 0..n {
            let ell = am + l;
            if ell == 0 {
                s[l] = Complex64::new(0.0, 0.0);
                t[l] = Complex64::new(0.0, 0.0);
            } else {
                let scale = 1.0 / ((ell * (ell + 1)) as f64).sqrt();
                s[l] *= scale;
                t[l] *= scale;
            }
        }
        Ok([radial, s, t])
    }

    /// Vector backward transform of order `mi` from (R, s̃, t̃) to grid
    /// components (u_φ, u_θ, u_r).
    pub fn vector_backward(
        &self,
        mi: usize,
        coeffs: [&[Complex64]; 3],
    ) -> Result<[Vec<Complex64>; 3], BasisError> {
        let [radial, s, t] = coeffs;
        let n = self.n_ells(mi);
        check_len("sphere vector_backward", n, s.len())?;
        check_len("sphere vector_backward", n, t.len())?;
        let u_r = self.scalar_backward(mi, radial)?;
        let table = &self.orders[mi];
        let am = table.m.unsigned_abs() as usize;
        let im = Complex64::new(0.0, table.m as f64);
        let norm = 1.0 / (2.0 * PI).sqrt();
        let nt = self.theta.len();
        let mut u_phi = vec![Complex64::new(0.0, 0.0); nt];
        let mut u_theta = vec![Complex64::new(0.0, 0.0); nt];
        for l in 0..n {
            let ell = am + l;
            if ell == 0 {
                continue;
            }
            let scale = norm / ((ell * (ell + 1)) as f64).sqrt();
            let (sl, tl) = (s[l] * scale, t[l] * scale);
            for j in 0..nt {
                let p = table.values[j][l];
                let dp = table.dtheta[j][l];
                let p_sin = p / self.sin_theta[j];
                u_theta[j] += sl * dp - im * tl * p_sin;
                u_phi[j] += im * sl * p_sin + tl * dp;
            }
        }
        Ok([u_phi, u_theta, u_r])
    }

    /// Evaluate scalar coefficients of order `mi` at an arbitrary colatitude.
    pub fn scalar_at_theta(&self, mi: usize, c: &[Complex64], theta: f64) -> Result<Complex64, BasisError> {
        check_len("sphere scalar_at_theta", self.n_ells(mi), c.len())?;
        let am = self.orders[mi].m.unsigned_abs() as usize;
        let p = assoc_legendre(am, self.l_max, theta.cos());
        let norm = 1.0 / (2.0 * PI).sqrt();
        Ok(p.iter().zip(c).map(|(pl, cl)| cl * (pl * norm)).sum())
    }

    /// Evaluate per-order coefficients at an arbitrary longitude.
    pub fn value_at_phi(&self, coeffs: &[Complex64], phi: f64) -> Result<Complex64, BasisError> {
        check_len("sphere value_at_phi", self.orders.len(), coeffs.len())?;
        let mut sum = Complex64::new(0.0, 0.0);
        for (o, c) in self.orders.iter().zip(coeffs) {
            let e = Complex64::from_polar(1.0, o.m as f64 * phi);
            sum += c * e;
            if self.dtype == Dtype::Real && o.m > 0 {
                sum += c.conj() * e.conj();
            }
        }
        Ok(sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sphere(dtype: Dtype) -> SphereBasis {
        SphereBasis::new(SphericalCoordinates::default(), (16, 8), 1.0, 1.5, dtype).unwrap()
    }

    fn grid_scalar(s: &SphereBasis, f: impl Fn(f64, f64) -> f64) -> Vec<Vec<Complex64>> {
        // [theta][phi]
        s.theta_grid()
            .iter()
            .map(|&t| s.phi_grid().iter().map(|&p| Complex64::new(f(p, t), 0.0)).collect())
            .collect()
    }

    #[test]
    fn test_orders_and_degrees() {
        let s = sphere(Dtype::Real);
        assert_eq!(s.n_orders(), 8);
        assert_eq!(s.ells(3), 3..=7);
        let c = sphere(Dtype::Complex);
        assert_eq!(c.n_orders(), 15);
    }

    #[test]
    fn test_scalar_round_trip() {
        let s = sphere(Dtype::Real);
        let lines = grid_scalar(&s, |p, t| (t.cos() * 2.0 + (t.sin() * p.cos()).powi(2)) - 0.3 * t.sin().powi(3) * (3.0 * p).sin());
        let per_theta: Vec<Vec<Complex64>> = lines.iter().map(|l| s.phi_forward(l).unwrap()).collect();
        for mi in 0..s.n_orders() {
            let g: Vec<Complex64> = per_theta.iter().map(|row| row[mi]).collect();
            let c = s.scalar_forward(mi, &g).unwrap();
            let back = s.scalar_backward(mi, &c).unwrap();
            for (a, b) in g.iter().zip(&back) {
                assert!((a - b).norm() < 1e-12, "mi={mi}");
            }
        }
    }

    #[test]
    fn test_y10_coefficient() {
        // cos θ = √(4π/3) Y_10
        let s = sphere(Dtype::Real);
        let lines = grid_scalar(&s, |_, t| t.cos());
        let g: Vec<Complex64> = lines.iter().map(|l| s.phi_forward(l).unwrap()[0]).collect();
        let c = s.scalar_forward(0, &g).unwrap();
        assert!((c[1].re - (4.0 * PI / 3.0).sqrt()).abs() < 1e-12);
        assert!(c[0].norm() < 1e-12 && c[2].norm() < 1e-12);
    }

    #[test]
    fn test_vector_round_trip() {
        // Rigid rotation u_φ = sin θ plus a radial part cos θ.
        let s = sphere(Dtype::Real);
        let phi_lines = grid_scalar(&s, |_, t| t.sin());
        let r_lines = grid_scalar(&s, |p, t| t.cos() + t.sin() * p.cos());
        let zero_lines = grid_scalar(&s, |_, _| 0.0);
        let fwd = |lines: &Vec<Vec<Complex64>>| -> Vec<Vec<Complex64>> {
            lines.iter().map(|l| s.phi_forward(l).unwrap()).collect()
        };
        let (uphi, uth, ur) = (fwd(&phi_lines), fwd(&zero_lines), fwd(&r_lines));
        for mi in 0..s.n_orders() {
            let col = |a: &Vec<Vec<Complex64>>| -> Vec<Complex64> { a.iter().map(|row| row[mi]).collect() };
            let (a, b, c) = (col(&uphi), col(&uth), col(&ur));
            let [rr, ss, tt] = s.vector_forward(mi, &a, &b, &c).unwrap();
            let [bp, bt, br] = s.vector_backward(mi, [&rr, &ss, &tt]).unwrap();
            for j in 0..a.len() {
                assert!((a[j] - bp[j]).norm() < 1e-12);
                assert!((b[j] - bt[j]).norm() < 1e-12);
                assert!((c[j] - br[j]).norm() < 1e-12);
            }
        }
    }

    #[test]
    fn test_regularity_rotation_is_orthogonal() {
        let v = [Complex64::new(1.0, 0.5), Complex64::new(-0.2, 0.1), Complex64::new(0.3, 0.0)];
        for ell in 1..5 {
            let u = spherical_to_regularity(ell, v);
            let back = regularity_to_spherical(ell, u);
            for k in 0..3 {
                assert!((v[k] - back[k]).norm() < 1e-14);
            }
        }
    }
}
