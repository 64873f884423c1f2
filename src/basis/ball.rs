//! Ball basis: spherical harmonics × regular radial Jacobi polynomials.
//!
//! Each (ℓ, m) block of a tensor field is stored in regularity components.
//! A component with total regularity k = ℓ + σ expands in
//!
//! φ_n^{k,α}(r) = 2^{k/2} r^k p̂_n^{(α, k+1/2)}(z),  z = 2r² - 1
//!
//! which is orthonormal against (1-z)^α (1+z)^{1/2} dz. The radial grid is
//! the Gauss-Jacobi(α, 1/2) rule in z, so every φ_n^{k,α} is transformed
//! exactly by the same nodes and weights for every k.
//!
//! A component exists only when k ≥ 0 and it is not the σ = 0 component
//! of ℓ = 0. Regularity k transforms exactly on the radial grid for up to
//! `n_count(k) = ⌊(2N_r + 1 - k)/2⌋` modes. Every component at degree ℓ
//! stores the same `radial_count(ℓ) = n_count(ℓ + 1)` modes, so D₋ keeps
//! the mode count of a degree and D₊ lowers it by one.

use super::fourier::check_len;
use super::grid_size_for;
use super::coords::SphericalCoordinates;
use super::sphere::SphereBasis;
use super::Dtype;
use crate::error::BasisError;
use crate::polynomial::{JET_DEPTH, JacobiFamily, Jet, gauss_jacobi};
use faer::Mat;
use num_complex::Complex64;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Radial operators on one regularity component, in coefficient space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RadialOp {
    /// D₋ = d/dr + (k+1)/r, mapping k to k-1.
    DMinus,
    /// D₊ = d/dr - k/r, mapping k to k+1.
    DPlus,
    /// Δ_k = d²/dr² + (2/r) d/dr - k(k+1)/r², mapping k to k.
    Laplacian,
}

impl RadialOp {
    /// Regularity of the output for input regularity `k`.
    pub fn output_regularity(self, k: usize) -> Option<usize> {
        match self {
            Self::DMinus => k.checked_sub(1),
            Self::DPlus => Some(k + 1),
            Self::Laplacian => Some(k),
        }
    }

    /// Apply the operator pointwise to a jet of g at radius r.
    pub fn apply_jet(self, k: usize, r: f64, g: &Jet) -> f64 {
        let kf = k as f64;
        match self {
            Self::DMinus => g[1] + (kf + 1.0) * g[0] / r,
            Self::DPlus => g[1] - kf * g[0] / r,
            Self::Laplacian => g[2] + 2.0 * g[1] / r - kf * (kf + 1.0) * g[0] / (r * r),
        }
    }
}

/// Mode count for regularity k with `n_r` radial modes.
pub(crate) fn regular_count(n_r: usize, k: usize) -> usize {
    (2 * n_r + 1).saturating_sub(k) / 2
}

/// Jets of φ_0^{k,α} .. φ_{count-1}^{k,α} at physical radius r, with
/// derivatives taken in the physical radius of a ball of radius `radius`.
pub fn radial_jets(k: usize, alpha: f64, count: usize, r: f64, radius: f64) -> Result<Vec<Jet>, BasisError> {
    let family = JacobiFamily::new(alpha, k as f64 + 0.5)?;
    let x = r / radius;
    let z = 2.0 * x * x - 1.0;
    let scale = 2f64.powf(k as f64 / 2.0);

    // Derivatives of A = x^k.
    let kf = k as f64;
    let mut a = [0.0; JET_DEPTH];
    let mut falling = 1.0;
    for (i, ai) in a.iter_mut().enumerate() {
        if i > 0 {
            falling *= kf - (i as f64 - 1.0);
        }
        *ai = if i <= k { falling * x.powi(k as i32 - i as i32) } else { 0.0 };
    }

    const BINOMIAL: [[f64; JET_DEPTH]; JET_DEPTH] = [
        [1.0, 0.0, 0.0, 0.0],
        [1.0, 1.0, 0.0, 0.0],
        [1.0, 2.0, 1.0, 0.0],
        [1.0, 3.0, 3.0, 1.0],
    ];

    let inv_radius = 1.0 / radius;
    Ok(family
        .jets(count, z)
        .into_iter()
        .map(|p| {
            // Derivatives of B = p(2x² - 1).
            let b = [
                p[0],
                4.0 * x * p[1],
                16.0 * x * x * p[2] + 4.0 * p[1],
                64.0 * x * x * x * p[3] + 48.0 * x * p[2],
            ];
            let mut jet = [0.0; JET_DEPTH];
            let mut stretch = scale;
            for (j, out) in jet.iter_mut().enumerate() {
                let mut s = 0.0;
                for i in 0..=j {
                    s += BINOMIAL[j][i] * a[i] * b[j - i];
                }
                *out = s * stretch;
                stretch *= inv_radius;
            }
            jet
        })
        .collect())
}

/// Gauss quadrature for the radial family with parameter α, in physical
/// radius. The weights integrate against (1-z)^α (1+z)^{1/2} dz.
pub fn radial_quadrature(alpha: f64, q: usize, radius: f64) -> Result<(Vec<f64>, Vec<f64>), BasisError> {
    let (z, w) = gauss_jacobi(q, alpha, 0.5)?;
    let r = z.iter().map(|zi| radius * ((zi + 1.0) / 2.0).sqrt()).collect();
    Ok((r, w))
}

fn check_fits(context: &'static str, max: usize, actual: usize) -> Result<(), BasisError> {
    if actual > max {
        return Err(BasisError::ShapeMismatch {
            context,
            expected: max,
            actual,
        });
    }
    Ok(())
}

#[derive(Clone, Debug)]
struct RadialTransform {
    forward: Mat<f64>,
    backward: Mat<f64>,
}

/// Ball basis of radius R.
pub struct BallBasis {
    sphere: Arc<SphereBasis>,
    n_r: usize,
    radial_grid: Vec<f64>,
    transforms: Vec<RadialTransform>,
    operators: Mutex<HashMap<(RadialOp, usize), Arc<Mat<f64>>>>,
}

impl fmt::Debug for BallBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BallBasis")
            .field("shape", &self.shape())
            .field("radius", &self.radius())
            .field("dealias", &self.sphere.dealias())
            .field("dtype", &self.sphere.dtype())
            .finish()
    }
}

impl BallBasis {
    /// Create a ball basis with shape (N_φ, N_θ, N_r).
    pub fn new(
        coords: SphericalCoordinates,
        shape: (usize, usize, usize),
        radius: f64,
        dealias: f64,
        dtype: Dtype,
    ) -> Result<Self, BasisError> {
        let (n_phi, n_theta, n_r) = shape;
        if n_r == 0 {
            return Err(BasisError::InvalidParameter("ball needs at least one radial mode".into()));
        }
        let sphere = SphereBasis::new(coords, (n_phi, n_theta), radius, dealias, dtype)?;
        let n_rg = grid_size_for(n_r, dealias)?;
        let (nodes, weights) = radial_quadrature(0.0, n_rg, radius)?;

        // Vectors need regularities up to ℓ_max + 1.
        let k_max = sphere.l_max() + 1;
        let mut transforms = Vec::with_capacity(k_max + 1);
        for k in 0..=k_max {
            let count = regular_count(n_r, k);
            let mut forward = Mat::zeros(count, n_rg);
            let mut backward = Mat::zeros(n_rg, count);
            for (i, (&r, &w)) in nodes.iter().zip(&weights).enumerate() {
                for (n, jet) in radial_jets(k, 0.0, count, r, radius)?.iter().enumerate() {
                    backward[(i, n)] = jet[0];
                    forward[(n, i)] = w * jet[0];
                }
            }
            transforms.push(RadialTransform { forward, backward });
        }
        log::debug!(
            "built ball basis {:?} with {} radial transforms",
            shape,
            transforms.len()
        );

        Ok(Self {
            sphere: Arc::new(sphere),
            n_r,
            radial_grid: nodes,
            transforms,
            operators: Mutex::new(HashMap::new()),
        })
    }

    pub fn sphere(&self) -> &SphereBasis {
        &self.sphere
    }

    /// The S2 basis of the outer surface, shared by all surface fields.
    pub fn surface(&self) -> Arc<SphereBasis> {
        Arc::clone(&self.sphere)
    }

    pub fn coords(&self) -> &SphericalCoordinates {
        self.sphere.coords()
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        let (n_phi, n_theta) = self.sphere.shape();
        (n_phi, n_theta, self.n_r)
    }

    pub fn n_r(&self) -> usize {
        self.n_r
    }

    pub fn radius(&self) -> f64 {
        self.sphere.radius()
    }

    pub fn dtype(&self) -> Dtype {
        self.sphere.dtype()
    }

    pub fn l_max(&self) -> usize {
        self.sphere.l_max()
    }

    /// Grid shape (n_φ, n_θ, n_r).
    pub fn grid_shape(&self) -> (usize, usize, usize) {
        let (a, b) = self.sphere.grid_shape();
        (a, b, self.radial_grid.len())
    }

    /// Physical radial grid (ascending).
    pub fn radial_grid(&self) -> &[f64] {
        &self.radial_grid
    }

    /// Largest exact mode count at regularity k (the transform size).
    pub fn n_count(&self, k: usize) -> usize {
        regular_count(self.n_r, k)
    }

    /// Radial modes stored by every component at degree ℓ.
    pub fn radial_count(&self, ell: usize) -> usize {
        regular_count(self.n_r, ell + 1)
    }

    /// Regularity k = ℓ + σ of component σ ∈ {-1, 0, 1}, if it exists.
    pub fn regularity(ell: usize, sigma: i32) -> Option<usize> {
        if ell == 0 && sigma == 0 {
            return None;
        }
        usize::try_from(ell as i64 + sigma as i64).ok()
    }

    /// Number of radial modes of component σ at degree ℓ (zero if invalid).
    pub fn component_count(&self, ell: usize, sigma: i32) -> usize {
        Self::regularity(ell, sigma).map_or(0, |_| self.radial_count(ell))
    }

    /// Jets of the α = 0 radial functions of regularity k at radius r.
    pub fn jets(&self, k: usize, count: usize, r: f64) -> Result<Vec<Jet>, BasisError> {
        radial_jets(k, 0.0, count, r, self.radius())
    }

    /// Radial quadrature with `q` nodes for family α.
    pub fn quadrature(&self, alpha: f64, q: usize) -> Result<(Vec<f64>, Vec<f64>), BasisError> {
        radial_quadrature(alpha, q, self.radius())
    }

    fn transform(&self, k: usize) -> Result<&RadialTransform, BasisError> {
        self.transforms.get(k).ok_or_else(|| {
            BasisError::InvalidParameter(format!(
                "regularity {k} exceeds the largest supported value {}",
                self.transforms.len() - 1
            ))
        })
    }

    /// Radial grid values to coefficients of regularity k.
    pub fn radial_forward(&self, k: usize, values: &[Complex64]) -> Result<Vec<Complex64>, BasisError> {
        check_len("ball radial_forward", self.radial_grid.len(), values.len())?;
        Ok(super::apply_real(&self.transform(k)?.forward, values))
    }

    /// Leading coefficients of regularity k to radial grid values.
    pub fn radial_backward(&self, k: usize, coeffs: &[Complex64]) -> Result<Vec<Complex64>, BasisError> {
        check_fits("ball radial_backward", self.n_count(k), coeffs.len())?;
        Ok(super::apply_real(&self.transform(k)?.backward, coeffs))
    }

    /// Evaluate leading coefficients of regularity k at radius r.
    pub fn radial_interpolate(&self, k: usize, coeffs: &[Complex64], r: f64) -> Result<Complex64, BasisError> {
        check_fits("ball radial_interpolate", self.n_count(k), coeffs.len())?;
        let jets = self.jets(k, coeffs.len(), r)?;
        Ok(coeffs.iter().zip(&jets).map(|(c, j)| c * j[0]).sum())
    }

    /// Coefficient matrix of a radial operator acting on regularity k.
    ///
    /// Built by Gauss projection onto the α = 0 family of the output
    /// regularity, which is exact for the polynomial degrees involved.
    pub fn radial_matrix(&self, op: RadialOp, k: usize) -> Result<Arc<Mat<f64>>, BasisError> {
        if let Some(m) = self.operators.lock().get(&(op, k)) {
            return Ok(Arc::clone(m));
        }
        let k_out = op.output_regularity(k).ok_or_else(|| {
            BasisError::InvalidParameter(format!("{op:?} is undefined on regularity {k}"))
        })?;
        let (n_in, n_out) = (self.n_count(k), self.n_count(k_out));
        let (nodes, weights) = self.quadrature(0.0, self.n_r + 2)?;
        let mut matrix = Mat::zeros(n_out, n_in);
        for (&r, &w) in nodes.iter().zip(&weights) {
            let input = self.jets(k, n_in, r)?;
            let output = self.jets(k_out, n_out, r)?;
            for (n, g) in input.iter().enumerate() {
                let value = w * op.apply_jet(k, r, g);
                for (m, psi) in output.iter().enumerate() {
                    matrix[(m, n)] += psi[0] * value;
                }
            }
        }
        let matrix = Arc::new(matrix);
        self.operators.lock().insert((op, k), Arc::clone(&matrix));
        Ok(matrix)
    }

    /// Radial lift family with α raised by `shift`.
    pub fn lift_basis(self: &Arc<Self>, shift: usize) -> RadialLiftBasis {
        RadialLiftBasis {
            ball: Arc::clone(self),
            alpha: shift as f64,
        }
    }

    /// Alias of [`Self::lift_basis`].
    pub fn derivative_basis(self: &Arc<Self>, order: usize) -> RadialLiftBasis {
        self.lift_basis(order)
    }
}

/// Radial family used to lift surface tau terms into the ball.
#[derive(Clone, Debug)]
pub struct RadialLiftBasis {
    ball: Arc<BallBasis>,
    alpha: f64,
}

impl RadialLiftBasis {
    pub fn ball(&self) -> &Arc<BallBasis> {
        &self.ball
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn radial_count(&self, ell: usize) -> usize {
        self.ball.radial_count(ell)
    }

    pub fn jets(&self, k: usize, count: usize, r: f64) -> Result<Vec<Jet>, BasisError> {
        radial_jets(k, self.alpha, count, r, self.ball.radius())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ball() -> BallBasis {
        BallBasis::new(SphericalCoordinates::default(), (8, 6, 8), 1.0, 1.5, Dtype::Real).unwrap()
    }

    #[test]
    fn test_counts_and_regularity() {
        let b = ball();
        assert_eq!(b.n_count(0), 8);
        assert_eq!(b.n_count(1), 8);
        assert_eq!(b.n_count(2), 7);
        assert_eq!(b.radial_count(0), 8);
        assert_eq!(b.radial_count(1), 7);
        assert_eq!(b.radial_count(2), 7);
        assert_eq!(b.component_count(0, 0), 0);
        assert_eq!(b.component_count(0, -1), 0);
        assert_eq!(b.component_count(0, 1), 8);
        // Odd degrees drop the mode their u₊ component cannot carry.
        for sigma in [-1, 0, 1] {
            assert_eq!(b.component_count(1, sigma), 7);
            assert_eq!(b.component_count(2, sigma), 7);
        }
        assert_eq!(b.grid_shape(), (12, 9, 12));
        let b = Arc::new(b);
        assert_eq!(b.lift_basis(2).alpha(), 2.0);
        assert_eq!(b.derivative_basis(1).radial_count(1), 7);
    }

    #[test]
    fn test_radial_orthonormality() {
        let b = ball();
        let (r, w) = b.quadrature(0.0, 12).unwrap();
        for k in [0, 1, 3] {
            let n = b.n_count(k);
            let jets: Vec<Vec<Jet>> = r.iter().map(|&ri| b.jets(k, n, ri).unwrap()).collect();
            for i in 0..n {
                for j in 0..n {
                    let ip: f64 = (0..r.len()).map(|q| w[q] * jets[q][i][0] * jets[q][j][0]).sum();
                    let expected = if i == j { 1.0 } else { 0.0 };
                    assert!((ip - expected).abs() < 1e-11, "k={k} i={i} j={j} ip={ip}");
                }
            }
        }
    }

    #[test]
    fn test_radial_round_trip() {
        let b = ball();
        for k in [0, 2, 5] {
            let c: Vec<Complex64> = (0..b.n_count(k)).map(|n| Complex64::new(1.0 / (n as f64 + 1.0), 0.0)).collect();
            let back = b.radial_forward(k, &b.radial_backward(k, &c).unwrap()).unwrap();
            for (x, y) in c.iter().zip(&back) {
                assert!((x - y).norm() < 1e-11);
            }
        }
    }

    #[test]
    fn test_truncated_coefficients() {
        let b = ball();
        let c = vec![Complex64::new(0.5, 0.0), Complex64::new(-0.25, 0.0)];
        let values = b.radial_backward(3, &c).unwrap();
        let back = b.radial_forward(3, &values).unwrap();
        assert_eq!(back.len(), b.n_count(3));
        assert!((back[0] - c[0]).norm() < 1e-12 && (back[1] - c[1]).norm() < 1e-12);
        assert!(back[2..].iter().all(|v| v.norm() < 1e-12));
        let r = b.radial_grid()[3];
        assert!((b.radial_interpolate(3, &c, r).unwrap() - values[3]).norm() < 1e-12);
        let long = vec![Complex64::new(1.0, 0.0); b.n_count(3) + 1];
        assert!(b.radial_backward(3, &long).is_err());
    }

    #[test]
    fn test_jets_match_finite_differences() {
        let (k, r, h) = (2, 0.6, 1e-5);
        let jets = radial_jets(k, 1.0, 5, r, 2.0).unwrap();
        let plus = radial_jets(k, 1.0, 5, r + h, 2.0).unwrap();
        let minus = radial_jets(k, 1.0, 5, r - h, 2.0).unwrap();
        for n in 0..5 {
            let fd = (plus[n][0] - minus[n][0]) / (2.0 * h);
            assert!((jets[n][1] - fd).abs() < 1e-6 * (1.0 + fd.abs()));
            let fd2 = (plus[n][1] - minus[n][1]) / (2.0 * h);
            assert!((jets[n][2] - fd2).abs() < 1e-5 * (1.0 + fd2.abs()));
            let fd3 = (plus[n][2] - minus[n][2]) / (2.0 * h);
            assert!((jets[n][3] - fd3).abs() < 1e-4 * (1.0 + fd3.abs()));
        }
    }

    #[test]
    fn test_laplacian_of_r_squared() {
        // Δ(r²) = 6 for ℓ = 0.
        let b = ball();
        let k = 0;
        let n = b.n_count(k);
        let grid: Vec<Complex64> = b.radial_grid().iter().map(|r| Complex64::new(r * r, 0.0)).collect();
        let c = b.radial_forward(k, &grid).unwrap();
        let lap = b.radial_matrix(RadialOp::Laplacian, k).unwrap();
        let out = crate::basis::apply_real(&lap, &c);
        assert_eq!(out.len(), n);
        for r in [0.2, 0.5, 0.9] {
            let v = b.radial_interpolate(k, &out, r).unwrap();
            assert!((v.re - 6.0).abs() < 1e-10);
        }
    }

    #[test]
    fn test_dminus_lowers_regularity() {
        // f = r (ℓ = 1): D₋ f = 1 + 2 = 3.
        let b = ball();
        let grid: Vec<Complex64> = b.radial_grid().iter().map(|&r| Complex64::new(r, 0.0)).collect();
        let c = b.radial_forward(1, &grid).unwrap();
        let d = b.radial_matrix(RadialOp::DMinus, 1).unwrap();
        let out = crate::basis::apply_real(&d, &c);
        assert_eq!(out.len(), b.n_count(0));
        assert!((b.radial_interpolate(0, &out, 0.4).unwrap().re - 3.0).abs() < 1e-10);
        assert!(b.radial_matrix(RadialOp::DMinus, 0).is_err());
    }
}
