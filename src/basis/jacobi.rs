//! Jacobi polynomial bases on finite intervals.
//!
//! A basis of size N expands f(y) = Σ_{n<N} c_n p̂_n^{(a,b)}(x(y)) with
//! x = (2y - y₀ - y₁)/(y₁ - y₀). Chebyshev is the (-1/2, -1/2) family.
//!
//! Every basis also remembers the family its grid comes from: clones with
//! shifted parameters (the natural output and lift bases of differential
//! operators) share the grid of the basis they were cloned from. The
//! transforms are precomputed dense matrices:
//! - backward: V[i,n] = p̂_n(x_i)
//! - forward: quadrature in the grid family, followed by exact conversion
//!   to the basis family

use super::fourier::check_len;
use super::{Basis, grid_size_for};
use super::coords::Coord;
use crate::error::BasisError;
use crate::polynomial::{JET_DEPTH, JacobiFamily, Jet, gauss_jacobi};
use faer::Mat;
use num_complex::Complex64;
use std::sync::OnceLock;

#[derive(Clone, Debug)]
struct Transforms {
    forward: Mat<f64>,
    backward: Mat<f64>,
}

/// Jacobi basis on [y₀, y₁].
#[derive(Clone, Debug)]
pub struct JacobiBasis {
    coord: Coord,
    size: usize,
    bounds: (f64, f64),
    dealias: f64,
    family: JacobiFamily,
    grid_family: JacobiFamily,
    grid_size: usize,
    transforms: OnceLock<Transforms>,
    derivatives: [OnceLock<Mat<f64>>; JET_DEPTH - 1],
}

impl JacobiBasis {
    /// General Jacobi basis whose grid is its own Gauss-Jacobi rule.
    pub fn new(
        coord: Coord,
        size: usize,
        bounds: (f64, f64),
        a: f64,
        b: f64,
        dealias: f64,
    ) -> Result<Self, BasisError> {
        let family = JacobiFamily::new(a, b)?;
        Self::with_families(coord, size, bounds, family, family, dealias)
    }

    /// Chebyshev basis on Gauss-Chebyshev nodes.
    pub fn chebyshev(coord: Coord, size: usize, bounds: (f64, f64), dealias: f64) -> Result<Self, BasisError> {
        let family = JacobiFamily::chebyshev();
        Self::with_families(coord, size, bounds, family, family, dealias)
    }

    /// Legendre basis on Gauss-Legendre nodes.
    pub fn legendre(coord: Coord, size: usize, bounds: (f64, f64), dealias: f64) -> Result<Self, BasisError> {
        let family = JacobiFamily::legendre();
        Self::with_families(coord, size, bounds, family, family, dealias)
    }

    fn with_families(
        coord: Coord,
        size: usize,
        bounds: (f64, f64),
        family: JacobiFamily,
        grid_family: JacobiFamily,
        dealias: f64,
    ) -> Result<Self, BasisError> {
        if size == 0 {
            return Err(BasisError::InvalidParameter("Jacobi size must be positive".into()));
        }
        if bounds.1 <= bounds.0 {
            return Err(BasisError::InvalidParameter(format!(
                "Jacobi bounds must be increasing, got {bounds:?}"
            )));
        }
        let grid_size = grid_size_for(size, dealias)?;
        Ok(Self {
            coord,
            size,
            bounds,
            dealias,
            family,
            grid_family,
            grid_size,
            transforms: OnceLock::new(),
            derivatives: Default::default(),
        })
    }

    /// Same size, bounds and grid with different polynomial parameters.
    pub fn clone_with(&self, a: f64, b: f64) -> Result<Self, BasisError> {
        let family = JacobiFamily::new(a, b)?;
        Self::with_families(
            self.coord.clone(),
            self.size,
            self.bounds,
            family,
            self.grid_family,
            self.dealias,
        )
    }

    /// The family with both parameters raised by `shift`; used as the
    /// natural lift basis for tau terms of a `shift`-order operator.
    pub fn lift_basis(&self, shift: usize) -> Result<Self, BasisError> {
        self.clone_with(self.family.a() + shift as f64, self.family.b() + shift as f64)
    }

    /// Alias of [`Self::lift_basis`]: the range of `order` derivatives.
    pub fn derivative_basis(&self, order: usize) -> Result<Self, BasisError> {
        self.lift_basis(order)
    }

    pub fn family(&self) -> &JacobiFamily {
        &self.family
    }

    pub fn bounds(&self) -> (f64, f64) {
        self.bounds
    }

    pub fn length(&self) -> f64 {
        self.bounds.1 - self.bounds.0
    }

    /// Whether two bases share size, bounds and grid (they may differ in family).
    pub fn same_grid(&self, other: &Self) -> bool {
        self.size == other.size
            && self.bounds == other.bounds
            && self.grid_size == other.grid_size
            && self.grid_family == other.grid_family
    }

    /// Map a physical coordinate to the native interval [-1, 1].
    pub fn to_native(&self, y: f64) -> f64 {
        (2.0 * y - self.bounds.0 - self.bounds.1) / self.length()
    }

    /// d(native)/d(physical).
    pub fn stretch(&self) -> f64 {
        2.0 / self.length()
    }

    fn native_grid(&self) -> Result<(Vec<f64>, Vec<f64>), BasisError> {
        gauss_jacobi(self.grid_size, self.grid_family.a(), self.grid_family.b())
    }

    /// Physical grid points (ascending).
    pub fn grid(&self) -> Vec<f64> {
        match self.native_grid() {
            Ok((x, _)) => x
                .into_iter()
                .map(|xi| self.bounds.0 + 0.5 * (xi + 1.0) * self.length())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Jets of the first `count` basis functions at physical point y,
    /// with derivatives taken in the physical coordinate.
    pub fn jets(&self, count: usize, y: f64) -> Vec<Jet> {
        let s = self.stretch();
        self.family
            .jets(count, self.to_native(y))
            .into_iter()
            .map(|j| [j[0], j[1] * s, j[2] * s * s, j[3] * s * s * s])
            .collect()
    }

    /// Gauss quadrature of the basis family with `n` nodes, in physical
    /// coordinates. Weights are those of the native weight function, so
    /// Σ w p̂_m p̂_n = δ_mn for the native polynomials.
    pub fn family_quadrature(&self, n: usize) -> Result<(Vec<f64>, Vec<f64>), BasisError> {
        let (x, w) = gauss_jacobi(n, self.family.a(), self.family.b())?;
        let y = x
            .into_iter()
            .map(|xi| self.bounds.0 + 0.5 * (xi + 1.0) * self.length())
            .collect();
        Ok((y, w))
    }

    fn transforms(&self) -> Result<&Transforms, BasisError> {
        if let Some(t) = self.transforms.get() {
            return Ok(t);
        }
        let built = self.build_transforms()?;
        Ok(self.transforms.get_or_init(|| built))
    }

    fn build_transforms(&self) -> Result<Transforms, BasisError> {
        let (nodes, weights) = self.native_grid()?;
        let ng = self.grid_size;
        let n = self.size;

        let mut backward = Mat::zeros(ng, n);
        for (i, &x) in nodes.iter().enumerate() {
            for (k, v) in self.family.values(n, x).into_iter().enumerate() {
                backward[(i, k)] = v;
            }
        }

        // Discrete projection onto the grid family, then exact conversion.
        let grid_vals: Vec<Vec<f64>> = nodes.iter().map(|&x| self.grid_family.values(ng, x)).collect();
        let conversion = if self.family == self.grid_family {
            None
        } else {
            let q = (ng + n) / 2 + 2;
            let (xq, wq) = gauss_jacobi(q, self.family.a(), self.family.b())?;
            let mut c = Mat::<f64>::zeros(n, ng);
            for (&x, &w) in xq.iter().zip(&wq) {
                let p = self.family.values(n, x);
                let g = self.grid_family.values(ng, x);
                for k in 0..n {
                    for j in 0..ng {
                        c[(k, j)] += w * p[k] * g[j];
                    }
                }
            }
            Some(c)
        };

        let mut forward = Mat::<f64>::zeros(n, ng);
        for i in 0..ng {
            for k in 0..n {
                forward[(k, i)] = match &conversion {
                    None => weights[i] * grid_vals[i][k],
                    Some(c) => {
                        let mut s: f64 = 0.0;
                        for j in 0..ng {
                            s += c[(k, j)] * grid_vals[i][j];
                        }
                        weights[i] * s
                    }
                };
            }
        }
        Ok(Transforms { forward, backward })
    }

    /// Coefficient-space derivative matrix of the given order (1 ..= 3),
    /// expressed in the same family.
    pub fn derivative_matrix(&self, order: usize) -> Result<&Mat<f64>, BasisError> {
        if order == 0 || order >= JET_DEPTH {
            return Err(BasisError::DerivativeDepth {
                requested: order,
                supported: JET_DEPTH - 1,
            });
        }
        let cell = &self.derivatives[order - 1];
        if let Some(m) = cell.get() {
            return Ok(m);
        }
        let n = self.size;
        let (y, w) = self.family_quadrature(n + 1)?;
        let mut d = Mat::zeros(n, n);
        for (&yq, &wq) in y.iter().zip(&w) {
            let jets = self.jets(n, yq);
            for m in 0..n {
                for k in 0..n {
                    d[(m, k)] += wq * jets[m][0] * jets[k][order];
                }
            }
        }
        Ok(cell.get_or_init(|| d))
    }

    /// Evaluate coefficients at a physical point.
    pub fn interpolate(&self, coeffs: &[Complex64], y: f64) -> Result<Complex64, BasisError> {
        check_len("Jacobi interpolate", self.size, coeffs.len())?;
        let vals = self.family.values(self.size, self.to_native(y));
        Ok(coeffs.iter().zip(vals).map(|(c, v)| c * v).sum())
    }
}

impl Basis for JacobiBasis {
    fn coord(&self) -> &Coord {
        &self.coord
    }

    fn size(&self) -> usize {
        self.size
    }

    fn coeff_size(&self) -> usize {
        self.size
    }

    fn grid_size(&self) -> usize {
        self.grid_size
    }

    fn dealias(&self) -> f64 {
        self.dealias
    }

    fn to_grid(&self, coeffs: &[Complex64]) -> Result<Vec<Complex64>, BasisError> {
        check_len("Jacobi to_grid", self.size, coeffs.len())?;
        let t = self.transforms()?;
        Ok(apply_real(&t.backward, coeffs))
    }

    fn to_coeff(&self, grid: &[Complex64]) -> Result<Vec<Complex64>, BasisError> {
        check_len("Jacobi to_coeff", self.grid_size, grid.len())?;
        let t = self.transforms()?;
        Ok(apply_real(&t.forward, grid))
    }

    fn differentiate(&self, coeffs: &[Complex64], order: usize) -> Result<Vec<Complex64>, BasisError> {
        check_len("Jacobi differentiate", self.size, coeffs.len())?;
        if order == 0 {
            return Ok(coeffs.to_vec());
        }
        let d = self.derivative_matrix(order)?;
        Ok(apply_real(d, coeffs))
    }
}

/// y = A x for a real matrix and complex vector. A short x is padded with zeros.
pub(crate) fn apply_real(a: &Mat<f64>, x: &[Complex64]) -> Vec<Complex64> {
    let mut y = vec![Complex64::new(0.0, 0.0); a.nrows()];
    for (j, &xj) in x.iter().enumerate().take(a.ncols()) {
        if xj.re == 0.0 && xj.im == 0.0 {
            continue;
        }
        for (i, yi) in y.iter_mut().enumerate() {
            *yi += xj * a[(i, j)];
        }
    }
    y
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::CartesianCoordinates;
    use std::f64::consts::PI;

    fn cheb(size: usize, dealias: f64) -> JacobiBasis {
        let c = CartesianCoordinates::new(&["y"]);
        JacobiBasis::chebyshev(c.coord(0).clone(), size, (0.0, 1.0), dealias).unwrap()
    }

    fn zeros(n: usize) -> Vec<Complex64> {
        vec![Complex64::new(0.0, 0.0); n]
    }

    #[test]
    fn test_round_trip() {
        let b = cheb(12, 1.5);
        let c: Vec<Complex64> = (0..12).map(|n| Complex64::new((n as f64).sin(), 0.1 * n as f64)).collect();
        let back = b.to_coeff(&b.to_grid(&c).unwrap()).unwrap();
        for (x, y) in c.iter().zip(&back) {
            assert!((x - y).norm() < 1e-12);
        }
    }

    #[test]
    fn test_clone_round_trip_on_shared_grid() {
        let b = cheb(10, 1.0).clone_with(1.5, 1.5).unwrap();
        let c: Vec<Complex64> = (0..10).map(|n| Complex64::new(1.0 / (1.0 + n as f64), 0.0)).collect();
        let back = b.to_coeff(&b.to_grid(&c).unwrap()).unwrap();
        for (x, y) in c.iter().zip(&back) {
            assert!((x - y).norm() < 1e-11);
        }
    }

    #[test]
    fn test_derivative_of_chebyshev_polynomial() {
        // T_3(x) = 4x³ - 3x, T_3' = 12x² - 3 on the native interval [-1, 1]
        let c = CartesianCoordinates::new(&["y"]);
        let b = JacobiBasis::chebyshev(c.coord(0).clone(), 8, (-1.0, 1.0), 1.0).unwrap();
        let mut coeffs = zeros(8);
        coeffs[3] = Complex64::new((PI / 2.0).sqrt(), 0.0); // p̂_3 = √(2/π) T_3
        let d = b.differentiate(&coeffs, 1).unwrap();
        for x in [-0.7, 0.1, 0.5] {
            let v = b.interpolate(&d, x).unwrap();
            assert!((v.re - (12.0 * x * x - 3.0)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_grid_values_on_physical_interval() {
        let b = cheb(6, 1.0);
        let mut coeffs = zeros(6);
        coeffs[1] = Complex64::new((PI / 2.0).sqrt(), 0.0); // T_1(x) = x = 2y - 1
        let g = b.to_grid(&coeffs).unwrap();
        for (y, v) in b.grid().iter().zip(&g) {
            assert!((v.re - (2.0 * y - 1.0)).abs() < 1e-13);
        }
    }

    #[test]
    fn test_derivative_depth_limit() {
        let b = cheb(6, 1.0);
        assert!(matches!(
            b.differentiate(&zeros(6), 4),
            Err(BasisError::DerivativeDepth { requested: 4, .. })
        ));
    }

    #[test]
    fn test_lift_basis_parameters() {
        let lift = cheb(6, 1.0).lift_basis(2).unwrap();
        assert_eq!(lift.family().a(), 1.5);
        assert_eq!(lift.family().b(), 1.5);
        assert!(lift.same_grid(&cheb(6, 1.0)));
        let first = cheb(6, 1.0).derivative_basis(1).unwrap();
        assert_eq!(first.family().a(), 0.5);
    }
}
