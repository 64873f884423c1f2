//! Gauss-Jacobi quadrature.
//!
//! The n-point rule integrates polynomials of degree ≤ 2n-1 exactly
//! against the weight (1-x)^a (1+x)^b. Nodes are the zeros of p̂_n^{(a,b)};
//! weights follow from the Christoffel function of the orthonormal family:
//!
//! w_i = 1 / Σ_{k<n} p̂_k(x_i)²
//!
//! Nodes are found by Newton iteration with deflation against the roots
//! already located, starting from Chebyshev-Gauss nodes.

use super::jacobi::JacobiFamily;
use crate::error::BasisError;
use std::f64::consts::PI;

const MAX_NEWTON_ITERATIONS: usize = 100;
const NEWTON_TOLERANCE: f64 = 1e-14;

/// Nodes (ascending) and weights of the n-point Gauss-Jacobi rule.
pub fn gauss_jacobi(n: usize, a: f64, b: f64) -> Result<(Vec<f64>, Vec<f64>), BasisError> {
    if n == 0 {
        return Ok((Vec::new(), Vec::new()));
    }
    if a == -0.5 && b == -0.5 {
        return Ok(gauss_chebyshev(n));
    }
    let family = JacobiFamily::new(a, b)?;
    let nodes = jacobi_roots(&family, n)?;
    let weights = christoffel_weights(&family, n, &nodes);
    Ok((nodes, weights))
}

/// Chebyshev-Gauss rule in closed form: x_j = -cos(π(2j+1)/2n), w_j = π/n.
pub fn gauss_chebyshev(n: usize) -> (Vec<f64>, Vec<f64>) {
    let nodes = (0..n)
        .map(|j| -(PI * (2 * j + 1) as f64 / (2 * n) as f64).cos())
        .collect();
    (nodes, vec![PI / n as f64; n])
}

/// Gauss-Legendre rule.
pub fn gauss_legendre(n: usize) -> Result<(Vec<f64>, Vec<f64>), BasisError> {
    gauss_jacobi(n, 0.0, 0.0)
}

fn jacobi_roots(family: &JacobiFamily, n: usize) -> Result<Vec<f64>, BasisError> {
    let mut roots: Vec<f64> = Vec::with_capacity(n);
    for j in 0..n {
        let cheb = -(PI * (2 * j + 1) as f64 / (2 * n) as f64).cos();
        let mut x = match roots.last() {
            Some(&prev) => 0.5 * (cheb + prev),
            None => cheb,
        };
        let mut converged = false;
        for _ in 0..MAX_NEWTON_ITERATIONS {
            let jets = family.jets(n + 1, x);
            let (p, dp) = (jets[n][0], jets[n][1]);
            let deflation: f64 = roots.iter().map(|&r| 1.0 / (x - r)).sum();
            let delta = p / (dp - p * deflation);
            x -= delta;
            if delta.abs() <= NEWTON_TOLERANCE * (1.0 + x.abs()) {
                converged = true;
                break;
            }
        }
        if !converged || !x.is_finite() || x.abs() >= 1.0 {
            return Err(BasisError::InvalidParameter(format!(
                "Gauss-Jacobi root {j} of {n} did not converge for (a, b) = ({}, {})",
                family.a(),
                family.b()
            )));
        }
        roots.push(x);
    }
    roots.sort_by(|p, q| p.total_cmp(q));
    Ok(roots)
}

fn christoffel_weights(family: &JacobiFamily, n: usize, nodes: &[f64]) -> Vec<f64> {
    nodes
        .iter()
        .map(|&x| {
            let sum: f64 = family.values(n, x).iter().map(|p| p * p).sum();
            1.0 / sum
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polynomial::jacobi_mass;

    #[test]
    fn test_weights_sum_to_mass() {
        for &(a, b) in &[(0.0, 0.0), (0.5, 0.5), (1.5, 1.5), (0.0, 0.5), (2.0, 0.5), (3.0, 0.5)] {
            for n in [1, 4, 17, 40] {
                let (_, w) = gauss_jacobi(n, a, b).unwrap();
                let sum: f64 = w.iter().sum();
                let mass = jacobi_mass(a, b).unwrap();
                assert!((sum - mass).abs() < 1e-12 * mass, "(a,b)=({a},{b}) n={n}");
            }
        }
    }

    #[test]
    fn test_nodes_ascending_and_interior() {
        let (x, _) = gauss_jacobi(30, 2.0, 0.5).unwrap();
        for pair in x.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert!(x[0] > -1.0 && x[29] < 1.0);
    }

    #[test]
    fn test_legendre_exactness() {
        // 5 points integrate x^k exactly for k ≤ 9
        let (x, w) = gauss_legendre(5).unwrap();
        for k in 0..=9 {
            let quad: f64 = x.iter().zip(&w).map(|(xi, wi)| wi * xi.powi(k)).sum();
            let exact = if k % 2 == 0 { 2.0 / (k as f64 + 1.0) } else { 0.0 };
            assert!((quad - exact).abs() < 1e-14, "k={k}");
        }
    }

    #[test]
    fn test_chebyshev_closed_form_matches_newton_family() {
        let (x, w) = gauss_chebyshev(6);
        let fam = JacobiFamily::chebyshev();
        for xi in &x {
            assert!(fam.values(7, *xi)[6].abs() < 1e-13);
        }
        assert!((w.iter().sum::<f64>() - PI).abs() < 1e-14);
    }
}
