//! Normalized associated Legendre functions.
//!
//! P̄_ℓ^m(x) satisfies ∫_{-1}^{1} P̄_ℓ^m P̄_ℓ'^m dx = δ_{ℓℓ'}, so that
//! Y_ℓm(θ, φ) = P̄_ℓ^m(cos θ) e^{imφ} / √(2π) is orthonormal on the sphere.
//! No Condon-Shortley phase is applied.
//!
//! The recurrences are:
//! P̄_0^0 = 1/√2
//! P̄_m^m = √((2m+1)/(2m)) sin θ P̄_{m-1}^{m-1}
//! P̄_{m+1}^m = √(2m+3) x P̄_m^m
//! P̄_ℓ^m = a_ℓm (x P̄_{ℓ-1}^m - b_ℓm P̄_{ℓ-2}^m)

/// P̄_ℓ^m(x) for ℓ = m ..= l_max, indexed by ℓ - m.
pub fn assoc_legendre(m: usize, l_max: usize, x: f64) -> Vec<f64> {
    if l_max < m {
        return Vec::new();
    }
    let sin = (1.0 - x * x).max(0.0).sqrt();
    let mut pmm = 1.0 / 2f64.sqrt();
    for k in 1..=m {
        pmm *= ((2 * k + 1) as f64 / (2 * k) as f64).sqrt() * sin;
    }
    let mut out = Vec::with_capacity(l_max - m + 1);
    out.push(pmm);
    if l_max == m {
        return out;
    }
    out.push(((2 * m + 3) as f64).sqrt() * x * pmm);
    for ell in m + 2..=l_max {
        let l = ell as f64;
        let mf = m as f64;
        let a = ((4.0 * l * l - 1.0) / (l * l - mf * mf)).sqrt();
        let b = (((l - 1.0) * (l - 1.0) - mf * mf) / (4.0 * (l - 1.0) * (l - 1.0) - 1.0)).sqrt();
        let i = ell - m;
        let next = a * (x * out[i - 1] - b * out[i - 2]);
        out.push(next);
    }
    out
}

/// Values and colatitude derivatives ∂_θ P̄_ℓ^m(cos θ), for ℓ = m ..= l_max.
///
/// Uses sin θ ∂_θ P̄_ℓ^m = ℓ x P̄_ℓ^m - √((ℓ²-m²)(2ℓ+1)/(2ℓ-1)) P̄_{ℓ-1}^m,
/// so x must lie strictly inside (-1, 1).
pub fn assoc_legendre_with_derivative(m: usize, l_max: usize, x: f64) -> (Vec<f64>, Vec<f64>) {
    let values = assoc_legendre(m, l_max, x);
    let sin = (1.0 - x * x).sqrt();
    let mut derivs = Vec::with_capacity(values.len());
    for (i, &p) in values.iter().enumerate() {
        let ell = m + i;
        let l = ell as f64;
        let mf = m as f64;
        let lower = if i > 0 {
            ((l * l - mf * mf) * (2.0 * l + 1.0) / (2.0 * l - 1.0)).sqrt() * values[i - 1]
        } else {
            0.0
        };
        derivs.push((l * x * p - lower) / sin);
    }
    (values, derivs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polynomial::gauss_legendre;

    #[test]
    fn test_low_degree_closed_forms() {
        let x: f64 = 0.37;
        let s = (1.0 - x * x).sqrt();
        let p0 = assoc_legendre(0, 2, x);
        assert!((p0[0] - 1.0 / 2f64.sqrt()).abs() < 1e-15);
        assert!((p0[1] - (1.5f64).sqrt() * x).abs() < 1e-15);
        assert!((p0[2] - (5.0f64 / 8.0).sqrt() * (3.0 * x * x - 1.0)).abs() < 1e-14);
        let p1 = assoc_legendre(1, 1, x);
        assert!((p1[0] - 3f64.sqrt() / 2.0 * s).abs() < 1e-15);
    }

    #[test]
    fn test_orthonormal_for_each_order() {
        let l_max = 12;
        let (x, w) = gauss_legendre(l_max + 1).unwrap();
        for m in 0..=l_max {
            let table: Vec<Vec<f64>> = x.iter().map(|&xi| assoc_legendre(m, l_max, xi)).collect();
            for i in 0..=(l_max - m) {
                for j in 0..=(l_max - m) {
                    let ip: f64 = (0..x.len()).map(|q| w[q] * table[q][i] * table[q][j]).sum();
                    let expected = if i == j { 1.0 } else { 0.0 };
                    assert!((ip - expected).abs() < 1e-12, "m={m} i={i} j={j}");
                }
            }
        }
    }

    #[test]
    fn test_theta_derivative_matches_finite_difference() {
        let theta: f64 = 1.1;
        let h = 1e-6;
        for m in 0..4 {
            let (_, d) = assoc_legendre_with_derivative(m, 8, theta.cos());
            let plus = assoc_legendre(m, 8, (theta + h).cos());
            let minus = assoc_legendre(m, 8, (theta - h).cos());
            for i in 0..d.len() {
                let fd = (plus[i] - minus[i]) / (2.0 * h);
                assert!((d[i] - fd).abs() < 1e-7, "m={m} i={i}");
            }
        }
    }
}
