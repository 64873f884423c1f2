//! Orthonormal Jacobi polynomials.
//!
//! The family p̂_n^{(a,b)} is orthonormal on [-1, 1] with weight
//! (1-x)^a (1+x)^b:
//! ∫_{-1}^{1} p̂_m(x) p̂_n(x) (1-x)^a (1+x)^b dx = δ_{mn}
//!
//! Values and derivatives come from the three-term recurrence
//! x p̂_n = β_{n+1} p̂_{n+1} + α_n p̂_n + β_n p̂_{n-1},
//! differentiated term by term, so no explicit normalization constants
//! are needed beyond the zeroth moment μ₀.
//!
//! Parameters are restricted to half-integers greater than -1. That covers
//! Chebyshev (-1/2, -1/2), Legendre (0, 0), the ultraspherical output
//! families, and the radial families of the ball (α, k + 1/2).

use crate::error::BasisError;
use std::f64::consts::PI;

/// Number of entries in a derivative jet: value plus three derivatives.
pub const JET_DEPTH: usize = 4;

/// Value and first three derivatives of a function at a point.
pub type Jet = [f64; JET_DEPTH];

/// Γ(x) for positive half-integers x ∈ {1/2, 1, 3/2, ...}.
///
/// Uses Γ(1) = 1, Γ(1/2) = √π and Γ(x+1) = x Γ(x).
pub fn gamma_half_integer(x: f64) -> Result<f64, BasisError> {
    let twice = 2.0 * x;
    if x <= 0.0 || (twice - twice.round()).abs() > 1e-12 {
        return Err(BasisError::GammaArgument(x));
    }
    let twice = twice.round() as i64;
    let (mut value, mut arg) = if twice % 2 == 0 {
        (1.0, 1.0)
    } else {
        (PI.sqrt(), 0.5)
    };
    while arg < x - 0.25 {
        value *= arg;
        arg += 1.0;
    }
    Ok(value)
}

/// Zeroth moment μ₀ = ∫ (1-x)^a (1+x)^b dx = 2^{a+b+1} Γ(a+1) Γ(b+1) / Γ(a+b+2).
pub fn jacobi_mass(a: f64, b: f64) -> Result<f64, BasisError> {
    let num = gamma_half_integer(a + 1.0)? * gamma_half_integer(b + 1.0)?;
    let den = gamma_half_integer(a + b + 2.0)?;
    Ok(2f64.powf(a + b + 1.0) * num / den)
}

/// An orthonormal Jacobi family with fixed parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JacobiFamily {
    a: f64,
    b: f64,
    p0: f64,
}

impl JacobiFamily {
    /// Create the family, validating that a and b are half-integers > -1.
    pub fn new(a: f64, b: f64) -> Result<Self, BasisError> {
        for (name, p) in [("a", a), ("b", b)] {
            if p <= -1.0 || ((2.0 * p) - (2.0 * p).round()).abs() > 1e-12 {
                return Err(BasisError::InvalidParameter(format!(
                    "Jacobi parameter {name} = {p} must be a half-integer > -1"
                )));
            }
        }
        let mass = jacobi_mass(a, b)?;
        Ok(Self {
            a,
            b,
            p0: 1.0 / mass.sqrt(),
        })
    }

    /// Chebyshev family (a = b = -1/2).
    pub fn chebyshev() -> Self {
        Self {
            a: -0.5,
            b: -0.5,
            p0: 1.0 / PI.sqrt(),
        }
    }

    /// Legendre family (a = b = 0).
    pub fn legendre() -> Self {
        Self {
            a: 0.0,
            b: 0.0,
            p0: 1.0 / 2f64.sqrt(),
        }
    }

    pub fn a(&self) -> f64 {
        self.a
    }

    pub fn b(&self) -> f64 {
        self.b
    }

    /// The family with both parameters raised by `shift`.
    pub fn shifted(&self, shift: f64) -> Result<Self, BasisError> {
        Self::new(self.a + shift, self.b + shift)
    }

    /// Diagonal recurrence coefficient α_n.
    pub fn alpha(&self, n: usize) -> f64 {
        let (a, b) = (self.a, self.b);
        if n == 0 {
            return (b - a) / (a + b + 2.0);
        }
        let s = 2.0 * n as f64 + a + b;
        (b * b - a * a) / (s * (s + 2.0))
    }

    /// Off-diagonal recurrence coefficient β_n for n ≥ 1.
    pub fn beta(&self, n: usize) -> f64 {
        debug_assert!(n >= 1);
        let (a, b) = (self.a, self.b);
        let nf = n as f64;
        if n == 1 {
            // The (n + a + b) factor cancels against (2n + a + b - 1) for n = 1.
            let s = 2.0 + a + b;
            return (4.0 * (1.0 + a) * (1.0 + b) / (s * s * (s + 1.0))).sqrt();
        }
        let s = 2.0 * nf + a + b;
        let num = 4.0 * nf * (nf + a) * (nf + b) * (nf + a + b);
        (num / (s * s * (s + 1.0) * (s - 1.0))).sqrt()
    }

    /// Values p̂_0(x), ..., p̂_{count-1}(x).
    pub fn values(&self, count: usize, x: f64) -> Vec<f64> {
        let mut out = Vec::with_capacity(count);
        if count == 0 {
            return out;
        }
        out.push(self.p0);
        if count == 1 {
            return out;
        }
        out.push((x - self.alpha(0)) * self.p0 / self.beta(1));
        for n in 1..count - 1 {
            let next = ((x - self.alpha(n)) * out[n] - self.beta(n) * out[n - 1]) / self.beta(n + 1);
            out.push(next);
        }
        out
    }

    /// Jets (value and first three derivatives) of p̂_0 .. p̂_{count-1} at x.
    ///
    /// Differentiating the recurrence j times gives
    /// β_{n+1} p̂_{n+1}^{(j)} = (x - α_n) p̂_n^{(j)} + j p̂_n^{(j-1)} - β_n p̂_{n-1}^{(j)}.
    pub fn jets(&self, count: usize, x: f64) -> Vec<Jet> {
        let mut out: Vec<Jet> = Vec::with_capacity(count);
        if count == 0 {
            return out;
        }
        out.push([self.p0, 0.0, 0.0, 0.0]);
        for n in 0..count - 1 {
            let beta_next = self.beta(n + 1);
            let shift = x - self.alpha(n);
            let cur = out[n];
            let prev = if n > 0 {
                out[n - 1]
            } else {
                [0.0; JET_DEPTH]
            };
            let beta_n = if n > 0 { self.beta(n) } else { 0.0 };
            let mut next = [0.0; JET_DEPTH];
            for j in 0..JET_DEPTH {
                let lower = if j > 0 { j as f64 * cur[j - 1] } else { 0.0 };
                next[j] = (shift * cur[j] + lower - beta_n * prev[j]) / beta_next;
            }
            out.push(next);
        }
        out
    }
}
