//! IMEX multistep schemes with variable step sizes.
//!
//! A step of order s solves
//!
//! ```text
//! Σ_{j=0..s} a_j M X^{n+1-j} + Σ_{j=0..s} b_j L X^{n+1-j} = Σ_{j=1..s} c_j F^{n+1-j}
//! ```
//!
//! for X^{n+1}. The coefficients depend on the recent step sizes; while
//! fewer steps than the scheme order have been taken, the lower-order
//! member of the same family is used.

use serde::{Deserialize, Serialize};

/// Multistep IMEX scheme.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultistepScheme {
    /// Backward Euler / forward Euler.
    Sbdf1,
    /// Second-order backward differentiation, second-order extrapolation.
    #[default]
    Sbdf2,
    /// Third-order backward differentiation, third-order extrapolation.
    Sbdf3,
    /// Crank-Nicolson / forward Euler.
    Cnab1,
    /// Crank-Nicolson / second-order Adams-Bashforth.
    Cnab2,
}

/// Coefficients of one step. `a`, `b` and `c` have `order + 1` entries;
/// index j multiplies the level n+1-j, and `c[0]` is always zero.
#[derive(Clone, Debug, PartialEq)]
pub struct StepCoefficients {
    pub a: Vec<f64>,
    pub b: Vec<f64>,
    pub c: Vec<f64>,
}

impl StepCoefficients {
    /// Number of previous levels the step reads.
    pub fn order(&self) -> usize {
        self.a.len() - 1
    }
}

impl MultistepScheme {
    /// Nominal order of accuracy, which is also the history depth.
    pub fn order(self) -> usize {
        match self {
            Self::Sbdf1 | Self::Cnab1 => 1,
            Self::Sbdf2 | Self::Cnab2 => 2,
            Self::Sbdf3 => 3,
        }
    }

    /// Number of stored levels of M X, L X and F.
    pub fn steps(self) -> usize {
        self.order()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sbdf1 => "SBDF1",
            Self::Sbdf2 => "SBDF2",
            Self::Sbdf3 => "SBDF3",
            Self::Cnab1 => "CNAB1",
            Self::Cnab2 => "CNAB2",
        }
    }

    /// Whether the implicit operator is split across levels.
    pub fn is_crank_nicolson(self) -> bool {
        matches!(self, Self::Cnab1 | Self::Cnab2)
    }

    /// Coefficients for the step sizes `dts`, most recent (the step being
    /// taken) first. The order is `min(self.order(), dts.len())`.
    pub fn coefficients(self, dts: &[f64]) -> StepCoefficients {
        let order = self.order().min(dts.len()).max(1);
        match (self.is_crank_nicolson(), order) {
            (false, 1) => sbdf1(dts[0]),
            (false, 2) => sbdf2(dts[0], dts[1]),
            (false, _) => sbdf3(dts[0], dts[1], dts[2]),
            (true, 1) => cnab1(dts[0]),
            (true, _) => cnab2(dts[0], dts[1]),
        }
    }
}

impl std::fmt::Display for MultistepScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn sbdf1(k: f64) -> StepCoefficients {
    StepCoefficients {
        a: vec![1.0 / k, -1.0 / k],
        b: vec![1.0, 0.0],
        c: vec![0.0, 1.0],
    }
}

/// `k1` is the current step, `k0` the previous one.
fn sbdf2(k1: f64, k0: f64) -> StepCoefficients {
    let w = k1 / k0;
    StepCoefficients {
        a: vec![(1.0 + 2.0 * w) / (1.0 + w) / k1, -(1.0 + w) / k1, w * w / (1.0 + w) / k1],
        b: vec![1.0, 0.0, 0.0],
        c: vec![0.0, 1.0 + w, -w],
    }
}

/// `k2` is the current step, then `k1` and `k0`.
fn sbdf3(k2: f64, k1: f64, k0: f64) -> StepCoefficients {
    let w2 = k2 / k1;
    let w1 = k1 / k0;
    let a0 = (1.0 + w2 / (1.0 + w2) + w1 * w2 / (1.0 + w1 * (1.0 + w2))) / k2;
    let a1 = (-1.0 - w2 - w1 * w2 * (1.0 + w2) / (1.0 + w1)) / k2;
    let a2 = w2 * w2 * (w1 + 1.0 / (1.0 + w2)) / k2;
    let a3 = -w1.powi(3) * w2 * w2 * (1.0 + w2) / (1.0 + w1) / (1.0 + w1 + w1 * w2) / k2;
    let c1 = (1.0 + w2) * (1.0 + w1 * (1.0 + w2)) / (1.0 + w1);
    let c2 = -w2 * (1.0 + w1 * (1.0 + w2));
    let c3 = w1 * w1 * w2 * (1.0 + w2) / (1.0 + w1);
    StepCoefficients {
        a: vec![a0, a1, a2, a3],
        b: vec![1.0, 0.0, 0.0, 0.0],
        c: vec![0.0, c1, c2, c3],
    }
}

fn cnab1(k: f64) -> StepCoefficients {
    StepCoefficients {
        a: vec![1.0 / k, -1.0 / k],
        b: vec![0.5, 0.5],
        c: vec![0.0, 1.0],
    }
}

fn cnab2(k1: f64, k0: f64) -> StepCoefficients {
    let w = k1 / k0;
    StepCoefficients {
        a: vec![1.0 / k1, -1.0 / k1, 0.0],
        b: vec![0.5, 0.5, 0.0],
        c: vec![0.0, 1.0 + w / 2.0, -w / 2.0],
    }
}
