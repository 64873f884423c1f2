//! Solver configuration.

use crate::time::MultistepScheme;
use serde::{Deserialize, Serialize};

/// Configuration shared by the boundary-value and initial-value solvers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Time-stepping scheme (initial-value problems only)
    pub scheme: MultistepScheme,
    /// Re-impose conjugate symmetry at iterations where `iteration % n` is 0 or 1
    pub hermitian_cadence: Option<usize>,
    /// Matrix entries below this fraction of the largest entry are dropped
    pub matrix_drop_tolerance: f64,
    /// Pivots below this fraction of the largest pivot are singular
    pub pivot_tolerance: f64,
    /// Factorize and solve pencils on the rayon pool (needs the `parallel` feature)
    pub parallel: bool,
    /// Number of implicit factorizations kept for reuse
    pub factor_cache_size: usize,
    pub stop_sim_time: Option<f64>,
    pub stop_iteration: Option<u64>,
    /// Wall-clock limit in seconds, counted from solver construction
    pub stop_wall_time: Option<f64>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            scheme: MultistepScheme::Sbdf2,
            hermitian_cadence: Some(100),
            matrix_drop_tolerance: 1e-12,
            pivot_tolerance: 1e-13,
            parallel: true,
            factor_cache_size: 2,
            stop_sim_time: None,
            stop_iteration: None,
            stop_wall_time: None,
        }
    }
}

impl SolverConfig {
    pub fn with_scheme(mut self, scheme: MultistepScheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Set the symmetrization cadence; `None` disables it.
    pub fn with_hermitian_cadence(mut self, cadence: Option<usize>) -> Self {
        self.hermitian_cadence = cadence.filter(|&n| n > 0);
        self
    }

    pub fn with_matrix_drop_tolerance(mut self, tol: f64) -> Self {
        self.matrix_drop_tolerance = tol;
        self
    }

    pub fn with_pivot_tolerance(mut self, tol: f64) -> Self {
        self.pivot_tolerance = tol;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_factor_cache_size(mut self, size: usize) -> Self {
        self.factor_cache_size = size.max(1);
        self
    }

    pub fn with_stop_sim_time(mut self, t: f64) -> Self {
        self.stop_sim_time = Some(t);
        self
    }

    pub fn with_stop_iteration(mut self, n: u64) -> Self {
        self.stop_iteration = Some(n);
        self
    }

    pub fn with_stop_wall_time(mut self, seconds: f64) -> Self {
        self.stop_wall_time = Some(seconds);
        self
    }
}
