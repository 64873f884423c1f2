//! Advective CFL step-size controller.
//!
//! The admissible step is `safety / max(f)`, where the local frequency f
//! sums |u_i| / Δ_i over the grid directions. In the ball the angular part
//! is |u_h| √(L(L+1)) / r with L the largest degree.
//!
//! # Example
//!
//! ```ignore
//! let mut cfl = Cfl::new(0.05, CflConfig::default().with_safety(0.35).with_max_dt(0.05), solver.distributor().clone())?;
//! cfl.add_velocity(&u)?;
//! while solver.proceed() {
//!     let dt = cfl.compute_timestep(solver.iteration())?;
//!     solver.step(dt)?;
//! }
//! ```

use super::reduce::{LocalGrid, local_spacing};
use crate::basis::AxisBasis;
use crate::distributor::{Distributor, ReduceOp};
use crate::error::{CflError, ExprError, Result};
use crate::field::{Field, Space};
use crate::operators::{Expr, Value, evaluate};
use serde::{Deserialize, Serialize};

/// CFL controller configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CflConfig {
    /// Recompute the step every `cadence` iterations
    pub cadence: u64,
    /// Courant number applied to the inverse maximum frequency
    pub safety: f64,
    /// Relative increase below which the stored step is kept
    pub threshold: f64,
    pub max_dt: Option<f64>,
    pub min_dt: Option<f64>,
    /// Largest allowed ratio between consecutive steps
    pub max_change: Option<f64>,
    /// Smallest allowed ratio between consecutive steps
    pub min_change: Option<f64>,
}

impl Default for CflConfig {
    fn default() -> Self {
        Self {
            cadence: 1,
            safety: 1.0,
            threshold: 0.0,
            max_dt: None,
            min_dt: None,
            max_change: None,
            min_change: None,
        }
    }
}

impl CflConfig {
    pub fn with_cadence(mut self, cadence: u64) -> Self {
        self.cadence = cadence;
        self
    }

    pub fn with_safety(mut self, safety: f64) -> Self {
        self.safety = safety;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_max_dt(mut self, dt: f64) -> Self {
        self.max_dt = Some(dt);
        self
    }

    pub fn with_min_dt(mut self, dt: f64) -> Self {
        self.min_dt = Some(dt);
        self
    }

    pub fn with_max_change(mut self, ratio: f64) -> Self {
        self.max_change = Some(ratio);
        self
    }

    pub fn with_min_change(mut self, ratio: f64) -> Self {
        self.min_change = Some(ratio);
        self
    }

    fn validate(&self) -> std::result::Result<(), CflError> {
        let invalid = |msg: String| Err(CflError::InvalidConfig(msg));
        if self.cadence == 0 {
            return invalid("cadence must be positive".into());
        }
        if !(self.safety > 0.0 && self.safety.is_finite()) {
            return invalid(format!("safety must be positive, got {}", self.safety));
        }
        if self.threshold.is_nan() || self.threshold < 0.0 {
            return invalid(format!("threshold must be non-negative, got {}", self.threshold));
        }
        if let (Some(lo), Some(hi)) = (self.min_dt, self.max_dt) {
            if lo > hi {
                return invalid(format!("min_dt {lo} exceeds max_dt {hi}"));
            }
        }
        for (name, v) in [
            ("max_dt", self.max_dt),
            ("min_dt", self.min_dt),
            ("max_change", self.max_change),
            ("min_change", self.min_change),
        ] {
            if v.is_some_and(|v| v.is_nan() || v <= 0.0) {
                return invalid(format!("{name} must be positive"));
            }
        }
        Ok(())
    }
}

/// CFL controller over one or more velocity expressions.
#[derive(Debug)]
pub struct Cfl {
    config: CflConfig,
    velocities: Vec<Expr>,
    distributor: Distributor,
    stored_dt: f64,
    computed: bool,
}

impl Cfl {
    /// Controller starting from `initial_dt`, capped by `max_dt`.
    pub fn new(initial_dt: f64, config: CflConfig, distributor: Distributor) -> Result<Self> {
        config.validate()?;
        if !(initial_dt > 0.0 && initial_dt.is_finite()) {
            return Err(CflError::InvalidConfig(format!("initial timestep {initial_dt}")).into());
        }
        let stored_dt = config.max_dt.map_or(initial_dt, |m| initial_dt.min(m));
        Ok(Self {
            config,
            velocities: Vec::new(),
            distributor,
            stored_dt,
            computed: false,
        })
    }

    pub fn config(&self) -> &CflConfig {
        &self.config
    }

    /// Current step size, without recomputing.
    pub fn stored_dt(&self) -> f64 {
        self.stored_dt
    }

    /// Track a velocity field or expression.
    pub fn add_velocity(&mut self, velocity: impl Into<Expr>) -> Result<()> {
        let velocity = velocity.into();
        let rank = velocity.rank()?;
        if rank != 1 {
            return Err(ExprError::RankMismatch {
                op: "CFL velocity",
                left: 1,
                right: rank,
            }
            .into());
        }
        self.velocities.push(velocity);
        Ok(())
    }

    /// Largest advective frequency over every tracked velocity and rank.
    pub fn compute_max_frequency(&self) -> Result<f64> {
        let mut global: f64 = 0.0;
        for v in &self.velocities {
            let local = match evaluate(v)? {
                Value::Constant(c) => {
                    if c.is_finite() {
                        0.0
                    } else {
                        f64::NAN
                    }
                }
                Value::Field(mut f) => local_max_frequency(&mut f, &self.distributor)?,
            };
            let freq = self.distributor.comm().all_reduce(local, ReduceOp::Max);
            if !freq.is_finite() {
                return Err(CflError::NonFiniteVelocity(v.to_string()).into());
            }
            global = global.max(freq);
        }
        Ok(global)
    }

    /// Step size for `iteration`; recomputed every `cadence` iterations.
    pub fn compute_timestep(&mut self, iteration: u64) -> Result<f64> {
        if self.computed && iteration % self.config.cadence != 0 {
            return Ok(self.stored_dt);
        }
        let freq = self.compute_max_frequency()?;
        let cfg = &self.config;
        let mut dt = if freq > 0.0 { cfg.safety / freq } else { f64::INFINITY };
        if let Some(r) = cfg.max_change {
            dt = dt.min(r * self.stored_dt);
        }
        if let Some(m) = cfg.max_dt {
            dt = dt.min(m);
        }
        if let Some(r) = cfg.min_change {
            dt = dt.max(r * self.stored_dt);
        }
        if let Some(m) = cfg.min_dt {
            dt = dt.max(m);
        }
        if !dt.is_finite() {
            log::warn!("zero velocity and no max_dt, keeping dt = {:.3e}", self.stored_dt);
            dt = self.stored_dt;
        }
        // Decreases always apply; increases only past the threshold.
        if dt < self.stored_dt || dt - self.stored_dt > cfg.threshold * self.stored_dt {
            log::debug!(
                "CFL: max frequency {freq:.3e}, dt {:.3e} -> {dt:.3e}",
                self.stored_dt
            );
            self.stored_dt = dt;
        }
        self.computed = true;
        Ok(self.stored_dt)
    }
}

/// Largest advective frequency of a vector field over the local grid
/// block. Non-finite data gives NaN.
fn local_max_frequency(u: &mut Field, distributor: &Distributor) -> Result<f64> {
    let space = u.space().clone();
    let grid = LocalGrid::new(&space, distributor);
    let per = grid.per_component;
    let values = u.grid()?;
    let comp = |c: usize, flat: usize| values[c * per + flat].re;
    let mut max: f64 = 0.0;
    match &space {
        Space::Cartesian(c) => {
            let spacing: Vec<Option<Vec<f64>>> = c
                .axes()
                .iter()
                .zip(&grid.axes)
                .map(|(b, nodes)| match b {
                    Some(AxisBasis::Fourier(f)) => Some(vec![f.length() / nodes.len() as f64; nodes.len()]),
                    Some(AxisBasis::Jacobi(_)) => Some(local_spacing(nodes)),
                    None => None,
                })
                .collect();
            for flat in grid.local.clone() {
                let idx = grid.unravel(flat);
                let f: f64 = spacing
                    .iter()
                    .enumerate()
                    .filter_map(|(a, s)| s.as_ref().map(|s| comp(a, flat).abs() / s[idx[a]]))
                    .sum();
                max = fold_max(max, f);
            }
        }
        Space::Ball(b) => {
            let dr = local_spacing(b.radial_grid());
            let l = b.l_max() as f64;
            let angular = (l * (l + 1.0)).sqrt();
            for flat in grid.local.clone() {
                let idx = grid.unravel(flat);
                let r = grid.axes[2][idx[2]];
                let uh = comp(0, flat).hypot(comp(1, flat));
                max = fold_max(max, comp(2, flat).abs() / dr[idx[2]] + angular * uh / r);
            }
        }
        Space::Sphere(_) => {
            return Err(ExprError::Unsupported {
                op: "CFL",
                reason: "velocities on a sphere have no radial extent".into(),
            }
            .into());
        }
    }
    Ok(max)
}

fn fold_max(acc: f64, f: f64) -> f64 {
    if acc.is_nan() || !f.is_finite() { f64::NAN } else { acc.max(f) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::{CartesianCoordinates, Dtype, FourierBasis, JacobiBasis};
    use crate::field::{CartesianSpace, FieldRef};
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn channel_velocity(ux: f64) -> FieldRef {
        let c = CartesianCoordinates::new(&["x", "y"]);
        let x = FourierBasis::real(c.coord(0).clone(), 16, (0.0, 2.0 * PI), 1.5).unwrap();
        let y = JacobiBasis::chebyshev(c.coord(1).clone(), 8, (0.0, 1.0), 1.5).unwrap();
        let s = CartesianSpace::new(c, Dtype::Real, vec![Some(x.into()), Some(y.into())]).unwrap();
        let mut u = Field::vector("u", s.into()).unwrap();
        u.set_grid_fn(|comp, _| if comp == 0 { ux } else { 0.0 }).unwrap();
        u.into_ref()
    }

    #[test]
    fn test_uniform_flow_step() {
        let u = channel_velocity(2.0);
        let mut cfl = Cfl::new(1.0, CflConfig::default().with_safety(0.5), Distributor::serial()).unwrap();
        cfl.add_velocity(&u).unwrap();
        // 24 grid points over 2π
        let dx = 2.0 * PI / 24.0;
        assert_relative_eq!(cfl.compute_max_frequency().unwrap(), 2.0 / dx, epsilon = 1e-12);
        assert_relative_eq!(cfl.compute_timestep(0).unwrap(), 0.5 * dx / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_caps_and_zero_velocity() {
        let u = channel_velocity(0.0);
        let mut cfl = Cfl::new(1.0, CflConfig::default().with_max_dt(0.05), Distributor::serial()).unwrap();
        assert_eq!(cfl.stored_dt(), 0.05);
        cfl.add_velocity(&u).unwrap();
        assert_eq!(cfl.compute_timestep(0).unwrap(), 0.05);

        let mut uncapped = Cfl::new(0.1, CflConfig::default(), Distributor::serial()).unwrap();
        uncapped.add_velocity(&u).unwrap();
        assert_eq!(uncapped.compute_timestep(0).unwrap(), 0.1);
    }

    #[test]
    fn test_threshold_hysteresis() {
        let u = channel_velocity(1.0);
        let dx = 2.0 * PI / 24.0;
        let config = CflConfig::default().with_threshold(0.1).with_cadence(2);
        // Stored step slightly below the bound: the small increase is ignored.
        let mut cfl = Cfl::new(0.95 * dx, config.clone(), Distributor::serial()).unwrap();
        cfl.add_velocity(&u).unwrap();
        assert_eq!(cfl.compute_timestep(0).unwrap(), 0.95 * dx);
        // Stored step above the bound: decreases always apply.
        let mut cfl = Cfl::new(2.0 * dx, config, Distributor::serial()).unwrap();
        cfl.add_velocity(&u).unwrap();
        assert_relative_eq!(cfl.compute_timestep(0).unwrap(), dx, epsilon = 1e-12);
        assert_relative_eq!(cfl.compute_timestep(1).unwrap(), dx, epsilon = 1e-12);
    }

    #[test]
    fn test_change_limits() {
        let u = channel_velocity(1.0);
        let dx = 2.0 * PI / 24.0;
        let mut cfl = Cfl::new(0.1 * dx, CflConfig::default().with_max_change(2.0), Distributor::serial()).unwrap();
        cfl.add_velocity(&u).unwrap();
        assert_relative_eq!(cfl.compute_timestep(0).unwrap(), 0.2 * dx, epsilon = 1e-12);
        assert_relative_eq!(cfl.compute_timestep(1).unwrap(), 0.4 * dx, epsilon = 1e-12);

        let mut cfl = Cfl::new(10.0 * dx, CflConfig::default().with_min_change(0.5), Distributor::serial()).unwrap();
        cfl.add_velocity(&u).unwrap();
        assert_relative_eq!(cfl.compute_timestep(0).unwrap(), 5.0 * dx, epsilon = 1e-12);
    }

    #[test]
    fn test_non_finite_velocity() {
        let u = channel_velocity(f64::NAN);
        let mut cfl = Cfl::new(0.1, CflConfig::default(), Distributor::serial()).unwrap();
        cfl.add_velocity(&u).unwrap();
        assert!(matches!(
            cfl.compute_timestep(0),
            Err(crate::error::SpectralError::Cfl(CflError::NonFiniteVelocity(_)))
        ));
    }

    #[test]
    fn test_invalid_config() {
        assert!(Cfl::new(0.1, CflConfig::default().with_cadence(0), Distributor::serial()).is_err());
        assert!(Cfl::new(-1.0, CflConfig::default(), Distributor::serial()).is_err());
        let bad = CflConfig::default().with_min_dt(1.0).with_max_dt(0.5);
        assert!(Cfl::new(0.1, bad, Distributor::serial()).is_err());
    }
}
