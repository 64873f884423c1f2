//! Initial-value solver: M dX/dt + L X = F(X, t), advanced with an IMEX
//! multistep scheme.
//!
//! Each step evaluates the explicit terms from the current state, combines
//! them with the stored history and solves `(a0 M + b0 L) X^{n+1} = rhs` on
//! every pencil. Factorizations are cached by the quantized pair (a0, b0),
//! so a constant step size factorizes once. Nothing is committed until the
//! solve has succeeded.

use super::pencils::{Columns, PencilSet, evaluate_rhs, read_coeffs, write_solutions};
use super::{Checkpoint, SolverConfig};
use crate::distributor::Distributor;
use crate::error::{AssemblyError, Result, SpectralError};
use crate::linalg::LuFactor;
use crate::problem::{PencilSystem, Problem, ProblemKind, build_systems};
use crate::time::StepCoefficients;
use num_complex::Complex64;
use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

/// Lifecycle of an initial-value solver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IvpState {
    Initialized,
    Stepping,
    Stopped,
}

impl IvpState {
    fn name(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Stepping => "stepping",
            Self::Stopped => "stopped",
        }
    }
}

/// M X, L X and projected F of one pencil system at one time level.
#[derive(Clone, Debug)]
struct SystemLevel {
    mx: Columns,
    lx: Columns,
    f: Columns,
}

/// One time level of every local system.
type Level = Vec<SystemLevel>;

/// Bits of mantissa ignored when comparing implicit coefficients.
const KEY_DROPPED_BITS: u32 = 12;

fn quantize(x: f64) -> u64 {
    x.to_bits() >> KEY_DROPPED_BITS
}

/// Recently used factorizations of `a0 M + b0 L`, oldest first.
#[derive(Debug, Default)]
struct FactorCache {
    entries: VecDeque<((u64, u64), Vec<LuFactor>)>,
}

impl FactorCache {
    fn get_or_factorize(
        &mut self,
        pencils: &PencilSet,
        a0: f64,
        b0: f64,
        config: &SolverConfig,
    ) -> Result<&[LuFactor]> {
        let key = (quantize(a0), quantize(b0));
        let position = match self.entries.iter().position(|(k, _)| *k == key) {
            Some(p) => p,
            None => {
                let start = Instant::now();
                let factors = pencils.factorize(a0, b0, config.pivot_tolerance)?;
                log::info!(
                    "factorized {} pencils for a0 = {a0:.6e}, b0 = {b0} in {:.3}s",
                    factors.len(),
                    start.elapsed().as_secs_f64()
                );
                if self.entries.len() >= config.factor_cache_size.max(1) {
                    log::warn!("factorization cache full, evicting the oldest entry");
                    self.entries.pop_front();
                }
                self.entries.push_back((key, factors));
                self.entries.len() - 1
            }
        };
        Ok(&self.entries[position].1)
    }
}

#[derive(Debug)]
pub struct InitialValueSolver {
    problem: Problem,
    config: SolverConfig,
    pencils: PencilSet,
    cache: FactorCache,
    /// Previous levels, most recent first.
    history: VecDeque<Level>,
    /// Step sizes that produced the levels after each entry of `history`.
    timesteps: VecDeque<f64>,
    sim_time: f64,
    iteration: u64,
    initial_iteration: u64,
    last_dt: Option<f64>,
    started: Instant,
}

impl InitialValueSolver {
    /// Assemble `problem` on a single rank.
    pub fn new(problem: Problem, config: SolverConfig) -> Result<Self> {
        Self::with_distributor(problem, config, Distributor::serial())
    }

    /// Assemble `problem`, splitting the pencil solves across the ranks of
    /// `distributor`.
    pub fn with_distributor(problem: Problem, config: SolverConfig, distributor: Distributor) -> Result<Self> {
        if problem.kind() != ProblemKind::InitialValue {
            return Err(AssemblyError::Domain("an initial-value solver needs an initial-value problem".into()).into());
        }
        let start = Instant::now();
        let systems = build_systems(&problem, config.matrix_drop_tolerance)?;
        log::info!(
            "built IVP ({}) with {} pencil groups in {:.3}s",
            config.scheme,
            systems.len(),
            start.elapsed().as_secs_f64()
        );
        let pencils = PencilSet::new(systems, distributor, config.parallel);
        Ok(Self {
            problem,
            config,
            pencils,
            cache: FactorCache::default(),
            history: VecDeque::new(),
            timesteps: VecDeque::new(),
            sim_time: 0.0,
            iteration: 0,
            initial_iteration: 0,
            last_dt: None,
            started: Instant::now(),
        })
    }

    pub fn problem(&self) -> &Problem {
        &self.problem
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn systems(&self) -> &[PencilSystem] {
        self.pencils.systems()
    }

    pub fn distributor(&self) -> &Distributor {
        self.pencils.distributor()
    }

    pub fn sim_time(&self) -> f64 {
        self.sim_time
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Step size of the last step taken.
    pub fn timestep(&self) -> Option<f64> {
        self.last_dt
    }

    /// Seconds since the solver was built.
    pub fn wall_time(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn state(&self) -> IvpState {
        if self.stop_reason().is_some() {
            IvpState::Stopped
        } else if self.iteration == self.initial_iteration {
            IvpState::Initialized
        } else {
            IvpState::Stepping
        }
    }

    /// Whether none of the stop conditions has been reached.
    pub fn proceed(&self) -> bool {
        match self.stop_reason() {
            Some(reason) => {
                log::info!("stopping at iteration {}: {reason}", self.iteration);
                false
            }
            None => true,
        }
    }

    /// First stop condition reached, if any.
    pub fn stop_reason(&self) -> Option<&'static str> {
        if self.config.stop_sim_time.is_some_and(|t| self.sim_time >= t) {
            return Some("stop_sim_time reached");
        }
        if self.config.stop_iteration.is_some_and(|n| self.iteration >= n) {
            return Some("stop_iteration reached");
        }
        if self.config.stop_wall_time.is_some_and(|w| self.wall_time() >= w) {
            return Some("stop_wall_time reached");
        }
        None
    }

    /// Advance the unknowns by `dt`.
    ///
    /// On error the clock, the history and the unknowns are left untouched.
    /// Conjugate symmetry is re-imposed on the new state when due.
    pub fn step(&mut self, dt: f64) -> Result<()> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(SpectralError::InvalidState {
                state: self.state().name(),
                action: "step with a non-positive or non-finite timestep",
            });
        }
        let coeffs = read_coeffs(self.problem.variables())?;
        let rhs = evaluate_rhs(&self.problem)?;
        let needs_lx = self.config.scheme.is_crank_nicolson();
        let level: Level = self.pencils.map_local(|sys| {
            let x = sys.gather(&coeffs);
            SystemLevel {
                mx: x.iter().map(|c| sys.mass().mul_vec(c)).collect(),
                lx: if needs_lx {
                    x.iter().map(|c| sys.linear().mul_vec(c)).collect()
                } else {
                    Vec::new()
                },
                f: sys.project_rhs(&rhs),
            }
        });

        let order = self.config.scheme.order().min(1 + self.history.len());
        let dts: Vec<f64> = std::iter::once(dt).chain(self.timesteps.iter().copied()).take(order).collect();
        let k = self.config.scheme.coefficients(&dts);
        let columns = self.explicit_terms(&k, &level);
        let factors = self
            .cache
            .get_or_factorize(&self.pencils, k.a[0], k.b[0], &self.config)?;
        let solutions = self.pencils.solve(factors, columns);
        write_solutions(self.problem.variables(), self.pencils.systems(), &solutions)?;

        let keep = self.config.scheme.steps().saturating_sub(1);
        self.history.push_front(level);
        self.history.truncate(keep);
        self.timesteps.push_front(dt);
        self.timesteps.truncate(keep);
        self.iteration += 1;
        self.sim_time += dt;
        self.last_dt = Some(dt);
        self.enforce_hermitian_if_due()?;
        log::debug!(
            "iteration {} (order {}), t = {:.6e}, dt = {dt:.3e}",
            self.iteration,
            k.order(),
            self.sim_time
        );
        Ok(())
    }

    /// Σ_j c_j F^{n+1-j} - a_j M X^{n+1-j} - b_j L X^{n+1-j} for j ≥ 1.
    fn explicit_terms(&self, k: &StepCoefficients, current: &Level) -> Vec<Columns> {
        let levels: Vec<&Level> = std::iter::once(current).chain(self.history.iter()).collect();
        self.pencils
            .local()
            .iter()
            .enumerate()
            .map(|(i, sys)| {
                (0..sys.n_columns())
                    .map(|col| {
                        let mut out = vec![Complex64::new(0.0, 0.0); sys.size()];
                        for j in 1..=k.order() {
                            let level = &levels[j - 1][i];
                            axpy(&mut out, k.c[j], &level.f[col]);
                            axpy(&mut out, -k.a[j], &level.mx[col]);
                            if k.b[j] != 0.0 {
                                axpy(&mut out, -k.b[j], &level.lx[col]);
                            }
                        }
                        out
                    })
                    .collect()
            })
            .collect()
    }

    fn enforce_hermitian_if_due(&self) -> Result<()> {
        let Some(cadence) = self.config.hermitian_cadence.filter(|&n| n > 0) else {
            return Ok(());
        };
        if self.iteration % cadence as u64 > 1 {
            return Ok(());
        }
        log::debug!("enforcing conjugate symmetry at iteration {}", self.iteration);
        for v in self.problem.variables() {
            v.write().enforce_hermitian_symmetry()?;
        }
        Ok(())
    }

    /// Clock and coefficients of every unknown.
    pub fn serialize_state(&self) -> Result<Checkpoint> {
        let mut fields = BTreeMap::new();
        for v in self.problem.variables() {
            let mut f = v.write();
            let name = f.name().to_string();
            let coeffs = f.coeff()?.to_vec();
            if fields.insert(name.clone(), coeffs).is_some() {
                return Err(SpectralError::Checkpoint(format!("two unknowns are named '{name}'")));
            }
        }
        Ok(Checkpoint {
            iteration: self.iteration,
            sim_time: self.sim_time,
            timestep: self.last_dt,
            fields,
        })
    }

    /// Restore a checkpoint. The multistep history is discarded, so the
    /// next step is first order.
    pub fn deserialize_state(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        let variables = self.problem.variables();
        // Validate everything before touching any field.
        for v in variables {
            let f = v.read();
            let data = checkpoint
                .field(f.name())
                .ok_or_else(|| SpectralError::Checkpoint(format!("no data for '{}'", f.name())))?;
            let expected = crate::field::coeff_len(f.space(), f.rank())?;
            if data.len() != expected {
                return Err(SpectralError::Checkpoint(format!(
                    "'{}' has {} coefficients, expected {expected}",
                    f.name(),
                    data.len()
                )));
            }
        }
        for v in variables {
            let mut f = v.write();
            let data = checkpoint.field(f.name()).map(<[Complex64]>::to_vec).unwrap_or_default();
            f.set_coeff(data)?;
        }
        self.iteration = checkpoint.iteration;
        self.initial_iteration = checkpoint.iteration;
        self.sim_time = checkpoint.sim_time;
        self.last_dt = checkpoint.timestep;
        self.history.clear();
        self.timesteps.clear();
        log::info!(
            "restored checkpoint at iteration {}, t = {:.6e}",
            checkpoint.iteration,
            checkpoint.sim_time
        );
        Ok(())
    }
}

fn axpy(y: &mut [Complex64], a: f64, x: &[Complex64]) {
    if a == 0.0 {
        return;
    }
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += xi * a;
    }
}
