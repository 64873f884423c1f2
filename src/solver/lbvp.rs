//! Linear boundary-value solver: L X = F, solved once per right-hand side.

use super::SolverConfig;
use super::pencils::{PencilSet, evaluate_rhs, write_solutions};
use crate::distributor::Distributor;
use crate::error::{AssemblyError, Result, SpectralError};
use crate::linalg::LuFactor;
use crate::problem::{PencilSystem, Problem, ProblemKind, build_systems};
use std::time::Instant;

/// Lifecycle of a boundary-value solver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LbvpState {
    Built,
    Factorized,
    Solved,
}

impl LbvpState {
    fn name(self) -> &'static str {
        match self {
            Self::Built => "built",
            Self::Factorized => "factorized",
            Self::Solved => "solved",
        }
    }
}

#[derive(Debug)]
pub struct LinearBoundaryValueSolver {
    problem: Problem,
    config: SolverConfig,
    pencils: PencilSet,
    factors: Option<Vec<LuFactor>>,
    state: LbvpState,
}

impl LinearBoundaryValueSolver {
    /// Assemble `problem` on a single rank.
    pub fn new(problem: Problem, config: SolverConfig) -> Result<Self> {
        Self::with_distributor(problem, config, Distributor::serial())
    }

    /// Assemble `problem`, splitting the pencil solves across the ranks of
    /// `distributor`.
    pub fn with_distributor(problem: Problem, config: SolverConfig, distributor: Distributor) -> Result<Self> {
        if problem.kind() != ProblemKind::LinearBoundaryValue {
            return Err(AssemblyError::Domain("a boundary-value solver needs a boundary-value problem".into()).into());
        }
        let start = Instant::now();
        let systems = build_systems(&problem, config.matrix_drop_tolerance)?;
        log::info!(
            "built LBVP with {} pencil groups in {:.3}s",
            systems.len(),
            start.elapsed().as_secs_f64()
        );
        let pencils = PencilSet::new(systems, distributor, config.parallel);
        Ok(Self {
            problem,
            config,
            pencils,
            factors: None,
            state: LbvpState::Built,
        })
    }

    pub fn state(&self) -> LbvpState {
        self.state
    }

    pub fn problem(&self) -> &Problem {
        &self.problem
    }

    pub fn systems(&self) -> &[PencilSystem] {
        self.pencils.systems()
    }

    /// Factorize L on every local pencil. Called by [`Self::solve`] if needed.
    pub fn factorize(&mut self) -> Result<()> {
        if self.factors.is_some() {
            return Ok(());
        }
        let start = Instant::now();
        let factors = self.pencils.factorize(0.0, 1.0, self.config.pivot_tolerance)?;
        log::info!(
            "factorized {} pencils in {:.3}s",
            factors.len(),
            start.elapsed().as_secs_f64()
        );
        self.factors = Some(factors);
        self.state = LbvpState::Factorized;
        Ok(())
    }

    /// Evaluate the right-hand sides, solve, and store the solution in the
    /// coefficients of the unknowns.
    ///
    /// Solving again re-evaluates the right-hand sides and reuses the
    /// factorization.
    pub fn solve(&mut self) -> Result<()> {
        self.factorize()?;
        let rhs = evaluate_rhs(&self.problem)?;
        let columns = self.pencils.local().iter().map(|sys| sys.project_rhs(&rhs)).collect();
        let factors = self.factors.as_deref().ok_or(SpectralError::InvalidState {
            state: self.state.name(),
            action: "solve without factors",
        })?;
        let solutions = self.pencils.solve(factors, columns);
        write_solutions(self.problem.variables(), self.pencils.systems(), &solutions)?;
        self.state = LbvpState::Solved;
        log::debug!("LBVP solved");
        Ok(())
    }
}
