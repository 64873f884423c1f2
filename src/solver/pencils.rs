//! Pencil systems split across ranks.
//!
//! Every rank holds all assembled systems but factorizes and solves only
//! its own contiguous block. Solutions are recombined with an all-gather
//! so that every rank ends up with the full coefficient data.

use crate::distributor::{Distributor, ReduceOp, block_range};
use crate::error::{ExprError, Result, SingularSystemError, SpectralError};
use crate::field::{FieldRef, coeff_len};
use crate::linalg::{CsrMatrix, LuFactor};
use crate::operators::evaluate;
use crate::problem::{PencilSystem, Problem};
use num_complex::Complex64;
use std::ops::Range;

/// Right-hand sides of one system, one vector per column.
pub(crate) type Columns = Vec<Vec<Complex64>>;

#[derive(Debug)]
pub(crate) struct PencilSet {
    systems: Vec<PencilSystem>,
    local: Range<usize>,
    distributor: Distributor,
    parallel: bool,
}

impl PencilSet {
    pub(crate) fn new(systems: Vec<PencilSystem>, distributor: Distributor, parallel: bool) -> Self {
        let local = distributor.local_block(systems.len());
        log::debug!(
            "rank {} owns pencil groups {:?} of {}",
            distributor.rank(),
            local,
            systems.len()
        );
        Self {
            systems,
            local,
            distributor,
            parallel,
        }
    }

    pub(crate) fn systems(&self) -> &[PencilSystem] {
        &self.systems
    }

    /// Systems handled by this rank.
    pub(crate) fn local(&self) -> &[PencilSystem] {
        &self.systems[self.local.clone()]
    }

    pub(crate) fn distributor(&self) -> &Distributor {
        &self.distributor
    }

    /// Factorize `a M + b L` for every local system.
    pub(crate) fn factorize(&self, a: f64, b: f64, pivot_tolerance: f64) -> Result<Vec<LuFactor>> {
        let factor = |sys: &PencilSystem| {
            LuFactor::new(
                CsrMatrix::combine_dense(a, sys.mass(), b, sys.linear()),
                pivot_tolerance,
                &sys.label(),
            )
        };
        let local = self.map_local(factor);
        self.agree(local)
    }

    /// Solve the local systems and share the solutions with every rank.
    ///
    /// `rhs` holds the columns of the local systems in order.
    pub(crate) fn solve(&self, factors: &[LuFactor], rhs: Vec<Columns>) -> Vec<Columns> {
        let jobs: Vec<(&LuFactor, Columns)> = factors.iter().zip(rhs).collect();
        #[cfg(feature = "parallel")]
        let local: Vec<Columns> = if self.parallel {
            use rayon::prelude::*;
            jobs.into_par_iter().map(|(lu, b)| lu.solve_many(&b)).collect()
        } else {
            jobs.into_iter().map(|(lu, b)| lu.solve_many(&b)).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let local: Vec<Columns> = jobs.into_iter().map(|(lu, b)| lu.solve_many(&b)).collect();
        self.exchange(local)
    }

    /// Combine per-rank solutions into the solutions of all systems.
    fn exchange(&self, local: Vec<Columns>) -> Vec<Columns> {
        let size = self.distributor.size();
        if size == 1 {
            return local;
        }
        let flat: Vec<Complex64> = local.into_iter().flatten().flatten().collect();
        let gathered = self.distributor.comm().all_gather(flat);
        let n = self.systems.len();
        let mut out = Vec::with_capacity(n);
        for (rank, data) in gathered.into_iter().enumerate() {
            let mut values = data.into_iter();
            for sys in &self.systems[block_range(n, rank, size)] {
                let columns = (0..sys.n_columns())
                    .map(|_| values.by_ref().take(sys.size()).collect())
                    .collect();
                out.push(columns);
            }
        }
        out
    }

    /// Run `f` on every local system, on the rayon pool when enabled.
    pub(crate) fn map_local<T, F>(&self, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(&PencilSystem) -> T + Sync + Send,
    {
        #[cfg(feature = "parallel")]
        if self.parallel {
            use rayon::prelude::*;
            return self.local().par_iter().map(f).collect();
        }
        self.local().iter().map(f).collect()
    }

    /// Fail on every rank if any rank failed, so no rank is left waiting
    /// in a later collective.
    fn agree(&self, local: Vec<std::result::Result<LuFactor, SingularSystemError>>) -> Result<Vec<LuFactor>> {
        let local: std::result::Result<Vec<_>, _> = local.into_iter().collect();
        let rank = self.distributor.rank();
        let flag = if local.is_err() { (rank + 1) as f64 } else { 0.0 };
        let failed = self.distributor.comm().all_reduce(flag, ReduceOp::Max);
        match local {
            Err(e) => Err(e.into()),
            Ok(_) if failed > 0.0 => Err(SpectralError::Singular(SingularSystemError {
                pencil: format!("on rank {}", failed as usize - 1),
                pivot: f64::NAN,
                max_pivot: f64::NAN,
            })),
            Ok(factors) => Ok(factors),
        }
    }
}

/// Coefficients of every unknown, in problem order.
pub(crate) fn read_coeffs(variables: &[FieldRef]) -> Result<Vec<Vec<Complex64>>> {
    variables
        .iter()
        .map(|v| -> Result<Vec<Complex64>> { Ok(v.write().coeff()?.to_vec()) })
        .collect()
}

/// Scatter solutions into fresh coefficient buffers and store them.
pub(crate) fn write_solutions(variables: &[FieldRef], systems: &[PencilSystem], solutions: &[Columns]) -> Result<()> {
    let mut coeffs = variables
        .iter()
        .map(|v| -> Result<Vec<Complex64>> {
            let f = v.read();
            Ok(vec![Complex64::new(0.0, 0.0); coeff_len(f.space(), f.rank())?])
        })
        .collect::<Result<Vec<_>>>()?;
    for (sys, x) in systems.iter().zip(solutions) {
        sys.scatter(x, &mut coeffs);
    }
    for (v, c) in variables.iter().zip(coeffs) {
        v.write().set_coeff(c)?;
    }
    Ok(())
}

/// Coefficients of every equation's evaluated right-hand side, on the
/// space of its left-hand side. Zero right-hand sides give `None`.
pub(crate) fn evaluate_rhs(problem: &Problem) -> Result<Vec<Option<Vec<Complex64>>>> {
    problem
        .equations()
        .iter()
        .map(|eq| -> Result<Option<Vec<Complex64>>> {
            if eq.rhs.is_zero() {
                return Ok(None);
            }
            let Some(space) = eq.lhs.space()? else {
                return Ok(None);
            };
            let rank = eq.lhs.rank()?;
            let mut field = evaluate(&eq.rhs)?.into_field(&space)?;
            if field.rank() != rank {
                return Err(ExprError::RankMismatch {
                    op: "right-hand side",
                    left: rank,
                    right: field.rank(),
                }
                .into());
            }
            Ok(Some(field.coeff()?.to_vec()))
        })
        .collect()
}
