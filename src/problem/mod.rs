//! Problem definition: unknowns, equations and per-pencil assembly.
//!
//! A problem is an ordered list of unknown fields (tau fields included)
//! and an ordered list of equations. Each equation splits into an
//! implicit left-hand side, linear in the unknowns, and an explicit
//! right-hand side evaluated numerically. Equations may be restricted to
//! a subset of pencils with a [`Condition`].

mod assembly;
mod condition;
mod pencil;

pub use assembly::{PencilSystem, RowBlock, build_systems};
pub use condition::Condition;
pub use pencil::{Domain, PencilIndex};

pub(crate) use pencil::{ColumnMap, VarSlot, coupled_jacobi};

use crate::error::AssemblyError;
use crate::field::FieldRef;
use crate::operators::Expr;
use std::sync::Arc;

/// Whether a problem is a boundary-value or an initial-value problem.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProblemKind {
    /// L X = F, solved once.
    LinearBoundaryValue,
    /// M dX/dt + L X = F(X, t), advanced in time.
    InitialValue,
}

/// One equation `lhs = rhs`, applied where `condition` holds.
#[derive(Clone, Debug)]
pub struct Equation {
    pub lhs: Expr,
    pub rhs: Expr,
    pub condition: Condition,
}

impl Equation {
    /// Order of differentiation along the coupled coordinate of `domain`.
    pub fn differential_order(&self, domain: &Domain) -> usize {
        self.lhs.differential_order(domain.coupled_coord().as_ref())
    }
}

/// Unknowns and equations of a linear boundary-value or initial-value problem.
#[derive(Clone, Debug)]
pub struct Problem {
    kind: ProblemKind,
    variables: Vec<FieldRef>,
    equations: Vec<Equation>,
    domain: Domain,
}

impl Problem {
    /// Linear boundary-value problem over `variables`.
    pub fn lbvp(variables: Vec<FieldRef>) -> Result<Self, AssemblyError> {
        Self::new(ProblemKind::LinearBoundaryValue, variables)
    }

    /// Initial-value problem over `variables`.
    pub fn ivp(variables: Vec<FieldRef>) -> Result<Self, AssemblyError> {
        Self::new(ProblemKind::InitialValue, variables)
    }

    fn new(kind: ProblemKind, variables: Vec<FieldRef>) -> Result<Self, AssemblyError> {
        for (i, v) in variables.iter().enumerate() {
            if variables[..i].iter().any(|w| Arc::ptr_eq(v, w)) {
                return Err(AssemblyError::DuplicateVariable(v.read().name().to_string()));
            }
        }
        let domain = Domain::from_variables(&variables)?;
        log::debug!(
            "new {:?} over {} variables on a {} domain",
            kind,
            variables.len(),
            match domain {
                Domain::Cartesian(_) => "Cartesian",
                Domain::Ball(_) => "ball",
            }
        );
        Ok(Self {
            kind,
            variables,
            equations: Vec::new(),
            domain,
        })
    }

    pub fn kind(&self) -> ProblemKind {
        self.kind
    }

    pub fn variables(&self) -> &[FieldRef] {
        &self.variables
    }

    pub fn equations(&self) -> &[Equation] {
        &self.equations
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Add `lhs = rhs` on every pencil.
    pub fn add_equation(&mut self, lhs: impl Into<Expr>, rhs: impl Into<Expr>) -> Result<&mut Self, AssemblyError> {
        self.add_equation_if(lhs, rhs, Condition::Always)
    }

    /// Add `lhs = rhs` on the pencils where `condition` holds.
    pub fn add_equation_if(
        &mut self,
        lhs: impl Into<Expr>,
        rhs: impl Into<Expr>,
        condition: Condition,
    ) -> Result<&mut Self, AssemblyError> {
        let (lhs, rhs) = (lhs.into(), rhs.into());
        let index = self.equations.len();
        self.validate(index, &lhs, &rhs, &condition)?;
        log::debug!("equation {index}: {lhs} = {rhs} [{condition}]");
        self.equations.push(Equation { lhs, rhs, condition });
        Ok(self)
    }

    fn validate(&self, index: usize, lhs: &Expr, rhs: &Expr, condition: &Condition) -> Result<(), AssemblyError> {
        let wrap = |source| AssemblyError::Expression { index, source };
        if !lhs.depends_on(&self.variables) {
            return Err(AssemblyError::NoUnknowns { index });
        }
        let fits = match &self.domain {
            Domain::Ball(_) => condition.fits_ball(),
            Domain::Cartesian(_) => condition.fits_cartesian(&self.domain.fourier_axes()),
        };
        if !fits {
            return Err(AssemblyError::InvalidCondition {
                index,
                condition: condition.to_string(),
            });
        }
        match self.kind {
            ProblemKind::LinearBoundaryValue if lhs.has_time_derivative() || rhs.has_time_derivative() => {
                return Err(AssemblyError::SideMismatch {
                    index,
                    reason: "time derivatives are only allowed in initial-value problems".into(),
                });
            }
            ProblemKind::LinearBoundaryValue if rhs.depends_on(&self.variables) => {
                return Err(AssemblyError::SideMismatch {
                    index,
                    reason: "the right-hand side of a boundary-value problem cannot contain unknowns".into(),
                });
            }
            ProblemKind::InitialValue if rhs.has_time_derivative() => {
                return Err(AssemblyError::SideMismatch {
                    index,
                    reason: "time derivatives belong on the left-hand side".into(),
                });
            }
            _ => {}
        }
        let lrank = lhs.rank().map_err(wrap)?;
        let rrank = rhs.rank().map_err(wrap)?;
        if !rhs.is_zero() && !matches!(rhs, Expr::Constant(_)) && lrank != rrank {
            return Err(AssemblyError::SideMismatch {
                index,
                reason: format!("rank {lrank} and rank {rrank}"),
            });
        }
        if let (Some(l), Some(r)) = (lhs.space().map_err(wrap)?, rhs.space().map_err(wrap)?) {
            if !r.embeds_in(&l) {
                return Err(AssemblyError::SideMismatch {
                    index,
                    reason: format!("a {} right-hand side does not fit a {} equation", r.kind(), l.kind()),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::{CartesianCoordinates, Dtype, FourierBasis, JacobiBasis, LiftBasis};
    use crate::field::{CartesianSpace, Field};
    use crate::operators::{ddt, interp, lap, lift};

    fn poisson_vars() -> (CartesianCoordinates, Vec<FieldRef>, Arc<JacobiBasis>) {
        let c = CartesianCoordinates::new(&["x", "y"]);
        let x = FourierBasis::real(c.coord(0).clone(), 8, (0.0, 1.0), 1.5).unwrap();
        let y = Arc::new(JacobiBasis::chebyshev(c.coord(1).clone(), 8, (0.0, 1.0), 1.5).unwrap());
        let full = CartesianSpace::new(c.clone(), Dtype::Real, vec![Some(x.into()), Some(Arc::clone(&y).into())])
            .unwrap();
        let u = Field::scalar("u", full.clone().into()).unwrap().into_ref();
        let t1 = Field::scalar("tau1", full.restrict(1).into()).unwrap().into_ref();
        let t2 = Field::scalar("tau2", full.restrict(1).into()).unwrap().into_ref();
        (c, vec![u, t1, t2], y)
    }

    #[test]
    fn test_validation() {
        let (c, vars, y) = poisson_vars();
        let mut p = Problem::lbvp(vars.clone()).unwrap();
        let lb = LiftBasis::Interval(Arc::new(y.clone_with(1.5, 1.5).unwrap()));
        p.add_equation(lap(&vars[0]) + lift(&vars[1], lb.clone(), -1) + lift(&vars[2], lb, -2), 0.0)
            .unwrap();
        p.add_equation(interp(&vars[0], c.coord(1), 0.0), 0.0).unwrap();
        assert_eq!(p.equations().len(), 2);

        assert!(matches!(
            p.add_equation(Expr::Constant(1.0), 0.0),
            Err(AssemblyError::NoUnknowns { index: 2 })
        ));
        assert!(matches!(
            p.add_equation(ddt(&vars[0]), 0.0),
            Err(AssemblyError::SideMismatch { .. })
        ));
        assert!(matches!(
            p.add_equation_if(Expr::field(&vars[1]), 0.0, Condition::ell_eq(0)),
            Err(AssemblyError::InvalidCondition { .. })
        ));
        assert!(matches!(
            Problem::lbvp(vec![Arc::clone(&vars[0]), Arc::clone(&vars[0])]),
            Err(AssemblyError::DuplicateVariable(_))
        ));
    }

    #[test]
    fn test_ivp_accepts_nonlinear_rhs() {
        let (_, vars, _) = poisson_vars();
        let mut p = Problem::ivp(vec![Arc::clone(&vars[0])]).unwrap();
        let u = &vars[0];
        p.add_equation(ddt(u) - lap(u), Expr::field(u) * Expr::field(u)).unwrap();
        assert_eq!(p.kind(), ProblemKind::InitialValue);
        assert_eq!(p.equations()[0].differential_order(p.domain()), 2);
    }
}
