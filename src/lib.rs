//! # spectral-rs
//!
//! Sparse tau-method spectral solvers for partial differential equations.
//!
//! This crate provides the building blocks of a global spectral code:
//! - Orthonormal Jacobi polynomials, quadrature and associated Legendre functions
//! - Fourier, Chebyshev/Jacobi, sphere and ball bases with grid transforms
//! - Fields with lazily synchronized grid and coefficient data
//! - A typed operator algebra (grad, div, lap, curl, interpolation, tau lifts)
//! - Per-pencil assembly of sparse mass and stiffness matrices
//! - Linear boundary-value and IMEX multistep initial-value solvers
//! - CFL control, flow diagnostics and scheduled output
//!
//! # Example
//!
//! ```ignore
//! use spectral_rs::operators::{interp, lap, lift};
//! use spectral_rs::{LinearBoundaryValueSolver, Problem, SolverConfig};
//!
//! let mut problem = Problem::lbvp(vec![u.clone(), tau1.clone(), tau2.clone()])?;
//! problem.add_equation(lap(&u) + lift(&tau1, lb.clone(), -1) + lift(&tau2, lb, -2), &f)?;
//! problem.add_equation(interp(&u, y, 0.0), 0.0)?;
//! problem.add_equation(interp(&u, y, 1.0), 0.0)?;
//! let mut solver = LinearBoundaryValueSolver::new(problem, SolverConfig::default())?;
//! solver.solve()?;
//! ```

pub mod analysis;
pub mod basis;
pub mod distributor;
pub mod error;
pub mod field;
pub mod linalg;
pub mod operators;
pub mod polynomial;
pub mod problem;
pub mod solver;
pub mod time;

// Re-export main types for convenience
pub use analysis::{
    Cfl, CflConfig, Evaluator, GlobalFlowProperty, HandlerConfig, MemorySink, OutputHandler, OutputRecord,
    OutputSink,
};
pub use basis::{
    BallBasis, CartesianCoordinates, Coord, Dtype, FourierBasis, JacobiBasis, LiftBasis, SphereBasis,
    SphericalCoordinates,
};
pub use distributor::{Communicator, Distributor, LocalComm, ProcessMesh, ReduceOp, SerialComm};
pub use error::{Result, SpectralError};
pub use field::{CartesianSpace, Field, FieldRef, Space};
pub use operators::Expr;
pub use problem::{Condition, Equation, Problem, ProblemKind};
pub use solver::{
    Checkpoint, InitialValueSolver, IvpState, LbvpState, LinearBoundaryValueSolver, SolverConfig,
};
pub use time::MultistepScheme;
