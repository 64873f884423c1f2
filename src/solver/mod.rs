//! Boundary-value and initial-value solvers.
//!
//! Both solvers assemble the problem once into per-pencil systems
//! (see [`crate::problem`]) and keep their factorizations:
//!
//! - [`LinearBoundaryValueSolver`]: factorizes L and solves L X = F
//! - [`InitialValueSolver`]: steps M dX/dt + L X = F with a
//!   [`MultistepScheme`](crate::time::MultistepScheme), caching one
//!   factorization per implicit coefficient
//!
//! Solver state can be saved and restored through [`Checkpoint`].

mod checkpoint;
mod config;
mod ivp;
mod lbvp;
mod pencils;

pub use checkpoint::Checkpoint;
pub use config::SolverConfig;
pub use ivp::{InitialValueSolver, IvpState};
pub use lbvp::{LbvpState, LinearBoundaryValueSolver};
