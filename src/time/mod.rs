//! Time integration methods.
//!
//! Implicit-explicit multistep schemes for M dX/dt + L X = F(X, t):
//! the linear terms are treated implicitly, F explicitly.

mod multistep;

pub use multistep::{MultistepScheme, StepCoefficients};
