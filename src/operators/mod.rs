//! Symbolic operators and their two interpretations.
//!
//! This module provides:
//! - Expression trees over fields ([`Expr`]) and their builders
//! - Numerical evaluation ([`evaluate`]) for explicit right-hand sides
//! - Per-pencil linearization into coefficient-space matrix rows,
//!   used by problem assembly

mod ball_ops;
mod evaluate;
mod expr;
mod jets;
mod linearize;

pub use evaluate::{Value, evaluate};
pub use expr::{
    Expr, angular, cross, curl, ddt, diff, div, dot, grad, grid, interp, lap, lift, radial, radial_vector, sqrt,
    trans,
};

pub(crate) use jets::{Comp, CompKind, Tensor};
pub(crate) use linearize::{LinearContext, Part, linearize, resolve_index};
