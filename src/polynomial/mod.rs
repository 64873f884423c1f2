//! Polynomial evaluation and quadrature.
//!
//! This module provides:
//! - Orthonormal Jacobi polynomials with derivative jets
//! - Gauss-Jacobi, Gauss-Legendre and Gauss-Chebyshev quadrature
//! - Normalized associated Legendre functions for spherical harmonics

mod jacobi;
mod legendre;
mod quadrature;

pub use jacobi::{JET_DEPTH, JacobiFamily, Jet, gamma_half_integer, jacobi_mass};
pub use legendre::{assoc_legendre, assoc_legendre_with_derivative};
pub use quadrature::{gauss_chebyshev, gauss_jacobi, gauss_legendre};
