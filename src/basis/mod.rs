//! Spectral bases.
//!
//! This module provides:
//! - Coordinate systems (Cartesian, spherical)
//! - 1D Fourier bases (real half-spectrum or complex)
//! - 1D Jacobi bases on intervals (Chebyshev, Legendre, ultraspherical clones)
//! - The sphere S2 (spherical harmonics) and the ball (S2 × regular radial Jacobi)
//!
//! One-dimensional bases implement [`Basis`]; the curvilinear bases expose
//! the analogous transforms per spherical-harmonic block.

mod ball;
mod coords;
mod fourier;
mod jacobi;
mod sphere;

pub use ball::{BallBasis, RadialLiftBasis, RadialOp, radial_jets, radial_quadrature};
pub use coords::{CartesianCoordinates, Coord, CoordKind, CoordinateSystem, SphericalCoordinates};
pub use fourier::FourierBasis;
pub use jacobi::JacobiBasis;
pub use sphere::{SphereBasis, regularity_to_spherical, spherical_to_regularity, xi};

pub(crate) use fourier::check_len;
pub(crate) use jacobi::apply_real;

use crate::error::BasisError;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Scalar type of the physical data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Dtype {
    /// Real grid data; Fourier directions keep half spectra.
    #[default]
    Real,
    /// Complex grid data; Fourier directions keep full spectra.
    Complex,
}

/// A one-dimensional spectral basis.
pub trait Basis: fmt::Debug + Send + Sync {
    /// Coordinate this basis discretizes.
    fn coord(&self) -> &Coord;

    /// Nominal resolution N.
    fn size(&self) -> usize;

    /// Number of stored coefficients.
    fn coeff_size(&self) -> usize;

    /// Number of grid points (round(dealias · N)).
    fn grid_size(&self) -> usize;

    fn dealias(&self) -> f64;

    /// Coefficients to grid values.
    fn to_grid(&self, coeffs: &[Complex64]) -> Result<Vec<Complex64>, BasisError>;

    /// Grid values to coefficients.
    fn to_coeff(&self, grid: &[Complex64]) -> Result<Vec<Complex64>, BasisError>;

    /// Derivative of the given order, in coefficient space.
    fn differentiate(&self, coeffs: &[Complex64], order: usize) -> Result<Vec<Complex64>, BasisError>;
}

/// Basis attached to one axis of a Cartesian space.
#[derive(Clone, Debug)]
pub enum AxisBasis {
    Fourier(Arc<FourierBasis>),
    Jacobi(Arc<JacobiBasis>),
}

impl AxisBasis {
    pub fn as_basis(&self) -> &dyn Basis {
        match self {
            Self::Fourier(b) => b.as_ref(),
            Self::Jacobi(b) => b.as_ref(),
        }
    }

    pub fn is_fourier(&self) -> bool {
        matches!(self, Self::Fourier(_))
    }

    /// Whether two axis bases discretize the same grid.
    pub fn same_grid(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Fourier(a), Self::Fourier(b)) => {
                Arc::ptr_eq(a, b)
                    || (a.size() == b.size()
                        && a.bounds() == b.bounds()
                        && a.grid_size() == b.grid_size()
                        && a.dtype() == b.dtype())
            }
            (Self::Jacobi(a), Self::Jacobi(b)) => Arc::ptr_eq(a, b) || a.same_grid(b),
            _ => false,
        }
    }

    /// Physical grid points.
    pub fn grid(&self) -> Vec<f64> {
        match self {
            Self::Fourier(b) => b.grid(),
            Self::Jacobi(b) => b.grid(),
        }
    }
}

impl From<FourierBasis> for AxisBasis {
    fn from(b: FourierBasis) -> Self {
        Self::Fourier(Arc::new(b))
    }
}

impl From<JacobiBasis> for AxisBasis {
    fn from(b: JacobiBasis) -> Self {
        Self::Jacobi(Arc::new(b))
    }
}

impl From<Arc<FourierBasis>> for AxisBasis {
    fn from(b: Arc<FourierBasis>) -> Self {
        Self::Fourier(b)
    }
}

impl From<Arc<JacobiBasis>> for AxisBasis {
    fn from(b: Arc<JacobiBasis>) -> Self {
        Self::Jacobi(b)
    }
}

/// Basis used to lift tau variables into the interior.
#[derive(Clone, Debug)]
pub enum LiftBasis {
    /// A Jacobi family on the interval axis.
    Interval(Arc<JacobiBasis>),
    /// A radial family of the ball.
    Radial(RadialLiftBasis),
}

impl From<JacobiBasis> for LiftBasis {
    fn from(b: JacobiBasis) -> Self {
        Self::Interval(Arc::new(b))
    }
}

impl From<RadialLiftBasis> for LiftBasis {
    fn from(b: RadialLiftBasis) -> Self {
        Self::Radial(b)
    }
}

/// Grid size round(dealias · size), validated to be at least `size`.
pub(crate) fn grid_size_for(size: usize, dealias: f64) -> Result<usize, BasisError> {
    if !(dealias >= 1.0) || !dealias.is_finite() {
        return Err(BasisError::InvalidParameter(format!(
            "dealias factor must be finite and ≥ 1, got {dealias}"
        )));
    }
    Ok(((dealias * size as f64).round() as usize).max(size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_size_rounding() {
        assert_eq!(grid_size_for(128, 1.5).unwrap(), 192);
        assert_eq!(grid_size_for(5, 1.5).unwrap(), 8);
        assert_eq!(grid_size_for(4, 1.0).unwrap(), 4);
        assert!(grid_size_for(4, 0.5).is_err());
        assert!(grid_size_for(4, f64::NAN).is_err());
    }

    #[test]
    fn test_axis_same_grid() {
        let c = CartesianCoordinates::new(&["x", "y"]);
        let y = JacobiBasis::chebyshev(c.coord(1).clone(), 8, (0.0, 1.0), 1.5).unwrap();
        let lifted = AxisBasis::from(y.lift_basis(2).unwrap());
        let y = AxisBasis::from(y);
        assert!(y.same_grid(&lifted));
        let x = AxisBasis::from(FourierBasis::real(c.coord(0).clone(), 8, (0.0, 1.0), 1.5).unwrap());
        assert!(!x.same_grid(&y));
    }
}
