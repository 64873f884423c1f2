//! Function spaces: products of bases.

use crate::basis::{
    AxisBasis, Basis, BallBasis, CartesianCoordinates, Dtype, SphereBasis,
};
use crate::error::FieldError;
use std::sync::Arc;

/// Tensor product of one optional basis per Cartesian axis.
///
/// A `None` axis means the field is constant along that coordinate. At
/// most one axis may carry a Jacobi basis; that axis is the coupled
/// direction of the per-pencil systems.
#[derive(Clone, Debug)]
pub struct CartesianSpace {
    coords: CartesianCoordinates,
    dtype: Dtype,
    axes: Vec<Option<AxisBasis>>,
}

impl CartesianSpace {
    pub fn new(
        coords: CartesianCoordinates,
        dtype: Dtype,
        axes: Vec<Option<AxisBasis>>,
    ) -> Result<Self, FieldError> {
        let invalid = |reason: String| FieldError::IncompatibleSpace {
            name: "space".into(),
            reason,
        };
        if axes.len() != coords.dim() {
            return Err(invalid(format!(
                "{} bases given for {} coordinates",
                axes.len(),
                coords.dim()
            )));
        }
        let mut jacobi = 0;
        let mut real_fourier = 0;
        for (axis, basis) in axes.iter().enumerate() {
            match basis {
                Some(AxisBasis::Jacobi(_)) => jacobi += 1,
                Some(AxisBasis::Fourier(f)) if f.dtype() == Dtype::Real => {
                    if dtype == Dtype::Complex {
                        return Err(invalid(format!("real Fourier basis on axis {axis} in a complex space")));
                    }
                    real_fourier += 1;
                }
                Some(AxisBasis::Fourier(_)) => {}
                None => {}
            }
            if let Some(b) = basis {
                if b.as_basis().coord() != coords.coord(axis) {
                    return Err(invalid(format!(
                        "basis for '{}' attached to axis '{}'",
                        b.as_basis().coord(),
                        coords.coord(axis)
                    )));
                }
            }
        }
        if jacobi > 1 {
            return Err(invalid("at most one Jacobi axis is supported".into()));
        }
        if real_fourier > 1 {
            return Err(invalid("at most one real Fourier axis is supported".into()));
        }
        Ok(Self { coords, dtype, axes })
    }

    pub fn coords(&self) -> &CartesianCoordinates {
        &self.coords
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn dim(&self) -> usize {
        self.axes.len()
    }

    pub fn axis(&self, axis: usize) -> Option<&AxisBasis> {
        self.axes.get(axis).and_then(Option::as_ref)
    }

    pub fn axes(&self) -> &[Option<AxisBasis>] {
        &self.axes
    }

    /// Index of the Jacobi axis, if any.
    pub fn jacobi_axis(&self) -> Option<usize> {
        self.axes
            .iter()
            .position(|b| matches!(b, Some(AxisBasis::Jacobi(_))))
    }

    /// Index of the real (half-spectrum) Fourier axis, if any.
    pub fn real_fourier_axis(&self) -> Option<usize> {
        self.axes.iter().position(|b| match b {
            Some(AxisBasis::Fourier(f)) => f.dtype() == Dtype::Real,
            _ => false,
        })
    }

    pub fn coeff_shape(&self) -> Vec<usize> {
        self.axes
            .iter()
            .map(|b| b.as_ref().map_or(1, |b| b.as_basis().coeff_size()))
            .collect()
    }

    pub fn grid_shape(&self) -> Vec<usize> {
        self.axes
            .iter()
            .map(|b| b.as_ref().map_or(1, |b| b.as_basis().grid_size()))
            .collect()
    }

    /// The same space made constant along `axis`.
    pub fn restrict(&self, axis: usize) -> Self {
        let mut axes = self.axes.clone();
        if let Some(a) = axes.get_mut(axis) {
            *a = None;
        }
        Self {
            coords: self.coords.clone(),
            dtype: self.dtype,
            axes,
        }
    }

    /// The same space with `basis` on `axis`.
    pub fn with_axis(&self, axis: usize, basis: AxisBasis) -> Self {
        let mut axes = self.axes.clone();
        axes[axis] = Some(basis);
        Self {
            coords: self.coords.clone(),
            dtype: self.dtype,
            axes,
        }
    }

    /// Whether data on `self` can be broadcast onto `other` on the grid.
    pub fn embeds_in(&self, other: &Self) -> bool {
        self.coords == other.coords
            && self.axes.iter().zip(&other.axes).all(|(a, b)| match (a, b) {
                (None, _) => true,
                (Some(a), Some(b)) => a.same_grid(b),
                (Some(_), None) => false,
            })
    }

    /// Smallest space both operands embed in. Where both carry a basis,
    /// the basis of `self` is kept.
    pub fn union(&self, other: &Self) -> Result<Self, FieldError> {
        if self.coords != other.coords {
            return Err(FieldError::IncompatibleSpace {
                name: "union".into(),
                reason: "different coordinate systems".into(),
            });
        }
        let mut axes = Vec::with_capacity(self.axes.len());
        for (axis, (a, b)) in self.axes.iter().zip(&other.axes).enumerate() {
            axes.push(match (a, b) {
                (Some(a), Some(b)) if !a.same_grid(b) => {
                    return Err(FieldError::IncompatibleSpace {
                        name: "union".into(),
                        reason: format!("bases on axis {axis} have different grids"),
                    });
                }
                (Some(a), _) => Some(a.clone()),
                (None, b) => b.clone(),
            });
        }
        Ok(Self {
            coords: self.coords.clone(),
            dtype: self.dtype,
            axes,
        })
    }
}

/// Domain of a field.
#[derive(Clone, Debug)]
pub enum Space {
    Cartesian(CartesianSpace),
    /// Full ball (angles and radius).
    Ball(Arc<BallBasis>),
    /// A sphere: the ball surface, or any shell of the same angular basis.
    Sphere(Arc<SphereBasis>),
}

impl Space {
    /// Number of vector components.
    pub fn dim(&self) -> usize {
        match self {
            Self::Cartesian(c) => c.dim(),
            Self::Ball(_) | Self::Sphere(_) => 3,
        }
    }

    pub fn dtype(&self) -> Dtype {
        match self {
            Self::Cartesian(c) => c.dtype(),
            Self::Ball(b) => b.dtype(),
            Self::Sphere(s) => s.dtype(),
        }
    }

    pub fn as_cartesian(&self) -> Option<&CartesianSpace> {
        match self {
            Self::Cartesian(c) => Some(c),
            _ => None,
        }
    }

    /// Whether both spaces share the same grid.
    pub fn same_grid(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Cartesian(a), Self::Cartesian(b)) => a.embeds_in(b) && b.embeds_in(a),
            (Self::Ball(a), Self::Ball(b)) => {
                Arc::ptr_eq(a, b)
                    || (a.shape() == b.shape() && a.radius() == b.radius() && a.grid_shape() == b.grid_shape())
            }
            (Self::Sphere(a), Self::Sphere(b)) => {
                Arc::ptr_eq(a, b) || (a.shape() == b.shape() && a.grid_shape() == b.grid_shape())
            }
            _ => false,
        }
    }

    /// Whether fields on `self` broadcast onto `other` on the grid.
    pub fn embeds_in(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Cartesian(a), Self::Cartesian(b)) => a.embeds_in(b),
            _ => self.same_grid(other),
        }
    }

    /// Smallest space both operands embed in.
    pub fn union(&self, other: &Self) -> Result<Self, FieldError> {
        match (self, other) {
            (Self::Cartesian(a), Self::Cartesian(b)) => Ok(Self::Cartesian(a.union(b)?)),
            _ if other.embeds_in(self) => Ok(self.clone()),
            _ if self.embeds_in(other) => Ok(other.clone()),
            _ => Err(FieldError::IncompatibleSpace {
                name: "union".into(),
                reason: format!("cannot combine {} and {}", self.kind(), other.kind()),
            }),
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Cartesian(_) => "Cartesian space",
            Self::Ball(_) => "ball",
            Self::Sphere(_) => "sphere",
        }
    }
}

impl From<CartesianSpace> for Space {
    fn from(s: CartesianSpace) -> Self {
        Self::Cartesian(s)
    }
}

impl From<Arc<BallBasis>> for Space {
    fn from(b: Arc<BallBasis>) -> Self {
        Self::Ball(b)
    }
}

impl From<Arc<SphereBasis>> for Space {
    fn from(s: Arc<SphereBasis>) -> Self {
        Self::Sphere(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::{FourierBasis, JacobiBasis};

    fn poisson_space() -> (CartesianCoordinates, CartesianSpace) {
        let c = CartesianCoordinates::new(&["x", "y"]);
        let x = FourierBasis::real(c.coord(0).clone(), 8, (0.0, 1.0), 1.5).unwrap();
        let y = JacobiBasis::chebyshev(c.coord(1).clone(), 6, (0.0, 1.0), 1.5).unwrap();
        let s = CartesianSpace::new(c.clone(), Dtype::Real, vec![Some(x.into()), Some(y.into())]).unwrap();
        (c, s)
    }

    #[test]
    fn test_shapes() {
        let (_, s) = poisson_space();
        assert_eq!(s.coeff_shape(), vec![4, 6]);
        assert_eq!(s.grid_shape(), vec![12, 9]);
        assert_eq!(s.jacobi_axis(), Some(1));
        assert_eq!(s.real_fourier_axis(), Some(0));
    }

    #[test]
    fn test_restrict_and_union() {
        let (_, s) = poisson_space();
        let edge = s.restrict(1);
        assert_eq!(edge.coeff_shape(), vec![4, 1]);
        assert!(edge.embeds_in(&s));
        assert!(!s.embeds_in(&edge));
        let u = edge.union(&s).unwrap();
        assert_eq!(u.coeff_shape(), vec![4, 6]);
    }

    #[test]
    fn test_rejects_two_jacobi_axes() {
        let c = CartesianCoordinates::new(&["x", "y"]);
        let x = JacobiBasis::chebyshev(c.coord(0).clone(), 4, (0.0, 1.0), 1.0).unwrap();
        let y = JacobiBasis::chebyshev(c.coord(1).clone(), 4, (0.0, 1.0), 1.0).unwrap();
        assert!(CartesianSpace::new(c, Dtype::Real, vec![Some(x.into()), Some(y.into())]).is_err());
    }

    #[test]
    fn test_rejects_misplaced_basis() {
        let c = CartesianCoordinates::new(&["x", "y"]);
        let y = JacobiBasis::chebyshev(c.coord(1).clone(), 4, (0.0, 1.0), 1.0).unwrap();
        assert!(CartesianSpace::new(c, Dtype::Real, vec![Some(y.into()), None]).is_err());
    }
}
