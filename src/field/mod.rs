//! Fields: tensor-valued data on a [`Space`].
//!
//! A field keeps both a coefficient and a grid buffer together with a
//! cache state saying which of them is current. Reading one
//! representation transforms lazily from the other; mutating one
//! invalidates the other.

mod layout;
mod space;

pub use layout::{
    ball_offset, coeff_len, grid_axes, grid_len, n_components, sigma_of, sphere_offset, to_coeff, to_grid,
};
pub use space::{CartesianSpace, Space};

pub(crate) use layout::map_axis;

use crate::basis::Dtype;
use crate::error::{BasisError, FieldError};
use num_complex::Complex64;
use parking_lot::RwLock;
use std::sync::Arc;

/// Shared handle to a field, used by expressions, problems and solvers.
pub type FieldRef = Arc<RwLock<Field>>;

/// Which buffers of a field hold current data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheState {
    Coeff,
    Grid,
    Both,
}

/// Tensor field on a space.
#[derive(Clone, Debug)]
pub struct Field {
    name: String,
    space: Space,
    rank: usize,
    coeff: Vec<Complex64>,
    grid: Vec<Complex64>,
    state: CacheState,
}

impl Field {
    /// A zero field of the given tensor rank.
    pub fn new(name: impl Into<String>, space: Space, rank: usize) -> Result<Self, FieldError> {
        let coeff = vec![Complex64::new(0.0, 0.0); coeff_len(&space, rank)?];
        let grid = vec![Complex64::new(0.0, 0.0); grid_len(&space, rank)?];
        Ok(Self {
            name: name.into(),
            space,
            rank,
            coeff,
            grid,
            state: CacheState::Both,
        })
    }

    pub fn scalar(name: impl Into<String>, space: Space) -> Result<Self, FieldError> {
        Self::new(name, space, 0)
    }

    pub fn vector(name: impl Into<String>, space: Space) -> Result<Self, FieldError> {
        Self::new(name, space, 1)
    }

    /// A scalar field with constant value on `space`.
    pub fn constant(space: Space, value: f64) -> Result<Self, FieldError> {
        let mut f = Self::scalar(format!("{value}"), space)?;
        f.grid.fill(Complex64::new(value, 0.0));
        f.state = CacheState::Grid;
        Ok(f)
    }

    /// Wrap into a shared handle.
    pub fn into_ref(self) -> FieldRef {
        Arc::new(RwLock::new(self))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn space(&self) -> &Space {
        &self.space
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn dtype(&self) -> Dtype {
        self.space.dtype()
    }

    pub fn n_components(&self) -> usize {
        n_components(&self.space, self.rank)
    }

    pub fn state(&self) -> CacheState {
        self.state
    }

    /// Make the coefficient buffer current.
    pub fn require_coeff_space(&mut self) -> Result<(), FieldError> {
        if self.state == CacheState::Grid {
            self.coeff = to_coeff(&self.space, self.rank, &self.grid)?;
            self.state = CacheState::Both;
        }
        Ok(())
    }

    /// Make the grid buffer current.
    pub fn require_grid_space(&mut self) -> Result<(), FieldError> {
        if self.state == CacheState::Coeff {
            self.grid = to_grid(&self.space, self.rank, &self.coeff)?;
            self.state = CacheState::Both;
        }
        Ok(())
    }

    pub fn coeff(&mut self) -> Result<&[Complex64], FieldError> {
        self.require_coeff_space()?;
        Ok(&self.coeff)
    }

    pub fn grid(&mut self) -> Result<&[Complex64], FieldError> {
        self.require_grid_space()?;
        Ok(&self.grid)
    }

    /// Current coefficients, transforming if needed; the grid is invalidated.
    pub fn coeff_mut(&mut self) -> Result<&mut [Complex64], FieldError> {
        self.require_coeff_space()?;
        self.state = CacheState::Coeff;
        Ok(&mut self.coeff)
    }

    /// Current grid values, transforming if needed; coefficients are invalidated.
    pub fn grid_mut(&mut self) -> Result<&mut [Complex64], FieldError> {
        self.require_grid_space()?;
        self.state = CacheState::Grid;
        Ok(&mut self.grid)
    }

    /// Read-only coefficients when they are current.
    pub fn coeff_if_current(&self) -> Option<&[Complex64]> {
        (self.state != CacheState::Grid).then_some(self.coeff.as_slice())
    }

    fn check_len(&self, context: &'static str, expected: usize, actual: usize) -> Result<(), FieldError> {
        if expected != actual {
            return Err(BasisError::ShapeMismatch {
                context,
                expected,
                actual,
            }
            .into());
        }
        Ok(())
    }

    pub fn set_coeff(&mut self, values: Vec<Complex64>) -> Result<(), FieldError> {
        self.check_len("set_coeff", self.coeff.len(), values.len())?;
        self.coeff = values;
        self.state = CacheState::Coeff;
        Ok(())
    }

    pub fn set_grid(&mut self, values: Vec<Complex64>) -> Result<(), FieldError> {
        self.check_len("set_grid", self.grid.len(), values.len())?;
        self.grid = values;
        self.state = CacheState::Grid;
        Ok(())
    }

    /// Set real grid values from a function of (component, point).
    ///
    /// Points are Cartesian coordinates in axis order, or (φ, θ, r) in the
    /// ball and (φ, θ) on a sphere. Constant axes pass `NaN`.
    pub fn set_grid_fn(&mut self, f: impl Fn(usize, &[f64]) -> f64) -> Result<(), FieldError> {
        let axes = grid_axes(&self.space);
        let per: usize = axes.iter().map(Vec::len).product();
        let mut values = Vec::with_capacity(per * self.n_components());
        let mut point = vec![0.0; axes.len()];
        for comp in 0..self.n_components() {
            for flat in 0..per {
                let mut rem = flat;
                for (a, ax) in axes.iter().enumerate().rev() {
                    point[a] = ax[rem % ax.len()];
                    rem /= ax.len();
                }
                values.push(Complex64::new(f(comp, &point), 0.0));
            }
        }
        self.set_grid(values)
    }

    /// Real parts of the grid values.
    pub fn grid_real(&mut self) -> Result<Vec<f64>, FieldError> {
        Ok(self.grid()?.iter().map(|v| v.re).collect())
    }

    /// Project onto the representable real subspace by a grid round trip.
    ///
    /// For real data the grid transform drops imaginary parts, so the
    /// coefficients come back with exact conjugate symmetry.
    pub fn enforce_hermitian_symmetry(&mut self) -> Result<(), FieldError> {
        if self.dtype() != Dtype::Real {
            return Ok(());
        }
        self.require_coeff_space()?;
        self.grid = to_grid(&self.space, self.rank, &self.coeff)?;
        self.state = CacheState::Grid;
        self.require_coeff_space()
    }

    /// Grid data of this field broadcast onto `target`.
    pub fn broadcast_grid(&mut self, target: &Space) -> Result<Vec<Complex64>, FieldError> {
        if self.space.same_grid(target) {
            return Ok(self.grid()?.to_vec());
        }
        let (src, dst) = match (&self.space, target) {
            (Space::Cartesian(a), Space::Cartesian(b)) if a.embeds_in(b) => (a.grid_shape(), b.grid_shape()),
            _ => {
                return Err(FieldError::IncompatibleSpace {
                    name: self.name.clone(),
                    reason: format!("cannot broadcast {} onto {}", self.space.kind(), target.kind()),
                });
            }
        };
        let ncomp = self.n_components();
        let grid = self.grid()?;
        let per_src: usize = src.iter().product();
        let per_dst: usize = dst.iter().product();
        let mut out = Vec::with_capacity(ncomp * per_dst);
        for comp in 0..ncomp {
            for flat in 0..per_dst {
                let mut rem = flat;
                let mut idx = 0;
                let mut stride = 1;
                for a in (0..dst.len()).rev() {
                    let i = rem % dst[a];
                    rem /= dst[a];
                    if src[a] > 1 {
                        idx += i * stride;
                    }
                    stride *= src[a];
                }
                out.push(grid[comp * per_src + idx]);
            }
        }
        Ok(out)
    }

    /// A copy of this field broadcast onto `target`.
    pub fn broadcast_to(&mut self, target: &Space) -> Result<Field, FieldError> {
        let grid = self.broadcast_grid(target)?;
        let mut out = Field::new(self.name.clone(), target.clone(), self.rank)?;
        out.set_grid(grid)?;
        Ok(out)
    }

    /// Copy data and state from a field on the same space.
    pub fn assign(&mut self, other: &Field) -> Result<(), FieldError> {
        if !self.space.same_grid(&other.space) || self.rank != other.rank {
            return Err(FieldError::IncompatibleSpace {
                name: self.name.clone(),
                reason: format!("cannot assign from '{}'", other.name),
            });
        }
        self.coeff.clone_from(&other.coeff);
        self.grid.clone_from(&other.grid);
        self.state = other.state;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::{CartesianCoordinates, FourierBasis, JacobiBasis};

    fn spaces() -> (Space, Space) {
        let c = CartesianCoordinates::new(&["x", "y"]);
        let x = FourierBasis::real(c.coord(0).clone(), 8, (0.0, 2.0 * std::f64::consts::PI), 1.5).unwrap();
        let y = JacobiBasis::chebyshev(c.coord(1).clone(), 6, (0.0, 1.0), 1.5).unwrap();
        let full = CartesianSpace::new(c, Dtype::Real, vec![Some(x.into()), Some(y.into())]).unwrap();
        let edge = full.restrict(1);
        (Space::Cartesian(full), Space::Cartesian(edge))
    }

    #[test]
    fn test_cache_transitions() {
        let (full, _) = spaces();
        let mut f = Field::scalar("u", full).unwrap();
        f.set_grid_fn(|_, p| p[0].cos() * p[1]).unwrap();
        assert_eq!(f.state(), CacheState::Grid);
        f.require_coeff_space().unwrap();
        assert_eq!(f.state(), CacheState::Both);
        f.coeff_mut().unwrap()[0] = Complex64::new(1.0, 0.0);
        assert_eq!(f.state(), CacheState::Coeff);
        assert!(f.coeff_if_current().is_some());
        f.grid().unwrap();
        assert_eq!(f.state(), CacheState::Both);
    }

    #[test]
    fn test_grid_round_trip_preserves_values() {
        let (full, _) = spaces();
        let mut f = Field::scalar("u", full).unwrap();
        f.set_grid_fn(|_, p| (2.0 * p[0]).sin() * (1.0 - p[1] * p[1])).unwrap();
        let before = f.grid_real().unwrap();
        f.require_coeff_space().unwrap();
        f.coeff_mut().unwrap();
        let after = f.grid_real().unwrap();
        for (a, b) in before.iter().zip(&after) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_broadcast_edge_field() {
        let (full, edge) = spaces();
        let mut g = Field::scalar("g", edge).unwrap();
        g.set_grid_fn(|_, p| (3.0 * p[0]).cos()).unwrap();
        let mut b = g.broadcast_to(&full).unwrap();
        let axes = grid_axes(&full);
        let values = b.grid_real().unwrap();
        let ny = axes[1].len();
        for (i, x) in axes[0].iter().enumerate() {
            for j in 0..ny {
                assert!((values[i * ny + j] - (3.0 * x).cos()).abs() < 1e-12);
            }
        }
        assert!(Field::scalar("u", full).unwrap().broadcast_to(&spaces().1).is_err());
    }

    #[test]
    fn test_hermitian_enforcement_zeroes_mean_imaginary_part() {
        let (full, _) = spaces();
        let mut f = Field::scalar("u", full).unwrap();
        f.coeff_mut().unwrap()[0] = Complex64::new(1.0, 0.5);
        f.enforce_hermitian_symmetry().unwrap();
        assert!(f.coeff().unwrap()[0].im.abs() < 1e-14);
        assert!((f.coeff().unwrap()[0].re - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_set_coeff_length_checked() {
        let (full, _) = spaces();
        let mut f = Field::scalar("u", full).unwrap();
        assert!(f.set_coeff(vec![Complex64::new(0.0, 0.0); 3]).is_err());
    }
}
