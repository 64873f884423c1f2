//! Pencils: the independent linear systems of a problem.
//!
//! Operators that are diagonal in some spectral indices decouple the
//! problem into one small system per index tuple:
//! - Cartesian domains: one pencil per tuple of Fourier coefficient
//!   indices; the Jacobi axis (if any) is the coupled direction
//! - the ball: one pencil per (ℓ, m); every order m of a degree ℓ shares
//!   the same matrices, so they are solved together as columns
//!
//! Unknown columns are ordered variable, then component, then mode.

use crate::basis::{AxisBasis, BallBasis, Basis, Coord, JacobiBasis};
use crate::error::AssemblyError;
use crate::field::{CartesianSpace, FieldRef, Space, ball_offset, sigma_of, sphere_offset};
use crate::operators::CompKind;
use std::fmt;
use std::sync::Arc;

/// Union of the variable spaces of a problem.
#[derive(Clone, Debug)]
pub enum Domain {
    Cartesian(CartesianSpace),
    Ball(Arc<BallBasis>),
}

impl Domain {
    /// Domain spanned by `variables`.
    pub fn from_variables(variables: &[FieldRef]) -> Result<Self, AssemblyError> {
        let mut cartesian: Option<CartesianSpace> = None;
        let mut ball: Option<Arc<BallBasis>> = None;
        let mut spheres = Vec::new();
        for v in variables {
            let field = v.read();
            match field.space() {
                Space::Cartesian(c) => {
                    cartesian = Some(match cartesian {
                        None => c.clone(),
                        Some(u) => u.union(c).map_err(|e| AssemblyError::Domain(e.to_string()))?,
                    });
                }
                Space::Ball(b) => {
                    if let Some(prev) = &ball {
                        if !Space::Ball(Arc::clone(prev)).same_grid(field.space()) {
                            return Err(AssemblyError::Domain(format!(
                                "variable '{}' lives on a different ball",
                                field.name()
                            )));
                        }
                    }
                    ball = Some(Arc::clone(b));
                }
                Space::Sphere(s) => spheres.push((field.name().to_string(), s.shape())),
            }
        }
        match (cartesian, ball) {
            (Some(c), None) if spheres.is_empty() => Ok(Self::Cartesian(c)),
            (None, Some(b)) => {
                if let Some((name, _)) = spheres.iter().find(|(_, shape)| *shape != b.sphere().shape()) {
                    return Err(AssemblyError::Domain(format!(
                        "surface variable '{name}' does not match the ball's angular resolution"
                    )));
                }
                Ok(Self::Ball(b))
            }
            (None, None) => Err(AssemblyError::Domain("no volume variable".into())),
            _ => Err(AssemblyError::Domain("Cartesian and curvilinear variables cannot be mixed".into())),
        }
    }

    /// Coordinate along which each pencil is coupled.
    pub fn coupled_coord(&self) -> Option<Coord> {
        match self {
            Self::Cartesian(c) => c.jacobi_axis().map(|a| c.coords().coord(a).clone()),
            Self::Ball(b) => Some(b.coords().r().clone()),
        }
    }

    /// Jacobi basis of the coupled axis of a Cartesian domain.
    pub fn coupled_basis(&self) -> Option<&Arc<JacobiBasis>> {
        match self {
            Self::Cartesian(c) => match c.jacobi_axis().and_then(|a| c.axis(a)) {
                Some(AxisBasis::Jacobi(b)) => Some(b),
                _ => None,
            },
            Self::Ball(_) => None,
        }
    }

    /// Axes carrying a Fourier basis.
    pub fn fourier_axes(&self) -> Vec<usize> {
        match self {
            Self::Cartesian(c) => (0..c.dim())
                .filter(|&a| c.axis(a).is_some_and(AxisBasis::is_fourier))
                .collect(),
            Self::Ball(_) => Vec::new(),
        }
    }

    /// Wavenumber of coefficient `index` on Fourier axis `axis`.
    pub fn wavenumber(&self, axis: usize, index: usize) -> Option<f64> {
        match self {
            Self::Cartesian(c) => match c.axis(axis) {
                Some(AxisBasis::Fourier(f)) => f.wavenumbers().get(index).copied(),
                _ => None,
            },
            Self::Ball(_) => None,
        }
    }

    /// Every pencil index of the domain, in a fixed order.
    pub fn pencils(&self) -> Vec<PencilIndex> {
        match self {
            Self::Cartesian(c) => {
                let mut out = vec![vec![None; c.dim()]];
                for a in self.fourier_axes() {
                    let n = c.axis(a).map_or(1, |b| b.as_basis().coeff_size());
                    out = out
                        .into_iter()
                        .flat_map(|modes| {
                            (0..n).map(move |i| {
                                let mut m = modes.clone();
                                m[a] = Some(i);
                                m
                            })
                        })
                        .collect();
                }
                out.into_iter().map(PencilIndex::Cartesian).collect()
            }
            Self::Ball(b) => {
                let sphere = b.sphere();
                (0..=b.l_max())
                    .flat_map(|ell| {
                        (0..sphere.n_orders())
                            .filter(move |&mi| sphere.m(mi).unsigned_abs() as usize <= ell)
                            .map(move |mi| PencilIndex::Ball { ell, orders: vec![mi] })
                    })
                    .collect()
            }
        }
    }
}

/// Spectral indices of one pencil group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PencilIndex {
    /// Coefficient index per Cartesian axis; `None` on the coupled axis
    /// and on axes without a basis.
    Cartesian(Vec<Option<usize>>),
    /// Degree ℓ and the stored orders solved together.
    Ball { ell: usize, orders: Vec<usize> },
}

impl PencilIndex {
    /// Number of right-hand-side columns solved with one factorization.
    pub fn n_columns(&self) -> usize {
        match self {
            Self::Cartesian(_) => 1,
            Self::Ball { orders, .. } => orders.len(),
        }
    }

    pub fn ell(&self) -> Option<usize> {
        match self {
            Self::Ball { ell, .. } => Some(*ell),
            Self::Cartesian(_) => None,
        }
    }
}

impl fmt::Display for PencilIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cartesian(modes) => {
                let parts: Vec<String> = modes
                    .iter()
                    .enumerate()
                    .filter_map(|(a, m)| m.map(|i| format!("n{a}={i}")))
                    .collect();
                if parts.is_empty() {
                    write!(f, "single")
                } else {
                    write!(f, "{}", parts.join(","))
                }
            }
            Self::Ball { ell, orders } => write!(f, "ell={ell} ({} orders)", orders.len()),
        }
    }
}

/// Columns of one variable component in a pencil.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct VarSlot {
    pub var: usize,
    pub comp: usize,
    pub kind: CompKind,
    pub offset: usize,
    pub size: usize,
}

/// Layout of the unknown vector of a pencil.
#[derive(Clone, Debug)]
pub(crate) struct ColumnMap {
    slots: Vec<VarSlot>,
    n_cols: usize,
}

impl ColumnMap {
    pub fn new(domain: &Domain, variables: &[FieldRef], index: &PencilIndex) -> Result<Self, AssemblyError> {
        let mut slots = Vec::new();
        let mut offset = 0;
        for (var, v) in variables.iter().enumerate() {
            let field = v.read();
            for comp in 0..field.n_components() {
                let (kind, size) = slot_shape(domain, field.space(), field.rank(), comp, index)?;
                slots.push(VarSlot {
                    var,
                    comp,
                    kind,
                    offset,
                    size,
                });
                offset += size;
            }
        }
        Ok(Self { slots, n_cols: offset })
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn slots(&self) -> &[VarSlot] {
        &self.slots
    }

    /// Slots of one variable, in component order.
    pub fn slots_of(&self, var: usize) -> impl Iterator<Item = &VarSlot> + '_ {
        self.slots.iter().filter(move |s| s.var == var)
    }

    /// (variable, flat coefficient index) of every column, for the RHS
    /// column `column` of the pencil group.
    pub fn positions(
        &self,
        variables: &[FieldRef],
        index: &PencilIndex,
        column: usize,
    ) -> Vec<(usize, usize)> {
        let mut out = Vec::with_capacity(self.n_cols);
        for slot in &self.slots {
            let field = variables[slot.var].read();
            for n in 0..slot.size {
                out.push((slot.var, flat_index(field.space(), slot.comp, index, column, n)));
            }
        }
        out
    }
}

fn slot_shape(
    domain: &Domain,
    space: &Space,
    rank: usize,
    comp: usize,
    index: &PencilIndex,
) -> Result<(CompKind, usize), AssemblyError> {
    Ok(match (space, index) {
        (Space::Cartesian(c), PencilIndex::Cartesian(modes)) => {
            // Constant along a Fourier axis: only the mean pencil carries it.
            let absent = domain.fourier_axes().iter().any(|&a| c.axis(a).is_none() && modes[a] != Some(0));
            if absent {
                (CompKind::Absent, 0)
            } else {
                match c.jacobi_axis().and_then(|a| c.axis(a)) {
                    Some(b) => (CompKind::Volume(0), b.as_basis().size()),
                    None => (CompKind::Surface, 1),
                }
            }
        }
        (Space::Ball(b), PencilIndex::Ball { ell, .. }) => {
            let k = if rank == 0 {
                Some(*ell)
            } else {
                BallBasis::regularity(*ell, sigma_of(comp))
            };
            match k {
                Some(k) => (CompKind::Volume(k), b.radial_count(*ell)),
                None => (CompKind::Absent, 0),
            }
        }
        (Space::Sphere(_), PencilIndex::Ball { ell, .. }) => {
            if rank > 0 && comp > 0 && *ell == 0 {
                (CompKind::Absent, 0)
            } else {
                (CompKind::Surface, 1)
            }
        }
        _ => {
            return Err(AssemblyError::Domain(format!(
                "{} variable in a pencil of another domain",
                space.kind()
            )));
        }
    })
}

/// Flat coefficient index of mode `n` of component `comp`.
pub(crate) fn flat_index(space: &Space, comp: usize, index: &PencilIndex, column: usize, n: usize) -> usize {
    match (space, index) {
        (Space::Cartesian(c), PencilIndex::Cartesian(modes)) => {
            let shape = c.coeff_shape();
            let mut flat = comp;
            for (a, &extent) in shape.iter().enumerate() {
                let i = match c.axis(a) {
                    Some(AxisBasis::Jacobi(_)) => n,
                    Some(AxisBasis::Fourier(_)) => modes[a].unwrap_or(0),
                    None => 0,
                };
                flat = flat * extent + i;
            }
            flat
        }
        (Space::Ball(b), PencilIndex::Ball { ell, orders }) => ball_offset(b, comp, orders[column], *ell) + n,
        (Space::Sphere(s), PencilIndex::Ball { ell, orders }) => sphere_offset(s, comp, orders[column], *ell),
        _ => 0,
    }
}

/// Basis used to sample volume components of a Cartesian variable.
pub(crate) fn coupled_jacobi(space: &Space) -> Option<&Arc<JacobiBasis>> {
    match space {
        Space::Cartesian(c) => match c.jacobi_axis().and_then(|a| c.axis(a)) {
            Some(AxisBasis::Jacobi(b)) => Some(b),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::{CartesianCoordinates, Dtype, FourierBasis, SphericalCoordinates};
    use crate::field::Field;

    #[test]
    fn test_cartesian_pencils_and_columns() {
        let c = CartesianCoordinates::new(&["x", "y"]);
        let x = FourierBasis::real(c.coord(0).clone(), 8, (0.0, 1.0), 1.5).unwrap();
        let y = JacobiBasis::chebyshev(c.coord(1).clone(), 6, (0.0, 1.0), 1.5).unwrap();
        let full = CartesianSpace::new(c, Dtype::Real, vec![Some(x.into()), Some(y.into())]).unwrap();
        let u = Field::scalar("u", full.clone().into()).unwrap().into_ref();
        let tau = Field::scalar("tau", full.restrict(1).into()).unwrap().into_ref();
        let mean = Field::scalar("c", full.restrict(0).restrict(1).into()).unwrap().into_ref();
        let vars = vec![u, tau, mean];

        let domain = Domain::from_variables(&vars).unwrap();
        let pencils = domain.pencils();
        assert_eq!(pencils.len(), 4);
        assert_eq!(pencils[2], PencilIndex::Cartesian(vec![Some(2), None]));

        let cols0 = ColumnMap::new(&domain, &vars, &pencils[0]).unwrap();
        assert_eq!(cols0.n_cols(), 6 + 1 + 1);
        let cols2 = ColumnMap::new(&domain, &vars, &pencils[2]).unwrap();
        assert_eq!(cols2.n_cols(), 6 + 1);
        assert_eq!(cols2.slots()[2].kind, CompKind::Absent);

        let pos = cols2.positions(&vars, &pencils[2], 0);
        // u[x=2, y=n] sits at 2*6 + n; tau[x=2] at 2.
        assert_eq!(pos[0], (0, 12));
        assert_eq!(pos[5], (0, 17));
        assert_eq!(pos[6], (1, 2));
    }

    #[test]
    fn test_ball_columns() {
        let ball = Arc::new(BallBasis::new(SphericalCoordinates::default(), (8, 6, 6), 1.0, 1.5, Dtype::Real).unwrap());
        let u = Field::vector("u", Space::Ball(Arc::clone(&ball))).unwrap().into_ref();
        let tau = Field::vector("tau", Space::Sphere(ball.surface())).unwrap().into_ref();
        let vars = vec![u, tau];
        let domain = Domain::from_variables(&vars).unwrap();

        let l0 = PencilIndex::Ball { ell: 0, orders: vec![0] };
        let cols = ColumnMap::new(&domain, &vars, &l0).unwrap();
        // Only σ = +1 at ℓ = 0 (6 modes) and the radial tau component.
        assert_eq!(cols.n_cols(), 6 + 1);

        let l2 = PencilIndex::Ball { ell: 2, orders: vec![0, 1] };
        let cols = ColumnMap::new(&domain, &vars, &l2).unwrap();
        // Every component at ℓ = 2 carries the same 5 modes.
        assert_eq!(ball.radial_count(2), 5);
        assert_eq!(cols.n_cols(), 3 * 5 + 3);
        assert_eq!(cols.positions(&vars, &l2, 1).len(), cols.n_cols());
        assert!(domain.pencils().iter().all(|p| p.n_columns() == 1));
    }
}
