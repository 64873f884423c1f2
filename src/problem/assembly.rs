//! Per-pencil assembly of the mass and linear operators.
//!
//! Each equation is linearized at the Gauss nodes of its output family
//! (the coupled basis raised by the equation's differential order) and
//! projected onto that family, one row per retained mode. Boundary
//! equations contribute a single row. Right-hand sides are projected the
//! same way through a precomputed conversion from the coefficients of the
//! evaluated right-hand-side field.

use super::pencil::flat_index;
use super::{ColumnMap, Domain, Equation, PencilIndex, Problem, ProblemKind, coupled_jacobi};
use crate::basis::{BallBasis, Basis, apply_real, radial_jets, radial_quadrature};
use crate::error::{AssemblyError, ExprError};
use crate::field::{Space, ball_offset, sigma_of, sphere_offset};
use crate::linalg::{CsrBuilder, CsrMatrix};
use crate::operators::{Comp, CompKind, LinearContext, Part, Tensor, linearize};
use faer::Mat;
use num_complex::Complex64;
use std::sync::Arc;

const ZERO: Complex64 = Complex64::new(0.0, 0.0);

/// Extra Gauss nodes beyond the degree of the projected products.
const QUADRATURE_MARGIN: usize = 2;

/// Rows of one equation component inside a pencil system.
#[derive(Clone, Debug)]
pub struct RowBlock {
    pub equation: usize,
    pub comp: usize,
    pub offset: usize,
    pub rows: usize,
    source: Option<RhsSource>,
}

/// Where the right-hand side of a row block comes from.
#[derive(Clone, Debug)]
struct RhsSource {
    /// Flat coefficient indices in the right-hand-side field, per column.
    indices: Vec<Vec<usize>>,
    /// Source coefficients to output rows; `None` copies a single value.
    conversion: Option<Arc<Mat<f64>>>,
}

/// Assembled system of one pencil group: M dX/dt + L X = F.
#[derive(Clone, Debug)]
pub struct PencilSystem {
    index: PencilIndex,
    columns: ColumnMap,
    mass: CsrMatrix,
    linear: CsrMatrix,
    blocks: Vec<RowBlock>,
    /// (variable, flat coefficient index) of every unknown, per column.
    positions: Vec<Vec<(usize, usize)>>,
}

impl PencilSystem {
    pub fn index(&self) -> &PencilIndex {
        &self.index
    }

    /// Number of unknowns (and equation rows).
    pub fn size(&self) -> usize {
        self.columns.n_cols()
    }

    pub fn mass(&self) -> &CsrMatrix {
        &self.mass
    }

    pub fn linear(&self) -> &CsrMatrix {
        &self.linear
    }

    pub fn blocks(&self) -> &[RowBlock] {
        &self.blocks
    }

    /// Number of right-hand-side columns solved together.
    pub fn n_columns(&self) -> usize {
        self.positions.len()
    }

    pub fn label(&self) -> String {
        self.index.to_string()
    }

    /// Unknown vectors of every column, read from per-variable coefficients.
    pub fn gather(&self, coeffs: &[Vec<Complex64>]) -> Vec<Vec<Complex64>> {
        self.positions
            .iter()
            .map(|pos| pos.iter().map(|&(var, i)| coeffs[var][i]).collect())
            .collect()
    }

    /// Write solved columns back into per-variable coefficients.
    pub fn scatter(&self, solutions: &[Vec<Complex64>], coeffs: &mut [Vec<Complex64>]) {
        for (pos, x) in self.positions.iter().zip(solutions) {
            for (&(var, i), v) in pos.iter().zip(x) {
                coeffs[var][i] = *v;
            }
        }
    }

    /// Projected right-hand sides, given the coefficients of every
    /// equation's evaluated right-hand side (`None` when zero).
    pub fn project_rhs(&self, rhs: &[Option<Vec<Complex64>>]) -> Vec<Vec<Complex64>> {
        let n = self.size();
        (0..self.n_columns())
            .map(|column| {
                let mut out = vec![ZERO; n];
                for block in &self.blocks {
                    let (Some(source), Some(Some(data))) = (&block.source, rhs.get(block.equation)) else {
                        continue;
                    };
                    let values: Vec<Complex64> = source.indices[column].iter().map(|&i| data[i]).collect();
                    let rows = &mut out[block.offset..block.offset + block.rows];
                    match &source.conversion {
                        Some(c) => {
                            for (o, v) in rows.iter_mut().zip(apply_real(c, &values)) {
                                *o = v;
                            }
                        }
                        None => {
                            if let (Some(o), Some(v)) = (rows.first_mut(), values.first()) {
                                *o = *v;
                            }
                        }
                    }
                }
                out
            })
            .collect()
    }
}

/// Sample nodes and test functions of one equation.
struct Projection {
    order: usize,
    rank: usize,
    nodes: Vec<f64>,
    weights: Vec<f64>,
    /// Space of the equation and its right-hand side.
    space: Option<Space>,
}

impl Projection {
    fn new(index: usize, eq: &Equation, domain: &Domain) -> Result<Self, AssemblyError> {
        let wrap = |source| AssemblyError::Expression { index, source };
        let order = eq.differential_order(domain);
        let rank = eq.lhs.rank().map_err(wrap)?;
        let space = eq.lhs.space().map_err(wrap)?;
        let (nodes, weights) = match domain {
            Domain::Cartesian(_) => match domain.coupled_basis() {
                Some(b) => {
                    let out = output_family(b, order).map_err(wrap)?;
                    out.family_quadrature(2 * b.size() + order + QUADRATURE_MARGIN)
                        .map_err(|e| wrap(e.into()))?
                }
                None => (vec![0.0], vec![1.0]),
            },
            Domain::Ball(b) => radial_quadrature(order as f64, b.n_r() + order + 2 * QUADRATURE_MARGIN, b.radius())
                .map_err(|e| wrap(e.into()))?,
        };
        Ok(Self {
            order,
            rank,
            nodes,
            weights,
            space,
        })
    }

    /// Test function values `psi[q][m]` and the row count for `kind`.
    fn test_functions(
        &self,
        kind: CompKind,
        domain: &Domain,
        index: &PencilIndex,
    ) -> Result<Option<Vec<Vec<f64>>>, ExprError> {
        let CompKind::Volume(k) = kind else {
            return Ok(None);
        };
        Ok(Some(match domain {
            Domain::Cartesian(_) => {
                let b = domain.coupled_basis().ok_or_else(|| ExprError::Unsupported {
                    op: "assembly",
                    reason: "volume rows without a coupled direction".into(),
                })?;
                let out = output_family(b, self.order)?;
                self.nodes
                    .iter()
                    .map(|&y| out.jets(b.size(), y).iter().map(|j| j[0]).collect::<Vec<f64>>())
                    .collect()
            }
            Domain::Ball(b) => {
                let count = index.ell().map_or(0, |ell| b.radial_count(ell));
                self.nodes
                    .iter()
                    .map(|&r| {
                        let jets = radial_jets(k, self.order as f64, count, r, b.radius())?;
                        Ok(jets.iter().map(|j| j[0]).collect::<Vec<f64>>())
                    })
                    .collect::<Result<Vec<_>, ExprError>>()?
            }
        }))
    }
}

fn output_family(b: &crate::basis::JacobiBasis, order: usize) -> Result<crate::basis::JacobiBasis, ExprError> {
    Ok(b.lift_basis(order)?)
}

fn row_count(kind: CompKind, domain: &Domain, index: &PencilIndex) -> Result<usize, ExprError> {
    Ok(match kind {
        CompKind::Absent => 0,
        CompKind::Surface => 1,
        CompKind::Volume(_) => match domain {
            Domain::Cartesian(_) => domain.coupled_basis().map_or(1, |b| b.size()),
            Domain::Ball(b) => index.ell().map_or(0, |ell| b.radial_count(ell)),
        },
        CompKind::Irregular => {
            return Err(ExprError::Unsupported {
                op: "assembly",
                reason: "a component has no regular radial expansion; restrict it to the boundary".into(),
            });
        }
    })
}

/// Project a linearized component onto `rows` rows starting at `row0`.
fn project(
    builder: &mut CsrBuilder,
    row0: usize,
    rows: usize,
    comp: &Comp,
    psi: Option<&[Vec<f64>]>,
    weights: &[f64],
) {
    let Some(jets) = &comp.jets else {
        return;
    };
    let cols = jets.cols();
    match psi {
        None => {
            for (col, v) in jets.row(0, 0).iter().enumerate() {
                builder.add(row0, col, *v);
            }
        }
        Some(psi) => {
            let mut dense = vec![ZERO; rows * cols];
            for (q, (p, &w)) in psi.iter().zip(weights).enumerate() {
                let values = jets.row(0, q);
                let nonzero: Vec<(usize, Complex64)> =
                    values.iter().copied().enumerate().filter(|(_, v)| *v != ZERO).collect();
                for (m, &pm) in p.iter().enumerate().take(rows) {
                    let s = w * pm;
                    if s == 0.0 {
                        continue;
                    }
                    let row = &mut dense[m * cols..(m + 1) * cols];
                    for &(col, v) in &nonzero {
                        row[col] += v * s;
                    }
                }
            }
            for m in 0..rows {
                for col in 0..cols {
                    builder.add(row0 + m, col, dense[m * cols + col]);
                }
            }
        }
    }
}

/// Source of the right-hand side of one row block.
fn rhs_source(
    proj: &Projection,
    domain: &Domain,
    comp: usize,
    kind: CompKind,
    index: &PencilIndex,
    psi: Option<&[Vec<f64>]>,
    rows: usize,
) -> Result<Option<RhsSource>, ExprError> {
    let Some(space) = &proj.space else {
        return Ok(None);
    };
    let columns = index.n_columns();
    let unsupported = |reason: &str| ExprError::Unsupported {
        op: "right-hand side",
        reason: reason.to_string(),
    };
    match (space, index) {
        (Space::Cartesian(c), PencilIndex::Cartesian(modes)) => {
            // Constant along a Fourier axis: only the mean pencil receives it.
            if domain.fourier_axes().iter().any(|&a| c.axis(a).is_none() && modes[a] != Some(0)) {
                return Ok(None);
            }
            let basis = coupled_jacobi(space);
            let n_src = basis.map_or(1, |b| b.size());
            let indices: Vec<Vec<usize>> = (0..columns)
                .map(|col| (0..n_src).map(|n| flat_index(space, comp, index, col, n)).collect())
                .collect();
            let conversion = match (psi, basis) {
                (None, None) => None,
                (None, Some(_)) => return Err(unsupported("a boundary equation has a volume right-hand side")),
                (Some(psi), basis) => {
                    let mut m = Mat::zeros(rows, n_src);
                    for (q, (&y, &w)) in proj.nodes.iter().zip(&proj.weights).enumerate() {
                        let phi: Vec<f64> = match basis {
                            Some(b) => b.jets(n_src, y).iter().map(|j| j[0]).collect(),
                            None => vec![1.0],
                        };
                        for r in 0..rows {
                            for (n, &p) in phi.iter().enumerate() {
                                m[(r, n)] += w * psi[q][r] * p;
                            }
                        }
                    }
                    Some(Arc::new(m))
                }
            };
            Ok(Some(RhsSource { indices, conversion }))
        }
        (Space::Ball(b), PencilIndex::Ball { ell, .. }) => {
            let CompKind::Volume(k) = kind else {
                return Err(unsupported("a boundary equation has a volume right-hand side"));
            };
            let k_src = if proj.rank == 0 {
                *ell
            } else {
                BallBasis::regularity(*ell, sigma_of(comp)).ok_or_else(|| unsupported("missing regularity component"))?
            };
            debug_assert_eq!(k_src, k);
            let n_src = b.radial_count(*ell);
            let indices = index_columns(index, |mi| (0..n_src).map(|n| ball_offset(b, comp, mi, *ell) + n).collect());
            let psi = psi.ok_or_else(|| unsupported("volume rows without test functions"))?;
            let mut m = Mat::zeros(rows, n_src);
            for (q, (&r, &w)) in proj.nodes.iter().zip(&proj.weights).enumerate() {
                let phi = b.jets(k_src, n_src, r)?;
                for row in 0..rows {
                    for (n, p) in phi.iter().enumerate() {
                        m[(row, n)] += w * psi[q][row] * p[0];
                    }
                }
            }
            Ok(Some(RhsSource {
                indices,
                conversion: Some(Arc::new(m)),
            }))
        }
        (Space::Sphere(s), PencilIndex::Ball { ell, .. }) => {
            if psi.is_some() {
                return Err(unsupported("a volume equation has a boundary right-hand side"));
            }
            let indices = index_columns(index, |mi| vec![sphere_offset(s, comp, mi, *ell)]);
            Ok(Some(RhsSource {
                indices,
                conversion: None,
            }))
        }
        _ => Err(unsupported("right-hand side lives on another domain")),
    }
}

fn index_columns(index: &PencilIndex, f: impl Fn(usize) -> Vec<usize>) -> Vec<Vec<usize>> {
    match index {
        PencilIndex::Ball { orders, .. } => orders.iter().map(|&mi| f(mi)).collect(),
        PencilIndex::Cartesian(_) => vec![f(0)],
    }
}

/// Pencil groups and the equations active in each.
fn pencil_groups(problem: &Problem) -> Vec<(PencilIndex, Vec<bool>)> {
    let domain = problem.domain();
    let eqs = problem.equations();
    match domain {
        Domain::Cartesian(_) => domain
            .pencils()
            .into_iter()
            .map(|p| {
                let active = match &p {
                    PencilIndex::Cartesian(modes) => eqs.iter().map(|e| e.condition.holds_cartesian(modes)).collect(),
                    PencilIndex::Ball { .. } => vec![false; eqs.len()],
                };
                (p, active)
            })
            .collect(),
        Domain::Ball(b) => {
            let sphere = b.sphere();
            let mut groups: Vec<(PencilIndex, Vec<bool>)> = Vec::new();
            for p in domain.pencils() {
                let PencilIndex::Ball { ell, orders } = p else {
                    continue;
                };
                let m = orders.first().map_or(0, |&mi| sphere.m(mi));
                let active: Vec<bool> = eqs.iter().map(|e| e.condition.holds_ball(ell, m)).collect();
                match groups.iter_mut().find(|(g, a)| g.ell() == Some(ell) && *a == active) {
                    Some((PencilIndex::Ball { orders: g, .. }, _)) => g.extend(orders),
                    _ => groups.push((PencilIndex::Ball { ell, orders }, active)),
                }
            }
            groups
        }
    }
}

/// Assemble every pencil group of `problem`.
pub fn build_systems(problem: &Problem, drop_tolerance: f64) -> Result<Vec<PencilSystem>, AssemblyError> {
    if problem.equations().is_empty() {
        return Err(AssemblyError::Empty);
    }
    let domain = problem.domain();
    let projections = problem
        .equations()
        .iter()
        .enumerate()
        .map(|(i, eq)| Projection::new(i, eq, domain))
        .collect::<Result<Vec<_>, _>>()?;
    let groups = pencil_groups(problem);
    log::info!(
        "assembling {} pencil groups for {} equations",
        groups.len(),
        problem.equations().len()
    );

    #[cfg(feature = "parallel")]
    let systems = {
        use rayon::prelude::*;
        groups
            .into_par_iter()
            .map(|(index, active)| build_pencil(problem, &projections, index, &active, drop_tolerance))
            .collect::<Result<Vec<_>, _>>()?
    };
    #[cfg(not(feature = "parallel"))]
    let systems = groups
        .into_iter()
        .map(|(index, active)| build_pencil(problem, &projections, index, &active, drop_tolerance))
        .collect::<Result<Vec<_>, _>>()?;

    let nnz: usize = systems.iter().map(|s| s.mass.nnz() + s.linear.nnz()).sum();
    log::debug!("assembled {} systems with {} nonzeros", systems.len(), nnz);
    Ok(systems)
}

fn build_pencil(
    problem: &Problem,
    projections: &[Projection],
    index: PencilIndex,
    active: &[bool],
    drop_tolerance: f64,
) -> Result<PencilSystem, AssemblyError> {
    let domain = problem.domain();
    let variables = problem.variables();
    let columns = ColumnMap::new(domain, variables, &index)?;
    let n = columns.n_cols();
    let ctx = LinearContext {
        variables,
        columns: &columns,
        domain,
        index: &index,
    };
    let mut mass = CsrBuilder::new(n, n);
    let mut linear = CsrBuilder::new(n, n);
    let mut blocks = Vec::new();
    let mut row = 0;

    for (e, eq) in problem.equations().iter().enumerate() {
        if !active[e] {
            continue;
        }
        let wrap = |source| AssemblyError::Expression { index: e, source };
        let proj = &projections[e];
        let lin = linearize(&eq.lhs, Part::Linear, &ctx, &proj.nodes).map_err(wrap)?;
        let mt: Option<Tensor> = match problem.kind() {
            ProblemKind::InitialValue => Some(linearize(&eq.lhs, Part::Mass, &ctx, &proj.nodes).map_err(wrap)?),
            ProblemKind::LinearBoundaryValue => None,
        };
        for (comp, lc) in lin.comps.iter().enumerate() {
            let mc = mt.as_ref().and_then(|t| t.comps.get(comp));
            let kind = match mc {
                Some(m) => m.kind.merge(lc.kind).map_err(wrap)?,
                None => lc.kind,
            };
            let rows = row_count(kind, domain, &index).map_err(wrap)?;
            if rows == 0 {
                continue;
            }
            if row + rows > n {
                return Err(AssemblyError::DimensionMismatch {
                    pencil: index.to_string(),
                    equations: row + rows,
                    unknowns: n,
                });
            }
            let psi = proj.test_functions(kind, domain, &index).map_err(wrap)?;
            project(&mut linear, row, rows, lc, psi.as_deref(), &proj.weights);
            if let Some(mc) = mc {
                project(&mut mass, row, rows, mc, psi.as_deref(), &proj.weights);
            }
            let source = if eq.rhs.is_zero() {
                None
            } else {
                rhs_source(proj, domain, comp, kind, &index, psi.as_deref(), rows).map_err(wrap)?
            };
            blocks.push(RowBlock {
                equation: e,
                comp,
                offset: row,
                rows,
                source,
            });
            row += rows;
        }
    }

    if row != n {
        return Err(AssemblyError::DimensionMismatch {
            pencil: index.to_string(),
            equations: row,
            unknowns: n,
        });
    }
    let positions = (0..index.n_columns())
        .map(|col| columns.positions(variables, &index, col))
        .collect();
    Ok(PencilSystem {
        index,
        columns,
        mass: mass.build(drop_tolerance),
        linear: linear.build(drop_tolerance),
        blocks,
        positions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::{CartesianCoordinates, Dtype, FourierBasis, JacobiBasis, LiftBasis};
    use crate::field::{CartesianSpace, Field, FieldRef};
    use crate::linalg::LuFactor;
    use crate::operators::{Expr, diff, interp, lap, lift};
    use std::f64::consts::PI;

    fn poisson(n: usize) -> (Problem, Vec<FieldRef>) {
        let c = CartesianCoordinates::new(&["x", "y"]);
        let x = FourierBasis::real(c.coord(0).clone(), 8, (0.0, 2.0 * PI), 1.5).unwrap();
        let y = Arc::new(JacobiBasis::chebyshev(c.coord(1).clone(), n, (0.0, 1.0), 1.5).unwrap());
        let full = CartesianSpace::new(c.clone(), Dtype::Real, vec![Some(x.into()), Some(Arc::clone(&y).into())])
            .unwrap();
        let u = Field::scalar("u", full.clone().into()).unwrap().into_ref();
        let t1 = Field::scalar("tau1", full.restrict(1).into()).unwrap().into_ref();
        let t2 = Field::scalar("tau2", full.restrict(1).into()).unwrap().into_ref();
        let vars = vec![Arc::clone(&u), Arc::clone(&t1), Arc::clone(&t2)];
        let lb = LiftBasis::Interval(Arc::new(y.lift_basis(2).unwrap()));
        let mut p = Problem::lbvp(vars.clone()).unwrap();
        p.add_equation(lap(&u) + lift(&t1, lb.clone(), -1) + lift(&t2, lb, -2), 0.0)
            .unwrap();
        p.add_equation(interp(&u, c.coord(1), 0.0), 0.0).unwrap();
        p.add_equation(interp(diff(&u, c.coord(1)), c.coord(1), 1.0), 0.0).unwrap();
        (p, vars)
    }

    #[test]
    fn test_poisson_pencils_are_square_and_nonsingular() {
        let (p, _) = poisson(10);
        let systems = build_systems(&p, 1e-12).unwrap();
        assert_eq!(systems.len(), 4);
        for s in &systems {
            assert_eq!(s.size(), 12);
            assert_eq!(s.blocks().len(), 3);
            LuFactor::new(s.linear().to_dense(), 1e-13, &s.label()).unwrap();
        }
    }

    #[test]
    fn test_missing_boundary_condition_is_a_dimension_mismatch() {
        let (p, vars) = poisson(8);
        let mut short = Problem::lbvp(vars.clone()).unwrap();
        short.add_equation(p.equations()[0].lhs.clone(), 0.0).unwrap();
        short.add_equation(p.equations()[1].lhs.clone(), 0.0).unwrap();
        assert!(matches!(
            build_systems(&short, 1e-12),
            Err(AssemblyError::DimensionMismatch {
                equations: 9,
                unknowns: 10,
                ..
            })
        ));
        let empty = Problem::lbvp(vars).unwrap();
        assert!(matches!(build_systems(&empty, 1e-12), Err(AssemblyError::Empty)));
    }

    #[test]
    fn test_rhs_projection_of_a_constant() {
        let (p, vars) = poisson(8);
        let mut q = Problem::lbvp(vars).unwrap();
        for (i, eq) in p.equations().iter().enumerate() {
            let rhs = if i == 0 { Expr::Constant(2.0) } else { Expr::Constant(0.0) };
            q.add_equation(eq.lhs.clone(), rhs).unwrap();
        }
        let systems = build_systems(&q, 1e-12).unwrap();
        let mut f = Field::constant(q.equations()[0].lhs.space().unwrap().unwrap(), 2.0).unwrap();
        let rhs = vec![Some(f.coeff().unwrap().to_vec()), None, None];
        let mean = systems[0].project_rhs(&rhs);
        // 2 projected on the output family: only the lowest mode is nonzero.
        let b = &mean[0][..8];
        assert!(b[0].norm() > 1.0);
        assert!(b[1..].iter().all(|v| v.norm() < 1e-12));
        let other = systems[1].project_rhs(&rhs);
        assert!(other[0].iter().all(|v| v.norm() < 1e-12));
    }
}
