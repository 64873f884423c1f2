//! Linearization of operator trees against the unknowns of one pencil.
//!
//! Every term is reduced to a [`Tensor`] of jets: for each output
//! component, the rows over the pencil unknowns of the term's value (and
//! derivatives) at the sample points of the coupled coordinate. The
//! assembly projects those rows onto the output family of the equation.
//!
//! Known factors (constants, non-constant coefficients that do not vary
//! along Fourier directions, the ball position vector) are folded in as
//! pointwise multipliers.

use super::evaluate::{Value, evaluate};
use super::expr::Expr;
use super::jets::{Comp, CompKind, ComplexJet, Form, Jets, Tensor, complex_jet, power_jets};
use crate::basis::{BallBasis, Basis, LiftBasis, RadialOp, xi};
use crate::error::ExprError;
use crate::field::{Field, FieldRef, Space};
use crate::polynomial::JET_DEPTH;
use crate::problem::{ColumnMap, Domain, PencilIndex, VarSlot, coupled_jacobi};
use num_complex::Complex64;
use std::sync::Arc;

const ZERO: Complex64 = Complex64::new(0.0, 0.0);

/// Which operator of M dX/dt + L X a term contributes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Part {
    Mass,
    Linear,
}

impl Part {
    fn swapped(self) -> Self {
        match self {
            Self::Mass => Self::Linear,
            Self::Linear => Self::Mass,
        }
    }
}

/// Unknowns and spectral indices of the pencil being linearized.
pub(crate) struct LinearContext<'a> {
    pub variables: &'a [FieldRef],
    pub columns: &'a ColumnMap,
    pub domain: &'a Domain,
    pub index: &'a PencilIndex,
}

impl LinearContext<'_> {
    fn variable(&self, f: &FieldRef) -> Option<usize> {
        self.variables.iter().position(|v| Arc::ptr_eq(v, f))
    }

    fn ell(&self, op: &'static str) -> Result<usize, ExprError> {
        self.index.ell().ok_or_else(|| ExprError::Unsupported {
            op,
            reason: "only defined in the ball".into(),
        })
    }

    /// Wavenumber of the pencil along a Fourier axis.
    fn wavenumber(&self, axis: usize) -> Option<f64> {
        match self.index {
            PencilIndex::Cartesian(modes) => modes
                .get(axis)
                .copied()
                .flatten()
                .and_then(|i| self.domain.wavenumber(axis, i)),
            PencilIndex::Ball { .. } => None,
        }
    }

    fn coupled_axis(&self) -> Option<usize> {
        match self.domain {
            Domain::Cartesian(c) => c.jacobi_axis(),
            Domain::Ball(_) => None,
        }
    }

    fn dim(&self) -> usize {
        match self.domain {
            Domain::Cartesian(c) => c.dim(),
            Domain::Ball(_) => 3,
        }
    }

    fn is_ball(&self) -> bool {
        matches!(self.domain, Domain::Ball(_))
    }
}

/// Linearize `expr` at the sample points `points` of the coupled coordinate.
pub(crate) fn linearize(expr: &Expr, part: Part, ctx: &LinearContext<'_>, points: &[f64]) -> Result<Tensor, ExprError> {
    match expr {
        Expr::Field(f) => match ctx.variable(f) {
            Some(var) => variable(var, f, part, ctx, points),
            None => Err(ExprError::NonlinearTerm(format!(
                "'{}' is not an unknown of the problem",
                f.read().name()
            ))),
        },
        Expr::Constant(c) => Err(ExprError::NonlinearTerm(format!(
            "constant {c} does not multiply an unknown"
        ))),
        Expr::RadialVector(_) => Err(ExprError::NonlinearTerm(
            "position vector does not multiply an unknown".into(),
        )),
        Expr::Add(a, b) => {
            let mut ta = linearize(a, part, ctx, points)?;
            let mut tb = linearize(b, part, ctx, points)?;
            if ta.rank == 1 && tb.rank == 1 && ta.form != tb.form {
                let ell = ctx.ell("add")?;
                ta = to_spherical(&ta, ell);
                tb = to_spherical(&tb, ell);
            }
            ta.add(&tb)
        }
        Expr::Neg(a) => Ok(linearize(a, part, ctx, points)?.scaled(Complex64::new(-1.0, 0.0))),
        Expr::Mul(a, b) => product(a, b, part, ctx, points),
        Expr::Dot(a, b) => contraction(a, b, false, part, ctx, points),
        Expr::Cross(a, b) => contraction(a, b, true, part, ctx, points),
        Expr::Grad(a) => {
            let t = linearize(a, part, ctx, points)?;
            if ctx.is_ball() {
                ball_grad(&t, ctx.ell("grad")?, points)
            } else {
                cartesian_grad(&t, ctx)
            }
        }
        Expr::Div(a) => {
            let t = linearize(a, part, ctx, points)?;
            if ctx.is_ball() {
                ball_div(&t, ctx.ell("div")?, points)
            } else {
                cartesian_div(&t, ctx)
            }
        }
        Expr::Lap(a) => {
            let t = linearize(a, part, ctx, points)?;
            if ctx.is_ball() {
                ball_lap(&t, points)
            } else {
                let dim = ctx.dim();
                let mut out = t.zeroed();
                for axis in 0..dim {
                    let second = t
                        .comps
                        .iter()
                        .map(|c| partial(&partial(c, axis, ctx)?, axis, ctx))
                        .collect::<Result<Vec<_>, _>>()?;
                    let term = Tensor {
                        rank: t.rank,
                        form: t.form,
                        comps: second,
                    };
                    out = out.add(&term)?;
                }
                Ok(out)
            }
        }
        Expr::Curl(a) => {
            let t = linearize(a, part, ctx, points)?;
            if ctx.is_ball() {
                ball_curl(&t, ctx.ell("curl")?, points)
            } else {
                cartesian_curl(&t, ctx)
            }
        }
        Expr::Diff(a, coord) => {
            if ctx.is_ball() {
                return Err(ExprError::Unsupported {
                    op: "diff",
                    reason: "partial derivatives are Cartesian only".into(),
                });
            }
            let t = linearize(a, part, ctx, points)?;
            let comps = t
                .comps
                .iter()
                .map(|c| partial(c, coord.axis(), ctx))
                .collect::<Result<_, _>>()?;
            Ok(Tensor {
                rank: t.rank,
                form: t.form,
                comps,
            })
        }
        Expr::TimeDerivative(a) => {
            if a.has_time_derivative() {
                return Err(ExprError::Unsupported {
                    op: "dt",
                    reason: "nested time derivatives".into(),
                });
            }
            linearize(a, part.swapped(), ctx, points)
        }
        Expr::Lift { operand, basis, index } => lift(operand, basis, *index, part, ctx, points),
        Expr::Interp {
            operand,
            coord,
            position,
        } => {
            match ctx.domain {
                Domain::Cartesian(c) => {
                    let axis = coord.axis();
                    if Some(axis) == ctx.coupled_axis() {
                        let t = linearize(operand, part, ctx, &[*position])?;
                        Ok(to_surface(&t, points.len()))
                    } else if c.axis(axis).is_none() {
                        linearize(operand, part, ctx, points)
                    } else {
                        Err(ExprError::Unsupported {
                            op: "interpolation",
                            reason: format!("'{coord}' is a Fourier direction"),
                        })
                    }
                }
                Domain::Ball(b) => {
                    if coord != b.coords().r() {
                        return Err(ExprError::Unsupported {
                            op: "interpolation",
                            reason: format!("cannot restrict the ball along '{coord}'"),
                        });
                    }
                    let mut t = linearize(operand, part, ctx, &[*position])?;
                    if t.rank == 1 && t.form == Form::Regularity {
                        t = to_spherical(&t, ctx.ell("interpolation")?);
                    }
                    Ok(to_surface(&t, points.len()))
                }
            }
        }
        Expr::RadialComponent(a) => {
            let ell = ctx.ell("radial component")?;
            if a.rank()? >= 2 {
                return radial_of_rank2(a, part, ctx, points);
            }
            let mut t = linearize(a, part, ctx, points)?;
            if t.form == Form::Regularity {
                t = to_spherical(&t, ell);
            }
            let comp = t.comps.swap_remove(0);
            Ok(Tensor::scalar(Form::Spherical, comp))
        }
        Expr::AngularComponent(a) => {
            let ell = ctx.ell("angular component")?;
            let mut t = linearize(a, part, ctx, points)?;
            if t.rank != 1 {
                return Err(ExprError::Unsupported {
                    op: "angular component",
                    reason: format!("rank {} operands", t.rank),
                });
            }
            if t.form == Form::Regularity {
                t = to_spherical(&t, ell);
            }
            t.comps[0] = Comp::zero(CompKind::Absent);
            Ok(t)
        }
        Expr::Transpose(a) => {
            if ctx.is_ball() {
                return Err(ExprError::Unsupported {
                    op: "transpose",
                    reason: "ball tensors are only transposed under a radial component".into(),
                });
            }
            let t = linearize(a, part, ctx, points)?;
            let n = ctx.dim();
            let comps = (0..n * n).map(|c| t.comps[(c % n) * n + c / n].clone()).collect();
            Ok(Tensor {
                rank: 2,
                form: t.form,
                comps,
            })
        }
        Expr::Grid(_) => Err(ExprError::NonlinearTerm(format!(
            "'{expr}' is marked for explicit evaluation"
        ))),
        Expr::Sqrt(_) => Err(ExprError::NonlinearTerm(format!("'{expr}' is not linear"))),
    }
}

// ============================================================================
// Leaves
// ============================================================================

fn variable(
    var: usize,
    f: &FieldRef,
    part: Part,
    ctx: &LinearContext<'_>,
    points: &[f64],
) -> Result<Tensor, ExprError> {
    let field = f.read();
    let form = match field.space() {
        Space::Cartesian(_) => Form::Cartesian,
        Space::Ball(_) => Form::Regularity,
        Space::Sphere(_) => Form::Spherical,
    };
    let comps = ctx
        .columns
        .slots_of(var)
        .map(|slot| slot_comp(slot, field.space(), part, ctx.columns.n_cols(), points))
        .collect::<Result<_, _>>()?;
    Ok(Tensor {
        rank: field.rank(),
        form,
        comps,
    })
}

fn slot_comp(slot: &VarSlot, space: &Space, part: Part, cols: usize, points: &[f64]) -> Result<Comp, ExprError> {
    if part == Part::Mass {
        return Ok(Comp::zero(slot.kind));
    }
    match slot.kind {
        CompKind::Absent => Ok(Comp::zero(CompKind::Absent)),
        CompKind::Surface => {
            let mut row = vec![ZERO; cols];
            row[slot.offset] = Complex64::new(1.0, 0.0);
            Ok(Comp::new(CompKind::Surface, Jets::surface(points.len(), &row)))
        }
        CompKind::Volume(k) => {
            let values = match space {
                Space::Ball(b) => points
                    .iter()
                    .map(|&r| b.jets(k, slot.size, r))
                    .collect::<Result<Vec<_>, _>>()?,
                _ => {
                    let basis = coupled_jacobi(space).ok_or_else(|| ExprError::Unsupported {
                        op: "linearize",
                        reason: "volume component without a coupled basis".into(),
                    })?;
                    points.iter().map(|&y| basis.jets(slot.size, y)).collect()
                }
            };
            Ok(Comp::new(slot.kind, Jets::from_modes(cols, slot.offset, &values)))
        }
        CompKind::Irregular => Err(ExprError::Unsupported {
            op: "linearize",
            reason: "irregular variable component".into(),
        }),
    }
}

// ============================================================================
// Products with known factors
// ============================================================================

/// Scale of a position-vector factor: `r_vec`, `-r_vec`, `c * r_vec`.
fn position_scale(e: &Expr) -> Option<f64> {
    match e {
        Expr::RadialVector(_) => Some(1.0),
        Expr::Neg(a) => position_scale(a).map(|s| -s),
        Expr::Mul(a, b) => match (a.as_ref(), b.as_ref()) {
            (Expr::Constant(c), x) | (x, Expr::Constant(c)) => position_scale(x).map(|s| c * s),
            _ => None,
        },
        _ => None,
    }
}

/// Split a binary term into (known, unknown) factors.
fn split_known<'e>(a: &'e Expr, b: &'e Expr, ctx: &LinearContext<'_>, op: &str) -> Result<(&'e Expr, &'e Expr, bool), ExprError> {
    match (a.depends_on(ctx.variables), b.depends_on(ctx.variables)) {
        (true, false) => Ok((b, a, false)),
        (false, true) => Ok((a, b, true)),
        (true, true) => Err(ExprError::NonlinearTerm(format!("{op} of two unknown terms"))),
        (false, false) => Err(ExprError::NonlinearTerm(format!("{op} without unknowns"))),
    }
}

fn product(a: &Expr, b: &Expr, part: Part, ctx: &LinearContext<'_>, points: &[f64]) -> Result<Tensor, ExprError> {
    let (known, unknown, _) = split_known(a, b, ctx, "product")?;
    let t = linearize(unknown, part, ctx, points)?;

    if let Some(scale) = position_scale(known) {
        let ell = ctx.ell("position vector")?;
        if t.rank != 0 {
            return Err(ExprError::RankMismatch {
                op: "mul",
                left: 1,
                right: t.rank,
            });
        }
        let r = power_jets(points, 1);
        let rt = t.comps[0].map_jets(t.comps[0].kind, |j| Ok(j.mul_function(&r)))?;
        let (xm, xp) = xi(ell);
        let comps = [(-1, scale * xm), (0, 0.0), (1, -scale * xp)]
            .into_iter()
            .map(|(sigma, c)| match BallBasis::regularity(ell, sigma) {
                Some(k) if c != 0.0 && rt.kind != CompKind::Absent => {
                    Comp::combine(CompKind::Volume(k), &[(c, &rt)])
                }
                _ => Comp::zero(CompKind::Absent),
            })
            .collect();
        return Ok(Tensor {
            rank: 1,
            form: Form::Regularity,
            comps,
        });
    }

    match evaluate(known)? {
        Value::Constant(c) => Ok(t.scaled(Complex64::new(c, 0.0))),
        Value::Field(mut f) => {
            let ncc = coefficient_jets(&mut f, ctx, points)?;
            match (f.rank(), t.rank) {
                (0, _) => {
                    let comps = t
                        .comps
                        .iter()
                        .map(|c| c.map_jets(c.kind, |j| Ok(j.mul_function(&ncc[0]))))
                        .collect::<Result<_, _>>()?;
                    Ok(Tensor { comps, ..t })
                }
                (rank, 0) => {
                    let u = &t.comps[0];
                    let comps = ncc
                        .iter()
                        .map(|fc| u.map_jets(u.kind, |j| Ok(j.mul_function(fc))))
                        .collect::<Result<_, _>>()?;
                    Ok(Tensor {
                        rank,
                        form: Form::Cartesian,
                        comps,
                    })
                }
                (left, right) => Err(ExprError::RankMismatch { op: "mul", left, right }),
            }
        }
    }
}

/// Dot or cross product of a known Cartesian tensor with an unknown term.
fn contraction(
    a: &Expr,
    b: &Expr,
    cross: bool,
    part: Part,
    ctx: &LinearContext<'_>,
    points: &[f64],
) -> Result<Tensor, ExprError> {
    let op = if cross { "cross" } else { "dot" };
    if ctx.is_ball() {
        return Err(ExprError::Unsupported {
            op,
            reason: "products with ball fields are explicit terms".into(),
        });
    }
    let (known, unknown, known_left) = split_known(a, b, ctx, op)?;
    let t = linearize(unknown, part, ctx, points)?;
    let mut f = match evaluate(known)? {
        Value::Field(f) => f,
        Value::Constant(_) => {
            return Err(ExprError::RankMismatch {
                op,
                left: 0,
                right: t.rank,
            });
        }
    };
    let ncc = coefficient_jets(&mut f, ctx, points)?;
    let n = ctx.dim();
    let (kr, ur) = (f.rank(), t.rank);
    if kr == 0 || ur == 0 {
        return Err(ExprError::RankMismatch { op, left: kr, right: ur });
    }

    let term = |k: usize, u: usize, sign: f64| -> Result<Comp, ExprError> {
        let uc = &t.comps[u];
        let fc: Vec<ComplexJet> = ncc[k].iter().map(|j| j.map(|v| v * sign)).collect();
        uc.map_jets(uc.kind, |j| Ok(j.mul_function(&fc)))
    };

    if cross {
        if n != 3 || kr != 1 || ur != 1 {
            return Err(ExprError::RankMismatch { op, left: kr, right: ur });
        }
        // (a × b)_i = a_j b_k - a_k b_j with (i, j, k) cyclic.
        let s = if known_left { 1.0 } else { -1.0 };
        let comps = (0..3)
            .map(|i| {
                let (j, k) = ((i + 1) % 3, (i + 2) % 3);
                term(j, k, s)?.add(&term(k, j, -s)?)
            })
            .collect::<Result<_, _>>()?;
        return Ok(Tensor {
            rank: 1,
            form: Form::Cartesian,
            comps,
        });
    }

    // Contract the last index of the left operand with the first of the right.
    let rank = kr + ur - 2;
    let n_out = n.pow(rank as u32);
    let (left_rank, right_rank) = if known_left { (kr, ur) } else { (ur, kr) };
    let inner_left = n.pow(left_rank as u32 - 1);
    let inner_right = n.pow(right_rank as u32 - 1);
    let mut comps = Vec::with_capacity(n_out);
    for out in 0..n_out {
        let (i, j) = (out / inner_right, out % inner_right);
        debug_assert!(i < inner_left);
        let mut acc = Comp::zero(CompKind::Absent);
        for s in 0..n {
            let (l, r) = (i * n + s, s * inner_right + j);
            let c = if known_left { term(l, r, 1.0)? } else { term(r, l, 1.0)? };
            acc = acc.add(&c)?;
        }
        comps.push(acc);
    }
    Ok(Tensor {
        rank,
        form: Form::Cartesian,
        comps,
    })
}

/// Value jets of a known Cartesian coefficient field per component and point.
fn coefficient_jets(f: &mut Field, ctx: &LinearContext<'_>, points: &[f64]) -> Result<Vec<Vec<ComplexJet>>, ExprError> {
    let Space::Cartesian(space) = f.space().clone() else {
        return Err(ExprError::Unsupported {
            op: "mul",
            reason: format!("non-constant coefficient '{}' outside a Cartesian domain", f.name()),
        });
    };
    for axis in ctx.domain.fourier_axes() {
        if space.axis(axis).is_some() {
            return Err(ExprError::NonlinearTerm(format!(
                "coefficient '{}' varies along the Fourier direction {axis}",
                f.name()
            )));
        }
    }
    let basis = coupled_jacobi(f.space()).cloned();
    let ncomp = f.n_components();
    let coeff = f.coeff()?;
    let per = coeff.len() / ncomp;
    Ok((0..ncomp)
        .map(|c| {
            let line = &coeff[c * per..(c + 1) * per];
            points
                .iter()
                .map(|&y| match &basis {
                    Some(b) => {
                        let mut jet = [ZERO; JET_DEPTH];
                        for (cn, pn) in line.iter().zip(b.jets(per, y)) {
                            for (v, p) in jet.iter_mut().zip(complex_jet(&pn)) {
                                *v += cn * p;
                            }
                        }
                        jet
                    }
                    None => {
                        let mut jet = [ZERO; JET_DEPTH];
                        jet[0] = line[0];
                        jet
                    }
                })
                .collect()
        })
        .collect())
}

// ============================================================================
// Cartesian derivatives
// ============================================================================

fn partial(c: &Comp, axis: usize, ctx: &LinearContext<'_>) -> Result<Comp, ExprError> {
    if Some(axis) == ctx.coupled_axis() {
        return c.map_jets(c.kind, Jets::derivative);
    }
    match ctx.wavenumber(axis) {
        Some(k) => Ok(c.scaled(Complex64::new(0.0, k))),
        None => Ok(Comp::zero(c.kind)),
    }
}

fn cartesian_grad(t: &Tensor, ctx: &LinearContext<'_>) -> Result<Tensor, ExprError> {
    let mut comps = Vec::with_capacity(ctx.dim() * t.comps.len());
    for axis in 0..ctx.dim() {
        for c in &t.comps {
            comps.push(partial(c, axis, ctx)?);
        }
    }
    Ok(Tensor {
        rank: t.rank + 1,
        form: Form::Cartesian,
        comps,
    })
}

fn cartesian_div(t: &Tensor, ctx: &LinearContext<'_>) -> Result<Tensor, ExprError> {
    if t.rank == 0 {
        return Err(ExprError::RankMismatch {
            op: "div",
            left: 0,
            right: 1,
        });
    }
    let n = ctx.dim();
    let inner = t.comps.len() / n;
    let mut comps = Vec::with_capacity(inner);
    for c in 0..inner {
        let mut acc = Comp::zero(CompKind::Absent);
        for axis in 0..n {
            acc = acc.add(&partial(&t.comps[axis * inner + c], axis, ctx)?)?;
        }
        comps.push(acc);
    }
    Ok(Tensor {
        rank: t.rank - 1,
        form: Form::Cartesian,
        comps,
    })
}

fn cartesian_curl(t: &Tensor, ctx: &LinearContext<'_>) -> Result<Tensor, ExprError> {
    if ctx.dim() != 3 || t.rank != 1 {
        return Err(ExprError::Unsupported {
            op: "curl",
            reason: "Cartesian curl needs a vector in three dimensions".into(),
        });
    }
    let comps = (0..3)
        .map(|i| {
            let (j, k) = ((i + 1) % 3, (i + 2) % 3);
            let a = partial(&t.comps[k], j, ctx)?;
            let b = partial(&t.comps[j], k, ctx)?;
            a.add(&b.scaled(Complex64::new(-1.0, 0.0)))
        })
        .collect::<Result<_, _>>()?;
    Ok(Tensor {
        rank: 1,
        form: Form::Cartesian,
        comps,
    })
}

// ============================================================================
// Ball operators on regularity components
// ============================================================================

struct Powers {
    inv_r: Vec<ComplexJet>,
    inv_r2: Vec<ComplexJet>,
}

impl Powers {
    fn new(points: &[f64]) -> Self {
        Self {
            inv_r: power_jets(points, -1),
            inv_r2: power_jets(points, -2),
        }
    }
}

fn radial_jets_op(op: RadialOp, k: usize, g: &Jets, p: &Powers) -> Result<Jets, ExprError> {
    let kf = k as f64;
    let c = |v: f64| Complex64::new(v, 0.0);
    Ok(match op {
        RadialOp::DMinus => g.derivative()?.add(&g.mul_function(&p.inv_r).scaled(c(kf + 1.0))),
        RadialOp::DPlus => g.derivative()?.add(&g.mul_function(&p.inv_r).scaled(c(-kf))),
        RadialOp::Laplacian => {
            let d1 = g.derivative()?;
            let d2 = d1.derivative()?;
            d2.add(&d1.mul_function(&p.inv_r).scaled(c(2.0)))
                .add(&g.mul_function(&p.inv_r2).scaled(c(-kf * (kf + 1.0))))
        }
    })
}

/// `scale * op(comp)` with the output regularity of `op`.
fn radial_apply(op: RadialOp, comp: &Comp, scale: f64, p: &Powers) -> Result<Comp, ExprError> {
    let k = match comp.kind {
        CompKind::Absent => return Ok(Comp::zero(CompKind::Absent)),
        CompKind::Volume(k) => k,
        kind => {
            return Err(ExprError::Unsupported {
                op: "radial derivative",
                reason: format!("operand component is {kind:?}"),
            });
        }
    };
    let Some(k_out) = op.output_regularity(k) else {
        return Ok(Comp::zero(CompKind::Absent));
    };
    if scale == 0.0 {
        return Ok(Comp::zero(CompKind::Volume(k_out)));
    }
    comp.map_jets(CompKind::Volume(k_out), |g| {
        Ok(radial_jets_op(op, k, g, p)?.scaled(Complex64::new(scale, 0.0)))
    })
}

/// Drop components that do not exist at degree ℓ.
fn enforce_regularity(mut t: Tensor, ell: usize) -> Tensor {
    for (c, comp) in t.comps.iter_mut().enumerate() {
        if BallBasis::regularity(ell, c as i32 - 1).is_none() {
            *comp = Comp::zero(CompKind::Absent);
        }
    }
    t
}

fn require_regularity(t: &Tensor, op: &'static str, rank: usize) -> Result<(), ExprError> {
    if t.rank != rank || (rank == 1 && t.form != Form::Regularity) {
        return Err(ExprError::Unsupported {
            op,
            reason: format!("rank {} {:?} operand in the ball", t.rank, t.form),
        });
    }
    Ok(())
}

fn ball_grad(t: &Tensor, ell: usize, points: &[f64]) -> Result<Tensor, ExprError> {
    require_regularity(t, "grad", 0)?;
    let p = Powers::new(points);
    let (xm, xp) = xi(ell);
    let f = &t.comps[0];
    let comps = vec![
        radial_apply(RadialOp::DMinus, f, xm, &p)?,
        Comp::zero(CompKind::Absent),
        radial_apply(RadialOp::DPlus, f, -xp, &p)?,
    ];
    Ok(enforce_regularity(
        Tensor {
            rank: 1,
            form: Form::Regularity,
            comps,
        },
        ell,
    ))
}

fn ball_div(t: &Tensor, ell: usize, points: &[f64]) -> Result<Tensor, ExprError> {
    require_regularity(t, "div", 1)?;
    let p = Powers::new(points);
    let (xm, xp) = xi(ell);
    let minus = radial_apply(RadialOp::DPlus, &t.comps[0], xm, &p)?;
    let plus = radial_apply(RadialOp::DMinus, &t.comps[2], -xp, &p)?;
    Ok(Tensor::scalar(Form::Regularity, minus.add(&plus)?))
}

fn ball_lap(t: &Tensor, points: &[f64]) -> Result<Tensor, ExprError> {
    if t.rank > 1 || (t.rank == 1 && t.form != Form::Regularity) {
        return Err(ExprError::Unsupported {
            op: "lap",
            reason: format!("rank {} {:?} operand in the ball", t.rank, t.form),
        });
    }
    let p = Powers::new(points);
    let comps = t
        .comps
        .iter()
        .map(|c| radial_apply(RadialOp::Laplacian, c, 1.0, &p))
        .collect::<Result<_, _>>()?;
    Ok(Tensor { comps, ..t.clone() })
}

fn ball_curl(t: &Tensor, ell: usize, points: &[f64]) -> Result<Tensor, ExprError> {
    require_regularity(t, "curl", 1)?;
    let p = Powers::new(points);
    let (xm, xp) = xi(ell);
    let [um, u0, up] = [&t.comps[0], &t.comps[1], &t.comps[2]];
    let comps = vec![
        radial_apply(RadialOp::DMinus, u0, -xp, &p)?,
        radial_apply(RadialOp::DPlus, um, xp, &p)?.add(&radial_apply(RadialOp::DMinus, up, xm, &p)?)?,
        radial_apply(RadialOp::DPlus, u0, -xm, &p)?,
    ];
    Ok(enforce_regularity(
        Tensor {
            rank: 1,
            form: Form::Regularity,
            comps,
        },
        ell,
    ))
}

/// Regularity components to (R, s̃, t̃), pointwise.
fn to_spherical(t: &Tensor, ell: usize) -> Tensor {
    if t.form != Form::Regularity || t.rank != 1 {
        return t.clone();
    }
    let (xm, xp) = xi(ell);
    let [um, u0, up] = [&t.comps[0], &t.comps[1], &t.comps[2]];
    let kind = |terms: &[(f64, &Comp)], tangential: bool| {
        let present = terms.iter().any(|(c, x)| *c != 0.0 && x.kind != CompKind::Absent);
        if !present || (tangential && ell == 0) {
            CompKind::Absent
        } else {
            CompKind::Irregular
        }
    };
    let r_terms = [(xm, um), (-xp, up)];
    let s_terms = [(xp, um), (xm, up)];
    let t_terms = [(1.0, u0)];
    let comps = vec![
        Comp::combine(kind(&r_terms, false), &r_terms),
        Comp::combine(kind(&s_terms, true), &s_terms),
        Comp::combine(kind(&t_terms, true), &t_terms),
    ];
    Tensor {
        rank: 1,
        form: Form::Spherical,
        comps,
    }
}

/// Every component as a constant row taken from the first sample point.
fn to_surface(t: &Tensor, points: usize) -> Tensor {
    let comps = t
        .comps
        .iter()
        .map(|c| match (c.kind, &c.jets) {
            (CompKind::Absent, _) => Comp::zero(CompKind::Absent),
            (_, None) => Comp::zero(CompKind::Surface),
            (_, Some(j)) => Comp::new(CompKind::Surface, Jets::surface(points, j.row(0, 0))),
        })
        .collect();
    Tensor { comps, ..t.clone() }
}

/// Radial component of a rank-2 term built from velocity gradients.
fn radial_of_rank2(e: &Expr, part: Part, ctx: &LinearContext<'_>, points: &[f64]) -> Result<Tensor, ExprError> {
    let ell = ctx.ell("radial component")?;
    match e {
        Expr::Add(a, b) => radial_of_rank2(a, part, ctx, points)?.add(&radial_of_rank2(b, part, ctx, points)?),
        Expr::Neg(a) => Ok(radial_of_rank2(a, part, ctx, points)?.scaled(Complex64::new(-1.0, 0.0))),
        Expr::Mul(a, b) => match (a.as_ref(), b.as_ref()) {
            (Expr::Constant(c), x) | (x, Expr::Constant(c)) => {
                Ok(radial_of_rank2(x, part, ctx, points)?.scaled(Complex64::new(*c, 0.0)))
            }
            _ => Err(rank2_unsupported(e)),
        },
        Expr::TimeDerivative(a) => radial_of_rank2(a, part.swapped(), ctx, points),
        Expr::Interp { operand, coord, position } => match ctx.domain {
            Domain::Ball(b) if coord == b.coords().r() => {
                let t = radial_of_rank2(operand, part, ctx, &[*position])?;
                Ok(to_surface(&t, points.len()))
            }
            _ => Err(rank2_unsupported(e)),
        },
        Expr::Grad(u) => {
            let v = spherical_operand(u, part, ctx, points, ell)?;
            v.comps
                .iter()
                .map(|c| c.map_jets(c.kind, Jets::derivative))
                .collect::<Result<Vec<_>, _>>()
                .map(|comps| Tensor { comps, ..v.clone() })
        }
        Expr::Transpose(inner) => match inner.as_ref() {
            Expr::Grad(u) => {
                let v = spherical_operand(u, part, ctx, points, ell)?;
                let inv_r = power_jets(points, -1);
                let norm = ((ell * (ell + 1)) as f64).sqrt();
                let over_r = |c: &Comp, kind: CompKind| c.map_jets(kind, |j| Ok(j.mul_function(&inv_r)));
                let [rc, sc, tc] = [&v.comps[0], &v.comps[1], &v.comps[2]];
                let radial = rc.map_jets(rc.kind, Jets::derivative)?;
                let s_terms = [(norm, rc), (-1.0, sc)];
                let s_kind = if ell == 0 { CompKind::Absent } else { sc.kind.merge(rc.kind)? };
                let s = over_r(&Comp::combine(s_kind, &s_terms), s_kind)?;
                let t = over_r(tc, tc.kind)?.scaled(Complex64::new(-1.0, 0.0));
                Ok(Tensor {
                    comps: vec![radial, s, t],
                    ..v
                })
            }
            _ => Err(rank2_unsupported(e)),
        },
        _ => Err(rank2_unsupported(e)),
    }
}

fn spherical_operand(u: &Expr, part: Part, ctx: &LinearContext<'_>, points: &[f64], ell: usize) -> Result<Tensor, ExprError> {
    let t = linearize(u, part, ctx, points)?;
    if t.rank != 1 {
        return Err(ExprError::RankMismatch {
            op: "radial component",
            left: t.rank + 1,
            right: 2,
        });
    }
    Ok(to_spherical(&t, ell))
}

fn rank2_unsupported(e: &Expr) -> ExprError {
    ExprError::Unsupported {
        op: "radial component",
        reason: format!("cannot take the radial component of '{e}'"),
    }
}

// ============================================================================
// Lift
// ============================================================================

/// Mode index counted from the end when negative.
pub(crate) fn resolve_index(count: usize, index: i64) -> Result<usize, ExprError> {
    let resolved = if index < 0 { count as i64 + index } else { index };
    usize::try_from(resolved)
        .ok()
        .filter(|&m| m < count)
        .ok_or_else(|| ExprError::Unsupported {
            op: "lift",
            reason: format!("mode {index} out of range for {count} modes"),
        })
}

fn require_surface(c: &Comp) -> Result<(), ExprError> {
    match c.kind {
        CompKind::Surface | CompKind::Absent => Ok(()),
        kind => Err(ExprError::Unsupported {
            op: "lift",
            reason: format!("operand component is {kind:?}, expected a boundary value"),
        }),
    }
}

/// Multiply a surface component by one basis function.
fn lift_comp(c: &Comp, k: usize, psi: &[ComplexJet]) -> Result<Comp, ExprError> {
    if c.kind == CompKind::Absent {
        return Ok(Comp::zero(CompKind::Absent));
    }
    c.map_jets(CompKind::Volume(k), |j| Ok(j.mul_function(psi)))
}

fn lift(
    operand: &Expr,
    basis: &LiftBasis,
    index: i64,
    part: Part,
    ctx: &LinearContext<'_>,
    points: &[f64],
) -> Result<Tensor, ExprError> {
    let t = linearize(operand, part, ctx, points)?;
    for c in &t.comps {
        require_surface(c)?;
    }
    match basis {
        LiftBasis::Interval(b) => {
            if Some(b.coord().axis()) != ctx.coupled_axis() {
                return Err(ExprError::Unsupported {
                    op: "lift",
                    reason: format!("'{}' is not the coupled direction", b.coord()),
                });
            }
            let mode = resolve_index(b.size(), index)?;
            let psi: Vec<ComplexJet> = points.iter().map(|&y| complex_jet(&b.jets(mode + 1, y)[mode])).collect();
            let comps = t.comps.iter().map(|c| lift_comp(c, 0, &psi)).collect::<Result<_, _>>()?;
            Ok(Tensor { comps, ..t })
        }
        LiftBasis::Radial(lb) => {
            let ell = ctx.ell("lift")?;
            let psi = |k: usize| -> Result<Vec<ComplexJet>, ExprError> {
                let mode = resolve_index(lb.radial_count(ell), index)?;
                points
                    .iter()
                    .map(|&r| Ok(complex_jet(&lb.jets(k, mode + 1, r)?[mode])))
                    .collect()
            };
            match t.rank {
                0 => Ok(Tensor::scalar(Form::Regularity, lift_comp(&t.comps[0], ell, &psi(ell)?)?)),
                1 => {
                    let (xm, xp) = xi(ell);
                    let [rc, sc, tc] = [&t.comps[0], &t.comps[1], &t.comps[2]];
                    let terms: [Vec<(f64, &Comp)>; 3] =
                        [vec![(xm, rc), (xp, sc)], vec![(1.0, tc)], vec![(-xp, rc), (xm, sc)]];
                    let comps = terms
                        .iter()
                        .enumerate()
                        .map(|(c, terms)| {
                            let present = terms.iter().any(|(w, x)| *w != 0.0 && x.kind != CompKind::Absent);
                            match BallBasis::regularity(ell, c as i32 - 1) {
                                Some(k) if present => lift_comp(&Comp::combine(CompKind::Surface, terms), k, &psi(k)?),
                                _ => Ok(Comp::zero(CompKind::Absent)),
                            }
                        })
                        .collect::<Result<_, ExprError>>()?;
                    Ok(Tensor {
                        rank: 1,
                        form: Form::Regularity,
                        comps,
                    })
                }
                rank => Err(ExprError::Unsupported {
                    op: "lift",
                    reason: format!("rank {rank} operands in the ball"),
                }),
            }
        }
    }
}
