//! Numerical evaluation of expressions.
//!
//! Products and contractions are formed pointwise on the (dealiased) grid
//! of the union space of their operands. Differential operators, lifts and
//! interpolations act on coefficients.

use super::ball_ops;
use super::expr::{Expr, interp_space, lift_space};
use crate::basis::{AxisBasis, Basis, CoordKind, LiftBasis};
use crate::error::ExprError;
use crate::field::{CartesianSpace, Field, Space, map_axis};
use num_complex::Complex64;
use std::sync::Arc;

const ZERO: Complex64 = Complex64::new(0.0, 0.0);

/// Result of evaluating an expression.
#[derive(Clone, Debug)]
pub enum Value {
    Constant(f64),
    Field(Field),
}

impl Value {
    /// Materialize as a field on `space`, broadcasting if needed.
    pub fn into_field(self, space: &Space) -> Result<Field, ExprError> {
        match self {
            Self::Constant(c) => Ok(Field::constant(space.clone(), c)?),
            Self::Field(mut f) => {
                if f.space().same_grid(space) {
                    Ok(f)
                } else {
                    Ok(f.broadcast_to(space)?)
                }
            }
        }
    }
}

/// Evaluate an expression into a new field (or constant).
pub fn evaluate(expr: &Expr) -> Result<Value, ExprError> {
    let name = expr.to_string();
    let mut value = match expr {
        Expr::Field(f) => Value::Field(f.read().clone()),
        Expr::Constant(c) => Value::Constant(*c),
        Expr::RadialVector(ball) => {
            let mut f = Field::vector("r_vec", Space::Ball(Arc::clone(ball)))?;
            f.set_grid_fn(|comp, p| if comp == 2 { p[2] } else { 0.0 })?;
            Value::Field(f)
        }
        Expr::Add(a, b) => match (evaluate(a)?, evaluate(b)?) {
            (Value::Constant(x), Value::Constant(y)) => Value::Constant(x + y),
            (x, y) => {
                let (space, mut fx, mut fy) = on_union(x, y, "add")?;
                if fx.rank() != fy.rank() {
                    return Err(ExprError::RankMismatch {
                        op: "add",
                        left: fx.rank(),
                        right: fy.rank(),
                    });
                }
                let gx = fx.broadcast_grid(&space)?;
                let gy = fy.broadcast_grid(&space)?;
                let sum = gx.iter().zip(&gy).map(|(p, q)| p + q).collect();
                Value::Field(from_grid(&space, fx.rank(), sum)?)
            }
        },
        Expr::Neg(a) => scale(evaluate(a)?, -1.0)?,
        Expr::Mul(a, b) => match (evaluate(a)?, evaluate(b)?) {
            (Value::Constant(x), Value::Constant(y)) => Value::Constant(x * y),
            (Value::Constant(c), v) | (v, Value::Constant(c)) => scale(v, c)?,
            (Value::Field(fx), Value::Field(fy)) => Value::Field(grid_product(fx, fy)?),
        },
        Expr::Dot(a, b) => {
            let (space, fx, fy) = on_union(evaluate(a)?, evaluate(b)?, "dot")?;
            Value::Field(grid_dot(&space, fx, fy)?)
        }
        Expr::Cross(a, b) => {
            let (space, fx, fy) = on_union(evaluate(a)?, evaluate(b)?, "cross")?;
            Value::Field(grid_cross(&space, fx, fy)?)
        }
        Expr::Grad(a) => differential(evaluate(a)?, "grad", |f| match f.space().clone() {
            Space::Cartesian(c) => cartesian_grad(f, &c),
            Space::Ball(b) => {
                require_rank(f, 0, "grad")?;
                let out = ball_ops::grad(&b, f.coeff()?)?;
                with_coeff(Space::Ball(b), 1, out)
            }
            Space::Sphere(_) => Err(sphere_unsupported("grad")),
        })?,
        Expr::Div(a) => differential(evaluate(a)?, "div", |f| match f.space().clone() {
            Space::Cartesian(c) => cartesian_div(f, &c),
            Space::Ball(b) => {
                require_rank(f, 1, "div")?;
                let out = ball_ops::div(&b, f.coeff()?)?;
                with_coeff(Space::Ball(b), 0, out)
            }
            Space::Sphere(_) => Err(sphere_unsupported("div")),
        })?,
        Expr::Curl(a) => differential(evaluate(a)?, "curl", |f| match f.space().clone() {
            Space::Cartesian(c) => cartesian_curl(f, &c),
            Space::Ball(b) => {
                require_rank(f, 1, "curl")?;
                let out = ball_ops::curl(&b, f.coeff()?)?;
                with_coeff(Space::Ball(b), 1, out)
            }
            Space::Sphere(_) => Err(sphere_unsupported("curl")),
        })?,
        Expr::Lap(a) => differential(evaluate(a)?, "lap", |f| match f.space().clone() {
            Space::Cartesian(c) => {
                let ncomp = f.n_components();
                let mut total: Option<Vec<Complex64>> = None;
                for axis in 0..c.dim() {
                    let once = partial_coeff(f.coeff()?, &c, ncomp, axis)?;
                    let twice = partial_coeff(&once, &c, ncomp, axis)?;
                    total = Some(match total {
                        None => twice,
                        Some(t) => t.iter().zip(&twice).map(|(p, q)| p + q).collect(),
                    });
                }
                with_coeff(Space::Cartesian(c), f.rank(), total.unwrap_or_default())
            }
            Space::Ball(b) => {
                let rank = f.rank();
                let out = ball_ops::lap(&b, f.coeff()?, rank)?;
                with_coeff(Space::Ball(b), rank, out)
            }
            Space::Sphere(_) => Err(sphere_unsupported("lap")),
        })?,
        Expr::Diff(a, coord) => differential(evaluate(a)?, "partial derivative", |f| match f.space().clone() {
            Space::Cartesian(c) if coord.kind() == CoordKind::Cartesian => {
                let ncomp = f.n_components();
                let out = partial_coeff(f.coeff()?, &c, ncomp, coord.axis())?;
                with_coeff(Space::Cartesian(c), f.rank(), out)
            }
            _ => Err(ExprError::Unsupported {
                op: "partial derivative",
                reason: format!("'{coord}' is not a Cartesian coordinate of the operand"),
            }),
        })?,
        Expr::TimeDerivative(_) => return Err(ExprError::TimeDerivativeEvaluation),
        Expr::Lift { operand, basis, index } => {
            let mut f = field_operand(evaluate(operand)?, "lift")?;
            let space = lift_space(Some(f.space().clone()), basis)?;
            let rank = f.rank();
            let out = match basis {
                LiftBasis::Interval(b) => {
                    let c = f.space().as_cartesian().cloned().ok_or_else(|| sphere_unsupported("lift"))?;
                    let axis = b.coord().axis();
                    let mode = super::linearize::resolve_index(b.coeff_size(), *index)?;
                    let mut shape = vec![f.n_components()];
                    shape.extend(c.coeff_shape());
                    let n = b.coeff_size();
                    map_axis(f.coeff()?, &shape, axis + 1, n, |line| {
                        let mut out = vec![ZERO; n];
                        out[mode] = line[0];
                        Ok(out)
                    })?
                }
                LiftBasis::Radial(lb) => ball_ops::lift(lb, f.coeff()?, rank, *index)?,
            };
            Value::Field(with_coeff(space, rank, out)?)
        }
        Expr::Interp {
            operand,
            coord,
            position,
        } => match evaluate(operand)? {
            Value::Constant(c) => Value::Constant(c),
            Value::Field(mut f) => {
                let space = interp_space(f.space(), coord)?;
                let rank = f.rank();
                let out = match f.space().clone() {
                    Space::Cartesian(c) => {
                        let axis = coord.axis();
                        let mut shape = vec![f.n_components()];
                        shape.extend(c.coeff_shape());
                        match c.axis(axis) {
                            None => f.coeff()?.to_vec(),
                            Some(AxisBasis::Jacobi(b)) => {
                                map_axis(f.coeff()?, &shape, axis + 1, 1, |line| Ok(vec![b.interpolate(line, *position)?]))?
                            }
                            Some(AxisBasis::Fourier(b)) => {
                                map_axis(f.coeff()?, &shape, axis + 1, 1, |line| Ok(vec![b.interpolate(line, *position)?]))?
                            }
                        }
                    }
                    Space::Ball(b) => ball_ops::interp_radius(&b, f.coeff()?, rank, *position)?,
                    Space::Sphere(_) => return Err(sphere_unsupported("interpolation")),
                };
                Value::Field(with_coeff(space, rank, out)?)
            }
        },
        Expr::RadialComponent(a) => {
            let mut f = field_operand(evaluate(a)?, "radial component")?;
            match f.space().clone() {
                Space::Sphere(s) if f.rank() == 1 => {
                    let per = s.n_orders() * (s.l_max() + 1);
                    let out = f.coeff()?[..per].to_vec();
                    Value::Field(with_coeff(Space::Sphere(s), 0, out)?)
                }
                Space::Ball(b) if f.rank() == 1 => {
                    let per = f.grid()?.len() / 3;
                    let out = f.grid()?[2 * per..].to_vec();
                    Value::Field(from_grid(&Space::Ball(b), 0, out)?)
                }
                Space::Cartesian(c) => {
                    return Err(ExprError::Unsupported {
                        op: "radial component",
                        reason: format!("{}-dimensional Cartesian fields have no radial direction", c.dim()),
                    });
                }
                _ => return Err(rank2_unsupported("radial component")),
            }
        }
        Expr::AngularComponent(a) => {
            let mut f = field_operand(evaluate(a)?, "angular component")?;
            match f.space().clone() {
                Space::Sphere(s) if f.rank() == 1 => {
                    let per = s.n_orders() * (s.l_max() + 1);
                    f.coeff_mut()?[..per].fill(ZERO);
                    Value::Field(f)
                }
                Space::Ball(_) if f.rank() == 1 => {
                    let grid = f.grid_mut()?;
                    let per = grid.len() / 3;
                    grid[2 * per..].fill(ZERO);
                    Value::Field(f)
                }
                Space::Cartesian(_) => {
                    return Err(ExprError::Unsupported {
                        op: "angular component",
                        reason: "Cartesian fields have no angular direction".into(),
                    });
                }
                _ => return Err(rank2_unsupported("angular component")),
            }
        }
        Expr::Transpose(a) => {
            let mut f = field_operand(evaluate(a)?, "transpose")?;
            if f.rank() != 2 {
                return Err(ExprError::RankMismatch {
                    op: "transpose",
                    left: f.rank(),
                    right: 2,
                });
            }
            let dim = f.space().dim();
            let space = f.space().clone();
            let grid = f.grid()?;
            let per = grid.len() / (dim * dim);
            let mut out = vec![ZERO; grid.len()];
            for i in 0..dim {
                for j in 0..dim {
                    let (src, dst) = ((i * dim + j) * per, (j * dim + i) * per);
                    out[dst..dst + per].copy_from_slice(&grid[src..src + per]);
                }
            }
            Value::Field(from_grid(&space, 2, out)?)
        }
        Expr::Grid(a) => match evaluate(a)? {
            Value::Field(mut f) => {
                f.require_grid_space()?;
                Value::Field(f)
            }
            c => c,
        },
        Expr::Sqrt(a) => match evaluate(a)? {
            Value::Constant(c) => Value::Constant(c.sqrt()),
            Value::Field(mut f) => {
                if f.rank() != 0 {
                    return Err(ExprError::RankMismatch {
                        op: "sqrt",
                        left: f.rank(),
                        right: 0,
                    });
                }
                let space = f.space().clone();
                let out = f.grid()?.iter().map(|v| Complex64::new(v.re.sqrt(), 0.0)).collect();
                Value::Field(from_grid(&space, 0, out)?)
            }
        },
    };
    if let Value::Field(f) = &mut value {
        f.set_name(name);
    }
    Ok(value)
}

fn sphere_unsupported(op: &'static str) -> ExprError {
    ExprError::Unsupported {
        op,
        reason: "not defined on a bare sphere".into(),
    }
}

fn rank2_unsupported(op: &'static str) -> ExprError {
    ExprError::Unsupported {
        op,
        reason: "curvilinear storage is limited to scalars and vectors".into(),
    }
}

fn require_rank(f: &Field, rank: usize, op: &'static str) -> Result<(), ExprError> {
    if f.rank() != rank {
        return Err(ExprError::RankMismatch {
            op,
            left: f.rank(),
            right: rank,
        });
    }
    Ok(())
}

fn field_operand(v: Value, op: &'static str) -> Result<Field, ExprError> {
    match v {
        Value::Field(f) => Ok(f),
        Value::Constant(_) => Err(ExprError::Unsupported {
            op,
            reason: "operand is a constant".into(),
        }),
    }
}

/// Apply a differential operator; derivatives of constants vanish.
fn differential(
    v: Value,
    op: &'static str,
    f: impl FnOnce(&mut Field) -> Result<Field, ExprError>,
) -> Result<Value, ExprError> {
    match v {
        Value::Constant(_) if op == "lap" || op == "partial derivative" => Ok(Value::Constant(0.0)),
        Value::Constant(_) => Err(ExprError::Unsupported {
            op,
            reason: "operand is a constant without a space".into(),
        }),
        Value::Field(mut field) => Ok(Value::Field(f(&mut field)?)),
    }
}

fn with_coeff(space: Space, rank: usize, coeff: Vec<Complex64>) -> Result<Field, ExprError> {
    let mut f = Field::new("", space, rank)?;
    f.set_coeff(coeff)?;
    Ok(f)
}

fn from_grid(space: &Space, rank: usize, grid: Vec<Complex64>) -> Result<Field, ExprError> {
    let mut f = Field::new("", space.clone(), rank)?;
    f.set_grid(grid)?;
    Ok(f)
}

fn scale(v: Value, s: f64) -> Result<Value, ExprError> {
    Ok(match v {
        Value::Constant(c) => Value::Constant(c * s),
        Value::Field(mut f) => {
            if f.coeff_if_current().is_some() {
                f.coeff_mut()?.iter_mut().for_each(|x| *x *= s);
            } else {
                f.grid_mut()?.iter_mut().for_each(|x| *x *= s);
            }
            Value::Field(f)
        }
    })
}

/// Bring two operands onto the grid of their union space.
fn on_union(x: Value, y: Value, op: &'static str) -> Result<(Space, Field, Field), ExprError> {
    let (fx, fy) = match (x, y) {
        (Value::Field(a), Value::Field(b)) => (a, b),
        (Value::Field(a), Value::Constant(c)) => {
            let b = Field::constant(a.space().clone(), c)?;
            (a, b)
        }
        (Value::Constant(c), Value::Field(b)) => {
            let a = Field::constant(b.space().clone(), c)?;
            (a, b)
        }
        (Value::Constant(_), Value::Constant(_)) => {
            return Err(ExprError::Unsupported {
                op,
                reason: "both operands are constants".into(),
            });
        }
    };
    let space = fx.space().union(fy.space())?;
    Ok((space, fx, fy))
}

/// Pointwise product where one side is a scalar.
fn grid_product(x: Field, y: Field) -> Result<Field, ExprError> {
    let (mut s, mut t) = match (x.rank(), y.rank()) {
        (0, _) => (x, y),
        (_, 0) => (y, x),
        (a, b) => {
            return Err(ExprError::RankMismatch {
                op: "mul",
                left: a,
                right: b,
            });
        }
    };
    let space = s.space().union(t.space())?;
    let gs = s.broadcast_grid(&space)?;
    let gt = t.broadcast_grid(&space)?;
    let per = gs.len();
    let out = gt.iter().enumerate().map(|(i, v)| v * gs[i % per]).collect();
    from_grid(&space, t.rank(), out)
}

/// Contract the last index of `x` with the first index of `y`.
fn grid_dot(space: &Space, mut x: Field, mut y: Field) -> Result<Field, ExprError> {
    let (rx, ry) = (x.rank(), y.rank());
    if rx == 0 || ry == 0 || (rx + ry - 2 > 1 && !matches!(space, Space::Cartesian(_))) {
        return Err(ExprError::RankMismatch {
            op: "dot",
            left: rx,
            right: ry,
        });
    }
    let dim = space.dim();
    let gx = x.broadcast_grid(space)?;
    let gy = y.broadcast_grid(space)?;
    let per = gx.len() / dim.pow(rx as u32);
    let outer = dim.pow(rx as u32 - 1);
    let inner = dim.pow(ry as u32 - 1);
    let mut out = vec![ZERO; outer * inner * per];
    for a in 0..outer {
        for b in 0..inner {
            let dst = (a * inner + b) * per;
            for k in 0..dim {
                let (sx, sy) = ((a * dim + k) * per, (k * inner + b) * per);
                for p in 0..per {
                    out[dst + p] += gx[sx + p] * gy[sy + p];
                }
            }
        }
    }
    from_grid(space, rx + ry - 2, out)
}

/// Cross product of two vectors in three dimensions.
///
/// Ball grid components are (φ, θ, r); (r, θ, φ) is right-handed.
fn grid_cross(space: &Space, mut x: Field, mut y: Field) -> Result<Field, ExprError> {
    if x.rank() != 1 || y.rank() != 1 || space.dim() != 3 {
        return Err(ExprError::RankMismatch {
            op: "cross",
            left: x.rank(),
            right: y.rank(),
        });
    }
    let order: [usize; 3] = match space {
        Space::Ball(_) => [2, 1, 0],
        _ => [0, 1, 2],
    };
    let gx = x.broadcast_grid(space)?;
    let gy = y.broadcast_grid(space)?;
    let per = gx.len() / 3;
    let comp = |g: &[Complex64], i: usize, p: usize| g[order[i] * per + p];
    let mut out = vec![ZERO; gx.len()];
    for p in 0..per {
        for i in 0..3 {
            let (j, k) = ((i + 1) % 3, (i + 2) % 3);
            out[order[i] * per + p] = comp(&gx, j, p) * comp(&gy, k, p) - comp(&gx, k, p) * comp(&gy, j, p);
        }
    }
    from_grid(space, 1, out)
}

/// ∂/∂x_axis of every component, in coefficient space.
fn partial_coeff(coeff: &[Complex64], c: &CartesianSpace, ncomp: usize, axis: usize) -> Result<Vec<Complex64>, ExprError> {
    let Some(basis) = c.axis(axis) else {
        return Ok(vec![ZERO; coeff.len()]);
    };
    let basis = basis.as_basis();
    let mut shape = vec![ncomp];
    shape.extend(c.coeff_shape());
    Ok(map_axis(coeff, &shape, axis + 1, basis.coeff_size(), |line| basis.differentiate(line, 1))?)
}

fn cartesian_grad(f: &mut Field, c: &CartesianSpace) -> Result<Field, ExprError> {
    let ncomp = f.n_components();
    let mut out = Vec::with_capacity(ncomp * c.dim() * f.coeff()?.len() / ncomp.max(1));
    for axis in 0..c.dim() {
        out.extend(partial_coeff(f.coeff()?, c, ncomp, axis)?);
    }
    with_coeff(Space::Cartesian(c.clone()), f.rank() + 1, out)
}

fn cartesian_div(f: &mut Field, c: &CartesianSpace) -> Result<Field, ExprError> {
    if f.rank() == 0 {
        return Err(ExprError::RankMismatch {
            op: "div",
            left: 0,
            right: 1,
        });
    }
    let dim = c.dim();
    let ncomp = f.n_components();
    let inner = ncomp / dim;
    let coeff = f.coeff()?;
    let block = coeff.len() / dim;
    let mut out = vec![ZERO; block];
    for axis in 0..dim {
        let d = partial_coeff(&coeff[axis * block..(axis + 1) * block], c, inner, axis)?;
        out.iter_mut().zip(&d).for_each(|(o, v)| *o += v);
    }
    with_coeff(Space::Cartesian(c.clone()), f.rank() - 1, out)
}

fn cartesian_curl(f: &mut Field, c: &CartesianSpace) -> Result<Field, ExprError> {
    if f.rank() != 1 || c.dim() != 3 {
        return Err(ExprError::Unsupported {
            op: "curl",
            reason: "Cartesian curl needs a vector in three dimensions".into(),
        });
    }
    let coeff = f.coeff()?;
    let per = coeff.len() / 3;
    let d = |comp: usize, axis: usize| partial_coeff(&coeff[comp * per..(comp + 1) * per], c, 1, axis);
    let mut out = Vec::with_capacity(coeff.len());
    for i in 0..3 {
        let (j, k) = ((i + 1) % 3, (i + 2) % 3);
        let (a, b) = (d(k, j)?, d(j, k)?);
        out.extend(a.iter().zip(&b).map(|(p, q)| p - q));
    }
    with_coeff(Space::Cartesian(c.clone()), 1, out)
}
