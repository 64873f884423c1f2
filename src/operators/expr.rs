//! Typed operator expressions.
//!
//! An [`Expr`] is a tree over shared field handles. Trees are built with
//! the free functions of this module ([`grad`], [`lift`], [`interp`], ...)
//! and the arithmetic operators, then either evaluated numerically or
//! linearized pencil by pencil during problem assembly.
//!
//! Tensor index conventions:
//! - `grad` prepends the derivative direction as the first index
//! - `div`, `rad` and `dot` contract the first index of their operand
//!   (the last index of the left operand for `dot`)
//! - in the ball, vector grid components are ordered (φ, θ, r)

use crate::basis::{AxisBasis, BallBasis, Basis, Coord, CoordKind, LiftBasis};
use crate::error::ExprError;
use crate::field::{FieldRef, Space};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::Arc;

/// Operator expression over fields.
#[derive(Clone)]
pub enum Expr {
    /// A field, either an unknown of a problem or fixed data.
    Field(FieldRef),
    /// Scalar constant.
    Constant(f64),
    /// Position vector r r̂ of a ball.
    RadialVector(Arc<BallBasis>),
    Add(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    /// Product where at least one side is a scalar.
    Mul(Box<Expr>, Box<Expr>),
    Dot(Box<Expr>, Box<Expr>),
    Cross(Box<Expr>, Box<Expr>),
    Grad(Box<Expr>),
    Div(Box<Expr>),
    Lap(Box<Expr>),
    Curl(Box<Expr>),
    /// Partial derivative along one Cartesian coordinate.
    Diff(Box<Expr>, Coord),
    TimeDerivative(Box<Expr>),
    /// Multiply a boundary field by mode `index` of a lift family.
    /// Negative indices count from the last mode (-1 is the last).
    Lift {
        operand: Box<Expr>,
        basis: LiftBasis,
        index: i64,
    },
    /// Restriction to `coord = position`.
    Interp {
        operand: Box<Expr>,
        coord: Coord,
        position: f64,
    },
    RadialComponent(Box<Expr>),
    AngularComponent(Box<Expr>),
    /// Swap the two indices of a rank-2 tensor.
    Transpose(Box<Expr>),
    /// Marks a term for explicit grid-space evaluation.
    Grid(Box<Expr>),
    /// Pointwise square root of a scalar.
    Sqrt(Box<Expr>),
}

impl Expr {
    /// Leaf referring to a field.
    pub fn field(f: &FieldRef) -> Self {
        Self::Field(Arc::clone(f))
    }

    /// Restrict to `coord = position`.
    pub fn at(self, coord: &Coord, position: f64) -> Self {
        interp(self, coord, position)
    }

    /// Child expressions in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Self::Field(_) | Self::Constant(_) | Self::RadialVector(_) => Vec::new(),
            Self::Add(a, b) | Self::Mul(a, b) | Self::Dot(a, b) | Self::Cross(a, b) => vec![a.as_ref(), b.as_ref()],
            Self::Neg(a)
            | Self::Grad(a)
            | Self::Div(a)
            | Self::Lap(a)
            | Self::Curl(a)
            | Self::Diff(a, _)
            | Self::TimeDerivative(a)
            | Self::RadialComponent(a)
            | Self::AngularComponent(a)
            | Self::Transpose(a)
            | Self::Grid(a)
            | Self::Sqrt(a) => vec![a.as_ref()],
            Self::Lift { operand, .. } | Self::Interp { operand, .. } => vec![operand.as_ref()],
        }
    }

    /// Whether any leaf is one of `fields`.
    pub fn depends_on(&self, fields: &[FieldRef]) -> bool {
        match self {
            Self::Field(f) => fields.iter().any(|v| Arc::ptr_eq(v, f)),
            _ => self.children().into_iter().any(|c| c.depends_on(fields)),
        }
    }

    pub fn has_time_derivative(&self) -> bool {
        matches!(self, Self::TimeDerivative(_)) || self.children().into_iter().any(Expr::has_time_derivative)
    }

    /// Whether the expression is the literal constant zero.
    pub fn is_zero(&self) -> bool {
        matches!(self, Self::Constant(c) if *c == 0.0)
    }

    /// Every field handle referenced by the expression, in first-seen order.
    pub fn fields(&self) -> Vec<FieldRef> {
        let mut out: Vec<FieldRef> = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields(&self, out: &mut Vec<FieldRef>) {
        if let Self::Field(f) = self {
            if !out.iter().any(|g| Arc::ptr_eq(g, f)) {
                out.push(Arc::clone(f));
            }
        }
        for c in self.children() {
            c.collect_fields(out);
        }
    }

    /// Tensor rank of the result.
    pub fn rank(&self) -> Result<usize, ExprError> {
        let unary_min = |op: &'static str, a: &Expr, min: usize| -> Result<usize, ExprError> {
            let r = a.rank()?;
            if r < min {
                return Err(ExprError::RankMismatch {
                    op,
                    left: r,
                    right: min,
                });
            }
            Ok(r)
        };
        Ok(match self {
            Self::Field(f) => f.read().rank(),
            Self::Constant(_) => 0,
            Self::RadialVector(_) => 1,
            Self::Add(a, b) => {
                let (ra, rb) = (a.rank()?, b.rank()?);
                if ra != rb {
                    return Err(ExprError::RankMismatch {
                        op: "add",
                        left: ra,
                        right: rb,
                    });
                }
                ra
            }
            Self::Mul(a, b) => {
                let (ra, rb) = (a.rank()?, b.rank()?);
                if ra != 0 && rb != 0 {
                    return Err(ExprError::RankMismatch {
                        op: "mul",
                        left: ra,
                        right: rb,
                    });
                }
                ra + rb
            }
            Self::Dot(a, b) => {
                let (ra, rb) = (a.rank()?, b.rank()?);
                if ra == 0 || rb == 0 {
                    return Err(ExprError::RankMismatch {
                        op: "dot",
                        left: ra,
                        right: rb,
                    });
                }
                ra + rb - 2
            }
            Self::Cross(a, b) => {
                let (ra, rb) = (a.rank()?, b.rank()?);
                if ra != 1 || rb != 1 {
                    return Err(ExprError::RankMismatch {
                        op: "cross",
                        left: ra,
                        right: rb,
                    });
                }
                1
            }
            Self::Neg(a)
            | Self::Lap(a)
            | Self::Diff(a, _)
            | Self::TimeDerivative(a)
            | Self::Grid(a)
            | Self::Lift { operand: a, .. }
            | Self::Interp { operand: a, .. } => a.rank()?,
            Self::Grad(a) => a.rank()? + 1,
            Self::Div(a) => unary_min("div", a, 1)? - 1,
            Self::Curl(a) => {
                let r = a.rank()?;
                if r != 1 {
                    return Err(ExprError::RankMismatch {
                        op: "curl",
                        left: r,
                        right: 1,
                    });
                }
                1
            }
            Self::RadialComponent(a) => unary_min("radial component", a, 1)? - 1,
            Self::AngularComponent(a) => unary_min("angular component", a, 1)?,
            Self::Transpose(a) => {
                let r = a.rank()?;
                if r != 2 {
                    return Err(ExprError::RankMismatch {
                        op: "transpose",
                        left: r,
                        right: 2,
                    });
                }
                2
            }
            Self::Sqrt(a) => {
                let r = a.rank()?;
                if r != 0 {
                    return Err(ExprError::RankMismatch {
                        op: "sqrt",
                        left: r,
                        right: 0,
                    });
                }
                0
            }
        })
    }

    /// Space of the result, or `None` for a pure constant.
    pub fn space(&self) -> Result<Option<Space>, ExprError> {
        let binary = |a: &Expr, b: &Expr| -> Result<Option<Space>, ExprError> {
            Ok(match (a.space()?, b.space()?) {
                (Some(x), Some(y)) => Some(x.union(&y)?),
                (x, None) => x,
                (None, y) => y,
            })
        };
        Ok(match self {
            Self::Field(f) => Some(f.read().space().clone()),
            Self::Constant(_) => None,
            Self::RadialVector(b) => Some(Space::Ball(Arc::clone(b))),
            Self::Add(a, b) | Self::Mul(a, b) | Self::Dot(a, b) | Self::Cross(a, b) => binary(a, b)?,
            Self::Neg(a)
            | Self::Grad(a)
            | Self::Div(a)
            | Self::Lap(a)
            | Self::Curl(a)
            | Self::Diff(a, _)
            | Self::TimeDerivative(a)
            | Self::RadialComponent(a)
            | Self::AngularComponent(a)
            | Self::Transpose(a)
            | Self::Grid(a)
            | Self::Sqrt(a) => a.space()?,
            Self::Lift { operand, basis, .. } => Some(lift_space(operand.space()?, basis)?),
            Self::Interp { operand, coord, .. } => match operand.space()? {
                None => None,
                Some(space) => Some(interp_space(&space, coord)?),
            },
        })
    }

    /// Highest order of differentiation along `coord` (the coupled
    /// direction of a pencil), counting every gradient-type operator.
    pub fn differential_order(&self, coord: Option<&Coord>) -> usize {
        let inner = || {
            self.children()
                .into_iter()
                .map(|c| c.differential_order(coord))
                .max()
                .unwrap_or(0)
        };
        match self {
            Self::Grad(_) | Self::Div(_) | Self::Curl(_) => inner() + 1,
            Self::Lap(_) => inner() + 2,
            Self::Diff(_, c) if Some(c) == coord => inner() + 1,
            Self::Interp { coord: c, .. } if Some(c) == coord => 0,
            _ => inner(),
        }
    }
}

/// Space of `lift(operand, basis, _)`.
pub(crate) fn lift_space(operand: Option<Space>, basis: &LiftBasis) -> Result<Space, ExprError> {
    match (operand, basis) {
        (Some(Space::Cartesian(c)), LiftBasis::Interval(b)) => {
            let axis = b.coord().axis();
            if c.axis(axis).is_some() {
                return Err(ExprError::Unsupported {
                    op: "lift",
                    reason: "operand must be constant along the lift axis".into(),
                });
            }
            Ok(Space::Cartesian(c.with_axis(axis, AxisBasis::Jacobi(Arc::clone(b)))))
        }
        (Some(Space::Sphere(_)), LiftBasis::Radial(r)) => Ok(Space::Ball(Arc::clone(r.ball()))),
        (operand, _) => Err(ExprError::Unsupported {
            op: "lift",
            reason: format!(
                "cannot lift {} with this basis",
                operand.map_or("a constant", |s| s.kind())
            ),
        }),
    }
}

/// Space of `operand(coord = _)`.
pub(crate) fn interp_space(space: &Space, coord: &Coord) -> Result<Space, ExprError> {
    match (space, coord.kind()) {
        (Space::Cartesian(c), CoordKind::Cartesian) => Ok(Space::Cartesian(c.restrict(coord.axis()))),
        (Space::Ball(b), CoordKind::Spherical) if coord == b.coords().r() => Ok(Space::Sphere(b.surface())),
        _ => Err(ExprError::Unsupported {
            op: "interpolation",
            reason: format!("cannot restrict a {} along '{}'", space.kind(), coord),
        }),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(x) => write!(f, "{}", x.read().name()),
            Self::Constant(c) => write!(f, "{c}"),
            Self::RadialVector(_) => write!(f, "r_vec"),
            Self::Add(a, b) => match b.as_ref() {
                Self::Neg(b) => write!(f, "({a} - {b})"),
                b => write!(f, "({a} + {b})"),
            },
            Self::Neg(a) => write!(f, "-{a}"),
            Self::Mul(a, b) => write!(f, "{a}*{b}"),
            Self::Dot(a, b) => write!(f, "dot({a}, {b})"),
            Self::Cross(a, b) => write!(f, "cross({a}, {b})"),
            Self::Grad(a) => write!(f, "grad({a})"),
            Self::Div(a) => write!(f, "div({a})"),
            Self::Lap(a) => write!(f, "lap({a})"),
            Self::Curl(a) => write!(f, "curl({a})"),
            Self::Diff(a, c) => write!(f, "d{c}({a})"),
            Self::TimeDerivative(a) => write!(f, "dt({a})"),
            Self::Lift { operand, index, .. } => write!(f, "lift({operand}, {index})"),
            Self::Interp {
                operand,
                coord,
                position,
            } => write!(f, "{operand}({coord}={position})"),
            Self::RadialComponent(a) => write!(f, "radial({a})"),
            Self::AngularComponent(a) => write!(f, "angular({a})"),
            Self::Transpose(a) => write!(f, "trans({a})"),
            Self::Grid(a) => write!(f, "grid({a})"),
            Self::Sqrt(a) => write!(f, "sqrt({a})"),
        }
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expr({self})")
    }
}

impl From<&FieldRef> for Expr {
    fn from(f: &FieldRef) -> Self {
        Self::field(f)
    }
}

impl From<FieldRef> for Expr {
    fn from(f: FieldRef) -> Self {
        Self::Field(f)
    }
}

impl From<f64> for Expr {
    fn from(c: f64) -> Self {
        Self::Constant(c)
    }
}

impl From<&Expr> for Expr {
    fn from(e: &Expr) -> Self {
        e.clone()
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn grad(a: impl Into<Expr>) -> Expr {
    Expr::Grad(Box::new(a.into()))
}

pub fn div(a: impl Into<Expr>) -> Expr {
    Expr::Div(Box::new(a.into()))
}

pub fn lap(a: impl Into<Expr>) -> Expr {
    Expr::Lap(Box::new(a.into()))
}

pub fn curl(a: impl Into<Expr>) -> Expr {
    Expr::Curl(Box::new(a.into()))
}

pub fn dot(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    Expr::Dot(Box::new(a.into()), Box::new(b.into()))
}

pub fn cross(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    Expr::Cross(Box::new(a.into()), Box::new(b.into()))
}

/// Partial derivative along a Cartesian coordinate.
pub fn diff(a: impl Into<Expr>, coord: &Coord) -> Expr {
    Expr::Diff(Box::new(a.into()), coord.clone())
}

/// Time derivative; only valid on the implicit side of an IVP.
pub fn ddt(a: impl Into<Expr>) -> Expr {
    Expr::TimeDerivative(Box::new(a.into()))
}

/// Lift a boundary field into the interior on mode `index` of `basis`.
pub fn lift(a: impl Into<Expr>, basis: impl Into<LiftBasis>, index: i64) -> Expr {
    Expr::Lift {
        operand: Box::new(a.into()),
        basis: basis.into(),
        index,
    }
}

/// Restrict to `coord = position`.
pub fn interp(a: impl Into<Expr>, coord: &Coord, position: f64) -> Expr {
    Expr::Interp {
        operand: Box::new(a.into()),
        coord: coord.clone(),
        position,
    }
}

pub fn radial(a: impl Into<Expr>) -> Expr {
    Expr::RadialComponent(Box::new(a.into()))
}

pub fn angular(a: impl Into<Expr>) -> Expr {
    Expr::AngularComponent(Box::new(a.into()))
}

pub fn trans(a: impl Into<Expr>) -> Expr {
    Expr::Transpose(Box::new(a.into()))
}

pub fn grid(a: impl Into<Expr>) -> Expr {
    Expr::Grid(Box::new(a.into()))
}

/// Pointwise square root, evaluated on the grid.
pub fn sqrt(a: impl Into<Expr>) -> Expr {
    Expr::Sqrt(Box::new(a.into()))
}

/// Position vector of a ball.
pub fn radial_vector(ball: &Arc<BallBasis>) -> Expr {
    Expr::RadialVector(Arc::clone(ball))
}

// ============================================================================
// Arithmetic
// ============================================================================

impl<R: Into<Expr>> Add<R> for Expr {
    type Output = Expr;

    fn add(self, rhs: R) -> Expr {
        Expr::Add(Box::new(self), Box::new(rhs.into()))
    }
}

impl<R: Into<Expr>> Sub<R> for Expr {
    type Output = Expr;

    fn sub(self, rhs: R) -> Expr {
        Expr::Add(Box::new(self), Box::new(Expr::Neg(Box::new(rhs.into()))))
    }
}

impl<R: Into<Expr>> Mul<R> for Expr {
    type Output = Expr;

    fn mul(self, rhs: R) -> Expr {
        Expr::Mul(Box::new(self), Box::new(rhs.into()))
    }
}

impl Div<f64> for Expr {
    type Output = Expr;

    fn div(self, rhs: f64) -> Expr {
        Expr::Mul(Box::new(Expr::Constant(1.0 / rhs)), Box::new(self))
    }
}

impl Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::Neg(Box::new(self))
    }
}

impl Add<Expr> for f64 {
    type Output = Expr;

    fn add(self, rhs: Expr) -> Expr {
        Expr::Constant(self) + rhs
    }
}

impl Sub<Expr> for f64 {
    type Output = Expr;

    fn sub(self, rhs: Expr) -> Expr {
        Expr::Constant(self) - rhs
    }
}

impl Mul<Expr> for f64 {
    type Output = Expr;

    fn mul(self, rhs: Expr) -> Expr {
        Expr::Constant(self) * rhs
    }
}
