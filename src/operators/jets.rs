//! Sampled linear functionals used by the linearization.
//!
//! A [`Jets`] block holds, for every sample point of the coupled
//! coordinate and every derivative order up to its depth, one row of
//! coefficients over the pencil unknowns. Linear operators act on these
//! rows pointwise, so a whole operator tree reduces to one block per
//! output component that the assembly then projects onto the output
//! family.

use crate::error::{BasisError, ExprError};
use crate::polynomial::{JET_DEPTH, Jet};
use num_complex::Complex64;

const ZERO: Complex64 = Complex64::new(0.0, 0.0);

const BINOMIAL: [[f64; JET_DEPTH]; JET_DEPTH] = [
    [1.0, 0.0, 0.0, 0.0],
    [1.0, 1.0, 0.0, 0.0],
    [1.0, 2.0, 1.0, 0.0],
    [1.0, 3.0, 3.0, 1.0],
];

/// Value and derivatives of a known (possibly complex) function at a point.
pub(crate) type ComplexJet = [Complex64; JET_DEPTH];

/// Promote a real jet.
pub(crate) fn complex_jet(j: &Jet) -> ComplexJet {
    j.map(|v| Complex64::new(v, 0.0))
}

/// Jets of r^p at each point.
pub(crate) fn power_jets(points: &[f64], p: i32) -> Vec<ComplexJet> {
    points
        .iter()
        .map(|&r| {
            let mut jet = [ZERO; JET_DEPTH];
            let mut coeff = 1.0;
            for (i, v) in jet.iter_mut().enumerate() {
                let e = p - i as i32;
                *v = Complex64::new(coeff * r.powi(e), 0.0);
                coeff *= e as f64;
            }
            jet
        })
        .collect()
}

/// Rows over the pencil unknowns, per sample point and derivative order.
#[derive(Clone, Debug)]
pub(crate) struct Jets {
    points: usize,
    cols: usize,
    /// `data[order][point * cols + col]`
    data: Vec<Vec<Complex64>>,
}

impl Jets {
    pub fn zeros(points: usize, cols: usize, depth: usize) -> Self {
        Self {
            points,
            cols,
            data: vec![vec![ZERO; points * cols]; depth],
        }
    }

    /// Basis functions placed on columns `offset..offset + modes`;
    /// `values[q][n]` is the jet of mode n at point q.
    pub fn from_modes(cols: usize, offset: usize, values: &[Vec<Jet>]) -> Self {
        let mut out = Self::zeros(values.len(), cols, JET_DEPTH);
        for (q, modes) in values.iter().enumerate() {
            for (n, jet) in modes.iter().enumerate() {
                for (order, v) in jet.iter().enumerate() {
                    out.data[order][q * cols + offset + n] = Complex64::new(*v, 0.0);
                }
            }
        }
        out
    }

    /// A row that does not vary along the coupled direction.
    pub fn surface(points: usize, row: &[Complex64]) -> Self {
        let cols = row.len();
        let mut out = Self::zeros(points, cols, JET_DEPTH);
        for q in 0..points {
            out.data[0][q * cols..(q + 1) * cols].copy_from_slice(row);
        }
        out
    }

    pub fn points(&self) -> usize {
        self.points
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of derivative orders available (1 means values only).
    pub fn depth(&self) -> usize {
        self.data.len()
    }

    pub fn row(&self, order: usize, point: usize) -> &[Complex64] {
        &self.data[order][point * self.cols..(point + 1) * self.cols]
    }

    pub fn scale(&mut self, c: Complex64) {
        for block in &mut self.data {
            for v in block.iter_mut() {
                *v *= c;
            }
        }
    }

    pub fn scaled(mut self, c: Complex64) -> Self {
        self.scale(c);
        self
    }

    pub fn add(&self, other: &Self) -> Self {
        debug_assert_eq!((self.points, self.cols), (other.points, other.cols));
        let depth = self.depth().min(other.depth());
        Self {
            points: self.points,
            cols: self.cols,
            data: (0..depth)
                .map(|j| self.data[j].iter().zip(&other.data[j]).map(|(a, b)| a + b).collect())
                .collect(),
        }
    }

    /// d/dx along the coupled coordinate.
    pub fn derivative(&self) -> Result<Self, ExprError> {
        if self.depth() < 2 {
            return Err(BasisError::DerivativeDepth {
                requested: JET_DEPTH,
                supported: JET_DEPTH - 1,
            }
            .into());
        }
        Ok(Self {
            points: self.points,
            cols: self.cols,
            data: self.data[1..].to_vec(),
        })
    }

    /// Pointwise product with a known function, by the Leibniz rule.
    pub fn mul_function(&self, f: &[ComplexJet]) -> Self {
        debug_assert_eq!(f.len(), self.points);
        let depth = self.depth();
        let mut out = Self::zeros(self.points, self.cols, depth);
        for (q, fq) in f.iter().enumerate() {
            let range = q * self.cols..(q + 1) * self.cols;
            for j in 0..depth {
                for i in 0..=j {
                    let w = fq[i] * BINOMIAL[j][i];
                    if w == ZERO {
                        continue;
                    }
                    let src = &self.data[j - i][range.clone()];
                    for (o, s) in out.data[j][range.clone()].iter_mut().zip(src) {
                        *o += w * s;
                    }
                }
            }
        }
        out
    }
}

/// How a component of a linearized term is projected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CompKind {
    /// Smooth along the coupled direction; in the ball it carries
    /// regularity k (Cartesian pencils use 0).
    Volume(usize),
    /// Pointwise values with no valid radial expansion; these must be
    /// restricted to a boundary before projection.
    Irregular,
    /// Constant along the coupled direction: one row.
    Surface,
    /// Not present in this pencil: no rows.
    Absent,
}

impl CompKind {
    pub fn merge(self, other: Self) -> Result<Self, ExprError> {
        use CompKind::*;
        Ok(match (self, other) {
            (Absent, k) | (k, Absent) => k,
            (Irregular, _) | (_, Irregular) => Irregular,
            (Volume(a), Volume(b)) if a != b => {
                return Err(ExprError::Unsupported {
                    op: "add",
                    reason: format!("terms of regularity {a} and {b} cannot be combined"),
                });
            }
            (Volume(k), _) | (_, Volume(k)) => Volume(k),
            (Surface, Surface) => Surface,
        })
    }
}

/// One tensor component: its kind and its rows (`None` when identically zero).
#[derive(Clone, Debug)]
pub(crate) struct Comp {
    pub kind: CompKind,
    pub jets: Option<Jets>,
}

impl Comp {
    pub fn zero(kind: CompKind) -> Self {
        Self { kind, jets: None }
    }

    pub fn new(kind: CompKind, jets: Jets) -> Self {
        let jets = (kind != CompKind::Absent).then_some(jets);
        Self { kind, jets }
    }

    pub fn add(&self, other: &Self) -> Result<Self, ExprError> {
        let kind = self.kind.merge(other.kind)?;
        let jets = match (&self.jets, &other.jets) {
            (Some(a), Some(b)) => Some(a.add(b)),
            (Some(a), None) | (None, Some(a)) => Some(a.clone()),
            (None, None) => None,
        };
        Ok(Self { kind, jets })
    }

    pub fn scaled(&self, c: Complex64) -> Self {
        Self {
            kind: self.kind,
            jets: self.jets.clone().map(|j| j.scaled(c)),
        }
    }

    /// Σ cᵢ compᵢ with the given result kind.
    pub fn combine(kind: CompKind, terms: &[(f64, &Comp)]) -> Self {
        if kind == CompKind::Absent {
            return Self::zero(kind);
        }
        let mut jets: Option<Jets> = None;
        for (c, comp) in terms {
            if *c == 0.0 {
                continue;
            }
            if let Some(j) = &comp.jets {
                let term = j.clone().scaled(Complex64::new(*c, 0.0));
                jets = Some(match jets {
                    Some(acc) => acc.add(&term),
                    None => term,
                });
            }
        }
        Self { kind, jets }
    }

    pub fn map_jets<F>(&self, kind: CompKind, f: F) -> Result<Self, ExprError>
    where
        F: FnOnce(&Jets) -> Result<Jets, ExprError>,
    {
        if kind == CompKind::Absent {
            return Ok(Self::zero(kind));
        }
        Ok(Self {
            kind,
            jets: self.jets.as_ref().map(f).transpose()?,
        })
    }
}

/// Component basis of a linearized tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Form {
    /// Cartesian components, index order as stored in fields.
    Cartesian,
    /// Ball regularity components σ = -1, 0, +1.
    Regularity,
    /// Spherical harmonic components (R, s̃, t̃).
    Spherical,
}

/// A linearized tensor-valued term.
#[derive(Clone, Debug)]
pub(crate) struct Tensor {
    pub rank: usize,
    pub form: Form,
    pub comps: Vec<Comp>,
}

impl Tensor {
    pub fn scalar(form: Form, comp: Comp) -> Self {
        Self {
            rank: 0,
            form,
            comps: vec![comp],
        }
    }

    pub fn add(&self, other: &Self) -> Result<Self, ExprError> {
        if self.rank != other.rank || self.comps.len() != other.comps.len() {
            return Err(ExprError::RankMismatch {
                op: "add",
                left: self.rank,
                right: other.rank,
            });
        }
        if self.rank > 0 && self.form != other.form {
            return Err(ExprError::Unsupported {
                op: "add",
                reason: format!("cannot add {:?} and {:?} components", self.form, other.form),
            });
        }
        let comps = self
            .comps
            .iter()
            .zip(&other.comps)
            .map(|(a, b)| a.add(b))
            .collect::<Result<_, _>>()?;
        Ok(Self {
            rank: self.rank,
            form: self.form,
            comps,
        })
    }

    pub fn scaled(&self, c: Complex64) -> Self {
        Self {
            rank: self.rank,
            form: self.form,
            comps: self.comps.iter().map(|x| x.scaled(c)).collect(),
        }
    }

    /// Same structure with every component zero.
    pub fn zeroed(&self) -> Self {
        Self {
            rank: self.rank,
            form: self.form,
            comps: self.comps.iter().map(|c| Comp::zero(c.kind)).collect(),
        }
    }
}
