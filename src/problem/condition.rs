//! Typed equation conditions over pencil indices.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Restricts an equation to a subset of pencils.
///
/// Ball pencils are indexed by degree `ell` and order `m`. Cartesian
/// pencils are indexed by the coefficient index on each Fourier axis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Condition {
    #[default]
    Always,
    EllEq(usize),
    EllNe(usize),
    MEq(i64),
    MNe(i64),
    /// Coefficient index on a Cartesian axis equals `index`.
    ModeEq { axis: usize, index: usize },
    ModeNe { axis: usize, index: usize },
    And(Box<Condition>, Box<Condition>),
}

impl Condition {
    pub fn ell_eq(ell: usize) -> Self {
        Self::EllEq(ell)
    }

    pub fn ell_ne(ell: usize) -> Self {
        Self::EllNe(ell)
    }

    pub fn m_eq(m: i64) -> Self {
        Self::MEq(m)
    }

    pub fn m_ne(m: i64) -> Self {
        Self::MNe(m)
    }

    pub fn mode_eq(axis: usize, index: usize) -> Self {
        Self::ModeEq { axis, index }
    }

    pub fn mode_ne(axis: usize, index: usize) -> Self {
        Self::ModeNe { axis, index }
    }

    pub fn and(self, other: Self) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    /// Whether the condition refers only to indices of a ball problem.
    pub(crate) fn fits_ball(&self) -> bool {
        match self {
            Self::ModeEq { .. } | Self::ModeNe { .. } => false,
            Self::And(a, b) => a.fits_ball() && b.fits_ball(),
            _ => true,
        }
    }

    /// Whether the condition refers only to Fourier axes among `fourier_axes`.
    pub(crate) fn fits_cartesian(&self, fourier_axes: &[usize]) -> bool {
        match self {
            Self::Always => true,
            Self::EllEq(_) | Self::EllNe(_) | Self::MEq(_) | Self::MNe(_) => false,
            Self::ModeEq { axis, .. } | Self::ModeNe { axis, .. } => fourier_axes.contains(axis),
            Self::And(a, b) => a.fits_cartesian(fourier_axes) && b.fits_cartesian(fourier_axes),
        }
    }

    /// Evaluate at a ball pencil.
    pub(crate) fn holds_ball(&self, ell: usize, m: i64) -> bool {
        match self {
            Self::Always => true,
            Self::EllEq(l) => ell == *l,
            Self::EllNe(l) => ell != *l,
            Self::MEq(v) => m == *v,
            Self::MNe(v) => m != *v,
            Self::ModeEq { .. } | Self::ModeNe { .. } => false,
            Self::And(a, b) => a.holds_ball(ell, m) && b.holds_ball(ell, m),
        }
    }

    /// Evaluate at a Cartesian pencil with per-axis coefficient indices.
    pub(crate) fn holds_cartesian(&self, modes: &[Option<usize>]) -> bool {
        match self {
            Self::Always => true,
            Self::ModeEq { axis, index } => modes.get(*axis).copied().flatten() == Some(*index),
            Self::ModeNe { axis, index } => modes.get(*axis).copied().flatten().is_some_and(|i| i != *index),
            Self::EllEq(_) | Self::EllNe(_) | Self::MEq(_) | Self::MNe(_) => false,
            Self::And(a, b) => a.holds_cartesian(modes) && b.holds_cartesian(modes),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "always"),
            Self::EllEq(l) => write!(f, "ell == {l}"),
            Self::EllNe(l) => write!(f, "ell != {l}"),
            Self::MEq(m) => write!(f, "m == {m}"),
            Self::MNe(m) => write!(f, "m != {m}"),
            Self::ModeEq { axis, index } => write!(f, "n{axis} == {index}"),
            Self::ModeNe { axis, index } => write!(f, "n{axis} != {index}"),
            Self::And(a, b) => write!(f, "({a}) and ({b})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ball_conditions() {
        let c = Condition::ell_ne(0);
        assert!(!c.holds_ball(0, 0));
        assert!(c.holds_ball(2, -1));
        let both = Condition::ell_eq(1).and(Condition::m_eq(0));
        assert!(both.holds_ball(1, 0));
        assert!(!both.holds_ball(1, 1));
        let off_axis = Condition::m_ne(0).and(Condition::ell_ne(0));
        assert!(off_axis.holds_ball(2, 1));
        assert!(!off_axis.holds_ball(2, 0));
        assert!(both.fits_ball());
        assert!(!Condition::mode_eq(0, 0).fits_ball());
    }

    #[test]
    fn test_cartesian_conditions() {
        let c = Condition::mode_eq(0, 0);
        assert!(c.holds_cartesian(&[Some(0), None]));
        assert!(!c.holds_cartesian(&[Some(3), None]));
        assert!(Condition::mode_ne(0, 0).holds_cartesian(&[Some(3), None]));
        assert!(c.fits_cartesian(&[0]));
        assert!(!c.fits_cartesian(&[1]));
        assert!(!Condition::ell_eq(0).fits_cartesian(&[0]));
        assert_eq!(Condition::ell_ne(0).to_string(), "ell != 0");
    }
}
