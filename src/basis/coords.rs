//! Coordinate systems.
//!
//! A coordinate system is an ordered tuple of named axes. Bases attach to
//! individual coordinates; operators use the system to know how many
//! tensor components a vector carries and which curvature terms apply.

use std::fmt;

/// Geometry of a coordinate system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CoordKind {
    Cartesian,
    Spherical,
}

/// One named axis of a coordinate system.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Coord {
    name: String,
    axis: usize,
    kind: CoordKind,
}

impl Coord {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position of this axis in its coordinate system.
    pub fn axis(&self) -> usize {
        self.axis
    }

    pub fn kind(&self) -> CoordKind {
        self.kind
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Cartesian coordinates with any number of axes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CartesianCoordinates {
    coords: Vec<Coord>,
}

impl CartesianCoordinates {
    pub fn new(names: &[&str]) -> Self {
        let coords = names
            .iter()
            .enumerate()
            .map(|(axis, name)| Coord {
                name: (*name).to_string(),
                axis,
                kind: CoordKind::Cartesian,
            })
            .collect();
        Self { coords }
    }

    pub fn dim(&self) -> usize {
        self.coords.len()
    }

    pub fn coord(&self, axis: usize) -> &Coord {
        &self.coords[axis]
    }

    pub fn coords(&self) -> &[Coord] {
        &self.coords
    }

    pub fn by_name(&self, name: &str) -> Option<&Coord> {
        self.coords.iter().find(|c| c.name == name)
    }
}

/// Spherical coordinates ordered (azimuth, colatitude, radius).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SphericalCoordinates {
    coords: [Coord; 3],
}

impl SphericalCoordinates {
    pub fn new(phi: &str, theta: &str, r: &str) -> Self {
        let make = |name: &str, axis| Coord {
            name: name.to_string(),
            axis,
            kind: CoordKind::Spherical,
        };
        Self {
            coords: [make(phi, 0), make(theta, 1), make(r, 2)],
        }
    }

    pub fn phi(&self) -> &Coord {
        &self.coords[0]
    }

    pub fn theta(&self) -> &Coord {
        &self.coords[1]
    }

    pub fn r(&self) -> &Coord {
        &self.coords[2]
    }

    pub fn coords(&self) -> &[Coord] {
        &self.coords
    }
}

impl Default for SphericalCoordinates {
    fn default() -> Self {
        Self::new("phi", "theta", "r")
    }
}

/// Either kind of coordinate system.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CoordinateSystem {
    Cartesian(CartesianCoordinates),
    Spherical(SphericalCoordinates),
}

impl CoordinateSystem {
    /// Number of axes, which is also the number of vector components.
    pub fn dim(&self) -> usize {
        match self {
            Self::Cartesian(c) => c.dim(),
            Self::Spherical(_) => 3,
        }
    }

    pub fn coords(&self) -> &[Coord] {
        match self {
            Self::Cartesian(c) => c.coords(),
            Self::Spherical(s) => s.coords(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cartesian_axes() {
        let c = CartesianCoordinates::new(&["x", "y"]);
        assert_eq!(c.dim(), 2);
        assert_eq!(c.coord(1).name(), "y");
        assert_eq!(c.by_name("x").map(Coord::axis), Some(0));
        assert!(c.by_name("z").is_none());
    }

    #[test]
    fn test_spherical_order() {
        let s = SphericalCoordinates::default();
        assert_eq!(s.phi().axis(), 0);
        assert_eq!(s.theta().axis(), 1);
        assert_eq!(s.r().axis(), 2);
        assert_eq!(CoordinateSystem::Spherical(s).dim(), 3);
    }
}
