//! Poisson boundary-value problems on a Fourier × Chebyshev domain.

use approx::assert_abs_diff_eq;
use spectral_rs::operators::{diff, interp, lap, lift};
use spectral_rs::{
    CartesianCoordinates, CartesianSpace, Coord, Dtype, Expr, Field, FieldRef, FourierBasis, JacobiBasis, LiftBasis,
    LinearBoundaryValueSolver, Problem, SolverConfig,
};
use std::f64::consts::PI;
use std::sync::Arc;

struct Setup {
    y: Coord,
    full: CartesianSpace,
    u: FieldRef,
    tau1: FieldRef,
    tau2: FieldRef,
    lift_basis: LiftBasis,
}

fn setup(nx: usize, ny: usize) -> Setup {
    let coords = CartesianCoordinates::new(&["x", "y"]);
    let x = FourierBasis::real(coords.coord(0).clone(), nx, (0.0, 2.0 * PI), 1.5).unwrap();
    let ybasis = Arc::new(JacobiBasis::chebyshev(coords.coord(1).clone(), ny, (0.0, 1.0), 1.5).unwrap());
    let full = CartesianSpace::new(
        coords.clone(),
        Dtype::Real,
        vec![Some(x.into()), Some(Arc::clone(&ybasis).into())],
    )
    .unwrap();
    let edge = full.restrict(1);
    Setup {
        y: coords.coord(1).clone(),
        u: Field::scalar("u", full.clone().into()).unwrap().into_ref(),
        tau1: Field::scalar("tau1", edge.clone().into()).unwrap().into_ref(),
        tau2: Field::scalar("tau2", edge.into()).unwrap().into_ref(),
        lift_basis: LiftBasis::Interval(Arc::new(ybasis.clone_with(1.5, 1.5).unwrap())),
        full,
    }
}

/// lap(u) = f, u(y=0) = g, dy(u)(y=1) = h.
fn mixed_problem(s: &Setup, f: impl Into<Expr>, g: impl Into<Expr>, h: impl Into<Expr>) -> Problem {
    let mut p = Problem::lbvp(vec![Arc::clone(&s.u), Arc::clone(&s.tau1), Arc::clone(&s.tau2)]).unwrap();
    p.add_equation(
        lap(&s.u) + lift(&s.tau1, s.lift_basis.clone(), -1) + lift(&s.tau2, s.lift_basis.clone(), -2),
        f,
    )
    .unwrap();
    p.add_equation(interp(&s.u, &s.y, 0.0), g).unwrap();
    p.add_equation(interp(diff(&s.u, &s.y), &s.y, 1.0), h).unwrap();
    p
}

#[test]
fn test_zero_data_gives_zero_solution() {
    let s = setup(16, 16);
    // Start from garbage so the solve has to overwrite it.
    s.u.write().set_grid_fn(|_, p| p[0].sin() + p[1]).unwrap();
    let mut solver = LinearBoundaryValueSolver::new(mixed_problem(&s, 0.0, 0.0, 0.0), SolverConfig::default()).unwrap();
    solver.solve().unwrap();
    for v in s.u.write().grid_real().unwrap() {
        assert_abs_diff_eq!(v, 0.0, epsilon = 1e-12);
    }
}

#[test]
fn test_mixed_boundary_manufactured_solution() {
    let s = setup(16, 32);
    // u = cos(x) sin(πy/2): u(0) = 0, dy(u)(1) = 0.
    let exact = |p: &[f64]| p[0].cos() * (PI * p[1] / 2.0).sin();
    let mut f = Field::scalar("f", s.full.clone().into()).unwrap();
    f.set_grid_fn(|_, p| -(1.0 + PI * PI / 4.0) * exact(p)).unwrap();
    let f = f.into_ref();

    let mut solver =
        LinearBoundaryValueSolver::new(mixed_problem(&s, Expr::field(&f), 0.0, 0.0), SolverConfig::default()).unwrap();
    solver.solve().unwrap();

    let mut expected = Field::scalar("e", s.full.clone().into()).unwrap();
    expected.set_grid_fn(|_, p| exact(p)).unwrap();
    let e = expected.grid_real().unwrap();
    let g = s.u.write().grid_real().unwrap();
    for (a, b) in g.iter().zip(&e) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-9);
    }
}

#[test]
fn test_resolve_with_new_forcing_reuses_factorization() {
    let s = setup(8, 16);
    let mut f = Field::scalar("f", s.full.clone().into()).unwrap();
    f.set_grid_fn(|_, _| 0.0).unwrap();
    let f = f.into_ref();
    let mut solver =
        LinearBoundaryValueSolver::new(mixed_problem(&s, Expr::field(&f), 0.0, 0.0), SolverConfig::default()).unwrap();
    solver.solve().unwrap();

    // lap(u) = 2 with u(0) = 0, u'(1) = 0 gives u = y² - 2y.
    f.write().set_grid_fn(|_, _| 2.0).unwrap();
    solver.solve().unwrap();
    let mut expected = Field::scalar("e", s.full.clone().into()).unwrap();
    expected.set_grid_fn(|_, p| p[1] * p[1] - 2.0 * p[1]).unwrap();
    let e = expected.grid_real().unwrap();
    let g = s.u.write().grid_real().unwrap();
    for (a, b) in g.iter().zip(&e) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-10);
    }
}
