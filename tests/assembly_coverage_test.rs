//! Every pencil must be covered by exactly as many equation rows as it
//! has unknowns, and violations must fail the same way every time.

use spectral_rs::error::AssemblyError;
use spectral_rs::linalg::LuFactor;
use spectral_rs::operators::{angular, ddt, div, grad, interp, lap, lift, radial};
use spectral_rs::problem::{Condition, build_systems};
use spectral_rs::{
    BallBasis, CartesianCoordinates, CartesianSpace, Dtype, Field, FieldRef, FourierBasis, InitialValueSolver,
    JacobiBasis, LiftBasis, Problem, SolverConfig, Space, SpectralError, SphericalCoordinates,
};
use std::sync::Arc;

fn cartesian_vars() -> (CartesianCoordinates, Vec<FieldRef>, LiftBasis) {
    let c = CartesianCoordinates::new(&["x", "y"]);
    let x = FourierBasis::real(c.coord(0).clone(), 8, (0.0, 1.0), 1.5).unwrap();
    let y = Arc::new(JacobiBasis::chebyshev(c.coord(1).clone(), 12, (-1.0, 1.0), 1.5).unwrap());
    let full = CartesianSpace::new(c.clone(), Dtype::Real, vec![Some(x.into()), Some(Arc::clone(&y).into())]).unwrap();
    let u = Field::scalar("u", full.clone().into()).unwrap().into_ref();
    let t1 = Field::scalar("t1", full.restrict(1).into()).unwrap().into_ref();
    let t2 = Field::scalar("t2", full.restrict(1).into()).unwrap().into_ref();
    let lb = LiftBasis::Interval(Arc::new(y.clone_with(1.5, 1.5).unwrap()));
    (c, vec![u, t1, t2], lb)
}

fn poisson_with_walls(walls: &[f64]) -> Problem {
    let (c, vars, lb) = cartesian_vars();
    let mut p = Problem::lbvp(vars.clone()).unwrap();
    p.add_equation(lap(&vars[0]) + lift(&vars[1], lb.clone(), -1) + lift(&vars[2], lb, -2), 0.0)
        .unwrap();
    for &y in walls {
        p.add_equation(interp(&vars[0], c.coord(1), y), 0.0).unwrap();
    }
    p
}

#[test]
fn test_well_posed_pencils_are_square_and_nonsingular() {
    let p = poisson_with_walls(&[-1.0, 1.0]);
    let systems = build_systems(&p, 1e-12).unwrap();
    // One pencil per stored real Fourier mode.
    assert_eq!(systems.len(), 4);
    for s in &systems {
        assert_eq!(s.linear().n_rows(), s.size());
        assert_eq!(s.linear().n_cols(), s.size());
        LuFactor::new(s.linear().to_dense(), 1e-13, &s.label()).unwrap();
    }
}

#[test]
fn test_under_and_over_determined_pencils_are_rejected() {
    for walls in [&[-1.0][..], &[-1.0, 0.0, 1.0][..]] {
        let p = poisson_with_walls(walls);
        let first = build_systems(&p, 1e-12).unwrap_err();
        assert!(matches!(first, AssemblyError::DimensionMismatch { .. }), "{first}");
        // Same problem, same failure.
        assert_eq!(build_systems(&p, 1e-12).unwrap_err(), first);
    }
}

#[test]
fn test_conditioned_gauge_is_required_in_the_ball() {
    let coords = SphericalCoordinates::new("phi", "theta", "r");
    let ball = Arc::new(BallBasis::new(coords.clone(), (8, 4, 6), 1.0, 1.5, Dtype::Real).unwrap());
    let volume = Space::from(Arc::clone(&ball));
    let r = coords.r();
    let build = |with_gauge: bool| -> Result<InitialValueSolver, SpectralError> {
        let u = Field::vector("u", volume.clone()).unwrap().into_ref();
        let p = Field::scalar("p", volume.clone()).unwrap().into_ref();
        let tau = Field::vector("tau", Space::Sphere(ball.surface())).unwrap().into_ref();
        let mut problem = Problem::ivp(vec![Arc::clone(&u), Arc::clone(&p), Arc::clone(&tau)]).unwrap();
        problem
            .add_equation(ddt(&u) - lap(&u) + grad(&p) + lift(&tau, ball.lift_basis(2), -1), 0.0)
            .unwrap();
        problem.add_equation(div(&u), 0.0).unwrap();
        problem
            .add_equation_if(radial(interp(&u, r, 1.0)), 0.0, Condition::ell_ne(0))
            .unwrap();
        problem
            .add_equation(angular(interp(&u, r, 1.0)), 0.0)
            .unwrap();
        if with_gauge {
            problem
                .add_equation_if(interp(&p, r, 1.0), 0.0, Condition::ell_eq(0))
                .unwrap();
        }
        InitialValueSolver::new(problem, SolverConfig::default())
    };

    let solver = build(true).unwrap();
    assert!(solver.systems().iter().all(|s| s.linear().n_rows() == s.size()));
    let err = build(false).unwrap_err();
    assert!(matches!(err, SpectralError::Assembly(AssemblyError::DimensionMismatch { .. })), "{err}");
}

#[test]
fn test_conditions_outside_the_domain_are_rejected() {
    let (c, vars, _) = cartesian_vars();
    let mut p = Problem::lbvp(vars.clone()).unwrap();
    let wall = interp(&vars[0], c.coord(1), 0.0);
    assert!(matches!(
        p.add_equation_if(wall, 0.0, Condition::ell_eq(0)),
        Err(AssemblyError::InvalidCondition { .. })
    ));
}
