//! Internally heated convection in a ball started from the conductive
//! equilibrium must stay there.

use spectral_rs::operators::{angular, cross, curl, ddt, div, dot, grad, interp, lap, lift, radial, radial_vector, trans};
use spectral_rs::linalg::{CsrMatrix, LuFactor};
use spectral_rs::problem::{Condition, build_systems};
use spectral_rs::{
    BallBasis, Dtype, Field, FieldRef, InitialValueSolver, MultistepScheme, Problem, SolverConfig, Space,
    SphericalCoordinates,
};
use std::sync::Arc;

const SOURCE: f64 = 6.0;

struct Convection {
    solver: InitialValueSolver,
    u: FieldRef,
    t: FieldRef,
}

fn convection_problem(rayleigh: f64) -> (Problem, FieldRef, FieldRef) {
    let coords = SphericalCoordinates::new("phi", "theta", "r");
    let ball = Arc::new(BallBasis::new(coords.clone(), (8, 6, 8), 1.0, 1.5, Dtype::Real).unwrap());
    let volume = Space::from(Arc::clone(&ball));
    let surface = Space::Sphere(ball.surface());
    let r = coords.r();
    let big_r = rayleigh.sqrt();
    let big_p = rayleigh.sqrt();

    let u = Field::vector("u", volume.clone()).unwrap().into_ref();
    let p = Field::scalar("p", volume.clone()).unwrap().into_ref();
    let t = Field::scalar("T", volume).unwrap().into_ref();
    let tau_u = Field::vector("tau u", surface.clone()).unwrap().into_ref();
    let tau_t = Field::scalar("tau T", surface).unwrap().into_ref();
    let lb = ball.lift_basis(2);

    let mut problem = Problem::ivp(vec![
        Arc::clone(&u),
        Arc::clone(&p),
        Arc::clone(&t),
        Arc::clone(&tau_u),
        Arc::clone(&tau_t),
    ])
    .unwrap();
    problem
        .add_equation(
            ddt(&u) - (1.0 / big_r) * lap(&u) + grad(&p) + lift(&tau_u, lb.clone(), -1) - radial_vector(&ball) * &t,
            -cross(curl(&u), &u),
        )
        .unwrap();
    problem.add_equation(div(&u), 0.0).unwrap();
    problem
        .add_equation(
            ddt(&t) - (1.0 / big_p) * lap(&t) + lift(&tau_t, lb, -1),
            -dot(&u, grad(&t)) + SOURCE / big_p,
        )
        .unwrap();
    problem
        .add_equation_if(radial(interp(&u, r, 1.0)), 0.0, Condition::ell_ne(0))
        .unwrap();
    problem
        .add_equation_if(interp(&p, r, 1.0), 0.0, Condition::ell_eq(0))
        .unwrap();
    problem
        .add_equation(angular(radial(interp(grad(&u) + trans(grad(&u)), r, 1.0))), 0.0)
        .unwrap();
    problem.add_equation(interp(&t, r, 1.0), 0.0).unwrap();

    (problem, u, t)
}

fn convection(scheme: MultistepScheme, rayleigh: f64) -> Convection {
    let (problem, u, t) = convection_problem(rayleigh);
    let config = SolverConfig::default().with_scheme(scheme).with_hermitian_cadence(Some(4));
    Convection {
        solver: InitialValueSolver::new(problem, config).unwrap(),
        u,
        t,
    }
}

fn equilibrium(r: f64) -> f64 {
    SOURCE / 6.0 * (1.0 - r * r)
}

#[test]
fn test_conductive_equilibrium_is_a_fixed_point() {
    for scheme in [MultistepScheme::Sbdf2, MultistepScheme::Cnab2] {
        let mut c = convection(scheme, 1e4);
        c.t.write().set_grid_fn(|_, p| equilibrium(p[2])).unwrap();
        for _ in 0..10 {
            c.solver.step(0.01).unwrap();
        }
        let t = c.t.write().grid_real().unwrap();
        let mut expected = Field::scalar("e", c.t.read().space().clone()).unwrap();
        expected.set_grid_fn(|_, p| equilibrium(p[2])).unwrap();
        for (a, b) in t.iter().zip(&expected.grid_real().unwrap()) {
            assert!((a - b).abs() < 1e-8, "{scheme}: T {a} vs {b}");
        }
        let speed = c.u.write().grid_real().unwrap().iter().fold(0.0f64, |m, v| m.max(v.abs()));
        assert!(speed < 1e-8, "{scheme}: |u| = {speed}");
    }
}

#[test]
fn test_perturbation_decays_toward_equilibrium_below_onset() {
    // Far below onset the temperature relaxes diffusively.
    let mut c = convection(MultistepScheme::Sbdf2, 1.0);
    c.t.write()
        .set_grid_fn(|_, p| equilibrium(p[2]) + 0.1 * (1.0 - p[2] * p[2]) * p[2] * p[1].cos())
        .unwrap();
    let deviation = |c: &Convection| {
        let t = c.t.write().grid_real().unwrap();
        let mut e = Field::scalar("e", c.t.read().space().clone()).unwrap();
        e.set_grid_fn(|_, p| equilibrium(p[2])).unwrap();
        t.iter()
            .zip(&e.grid_real().unwrap())
            .fold(0.0f64, |m, (a, b)| m.max((a - b).abs()))
    };
    let before = deviation(&c);
    for _ in 0..20 {
        c.solver.step(0.05).unwrap();
    }
    let after = deviation(&c);
    assert!(after < before, "deviation grew from {before} to {after}");
    assert!(after.is_finite());
}

#[test]
fn test_every_degree_assembles_a_nonsingular_pencil() {
    let (problem, _, _) = convection_problem(1e4);
    let systems = build_systems(&problem, 1e-12).unwrap();
    assert!(systems.iter().any(|s| s.index().ell().is_some_and(|ell| ell % 2 == 1)));
    for sys in &systems {
        // The continuity rows must all couple to some unknown.
        for block in sys.blocks().iter().filter(|b| b.equation == 1) {
            for row in block.offset..block.offset + block.rows {
                assert!(sys.linear().row(row).next().is_some(), "{}: empty row {row}", sys.label());
            }
        }
        // First-order implicit step with dt = 0.01.
        let matrix = CsrMatrix::combine_dense(1.0, sys.mass(), 0.01, sys.linear());
        assert!(
            LuFactor::new(matrix, 1e-13, &sys.label()).is_ok(),
            "pencil {} is singular",
            sys.label()
        );
    }
}
