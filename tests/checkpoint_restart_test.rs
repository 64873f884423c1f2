//! Restarting from a checkpoint written to disk reproduces the run.

use spectral_rs::operators::{ddt, interp, lap, lift};
use spectral_rs::{
    CartesianCoordinates, CartesianSpace, Checkpoint, Dtype, Field, FieldRef, FourierBasis, InitialValueSolver,
    JacobiBasis, LiftBasis, MultistepScheme, Problem, SolverConfig, SpectralError,
};
use num_complex::Complex64;
use std::f64::consts::PI;
use std::io::{Read, Write};
use std::sync::Arc;

const DT: f64 = 1e-3;

/// Heat equation on [0, 1] with homogeneous Dirichlet walls, starting
/// from the slowest decaying mode.
fn heat() -> (InitialValueSolver, FieldRef, CartesianSpace) {
    let c = CartesianCoordinates::new(&["x", "y"]);
    let x = FourierBasis::real(c.coord(0).clone(), 4, (0.0, 1.0), 1.5).unwrap();
    let y = Arc::new(JacobiBasis::chebyshev(c.coord(1).clone(), 16, (0.0, 1.0), 1.5).unwrap());
    let full =
        CartesianSpace::new(c.clone(), Dtype::Real, vec![Some(x.into()), Some(Arc::clone(&y).into())]).unwrap();
    let mut u = Field::scalar("u", full.clone().into()).unwrap();
    u.set_grid_fn(|_, p| (PI * p[1]).sin()).unwrap();
    let u = u.into_ref();
    let t1 = Field::scalar("tau1", full.restrict(1).into()).unwrap().into_ref();
    let t2 = Field::scalar("tau2", full.restrict(1).into()).unwrap().into_ref();
    let lb = LiftBasis::Interval(Arc::new(y.clone_with(1.5, 1.5).unwrap()));

    let mut p = Problem::ivp(vec![Arc::clone(&u), Arc::clone(&t1), Arc::clone(&t2)]).unwrap();
    p.add_equation(ddt(&u) - lap(&u) + lift(&t1, lb.clone(), -1) + lift(&t2, lb, -2), 0.0)
        .unwrap();
    p.add_equation(interp(&u, c.coord(1), 0.0), 0.0).unwrap();
    p.add_equation(interp(&u, c.coord(1), 1.0), 0.0).unwrap();
    let config = SolverConfig::default().with_scheme(MultistepScheme::Sbdf2);
    (InitialValueSolver::new(p, config).unwrap(), u, full)
}

fn max_error(solver: &InitialValueSolver, u: &FieldRef, space: &CartesianSpace) -> f64 {
    let amplitude = (-PI * PI * solver.sim_time()).exp();
    let mut expected = Field::scalar("e", space.clone().into()).unwrap();
    expected.set_grid_fn(|_, p| amplitude * (PI * p[1]).sin()).unwrap();
    let e = expected.grid_real().unwrap();
    let g = u.write().grid_real().unwrap();
    g.iter().zip(&e).map(|(a, b)| (a - b).abs()).fold(0.0, f64::max)
}

fn write_and_read(checkpoint: &Checkpoint) -> Checkpoint {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    serde_json::to_writer(&mut file, checkpoint).unwrap();
    file.flush().unwrap();
    let mut text = String::new();
    file.reopen().unwrap().read_to_string(&mut text).unwrap();
    serde_json::from_str(&text).unwrap()
}

#[test]
fn test_restart_matches_continued_run() {
    let (mut original, u_original, space) = heat();
    for _ in 0..20 {
        original.step(DT).unwrap();
    }
    let checkpoint = write_and_read(&original.serialize_state().unwrap());
    assert_eq!(checkpoint.iteration, 20);
    assert_eq!(checkpoint.timestep, Some(DT));
    assert!((checkpoint.sim_time - 20.0 * DT).abs() < 1e-15);

    // A fresh solver and the original both resume from the file.
    let (mut restarted, u_restarted, _) = heat();
    restarted.deserialize_state(&checkpoint).unwrap();
    original.deserialize_state(&checkpoint).unwrap();
    assert_eq!(restarted.iteration(), 20);
    assert_eq!(restarted.sim_time(), original.sim_time());

    for _ in 0..10 {
        original.step(DT).unwrap();
        restarted.step(DT).unwrap();
    }
    assert_eq!(original.iteration(), 30);
    assert_eq!(restarted.iteration(), 30);

    let a = u_original.write().coeff().unwrap().to_vec();
    let b = u_restarted.write().coeff().unwrap().to_vec();
    let diff = a.iter().zip(&b).map(|(x, y)| (x - y).norm()).fold(0.0, f64::max);
    assert!(diff < 1e-13, "restarted run drifted by {diff}");

    // Two first-order steps (startup and restart) dominate, each with a
    // local error near (λ dt)² / 2 for the decay rate λ = π².
    let lambda_dt = PI * PI * DT;
    let tol = 2.0 * lambda_dt * lambda_dt;
    let err = max_error(&restarted, &u_restarted, &space);
    assert!(err < tol, "error {err} after restart, bound {tol}");
}

#[test]
fn test_incompatible_checkpoints_are_rejected() {
    let (mut solver, u, _) = heat();
    solver.step(DT).unwrap();
    let checkpoint = solver.serialize_state().unwrap();
    let before = u.write().coeff().unwrap().to_vec();

    let mut missing = checkpoint.clone();
    missing.fields.remove("tau2");
    assert!(matches!(solver.deserialize_state(&missing), Err(SpectralError::Checkpoint(_))));

    let mut truncated = checkpoint.clone();
    if let Some(data) = truncated.fields.get_mut("u") {
        data.pop();
    }
    assert!(matches!(solver.deserialize_state(&truncated), Err(SpectralError::Checkpoint(_))));

    let mut padded = checkpoint;
    if let Some(data) = padded.fields.get_mut("tau1") {
        data.push(Complex64::new(0.0, 0.0));
    }
    assert!(matches!(solver.deserialize_state(&padded), Err(SpectralError::Checkpoint(_))));

    // Rejected restores leave the state untouched.
    assert_eq!(solver.iteration(), 1);
    assert_eq!(u.write().coeff().unwrap(), before.as_slice());
}
