//! Pencil solves split across thread-backed ranks reproduce the
//! single-rank results on every rank.

use num_complex::Complex64;
use spectral_rs::operators::{ddt, interp, lap, lift};
use spectral_rs::{
    CartesianCoordinates, CartesianSpace, Distributor, Dtype, Field, FieldRef, FourierBasis, InitialValueSolver,
    JacobiBasis, LiftBasis, LinearBoundaryValueSolver, LocalComm, MultistepScheme, Problem, SolverConfig,
};
use std::f64::consts::PI;
use std::sync::Arc;
use std::thread;

const RANKS: usize = 3;
const STEPS: usize = 8;

/// Dirichlet Poisson (or heat) problem on a periodic channel.
fn channel(ivp: bool) -> (Problem, FieldRef) {
    let c = CartesianCoordinates::new(&["x", "y"]);
    let x = FourierBasis::real(c.coord(0).clone(), 16, (0.0, 2.0 * PI), 1.5).unwrap();
    let y = Arc::new(JacobiBasis::chebyshev(c.coord(1).clone(), 12, (0.0, 1.0), 1.5).unwrap());
    let full = CartesianSpace::new(c.clone(), Dtype::Real, vec![Some(x.into()), Some(Arc::clone(&y).into())])
        .unwrap();
    let mut u = Field::scalar("u", full.clone().into()).unwrap();
    u.set_grid_fn(|_, p| (p[0].sin() + 0.5 * (3.0 * p[0]).cos()) * p[1] * (1.0 - p[1]))
        .unwrap();
    let u = u.into_ref();
    let mut f = Field::scalar("f", full.clone().into()).unwrap();
    f.set_grid_fn(|_, p| p[0].cos() * p[1] + (2.0 * p[0]).sin() * p[1] * p[1])
        .unwrap();
    let f = f.into_ref();
    let t1 = Field::scalar("tau1", full.restrict(1).into()).unwrap().into_ref();
    let t2 = Field::scalar("tau2", full.restrict(1).into()).unwrap().into_ref();
    let lb = LiftBasis::Interval(Arc::new(y.clone_with(1.5, 1.5).unwrap()));
    let vars = vec![Arc::clone(&u), Arc::clone(&t1), Arc::clone(&t2)];
    let built = if ivp { Problem::ivp(vars) } else { Problem::lbvp(vars) };
    let mut problem = built.unwrap();
    let taus = lift(&t1, lb.clone(), -1) + lift(&t2, lb, -2);
    if ivp {
        problem.add_equation(ddt(&u) - lap(&u) + taus, &f).unwrap();
    } else {
        problem.add_equation(lap(&u) + taus, &f).unwrap();
    }
    problem.add_equation(interp(&u, c.coord(1), 0.0), 0.0).unwrap();
    problem.add_equation(interp(&u, c.coord(1), 1.0), 1.0).unwrap();
    (problem, u)
}

fn solve_lbvp(distributor: Distributor) -> Vec<Complex64> {
    let (problem, u) = channel(false);
    let mut solver = LinearBoundaryValueSolver::with_distributor(problem, SolverConfig::default(), distributor).unwrap();
    solver.solve().unwrap();
    let coeffs = u.write().coeff().unwrap().to_vec();
    coeffs
}

fn run_ivp(distributor: Distributor) -> Vec<Complex64> {
    let (problem, u) = channel(true);
    let config = SolverConfig::default().with_scheme(MultistepScheme::Sbdf2);
    let mut solver = InitialValueSolver::with_distributor(problem, config, distributor).unwrap();
    for _ in 0..STEPS {
        solver.step(1e-3).unwrap();
    }
    assert_eq!(solver.iteration(), STEPS as u64);
    let coeffs = u.write().coeff().unwrap().to_vec();
    coeffs
}

/// Run `f` on every rank of a thread-backed communicator.
fn on_ranks(f: fn(Distributor) -> Vec<Complex64>) -> Vec<Vec<Complex64>> {
    let handles: Vec<_> = LocalComm::create(RANKS)
        .into_iter()
        .map(|comm| {
            thread::spawn(move || {
                let distributor = Distributor::new(Arc::new(comm), None).unwrap();
                assert_eq!(distributor.size(), RANKS);
                f(distributor)
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

fn max_diff(a: &[Complex64], b: &[Complex64]) -> f64 {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b).fold(0.0f64, |m, (x, y)| m.max((x - y).norm()))
}

#[test]
fn test_lbvp_on_three_ranks_matches_serial() {
    let serial = solve_lbvp(Distributor::serial());
    assert!(serial.iter().any(|c| c.norm() > 1e-3));
    for (rank, coeffs) in on_ranks(solve_lbvp).iter().enumerate() {
        let diff = max_diff(coeffs, &serial);
        assert!(diff < 1e-12, "rank {rank}: {diff:e}");
    }
}

#[test]
fn test_ivp_on_three_ranks_matches_serial() {
    let serial = run_ivp(Distributor::serial());
    for (rank, coeffs) in on_ranks(run_ivp).iter().enumerate() {
        let diff = max_diff(coeffs, &serial);
        assert!(diff < 1e-12, "rank {rank}: {diff:e}");
    }
}
