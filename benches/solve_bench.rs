//! Benchmarks for matrix assembly, LBVP solves and IVP steps.
//!
//! Run with: `cargo bench --bench solve_bench`

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use spectral_rs::operators::{ddt, interp, lap, lift};
use spectral_rs::problem::build_systems;
use spectral_rs::{
    CartesianCoordinates, CartesianSpace, Dtype, Field, FourierBasis, InitialValueSolver, JacobiBasis, LiftBasis,
    LinearBoundaryValueSolver, MultistepScheme, Problem, SolverConfig,
};
use std::sync::Arc;

/// Dirichlet Poisson (or heat) problem on a periodic channel.
fn channel_problem(nx: usize, ny: usize, ivp: bool) -> Problem {
    let c = CartesianCoordinates::new(&["x", "y"]);
    let x = FourierBasis::real(c.coord(0).clone(), nx, (0.0, 2.0 * std::f64::consts::PI), 1.0).unwrap();
    let y = Arc::new(JacobiBasis::chebyshev(c.coord(1).clone(), ny, (0.0, 1.0), 1.0).unwrap());
    let full = CartesianSpace::new(c.clone(), Dtype::Real, vec![Some(x.into()), Some(Arc::clone(&y).into())])
        .unwrap();
    let mut u = Field::scalar("u", full.clone().into()).unwrap();
    u.set_grid_fn(|_, p| p[0].sin() * p[1] * (1.0 - p[1])).unwrap();
    let u = u.into_ref();
    let mut f = Field::scalar("f", full.clone().into()).unwrap();
    f.set_grid_fn(|_, p| p[0].cos() * p[1]).unwrap();
    let f = f.into_ref();
    let t1 = Field::scalar("tau1", full.restrict(1).into()).unwrap().into_ref();
    let t2 = Field::scalar("tau2", full.restrict(1).into()).unwrap().into_ref();
    let lb = LiftBasis::Interval(Arc::new(y.clone_with(1.5, 1.5).unwrap()));
    let vars = vec![Arc::clone(&u), Arc::clone(&t1), Arc::clone(&t2)];
    let built = if ivp { Problem::ivp(vars) } else { Problem::lbvp(vars) };
    let mut p = built.unwrap();
    let taus = lift(&t1, lb.clone(), -1) + lift(&t2, lb, -2);
    if ivp {
        p.add_equation(ddt(&u) - lap(&u) + taus, &f).unwrap();
    } else {
        p.add_equation(lap(&u) + taus, &f).unwrap();
    }
    p.add_equation(interp(&u, c.coord(1), 0.0), 0.0).unwrap();
    p.add_equation(interp(&u, c.coord(1), 1.0), 0.0).unwrap();
    p
}

fn bench_assembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("assembly");
    for (nx, ny) in [(16, 16), (64, 32)] {
        let problem = channel_problem(nx, ny, false);
        group.bench_with_input(BenchmarkId::new("poisson", format!("{nx}x{ny}")), &problem, |b, p| {
            b.iter(|| build_systems(black_box(p), 1e-12).unwrap())
        });
    }
    group.finish();
}

fn bench_lbvp_solve(c: &mut Criterion) {
    let mut group = c.benchmark_group("lbvp_solve");
    group.sample_size(20);
    for (nx, ny) in [(16, 16), (64, 32)] {
        let mut solver = LinearBoundaryValueSolver::new(channel_problem(nx, ny, false), SolverConfig::default())
            .unwrap();
        // The first solve factorizes; later solves reuse the factors.
        solver.solve().unwrap();
        group.bench_function(BenchmarkId::new("poisson", format!("{nx}x{ny}")), |b| {
            b.iter(|| solver.solve().unwrap())
        });
    }
    group.finish();
}

fn bench_ivp_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("ivp_step");
    group.sample_size(20);
    for scheme in [MultistepScheme::Sbdf2, MultistepScheme::Cnab2] {
        let config = SolverConfig::default().with_scheme(scheme);
        let mut solver = InitialValueSolver::new(channel_problem(32, 24, true), config).unwrap();
        for _ in 0..3 {
            solver.step(1e-4).unwrap();
        }
        group.bench_function(BenchmarkId::new("heat", scheme.to_string()), |b| {
            b.iter(|| solver.step(black_box(1e-4)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_assembly, bench_lbvp_solve, bench_ivp_step);
criterion_main!(benches);
