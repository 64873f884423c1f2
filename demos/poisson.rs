//! 2D Poisson equation with mixed boundary conditions.
//!
//! Solves on a Fourier(x) × Chebyshev(y) domain:
//! - lap(u) = f with f = -10 sin²(x/2) (y - y²)
//! - u(y = 0) = sin(8x)
//! - dy(u)(y = Ly) = 0
//!
//! The two tau terms are lifted to the natural output basis of the
//! Laplacian, the (3/2, 3/2) Jacobi family.

use spectral_rs::operators::{diff, interp, lap, lift};
use spectral_rs::{
    CartesianCoordinates, CartesianSpace, Dtype, Expr, Field, FourierBasis, JacobiBasis, LiftBasis,
    LinearBoundaryValueSolver, Problem, SolverConfig,
};
use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Instant;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Parameters
    let nx = 256;
    let ny = 128;
    let lx = 2.0 * PI;
    let ly = 1.0;

    println!("2D Poisson LBVP");
    println!("===============");
    println!("Resolution: {nx} x {ny}");
    println!("Domain: [0, {lx:.4}] x [0, {ly}]");
    println!();

    // Bases
    let coords = CartesianCoordinates::new(&["x", "y"]);
    let x = coords.coord(0).clone();
    let y = coords.coord(1).clone();
    let xbasis = FourierBasis::real(x, nx, (0.0, lx), 1.0)?;
    let ybasis = Arc::new(JacobiBasis::chebyshev(y.clone(), ny, (0.0, ly), 1.0)?);
    let full = CartesianSpace::new(
        coords.clone(),
        Dtype::Real,
        vec![Some(xbasis.into()), Some(Arc::clone(&ybasis).into())],
    )?;
    let edge = full.restrict(1);

    // Fields
    let u = Field::scalar("u", full.clone().into())?.into_ref();
    let tau1 = Field::scalar("tau1", edge.clone().into())?.into_ref();
    let tau2 = Field::scalar("tau2", edge.clone().into())?.into_ref();

    // Forcing
    let mut f = Field::scalar("f", full.clone().into())?;
    f.set_grid_fn(|_, p| -10.0 * (p[0] / 2.0).sin().powi(2) * (p[1] - p[1] * p[1]))?;
    let mut g = Field::scalar("g", edge.clone().into())?;
    g.set_grid_fn(|_, p| (8.0 * p[0]).sin())?;
    let h = Field::constant(edge.into(), 0.0)?;
    let (f, g, h) = (f.into_ref(), g.into_ref(), h.into_ref());

    // Problem
    let lift_basis = LiftBasis::Interval(Arc::new(ybasis.clone_with(1.5, 1.5)?));
    let mut problem = Problem::lbvp(vec![Arc::clone(&u), Arc::clone(&tau1), Arc::clone(&tau2)])?;
    problem.add_equation(
        lap(&u) + lift(&tau1, lift_basis.clone(), -1) + lift(&tau2, lift_basis, -2),
        Expr::field(&f),
    )?;
    problem.add_equation(interp(&u, &y, 0.0), Expr::field(&g))?;
    problem.add_equation(interp(diff(&u, &y), &y, ly), Expr::field(&h))?;

    // Solver
    let start = Instant::now();
    let mut solver = LinearBoundaryValueSolver::new(problem, SolverConfig::default())?;
    solver.solve()?;
    println!("Solved in {:.3} s", start.elapsed().as_secs_f64());

    let ug = u.write().grid_real()?;
    let max = ug.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = ug.iter().copied().fold(f64::INFINITY, f64::min);
    println!("u range: [{min:.6}, {max:.6}]");

    // Boundary residual at y = 0
    let mut wall = spectral_rs::operators::evaluate(&(interp(&u, &y, 0.0) - Expr::field(&g)))?
        .into_field(&full.restrict(1).into())?;
    let residual = wall.grid_real()?.iter().map(|v| v.abs()).fold(0.0, f64::max);
    println!("max |u(y=0) - g|: {residual:.3e}");

    Ok(())
}
