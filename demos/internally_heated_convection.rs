//! Internally heated convection in a full ball.
//!
//! Boussinesq equations with a constant internal heat source:
//! - dt(u) + grad(p) - 1/R lap(u) - r T = -curl(u) × u
//! - div(u) = 0
//! - dt(T) - 1/P lap(T) = -u·grad(T) + S/P
//!
//! with R = sqrt(Ra Pr) and P = sqrt(Ra / Pr). The outer boundary is
//! stress free, impenetrable and held at T = 0, so the conductive
//! equilibrium is T = S/6 (1 - r²).
//!
//! Runs to t = 10 and writes slices and checkpoints as JSON lines under
//! `output/`. Run again with `--restart` to continue from the latest
//! checkpoint to t = 20. `--low-res` uses a coarse grid for quick tests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use spectral_rs::operators::{
    angular, cross, curl, ddt, div, dot, grad, interp, lap, lift, radial, radial_vector, sqrt, trans,
};
use spectral_rs::problem::Condition;
use spectral_rs::{
    BallBasis, Cfl, CflConfig, Checkpoint, Dtype, Evaluator, Field, GlobalFlowProperty, HandlerConfig,
    InitialValueSolver, MultistepScheme, OutputHandler, OutputRecord, OutputSink, Problem, SolverConfig,
    Space, SpectralError, SphericalCoordinates,
};
use std::f64::consts::PI;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Appends records as JSON lines, one file per handler set.
struct JsonLinesSink {
    dir: PathBuf,
}

impl JsonLinesSink {
    fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

impl OutputSink for JsonLinesSink {
    fn write(&mut self, record: &OutputRecord) -> spectral_rs::Result<()> {
        let path = self.dir.join(format!("{}_s{}.jsonl", record.handler, record.set_number));
        let io = |e: std::io::Error| SpectralError::Output(format!("{}: {e}", path.display()));
        let mut file = OpenOptions::new().create(true).append(true).open(&path).map_err(io)?;
        let line = serde_json::to_string(record).map_err(|e| SpectralError::Output(e.to_string()))?;
        writeln!(file, "{line}").map_err(io)?;
        Ok(())
    }
}

/// Last checkpoint in the highest-numbered checkpoint set.
fn latest_checkpoint(dir: &Path) -> Result<Checkpoint, Box<dyn std::error::Error>> {
    let mut latest: Option<(usize, PathBuf)> = None;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let set = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix("checkpoints_s"))
            .and_then(|n| n.strip_suffix(".jsonl"))
            .and_then(|n| n.parse::<usize>().ok());
        if let Some(set) = set {
            if latest.as_ref().is_none_or(|(s, _)| set > *s) {
                latest = Some((set, path));
            }
        }
    }
    let (_, path) = latest.ok_or("no checkpoint sets found")?;
    let line = BufReader::new(File::open(&path)?)
        .lines()
        .last()
        .ok_or("empty checkpoint file")??;
    let record: OutputRecord = serde_json::from_str(&line)?;
    Ok(record.checkpoint.ok_or("record without checkpoint")?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args: Vec<String> = std::env::args().collect();
    let restart = args.iter().any(|a| a == "--restart");
    let low_res = args.iter().any(|a| a == "--low-res");

    // Parameters
    let (n_phi, n_theta, n_r) = if low_res { (16, 8, 8) } else { (128, 64, 48) };
    let dealias = 1.5;
    let t_end = if restart { 20.0 } else { 10.01 };
    let rayleigh: f64 = 1e6;
    let prandtl: f64 = 1.0;
    let r_number = (rayleigh * prandtl).sqrt();
    let p_number = (rayleigh / prandtl).sqrt();
    let t_source = 6.0;

    // Bases
    let coords = SphericalCoordinates::new("phi", "theta", "r");
    let ball = Arc::new(BallBasis::new(coords.clone(), (n_phi, n_theta, n_r), 1.0, dealias, Dtype::Real)?);
    let volume = Space::from(Arc::clone(&ball));
    let surface = Space::Sphere(ball.surface());
    let r = coords.r();

    // Fields
    let u = Field::vector("u", volume.clone())?.into_ref();
    let p = Field::scalar("p", volume.clone())?.into_ref();
    let t = Field::scalar("T", volume.clone())?.into_ref();
    let tau_u = Field::vector("tau u", surface.clone())?.into_ref();
    let tau_t = Field::scalar("tau T", surface)?.into_ref();
    let lb = ball.lift_basis(2);

    // Problem
    let strain_rate = grad(&u) + trans(grad(&u));
    let shear_stress = angular(radial(interp(strain_rate, r, 1.0)));
    let mut problem = Problem::ivp(vec![
        Arc::clone(&u),
        Arc::clone(&p),
        Arc::clone(&t),
        Arc::clone(&tau_u),
        Arc::clone(&tau_t),
    ])?;
    problem.add_equation(
        ddt(&u) - (1.0 / r_number) * lap(&u) + grad(&p) + lift(&tau_u, lb.clone(), -1) - radial_vector(&ball) * &t,
        -cross(curl(&u), &u),
    )?;
    problem.add_equation(div(&u), 0.0)?;
    problem.add_equation(
        ddt(&t) - (1.0 / p_number) * lap(&t) + lift(&tau_t, lb, -1),
        -dot(&u, grad(&t)) + t_source / p_number,
    )?;
    problem.add_equation_if(radial(interp(&u, r, 1.0)), 0.0, Condition::ell_ne(0))?;
    problem.add_equation_if(interp(&p, r, 1.0), 0.0, Condition::ell_eq(0))?;
    problem.add_equation(shear_stress, 0.0)?;
    problem.add_equation(interp(&t, r, 1.0), 0.0)?;
    log::info!("problem built");

    // Solver
    let config = SolverConfig::default()
        .with_scheme(MultistepScheme::Sbdf2)
        .with_hermitian_cadence(Some(100))
        .with_stop_sim_time(t_end);
    let mut solver = InitialValueSolver::new(problem, config)?;
    let distributor = solver.distributor().clone();

    // Initial condition
    let dt = if restart {
        let checkpoint = latest_checkpoint(Path::new("output"))?;
        solver.deserialize_state(&checkpoint)?;
        checkpoint.timestep.unwrap_or(0.05)
    } else {
        let mut rng = StdRng::seed_from_u64(42 + distributor.rank() as u64);
        let mut temperature = t.write();
        temperature.set_grid_fn(|_, x| 1.0 - x[2] * x[2])?;
        for v in temperature.grid_mut()? {
            v.re += 0.5 * rng.r#gen::<f64>();
        }
        0.05
    };

    // Analysis
    let mut evaluator = Evaluator::new(distributor.clone());
    let mut slices = OutputHandler::new(
        HandlerConfig::new("slices").with_sim_dt(0.1).with_max_writes(10),
        JsonLinesSink::new("output")?,
    )?;
    slices.add_slice(&t, coords.theta(), PI / 2.0, "T eq")?;
    slices.add_slice(&t, coords.phi(), 0.0, "T mer right")?;
    slices.add_slice(&t, coords.phi(), PI, "T mer left")?;
    slices.add_slice(&t, r, 0.5, "T r=0.5")?;
    evaluator.add_handler(slices);
    let checkpoints = OutputHandler::new(
        HandlerConfig::new("checkpoints").with_sim_dt(1.0).with_max_writes(1),
        JsonLinesSink::new("output")?,
    )?
    .with_checkpoint();
    evaluator.add_handler(checkpoints);

    // Report maximum |u|
    let mut flow = GlobalFlowProperty::new(distributor.clone(), 10)?;
    flow.add_property(sqrt(dot(&u, &u)), "|u|");
    flow.evaluate_all()?;

    // CFL
    let cfl_config = CflConfig::default()
        .with_cadence(1)
        .with_safety(0.35)
        .with_threshold(0.1)
        .with_max_dt(0.05);
    let mut cfl = Cfl::new(dt, cfl_config, distributor)?;
    cfl.add_velocity(&u)?;

    // Main loop
    let start = Instant::now();
    evaluator.evaluate_handlers(&solver)?;
    while solver.proceed() {
        let dt = cfl.compute_timestep(solver.iteration())?;
        solver.step(dt)?;
        flow.update(solver.iteration())?;
        evaluator.evaluate_handlers(&solver)?;
        if (solver.iteration() - 1) % 10 == 0 {
            log::info!(
                "t = {:.6}, dt = {:.6}, |u|_max = {:.6e}",
                solver.sim_time(),
                dt,
                flow.max("|u|")?
            );
        }
    }
    log::info!("run time: {:.3} s", start.elapsed().as_secs_f64());
    println!(
        "finished at iteration {}, t = {:.4} ({})",
        solver.iteration(),
        solver.sim_time(),
        solver.stop_reason().unwrap_or("running")
    );
    Ok(())
}
