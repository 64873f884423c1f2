//! Scheduled evaluation of output tasks.
//!
//! An [`OutputHandler`] owns a list of tasks and a schedule. Whenever the
//! solver clock crosses a new multiple of one of the handler's cadences,
//! every task is evaluated to real grid data and the resulting
//! [`OutputRecord`] is passed to the handler's [`OutputSink`]. Storage is
//! left to the sink.

use crate::basis::{Coord, CoordKind, SphereBasis};
use crate::distributor::Distributor;
use crate::error::{ExprError, Result, SpectralError};
use crate::field::{Field, Space, grid_axes};
use crate::operators::{Expr, Value, evaluate, interp};
use crate::solver::{Checkpoint, InitialValueSolver};
use num_complex::Complex64;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Destination of output records.
pub trait OutputSink: Send {
    fn write(&mut self, record: &OutputRecord) -> Result<()>;
}

/// Sink keeping every record in memory. Clones share the same buffer.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<OutputRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<OutputRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl OutputSink for MemorySink {
    fn write(&mut self, record: &OutputRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Real grid data of one task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub name: String,
    /// Components first, then the grid axes. Empty for constants.
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

/// Everything written by one handler at one output time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub handler: String,
    /// Set counter, starting at 1; a new set starts after `max_writes`
    pub set_number: usize,
    /// Write counter within the set, starting at 1
    pub write_number: usize,
    pub iteration: u64,
    pub sim_time: f64,
    pub wall_time: f64,
    pub timestep: Option<f64>,
    pub tasks: Vec<TaskOutput>,
    pub checkpoint: Option<Checkpoint>,
}

impl OutputRecord {
    pub fn task(&self, name: &str) -> Option<&TaskOutput> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

/// Output cadences of a handler. At least one must be set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HandlerConfig {
    pub name: String,
    /// Write every `iter` iterations
    pub iter: Option<u64>,
    /// Write every `sim_dt` units of simulation time
    pub sim_dt: Option<f64>,
    /// Write every `wall_dt` seconds of wall time
    pub wall_dt: Option<f64>,
    /// Writes per set
    pub max_writes: Option<usize>,
}

impl HandlerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            iter: None,
            sim_dt: None,
            wall_dt: None,
            max_writes: None,
        }
    }

    pub fn with_iter(mut self, iter: u64) -> Self {
        self.iter = Some(iter);
        self
    }

    pub fn with_sim_dt(mut self, dt: f64) -> Self {
        self.sim_dt = Some(dt);
        self
    }

    pub fn with_wall_dt(mut self, dt: f64) -> Self {
        self.wall_dt = Some(dt);
        self
    }

    pub fn with_max_writes(mut self, n: usize) -> Self {
        self.max_writes = Some(n);
        self
    }

    fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(SpectralError::Output(format!("handler '{}': {msg}", self.name)));
        if self.iter.is_none() && self.sim_dt.is_none() && self.wall_dt.is_none() {
            return invalid("no cadence set".into());
        }
        if self.iter == Some(0) {
            return invalid("iter must be positive".into());
        }
        for (label, dt) in [("sim_dt", self.sim_dt), ("wall_dt", self.wall_dt)] {
            if dt.is_some_and(|dt| dt.is_nan() || dt <= 0.0) {
                return invalid(format!("{label} must be positive"));
            }
        }
        if self.max_writes == Some(0) {
            return invalid("max_writes must be positive".into());
        }
        Ok(())
    }
}

/// Solver clock seen by the handlers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Clock {
    pub iteration: u64,
    pub sim_time: f64,
    pub wall_time: f64,
    pub timestep: Option<f64>,
}

impl Clock {
    pub fn of(solver: &InitialValueSolver) -> Self {
        Self {
            iteration: solver.iteration(),
            sim_time: solver.sim_time(),
            wall_time: solver.wall_time(),
            timestep: solver.timestep(),
        }
    }
}

/// Last cadence divisions seen; a write is due when any division grows.
/// Counters start below zero so the first evaluation always writes.
#[derive(Clone, Copy, Debug)]
struct Divisions {
    iter: i64,
    sim: i64,
    wall: i64,
}

impl Default for Divisions {
    fn default() -> Self {
        Self {
            iter: -1,
            sim: -1,
            wall: -1,
        }
    }
}

#[derive(Debug)]
enum Task {
    Expr(Expr),
    /// Grid line of an azimuthal or colatitude slice.
    Angular { expr: Expr, axis: usize, position: f64 },
}

/// A set of tasks written together on a schedule.
pub struct OutputHandler {
    config: HandlerConfig,
    tasks: Vec<(String, Task)>,
    sink: Box<dyn OutputSink>,
    checkpoint: bool,
    last: Divisions,
    set_number: usize,
    write_number: usize,
    total_writes: usize,
}

impl std::fmt::Debug for OutputHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputHandler")
            .field("config", &self.config)
            .field("tasks", &self.tasks.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("checkpoint", &self.checkpoint)
            .field("total_writes", &self.total_writes)
            .finish()
    }
}

impl OutputHandler {
    pub fn new(config: HandlerConfig, sink: impl OutputSink + 'static) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            tasks: Vec::new(),
            sink: Box::new(sink),
            checkpoint: false,
            last: Divisions::default(),
            set_number: 1,
            write_number: 0,
            total_writes: 0,
        })
    }

    /// Also emit the full solver state with every record.
    pub fn with_checkpoint(mut self) -> Self {
        self.checkpoint = true;
        self
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    pub fn total_writes(&self) -> usize {
        self.total_writes
    }

    pub fn add_task(&mut self, expr: impl Into<Expr>, name: impl Into<String>) {
        self.tasks.push((name.into(), Task::Expr(expr.into())));
    }

    /// Track `expr` restricted to `coord = position`.
    ///
    /// Cartesian axes and the ball radius are interpolated exactly in
    /// coefficient space. Azimuthal slices of the ball or sphere are exact
    /// as well; colatitude slices take the nearest grid line.
    pub fn add_slice(
        &mut self,
        expr: impl Into<Expr>,
        coord: &Coord,
        position: f64,
        name: impl Into<String>,
    ) -> Result<()> {
        let expr = expr.into();
        let task = match (expr.space()?, coord.kind()) {
            (Some(Space::Cartesian(_)), CoordKind::Cartesian) => Task::Expr(interp(expr, coord, position)),
            (Some(Space::Ball(b)), CoordKind::Spherical) if coord == b.coords().r() => {
                Task::Expr(interp(expr, coord, position))
            }
            (Some(Space::Ball(_) | Space::Sphere(_)), CoordKind::Spherical) if coord.axis() < 2 => Task::Angular {
                expr,
                axis: coord.axis(),
                position,
            },
            (space, _) => {
                return Err(ExprError::Unsupported {
                    op: "slice",
                    reason: format!(
                        "cannot slice a {} along '{coord}'",
                        space.as_ref().map_or("constant", Space::kind)
                    ),
                }
                .into());
            }
        };
        self.tasks.push((name.into(), task));
        Ok(())
    }

    /// Whether the clock has crossed a new cadence division since the last
    /// check. Divisions start from zero, so nothing is written at the start
    /// of a fresh run.
    fn due(&mut self, clock: &Clock) -> bool {
        let mut due = false;
        if let Some(n) = self.config.iter {
            let div = (clock.iteration / n) as i64;
            if div > self.last.iter {
                self.last.iter = div;
                due = true;
            }
        }
        if let Some(dt) = self.config.sim_dt {
            let div = (clock.sim_time / dt).floor() as i64;
            if div > self.last.sim {
                self.last.sim = div;
                due = true;
            }
        }
        if let Some(dt) = self.config.wall_dt {
            let div = (clock.wall_time / dt).floor() as i64;
            if div > self.last.wall {
                self.last.wall = div;
                due = true;
            }
        }
        due
    }

    fn write(&mut self, clock: &Clock, checkpoint: Option<Checkpoint>, emit: bool) -> Result<()> {
        if self.config.max_writes.is_some_and(|m| self.write_number >= m) {
            self.set_number += 1;
            self.write_number = 0;
        }
        let tasks = self
            .tasks
            .iter()
            .map(|(name, task)| evaluate_task(name, task))
            .collect::<Result<Vec<_>>>()?;
        self.write_number += 1;
        self.total_writes += 1;
        let record = OutputRecord {
            handler: self.config.name.clone(),
            set_number: self.set_number,
            write_number: self.write_number,
            iteration: clock.iteration,
            sim_time: clock.sim_time,
            wall_time: clock.wall_time,
            timestep: clock.timestep,
            tasks,
            checkpoint,
        };
        if emit {
            self.sink.write(&record)?;
        }
        log::debug!(
            "handler '{}' wrote set {} write {} at iteration {}",
            record.handler,
            record.set_number,
            record.write_number,
            record.iteration
        );
        Ok(())
    }
}

/// Collection of output handlers driven by one solver.
#[derive(Debug)]
pub struct Evaluator {
    distributor: Distributor,
    handlers: Vec<OutputHandler>,
}

impl Evaluator {
    pub fn new(distributor: Distributor) -> Self {
        Self {
            distributor,
            handlers: Vec::new(),
        }
    }

    /// Register a handler; returns its index.
    pub fn add_handler(&mut self, handler: OutputHandler) -> usize {
        self.handlers.push(handler);
        self.handlers.len() - 1
    }

    pub fn handler(&self, index: usize) -> Option<&OutputHandler> {
        self.handlers.get(index)
    }

    pub fn handler_mut(&mut self, index: usize) -> Option<&mut OutputHandler> {
        self.handlers.get_mut(index)
    }

    /// Write every handler whose schedule is due. Returns how many wrote.
    pub fn evaluate_handlers(&mut self, solver: &InitialValueSolver) -> Result<usize> {
        self.evaluate_scheduled(&Clock::of(solver), || solver.serialize_state())
    }

    /// Write every handler now, regardless of schedules.
    pub fn evaluate_all(&mut self, solver: &InitialValueSolver) -> Result<usize> {
        let clock = Clock::of(solver);
        let emit = self.distributor.rank() == 0;
        for h in &mut self.handlers {
            let checkpoint = if h.checkpoint { Some(solver.serialize_state()?) } else { None };
            h.write(&clock, checkpoint, emit)?;
        }
        Ok(self.handlers.len())
    }

    /// Scheduled writes at `clock`. Every rank evaluates the tasks; only
    /// rank 0 hands records to the sinks.
    pub fn evaluate_scheduled(&mut self, clock: &Clock, state: impl Fn() -> Result<Checkpoint>) -> Result<usize> {
        let emit = self.distributor.rank() == 0;
        let mut written = 0;
        for h in &mut self.handlers {
            if !h.due(clock) {
                continue;
            }
            let checkpoint = if h.checkpoint { Some(state()?) } else { None };
            h.write(clock, checkpoint, emit)?;
            written += 1;
        }
        Ok(written)
    }
}

fn evaluate_task(name: &str, task: &Task) -> Result<TaskOutput> {
    let (expr, angular) = match task {
        Task::Expr(e) => (e, None),
        Task::Angular { expr, axis, position } => (expr, Some((*axis, *position))),
    };
    let mut field = match evaluate(expr)? {
        Value::Constant(c) => {
            return Ok(TaskOutput {
                name: name.to_string(),
                shape: Vec::new(),
                data: vec![c],
            });
        }
        Value::Field(f) => f,
    };
    let (shape, data) = match angular {
        None => {
            let mut shape = vec![field.n_components()];
            shape.extend(grid_axes(field.space()).iter().map(Vec::len));
            (shape, field.grid_real()?)
        }
        Some((axis, position)) => angular_slice(&mut field, axis, position)?,
    };
    Ok(TaskOutput {
        name: name.to_string(),
        shape,
        data,
    })
}

/// Slice of a ball or sphere field at fixed φ (`axis` 0) or θ (`axis` 1).
fn angular_slice(field: &mut Field, axis: usize, position: f64) -> Result<(Vec<usize>, Vec<f64>)> {
    let space = field.space().clone();
    let sphere: &SphereBasis = match &space {
        Space::Ball(b) => b.sphere(),
        Space::Sphere(s) => &**s,
        Space::Cartesian(_) => {
            return Err(ExprError::Unsupported {
                op: "slice",
                reason: "angular slices need a spherical space".into(),
            }
            .into());
        }
    };
    let axes = grid_axes(&space);
    let n_comp = field.n_components();
    let n_phi = axes[0].len();
    let n_theta = axes[1].len();
    // Radial points per (φ, θ), 1 on a sphere.
    let n_r: usize = axes[2..].iter().map(Vec::len).product();
    let per = n_phi * n_theta * n_r;
    let g = field.grid()?;
    let mut data = Vec::new();
    let shape = if axis == 0 {
        for c in 0..n_comp {
            for j in 0..n_theta * n_r {
                let line: Vec<Complex64> = (0..n_phi).map(|i| g[c * per + i * n_theta * n_r + j]).collect();
                let coeffs = sphere.phi_forward(&line)?;
                data.push(sphere.value_at_phi(&coeffs, position)?.re);
            }
        }
        vec![n_comp, n_theta, n_r]
    } else {
        let k = nearest(&axes[1], position);
        for c in 0..n_comp {
            for i in 0..n_phi {
                let start = c * per + (i * n_theta + k) * n_r;
                data.extend(g[start..start + n_r].iter().map(|v| v.re));
            }
        }
        vec![n_comp, n_phi, n_r]
    };
    let shape = if axes.len() == 2 { shape[..2].to_vec() } else { shape };
    Ok((shape, data))
}

fn nearest(nodes: &[f64], x: f64) -> usize {
    nodes
        .iter()
        .enumerate()
        .min_by(|a, b| (a.1 - x).abs().total_cmp(&(b.1 - x).abs()))
        .map_or(0, |(i, _)| i)
}
