//! Global reductions of named flow diagnostics.
//!
//! Properties are evaluated on a fixed iteration cadence and reduced over
//! all ranks on request, e.g. the maximum Reynolds number of a run.

use super::reduce::{LocalGrid, all_reduce, grid_weights};
use crate::distributor::{Distributor, ReduceOp};
use crate::error::{CflError, ExprError, Result, SpectralError};
use crate::field::Space;
use crate::operators::{Expr, Value, evaluate};

/// Latest evaluation of one property.
#[derive(Clone, Debug)]
enum Sample {
    Constant(f64),
    Grid { space: Space, rank: usize, data: Vec<f64> },
}

#[derive(Clone, Debug)]
struct Property {
    name: String,
    expr: Expr,
    sample: Option<Sample>,
}

/// Named diagnostics reduced across the process mesh.
#[derive(Debug)]
pub struct GlobalFlowProperty {
    distributor: Distributor,
    cadence: u64,
    properties: Vec<Property>,
}

impl GlobalFlowProperty {
    pub fn new(distributor: Distributor, cadence: u64) -> Result<Self> {
        if cadence == 0 {
            return Err(CflError::InvalidConfig("flow property cadence must be positive".into()).into());
        }
        Ok(Self {
            distributor,
            cadence,
            properties: Vec::new(),
        })
    }

    pub fn cadence(&self) -> u64 {
        self.cadence
    }

    /// Track `expr` under `name`, replacing any property of the same name.
    pub fn add_property(&mut self, expr: impl Into<Expr>, name: impl Into<String>) {
        let name = name.into();
        let expr = expr.into();
        match self.properties.iter_mut().find(|p| p.name == name) {
            Some(p) => {
                p.expr = expr;
                p.sample = None;
            }
            None => self.properties.push(Property {
                name,
                expr,
                sample: None,
            }),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().map(|p| p.name.as_str())
    }

    /// Re-evaluate every property if `iteration` falls on the cadence.
    /// Returns whether an evaluation happened.
    pub fn update(&mut self, iteration: u64) -> Result<bool> {
        if iteration % self.cadence != 0 {
            return Ok(false);
        }
        self.evaluate_all()?;
        Ok(true)
    }

    /// Evaluate every property now, regardless of the cadence.
    pub fn evaluate_all(&mut self) -> Result<()> {
        for p in &mut self.properties {
            let sample = match evaluate(&p.expr)? {
                Value::Constant(c) => Sample::Constant(c),
                Value::Field(mut f) => Sample::Grid {
                    space: f.space().clone(),
                    rank: f.rank(),
                    data: f.grid_real()?,
                },
            };
            p.sample = Some(sample);
        }
        log::debug!("evaluated {} flow properties", self.properties.len());
        Ok(())
    }

    /// Global maximum over all grid points and components.
    pub fn max(&self, name: &str) -> Result<f64> {
        self.reduce_points(name, ReduceOp::Max)
    }

    /// Global minimum over all grid points and components.
    pub fn min(&self, name: &str) -> Result<f64> {
        self.reduce_points(name, ReduceOp::Min)
    }

    /// Unweighted mean over all grid points and components.
    pub fn grid_average(&self, name: &str) -> Result<f64> {
        match self.sample(name)? {
            Sample::Constant(c) => Ok(*c),
            Sample::Grid { space, data, .. } => {
                let sum = all_reduce(&self.distributor, local_values(space, data, &self.distributor), ReduceOp::Sum);
                Ok(sum / data.len() as f64)
            }
        }
    }

    /// Quadrature-weighted mean of a scalar property over the domain.
    pub fn volume_average(&self, name: &str) -> Result<f64> {
        match self.sample(name)? {
            Sample::Constant(c) => Ok(*c),
            Sample::Grid { space, rank, data } => {
                if *rank != 0 {
                    return Err(ExprError::RankMismatch {
                        op: "volume average",
                        left: 0,
                        right: *rank,
                    }
                    .into());
                }
                let weights = grid_weights(space)?;
                let grid = LocalGrid::new(space, &self.distributor);
                let weight = |flat: usize| -> f64 {
                    grid.unravel(flat)
                        .iter()
                        .zip(&weights)
                        .map(|(&i, w)| w[i])
                        .product()
                };
                let integral = all_reduce(
                    &self.distributor,
                    grid.local.clone().map(|i| data[i] * weight(i)),
                    ReduceOp::Sum,
                );
                let volume = all_reduce(&self.distributor, grid.local.clone().map(weight), ReduceOp::Sum);
                Ok(integral / volume)
            }
        }
    }

    fn reduce_points(&self, name: &str, op: ReduceOp) -> Result<f64> {
        match self.sample(name)? {
            Sample::Constant(c) => Ok(*c),
            Sample::Grid { space, data, .. } => {
                Ok(all_reduce(&self.distributor, local_values(space, data, &self.distributor), op))
            }
        }
    }

    fn sample(&self, name: &str) -> Result<&Sample> {
        let property = self
            .properties
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ExprError::Unsupported {
                op: "flow property",
                reason: format!("no property named {name:?}"),
            })?;
        property.sample.as_ref().ok_or(SpectralError::InvalidState {
            state: "not evaluated",
            action: "reduce a flow property",
        })
    }
}

/// Values of every component on the local grid block.
fn local_values<'a>(space: &Space, data: &'a [f64], distributor: &Distributor) -> impl Iterator<Item = f64> + 'a {
    let grid = LocalGrid::new(space, distributor);
    let per = grid.per_component.max(1);
    let local = grid.local;
    (0..data.len() / per).flat_map(move |c| local.clone().map(move |i| data[c * per + i]))
}
