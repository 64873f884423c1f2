//! Diagnostics and output around a running solver.
//!
//! This module provides:
//! - A CFL step-size controller ([`Cfl`])
//! - Global reductions of named flow properties ([`GlobalFlowProperty`])
//! - Scheduled output handlers and slices ([`Evaluator`])
//!
//! Field data is replicated on every rank. Reductions split the grid into
//! per-rank blocks and combine the partial results over the communicator,
//! so every rank must call them collectively.

mod cfl;
mod evaluator;
mod flow;
mod reduce;

pub use cfl::{Cfl, CflConfig};
pub use evaluator::{
    Clock, Evaluator, HandlerConfig, MemorySink, OutputHandler, OutputRecord, OutputSink, TaskOutput,
};
pub use flow::GlobalFlowProperty;
