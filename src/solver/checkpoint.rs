//! Serializable solver state.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Clock and coefficients of every unknown at one iteration.
///
/// The storage format is up to the caller; this only fixes the mapping
/// from field names to coefficient buffers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub iteration: u64,
    pub sim_time: f64,
    /// Last step size taken, if any.
    pub timestep: Option<f64>,
    pub fields: BTreeMap<String, Vec<Complex64>>,
}

impl Checkpoint {
    pub fn field(&self, name: &str) -> Option<&[Complex64]> {
        self.fields.get(name).map(Vec::as_slice)
    }
}
