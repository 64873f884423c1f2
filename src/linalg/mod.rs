//! Sparse storage and dense factorization for per-pencil systems.

mod csr;
mod lu;

pub use csr::{CsrBuilder, CsrMatrix};
pub use lu::LuFactor;
