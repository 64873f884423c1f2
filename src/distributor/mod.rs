//! Parallel decomposition.
//!
//! Field data is replicated on every rank, so transforms need no
//! communication. The expensive work, per-pencil factorization and solves,
//! is split into contiguous blocks of pencil groups across the ranks and
//! recombined with an all-gather. Grid reductions are taken over a block of
//! the first grid axis and combined with an all-reduce.

mod comm;

pub use comm::{Communicator, LocalComm, ReduceOp, SerialComm};

use crate::error::{Result, SpectralError};
use std::ops::Range;
use std::sync::Arc;

/// Logical arrangement of ranks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessMesh {
    dims: Vec<usize>,
}

impl ProcessMesh {
    /// A mesh with the given extents; `None` means a 1-D mesh of `size` ranks.
    pub fn new(dims: Option<Vec<usize>>, size: usize) -> Result<Self> {
        let dims = dims.unwrap_or_else(|| vec![size]);
        let product: usize = dims.iter().product();
        if product != size {
            return Err(SpectralError::Mesh(format!(
                "mesh {dims:?} has {product} ranks, communicator has {size}"
            )));
        }
        Ok(Self { dims })
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Mesh coordinates of `rank` (row-major).
    pub fn coords(&self, rank: usize) -> Vec<usize> {
        let mut rem = rank;
        let mut out = vec![0; self.dims.len()];
        for (i, d) in self.dims.iter().enumerate().rev() {
            out[i] = rem % d;
            rem /= d;
        }
        out
    }
}

/// Contiguous block of `n` items owned by `rank` out of `size`.
///
/// The first `n % size` ranks get one extra item.
pub fn block_range(n: usize, rank: usize, size: usize) -> Range<usize> {
    let base = n / size;
    let extra = n % size;
    let start = rank * base + rank.min(extra);
    let len = base + usize::from(rank < extra);
    start..start + len
}

/// Owns the communicator and the process mesh.
#[derive(Clone)]
pub struct Distributor {
    comm: Arc<dyn Communicator>,
    mesh: ProcessMesh,
}

impl std::fmt::Debug for Distributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Distributor")
            .field("rank", &self.comm.rank())
            .field("mesh", &self.mesh)
            .finish()
    }
}

impl Default for Distributor {
    fn default() -> Self {
        Self::serial()
    }
}

impl Distributor {
    pub fn new(comm: Arc<dyn Communicator>, mesh: Option<Vec<usize>>) -> Result<Self> {
        let mesh = ProcessMesh::new(mesh, comm.size())?;
        Ok(Self { comm, mesh })
    }

    pub fn serial() -> Self {
        Self {
            comm: Arc::new(SerialComm),
            mesh: ProcessMesh { dims: vec![1] },
        }
    }

    pub fn comm(&self) -> &dyn Communicator {
        self.comm.as_ref()
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn size(&self) -> usize {
        self.comm.size()
    }

    pub fn mesh(&self) -> &ProcessMesh {
        &self.mesh
    }

    /// Items of a length-`n` list handled by this rank.
    pub fn local_block(&self, n: usize) -> Range<usize> {
        block_range(n, self.rank(), self.size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_ranges_cover_everything_once() {
        let n = 11;
        let size = 4;
        let mut seen = vec![0; n];
        for rank in 0..size {
            for i in block_range(n, rank, size) {
                seen[i] += 1;
            }
        }
        assert!(seen.iter().all(|&c| c == 1));
        assert_eq!(block_range(11, 0, 4), 0..3);
        assert_eq!(block_range(11, 3, 4), 9..11);
    }

    #[test]
    fn test_mesh_coords() {
        let mesh = ProcessMesh::new(Some(vec![2, 3]), 6).unwrap();
        assert_eq!(mesh.coords(4), vec![1, 1]);
        assert!(ProcessMesh::new(Some(vec![2, 2]), 6).is_err());
    }

    #[test]
    fn test_more_ranks_than_items() {
        assert_eq!(block_range(2, 3, 4), 2..2);
    }
}
