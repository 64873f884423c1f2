//! Communicators: collective operations across ranks.
//!
//! [`SerialComm`] is the single-rank communicator. [`LocalComm`] runs ranks
//! as threads of one process and implements the collectives with a shared
//! slot table and a generation barrier.

use num_complex::Complex64;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Reduction applied by [`Communicator::all_reduce`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Max,
    Min,
}

impl ReduceOp {
    pub fn identity(self) -> f64 {
        match self {
            Self::Sum => 0.0,
            Self::Max => f64::NEG_INFINITY,
            Self::Min => f64::INFINITY,
        }
    }

    /// Combine two values. NaN wins so that non-finite data is never hidden.
    pub fn combine(self, a: f64, b: f64) -> f64 {
        if a.is_nan() || b.is_nan() {
            return f64::NAN;
        }
        match self {
            Self::Sum => a + b,
            Self::Max => a.max(b),
            Self::Min => a.min(b),
        }
    }
}

/// Collective operations between the ranks of a run.
///
/// Every rank must call each collective in the same order.
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn barrier(&self);

    /// Reduce one value per rank; every rank receives the result.
    fn all_reduce(&self, value: f64, op: ReduceOp) -> f64;

    /// Gather one buffer per rank; every rank receives all buffers in rank order.
    fn all_gather(&self, local: Vec<Complex64>) -> Vec<Vec<Complex64>>;
}

/// Single-rank communicator.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn all_reduce(&self, value: f64, op: ReduceOp) -> f64 {
        op.combine(op.identity(), value)
    }

    fn all_gather(&self, local: Vec<Complex64>) -> Vec<Vec<Complex64>> {
        vec![local]
    }
}

#[derive(Debug)]
struct BarrierState {
    waiting: usize,
    generation: u64,
}

#[derive(Debug)]
struct Shared {
    size: usize,
    slots: Mutex<Vec<Option<Vec<Complex64>>>>,
    barrier: Mutex<BarrierState>,
    released: Condvar,
}

impl Shared {
    fn wait(&self) {
        let mut state = self.barrier.lock();
        let generation = state.generation;
        state.waiting += 1;
        if state.waiting == self.size {
            state.waiting = 0;
            state.generation += 1;
            self.released.notify_all();
        } else {
            while state.generation == generation {
                self.released.wait(&mut state);
            }
        }
    }
}

/// Thread-backed communicator: one handle per rank, all sharing state.
#[derive(Clone, Debug)]
pub struct LocalComm {
    rank: usize,
    shared: Arc<Shared>,
}

impl LocalComm {
    /// Create `size` connected handles, one per rank.
    pub fn create(size: usize) -> Vec<LocalComm> {
        let shared = Arc::new(Shared {
            size,
            slots: Mutex::new(vec![None; size]),
            barrier: Mutex::new(BarrierState {
                waiting: 0,
                generation: 0,
            }),
            released: Condvar::new(),
        });
        (0..size)
            .map(|rank| LocalComm {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn barrier(&self) {
        self.shared.wait();
    }

    fn all_reduce(&self, value: f64, op: ReduceOp) -> f64 {
        let gathered = self.all_gather(vec![Complex64::new(value, 0.0)]);
        // Rank order keeps the result identical on every rank.
        gathered
            .iter()
            .map(|v| v.first().map_or(op.identity(), |c| c.re))
            .fold(op.identity(), |acc, v| op.combine(acc, v))
    }

    fn all_gather(&self, local: Vec<Complex64>) -> Vec<Vec<Complex64>> {
        self.shared.slots.lock()[self.rank] = Some(local);
        self.shared.wait();
        let gathered = self
            .shared
            .slots
            .lock()
            .iter()
            .map(|s| s.clone().unwrap_or_default())
            .collect();
        // Nobody may overwrite a slot before every rank has read it.
        self.shared.wait();
        gathered
    }
}
