//! Environment contract: process grid, neighbour exchange, timing, reduction
//!
//! The sweep core sees its surroundings only through the [`Env`] trait:
//! where this rank sits on the `nproc_x x nproc_y` grid, how to move a face
//! slice to or from a neighbour, a globally synchronized clock, and a global
//! sum. Two implementations are provided:
//!
//! - [`SerialEnv`]: the 1x1 grid. Exchange methods are unreachable and abort
//!   if called; everything else is trivial.
//! - [`ThreadedEnv`]: an in-process grid where each rank runs on its own OS
//!   thread and face slices travel over per-edge channels. Messages carry a
//!   `(step, octant_in_block, kind)` tag; a received tag that does not match
//!   the expectation is a programming error in the schedule and aborts.
//!
//! Channel sends never block, so a send can always be posted before its
//! matching receive exists. Receives block until the upstream rank has
//! finished the step that produces the data, which is exactly the pipeline
//! dependency.

use std::collections::HashMap;
use std::sync::{Arc, Barrier, Mutex};
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::P;

/// Which face plane a message carries.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FaceKind {
    /// xy plane (z pipeline; never crosses ranks).
    Xy,
    /// xz plane (crosses y-neighbours).
    Xz,
    /// yz plane (crosses x-neighbours).
    Yz,
}

/// Exchange tag identifying one face transfer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FaceTag {
    /// Global step the data belongs to (receiver's step).
    pub step: usize,
    /// Octant slot within the block.
    pub octant_in_block: usize,
    /// Face plane.
    pub kind: FaceKind,
}

/// Environment failures surfaced to the driver. Fatal at the core level.
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    /// A neighbour went away mid-exchange (its thread panicked or exited).
    #[error("neighbour rank ({0}, {1}) disconnected during face exchange")]
    Disconnected(usize, usize),
    /// No channel exists toward the addressed rank.
    #[error("no route to rank ({0}, {1})")]
    NoRoute(usize, usize),
}

/// One face-slice message.
#[derive(Debug)]
pub struct FaceMsg {
    /// Tag the sender stamped on the transfer.
    pub tag: FaceTag,
    /// Face values, gathered over all energy groups.
    pub data: Vec<P>,
}

/// Contract between the sweep core and its surroundings.
pub trait Env {
    /// Ranks along x.
    fn nproc_x(&self) -> usize;
    /// Ranks along y.
    fn nproc_y(&self) -> usize;
    /// This rank's x coordinate.
    fn proc_x(&self) -> usize;
    /// This rank's y coordinate.
    fn proc_y(&self) -> usize;

    /// Whether this rank owns the low-x global boundary.
    fn is_proc_x_min(&self) -> bool {
        self.proc_x() == 0
    }

    /// Whether this rank owns the high-x global boundary.
    fn is_proc_x_max(&self) -> bool {
        self.proc_x() + 1 == self.nproc_x()
    }

    /// Whether this rank owns the low-y global boundary.
    fn is_proc_y_min(&self) -> bool {
        self.proc_y() == 0
    }

    /// Whether this rank owns the high-y global boundary.
    fn is_proc_y_max(&self) -> bool {
        self.proc_y() + 1 == self.nproc_y()
    }

    /// Post a face slice to a neighbour rank. Must not block.
    fn send_face(&self, to: (usize, usize), tag: FaceTag, data: Vec<P>) -> Result<(), EnvError>;

    /// Receive the face slice owed by a neighbour rank for `tag`. Blocks
    /// until the neighbour has produced it.
    fn recv_face(&self, from: (usize, usize), tag: FaceTag) -> Result<Vec<P>, EnvError>;

    /// A clock reading taken at the same point of execution on every rank.
    fn synced_time(&self) -> Instant;

    /// Global sum over all ranks. Every rank must call this the same number
    /// of times in the same order.
    fn sum_d(&self, x: f64) -> f64;
}

// ============================================================================
// Single-rank environment
// ============================================================================

/// The 1x1 process grid.
#[derive(Copy, Clone, Debug, Default)]
pub struct SerialEnv;

impl Env for SerialEnv {
    fn nproc_x(&self) -> usize {
        1
    }

    fn nproc_y(&self) -> usize {
        1
    }

    fn proc_x(&self) -> usize {
        0
    }

    fn proc_y(&self) -> usize {
        0
    }

    fn send_face(&self, to: (usize, usize), _tag: FaceTag, _data: Vec<P>) -> Result<(), EnvError> {
        panic!("single-rank environment has no neighbours (send to ({}, {}))", to.0, to.1);
    }

    fn recv_face(&self, from: (usize, usize), _tag: FaceTag) -> Result<Vec<P>, EnvError> {
        panic!("single-rank environment has no neighbours (recv from ({}, {}))", from.0, from.1);
    }

    fn synced_time(&self) -> Instant {
        Instant::now()
    }

    fn sum_d(&self, x: f64) -> f64 {
        x
    }
}

// ============================================================================
// In-process multi-rank environment
// ============================================================================

/// Shared all-reduce state for one grid.
struct Reduction {
    barrier: Barrier,
    acc: Mutex<f64>,
}

/// One rank of an in-process grid. Build the whole grid with
/// [`ThreadedEnv::grid`] and move each value onto its rank's thread.
pub struct ThreadedEnv {
    nproc_x: usize,
    nproc_y: usize,
    proc_x: usize,
    proc_y: usize,
    senders: HashMap<(usize, usize), Sender<FaceMsg>>,
    receivers: HashMap<(usize, usize), Receiver<FaceMsg>>,
    red: Arc<Reduction>,
}

impl ThreadedEnv {
    /// Build the channel mesh for an `nproc_x x nproc_y` grid. Returns one
    /// environment per rank, x-major (rank `(px, py)` at `px + nproc_x*py`).
    pub fn grid(nproc_x: usize, nproc_y: usize) -> Vec<ThreadedEnv> {
        assert!(nproc_x > 0 && nproc_y > 0, "process grid must be at least 1x1");
        let n = nproc_x * nproc_y;
        let rank = |px: usize, py: usize| px + nproc_x * py;

        let mut senders: Vec<HashMap<(usize, usize), Sender<FaceMsg>>> =
            (0..n).map(|_| HashMap::new()).collect();
        let mut receivers: Vec<HashMap<(usize, usize), Receiver<FaceMsg>>> =
            (0..n).map(|_| HashMap::new()).collect();

        for py in 0..nproc_y {
            for px in 0..nproc_x {
                let mut neighbours = Vec::new();
                if px > 0 {
                    neighbours.push((px - 1, py));
                }
                if px + 1 < nproc_x {
                    neighbours.push((px + 1, py));
                }
                if py > 0 {
                    neighbours.push((px, py - 1));
                }
                if py + 1 < nproc_y {
                    neighbours.push((px, py + 1));
                }
                for (nx, ny) in neighbours {
                    let (tx, rx) = unbounded();
                    senders[rank(px, py)].insert((nx, ny), tx);
                    receivers[rank(nx, ny)].insert((px, py), rx);
                }
            }
        }

        let red = Arc::new(Reduction { barrier: Barrier::new(n), acc: Mutex::new(0.0) });

        let mut envs = Vec::with_capacity(n);
        let mut senders = senders.into_iter();
        let mut receivers = receivers.into_iter();
        for py in 0..nproc_y {
            for px in 0..nproc_x {
                envs.push(ThreadedEnv {
                    nproc_x,
                    nproc_y,
                    proc_x: px,
                    proc_y: py,
                    senders: senders.next().expect("sender map per rank"),
                    receivers: receivers.next().expect("receiver map per rank"),
                    red: Arc::clone(&red),
                });
            }
        }
        envs
    }
}

impl Env for ThreadedEnv {
    fn nproc_x(&self) -> usize {
        self.nproc_x
    }

    fn nproc_y(&self) -> usize {
        self.nproc_y
    }

    fn proc_x(&self) -> usize {
        self.proc_x
    }

    fn proc_y(&self) -> usize {
        self.proc_y
    }

    fn send_face(&self, to: (usize, usize), tag: FaceTag, data: Vec<P>) -> Result<(), EnvError> {
        let tx = self.senders.get(&to).ok_or(EnvError::NoRoute(to.0, to.1))?;
        tx.send(FaceMsg { tag, data }).map_err(|_| EnvError::Disconnected(to.0, to.1))
    }

    fn recv_face(&self, from: (usize, usize), tag: FaceTag) -> Result<Vec<P>, EnvError> {
        let rx = self.receivers.get(&from).ok_or(EnvError::NoRoute(from.0, from.1))?;
        let msg = rx.recv().map_err(|_| EnvError::Disconnected(from.0, from.1))?;
        assert_eq!(
            msg.tag, tag,
            "face exchange out of order with rank ({}, {})",
            from.0, from.1
        );
        Ok(msg.data)
    }

    fn synced_time(&self) -> Instant {
        self.red.barrier.wait();
        Instant::now()
    }

    fn sum_d(&self, x: f64) -> f64 {
        {
            let mut acc = self.red.acc.lock().expect("reduction lock poisoned");
            *acc += x;
        }
        self.red.barrier.wait();
        let total = *self.red.acc.lock().expect("reduction lock poisoned");
        if self.red.barrier.wait().is_leader() {
            *self.red.acc.lock().expect("reduction lock poisoned") = 0.0;
        }
        self.red.barrier.wait();
        total
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn grid_builds_edges_between_adjacent_ranks_only() {
        let envs = ThreadedEnv::grid(3, 2);
        assert_eq!(envs.len(), 6);
        let e = &envs[1 + 3 * 0]; // rank (1, 0)
        assert_eq!(e.proc_x(), 1);
        assert_eq!(e.proc_y(), 0);
        assert!(e.senders.contains_key(&(0, 0)));
        assert!(e.senders.contains_key(&(2, 0)));
        assert!(e.senders.contains_key(&(1, 1)));
        assert!(!e.senders.contains_key(&(0, 1)), "no diagonal edges");
        assert_eq!(e.senders.len(), e.receivers.len());

        let corner = &envs[0];
        assert!(corner.is_proc_x_min() && corner.is_proc_y_min());
        assert!(!corner.is_proc_x_max());
    }

    #[test]
    fn faces_flow_between_neighbours_with_matching_tags() {
        let mut envs = ThreadedEnv::grid(2, 1).into_iter();
        let left = envs.next().unwrap();
        let right = envs.next().unwrap();
        let tag = FaceTag { step: 3, octant_in_block: 1, kind: FaceKind::Yz };

        let h = thread::spawn(move || right.recv_face((0, 0), tag).unwrap());
        left.send_face((1, 0), tag, vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(h.join().unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn global_sum_agrees_on_every_rank() {
        let envs = ThreadedEnv::grid(2, 2);
        let handles: Vec<_> = envs
            .into_iter()
            .enumerate()
            .map(|(i, env)| {
                thread::spawn(move || {
                    let first = env.sum_d(i as f64);
                    let second = env.sum_d(1.0);
                    (first, second)
                })
            })
            .collect();
        for h in handles {
            let (first, second) = h.join().unwrap();
            assert_eq!(first, 0.0 + 1.0 + 2.0 + 3.0);
            assert_eq!(second, 4.0);
        }
    }

    #[test]
    fn serial_env_reduces_to_identity() {
        let env = SerialEnv;
        assert_eq!(env.sum_d(2.5), 2.5);
        assert!(env.is_proc_x_min() && env.is_proc_x_max());
        assert!(env.is_proc_y_min() && env.is_proc_y_max());
    }
}
