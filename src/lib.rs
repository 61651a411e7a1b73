//! Crate root: public surface, core aliases, and sweep-wide invariants
//!
//! This crate implements the core of a KBA (Koch–Baker–Alcouffe) wavefront
//! sweep for the discrete-ordinates (S_n) transport equation on a structured
//! 3D Cartesian grid. The state vector is advanced through the eight angular
//! octants by sweeping cells in an order that respects the upstream
//! dependency of each octant, with the z axis blocked so that a grid of ranks
//! can pipeline their sweeps concurrently.
//!
//! ## Invariants
//!
//! - **Sweep recursion.** For every octant, a cell is processed only after
//!   all cells upstream of it along the octant's direction within the same
//!   semi-block. Face buffers carry the dependency between cells, between
//!   z-blocks of one rank, and between neighbouring ranks.
//! - **Write discipline.** Each `(semiblock, octant_in_block)` pair either
//!   initializes its region of the output state (first touch this sweep) or
//!   accumulates into it. With `nsemiblock == noctant_per_block` the octant
//!   regions of one semi-block step are disjoint by construction.
//! - **Pipeline invariant.** A rank does not begin a z-block for an octant
//!   until the upstream face for that block has arrived, either from a
//!   neighbour rank or from the physical boundary setters.
//! - **Exactness discipline.** The bundled testing physics builds every value
//!   from power-of-two scale factors, so a full sweep reproduces its
//!   manufactured input state bit-exactly in IEEE-754 arithmetic. Failures
//!   therefore show up as a non-zero norm difference, never as noise.
//!
//! Failures inside the core are programming errors and abort; configuration
//! problems are reported as precise errors naming the offending parameter.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

/// Command-line argument consumption (consume-style, leftovers rejected).
pub mod args;
/// Grid extents, octants, and typed index views over linear memory.
pub mod dims;
/// Environment contract: process grid, neighbour exchange, timing, reduction.
pub mod env;
/// Per-cell kernel, boundary setters, and the wavefront drivers.
pub mod kernel;
/// Physics oracle contract and the manufactured testing quantities.
pub mod quantities;
/// Driver harness: per-rank run loop and the multi-rank launcher.
pub mod run;
/// KBA step schedule across octant groups, ranks, and z-blocks.
pub mod scheduler;
/// State array initialization and norms.
pub mod state;
/// Sweeper state, configuration, and the top-level step loop.
pub mod sweeper;

/// Scalar field for all state, face, and transform values.
pub type P = f64;

/// Unknowns per (cell, energy, moment-or-angle). Compile-time constant.
pub const NU: usize = 4;

/// Number of moments in the moment-space representation. Compile-time
/// constant; the kernel assumes `dims.nm == NM`.
pub const NM: usize = 16;

/// Number of angular octants of the unit sphere.
pub const NOCTANT: usize = 8;

pub use crate::args::{Args, ArgsError};
pub use crate::dims::{Dims, Dir, Octant};
pub use crate::env::{Env, EnvError, FaceKind, FaceTag, SerialEnv, ThreadedEnv};
pub use crate::quantities::{CellCoords, ManufacturedQuantities, Quantities};
pub use crate::run::{launch, run, RunConfig, RunData, RunError};
pub use crate::scheduler::{StepInfo, StepInfoAll, StepScheduler};
pub use crate::sweeper::{ConfigError, Sweeper, SweeperConfig};
