//! Sweeper state, configuration, and the top-level step loop
//!
//! The sweeper owns everything a rank reuses across steps and iterations:
//! the three face buffers, the per-slab scratch tiles, the transform
//! matrices, the worker pool, and the first-touch tracking for the output
//! state. The input and output state arrays are owned by the driver, which
//! swaps their roles between iterations so a sequence of sweeps composes
//! without allocation.
//!
//! ## One global step
//! 1. Ask the schedule what each octant slot does at this step.
//! 2. Claim first-touch regions of the output state into a
//!    [`BlockInitMask`](crate::kernel::BlockInitMask).
//! 3. Receive the upstream face slices owed by x/y neighbours.
//! 4. Sweep the block, energy groups in parallel over the worker pool. Each
//!    energy slab owns a disjoint slice of the state and of every face
//!    buffer, so the team shares nothing mutable.
//! 5. Send the downstream face slices to the neighbours that consume them
//!    at the next step.
//!
//! Configuration problems are reported at construction with the offending
//! parameter named; anything inconsistent later is a programming error and
//! aborts.

use rayon::prelude::*;
use tracing::{debug, trace};

use crate::dims::{Dims, FaceXyMut, FaceXzMut, FaceYzMut, StateIndexer, xform_idx, xform_len};
use crate::env::{Env, EnvError, FaceKind, FaceTag};
use crate::kernel::{axis_span, sweep_block_slab, BlockInitMask, CellScratch, SlabSweep};
use crate::quantities::Quantities;
use crate::scheduler::{ScheduleError, StepInfoAll, StepScheduler};
use crate::{NM, P};

/// Thread geometry and blocking of one sweeper. Immutable for the lifetime
/// of a sweep.
#[derive(Copy, Clone, Debug)]
pub struct SweeperConfig {
    /// z-blocks per rank (pipeline depth).
    pub nblock_z: usize,
    /// Octant slots processed together per block, in `{1, 2, 4, 8}`.
    pub noctant_per_block: usize,
    /// Semi-blocks per block, in `{1, 2, 4, 8}`.
    pub nsemiblock: usize,
    /// Workers in the energy-parallel team.
    pub nthread_e: usize,
    /// Lanes along y in the sub-block wavefront.
    pub nthread_y: usize,
    /// Lanes along z in the sub-block wavefront.
    pub nthread_z: usize,
    /// Sub-block tile extent along x.
    pub ncell_x_per_subblock: usize,
    /// Sub-block tile extent along y.
    pub ncell_y_per_subblock: usize,
    /// Sub-block tile extent along z.
    pub ncell_z_per_subblock: usize,
    /// Accumulate into a zeroed output instead of assigning on first touch.
    /// Required for concurrent octant backends when
    /// `nsemiblock < noctant_per_block`.
    pub use_atomic_vo: bool,
}

/// Configuration errors. Detected at sweeper construction; fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A count that must be at least one.
    #[error("{name} must be positive (got {got})")]
    NonPositive {
        /// Offending parameter.
        name: &'static str,
        /// Supplied value.
        got: i64,
    },
    /// A count restricted to the octant-folding powers of two.
    #[error("{name} must be one of 1, 2, 4, 8 (got {got})")]
    BadPowerOfTwo {
        /// Offending parameter.
        name: &'static str,
        /// Supplied value.
        got: usize,
    },
    /// The z pipeline must tile the rank's z extent evenly.
    #[error("ncell_z={ncell_z} is not divisible by nblock_z={nblock_z}")]
    BadBlockCount {
        /// Rank z extent.
        ncell_z: usize,
        /// Requested pipeline depth.
        nblock_z: usize,
    },
    /// More ranks than cells along an axis.
    #[error("process grid ({nproc}) exceeds cell count ({ncell}) along {axis}")]
    GridTooFine {
        /// Axis name.
        axis: &'static str,
        /// Ranks along the axis.
        nproc: usize,
        /// Cells along the axis.
        ncell: usize,
    },
    /// No device backend is compiled into this build.
    #[error("device execution requested but this build has no device backend")]
    DeviceUnavailable,
    /// The state's moment count is a compile-time commitment.
    #[error("state carries nm={got} moments; this build supports nm={expected}")]
    MomentCount {
        /// Supplied moment count.
        got: usize,
        /// Compiled moment count.
        expected: usize,
    },
    /// Worker pool construction failed.
    #[error("failed to build the worker pool: {0}")]
    ThreadPool(String),
    /// Schedule-level validation failure.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

impl SweeperConfig {
    /// Validate against a rank's extents.
    pub fn validate(&self, dims: &Dims) -> Result<(), ConfigError> {
        if self.nblock_z == 0 {
            return Err(ConfigError::NonPositive { name: "nblock_z", got: 0 });
        }
        if dims.ncell_z % self.nblock_z != 0 {
            return Err(ConfigError::BadBlockCount {
                ncell_z: dims.ncell_z,
                nblock_z: self.nblock_z,
            });
        }
        for (name, v) in [
            ("noctant_per_block", self.noctant_per_block),
            ("nsemiblock", self.nsemiblock),
        ] {
            if !matches!(v, 1 | 2 | 4 | 8) {
                return Err(ConfigError::BadPowerOfTwo { name, got: v });
            }
        }
        for (name, v) in [
            ("nthread_e", self.nthread_e),
            ("nthread_y", self.nthread_y),
            ("nthread_z", self.nthread_z),
            ("ncell_x_per_subblock", self.ncell_x_per_subblock),
            ("ncell_y_per_subblock", self.ncell_y_per_subblock),
            ("ncell_z_per_subblock", self.ncell_z_per_subblock),
        ] {
            if v == 0 {
                return Err(ConfigError::NonPositive { name, got: 0 });
            }
        }
        Ok(())
    }
}

/// Per-rank sweep engine.
pub struct Sweeper {
    cfg: SweeperConfig,
    dims: Dims,
    dims_b: Dims,
    dims_g: Dims,
    ix_base: usize,
    iy_base: usize,
    proc_x: usize,
    proc_y: usize,
    proc_x_min: bool,
    proc_x_max: bool,
    proc_y_min: bool,
    proc_y_max: bool,
    sched: StepScheduler,
    facexy: Vec<P>,
    facexz: Vec<P>,
    faceyz: Vec<P>,
    a_from_m: Vec<P>,
    m_from_a: Vec<P>,
    scratch: Vec<CellScratch>,
    /// First-touch tracking per (block_z, x-half, y-half, z-half).
    block_init_done: Vec<bool>,
    pool: rayon::ThreadPool,
}

impl Sweeper {
    /// Validate the configuration and allocate all per-rank buffers.
    pub fn new<Q: Quantities, E: Env>(
        cfg: SweeperConfig,
        dims_g: Dims,
        dims: Dims,
        ix_base: usize,
        iy_base: usize,
        env: &E,
        quan: &Q,
    ) -> Result<Self, ConfigError> {
        cfg.validate(&dims)?;
        if dims.nm != NM {
            return Err(ConfigError::MomentCount { got: dims.nm, expected: NM });
        }

        let dims_b = dims.with_ncell_z(dims.ncell_z / cfg.nblock_z);
        let sched = StepScheduler::new(
            env.nproc_x(),
            env.nproc_y(),
            cfg.nblock_z,
            cfg.noctant_per_block,
        )?;

        let nob = cfg.noctant_per_block;
        let facexy = vec![0.0; dims.ne * FaceXyMut::slab_len(&dims_b, nob)];
        let facexz = vec![0.0; dims.ne * FaceXzMut::slab_len(&dims_b, nob)];
        let faceyz = vec![0.0; dims.ne * FaceYzMut::slab_len(&dims_b, nob)];

        let mut a_from_m = vec![0.0; xform_len(dims.nm, dims.na)];
        let mut m_from_a = vec![0.0; xform_len(dims.nm, dims.na)];
        for octant in crate::dims::Octant::all() {
            for im in 0..dims.nm {
                for ia in 0..dims.na {
                    let i = xform_idx(dims.nm, dims.na, im, ia, octant);
                    a_from_m[i] = quan.init_a_from_m(im, ia, octant, &dims);
                    m_from_a[i] = quan.init_m_from_a(im, ia, octant, &dims);
                }
            }
        }

        let scratch = (0..dims.ne).map(|_| CellScratch::new()).collect();
        let block_init_done = vec![false; cfg.nblock_z * 8];

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.nthread_e)
            .build()
            .map_err(|e| ConfigError::ThreadPool(e.to_string()))?;

        debug!(
            nstep = sched.nstep(),
            ncell_z_per_block = dims_b.ncell_z,
            noctant_per_block = nob,
            nsemiblock = cfg.nsemiblock,
            nthread_e = cfg.nthread_e,
            "sweeper constructed"
        );

        Ok(Sweeper {
            cfg,
            dims,
            dims_b,
            dims_g,
            ix_base,
            iy_base,
            proc_x: env.proc_x(),
            proc_y: env.proc_y(),
            proc_x_min: env.is_proc_x_min(),
            proc_x_max: env.is_proc_x_max(),
            proc_y_min: env.is_proc_y_min(),
            proc_y_max: env.is_proc_y_max(),
            sched,
            facexy,
            facexz,
            faceyz,
            a_from_m,
            m_from_a,
            scratch,
            block_init_done,
            pool,
        })
    }

    /// Rank-local extents this sweeper was built for.
    pub fn dims(&self) -> &Dims {
        &self.dims
    }

    /// Entries expected of the input and output state arrays.
    pub fn state_len(&self) -> usize {
        StateIndexer::new(self.dims).total_len()
    }

    /// Sweep every octant over every cell once: `vo` receives the swept
    /// state derived from `vi` and the upstream faces.
    pub fn sweep<Q: Quantities + Sync, E: Env>(
        &mut self,
        vo: &mut [P],
        vi: &[P],
        quan: &Q,
        env: &E,
    ) -> Result<(), EnvError> {
        let expect = self.state_len();
        assert_eq!(vo.len(), expect, "output state length mismatch");
        assert_eq!(vi.len(), expect, "input state length mismatch");

        for done in self.block_init_done.iter_mut() {
            *done = false;
        }
        if self.cfg.use_atomic_vo {
            vo.fill(0.0);
        }

        let nstep = self.sched.nstep();
        for step in 0..nstep {
            let sia = self.sched.stepinfo_all(step, self.proc_x, self.proc_y);
            let mask = self.claim_block_init(&sia);
            self.recv_faces(step, &sia, env)?;
            self.compute_step(vo, vi, quan, &sia, mask);
            self.send_faces(step, &sia, env)?;
            trace!(step, "sweep step done");
        }
        debug!(nstep, "sweep complete");
        Ok(())
    }

    /// Mark the regions of `vo` first touched at this step. The slot that
    /// claims a region assigns; everyone after it accumulates. Regions are
    /// visited here in the block sweep's own order (semi-block major, then
    /// octant slot), so the claimant is always the first writer in time.
    fn claim_block_init(&mut self, sia: &StepInfoAll) -> BlockInitMask {
        let nob = self.cfg.noctant_per_block;
        let nsb = self.cfg.nsemiblock;
        let mut mask = BlockInitMask::default();
        for sb in 0..nsb {
            for (oib, si) in sia.iter() {
                if !si.is_active {
                    continue;
                }
                let octant = si.octant;
                let spx = axis_span(self.dims_b.ncell_x, nsb > 1, sb & 1 != 0, octant.dir_x());
                let spy = axis_span(self.dims_b.ncell_y, nsb > 2, sb & 2 != 0, octant.dir_y());
                let spz = axis_span(self.dims_b.ncell_z, nsb > 4, sb & 4 != 0, octant.dir_z());
                let hx = usize::from(nsb > 1 && !spx.is_lo_half);
                let hy = usize::from(nsb > 2 && !spy.is_lo_half);
                let hz = usize::from(nsb > 4 && !spz.is_lo_half);
                let region = ((si.block_z * 2 + hx) * 2 + hy) * 2 + hz;
                if !self.block_init_done[region] {
                    self.block_init_done[region] = true;
                    mask.set(oib, sb, nob);
                }
            }
        }
        mask
    }

    /// Sweep the scheduled block for every energy group, in parallel over
    /// the worker pool. Each slab owns disjoint state, face, and scratch
    /// slices.
    fn compute_step<Q: Quantities + Sync>(
        &mut self,
        vo: &mut [P],
        vi: &[P],
        quan: &Q,
        sia: &StepInfoAll,
        mask: BlockInitMask,
    ) {
        let sx = StateIndexer::new(self.dims);
        let slab = sx.slab_len();
        let z_stride = sx.z_stride();
        let nob = self.cfg.noctant_per_block;
        let fxy_slab = FaceXyMut::slab_len(&self.dims_b, nob);
        let fxz_slab = FaceXzMut::slab_len(&self.dims_b, nob);
        let fyz_slab = FaceYzMut::slab_len(&self.dims_b, nob);

        let Sweeper {
            cfg,
            dims_b,
            dims_g,
            ix_base,
            iy_base,
            proc_x_min,
            proc_x_max,
            proc_y_min,
            proc_y_max,
            facexy,
            facexz,
            faceyz,
            a_from_m,
            m_from_a,
            scratch,
            pool,
            ..
        } = self;
        let a_from_m = &a_from_m[..];
        let m_from_a = &m_from_a[..];
        let cfg: &SweeperConfig = cfg;

        pool.install(|| {
            vo.par_chunks_mut(slab)
                .zip(vi.par_chunks(slab))
                .zip(facexy.par_chunks_mut(fxy_slab))
                .zip(facexz.par_chunks_mut(fxz_slab))
                .zip(faceyz.par_chunks_mut(fyz_slab))
                .zip(scratch.par_iter_mut())
                .enumerate()
                .for_each(|(ie, (((((vo_s, vi_s), fxy), fxz), fyz), scr))| {
                    let s = SlabSweep {
                        quan,
                        cfg,
                        dims_b: *dims_b,
                        dims_g: *dims_g,
                        ix_base: *ix_base,
                        iy_base: *iy_base,
                        proc_x_min: *proc_x_min,
                        proc_x_max: *proc_x_max,
                        proc_y_min: *proc_y_min,
                        proc_y_max: *proc_y_max,
                        a_from_m,
                        m_from_a,
                        ie,
                        z_stride,
                    };
                    sweep_block_slab(&s, vo_s, vi_s, fxy, fxz, fyz, scr, sia, mask);
                });
        });
    }

    // ------------------------------------------------------------------
    // Face exchange
    // ------------------------------------------------------------------

    fn recv_faces<E: Env>(
        &mut self,
        step: usize,
        sia: &StepInfoAll,
        env: &E,
    ) -> Result<(), EnvError> {
        for (oib, si) in sia.iter() {
            if !si.is_active {
                continue;
            }
            if let Some(px) = self.sched.upstream_x(si.octant, self.proc_x) {
                let tag = FaceTag { step, octant_in_block: oib, kind: FaceKind::Yz };
                let data = env.recv_face((px, self.proc_y), tag)?;
                self.scatter_face(FaceKind::Yz, oib, &data);
            }
            if let Some(py) = self.sched.upstream_y(si.octant, self.proc_y) {
                let tag = FaceTag { step, octant_in_block: oib, kind: FaceKind::Xz };
                let data = env.recv_face((self.proc_x, py), tag)?;
                self.scatter_face(FaceKind::Xz, oib, &data);
            }
        }
        Ok(())
    }

    fn send_faces<E: Env>(
        &self,
        step: usize,
        sia: &StepInfoAll,
        env: &E,
    ) -> Result<(), EnvError> {
        for (oib, si) in sia.iter() {
            if !si.is_active {
                continue;
            }
            if let Some(px) = self.sched.downstream_x(si.octant, self.proc_x) {
                let tag = FaceTag { step: step + 1, octant_in_block: oib, kind: FaceKind::Yz };
                env.send_face((px, self.proc_y), tag, self.gather_face(FaceKind::Yz, oib))?;
            }
            if let Some(py) = self.sched.downstream_y(si.octant, self.proc_y) {
                let tag = FaceTag { step: step + 1, octant_in_block: oib, kind: FaceKind::Xz };
                env.send_face((self.proc_x, py), tag, self.gather_face(FaceKind::Xz, oib))?;
            }
        }
        Ok(())
    }

    /// Copy one octant slot's face plane, over all energy groups, into a
    /// contiguous message body.
    fn gather_face(&self, kind: FaceKind, oib: usize) -> Vec<P> {
        let nob = self.cfg.noctant_per_block;
        let (buf, slab, plane) = match kind {
            FaceKind::Xy => (
                &self.facexy,
                FaceXyMut::slab_len(&self.dims_b, nob),
                FaceXyMut::plane_len(&self.dims_b),
            ),
            FaceKind::Xz => (
                &self.facexz,
                FaceXzMut::slab_len(&self.dims_b, nob),
                FaceXzMut::plane_len(&self.dims_b),
            ),
            FaceKind::Yz => (
                &self.faceyz,
                FaceYzMut::slab_len(&self.dims_b, nob),
                FaceYzMut::plane_len(&self.dims_b),
            ),
        };
        let mut out = Vec::with_capacity(self.dims.ne * plane);
        for ie in 0..self.dims.ne {
            let base = ie * slab + oib * plane;
            out.extend_from_slice(&buf[base..base + plane]);
        }
        out
    }

    /// Inverse of [`gather_face`](Self::gather_face).
    fn scatter_face(&mut self, kind: FaceKind, oib: usize, data: &[P]) {
        let nob = self.cfg.noctant_per_block;
        let (buf, slab, plane) = match kind {
            FaceKind::Xy => (
                &mut self.facexy,
                FaceXyMut::slab_len(&self.dims_b, nob),
                FaceXyMut::plane_len(&self.dims_b),
            ),
            FaceKind::Xz => (
                &mut self.facexz,
                FaceXzMut::slab_len(&self.dims_b, nob),
                FaceXzMut::plane_len(&self.dims_b),
            ),
            FaceKind::Yz => (
                &mut self.faceyz,
                FaceYzMut::slab_len(&self.dims_b, nob),
                FaceYzMut::plane_len(&self.dims_b),
            ),
        };
        assert_eq!(data.len(), self.dims.ne * plane, "face slice length mismatch");
        for ie in 0..self.dims.ne {
            let base = ie * slab + oib * plane;
            buf[base..base + plane].copy_from_slice(&data[ie * plane..(ie + 1) * plane]);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dims::Octant;
    use crate::env::SerialEnv;
    use crate::quantities::{ManufacturedQuantities, ScaledIdentityQuantities};
    use crate::state::initialize_state;
    use crate::{NOCTANT, NU};
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn test_config(nblock_z: usize, nsemiblock: usize, noctant_per_block: usize) -> SweeperConfig {
        SweeperConfig {
            nblock_z,
            noctant_per_block,
            nsemiblock,
            nthread_e: 1,
            nthread_y: 1,
            nthread_z: 1,
            ncell_x_per_subblock: 2,
            ncell_y_per_subblock: 2,
            ncell_z_per_subblock: 2,
            use_atomic_vo: false,
        }
    }

    fn sweep_once<Q: Quantities + Sync>(
        dims: Dims,
        cfg: SweeperConfig,
        quan: &Q,
        vo_seed: P,
    ) -> (Vec<P>, Vec<P>) {
        let env = SerialEnv;
        let mut sweeper = Sweeper::new(cfg, dims, dims, 0, 0, &env, quan).unwrap();
        let mut vi = vec![0.0; sweeper.state_len()];
        initialize_state(&mut vi, &dims, 0, 0, quan);
        let mut vo = vec![vo_seed; sweeper.state_len()];
        sweeper.sweep(&mut vo, &vi, quan, &env).unwrap();
        (vi, vo)
    }

    #[test]
    fn invalid_configurations_name_the_parameter() {
        let dims = Dims { ncell_x: 4, ncell_y: 4, ncell_z: 6, ne: 1, nm: NM, na: 2 };
        let mut cfg = test_config(4, 1, 1);
        let err = cfg.validate(&dims).unwrap_err();
        assert!(err.to_string().contains("nblock_z=4"), "{err}");
        cfg.nblock_z = 2;
        cfg.nsemiblock = 3;
        let err = cfg.validate(&dims).unwrap_err();
        assert!(err.to_string().contains("nsemiblock"), "{err}");
        cfg.nsemiblock = 1;
        cfg.nthread_y = 0;
        let err = cfg.validate(&dims).unwrap_err();
        assert!(err.to_string().contains("nthread_y"), "{err}");
    }

    #[test]
    fn identity_physics_round_trips_the_state() {
        // na == nm so the identity transforms capture every moment.
        let dims = Dims { ncell_x: 3, ncell_y: 2, ncell_z: 4, ne: 2, nm: NM, na: NM };
        let quan = ScaledIdentityQuantities;
        let (vi, vo) = sweep_once(dims, test_config(2, 8, 8), &quan, 99.0);
        assert_eq!(vi, vo);
    }

    #[test]
    fn manufactured_state_is_an_exact_fixed_point() {
        let dims = Dims { ncell_x: 3, ncell_y: 5, ncell_z: 6, ne: 2, nm: NM, na: 5 };
        let quan = ManufacturedQuantities::new();
        let (vi, vo) = sweep_once(dims, test_config(2, 8, 8), &quan, 99.0);
        assert_eq!(vi, vo);
    }

    #[test]
    fn first_touch_discipline_overwrites_stale_output() {
        // The output buffer starts poisoned; only the init/accumulate
        // discipline can produce the right answer.
        let dims = Dims { ncell_x: 4, ncell_y: 4, ncell_z: 4, ne: 1, nm: NM, na: 3 };
        let quan = ManufacturedQuantities::new();
        for nsemiblock in [1usize, 2, 4, 8] {
            for nob in [1usize, 8] {
                let (vi, vo) =
                    sweep_once(dims, test_config(2, nsemiblock, nob), &quan, -1.0e30);
                assert_eq!(vi, vo, "nsemiblock {nsemiblock} nob {nob}");
            }
        }
    }

    #[test]
    fn atomic_update_mode_matches_first_touch_mode() {
        let dims = Dims { ncell_x: 3, ncell_y: 3, ncell_z: 4, ne: 2, nm: NM, na: 5 };
        let quan = ManufacturedQuantities::new();
        let mut cfg = test_config(2, 1, 8);
        cfg.use_atomic_vo = true;
        let (vi, vo) = sweep_once(dims, cfg, &quan, 99.0);
        assert_eq!(vi, vo);
    }

    #[test]
    fn repeated_sweeps_are_bit_identical() {
        let dims = Dims { ncell_x: 3, ncell_y: 5, ncell_z: 6, ne: 2, nm: NM, na: 5 };
        let quan = ManufacturedQuantities::new();
        let (_, first) = sweep_once(dims, test_config(2, 2, 2), &quan, 0.0);
        let (_, second) = sweep_once(dims, test_config(2, 2, 2), &quan, 0.0);
        let same = first
            .iter()
            .zip(&second)
            .all(|(a, b)| a.to_bits() == b.to_bits());
        assert!(same, "two runs diverged bitwise");
    }

    // ------------------------------------------------------------------
    // Boundary coverage instrumentation
    // ------------------------------------------------------------------

    /// Delegating oracle that counts every boundary-face initialization.
    struct CountingQuantities {
        inner: ManufacturedQuantities,
        // (kind, ix_g, iy_g, iz_g, ie, ia, iu, octant) -> writes
        counts: Mutex<HashMap<(u8, i64, i64, i64, usize, usize, usize, usize), usize>>,
    }

    impl CountingQuantities {
        fn new() -> Self {
            CountingQuantities {
                inner: ManufacturedQuantities::new(),
                counts: Mutex::new(HashMap::new()),
            }
        }

        #[allow(clippy::too_many_arguments)]
        fn record(
            &self,
            kind: u8,
            ix_g: i64,
            iy_g: i64,
            iz_g: i64,
            ie: usize,
            ia: usize,
            iu: usize,
            octant: Octant,
        ) {
            *self
                .counts
                .lock()
                .unwrap()
                .entry((kind, ix_g, iy_g, iz_g, ie, ia, iu, octant.index()))
                .or_insert(0) += 1;
        }
    }

    impl Quantities for CountingQuantities {
        fn init_state(
            &self,
            ix_g: usize,
            iy_g: usize,
            iz_g: usize,
            ie: usize,
            im: usize,
            iu: usize,
            dims_g: &Dims,
        ) -> P {
            self.inner.init_state(ix_g, iy_g, iz_g, ie, im, iu, dims_g)
        }

        fn init_facexy(
            &self,
            ix_g: i64,
            iy_g: i64,
            iz_g: i64,
            ie: usize,
            ia: usize,
            iu: usize,
            octant: Octant,
            dims_g: &Dims,
        ) -> P {
            self.record(0, ix_g, iy_g, iz_g, ie, ia, iu, octant);
            self.inner.init_facexy(ix_g, iy_g, iz_g, ie, ia, iu, octant, dims_g)
        }

        fn init_facexz(
            &self,
            ix_g: i64,
            iy_g: i64,
            iz_g: i64,
            ie: usize,
            ia: usize,
            iu: usize,
            octant: Octant,
            dims_g: &Dims,
        ) -> P {
            self.record(1, ix_g, iy_g, iz_g, ie, ia, iu, octant);
            self.inner.init_facexz(ix_g, iy_g, iz_g, ie, ia, iu, octant, dims_g)
        }

        fn init_faceyz(
            &self,
            ix_g: i64,
            iy_g: i64,
            iz_g: i64,
            ie: usize,
            ia: usize,
            iu: usize,
            octant: Octant,
            dims_g: &Dims,
        ) -> P {
            self.record(2, ix_g, iy_g, iz_g, ie, ia, iu, octant);
            self.inner.init_faceyz(ix_g, iy_g, iz_g, ie, ia, iu, octant, dims_g)
        }

        fn init_a_from_m(&self, im: usize, ia: usize, octant: Octant, dims: &Dims) -> P {
            self.inner.init_a_from_m(im, ia, octant, dims)
        }

        fn init_m_from_a(&self, im: usize, ia: usize, octant: Octant, dims: &Dims) -> P {
            self.inner.init_m_from_a(im, ia, octant, dims)
        }

        #[allow(clippy::too_many_arguments)]
        fn solve(
            &self,
            vslocal: &mut [P],
            lane: usize,
            ia: usize,
            facexy: &mut FaceXyMut<'_>,
            facexz: &mut FaceXzMut<'_>,
            faceyz: &mut FaceYzMut<'_>,
            cell: crate::quantities::CellCoords,
            octant: Octant,
            octant_in_block: usize,
            dims_b: &Dims,
            dims_g: &Dims,
            is_active: bool,
        ) {
            self.inner.solve(
                vslocal,
                lane,
                ia,
                facexy,
                facexz,
                faceyz,
                cell,
                octant,
                octant_in_block,
                dims_b,
                dims_g,
                is_active,
            );
        }

        fn flops_per_solve(&self, dims: &Dims) -> f64 {
            self.inner.flops_per_solve(dims)
        }
    }

    #[test]
    fn every_boundary_face_cell_is_seeded_exactly_once_per_octant() {
        let dims = Dims { ncell_x: 4, ncell_y: 4, ncell_z: 4, ne: 2, nm: NM, na: 3 };
        for (nsemiblock, nob) in [(8usize, 8usize), (1, 1)] {
            let quan = CountingQuantities::new();
            let (vi, vo) = sweep_once(dims, test_config(2, nsemiblock, nob), &quan, 0.0);
            assert_eq!(vi, vo);

            let counts = quan.counts.lock().unwrap();
            assert!(counts.values().all(|&c| c == 1), "a face cell was seeded twice");
            let per_octant = (dims.ncell_x * dims.ncell_y
                + dims.ncell_x * dims.ncell_z
                + dims.ncell_y * dims.ncell_z)
                * dims.ne
                * dims.na
                * NU;
            assert_eq!(
                counts.len(),
                NOCTANT * per_octant,
                "boundary coverage (nsemiblock {nsemiblock}, nob {nob})"
            );
        }
    }
}
