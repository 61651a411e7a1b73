//! Per-cell kernel, boundary setters, and the wavefront drivers
//!
//! ## Structure
//! One z-block of one energy slab is swept by four nested drivers:
//!
//! 1. [`sweep_block_slab`] loops semi-blocks and octant slots, applies the
//!    physical boundary setters, and dispatches each semi-block.
//! 2. [`sweep_semiblock`] tiles the semi-block into sub-blocks and walks the
//!    sub-block wavefronts, mapping `(thread_y, thread_z)` lanes onto
//!    sub-block coordinates through the stacked-chunk formulas.
//! 3. [`sweep_subblock`] walks the cells of one sub-block in the octant's
//!    direction order.
//! 4. [`sweep_cell`] runs the moment-to-angle transform, the upstream-face
//!    solve, and the angle-to-moment transform for one cell, tiled over
//!    angles and moments.
//!
//! ## Thread space
//! The kernel is written once over the [`ExecCtx`] capability contract:
//! lane indices plus barrier points between the phases that a concurrent
//! backend must order. The scalar backend ([`SerialCtx`]) iterates the lane
//! space deterministically, so its barriers are no-ops; the wavefront and
//! masking arithmetic still runs in full, which keeps lane activity
//! identical to a threaded execution.
//!
//! Cells masked off by the uniformity round-up of odd semi-block halves, by
//! the angle tile overhang, or by an inactive octant flow through the same
//! code paths with `is_active == false` and touch nothing.

#![allow(missing_docs)]

use crate::dims::{block_state_idx, ceil_div, xform_idx, Dims, Dir, FaceXyMut, FaceXzMut, FaceYzMut, Octant};
use crate::quantities::{CellCoords, Quantities};
use crate::scheduler::{StepInfo, StepInfoAll};
use crate::sweeper::SweeperConfig;
use crate::{NM, NU, P};

/// Angle tile width (SIMD-lane style; `na` need not divide it).
pub const NTHREAD_A: usize = 8;
/// Moment tile width; the moment count is a multiple of it.
pub const NTHREAD_M: usize = 4;

const _: () = assert!(NM % NTHREAD_M == 0, "moment count must tile evenly");

// ============================================================================
// Execution context
// ============================================================================

/// Capability contract for the kernel's `(thread_y, thread_z)` lane space.
///
/// A concurrent backend supplies real lane ids and real barriers; the scalar
/// backend iterates lanes in order and the barriers compile away.
pub trait ExecCtx {
    fn thread_y(&self) -> usize;
    fn thread_z(&self) -> usize;
    /// Barrier between the moment/angle phases of a cell.
    #[inline]
    fn sync_amu_threads(&self) {}
    /// Barrier between sub-block wavefronts.
    #[inline]
    fn sync_yz_threads(&self) {}
    /// Barrier between semi-blocks.
    #[inline]
    fn sync_octant_threads(&self) {}
}

/// Scalar backend: lanes are loop indices, barriers are no-ops.
#[derive(Copy, Clone, Debug, Default)]
pub struct SerialCtx {
    pub thread_y: usize,
    pub thread_z: usize,
}

impl ExecCtx for SerialCtx {
    #[inline]
    fn thread_y(&self) -> usize {
        self.thread_y
    }

    #[inline]
    fn thread_z(&self) -> usize {
        self.thread_z
    }
}

// ============================================================================
// Per-step block-init mask
// ============================================================================

/// One bit per `(semiblock, octant_in_block)`: whether that slot's store to
/// the output state initializes its region (first touch this sweep) rather
/// than accumulating.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockInitMask(u64);

impl BlockInitMask {
    #[inline]
    pub fn set(&mut self, octant_in_block: usize, semiblock: usize, noctant_per_block: usize) {
        self.0 |= 1u64 << (octant_in_block + noctant_per_block * semiblock);
    }

    #[inline]
    pub fn get(self, octant_in_block: usize, semiblock: usize, noctant_per_block: usize) -> bool {
        (self.0 >> (octant_in_block + noctant_per_block * semiblock)) & 1 != 0
    }
}

// ============================================================================
// Semi-block geometry
// ============================================================================

/// Inclusive cell bounds of one semi-block along one axis.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct AxisSpan {
    /// Lowest cell of the semi-block.
    pub lo: usize,
    /// Highest cell (real cells only; boundary setters use this).
    pub hi: usize,
    /// Highest cell after the uniformity round-up: when the axis is split
    /// and the extent is odd, the high half is upsized by one so every lane
    /// runs the same trip count, and the extra cell is masked out.
    pub hi_up: usize,
    /// Whether this semi-block is the low half (meaningful when split).
    pub is_lo_half: bool,
    /// Whether the semi-block reaches the low edge of the block.
    pub has_lo: bool,
    /// Whether the semi-block reaches the high edge of the block.
    pub has_hi: bool,
}

/// Semi-block bounds along one axis. The low/high choice flips with the
/// octant's direction so each octant sees its own half first.
pub(crate) fn axis_span(ncell: usize, split: bool, semiblock_bit: bool, dir: Dir) -> AxisSpan {
    let is_lo_half = (!semiblock_bit) == dir.is_up();
    let has_lo = is_lo_half || !split;
    let has_hi = !is_lo_half || !split;

    let lo = if has_lo { 0 } else { (ncell + 1) / 2 };
    let hi = if has_hi { ncell - 1 } else { (ncell + 1) / 2 - 1 };
    let hi_up = if split && ncell % 2 == 1 && !is_lo_half { hi + 1 } else { hi };

    AxisSpan { lo, hi, hi_up, is_lo_half, has_lo, has_hi }
}

// ============================================================================
// Sub-block wavefront geometry
// ============================================================================

/// Precomputed wavefront geometry of one semi-block.
///
/// Sub-blocks are grouped into chunks of `nthread_y x nthread_z` along y and
/// z; the chunks are stacked along the x axis so a single wavefront index
/// advances the whole front. Lane `(ty, tz)` at wavefront `w` owns stacked
/// x coordinate `w - ty - tz`, which unstacks into `(sub_x, chunk_y,
/// chunk_z)` below.
#[derive(Copy, Clone, Debug)]
pub(crate) struct WaveGeom {
    nsub_x: isize,
    nsub_y: isize,
    nsub_z: isize,
    nsub_y_per_chunk: isize,
    nsub_z_per_chunk: isize,
    nsub_x_per_chunk_up: isize,
    nchunk_y: isize,
    nchunk_yz: isize,
    nsub_x_stacked: isize,
}

impl WaveGeom {
    pub fn new(
        nsub_x: usize,
        nsub_y: usize,
        nsub_z: usize,
        nthread_y: usize,
        nthread_z: usize,
    ) -> Self {
        let nsub_x_per_chunk = nsub_x;
        let nsub_y_per_chunk = nthread_y;
        let nsub_z_per_chunk = nthread_z;

        let nchunk_y = ceil_div(nsub_y, nsub_y_per_chunk);
        let nchunk_z = ceil_div(nsub_z, nsub_z_per_chunk);

        // Upsize the stacked x extent so no lane outruns its upstream
        // dependencies within a chunk column.
        let nsub_x_per_chunk_up = nsub_x_per_chunk
            .max(nsub_y_per_chunk)
            .max(ceil_div(nsub_z_per_chunk, nchunk_y));

        let nchunk_yz = nchunk_y * nchunk_z;
        let nsub_x_stacked = nsub_x_per_chunk_up * nchunk_yz;

        WaveGeom {
            nsub_x: nsub_x as isize,
            nsub_y: nsub_y as isize,
            nsub_z: nsub_z as isize,
            nsub_y_per_chunk: nsub_y_per_chunk as isize,
            nsub_z_per_chunk: nsub_z_per_chunk as isize,
            nsub_x_per_chunk_up: nsub_x_per_chunk_up as isize,
            nchunk_y: nchunk_y as isize,
            nchunk_yz: nchunk_yz as isize,
            nsub_x_stacked: nsub_x_stacked as isize,
        }
    }

    /// Number of wavefronts needed to drain the stacked domain.
    pub fn nwave(&self) -> usize {
        (self.nsub_x_stacked + self.nsub_y_per_chunk + self.nsub_z_per_chunk - 2) as usize
    }

    /// Sub-block coordinates owned by lane `(ty, tz)` at wavefront `wave`,
    /// or `None` when the lane is off the front.
    pub fn subblock_at(
        &self,
        wave: usize,
        ty: usize,
        tz: usize,
        dir_x: Dir,
        dir_y: Dir,
        dir_z: Dir,
    ) -> Option<(usize, usize, usize)> {
        let sub_y_stacked = ty as isize;
        let sub_z_stacked = tz as isize;
        let sub_x_stacked = wave as isize - sub_y_stacked - sub_z_stacked;

        let sub_x = (if dir_x.is_up() {
            sub_x_stacked
        } else {
            self.nsub_x_stacked - 1 - sub_x_stacked
        }) % self.nsub_x_per_chunk_up;

        let chunk_yz_stacked = sub_x_stacked / self.nsub_x_per_chunk_up;

        let chunk_z = if dir_z.is_up() {
            chunk_yz_stacked / self.nchunk_y
        } else {
            (self.nchunk_yz - 1 - chunk_yz_stacked) / self.nchunk_y
        };
        let chunk_y = if dir_y.is_up() {
            chunk_yz_stacked % self.nchunk_y
        } else {
            (self.nchunk_yz - 1 - chunk_yz_stacked) % self.nchunk_y
        };

        let sub_y = chunk_y * self.nsub_y_per_chunk
            + if dir_y.is_up() {
                sub_y_stacked
            } else {
                self.nsub_y_per_chunk - 1 - sub_y_stacked
            };
        let sub_z = chunk_z * self.nsub_z_per_chunk
            + if dir_z.is_up() {
                sub_z_stacked
            } else {
                self.nsub_z_per_chunk - 1 - sub_z_stacked
            };

        let active = sub_x_stacked >= 0
            && sub_x_stacked < self.nsub_x_stacked
            && sub_z >= 0
            && sub_z < self.nsub_z
            && sub_y >= 0
            && sub_y < self.nsub_y
            && sub_x >= 0
            && sub_x < self.nsub_x;

        active.then(|| (sub_x as usize, sub_y as usize, sub_z as usize))
    }
}

// ============================================================================
// Per-slab sweep context
// ============================================================================

/// Read-only context shared by all drivers while sweeping one energy slab.
pub(crate) struct SlabSweep<'a, Q> {
    pub quan: &'a Q,
    pub cfg: &'a SweeperConfig,
    pub dims_b: Dims,
    pub dims_g: Dims,
    pub ix_base: usize,
    pub iy_base: usize,
    pub proc_x_min: bool,
    pub proc_x_max: bool,
    pub proc_y_min: bool,
    pub proc_y_max: bool,
    pub a_from_m: &'a [P],
    pub m_from_a: &'a [P],
    /// Energy group this slab carries.
    pub ie: usize,
    /// Entries in one z-layer of the slab.
    pub z_stride: usize,
}

/// Per-slab scratch tiles, allocated once at sweeper construction.
#[derive(Clone, Debug)]
pub struct CellScratch {
    pub(crate) vilocal: [P; NTHREAD_M * NU],
    pub(crate) vslocal: [P; NTHREAD_A * NU],
    pub(crate) volocal: [P; NTHREAD_M * NU],
}

impl CellScratch {
    pub fn new() -> Self {
        CellScratch {
            vilocal: [0.0; NTHREAD_M * NU],
            vslocal: [0.0; NTHREAD_A * NU],
            volocal: [0.0; NTHREAD_M * NU],
        }
    }
}

impl Default for CellScratch {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Boundary setters
// ============================================================================

fn set_boundary_xy<Q: Quantities>(
    s: &SlabSweep<'_, Q>,
    facexy: &mut [P],
    octant: Octant,
    oib: usize,
    spx: &AxisSpan,
    spy: &AxisSpan,
) {
    let iz_g: i64 = if octant.dir_z().is_up() { -1 } else { s.dims_g.ncell_z as i64 };
    let mut face = FaceXyMut::new(facexy, s.dims_b, s.cfg.noctant_per_block);
    for iu in 0..NU {
        for iy in spy.lo..=spy.hi {
            let iy_g = (iy + s.iy_base) as i64;
            for ix in spx.lo..=spx.hi {
                let ix_g = (ix + s.ix_base) as i64;
                for ia in 0..s.dims_b.na {
                    *face.at_mut(oib, ix, iy, ia, iu) = s
                        .quan
                        .init_facexy(ix_g, iy_g, iz_g, s.ie, ia, iu, octant, &s.dims_g);
                }
            }
        }
    }
}

fn set_boundary_xz<Q: Quantities>(
    s: &SlabSweep<'_, Q>,
    facexz: &mut [P],
    block_z: usize,
    octant: Octant,
    oib: usize,
    spx: &AxisSpan,
    spz: &AxisSpan,
) {
    let iz_base = block_z * s.dims_b.ncell_z;
    let iy_g: i64 = if octant.dir_y().is_up() { -1 } else { s.dims_g.ncell_y as i64 };
    let mut face = FaceXzMut::new(facexz, s.dims_b, s.cfg.noctant_per_block);
    for iu in 0..NU {
        for iz in spz.lo..=spz.hi {
            let iz_g = (iz + iz_base) as i64;
            for ix in spx.lo..=spx.hi {
                let ix_g = (ix + s.ix_base) as i64;
                for ia in 0..s.dims_b.na {
                    *face.at_mut(oib, ix, iz, ia, iu) = s
                        .quan
                        .init_facexz(ix_g, iy_g, iz_g, s.ie, ia, iu, octant, &s.dims_g);
                }
            }
        }
    }
}

fn set_boundary_yz<Q: Quantities>(
    s: &SlabSweep<'_, Q>,
    faceyz: &mut [P],
    block_z: usize,
    octant: Octant,
    oib: usize,
    spy: &AxisSpan,
    spz: &AxisSpan,
) {
    let iz_base = block_z * s.dims_b.ncell_z;
    let ix_g: i64 = if octant.dir_x().is_up() { -1 } else { s.dims_g.ncell_x as i64 };
    let mut face = FaceYzMut::new(faceyz, s.dims_b, s.cfg.noctant_per_block);
    for iu in 0..NU {
        for iz in spz.lo..=spz.hi {
            let iz_g = (iz + iz_base) as i64;
            for iy in spy.lo..=spy.hi {
                let iy_g = (iy + s.iy_base) as i64;
                for ia in 0..s.dims_b.na {
                    *face.at_mut(oib, iy, iz, ia, iu) = s
                        .quan
                        .init_faceyz(ix_g, iy_g, iz_g, s.ie, ia, iu, octant, &s.dims_g);
                }
            }
        }
    }
}

// ============================================================================
// Per-cell kernel
// ============================================================================

/// Sweep one cell: load the moment vector, transform to angles, solve
/// against the upstream faces, transform back, and store into the output
/// block. Inactive cells run the same control flow and touch nothing.
#[allow(clippy::too_many_arguments)]
pub(crate) fn sweep_cell<Q: Quantities, C: ExecCtx>(
    s: &SlabSweep<'_, Q>,
    vo_b: &mut [P],
    vi_b: &[P],
    scratch: &mut CellScratch,
    facexy: &mut [P],
    facexz: &mut [P],
    faceyz: &mut [P],
    ctx: &C,
    octant: Octant,
    iz_base: usize,
    oib: usize,
    ix: usize,
    iy: usize,
    iz: usize,
    do_block_init_this: bool,
    is_elt_active: bool,
) {
    let d = &s.dims_b;
    let na = d.na;
    let moment_tiled = NM > NTHREAD_M;

    let mut ia_base = 0;
    while ia_base < na {
        // ----- moment tiles: load vi and transform moments to angles -----
        let mut im_base = 0;
        while im_base < NM {
            if im_base != 0 {
                ctx.sync_amu_threads();
            }

            // Load this moment tile of vi.
            if ia_base == 0 || moment_tiled {
                for tm in 0..NTHREAD_M {
                    let im = im_base + tm;
                    if im < NM && is_elt_active {
                        for iu in 0..NU {
                            scratch.vilocal[tm * NU + iu] =
                                vi_b[block_state_idx(d, ix, iy, iz, im, iu)];
                        }
                    }
                }
            }

            ctx.sync_amu_threads();

            // Accumulate this moment tile into the angle tile.
            for lane in 0..NTHREAD_A {
                let ia = ia_base + lane;
                if ia < na && is_elt_active {
                    let mut v = [0.0 as P; NU];
                    for tm in 0..NTHREAD_M {
                        let im = im_base + tm;
                        if im < NM {
                            let a = s.a_from_m[xform_idx(d.nm, na, im, ia, octant)];
                            for iu in 0..NU {
                                v[iu] += a * scratch.vilocal[tm * NU + iu];
                            }
                        }
                    }
                    if im_base == 0 {
                        for iu in 0..NU {
                            scratch.vslocal[lane * NU + iu] = v[iu];
                        }
                    } else {
                        for iu in 0..NU {
                            scratch.vslocal[lane * NU + iu] += v[iu];
                        }
                    }
                }
            }

            im_base += NTHREAD_M;
        }

        // ----- upstream-face solve, one angle lane at a time -----
        for lane in 0..NTHREAD_A {
            let ia = ia_base + lane;
            let lane_active = is_elt_active && ia < na;
            let cell = CellCoords {
                ix,
                iy,
                iz,
                ie: s.ie,
                ix_g: ix + s.ix_base,
                iy_g: iy + s.iy_base,
                iz_g: iz + iz_base,
            };
            let mut vxy = FaceXyMut::new(&mut *facexy, s.dims_b, s.cfg.noctant_per_block);
            let mut vxz = FaceXzMut::new(&mut *facexz, s.dims_b, s.cfg.noctant_per_block);
            let mut vyz = FaceYzMut::new(&mut *faceyz, s.dims_b, s.cfg.noctant_per_block);
            s.quan.solve(
                &mut scratch.vslocal,
                lane,
                ia,
                &mut vxy,
                &mut vxz,
                &mut vyz,
                cell,
                octant,
                oib,
                &s.dims_b,
                &s.dims_g,
                lane_active,
            );
        }

        ctx.sync_amu_threads();

        // ----- transform angles back to moments and store -----
        let mut im_base = 0;
        while im_base < NM {
            for tm in 0..NTHREAD_M {
                let im = im_base + tm;

                if im < NM && is_elt_active {
                    let mut w = [0.0 as P; NU];
                    for lane in 0..NTHREAD_A {
                        let ia = ia_base + lane;
                        let mask = ia < na;
                        // Out-of-range lanes contribute an exact zero; the
                        // stale tile contents behind them never leak.
                        let m = if mask {
                            s.m_from_a[xform_idx(d.nm, na, im, ia, octant)]
                        } else {
                            0.0
                        };
                        for iu in 0..NU {
                            w[iu] += if mask { m * scratch.vslocal[lane * NU + iu] } else { 0.0 };
                        }
                    }
                    if ia_base == 0 || moment_tiled {
                        for iu in 0..NU {
                            scratch.volocal[tm * NU + iu] = w[iu];
                        }
                    } else {
                        for iu in 0..NU {
                            scratch.volocal[tm * NU + iu] += w[iu];
                        }
                    }
                }

                // Store after the last angle tile, or per tile when moments
                // are tiled (then only the first tile may initialize).
                if im < NM && is_elt_active && (ia_base + NTHREAD_A >= na || moment_tiled) {
                    let add_mode = s.cfg.use_atomic_vo
                        || !do_block_init_this
                        || (moment_tiled && ia_base != 0);
                    for iu in 0..NU {
                        let dst = &mut vo_b[block_state_idx(d, ix, iy, iz, im, iu)];
                        let val = scratch.volocal[tm * NU + iu];
                        if add_mode {
                            *dst += val;
                        } else {
                            *dst = val;
                        }
                    }
                }
            }
            im_base += NTHREAD_M;
        }

        ia_base += NTHREAD_A;
    }
}

// ============================================================================
// Sub-block driver
// ============================================================================

/// Inclusive sub-block bounds, possibly overhanging the block extents; the
/// overhang is masked per cell.
#[derive(Copy, Clone, Debug)]
struct SubblockBounds {
    ixmin: usize,
    ixmax: usize,
    iymin: usize,
    iymax: usize,
    izmin: usize,
    izmax: usize,
}

/// Sweep the cells of one sub-block in the octant's direction order.
#[allow(clippy::too_many_arguments)]
fn sweep_subblock<Q: Quantities, C: ExecCtx>(
    s: &SlabSweep<'_, Q>,
    vo_b: &mut [P],
    vi_b: &[P],
    scratch: &mut CellScratch,
    facexy: &mut [P],
    facexz: &mut [P],
    faceyz: &mut [P],
    ctx: &C,
    octant: Octant,
    iz_base: usize,
    oib: usize,
    sub: SubblockBounds,
    is_subblock_active: bool,
    spx: &AxisSpan,
    spy: &AxisSpan,
    spz: &AxisSpan,
    do_block_init_this: bool,
    is_octant_active: bool,
) {
    let (dir_x, dir_y, dir_z) = (octant.dir_x(), octant.dir_y(), octant.dir_z());
    let (inc_x, inc_y, inc_z) = (dir_x.inc(), dir_y.inc(), dir_z.inc());

    let ixbeg = if dir_x.is_up() { sub.ixmin } else { sub.ixmax } as isize;
    let iybeg = if dir_y.is_up() { sub.iymin } else { sub.iymax } as isize;
    let izbeg = if dir_z.is_up() { sub.izmin } else { sub.izmax } as isize;

    let ixend = if dir_x.is_up() { sub.ixmax } else { sub.ixmin } as isize;
    let iyend = if dir_y.is_up() { sub.iymax } else { sub.iymin } as isize;
    let izend = if dir_z.is_up() { sub.izmax } else { sub.izmin } as isize;

    let mut iz = izbeg;
    while iz != izend + inc_z {
        let mut iy = iybeg;
        while iy != iyend + inc_y {
            let mut ix = ixbeg;
            while ix != ixend + inc_x {
                let (ux, uy, uz) = (ix as usize, iy as usize, iz as usize);
                // Truncate to the block and semi-block; the lower bounds are
                // guaranteed by the sub-block construction.
                let is_cell_active = ux < s.dims_b.ncell_x
                    && uy < s.dims_b.ncell_y
                    && uz < s.dims_b.ncell_z
                    && ux <= spx.hi_up
                    && uy <= spy.hi_up
                    && uz <= spz.hi_up
                    && is_subblock_active;

                sweep_cell(
                    s,
                    vo_b,
                    vi_b,
                    scratch,
                    facexy,
                    facexz,
                    faceyz,
                    ctx,
                    octant,
                    iz_base,
                    oib,
                    ux,
                    uy,
                    uz,
                    do_block_init_this,
                    is_octant_active && is_cell_active,
                );

                ix += inc_x;
            }
            iy += inc_y;
        }
        iz += inc_z;
    }
}

// ============================================================================
// Semi-block driver
// ============================================================================

/// Sweep one semi-block: tile it into sub-blocks and walk the sub-block
/// wavefronts with the `(thread_y, thread_z)` lane space.
#[allow(clippy::too_many_arguments)]
fn sweep_semiblock<Q: Quantities>(
    s: &SlabSweep<'_, Q>,
    vo_b: &mut [P],
    vi_b: &[P],
    scratch: &mut CellScratch,
    facexy: &mut [P],
    facexz: &mut [P],
    faceyz: &mut [P],
    stepinfo: &StepInfo,
    oib: usize,
    spx: &AxisSpan,
    spy: &AxisSpan,
    spz: &AxisSpan,
    do_block_init_this: bool,
    is_octant_active: bool,
) {
    let octant = stepinfo.octant;
    let iz_base = stepinfo.block_z * s.dims_b.ncell_z;
    let (dir_x, dir_y, dir_z) = (octant.dir_x(), octant.dir_y(), octant.dir_z());

    let nsub_x = ceil_div(spx.hi_up - spx.lo + 1, s.cfg.ncell_x_per_subblock);
    let nsub_y = ceil_div(spy.hi_up - spy.lo + 1, s.cfg.ncell_y_per_subblock);
    let nsub_z = ceil_div(spz.hi_up - spz.lo + 1, s.cfg.ncell_z_per_subblock);

    let geom = WaveGeom::new(nsub_x, nsub_y, nsub_z, s.cfg.nthread_y, s.cfg.nthread_z);
    let nwave = geom.nwave();

    for wave in 0..nwave {
        for tz in 0..s.cfg.nthread_z {
            for ty in 0..s.cfg.nthread_y {
                let ctx = SerialCtx { thread_y: ty, thread_z: tz };
                let at =
                    geom.subblock_at(wave, ctx.thread_y(), ctx.thread_z(), dir_x, dir_y, dir_z);
                let (sub_x, sub_y, sub_z) = at.unwrap_or((0, 0, 0));
                let is_subblock_active = at.is_some();

                let sub = SubblockBounds {
                    ixmin: spx.lo + s.cfg.ncell_x_per_subblock * sub_x,
                    ixmax: spx.lo + s.cfg.ncell_x_per_subblock * (sub_x + 1) - 1,
                    iymin: spy.lo + s.cfg.ncell_y_per_subblock * sub_y,
                    iymax: spy.lo + s.cfg.ncell_y_per_subblock * (sub_y + 1) - 1,
                    izmin: spz.lo + s.cfg.ncell_z_per_subblock * sub_z,
                    izmax: spz.lo + s.cfg.ncell_z_per_subblock * (sub_z + 1) - 1,
                };

                sweep_subblock(
                    s,
                    vo_b,
                    vi_b,
                    scratch,
                    facexy,
                    facexz,
                    faceyz,
                    &ctx,
                    octant,
                    iz_base,
                    oib,
                    sub,
                    is_subblock_active,
                    spx,
                    spy,
                    spz,
                    do_block_init_this,
                    is_octant_active,
                );
            }
        }

        if wave != nwave - 1 {
            SerialCtx::default().sync_yz_threads();
        }
    }
}

// ============================================================================
// Block driver
// ============================================================================

/// Sweep one z-block of one energy slab: loop semi-blocks and octant slots,
/// apply the physical boundary conditions, and dispatch each semi-block.
///
/// Octant slots of one semi-block step write disjoint regions when
/// `nsemiblock == noctant_per_block`; with fewer semi-blocks the slots are
/// serialized here, so overlapping regions still accumulate correctly.
#[allow(clippy::too_many_arguments)]
pub(crate) fn sweep_block_slab<Q: Quantities>(
    s: &SlabSweep<'_, Q>,
    vo_slab: &mut [P],
    vi_slab: &[P],
    facexy: &mut [P],
    facexz: &mut [P],
    faceyz: &mut [P],
    scratch: &mut CellScratch,
    stepinfoall: &StepInfoAll,
    block_init: BlockInitMask,
) {
    let team = SerialCtx::default();
    let nob = s.cfg.noctant_per_block;

    for semiblock in 0..s.cfg.nsemiblock {
        for oib in 0..nob {
            let si = stepinfoall.get(oib);
            let is_octant_active = si.is_active;
            let octant = si.octant;
            let (dir_x, dir_y, dir_z) = (octant.dir_x(), octant.dir_y(), octant.dir_z());

            let spx =
                axis_span(s.dims_b.ncell_x, s.cfg.nsemiblock > 1, semiblock & 1 != 0, dir_x);
            let spy =
                axis_span(s.dims_b.ncell_y, s.cfg.nsemiblock > 2, semiblock & 2 != 0, dir_y);
            let spz =
                axis_span(s.dims_b.ncell_z, s.cfg.nsemiblock > 4, semiblock & 4 != 0, dir_z);

            // Physical boundary conditions, where this semi-block touches a
            // global boundary the octant flows out of.
            if is_octant_active
                && ((dir_z.is_up() && si.block_z == 0 && spz.has_lo)
                    || (!dir_z.is_up() && si.block_z == s.cfg.nblock_z - 1 && spz.has_hi))
            {
                set_boundary_xy(s, facexy, octant, oib, &spx, &spy);
            }

            if is_octant_active
                && ((dir_y.is_up() && s.proc_y_min && spy.has_lo)
                    || (!dir_y.is_up() && s.proc_y_max && spy.has_hi))
            {
                set_boundary_xz(s, facexz, si.block_z, octant, oib, &spx, &spz);
            }

            if is_octant_active
                && ((dir_x.is_up() && s.proc_x_min && spx.has_lo)
                    || (!dir_x.is_up() && s.proc_x_max && spx.has_hi))
            {
                set_boundary_yz(s, faceyz, si.block_z, octant, oib, &spy, &spz);
            }

            team.sync_yz_threads();

            let iz_base = si.block_z * s.dims_b.ncell_z;
            let lo = iz_base * s.z_stride;
            let hi = (iz_base + s.dims_b.ncell_z) * s.z_stride;
            let vi_b = &vi_slab[lo..hi];
            let vo_b = &mut vo_slab[lo..hi];

            let do_block_init_this = block_init.get(oib, semiblock, nob);

            sweep_semiblock(
                s,
                vo_b,
                vi_b,
                scratch,
                facexy,
                facexz,
                faceyz,
                si,
                oib,
                &spx,
                &spy,
                &spz,
                do_block_init_this,
                is_octant_active,
            );
        }

        team.sync_octant_threads();
    }
}

// ============================================================================
// Tests
// ============================================================================
