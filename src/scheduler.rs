//! KBA step schedule
//!
//! ## Overview
//! The schedule answers, for every global step and every octant slot of a
//! block (`octant_in_block`), three questions for a given rank: which octant
//! is being processed, which z-block the rank works on, and whether the rank
//! is active at all.
//!
//! The eight octants are folded into `noctant_per_block` slots. Axes x, y, z
//! are folded when `noctant_per_block` reaches 2, 4, 8 respectively; the slot
//! index supplies the direction bits of the folded axes and the remaining
//! bits advance as an **octant group** counter, in increasing octant order
//! (`octant = dir_x | dir_y<<1 | dir_z<<2`). Groups run in sequence; one
//! group's pipeline takes `nblock_z + nproc_x + nproc_y - 2` steps.
//!
//! ## Wavefront activity
//! Within a group, the sweep enters the rank grid at the corner the octant
//! points away from. Folding the rank coordinates against the octant's x/y
//! directions reduces every octant to the up/up picture: at local step `t`
//! the rank at folded coordinates `(fpx, fpy)` processes wavefront
//! `w = t - fpx - fpy` and is active iff `0 <= w < nblock_z`. The z-block is
//! `w` for up-z octants and `nblock_z - 1 - w` for down-z octants, so block
//! indices advance monotonically in the octant's z direction.
//!
//! The scheduler is stateless apart from its configuration; every query is a
//! pure function of `(step, octant_in_block, proc_x, proc_y)`.

use crate::dims::{Dir, Octant};
use crate::NOCTANT;

/// Work for one rank on one `(step, octant_in_block)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StepInfo {
    /// Octant being processed in this slot.
    pub octant: Octant,
    /// z-block this rank processes (meaningful only when active).
    pub block_z: usize,
    /// Whether this rank participates in this slot at this step.
    pub is_active: bool,
}

/// The `noctant_per_block` step infos of one global step.
#[derive(Copy, Clone, Debug)]
pub struct StepInfoAll {
    infos: [StepInfo; NOCTANT],
    n: usize,
}

impl StepInfoAll {
    /// Step info for one octant slot.
    #[inline]
    pub fn get(&self, octant_in_block: usize) -> &StepInfo {
        assert!(
            octant_in_block < self.n,
            "octant_in_block {octant_in_block} out of range (noctant_per_block {})",
            self.n
        );
        &self.infos[octant_in_block]
    }

    /// Number of octant slots per block.
    #[inline]
    pub fn len(&self) -> usize {
        self.n
    }

    /// Whether the step carries no octant slots (never, in practice).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Iterate `(octant_in_block, info)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &StepInfo)> {
        self.infos[..self.n].iter().enumerate()
    }
}

/// Schedule configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// `noctant_per_block` must divide the octant count as a power of two.
    #[error("noctant_per_block must be one of 1, 2, 4, 8 (got {0})")]
    BadOctantsPerBlock(usize),
    /// Degenerate pipeline.
    #[error("nblock_z must be positive (got {0})")]
    BadBlockCount(usize),
    /// Degenerate rank grid.
    #[error("process grid must be at least 1x1 (got {0}x{1})")]
    BadProcGrid(usize, usize),
}

/// Enumerates the global steps of a sweep and the per-rank work at each.
#[derive(Copy, Clone, Debug)]
pub struct StepScheduler {
    nproc_x: usize,
    nproc_y: usize,
    nblock_z: usize,
    noctant_per_block: usize,
}

impl StepScheduler {
    /// Validate and build a schedule.
    pub fn new(
        nproc_x: usize,
        nproc_y: usize,
        nblock_z: usize,
        noctant_per_block: usize,
    ) -> Result<Self, ScheduleError> {
        if !matches!(noctant_per_block, 1 | 2 | 4 | 8) {
            return Err(ScheduleError::BadOctantsPerBlock(noctant_per_block));
        }
        if nblock_z == 0 {
            return Err(ScheduleError::BadBlockCount(nblock_z));
        }
        if nproc_x == 0 || nproc_y == 0 {
            return Err(ScheduleError::BadProcGrid(nproc_x, nproc_y));
        }
        Ok(StepScheduler { nproc_x, nproc_y, nblock_z, noctant_per_block })
    }

    /// Octant slots processed together per block.
    #[inline]
    pub fn noctant_per_block(&self) -> usize {
        self.noctant_per_block
    }

    /// Octant groups processed in sequence.
    #[inline]
    pub fn ngroup(&self) -> usize {
        NOCTANT / self.noctant_per_block
    }

    /// Pipeline length of one octant group.
    #[inline]
    pub fn nstep_per_group(&self) -> usize {
        self.nblock_z + self.nproc_x + self.nproc_y - 2
    }

    /// Total global steps of one sweep.
    #[inline]
    pub fn nstep(&self) -> usize {
        self.ngroup() * self.nstep_per_group()
    }

    /// Octant processed by slot `octant_in_block` during `group`.
    ///
    /// Folded axes take their direction bit from the slot index, unfolded
    /// axes from the group counter, so slots of one group differ exactly in
    /// the folded directions.
    pub fn octant_of(&self, group: usize, octant_in_block: usize) -> Octant {
        debug_assert!(group < self.ngroup());
        debug_assert!(octant_in_block < self.noctant_per_block);
        let oib = octant_in_block;
        match self.noctant_per_block {
            1 => Octant::from_index(group),
            2 => Octant::from_dirs(
                Dir::from_bit(oib & 1),
                Dir::from_bit(group & 1),
                Dir::from_bit((group >> 1) & 1),
            ),
            4 => Octant::from_dirs(
                Dir::from_bit(oib & 1),
                Dir::from_bit((oib >> 1) & 1),
                Dir::from_bit(group & 1),
            ),
            8 => Octant::from_index(oib),
            _ => unreachable!("noctant_per_block validated at construction"),
        }
    }

    /// Work for one rank at one `(step, octant_in_block)`.
    pub fn stepinfo(
        &self,
        step: usize,
        octant_in_block: usize,
        proc_x: usize,
        proc_y: usize,
    ) -> StepInfo {
        assert!(step < self.nstep(), "step {step} out of range ({})", self.nstep());
        assert!(proc_x < self.nproc_x && proc_y < self.nproc_y, "rank off the process grid");

        let group = step / self.nstep_per_group();
        let t = step % self.nstep_per_group();
        let octant = self.octant_of(group, octant_in_block);

        let fpx = match octant.dir_x() {
            Dir::Up => proc_x,
            Dir::Dn => self.nproc_x - 1 - proc_x,
        };
        let fpy = match octant.dir_y() {
            Dir::Up => proc_y,
            Dir::Dn => self.nproc_y - 1 - proc_y,
        };

        let wave = t as isize - fpx as isize - fpy as isize;
        let is_active = wave >= 0 && (wave as usize) < self.nblock_z;
        let block_z = if is_active {
            let w = wave as usize;
            match octant.dir_z() {
                Dir::Up => w,
                Dir::Dn => self.nblock_z - 1 - w,
            }
        } else {
            0
        };

        StepInfo { octant, block_z, is_active }
    }

    /// All octant slots of one step for one rank.
    pub fn stepinfo_all(&self, step: usize, proc_x: usize, proc_y: usize) -> StepInfoAll {
        let mut infos = [StepInfo {
            octant: Octant::from_index(0),
            block_z: 0,
            is_active: false,
        }; NOCTANT];
        for (oib, slot) in infos.iter_mut().enumerate().take(self.noctant_per_block) {
            *slot = self.stepinfo(step, oib, proc_x, proc_y);
        }
        StepInfoAll { infos, n: self.noctant_per_block }
    }

    // ------------------------------------------------------------------
    // Neighbour routing for face exchange
    // ------------------------------------------------------------------

    /// Rank supplying this rank's upstream yz face for `octant`, if any.
    /// `None` means the rank sits on the global boundary along the octant's
    /// x direction and the boundary setters own that face.
    #[inline]
    pub fn upstream_x(&self, octant: Octant, proc_x: usize) -> Option<usize> {
        match octant.dir_x() {
            Dir::Up => proc_x.checked_sub(1),
            Dir::Dn => (proc_x + 1 < self.nproc_x).then_some(proc_x + 1),
        }
    }

    /// Rank consuming this rank's downstream yz face for `octant`, if any.
    #[inline]
    pub fn downstream_x(&self, octant: Octant, proc_x: usize) -> Option<usize> {
        match octant.dir_x() {
            Dir::Up => (proc_x + 1 < self.nproc_x).then_some(proc_x + 1),
            Dir::Dn => proc_x.checked_sub(1),
        }
    }

    /// Rank supplying this rank's upstream xz face for `octant`, if any.
    #[inline]
    pub fn upstream_y(&self, octant: Octant, proc_y: usize) -> Option<usize> {
        match octant.dir_y() {
            Dir::Up => proc_y.checked_sub(1),
            Dir::Dn => (proc_y + 1 < self.nproc_y).then_some(proc_y + 1),
        }
    }

    /// Rank consuming this rank's downstream xz face for `octant`, if any.
    #[inline]
    pub fn downstream_y(&self, octant: Octant, proc_y: usize) -> Option<usize> {
        match octant.dir_y() {
            Dir::Up => (proc_y + 1 < self.nproc_y).then_some(proc_y + 1),
            Dir::Dn => proc_y.checked_sub(1),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
