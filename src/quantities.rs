//! Physics oracle contract and the manufactured testing quantities
//!
//! The sweep core never computes physics itself. It consumes a [`Quantities`]
//! contract for three jobs: seeding upstream faces on the global boundary,
//! filling the spherical-harmonics transform matrices, and the per-cell
//! upstream-face solve that couples a cell to its three upstream neighbours.
//!
//! ## Manufactured solution
//!
//! [`ManufacturedQuantities`] is a testing oracle with one design goal: the
//! manufactured state is an **exact fixed point** of the sweep. Every value
//! is a product of power-of-two scale factors (space, energy, unknown, angle,
//! octant) and the solve is a weighted average whose weights sum to exactly
//! one, so all arithmetic is exact in IEEE-754 and one full sweep reproduces
//! the input state bit for bit.
//!
//! The construction:
//! - moment-space state: `state = af(im) * sf_space * sf_e * sf_u`, where
//!   `af` and every `sf_*` is a power of two;
//! - `a_from_m` cancels `af(im)` and injects the angle factor, so the
//!   angle-space value of a cell is `sf_angle * sf_space * sf_e * sf_u`;
//! - faces carry the **space-normalized** angle value scaled by the octant
//!   factor. The solve strips the space and octant factors, takes the
//!   weighted average of the state term and the three upstream faces (all
//!   equal after normalization), and re-applies the factors;
//! - `m_from_a` folds the octant count back in, so summing the eight octant
//!   contributions restores the moment-space state exactly.

#![allow(missing_docs)]

use crate::dims::{Dims, FaceXyMut, FaceXzMut, FaceYzMut, Octant};
use crate::{NM, NOCTANT, NU, P};

/// Coordinates of the cell a solve applies to. `ix/iy/iz` are block-local;
/// `ix_g/iy_g/iz_g` are absolute in the global grid.
#[derive(Copy, Clone, Debug)]
pub struct CellCoords {
    pub ix: usize,
    pub iy: usize,
    pub iz: usize,
    pub ie: usize,
    pub ix_g: usize,
    pub iy_g: usize,
    pub iz_g: usize,
}

/// Physics oracle consumed by the sweep core.
///
/// Ghost coordinates handed to the face initializers are signed: the
/// coordinate along the face's perpendicular axis is `-1` or the global cell
/// count, one cell outside the grid in the octant's upstream direction.
pub trait Quantities {
    /// Manufactured moment-space state value.
    fn init_state(
        &self,
        ix_g: usize,
        iy_g: usize,
        iz_g: usize,
        ie: usize,
        im: usize,
        iu: usize,
        dims_g: &Dims,
    ) -> P;

    /// Upstream value for an xy-face cell on the global z boundary.
    #[allow(clippy::too_many_arguments)]
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
    ) -> P;

    /// Upstream value for an xz-face cell on the global y boundary.
    #[allow(clippy::too_many_arguments)]
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
    ) -> P;

    /// Upstream value for a yz-face cell on the global x boundary.
    #[allow(clippy::too_many_arguments)]
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
    ) -> P;

    /// Entry of the moment-to-angle transform.
    fn init_a_from_m(&self, im: usize, ia: usize, octant: Octant, dims: &Dims) -> P;

    /// Entry of the angle-to-moment transform.
    fn init_m_from_a(&self, im: usize, ia: usize, octant: Octant, dims: &Dims) -> P;

    /// In-place update of one angle lane of `vslocal` from the three
    /// upstream faces, with write-through of the downstream face values.
    ///
    /// `vslocal` is the angle tile laid out `[lane][iu]`; `lane` addresses
    /// this call's slot and `ia` is the absolute angle. Must be a no-op when
    /// `is_active` is false (masked lane or masked cell).
    #[allow(clippy::too_many_arguments)]
    fn solve(
        &self,
        vslocal: &mut [P],
        lane: usize,
        ia: usize,
        facexy: &mut FaceXyMut<'_>,
        facexz: &mut FaceXzMut<'_>,
        faceyz: &mut FaceYzMut<'_>,
        cell: CellCoords,
        octant: Octant,
        octant_in_block: usize,
        dims_b: &Dims,
        dims_g: &Dims,
        is_active: bool,
    );

    /// Cost model for one angle-space element solve, used only for the
    /// flop-rate report.
    fn flops_per_solve(&self, dims: &Dims) -> f64;
}

// ============================================================================
// Manufactured testing quantities
// ============================================================================

/// Testing physics whose manufactured state is an exact fixed point of the
/// sweep. See the module docs for the construction.
#[derive(Copy, Clone, Debug, Default)]
pub struct ManufacturedQuantities;

impl ManufacturedQuantities {
    pub fn new() -> Self {
        ManufacturedQuantities
    }

    /// Spatial scale factor, a power of two in `{1, 2, 4, 8}` derived from
    /// the global cell coordinates.
    #[inline]
    pub(crate) fn scalefactor_space(ix_g: usize, iy_g: usize, iz_g: usize) -> P {
        (1u64 << ((3 * ix_g + 5 * iy_g + 7 * iz_g + 2) % 4)) as P
    }

    #[inline]
    pub(crate) fn scalefactor_angle(ia: usize) -> P {
        (1u64 << (ia & 7)) as P
    }

    #[inline]
    pub(crate) fn scalefactor_energy(ie: usize) -> P {
        (1u64 << (ie & 3)) as P
    }

    #[inline]
    pub(crate) fn scalefactor_unknown(iu: usize) -> P {
        (1u64 << (iu & 1)) as P
    }

    #[inline]
    pub(crate) fn scalefactor_octant(octant: Octant) -> P {
        (1u64 << octant.index()) as P
    }

    /// Moment profile of the manufactured state, a power of two so the
    /// transform can cancel it exactly.
    #[inline]
    pub(crate) fn affine_moment(im: usize) -> P {
        (1u64 << (im & 3)) as P
    }

    /// Angle quadrature weight. The weights are `2^-(ia+1)` with the last
    /// angle absorbing the tail, so they are powers of two summing to
    /// exactly one.
    #[inline]
    pub(crate) fn angle_weight(ia: usize, na: usize) -> P {
        debug_assert!(ia < na);
        if ia + 1 == na {
            (0.5 as P).powi(na as i32 - 1)
        } else {
            (0.5 as P).powi(ia as i32 + 1)
        }
    }

    /// Space-normalized face value: everything but the spatial factor.
    #[inline]
    fn face_value(ie: usize, ia: usize, iu: usize, octant: Octant) -> P {
        Self::scalefactor_angle(ia)
            * Self::scalefactor_energy(ie)
            * Self::scalefactor_unknown(iu)
            * Self::scalefactor_octant(octant)
    }

    const XFLUXWEIGHT: P = 0.5;
    const YFLUXWEIGHT: P = 0.125;

    /// z-face weight, angle-dependent, a power of two in `[1/64, 1/8]`.
    #[inline]
    fn zfluxweight(ia: usize) -> P {
        0.125 * (0.5 as P).powi((ia & 3) as i32)
    }

    /// State-term weight, chosen so the four weights sum to exactly one.
    #[inline]
    fn statefluxweight(ia: usize) -> P {
        0.25 + (0.125 - Self::zfluxweight(ia))
    }
}

impl Quantities for ManufacturedQuantities {
    fn init_state(
        &self,
        ix_g: usize,
        iy_g: usize,
        iz_g: usize,
        ie: usize,
        im: usize,
        iu: usize,
        _dims_g: &Dims,
    ) -> P {
        Self::affine_moment(im)
            * Self::scalefactor_space(ix_g, iy_g, iz_g)
            * Self::scalefactor_energy(ie)
            * Self::scalefactor_unknown(iu)
    }

    fn init_facexy(
        &self,
        _ix_g: i64,
        _iy_g: i64,
        _iz_g: i64,
        ie: usize,
        ia: usize,
        iu: usize,
        octant: Octant,
        _dims_g: &Dims,
    ) -> P {
        Self::face_value(ie, ia, iu, octant)
    }

    fn init_facexz(
        &self,
        _ix_g: i64,
        _iy_g: i64,
        _iz_g: i64,
        ie: usize,
        ia: usize,
        iu: usize,
        octant: Octant,
        _dims_g: &Dims,
    ) -> P {
        Self::face_value(ie, ia, iu, octant)
    }

    fn init_faceyz(
        &self,
        _ix_g: i64,
        _iy_g: i64,
        _iz_g: i64,
        ie: usize,
        ia: usize,
        iu: usize,
        octant: Octant,
        _dims_g: &Dims,
    ) -> P {
        Self::face_value(ie, ia, iu, octant)
    }

    fn init_a_from_m(&self, im: usize, ia: usize, _octant: Octant, _dims: &Dims) -> P {
        // Cancels af(im) and the moment count, injects the angle factor.
        Self::scalefactor_angle(ia) / (Self::affine_moment(im) * NM as P)
    }

    fn init_m_from_a(&self, im: usize, ia: usize, _octant: Octant, dims: &Dims) -> P {
        // Restores af(im), strips the angle factor, folds in the quadrature
        // weight and the octant count.
        Self::affine_moment(im) * Self::angle_weight(ia, dims.na)
            / (Self::scalefactor_angle(ia) * NOCTANT as P)
    }

    fn solve(
        &self,
        vslocal: &mut [P],
        lane: usize,
        ia: usize,
        facexy: &mut FaceXyMut<'_>,
        facexz: &mut FaceXzMut<'_>,
        faceyz: &mut FaceYzMut<'_>,
        cell: CellCoords,
        octant: Octant,
        octant_in_block: usize,
        _dims_b: &Dims,
        _dims_g: &Dims,
        is_active: bool,
    ) {
        if !is_active {
            return;
        }

        let oib = octant_in_block;
        let sf_space = Self::scalefactor_space(cell.ix_g, cell.iy_g, cell.iz_g);
        let sf_oct = Self::scalefactor_octant(octant);
        let wz = Self::zfluxweight(ia);
        let ws = Self::statefluxweight(ia);

        // The state term and the incoming faces are first normalized (space
        // and octant factors stripped), combined with a weighted average
        // whose weights sum to one, then rescaled and stored. At the
        // manufactured fixed point all four normalized terms are equal, so
        // the averaged result reproduces them exactly.
        for iu in 0..NU {
            let v_in = vslocal[lane * NU + iu] / sf_space;
            let fxy = facexy.at(oib, cell.ix, cell.iy, ia, iu) / sf_oct;
            let fxz = facexz.at(oib, cell.ix, cell.iz, ia, iu) / sf_oct;
            let fyz = faceyz.at(oib, cell.iy, cell.iz, ia, iu) / sf_oct;

            let r = ws * v_in + Self::XFLUXWEIGHT * fyz + Self::YFLUXWEIGHT * fxz + wz * fxy;

            vslocal[lane * NU + iu] = r * sf_space;
            let downstream = r * sf_oct;
            *facexy.at_mut(oib, cell.ix, cell.iy, ia, iu) = downstream;
            *facexz.at_mut(oib, cell.ix, cell.iz, ia, iu) = downstream;
            *faceyz.at_mut(oib, cell.iy, cell.iz, ia, iu) = downstream;
        }
    }

    fn flops_per_solve(&self, _dims: &Dims) -> f64 {
        // Per angle-space element: four normalizations, four weighted
        // products, three adds, two rescales.
        13.0
    }
}

// ============================================================================
// Diagnostic oracle for round-trip checks (tests only)
// ============================================================================

/// Identity physics: identity transforms scaled by `1/NOCTANT`, a solve that
/// leaves everything untouched. One sweep is then the identity map on the
/// state, which pins down the kernel's accumulation discipline.
#[cfg(test)]
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct ScaledIdentityQuantities;

#[cfg(test)]
impl Quantities for ScaledIdentityQuantities {
    fn init_state(
        &self,
        ix_g: usize,
        iy_g: usize,
        iz_g: usize,
        ie: usize,
        im: usize,
        iu: usize,
        _dims_g: &Dims,
    ) -> P {
        (1 + ix_g + 2 * iy_g + 3 * iz_g + ie + im + iu) as P
    }

    fn init_facexy(
        &self,
        _ix_g: i64,
        _iy_g: i64,
        _iz_g: i64,
        _ie: usize,
        _ia: usize,
        _iu: usize,
        _octant: Octant,
        _dims_g: &Dims,
    ) -> P {
        0.0
    }

    fn init_facexz(
        &self,
        _ix_g: i64,
        _iy_g: i64,
        _iz_g: i64,
        _ie: usize,
        _ia: usize,
        _iu: usize,
        _octant: Octant,
        _dims_g: &Dims,
    ) -> P {
        0.0
    }

    fn init_faceyz(
        &self,
        _ix_g: i64,
        _iy_g: i64,
        _iz_g: i64,
        _ie: usize,
        _ia: usize,
        _iu: usize,
        _octant: Octant,
        _dims_g: &Dims,
    ) -> P {
        0.0
    }

    fn init_a_from_m(&self, im: usize, ia: usize, _octant: Octant, _dims: &Dims) -> P {
        if im == ia {
            1.0
        } else {
            0.0
        }
    }

    fn init_m_from_a(&self, im: usize, ia: usize, _octant: Octant, _dims: &Dims) -> P {
        if im == ia {
            1.0 / NOCTANT as P
        } else {
            0.0
        }
    }

    fn solve(
        &self,
        _vslocal: &mut [P],
        _lane: usize,
        _ia: usize,
        _facexy: &mut FaceXyMut<'_>,
        _facexz: &mut FaceXzMut<'_>,
        _faceyz: &mut FaceYzMut<'_>,
        _cell: CellCoords,
        _octant: Octant,
        _octant_in_block: usize,
        _dims_b: &Dims,
        _dims_g: &Dims,
        _is_active: bool,
    ) {
    }

    fn flops_per_solve(&self, _dims: &Dims) -> f64 {
        0.0
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dims::xform_idx;

    type Q = ManufacturedQuantities;

    #[test]
    fn flux_weights_sum_to_exactly_one() {
        for ia in 0..64 {
            let total = Q::statefluxweight(ia)
                + Q::XFLUXWEIGHT
                + Q::YFLUXWEIGHT
                + Q::zfluxweight(ia);
            assert_eq!(total, 1.0, "ia {ia}");
        }
    }

    #[test]
    fn angle_weights_total_exactly_one() {
        for na in [1usize, 2, 5, 8, 33] {
            let total: P = (0..na).map(|ia| Q::angle_weight(ia, na)).sum();
            assert_eq!(total, 1.0, "na {na}");
        }
    }

    #[test]
    fn transforms_cancel_exactly_over_all_octants() {
        let quan = ManufacturedQuantities::new();
        for na in [1usize, 5, 16, 33] {
            let dims = Dims { ncell_x: 1, ncell_y: 1, ncell_z: 1, ne: 1, nm: NM, na };
            for octant in Octant::all() {
                // Moment to angle: the af(im) profile maps to sf_angle(ia).
                for ia in 0..na {
                    let v: P = (0..NM)
                        .map(|im| {
                            quan.init_a_from_m(im, ia, octant, &dims) * Q::affine_moment(im)
                        })
                        .sum();
                    assert_eq!(v, Q::scalefactor_angle(ia));
                }
                // Angle to moment, summed over octants: back to af(im).
                for im in 0..NM {
                    let v: P = (0..na)
                        .map(|ia| {
                            quan.init_m_from_a(im, ia, octant, &dims) * Q::scalefactor_angle(ia)
                        })
                        .sum();
                    assert_eq!(v * NOCTANT as P, Q::affine_moment(im));
                }
            }
        }
    }

    #[test]
    fn solve_reproduces_the_manufactured_point_and_faces() {
        let quan = ManufacturedQuantities::new();
        let dims = Dims { ncell_x: 2, ncell_y: 2, ncell_z: 2, ne: 1, nm: NM, na: 3 };
        let nob = 1;
        let octant = Octant::from_index(5);
        let (ie, ia, lane) = (0usize, 2usize, 0usize);

        let mut fxy = vec![0.0; FaceXyMut::slab_len(&dims, nob)];
        let mut fxz = vec![0.0; FaceXzMut::slab_len(&dims, nob)];
        let mut fyz = vec![0.0; FaceYzMut::slab_len(&dims, nob)];
        let mut vxy = FaceXyMut::new(&mut fxy, dims, nob);
        let mut vxz = FaceXzMut::new(&mut fxz, dims, nob);
        let mut vyz = FaceYzMut::new(&mut fyz, dims, nob);

        let cell = CellCoords { ix: 1, iy: 0, iz: 1, ie, ix_g: 1, iy_g: 0, iz_g: 1 };
        let sf_space = Q::scalefactor_space(cell.ix_g, cell.iy_g, cell.iz_g);
        let expect_vs = Q::scalefactor_angle(ia)
            * sf_space
            * Q::scalefactor_energy(ie)
            * Q::scalefactor_unknown(0);
        let face = Q::face_value(ie, ia, 0, octant);

        // Seed upstream faces and the angle-space state at the fixed point.
        for iu in 0..NU {
            let s = Q::scalefactor_unknown(iu);
            *vxy.at_mut(0, cell.ix, cell.iy, ia, iu) = face / Q::scalefactor_unknown(0) * s;
            *vxz.at_mut(0, cell.ix, cell.iz, ia, iu) = face / Q::scalefactor_unknown(0) * s;
            *vyz.at_mut(0, cell.iy, cell.iz, ia, iu) = face / Q::scalefactor_unknown(0) * s;
        }
        let mut vslocal = vec![0.0; (lane + 1) * NU];
        for iu in 0..NU {
            vslocal[lane * NU + iu] = expect_vs / Q::scalefactor_unknown(0)
                * Q::scalefactor_unknown(iu);
        }

        quan.solve(
            &mut vslocal, lane, ia, &mut vxy, &mut vxz, &mut vyz, cell, octant, 0, &dims, &dims,
            true,
        );

        for iu in 0..NU {
            let s = Q::scalefactor_unknown(iu) / Q::scalefactor_unknown(0);
            assert_eq!(vslocal[lane * NU + iu], expect_vs * s, "iu {iu}");
            assert_eq!(vxy.at(0, cell.ix, cell.iy, ia, iu), face * s, "xy iu {iu}");
            assert_eq!(vxz.at(0, cell.ix, cell.iz, ia, iu), face * s, "xz iu {iu}");
            assert_eq!(vyz.at(0, cell.iy, cell.iz, ia, iu), face * s, "yz iu {iu}");
        }
    }

    #[test]
    fn inactive_solve_is_a_no_op() {
        let quan = ManufacturedQuantities::new();
        let dims = Dims { ncell_x: 1, ncell_y: 1, ncell_z: 1, ne: 1, nm: NM, na: 1 };
        let mut fxy = vec![7.0; FaceXyMut::slab_len(&dims, 1)];
        let mut fxz = vec![7.0; FaceXzMut::slab_len(&dims, 1)];
        let mut fyz = vec![7.0; FaceYzMut::slab_len(&dims, 1)];
        let mut vxy = FaceXyMut::new(&mut fxy, dims, 1);
        let mut vxz = FaceXzMut::new(&mut fxz, dims, 1);
        let mut vyz = FaceYzMut::new(&mut fyz, dims, 1);
        let mut vslocal = vec![3.0; NU];
        let cell = CellCoords { ix: 0, iy: 0, iz: 0, ie: 0, ix_g: 0, iy_g: 0, iz_g: 0 };

        quan.solve(
            &mut vslocal,
            0,
            0,
            &mut vxy,
            &mut vxz,
            &mut vyz,
            cell,
            Octant::from_index(0),
            0,
            &dims,
            &dims,
            false,
        );

        assert!(vslocal.iter().all(|&v| v == 3.0));
        assert!(fxy.iter().chain(&fxz).chain(&fyz).all(|&v| v == 7.0));
    }

    #[test]
    fn transform_layout_is_octant_major() {
        // Spot-check the shared index helper against a hand computation.
        assert_eq!(xform_idx(NM, 5, 0, 0, Octant::from_index(0)), 0);
        assert_eq!(xform_idx(NM, 5, 2, 3, Octant::from_index(1)), (NM + 2) * 5 + 3);
    }
}
