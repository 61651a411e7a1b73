//! State array initialization and norms

use crate::dims::{Dims, StateIndexer};
use crate::quantities::Quantities;
use crate::{NU, P};

/// Fill a rank's input state with the oracle's manufactured values, using
/// the rank's global offsets along x and y (z is not decomposed).
pub fn initialize_state<Q: Quantities>(
    v: &mut [P],
    dims: &Dims,
    ix_base: usize,
    iy_base: usize,
    quan: &Q,
) {
    let sx = StateIndexer::new(*dims);
    assert_eq!(v.len(), sx.total_len(), "state length mismatch");
    for ie in 0..dims.ne {
        for iz in 0..dims.ncell_z {
            for iy in 0..dims.ncell_y {
                for ix in 0..dims.ncell_x {
                    for im in 0..dims.nm {
                        for iu in 0..NU {
                            v[sx.at(ix, iy, iz, ie, im, iu)] = quan.init_state(
                                ix + ix_base,
                                iy + iy_base,
                                iz,
                                ie,
                                im,
                                iu,
                                dims,
                            );
                        }
                    }
                }
            }
        }
    }
}

/// Zero a state array. Pre-touching the output pages is also what makes the
/// first timed iteration comparable to the rest.
pub fn initialize_state_zero(v: &mut [P]) {
    v.fill(0.0);
}

/// Rank-local squared norm of the output and squared difference between the
/// two state arrays. Callers reduce both across ranks.
pub fn state_norms(vi: &[P], vo: &[P]) -> (f64, f64) {
    assert_eq!(vi.len(), vo.len(), "state length mismatch");
    let mut normsq = 0.0f64;
    let mut normsqdiff = 0.0f64;
    for (&a, &b) in vi.iter().zip(vo) {
        normsq += b * b;
        let d = a - b;
        normsqdiff += d * d;
    }
    (normsq, normsqdiff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantities::ManufacturedQuantities;
    use crate::NM;

    #[test]
    fn norms_of_identical_states_have_zero_difference() {
        let dims = Dims { ncell_x: 2, ncell_y: 3, ncell_z: 2, ne: 2, nm: NM, na: 1 };
        let quan = ManufacturedQuantities::new();
        let len = StateIndexer::new(dims).total_len();
        let mut v = vec![0.0; len];
        initialize_state(&mut v, &dims, 0, 0, &quan);
        assert!(v.iter().all(|&x| x > 0.0), "manufactured state is positive");

        let (normsq, diff) = state_norms(&v, &v);
        assert!(normsq > 0.0);
        assert_eq!(diff, 0.0);

        let mut zero = vec![0.0; len];
        initialize_state_zero(&mut zero);
        let (normsq_zero, diff_zero) = state_norms(&v, &zero);
        assert_eq!(normsq_zero, 0.0);
        assert!(diff_zero > 0.0);
    }

    #[test]
    fn rank_offsets_shift_the_manufactured_pattern() {
        let dims = Dims { ncell_x: 2, ncell_y: 2, ncell_z: 1, ne: 1, nm: NM, na: 1 };
        let quan = ManufacturedQuantities::new();
        let len = StateIndexer::new(dims).total_len();
        let mut a = vec![0.0; len];
        let mut b = vec![0.0; len];
        initialize_state(&mut a, &dims, 0, 0, &quan);
        initialize_state(&mut b, &dims, 2, 0, &quan);
        // Same extents, different global window: values generally differ.
        assert_ne!(a, b);
    }
}
