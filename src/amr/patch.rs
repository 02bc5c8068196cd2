// src/amr/patch.rs
//
// Per-patch coarse/fine transfers between adjacent levels.
//
// Fine VoFs map to coarse VoFs with `EbGeometry::coarsen_vof`, which
// resolves multi-valued coarse cells by connectivity.

use std::ops::Range;

use crate::amr::hierarchy::EbLevel;
use crate::amr::layout::PatchBox;
use crate::amr::rect::Rect2i;
use crate::error::{RedistResult, check_components};
use crate::geometry::{VofId, vofs_at};

/// Restrict (average) the VoFs of one fine patch onto the coarse VoFs it covers.
///
/// The average is kappa-weighted, `q_c = Σ κ_f q_f / Σ κ_f`, so the
/// volume-weighted content of the covered region is the same on both levels
/// whenever the coarse kappa is the mean of the fine kappas.
pub fn restrict_to_coarse(
    fine: &EbLevel,
    patch: &PatchBox,
    coarse: &mut EbLevel,
    comps: Range<usize>,
) -> RedistResult<()> {
    check_components(&comps, fine.state.ncomp())?;
    let r = fine.ratio();
    let coarse_rect = patch.rect.coarsen(r);

    for civ in coarse_rect.cells() {
        let fine_cells = Rect2i::new(civ[0] * r, civ[1] * r, r, r);
        let parents: Vec<VofId> = vofs_at(coarse.geometry.as_ref(), civ).collect();

        for cv in parents {
            let mut sum_k = 0.0;
            let mut sum_q = vec![0.0; comps.len()];
            for fiv in fine_cells.cells().filter(|&iv| patch.rect.contains(iv)) {
                for fv in vofs_at(fine.geometry.as_ref(), fiv) {
                    if fine.geometry.coarsen_vof(fv, r, coarse.geometry.as_ref()) != Some(cv) {
                        continue;
                    }
                    let (Some(k), Some(vals)) = (fine.state.kappa(fv), fine.state.values(fv)) else {
                        continue;
                    };
                    sum_k += k;
                    for (acc, c) in sum_q.iter_mut().zip(comps.clone()) {
                        *acc += k * vals[c];
                    }
                }
            }
            if sum_k <= 0.0 || !coarse.state.contains(cv) {
                continue;
            }
            let dst = coarse.state.values_mut(cv)?;
            for (c, s) in comps.clone().zip(sum_q) {
                dst[c] = s / sum_k;
            }
        }
    }
    Ok(())
}

/// Initialise the VoFs of one fine patch by piecewise-constant injection of
/// their coarse parents. VoFs without a coarse parent keep their value.
pub fn fill_from_coarse(
    fine: &mut EbLevel,
    patch: &PatchBox,
    coarse: &EbLevel,
) -> RedistResult<()> {
    let r = fine.ratio();
    for iv in patch.rect.cells() {
        let here: Vec<VofId> = vofs_at(fine.geometry.as_ref(), iv).collect();
        for fv in here {
            let Some(cv) = fine.geometry.coarsen_vof(fv, r, coarse.geometry.as_ref()) else {
                continue;
            };
            let Some(src) = coarse.state.values(cv) else {
                continue;
            };
            fine.state.values_mut(fv)?.copy_from_slice(src);
        }
    }
    Ok(())
}
