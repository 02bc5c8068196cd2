// src/redist/normalize.rs
//
// Kappa normalization: recover a pointwise Q from a volume-weighted κQ by
// averaging over the monotone-path neighborhood N(c):
//
//   Q(c) = Σ_{d∈N(c)} (κQ)(d) / Σ_{d∈N(c)} κ(d)
//
// Only VoFs whose neighborhood contains a cut cell are stored. Every other
// VoF is regular with a regular neighborhood, N(c) = {c}, and is left
// untouched (κ = 1, so the operator is exactly the identity there).

use std::collections::BTreeSet;
use std::ops::Range;

use rayon::prelude::*;

use crate::amr::layout::{LevelLayout, TopologyId};
use crate::error::{RedistError, RedistResult, check_components};
use crate::field::LevelState;
use crate::geometry::{EbGeometry, VofId, vofs_at};
use crate::redist::path::{monotone_neighborhood, monotone_neighbors};

pub struct KappaNormalizer {
    topology: TopologyId,
    radius: usize,
    /// (c, N(c)) with c first in N(c); sorted by c.
    neighborhoods: Vec<(VofId, Vec<VofId>)>,
}

impl KappaNormalizer {
    pub fn new<G: EbGeometry + ?Sized>(geom: &G, layout: &LevelLayout, radius: usize) -> Self {
        let mut candidates: BTreeSet<VofId> = BTreeSet::new();
        for p in layout.patches() {
            for iv in p.rect.cells() {
                for vof in vofs_at(geom, iv) {
                    if !geom.is_irregular(vof) {
                        continue;
                    }
                    candidates.insert(vof);
                    candidates.extend(
                        monotone_neighbors(geom, vof, radius)
                            .into_iter()
                            .filter(|v| layout.contains(v.iv)),
                    );
                }
            }
        }

        let neighborhoods: Vec<(VofId, Vec<VofId>)> = candidates
            .into_iter()
            .filter_map(|c| {
                let nbhd: Vec<VofId> = monotone_neighborhood(geom, c, radius)
                    .into_iter()
                    .filter(|v| layout.contains(v.iv))
                    .collect();
                nbhd.iter()
                    .any(|&v| geom.is_irregular(v))
                    .then_some((c, nbhd))
            })
            .collect();

        log::debug!(
            "kappa normalizer on level {}: {} neighborhoods (radius {})",
            layout.level(),
            neighborhoods.len(),
            radius
        );

        Self {
            topology: layout.topology,
            radius,
            neighborhoods,
        }
    }

    #[inline]
    pub fn radius(&self) -> usize {
        self.radius
    }

    #[inline]
    pub fn topology(&self) -> TopologyId {
        self.topology
    }

    /// N(vof), including vof itself. Cells away from the boundary map to {vof}.
    pub fn neighborhood(&self, vof: VofId) -> Vec<VofId> {
        match self.neighborhoods.binary_search_by(|(c, _)| c.cmp(&vof)) {
            Ok(n) => self.neighborhoods[n].1.clone(),
            Err(_) => vec![vof],
        }
    }

    /// Normalize the components in `comps` of `q` in place.
    pub fn normalize(&self, q: &mut LevelState, comps: Range<usize>) -> RedistResult<()> {
        check_components(&comps, q.ncomp())?;
        if q.topology() != self.topology {
            return Err(RedistError::topology(
                self.topology.level,
                format!(
                    "normalizer built for generation {} applied to state of generation {}",
                    self.topology.generation,
                    q.topology().generation
                ),
            ));
        }

        let src: &LevelState = q;
        let updates: Vec<(VofId, Vec<f64>)> = self
            .neighborhoods
            .par_iter()
            .map(|(c, nbhd)| {
                let mut sum_k = 0.0;
                let mut sum_q = vec![0.0; comps.len()];
                for &d in nbhd {
                    let (Some(k), Some(vals)) = (src.kappa(d), src.values(d)) else {
                        continue;
                    };
                    sum_k += k;
                    for (acc, comp) in sum_q.iter_mut().zip(comps.clone()) {
                        *acc += vals[comp];
                    }
                }
                if sum_k <= 0.0 {
                    return Err(RedistError::DegenerateStencil { vof: *c, sum: sum_k });
                }
                sum_q.iter_mut().for_each(|v| *v /= sum_k);
                Ok((*c, sum_q))
            })
            .collect::<RedistResult<_>>()?;

        for (c, vals) in updates {
            let dst = q.values_mut(c)?;
            for (comp, v) in comps.clone().zip(vals) {
                dst[comp] = v;
            }
        }
        Ok(())
    }

    /// Normalize every component of `q`.
    pub fn normalize_all(&self, q: &mut LevelState) -> RedistResult<()> {
        let ncomp = q.ncomp();
        self.normalize(q, 0..ncomp)
    }
}
