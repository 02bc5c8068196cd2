// src/amr/hierarchy.rs

use std::ops::Range;

use crate::amr::layout::{LevelLayout, TopologyId, WorkerId};
use crate::amr::patch::{fill_from_coarse, restrict_to_coarse};
use crate::amr::rect::Rect2i;
use crate::error::RedistResult;
use crate::field::LevelState;
use crate::geometry::EbGeometry;

/// One level of the hierarchy: geometry, patch layout and state.
pub struct EbLevel {
    pub geometry: Box<dyn EbGeometry>,
    pub layout: LevelLayout,
    pub state: LevelState,
    /// Cell size of this level.
    pub dx: f64,
}

impl EbLevel {
    #[inline]
    pub fn topology(&self) -> TopologyId {
        self.layout.topology
    }

    /// Refinement ratio to the next coarser level (1 on level 0).
    #[inline]
    pub fn ratio(&self) -> usize {
        self.layout.ratio_to_coarser.unwrap_or(1)
    }

    #[inline]
    pub fn cell_volume(&self) -> f64 {
        self.dx * self.dx
    }
}

/// Block-structured hierarchy of embedded-boundary levels.
///
/// - Level 0 covers the whole domain (possibly split over several workers)
/// - Level l+1 is a set of disjoint patches, aligned with and nested inside
///   the level-l layout, refined by `ratio_to_coarser`
///
/// Every regrid of a level bumps its topology generation.
pub struct EbHierarchy {
    ncomp: usize,
    levels: Vec<EbLevel>,
}

impl EbHierarchy {
    pub fn new(
        geometry: Box<dyn EbGeometry>,
        dx: f64,
        ncomp: usize,
        rects: &[(Rect2i, WorkerId)],
    ) -> Self {
        assert!(dx > 0.0, "dx must be positive");
        let topology = TopologyId { level: 0, generation: 0 };
        let layout = LevelLayout::new(topology, geometry.domain(), None, rects);
        let state = LevelState::new(geometry.as_ref(), &layout, ncomp);
        Self {
            ncomp,
            levels: vec![EbLevel {
                geometry,
                layout,
                state,
                dx,
            }],
        }
    }

    /// Single level 0 patch over the whole domain.
    pub fn single_level(geometry: Box<dyn EbGeometry>, dx: f64, ncomp: usize) -> Self {
        let domain = geometry.domain();
        Self::new(geometry, dx, ncomp, &[(domain, 0)])
    }

    #[inline]
    pub fn ncomp(&self) -> usize {
        self.ncomp
    }

    #[inline]
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, l: usize) -> &EbLevel {
        &self.levels[l]
    }

    pub fn level_mut(&mut self, l: usize) -> &mut EbLevel {
        &mut self.levels[l]
    }

    pub fn coarser(&self, l: usize) -> Option<&EbLevel> {
        l.checked_sub(1).map(|c| &self.levels[c])
    }

    pub fn finer(&self, l: usize) -> Option<&EbLevel> {
        self.levels.get(l + 1)
    }

    /// (coarse, fine) for `fine >= 1`.
    pub fn pair_mut(&mut self, fine: usize) -> (&mut EbLevel, &mut EbLevel) {
        assert!(fine >= 1 && fine < self.levels.len(), "no level pair ending at {fine}");
        let (lo, hi) = self.levels.split_at_mut(fine);
        (&mut lo[fine - 1], &mut hi[0])
    }

    fn check_nesting(&self, coarse: usize, ratio: usize, rects: &[(Rect2i, WorkerId)]) {
        let c = &self.levels[coarse];
        for &(r, _) in rects {
            let cr = r.coarsen(ratio);
            assert!(
                cr.refine(ratio) == r,
                "patch {:?} is not aligned with level {} cells",
                r,
                coarse
            );
            assert!(
                cr.cells().all(|iv| c.layout.contains(iv)),
                "patch {:?} is not nested in the level {} layout",
                r,
                coarse
            );
        }
    }

    /// Add a finer level on top of the current finest one.
    ///
    /// The new level is seeded from the coarse state by injection.
    pub fn add_level(
        &mut self,
        geometry: Box<dyn EbGeometry>,
        ratio: usize,
        rects: &[(Rect2i, WorkerId)],
    ) -> RedistResult<usize> {
        let coarse = self.levels.len() - 1;
        let c_domain = self.levels[coarse].layout.domain;
        assert_eq!(
            geometry.domain(),
            c_domain.refine(ratio),
            "level {} geometry must cover the refined level {} domain",
            coarse + 1,
            coarse
        );
        self.check_nesting(coarse, ratio, rects);

        let topology = TopologyId {
            level: coarse + 1,
            generation: 0,
        };
        let layout = LevelLayout::new(topology, geometry.domain(), Some(ratio), rects);
        let state = LevelState::new(geometry.as_ref(), &layout, self.ncomp);
        let dx = self.levels[coarse].dx / ratio as f64;
        self.levels.push(EbLevel {
            geometry,
            layout,
            state,
            dx,
        });

        let fine = coarse + 1;
        let patches = self.levels[fine].layout.patches().to_vec();
        let (c, f) = self.pair_mut(fine);
        for p in &patches {
            fill_from_coarse(f, p, c)?;
        }
        log::debug!("added level {} with {} patches (ratio {})", fine, patches.len(), ratio);
        Ok(fine)
    }

    /// Replace the patch set of `level`, preserving values on overlaps.
    ///
    /// New patches are seeded from the coarser level (if any); wherever a new
    /// VoF was already stored in the old layout its old values are copied in.
    /// The level's topology generation is bumped.
    pub fn replace_patches_preserve_overlap(
        &mut self,
        level: usize,
        rects: &[(Rect2i, WorkerId)],
    ) -> RedistResult<TopologyId> {
        let old = &self.levels[level];
        let ratio = old.layout.ratio_to_coarser;
        if let Some(r) = ratio {
            self.check_nesting(level - 1, r, rects);
        }

        let topology = TopologyId {
            level,
            generation: old.topology().generation + 1,
        };
        let layout = LevelLayout::new(topology, old.layout.domain, ratio, rects);
        let state = LevelState::new(old.geometry.as_ref(), &layout, self.ncomp);
        let old_state = std::mem::replace(&mut self.levels[level].state, state);
        self.levels[level].layout = layout;

        if level > 0 {
            let patches = self.levels[level].layout.patches().to_vec();
            let (c, f) = self.pair_mut(level);
            for p in &patches {
                fill_from_coarse(f, p, c)?;
            }
        }

        let new_state = &mut self.levels[level].state;
        let mut kept = 0usize;
        for (vof, _, vals) in old_state.iter() {
            if new_state.contains(vof) {
                new_state.values_mut(vof)?.copy_from_slice(vals);
                kept += 1;
            }
        }
        log::debug!(
            "regrid level {} -> generation {}: {} patches, {} VoFs preserved",
            level,
            topology.generation,
            rects.len(),
            kept
        );
        Ok(topology)
    }

    /// Restrict level `fine` onto `fine - 1` for the given components.
    pub fn average_down(&mut self, fine: usize, comps: Range<usize>) -> RedistResult<()> {
        let patches = self.levels[fine].layout.patches().to_vec();
        let (c, f) = self.pair_mut(fine);
        for p in &patches {
            restrict_to_coarse(f, p, c, comps.clone())?;
        }
        Ok(())
    }

    /// Average every level down onto its coarser neighbour, finest first.
    pub fn average_down_all(&mut self, comps: Range<usize>) -> RedistResult<()> {
        for fine in (1..self.levels.len()).rev() {
            self.average_down(fine, comps.clone())?;
        }
        Ok(())
    }

    /// Whether `iv` on `level` is not covered by the next finer level.
    pub fn is_valid(&self, level: usize, iv: [usize; 2]) -> bool {
        match self.finer(level) {
            Some(f) => !f.layout.covers_coarse(iv),
            None => true,
        }
    }

    /// Σ κ·q·dx² of one component over the valid (uncovered) region of every level.
    pub fn conserved_total(&self, comp: usize) -> f64 {
        (0..self.levels.len())
            .map(|l| {
                let lev = &self.levels[l];
                let sum: f64 = lev
                    .state
                    .iter()
                    .filter(|(v, _, _)| self.is_valid(l, v.iv))
                    .map(|(_, k, vals)| k * vals[comp])
                    .sum();
                sum * lev.cell_volume()
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{CutCellGeometry, VofId};

    fn two_level() -> EbHierarchy {
        let fine = CutCellGeometry::regular(8, 8);
        let coarse = fine.coarsen(2);
        let mut h = EbHierarchy::single_level(Box::new(coarse), 1.0, 1);
        h.level_mut(0).state.fill_with(|_, _| 3.0);
        h.add_level(Box::new(fine), 2, &[(Rect2i::new(2, 2, 4, 4), 0)]).unwrap();
        h
    }

    #[test]
    fn new_level_is_seeded_from_coarse() {
        let h = two_level();
        assert_eq!(h.num_levels(), 2);
        assert_eq!(h.level(1).dx, 0.5);
        assert_eq!(h.level(1).state.get(VofId::single(3, 3), 0), Some(3.0));
        // 16 coarse cells, none double counted
        assert!((h.conserved_total(0) - 3.0 * 16.0).abs() < 1e-12);
    }

    #[test]
    fn regrid_preserves_overlap_and_bumps_generation() {
        let mut h = two_level();
        h.level_mut(1).state.fill_with(|_, _| 7.0);
        let topo = h
            .replace_patches_preserve_overlap(1, &[(Rect2i::new(4, 2, 4, 4), 0)])
            .unwrap();
        assert_eq!(topo.generation, 1);
        assert_eq!(h.level(1).topology(), topo);
        // overlap keeps fine data, new cells come from the coarse level
        assert_eq!(h.level(1).state.get(VofId::single(5, 3), 0), Some(7.0));
        assert_eq!(h.level(1).state.get(VofId::single(7, 3), 0), Some(3.0));
        assert!(!h.level(1).state.contains(VofId::single(2, 2)));
    }

    #[test]
    fn average_down_overwrites_covered_coarse_cells() {
        let mut h = two_level();
        h.level_mut(1).state.fill_with(|_, _| 5.0);
        h.average_down(1, 0..1).unwrap();
        assert_eq!(h.level(0).state.get(VofId::single(1, 1), 0), Some(5.0));
        assert_eq!(h.level(0).state.get(VofId::single(0, 0), 0), Some(3.0));
    }

    #[test]
    #[should_panic(expected = "not nested")]
    fn fine_patches_must_nest_in_the_coarse_layout() {
        let fine = CutCellGeometry::regular(8, 8);
        let coarse = fine.coarsen(2);
        let mut h = EbHierarchy::new(Box::new(coarse), 1.0, 1, &[(Rect2i::new(0, 0, 2, 4), 0)]);
        let _ = h.add_level(Box::new(fine), 2, &[(Rect2i::new(2, 0, 4, 2), 0)]);
    }
}
