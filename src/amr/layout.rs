// src/amr/layout.rs
//
// Disjoint patch layout of one AMR level and the patch → worker ownership map.

use serde::{Deserialize, Serialize};

use crate::amr::rect::{IntVect, Rect2i};

/// Rank of the worker that owns a patch.
pub type WorkerId = usize;

/// Identifies one grid topology of one level. The generation is bumped by
/// every regrid of the level, so data built for an older layout is detectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopologyId {
    pub level: usize,
    pub generation: u64,
}

/// One rectangular grid patch of a level, in that level's index space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchBox {
    pub id: usize,
    pub rect: Rect2i,
    pub owner: WorkerId,
}

/// Disjoint set of patches covering part of a level's domain.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelLayout {
    pub topology: TopologyId,
    /// Index-space extent of the whole level.
    pub domain: Rect2i,
    /// Refinement ratio to the next coarser level (None on level 0).
    pub ratio_to_coarser: Option<usize>,
    patches: Vec<PatchBox>,
}

impl LevelLayout {
    /// Build a layout from `(rect, owner)` pairs. Patch ids follow input order.
    pub fn new(
        topology: TopologyId,
        domain: Rect2i,
        ratio_to_coarser: Option<usize>,
        rects: &[(Rect2i, WorkerId)],
    ) -> Self {
        for (n, &(r, _)) in rects.iter().enumerate() {
            assert!(!r.is_empty(), "patch {n} is empty");
            assert!(
                domain.contains_rect(r),
                "patch {:?} must fit in level domain {:?}",
                r,
                domain
            );
            for &(other, _) in &rects[..n] {
                assert!(
                    r.intersect(other).is_none(),
                    "patches {:?} and {:?} overlap",
                    r,
                    other
                );
            }
        }
        if let Some(ratio) = ratio_to_coarser {
            assert!(ratio >= 2, "refinement ratio must be >= 2");
        }
        let patches = rects
            .iter()
            .enumerate()
            .map(|(id, &(rect, owner))| PatchBox { id, rect, owner })
            .collect();
        Self {
            topology,
            domain,
            ratio_to_coarser,
            patches,
        }
    }

    /// Single patch over the whole domain, owned by worker 0.
    pub fn single(topology: TopologyId, domain: Rect2i, ratio_to_coarser: Option<usize>) -> Self {
        Self::new(topology, domain, ratio_to_coarser, &[(domain, 0)])
    }

    #[inline]
    pub fn level(&self) -> usize {
        self.topology.level
    }

    pub fn patches(&self) -> &[PatchBox] {
        &self.patches
    }

    pub fn patch_of(&self, iv: IntVect) -> Option<&PatchBox> {
        self.patches.iter().find(|p| p.rect.contains(iv))
    }

    pub fn owner_of(&self, iv: IntVect) -> Option<WorkerId> {
        self.patch_of(iv).map(|p| p.owner)
    }

    #[inline]
    pub fn contains(&self, iv: IntVect) -> bool {
        self.patch_of(iv).is_some()
    }

    /// Number of distinct workers owning patches on this level.
    pub fn num_workers(&self) -> usize {
        self.patches.iter().map(|p| p.owner + 1).max().unwrap_or(0)
    }

    /// Whether `coarse_iv` (on the next coarser level) lies under any patch.
    pub fn covers_coarse(&self, coarse_iv: IntVect) -> bool {
        let Some(ratio) = self.ratio_to_coarser else {
            return false;
        };
        self.patches
            .iter()
            .any(|p| p.rect.coarsen(ratio).contains(coarse_iv))
    }

    /// Whether patch rects are aligned with the coarser level's cells, so every
    /// fine cell outside the layout coarsens to an uncovered coarse cell.
    pub fn is_coarse_aligned(&self) -> bool {
        match self.ratio_to_coarser {
            Some(r) => self
                .patches
                .iter()
                .all(|p| p.rect.coarsen(r).refine(r) == p.rect),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topo(level: usize) -> TopologyId {
        TopologyId { level, generation: 0 }
    }

    #[test]
    fn ownership_lookup_finds_the_right_patch() {
        let domain = Rect2i::new(0, 0, 8, 4);
        let layout = LevelLayout::new(
            topo(0),
            domain,
            None,
            &[(Rect2i::new(0, 0, 4, 4), 0), (Rect2i::new(4, 0, 4, 4), 1)],
        );
        assert_eq!(layout.owner_of([3, 2]), Some(0));
        assert_eq!(layout.owner_of([4, 0]), Some(1));
        assert_eq!(layout.patch_of([7, 3]).map(|p| p.id), Some(1));
        assert_eq!(layout.num_workers(), 2);
    }

    #[test]
    fn fine_layout_reports_covered_coarse_cells() {
        let fine = LevelLayout::new(
            topo(1),
            Rect2i::new(0, 0, 16, 16),
            Some(2),
            &[(Rect2i::new(4, 4, 4, 4), 0)],
        );
        assert!(fine.covers_coarse([2, 2]));
        assert!(fine.covers_coarse([3, 3]));
        assert!(!fine.covers_coarse([4, 2]));
        assert!(fine.is_coarse_aligned());
    }

    #[test]
    #[should_panic(expected = "overlap")]
    fn overlapping_patches_are_rejected() {
        LevelLayout::new(
            topo(0),
            Rect2i::new(0, 0, 8, 8),
            None,
            &[(Rect2i::new(0, 0, 4, 4), 0), (Rect2i::new(3, 3, 2, 2), 1)],
        );
    }
}
