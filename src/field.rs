// src/field.rs
//
// Multi-component, pointwise state stored per VoF on one level.
//
// Storage is VoF-major (`data[v * ncomp + c]`) with VoFs grouped by patch, in
// the row-major cell order of each patch rect. Kappa and the irregular flag
// are cached per VoF so redistribution never has to go back to the geometry.

use std::collections::HashMap;
use std::ops::Range;

use crate::amr::layout::{LevelLayout, TopologyId, WorkerId};
use crate::error::{RedistError, RedistResult, check_components};
use crate::geometry::{EbGeometry, VofId, vofs_at};

pub struct LevelState {
    topology: TopologyId,
    ncomp: usize,
    vofs: Vec<VofId>,
    kappa: Vec<f64>,
    irregular: Vec<bool>,
    owner: Vec<WorkerId>,
    patch_ranges: Vec<Range<usize>>,
    index: HashMap<VofId, usize>,
    data: Vec<f64>,
}

impl LevelState {
    /// Zero-initialised state over every VoF of every patch in `layout`.
    pub fn new<G: EbGeometry + ?Sized>(geom: &G, layout: &LevelLayout, ncomp: usize) -> Self {
        assert!(ncomp >= 1, "state needs at least one component");
        assert_eq!(
            geom.domain(),
            layout.domain,
            "geometry and layout of level {} disagree on the domain",
            layout.level()
        );

        let mut vofs = Vec::new();
        let mut kappa = Vec::new();
        let mut irregular = Vec::new();
        let mut owner = Vec::new();
        let mut patch_ranges = Vec::with_capacity(layout.patches().len());

        for p in layout.patches() {
            let start = vofs.len();
            for iv in p.rect.cells() {
                for vof in vofs_at(geom, iv) {
                    vofs.push(vof);
                    kappa.push(geom.volume_fraction(vof));
                    irregular.push(geom.is_irregular(vof));
                    owner.push(p.owner);
                }
            }
            patch_ranges.push(start..vofs.len());
        }

        let index = vofs.iter().enumerate().map(|(n, &v)| (v, n)).collect();
        let data = vec![0.0; vofs.len() * ncomp];

        Self {
            topology: layout.topology,
            ncomp,
            vofs,
            kappa,
            irregular,
            owner,
            patch_ranges,
            index,
            data,
        }
    }

    #[inline]
    pub fn topology(&self) -> TopologyId {
        self.topology
    }

    #[inline]
    pub fn ncomp(&self) -> usize {
        self.ncomp
    }

    /// Number of VoFs stored.
    #[inline]
    pub fn len(&self) -> usize {
        self.vofs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vofs.is_empty()
    }

    pub fn vofs(&self) -> &[VofId] {
        &self.vofs
    }

    #[inline]
    pub fn contains(&self, vof: VofId) -> bool {
        self.index.contains_key(&vof)
    }

    #[inline]
    fn slot(&self, vof: VofId) -> RedistResult<usize> {
        self.index.get(&vof).copied().ok_or_else(|| {
            RedistError::topology(
                self.topology.level,
                format!("{vof:?} is not stored in layout generation {}", self.topology.generation),
            )
        })
    }

    pub fn kappa(&self, vof: VofId) -> Option<f64> {
        self.index.get(&vof).map(|&n| self.kappa[n])
    }

    pub fn owner(&self, vof: VofId) -> Option<WorkerId> {
        self.index.get(&vof).map(|&n| self.owner[n])
    }

    pub fn get(&self, vof: VofId, comp: usize) -> Option<f64> {
        if comp >= self.ncomp {
            return None;
        }
        self.index.get(&vof).map(|&n| self.data[n * self.ncomp + comp])
    }

    pub fn set(&mut self, vof: VofId, comp: usize, value: f64) -> RedistResult<()> {
        check_components(&(comp..comp + 1), self.ncomp)?;
        let n = self.slot(vof)?;
        self.data[n * self.ncomp + comp] = value;
        Ok(())
    }

    pub fn add(&mut self, vof: VofId, comp: usize, value: f64) -> RedistResult<()> {
        check_components(&(comp..comp + 1), self.ncomp)?;
        let n = self.slot(vof)?;
        self.data[n * self.ncomp + comp] += value;
        Ok(())
    }

    /// All components of one VoF.
    pub fn values(&self, vof: VofId) -> Option<&[f64]> {
        let n = *self.index.get(&vof)?;
        Some(&self.data[n * self.ncomp..(n + 1) * self.ncomp])
    }

    pub fn values_mut(&mut self, vof: VofId) -> RedistResult<&mut [f64]> {
        let n = self.slot(vof)?;
        Ok(&mut self.data[n * self.ncomp..(n + 1) * self.ncomp])
    }

    /// (VoF, kappa, values) for every stored VoF.
    pub fn iter(&self) -> impl Iterator<Item = (VofId, f64, &[f64])> {
        self.vofs
            .iter()
            .zip(self.kappa.iter())
            .zip(self.data.chunks_exact(self.ncomp))
            .map(|((&v, &k), vals)| (v, k, vals))
    }

    /// Set every value from `f(vof, comp)`.
    pub fn fill_with<F>(&mut self, f: F)
    where
        F: Fn(VofId, usize) -> f64,
    {
        let ncomp = self.ncomp;
        for (n, &vof) in self.vofs.iter().enumerate() {
            for c in 0..ncomp {
                self.data[n * ncomp + c] = f(vof, c);
            }
        }
    }

    /// Cut cells of one patch.
    pub fn cut_cells(&self, patch: usize) -> impl Iterator<Item = VofId> + '_ {
        let range = self.patch_ranges.get(patch).cloned().unwrap_or(0..0);
        range
            .filter(move |&n| self.irregular[n])
            .map(move |n| self.vofs[n])
    }

    /// Multiply the given components by kappa (pointwise → volume-weighted).
    pub fn scale_by_kappa(&mut self, comps: Range<usize>) -> RedistResult<()> {
        check_components(&comps, self.ncomp)?;
        let ncomp = self.ncomp;
        for (n, &k) in self.kappa.iter().enumerate() {
            for c in comps.clone() {
                self.data[n * ncomp + c] *= k;
            }
        }
        Ok(())
    }

    /// Σ κ·value of one component over all stored VoFs (cell volume 1).
    pub fn kappa_weighted_sum(&self, comp: usize) -> f64 {
        self.iter().map(|(_, k, vals)| k * vals[comp]).sum()
    }
}
