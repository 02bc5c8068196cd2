// src/redist/stencil.rs
//
// Redistribution stencils: for every cut cell of a level, the monotone-path
// neighbors that receive its redistributed excess and their weights.
//
// Weights are κ(d)/Σκ over the destinations, so they sum to one and a
// correction spread through a stencil conserves κ-weighted volume. The
// search runs over the whole level domain; destinations outside the level's
// own layout are routed to the coarser level by `redist::level`.

use std::collections::BTreeMap;

use crate::amr::layout::{LevelLayout, TopologyId};
use crate::error::{RedistError, RedistResult};
use crate::geometry::{EbGeometry, VofId, vofs_at};
use crate::redist::path::monotone_neighbors;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StencilEntry {
    pub dest: VofId,
    pub weight: f64,
}

/// Destinations of one source VoF.
#[derive(Debug, Clone, PartialEq)]
pub struct VofStencil {
    pub source: VofId,
    entries: Vec<StencilEntry>,
    /// κ of each destination, same order as `entries`.
    volumes: Vec<f64>,
    self_fallback: bool,
}

impl VofStencil {
    /// Build the stencil of `source` with kappa weights.
    ///
    /// A source with no reachable neighbor keeps its excess: the stencil is
    /// `{source: 1.0}` and `is_self_fallback` reports it.
    pub fn build<G>(geom: &G, source: VofId, radius: usize) -> RedistResult<Self>
    where
        G: EbGeometry + ?Sized,
    {
        let dests = monotone_neighbors(geom, source, radius);
        if dests.is_empty() {
            log::warn!("redistribution stencil of {source:?} is empty, excess stays in place");
            return Ok(Self {
                source,
                entries: vec![StencilEntry {
                    dest: source,
                    weight: 1.0,
                }],
                volumes: vec![geom.volume_fraction(source)],
                self_fallback: true,
            });
        }
        let volumes: Vec<f64> = dests.iter().map(|&d| geom.volume_fraction(d)).collect();
        let entries = dests
            .into_iter()
            .map(|dest| StencilEntry { dest, weight: 0.0 })
            .collect();
        let mut st = Self {
            source,
            entries,
            volumes,
            self_fallback: false,
        };
        st.set_weights(|_| 1.0)?;
        Ok(st)
    }

    pub fn entries(&self) -> &[StencilEntry] {
        &self.entries
    }

    #[inline]
    pub fn is_self_fallback(&self) -> bool {
        self.self_fallback
    }

    pub fn weight_sum(&self) -> f64 {
        self.entries.iter().map(|e| e.weight).sum()
    }

    /// w(d) = κ(d)·m(d) / Σ κ·m. Every κ·m must be finite and non-negative.
    fn set_weights<F: Fn(VofId) -> f64>(&mut self, modifier: F) -> RedistResult<()> {
        if self.self_fallback {
            return Ok(());
        }
        let raw: Vec<f64> = self
            .entries
            .iter()
            .zip(&self.volumes)
            .map(|(e, &k)| k * modifier(e.dest))
            .collect();
        let sum: f64 = raw.iter().sum();
        if sum.is_nan() || sum <= 0.0 || raw.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(RedistError::DegenerateStencil {
                vof: self.source,
                sum,
            });
        }
        for (e, r) in self.entries.iter_mut().zip(raw) {
            e.weight = r / sum;
        }
        Ok(())
    }
}

/// Stencils of every cut cell in one level's layout.
pub struct RedistStencil {
    topology: TopologyId,
    radius: usize,
    stencils: BTreeMap<VofId, VofStencil>,
}

impl RedistStencil {
    pub fn new<G>(geom: &G, layout: &LevelLayout, radius: usize) -> RedistResult<Self>
    where
        G: EbGeometry + ?Sized,
    {
        assert!(radius >= 1, "redistribution radius must be >= 1");
        let mut stencils = BTreeMap::new();
        let mut fallbacks = 0usize;
        for p in layout.patches() {
            for iv in p.rect.cells() {
                for vof in vofs_at(geom, iv) {
                    if !geom.is_irregular(vof) {
                        continue;
                    }
                    let st = VofStencil::build(geom, vof, radius)?;
                    fallbacks += usize::from(st.is_self_fallback());
                    stencils.insert(vof, st);
                }
            }
        }
        log::debug!(
            "redistribution stencils on level {}: {} cut cells, {} self fallbacks (radius {})",
            layout.level(),
            stencils.len(),
            fallbacks,
            radius
        );
        Ok(Self {
            topology: layout.topology,
            radius,
            stencils,
        })
    }

    #[inline]
    pub fn topology(&self) -> TopologyId {
        self.topology
    }

    #[inline]
    pub fn radius(&self) -> usize {
        self.radius
    }

    pub fn len(&self) -> usize {
        self.stencils.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stencils.is_empty()
    }

    pub fn get(&self, source: VofId) -> Option<&VofStencil> {
        self.stencils.get(&source)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VofId, &VofStencil)> {
        self.stencils.iter()
    }

    /// Re-weight every stencil by `modifier` (typically the density at the
    /// destination), renormalizing to a unit sum.
    pub fn reweight<F: Fn(VofId) -> f64>(&mut self, modifier: F) -> RedistResult<()> {
        for st in self.stencils.values_mut() {
            st.set_weights(&modifier)?;
        }
        Ok(())
    }

    /// Back to pure kappa weighting.
    pub fn reset_weights(&mut self) -> RedistResult<()> {
        self.reweight(|_| 1.0)
    }
}
