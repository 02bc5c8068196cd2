// src/amr/orchestrator.rs
//
// Synchronization of a subcycled AMR time step: reflux plus redistribution.
//
// Per level the protocol is
//
//   Advancing -> AwaitingFinerSync -> Refluxed -> Redistributed -> Done
//
// and levels are synchronized finest first. Syncing level l:
//   1. apply the level-l level register
//   2. reflux the coarse/fine interface into level l-1
//   3. deliver fine→coarse(l) into l-1 and coarse→fine(l-1) into l
//   4. average l down onto l-1
//
// A level's coarse→fine register is applied while its finer level syncs, so
// by the time the level reaches Done every register it owns is empty.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use crate::amr::hierarchy::EbHierarchy;
use crate::amr::layout::WorkerId;
use crate::amr::rect::Rect2i;
use crate::amr::reflux::FluxCorrection;
use crate::config::{MassReweightOrder, RedistConfig};
use crate::error::{RedistError, RedistResult};
use crate::geometry::{EbGeometry, VofId};
use crate::redist::level::LevelRedistribution;
use crate::redist::normalize::KappaNormalizer;
use crate::redist::register::{Deposit, RedistRegister, RegisterKind, SourceDeposits};
use crate::redist::stencil::VofStencil;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelPhase {
    Advancing,
    AwaitingFinerSync,
    Refluxed,
    Redistributed,
    Done,
}

pub struct RefluxRedistOrchestrator {
    config: RedistConfig,
    redists: Vec<LevelRedistribution>,
    normalizers: Vec<KappaNormalizer>,
    coar_to_coar: Vec<RedistRegister>,
    phases: Vec<LevelPhase>,
}

impl RefluxRedistOrchestrator {
    pub fn new(config: RedistConfig, h: &EbHierarchy) -> RedistResult<Self> {
        config.validate()?;
        if config.ncomp != h.ncomp() {
            return Err(RedistError::config(format!(
                "config has {} components, hierarchy has {}",
                config.ncomp,
                h.ncomp()
            )));
        }
        let mut o = Self {
            config,
            redists: Vec::new(),
            normalizers: Vec::new(),
            coar_to_coar: Vec::new(),
            phases: Vec::new(),
        };
        for _ in 0..h.num_levels() {
            o.push_level(h, LevelPhase::Done)?;
        }
        log::info!(
            "reflux/redistribution ready: {} levels, {} components, radius {}",
            h.num_levels(),
            o.config.ncomp,
            o.config.redist_radius
        );
        Ok(o)
    }

    fn push_level(&mut self, h: &EbHierarchy, phase: LevelPhase) -> RedistResult<()> {
        let l = self.redists.len();
        let mut lr = LevelRedistribution::new(l, self.config.ncomp, self.config.redist_radius);
        lr.define(h)?;
        let lev = h.level(l);
        self.normalizers.push(KappaNormalizer::new(
            lev.geometry.as_ref(),
            &lev.layout,
            self.config.normalize_radius(),
        ));
        self.redists.push(lr);
        self.coar_to_coar
            .push(RedistRegister::new(RegisterKind::CoarseToCoarse, self.config.ncomp));
        self.phases.push(phase);
        Ok(())
    }

    pub fn config(&self) -> &RedistConfig {
        &self.config
    }

    pub fn num_levels(&self) -> usize {
        self.redists.len()
    }

    pub fn phase(&self, level: usize) -> LevelPhase {
        self.phases[level]
    }

    pub fn level_redistribution(&self, level: usize) -> &LevelRedistribution {
        &self.redists[level]
    }

    pub fn normalizer(&self, level: usize) -> &KappaNormalizer {
        &self.normalizers[level]
    }

    fn expect_phase(&self, level: usize, want: LevelPhase, what: &str) -> RedistResult<()> {
        let have = self.phases[level];
        if have != want {
            return Err(RedistError::protocol(format!(
                "{what} on level {level} requires phase {want:?}, level is {have:?}"
            )));
        }
        Ok(())
    }

    fn expect_between_syncs(&self, level: usize, what: &str) -> RedistResult<()> {
        match self.phases[level] {
            LevelPhase::Refluxed | LevelPhase::Redistributed => Err(RedistError::protocol(format!(
                "{what} on level {level} in the middle of a synchronization"
            ))),
            _ => Ok(()),
        }
    }

    fn check_levels(&self, h: &EbHierarchy) -> RedistResult<()> {
        if h.num_levels() != self.redists.len() {
            return Err(RedistError::topology(
                h.num_levels().min(self.redists.len()),
                format!(
                    "hierarchy has {} levels, registers exist for {}",
                    h.num_levels(),
                    self.redists.len()
                ),
            ));
        }
        self.redists.iter().try_for_each(|r| r.check_current(h))
    }

    /// Start a time step: every level goes to Advancing.
    pub fn begin_step(&mut self, h: &EbHierarchy) -> RedistResult<()> {
        for l in 0..self.phases.len() {
            self.expect_phase(l, LevelPhase::Done, "begin_step")?;
        }
        self.check_levels(h)?;
        self.phases.iter_mut().for_each(|p| *p = LevelPhase::Advancing);
        Ok(())
    }

    /// Record a κ-weighted excess `delta` at cut cell `source` of `level`.
    pub fn increment(&mut self, level: usize, source: VofId, delta: &[f64]) -> RedistResult<()> {
        self.expect_phase(level, LevelPhase::Advancing, "increment")?;
        self.redists[level].increment(source, delta)
    }

    /// The level has finished advancing and waits for its finer level.
    pub fn finish_advance(&mut self, level: usize) -> RedistResult<()> {
        self.expect_phase(level, LevelPhase::Advancing, "finish_advance")?;
        self.phases[level] = LevelPhase::AwaitingFinerSync;
        Ok(())
    }

    /// Synchronize every level, finest first.
    pub fn post_time_step(
        &mut self,
        h: &mut EbHierarchy,
        flux: &mut dyn FluxCorrection,
    ) -> RedistResult<()> {
        for l in 0..self.phases.len() {
            self.expect_phase(l, LevelPhase::AwaitingFinerSync, "post_time_step")?;
        }
        self.check_levels(h)?;

        let ncomp = self.config.ncomp;
        match self.config.mass_weighting {
            None => self.sweep(h, flux, &[0..ncomp], true)?,
            Some(m) if m.order == MassReweightOrder::BeforeRedistribution => {
                self.reweight_all(h, m.density_comp)?;
                self.sweep(h, flux, &[0..ncomp], true)?;
            }
            Some(m) => {
                let rho = m.density_comp;
                self.sweep(h, flux, &[rho..rho + 1], false)?;
                self.reweight_all(h, rho)?;
                let rest: Vec<Range<usize>> = [0..rho, rho + 1..ncomp]
                    .into_iter()
                    .filter(|r| !r.is_empty())
                    .collect();
                self.sweep(h, flux, &rest, true)?;
            }
        }

        if self.config.mass_weighting.is_some() {
            for lr in &mut self.redists {
                lr.reset_weights(h)?;
            }
        }
        log::debug!("post time step synchronized {} levels", self.phases.len());
        Ok(())
    }

    fn sweep(
        &mut self,
        h: &mut EbHierarchy,
        flux: &mut dyn FluxCorrection,
        ranges: &[Range<usize>],
        last: bool,
    ) -> RedistResult<()> {
        for l in (0..self.redists.len()).rev() {
            self.sync_level(h, flux, l, ranges, last)?;
        }
        Ok(())
    }

    fn sync_level(
        &mut self,
        h: &mut EbHierarchy,
        flux: &mut dyn FluxCorrection,
        l: usize,
        ranges: &[Range<usize>],
        last: bool,
    ) -> RedistResult<()> {
        let ncomp = self.config.ncomp;
        if last {
            self.expect_phase(l, LevelPhase::AwaitingFinerSync, "sync")?;
            if l + 1 < self.phases.len() {
                self.expect_phase(l + 1, LevelPhase::Done, "sync of the finer level")?;
            }
        }

        for r in ranges {
            self.redists[l]
                .level_register_mut()
                .redistribute(&mut h.level_mut(l).state, r.clone())?;
        }

        if l > 0 && last && self.config.reflux {
            flux.reflux(l - 1, &mut h.level_mut(l - 1).state, 0..ncomp)?;
        }
        if last {
            self.phases[l] = LevelPhase::Refluxed;
        }

        if l > 0 {
            let (lower, upper) = self.redists.split_at_mut(l);
            let (coarse, fine) = h.pair_mut(l);
            for r in ranges {
                upper[0]
                    .fine_to_coarse_mut()
                    .redistribute(&mut coarse.state, r.clone())?;
                lower[l - 1]
                    .coarse_to_fine_mut()
                    .redistribute(&mut fine.state, r.clone())?;
            }
            let avg = if last { 0..ncomp } else { ranges_hull(ranges) };
            if !avg.is_empty() {
                h.average_down(l, avg)?;
            }
        }

        if last {
            self.phases[l] = LevelPhase::Redistributed;
            self.redists[l].finish_cycle()?;
            self.phases[l] = LevelPhase::Done;
            log::trace!("level {l} synchronized");
        }
        Ok(())
    }

    fn reweight_all(&mut self, h: &EbHierarchy, rho: usize) -> RedistResult<()> {
        for l in 0..self.redists.len() {
            let own = h.level(l);
            let coarser = h.coarser(l);
            let mut density: HashMap<VofId, f64> = HashMap::new();
            if let Some(stencil) = self.redists[l].stencil() {
                for e in stencil.iter().flat_map(|(_, st)| st.entries()) {
                    if density.contains_key(&e.dest) {
                        continue;
                    }
                    let value = match own.state.get(e.dest, rho) {
                        Some(v) => Some(v),
                        None => coarser.and_then(|c| {
                            own.geometry
                                .coarsen_vof(e.dest, own.ratio(), c.geometry.as_ref())
                                .and_then(|cv| c.state.get(cv, rho))
                        }),
                    };
                    let value = value.ok_or_else(|| {
                        RedistError::topology(l, format!("no density at destination {:?}", e.dest))
                    })?;
                    density.insert(e.dest, value);
                }
            }
            // Every destination is resolved above.
            self.redists[l].reweight(h, |d| density.get(&d).copied().unwrap_or(f64::NAN))?;
        }
        Ok(())
    }

    /// Re-resolve the registers of `coarse` and `coarse + 1` after the finer
    /// level was created or regridded.
    pub fn sync_with_fine_level(&mut self, h: &EbHierarchy, coarse: usize) -> RedistResult<()> {
        self.expect_between_syncs(coarse, "sync_with_fine_level")?;
        self.redists[coarse].define(h)?;
        if coarse + 1 < self.redists.len() {
            self.expect_between_syncs(coarse + 1, "sync_with_fine_level")?;
            self.redists[coarse + 1].define(h)?;
        }
        Ok(())
    }

    /// Add a level on top of the hierarchy. The new level takes the phase of
    /// its coarser level; the coarser registers must be re-synced with
    /// `sync_with_fine_level` before they are used again.
    pub fn add_level(
        &mut self,
        h: &mut EbHierarchy,
        geometry: Box<dyn EbGeometry>,
        ratio: usize,
        rects: &[(Rect2i, WorkerId)],
    ) -> RedistResult<usize> {
        let coarse = self.redists.len() - 1;
        self.expect_between_syncs(coarse, "add_level")?;
        let fine = h.add_level(geometry, ratio, rects)?;
        let phase = self.phases[coarse];
        self.push_level(h, phase)?;
        self.redists[coarse].invalidate();
        Ok(fine)
    }

    /// Regrid `level`, keeping its pending corrections.
    ///
    /// Held corrections of sources that are still cut cells of the new layout
    /// stay in the level's registers. The rest go through the coarse→coarse
    /// register: their stencils are restricted to the new layout, renormalized
    /// and applied to the regridded state right away. Neighbouring levels must
    /// be re-synced before their next use.
    pub fn regrid_level(
        &mut self,
        h: &mut EbHierarchy,
        level: usize,
        rects: &[(Rect2i, WorkerId)],
    ) -> RedistResult<()> {
        self.expect_between_syncs(level, "regrid_level")?;
        let held = self.redists[level].take_held()?;
        h.replace_patches_preserve_overlap(level, rects)?;
        self.redists[level].invalidate();
        self.redists[level].define(h)?;

        let mut orphans = BTreeMap::new();
        for (src, delta) in held {
            let kept = self.redists[level]
                .stencil()
                .is_some_and(|s| s.get(src).is_some());
            if kept {
                self.redists[level].increment(src, &delta)?;
            } else {
                orphans.insert(src, delta);
            }
        }
        if !orphans.is_empty() {
            self.move_orphans(h, level, orphans)?;
        }

        if level > 0 {
            self.redists[level - 1].invalidate();
        }
        if level + 1 < self.redists.len() {
            self.redists[level + 1].invalidate();
        }
        let lev = h.level(level);
        let radius = self.config.normalize_radius();
        self.normalizers[level] = KappaNormalizer::new(lev.geometry.as_ref(), &lev.layout, radius);
        Ok(())
    }

    fn move_orphans(
        &mut self,
        h: &mut EbHierarchy,
        level: usize,
        orphans: BTreeMap<VofId, Vec<f64>>,
    ) -> RedistResult<()> {
        let lev = h.level(level);
        let finer = h.finer(level);
        let mut sources = BTreeMap::new();
        for &src in orphans.keys() {
            let st = VofStencil::build(lev.geometry.as_ref(), src, self.config.redist_radius)?;
            let kept: Vec<Deposit> = st
                .entries()
                .iter()
                .filter(|e| !finer.is_some_and(|f| f.layout.covers_coarse(e.dest.iv)))
                .filter_map(|e| {
                    lev.layout.owner_of(e.dest.iv).map(|owner| Deposit {
                        dest: e.dest,
                        owner,
                        weight: e.weight,
                    })
                })
                .collect();
            let sum: f64 = kept.iter().map(|d| d.weight).sum();
            if kept.is_empty() || sum <= 0.0 {
                return Err(RedistError::topology(
                    level,
                    format!("pending correction at {src:?} has no destination in the new layout"),
                ));
            }
            let owner = kept[0].owner;
            let deposits = kept
                .into_iter()
                .map(|d| Deposit {
                    weight: d.weight / sum,
                    ..d
                })
                .collect();
            sources.insert(src, SourceDeposits { owner, deposits });
        }

        let target = lev.topology();
        let reg = &mut self.coar_to_coar[level];
        reg.define(target, sources);
        for (src, delta) in &orphans {
            reg.increment(*src, delta)?;
        }
        reg.redistribute(&mut h.level_mut(level).state, 0..self.config.ncomp)?;
        log::debug!(
            "regrid level {level}: {} pending corrections moved to the new owners",
            orphans.len()
        );
        Ok(())
    }

    /// Kappa-normalize `comps` of one level's state in place.
    pub fn normalize_level(
        &self,
        h: &mut EbHierarchy,
        level: usize,
        comps: Range<usize>,
    ) -> RedistResult<()> {
        self.normalizers[level].normalize(&mut h.level_mut(level).state, comps)
    }
}

fn ranges_hull(ranges: &[Range<usize>]) -> Range<usize> {
    let start = ranges.iter().map(|r| r.start).min().unwrap_or(0);
    let end = ranges.iter().map(|r| r.end).max().unwrap_or(0);
    start..end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amr::reflux::NoReflux;
    use crate::geometry::CutCellGeometry;

    fn row() -> EbHierarchy {
        let geom = CutCellGeometry::from_kappa(5, 1, vec![1.0, 1.0, 0.25, 1.0, 1.0]);
        EbHierarchy::single_level(Box::new(geom), 1.0, 1)
    }

    #[test]
    fn phases_advance_in_order() {
        let mut h = row();
        let mut o = RefluxRedistOrchestrator::new(RedistConfig::new(1), &h).unwrap();
        assert_eq!(o.phase(0), LevelPhase::Done);
        o.begin_step(&h).unwrap();
        o.increment(0, VofId::single(2, 0), &[1.0]).unwrap();
        o.finish_advance(0).unwrap();
        assert!(matches!(
            o.increment(0, VofId::single(2, 0), &[1.0]),
            Err(RedistError::ProtocolViolation { .. })
        ));
        o.post_time_step(&mut h, &mut NoReflux).unwrap();
        assert_eq!(o.phase(0), LevelPhase::Done);
        // 1.0 split evenly between cells 1 and 3
        assert_eq!(h.level(0).state.get(VofId::single(1, 0), 0), Some(0.5));
        assert_eq!(h.level(0).state.get(VofId::single(3, 0), 0), Some(0.5));
    }

    #[test]
    fn sync_before_advance_finishes_is_rejected() {
        let mut h = row();
        let mut o = RefluxRedistOrchestrator::new(RedistConfig::new(1), &h).unwrap();
        o.begin_step(&h).unwrap();
        assert!(matches!(
            o.post_time_step(&mut h, &mut NoReflux),
            Err(RedistError::ProtocolViolation { .. })
        ));
    }

    #[test]
    fn mismatched_component_count_is_a_config_error() {
        let h = row();
        assert!(matches!(
            RefluxRedistOrchestrator::new(RedistConfig::new(2), &h),
            Err(RedistError::Config { .. })
        ));
    }

    #[test]
    fn hull_of_split_ranges() {
        assert_eq!(ranges_hull(&[0..1, 2..4]), 0..4);
        assert!(ranges_hull(&[]).is_empty());
    }

    #[test]
    fn missing_density_is_a_topology_mismatch() {
        let geom = CutCellGeometry::from_kappa(5, 1, vec![1.0, 1.0, 0.25, 1.0, 1.0]);
        let rects = [(Rect2i::new(0, 0, 3, 1), 0), (Rect2i::new(3, 0, 2, 1), 1)];
        let mut h = EbHierarchy::new(Box::new(geom), 1.0, 1, &rects);
        let cfg =
            RedistConfig::new(1).with_mass_weighting(0, MassReweightOrder::BeforeRedistribution);
        let mut o = RefluxRedistOrchestrator::new(cfg, &h).unwrap();

        // Cell 3, a destination of cell 2, no longer has a density.
        h.replace_patches_preserve_overlap(0, &rects[..1]).unwrap();
        assert!(matches!(
            o.reweight_all(&h, 0),
            Err(RedistError::TopologyMismatch { level: 0, .. })
        ));
    }
}
