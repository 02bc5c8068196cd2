// src/redist/level.rs
//
// All redistribution registers that originate on one level.
//
// The level's stencils are partitioned by where each destination lives:
//
//   destination in own layout, not under the finer level  -> level register
//   destination in own layout, under the finer level      -> coarse→fine register
//   destination outside own layout (coarse/fine boundary) -> fine→coarse register
//
// so a source's weights across the three registers always sum to one.
//
// Increments are also kept per source in a held accumulator for the whole
// cycle. When the registers are redefined for a new topology (a finer level
// was created or regridded) the held totals are routed again through the
// new partition, so corrections made before the fine grid existed reach it.

use std::collections::BTreeMap;

use crate::amr::hierarchy::{EbHierarchy, EbLevel};
use crate::amr::layout::TopologyId;
use crate::amr::rect::Rect2i;
use crate::error::{RedistError, RedistResult};
use crate::geometry::{SPACE_DIM, VofId, vofs_at};
use crate::redist::register::{Deposit, RedistRegister, RegisterKind, SourceDeposits};
use crate::redist::stencil::{RedistStencil, VofStencil};

/// Topologies the registers were resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SyncKey {
    own: TopologyId,
    coarser: Option<TopologyId>,
    finer: Option<TopologyId>,
}

impl SyncKey {
    fn current(h: &EbHierarchy, level: usize) -> Self {
        Self {
            own: h.level(level).topology(),
            coarser: h.coarser(level).map(|c| c.topology()),
            finer: h.finer(level).map(|f| f.topology()),
        }
    }
}

type Routes = BTreeMap<VofId, SourceDeposits>;

#[derive(Default)]
struct Partition {
    level: Routes,
    to_finer: Routes,
    to_coarser: Routes,
}

pub struct LevelRedistribution {
    level: usize,
    ncomp: usize,
    radius: usize,
    stencil: Option<RedistStencil>,
    level_reg: RedistRegister,
    coar_to_fine: RedistRegister,
    fine_to_coar: RedistRegister,
    held: BTreeMap<VofId, Vec<f64>>,
    synced: Option<SyncKey>,
}

impl LevelRedistribution {
    /// Registers for `level`, not yet defined.
    pub fn new(level: usize, ncomp: usize, radius: usize) -> Self {
        assert!(radius >= 1, "redistribution radius must be >= 1");
        Self {
            level,
            ncomp,
            radius,
            stencil: None,
            level_reg: RedistRegister::new(RegisterKind::Level, ncomp),
            coar_to_fine: RedistRegister::new(RegisterKind::CoarseToFine, ncomp),
            fine_to_coar: RedistRegister::new(RegisterKind::FineToCoarse, ncomp),
            held: BTreeMap::new(),
            synced: None,
        }
    }

    #[inline]
    pub fn level(&self) -> usize {
        self.level
    }

    #[inline]
    pub fn radius(&self) -> usize {
        self.radius
    }

    pub fn stencil(&self) -> Option<&RedistStencil> {
        self.stencil.as_ref()
    }

    pub fn level_register(&self) -> &RedistRegister {
        &self.level_reg
    }

    pub fn coarse_to_fine(&self) -> &RedistRegister {
        &self.coar_to_fine
    }

    pub fn fine_to_coarse(&self) -> &RedistRegister {
        &self.fine_to_coar
    }

    pub(crate) fn level_register_mut(&mut self) -> &mut RedistRegister {
        &mut self.level_reg
    }

    pub(crate) fn coarse_to_fine_mut(&mut self) -> &mut RedistRegister {
        &mut self.coar_to_fine
    }

    pub(crate) fn fine_to_coarse_mut(&mut self) -> &mut RedistRegister {
        &mut self.fine_to_coar
    }

    fn registers(&self) -> [&RedistRegister; 3] {
        [&self.level_reg, &self.coar_to_fine, &self.fine_to_coar]
    }

    pub fn is_partially_applied(&self) -> bool {
        self.registers().iter().any(|r| r.is_partially_applied())
    }

    /// Nothing pending in any register.
    pub fn is_empty(&self) -> bool {
        self.registers().iter().all(|r| r.is_empty())
    }

    /// Per-source totals of the current cycle.
    pub fn held(&self) -> &BTreeMap<VofId, Vec<f64>> {
        &self.held
    }

    /// Σ of one component over all held increments.
    pub fn held_total(&self, comp: usize) -> f64 {
        self.held.values().map(|d| d[comp]).sum()
    }

    /// Build stencils (when the own layout changed) and resolve the three
    /// registers against the current topologies of this level and its
    /// neighbours. Held increments are routed into the new registers.
    pub fn define(&mut self, h: &EbHierarchy) -> RedistResult<()> {
        if self.is_partially_applied() {
            return Err(RedistError::protocol(format!(
                "level {}: registers redefined in the middle of an apply",
                self.level
            )));
        }
        let own = h.level(self.level);
        let rebuild = self
            .stencil
            .as_ref()
            .map_or(true, |s| s.topology() != own.topology());
        if rebuild {
            let stencil = RedistStencil::new(own.geometry.as_ref(), &own.layout, self.radius)?;
            self.stencil = Some(stencil);
        } else if let Some(s) = self.stencil.as_mut() {
            s.reset_weights()?;
        }

        let key = SyncKey::current(h, self.level);
        self.resolve(h, key)?;
        self.synced = Some(key);

        let held = std::mem::take(&mut self.held);
        for (src, delta) in held {
            self.increment(src, &delta)?;
        }
        log::debug!(
            "level {} registers defined: {} level / {} coarse-to-fine / {} fine-to-coarse sources",
            self.level,
            self.level_reg.sources().count(),
            self.coar_to_fine.sources().count(),
            self.fine_to_coar.sources().count()
        );
        Ok(())
    }

    fn resolve(&mut self, h: &EbHierarchy, key: SyncKey) -> RedistResult<()> {
        let Some(stencil) = self.stencil.as_ref() else {
            return Err(RedistError::UndefinedRegister { register: "level" });
        };
        let own = h.level(self.level);
        let mut part = Partition::default();
        for (src, st) in stencil.iter() {
            route_stencil(*src, st, own, h.coarser(self.level), h.finer(self.level), &mut part)?;
        }

        self.level_reg.define(key.own, part.level);
        match key.finer {
            Some(t) => self.coar_to_fine.define(t, part.to_finer),
            None => self.coar_to_fine.undefine(),
        }
        match key.coarser {
            Some(t) => self.fine_to_coar.define(t, part.to_coarser),
            None => self.fine_to_coar.undefine(),
        }
        Ok(())
    }

    /// Mark the registers stale; they must be defined again before use.
    /// Held increments are kept.
    pub fn invalidate(&mut self) {
        self.level_reg.undefine();
        self.coar_to_fine.undefine();
        self.fine_to_coar.undefine();
        self.synced = None;
    }

    /// Fail unless the registers were resolved against the current topologies.
    pub fn check_current(&self, h: &EbHierarchy) -> RedistResult<()> {
        let Some(key) = self.synced else {
            return Err(RedistError::UndefinedRegister { register: "level" });
        };
        let now = SyncKey::current(h, self.level);
        if key == now {
            return Ok(());
        }
        let which = if key.own != now.own {
            "own layout"
        } else if key.finer != now.finer {
            "finer level"
        } else {
            "coarser level"
        };
        Err(RedistError::topology(
            self.level,
            format!("registers are stale: {which} changed since they were defined"),
        ))
    }

    /// Accumulate `delta` (κ-weighted excess, one value per component) at the
    /// cut cell `source`.
    pub fn increment(&mut self, source: VofId, delta: &[f64]) -> RedistResult<()> {
        if self.synced.is_none() {
            return Err(RedistError::UndefinedRegister { register: "level" });
        }
        if delta.len() != self.ncomp {
            return Err(RedistError::ComponentRangeViolation {
                range: 0..delta.len(),
                ncomp: self.ncomp,
            });
        }
        let known = self.stencil.as_ref().is_some_and(|s| s.get(source).is_some());
        if !known {
            return Err(RedistError::topology(
                self.level,
                format!("{source:?} is not a cut cell of the current layout"),
            ));
        }

        let mut routed = false;
        for reg in [&mut self.level_reg, &mut self.coar_to_fine, &mut self.fine_to_coar] {
            if reg.is_defined() {
                routed |= reg.increment(source, delta)?;
            }
        }
        if !routed {
            log::trace!("level {}: increment at {source:?} has no destination", self.level);
        }
        let acc = self
            .held
            .entry(source)
            .or_insert_with(|| vec![0.0; self.ncomp]);
        acc.iter_mut().zip(delta).for_each(|(a, d)| *a += d);
        Ok(())
    }

    /// Re-weight the stencils by `modifier` and re-route, keeping pending data.
    pub fn reweight<F>(&mut self, h: &EbHierarchy, modifier: F) -> RedistResult<()>
    where
        F: Fn(VofId) -> f64,
    {
        self.check_current(h)?;
        let Some(stencil) = self.stencil.as_mut() else {
            return Err(RedistError::UndefinedRegister { register: "level" });
        };
        stencil.reweight(modifier)?;
        self.reroute(h)
    }

    /// Back to kappa weights.
    pub fn reset_weights(&mut self, h: &EbHierarchy) -> RedistResult<()> {
        self.check_current(h)?;
        let Some(stencil) = self.stencil.as_mut() else {
            return Err(RedistError::UndefinedRegister { register: "level" });
        };
        stencil.reset_weights()?;
        self.reroute(h)
    }

    fn reroute(&mut self, h: &EbHierarchy) -> RedistResult<()> {
        let Some(stencil) = self.stencil.as_ref() else {
            return Err(RedistError::UndefinedRegister { register: "level" });
        };
        let own = h.level(self.level);
        let mut part = Partition::default();
        for (src, st) in stencil.iter() {
            route_stencil(*src, st, own, h.coarser(self.level), h.finer(self.level), &mut part)?;
        }
        self.level_reg.replace_deposits(part.level)?;
        if self.coar_to_fine.is_defined() {
            self.coar_to_fine.replace_deposits(part.to_finer)?;
        }
        if self.fine_to_coar.is_defined() {
            self.fine_to_coar.replace_deposits(part.to_coarser)?;
        }
        Ok(())
    }

    /// End of cycle: every register must have been applied.
    pub fn finish_cycle(&mut self) -> RedistResult<()> {
        if let Some(reg) = self.registers().into_iter().find(|r| !r.is_empty()) {
            return Err(RedistError::protocol(format!(
                "level {}: {} register still holds corrections at the end of the cycle",
                self.level,
                reg.kind().name()
            )));
        }
        self.held.clear();
        Ok(())
    }

    /// Remove and return the held increments, emptying every register.
    pub fn take_held(&mut self) -> RedistResult<BTreeMap<VofId, Vec<f64>>> {
        if self.is_partially_applied() {
            return Err(RedistError::protocol(format!(
                "level {}: cannot move corrections out of a partially applied register",
                self.level
            )));
        }
        for reg in [&mut self.level_reg, &mut self.coar_to_fine, &mut self.fine_to_coar] {
            reg.clear();
        }
        Ok(std::mem::take(&mut self.held))
    }
}

/// Split the destinations of one stencil into the three partitions.
fn route_stencil(
    src: VofId,
    st: &VofStencil,
    own: &EbLevel,
    coarser: Option<&EbLevel>,
    finer: Option<&EbLevel>,
    part: &mut Partition,
) -> RedistResult<()> {
    let level = own.layout.level();
    let Some(src_owner) = own.layout.owner_of(src.iv) else {
        return Err(RedistError::topology(level, format!("source {src:?} not in layout")));
    };
    let push = |routes: &mut Routes, dep: Deposit| {
        routes
            .entry(src)
            .or_insert_with(|| SourceDeposits {
                owner: src_owner,
                deposits: Vec::new(),
            })
            .deposits
            .push(dep);
    };

    for e in st.entries() {
        let d = e.dest;
        if let Some(owner) = own.layout.owner_of(d.iv) {
            match finer.filter(|f| f.layout.covers_coarse(d.iv)) {
                Some(f) => {
                    for dep in coarse_to_fine_deposits(d, e.weight, own, f)? {
                        push(&mut part.to_finer, dep);
                    }
                }
                None => push(
                    &mut part.level,
                    Deposit {
                        dest: d,
                        owner,
                        weight: e.weight,
                    },
                ),
            }
            continue;
        }

        let Some(c) = coarser else {
            return Err(RedistError::topology(
                level,
                format!("destination {d:?} of {src:?} lies outside the level 0 layout"),
            ));
        };
        let r = own.ratio();
        let cv = own.geometry.coarsen_vof(d, r, c.geometry.as_ref()).ok_or_else(|| {
            RedistError::topology(level - 1, format!("{d:?} coarsens to a covered cell"))
        })?;
        let owner = c.layout.owner_of(cv.iv).ok_or_else(|| {
            RedistError::topology(level - 1, format!("{cv:?} not in the coarse layout"))
        })?;
        if own.layout.covers_coarse(cv.iv) {
            return Err(RedistError::topology(
                level - 1,
                format!("{cv:?} is covered by level {level}, layout not aligned"),
            ));
        }
        push(
            &mut part.to_coarser,
            Deposit {
                dest: cv,
                owner,
                weight: e.weight / (r as f64).powi(SPACE_DIM as i32),
            },
        );
    }
    Ok(())
}

/// Spread a coarse destination over the fine VoFs that coarsen to it.
///
/// Each fine VoF receives `weight·r^D·κ_f/Σκ_f`, so the volume-weighted
/// amount on the fine level equals the amount the coarse cell would get.
fn coarse_to_fine_deposits(
    d: VofId,
    weight: f64,
    own: &EbLevel,
    fine: &EbLevel,
) -> RedistResult<Vec<Deposit>> {
    let r = fine.ratio();
    let block = Rect2i::new(d.iv[0] * r, d.iv[1] * r, r, r);
    let mut targets = Vec::new();
    for iv in block.cells() {
        for fv in vofs_at(fine.geometry.as_ref(), iv) {
            if fine.geometry.coarsen_vof(fv, r, own.geometry.as_ref()) != Some(d) {
                continue;
            }
            let Some(owner) = fine.layout.owner_of(fv.iv) else {
                return Err(RedistError::topology(
                    fine.layout.level(),
                    format!("{fv:?} under covered {d:?} is not in the fine layout"),
                ));
            };
            targets.push((fv, owner, fine.geometry.volume_fraction(fv)));
        }
    }
    let sum_k: f64 = targets.iter().map(|t| t.2).sum();
    if sum_k <= 0.0 {
        return Err(RedistError::topology(
            fine.layout.level(),
            format!("covered coarse destination {d:?} has no fine VoFs"),
        ));
    }
    let scale = weight * (r as f64).powi(SPACE_DIM as i32) / sum_k;
    Ok(targets
        .into_iter()
        .map(|(dest, owner, k)| Deposit {
            dest,
            owner,
            weight: scale * k,
        })
        .collect())
}
