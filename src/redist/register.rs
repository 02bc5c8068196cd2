// src/redist/register.rs
//
// Redistribution register: one accumulate/apply algorithm shared by the
// level, coarse→fine, fine→coarse and coarse→coarse variants.
//
// A register is defined by a set of resolved deposits per source VoF: the
// destination VoF on the target level, the worker owning it, and a weight
// that already includes any cross-level volume scaling. The variants only
// differ in how deposits are resolved (see `redist::level`).
//
// Apply is a scatter/reduce: every source worker builds an outbox of
// contributions keyed by (destination owner, destination VoF), outboxes are
// merged, and each owner adds its aggregate to the state divided by the
// destination kappa.

use std::collections::BTreeMap;
use std::ops::Range;

use rayon::prelude::*;

use crate::amr::layout::{TopologyId, WorkerId};
use crate::error::{RedistError, RedistResult, check_components};
use crate::field::LevelState;
use crate::geometry::VofId;

/// Direction tag of a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterKind {
    /// Destinations on the source level.
    Level,
    /// Coarse sources, destinations on the next finer level.
    CoarseToFine,
    /// Fine sources, destinations on the next coarser level.
    FineToCoarse,
    /// Sources pending across a regrid, destinations on the re-partitioned level.
    CoarseToCoarse,
}

impl RegisterKind {
    pub fn name(self) -> &'static str {
        match self {
            RegisterKind::Level => "level",
            RegisterKind::CoarseToFine => "coarse-to-fine",
            RegisterKind::FineToCoarse => "fine-to-coarse",
            RegisterKind::CoarseToCoarse => "coarse-to-coarse",
        }
    }
}

/// One resolved destination of a source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deposit {
    pub dest: VofId,
    pub owner: WorkerId,
    pub weight: f64,
}

/// Deposits of one source and the worker that owns the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDeposits {
    pub owner: WorkerId,
    pub deposits: Vec<Deposit>,
}

/// Aggregated contributions, grouped by destination owner and summed by
/// destination VoF. Values cover the component range of the exchange.
#[derive(Debug, Default, Clone)]
pub struct Exchange {
    by_owner: BTreeMap<WorkerId, BTreeMap<VofId, Vec<f64>>>,
}

impl Exchange {
    fn add(&mut self, owner: WorkerId, dest: VofId, scaled: impl Iterator<Item = f64>) {
        let slot = self.by_owner.entry(owner).or_default().entry(dest).or_default();
        if slot.is_empty() {
            slot.extend(scaled);
        } else {
            slot.iter_mut().zip(scaled).for_each(|(a, v)| *a += v);
        }
    }

    fn merge(mut self, other: Exchange) -> Exchange {
        for (owner, dests) in other.by_owner {
            for (dest, vals) in dests {
                self.add(owner, dest, vals.into_iter());
            }
        }
        self
    }

    pub fn owners(&self) -> impl Iterator<Item = WorkerId> + '_ {
        self.by_owner.keys().copied()
    }

    /// Aggregate delivered to one owner.
    pub fn for_owner(&self, owner: WorkerId) -> Option<&BTreeMap<VofId, Vec<f64>>> {
        self.by_owner.get(&owner)
    }

    /// Σ over every destination of the volume-weighted amount of one component
    /// (index relative to the exchanged range).
    pub fn total(&self, comp: usize) -> f64 {
        self.by_owner
            .values()
            .flat_map(|d| d.values())
            .map(|v| v[comp])
            .sum()
    }

    pub fn num_destinations(&self) -> usize {
        self.by_owner.values().map(|d| d.len()).sum()
    }
}

pub struct RedistRegister {
    kind: RegisterKind,
    ncomp: usize,
    target: Option<TopologyId>,
    sources: BTreeMap<VofId, SourceDeposits>,
    pending: BTreeMap<VofId, Vec<f64>>,
    applied: Vec<bool>,
}

impl RedistRegister {
    /// A register that is not yet defined for any topology.
    pub fn new(kind: RegisterKind, ncomp: usize) -> Self {
        Self {
            kind,
            ncomp,
            target: None,
            sources: BTreeMap::new(),
            pending: BTreeMap::new(),
            applied: vec![false; ncomp],
        }
    }

    #[inline]
    pub fn kind(&self) -> RegisterKind {
        self.kind
    }

    #[inline]
    pub fn is_defined(&self) -> bool {
        self.target.is_some()
    }

    /// Topology of the level the destinations live on.
    #[inline]
    pub fn target(&self) -> Option<TopologyId> {
        self.target
    }

    /// Define for a new target topology. Pending entries are discarded.
    pub fn define(&mut self, target: TopologyId, sources: BTreeMap<VofId, SourceDeposits>) {
        self.target = Some(target);
        self.sources = sources;
        self.pending.clear();
        self.applied.iter_mut().for_each(|a| *a = false);
    }

    /// Swap the deposit weights for the same sources, keeping pending data.
    pub fn replace_deposits(
        &mut self,
        sources: BTreeMap<VofId, SourceDeposits>,
    ) -> RedistResult<()> {
        if !self.is_defined() {
            return Err(RedistError::UndefinedRegister {
                register: self.kind.name(),
            });
        }
        if let Some(orphan) = self.pending.keys().find(|s| !sources.contains_key(s)) {
            return Err(RedistError::protocol(format!(
                "{} register: re-weighting drops pending source {orphan:?}",
                self.kind.name()
            )));
        }
        self.sources = sources;
        Ok(())
    }

    pub fn undefine(&mut self) {
        self.target = None;
        self.sources.clear();
        self.pending.clear();
        self.applied.iter_mut().for_each(|a| *a = false);
    }

    /// Drop pending entries, keeping the definition.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.applied.iter_mut().for_each(|a| *a = false);
    }

    pub fn has_source(&self, vof: VofId) -> bool {
        self.sources.contains_key(&vof)
    }

    pub fn sources(&self) -> impl Iterator<Item = (&VofId, &SourceDeposits)> {
        self.sources.iter()
    }

    /// No pending entries.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Some but not all components of the current cycle were applied.
    pub fn is_partially_applied(&self) -> bool {
        self.applied.iter().any(|&a| a)
    }

    pub fn pending(&self, source: VofId) -> Option<&[f64]> {
        self.pending.get(&source).map(|v| v.as_slice())
    }

    /// Add `delta` to the accumulator of `source`.
    ///
    /// Returns false when the source has no deposits in this register.
    pub fn increment(&mut self, source: VofId, delta: &[f64]) -> RedistResult<bool> {
        if !self.is_defined() {
            return Err(RedistError::UndefinedRegister {
                register: self.kind.name(),
            });
        }
        if delta.len() != self.ncomp {
            return Err(RedistError::ComponentRangeViolation {
                range: 0..delta.len(),
                ncomp: self.ncomp,
            });
        }
        if self.is_partially_applied() {
            return Err(RedistError::protocol(format!(
                "{} register: increment after a partial apply in the same cycle",
                self.kind.name()
            )));
        }
        if !self.sources.contains_key(&source) {
            return Ok(false);
        }
        let acc = self
            .pending
            .entry(source)
            .or_insert_with(|| vec![0.0; self.ncomp]);
        acc.iter_mut().zip(delta).for_each(|(a, d)| *a += d);
        Ok(true)
    }

    /// Scatter the pending entries for `comps` and reduce them by destination.
    ///
    /// Sources are grouped by owning worker and each group builds its outbox
    /// in parallel; already applied components contribute nothing.
    pub fn exchange(&self, comps: Range<usize>) -> RedistResult<Exchange> {
        if !self.is_defined() {
            return Err(RedistError::UndefinedRegister {
                register: self.kind.name(),
            });
        }
        check_components(&comps, self.ncomp)?;

        let mut by_worker: BTreeMap<WorkerId, Vec<(&SourceDeposits, &[f64])>> = BTreeMap::new();
        for (src, delta) in &self.pending {
            let Some(sd) = self.sources.get(src) else {
                return Err(RedistError::protocol(format!(
                    "{} register: pending source {src:?} has no deposits",
                    self.kind.name()
                )));
            };
            by_worker.entry(sd.owner).or_default().push((sd, delta.as_slice()));
        }

        let applied = &self.applied;
        let exchange = by_worker
            .into_par_iter()
            .map(|(_, items)| {
                let mut out = Exchange::default();
                for (sd, delta) in items {
                    for dep in &sd.deposits {
                        let scaled = comps.clone().map(|c| {
                            if applied[c] {
                                0.0
                            } else {
                                dep.weight * delta[c]
                            }
                        });
                        out.add(dep.owner, dep.dest, scaled);
                    }
                }
                out
            })
            .reduce(Exchange::default, Exchange::merge);

        log::trace!(
            "{} register: {} sources -> {} destinations on {} owners",
            self.kind.name(),
            self.pending.len(),
            exchange.num_destinations(),
            exchange.by_owner.len()
        );
        Ok(exchange)
    }

    /// Apply the pending entries for `comps` to `state`:
    /// `state(dest) += weight * delta / kappa(dest)`.
    ///
    /// Applied components are cleared; once every component was applied the
    /// register is empty and a new cycle may start.
    pub fn redistribute(
        &mut self,
        state: &mut LevelState,
        comps: Range<usize>,
    ) -> RedistResult<()> {
        let Some(target) = self.target else {
            return Err(RedistError::UndefinedRegister {
                register: self.kind.name(),
            });
        };
        check_components(&comps, self.ncomp)?;
        if state.ncomp() != self.ncomp {
            return Err(RedistError::ComponentRangeViolation {
                range: 0..self.ncomp,
                ncomp: state.ncomp(),
            });
        }
        if state.topology() != target {
            return Err(RedistError::topology(
                target.level,
                format!(
                    "{} register defined for generation {} but state is generation {}",
                    self.kind.name(),
                    target.generation,
                    state.topology().generation
                ),
            ));
        }
        if self.pending.is_empty() {
            return Ok(());
        }

        let exchange = self.exchange(comps.clone())?;
        for dests in exchange.by_owner.values() {
            for (dest, amounts) in dests {
                let kappa = state.kappa(*dest).ok_or_else(|| {
                    RedistError::topology(
                        target.level,
                        format!("{} register destination {dest:?} not in layout", self.kind.name()),
                    )
                })?;
                let vals = state.values_mut(*dest)?;
                for (c, a) in comps.clone().zip(amounts) {
                    vals[c] += a / kappa;
                }
            }
        }

        for c in comps {
            self.applied[c] = true;
        }
        if self.applied.iter().all(|&a| a) {
            self.pending.clear();
            self.applied.iter_mut().for_each(|a| *a = false);
        }
        Ok(())
    }
}
