// src/amr/reflux.rs
//
// Flux-register correction at coarse/fine interfaces.
//
// The synchronization only needs "correct the coarse state at the interface
// with the next finer level"; how interface fluxes are measured belongs to
// the integrator. `InterfaceFluxRegister` is a minimal register that stores
// the coarse/fine flux mismatch per coarse VoF.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::error::{RedistError, RedistResult, check_components};
use crate::field::LevelState;
use crate::geometry::VofId;

pub trait FluxCorrection {
    /// Apply the interface correction of `coarse_level` (with its finer level)
    /// to `coarse` for `comps`.
    fn reflux(
        &mut self,
        coarse_level: usize,
        coarse: &mut LevelState,
        comps: Range<usize>,
    ) -> RedistResult<()>;
}

/// No flux register; reflux is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReflux;

impl FluxCorrection for NoReflux {
    fn reflux(
        &mut self,
        _coarse_level: usize,
        _coarse: &mut LevelState,
        _comps: Range<usize>,
    ) -> RedistResult<()> {
        Ok(())
    }
}

/// Volume-weighted flux mismatch per coarse VoF next to a fine patch.
///
/// Coarse fluxes are subtracted and fine fluxes added with their face area
/// and time-step already folded in; reflux adds `mismatch / κ` to the state.
#[derive(Debug, Clone)]
pub struct InterfaceFluxRegister {
    ncomp: usize,
    /// Keyed by coarse level.
    mismatch: BTreeMap<usize, BTreeMap<VofId, Vec<f64>>>,
}

impl InterfaceFluxRegister {
    pub fn new(ncomp: usize) -> Self {
        Self {
            ncomp,
            mismatch: BTreeMap::new(),
        }
    }

    fn slot(&mut self, coarse_level: usize, vof: VofId) -> &mut Vec<f64> {
        let ncomp = self.ncomp;
        self.mismatch
            .entry(coarse_level)
            .or_default()
            .entry(vof)
            .or_insert_with(|| vec![0.0; ncomp])
    }

    fn check_len(&self, flux: &[f64]) -> RedistResult<()> {
        if flux.len() != self.ncomp {
            return Err(RedistError::ComponentRangeViolation {
                range: 0..flux.len(),
                ncomp: self.ncomp,
            });
        }
        Ok(())
    }

    pub fn increment_coarse(
        &mut self,
        coarse_level: usize,
        vof: VofId,
        flux: &[f64],
    ) -> RedistResult<()> {
        self.check_len(flux)?;
        let s = self.slot(coarse_level, vof);
        s.iter_mut().zip(flux).for_each(|(a, f)| *a -= f);
        Ok(())
    }

    pub fn increment_fine(
        &mut self,
        coarse_level: usize,
        vof: VofId,
        flux: &[f64],
    ) -> RedistResult<()> {
        self.check_len(flux)?;
        let s = self.slot(coarse_level, vof);
        s.iter_mut().zip(flux).for_each(|(a, f)| *a += f);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.mismatch.values().all(|m| m.is_empty())
    }

    /// Σ over the coarse VoFs of one level of one mismatch component.
    pub fn total(&self, coarse_level: usize, comp: usize) -> f64 {
        self.mismatch
            .get(&coarse_level)
            .map_or(0.0, |m| m.values().map(|v| v[comp]).sum())
    }
}

impl FluxCorrection for InterfaceFluxRegister {
    fn reflux(
        &mut self,
        coarse_level: usize,
        coarse: &mut LevelState,
        comps: Range<usize>,
    ) -> RedistResult<()> {
        check_components(&comps, self.ncomp)?;
        let Some(level) = self.mismatch.get_mut(&coarse_level) else {
            return Ok(());
        };
        for (vof, vals) in level.iter_mut() {
            let kappa = coarse.kappa(*vof).ok_or_else(|| {
                RedistError::topology(
                    coarse_level,
                    format!("flux register VoF {vof:?} not in layout"),
                )
            })?;
            let dst = coarse.values_mut(*vof)?;
            for c in comps.clone() {
                dst[c] += vals[c] / kappa;
                vals[c] = 0.0;
            }
        }
        level.retain(|_, v| v.iter().any(|x| *x != 0.0));
        log::trace!("reflux level {coarse_level}: {} VoFs still pending", level.len());
        Ok(())
    }
}
