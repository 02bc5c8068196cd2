use serde::{Deserialize, Serialize};
use serde_json;
use std::fs::File;
use std::path::Path;

use crate::error::{RedistError, RedistResult};

fn default_radius() -> usize {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RedistConfig {
    /// Number of conserved components carried by every level state.
    pub ncomp: usize,

    /// Monotone-path radius of the redistribution stencils.
    #[serde(default = "default_radius")]
    pub redist_radius: usize,

    /// Kappa-normalization radius; falls back to `redist_radius`.
    #[serde(default)]
    pub normalize_radius: Option<usize>,

    /// Mass-weighted redistribution; kappa weighting when absent.
    #[serde(default)]
    pub mass_weighting: Option<MassWeighting>,

    /// Whether the flux-register correction runs between levels.
    #[serde(default = "default_true")]
    pub reflux: bool,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct MassWeighting {
    /// Component holding the density used as the weight modifier.
    pub density_comp: usize,
    pub order: MassReweightOrder,
}

/// When stencils are re-weighted by density during a synchronization.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MassReweightOrder {
    /// With the density of the advanced state, before anything is redistributed.
    BeforeRedistribution,
    /// After the density component has been redistributed; the remaining
    /// components use the updated density.
    AfterDensity,
}

impl RedistConfig {
    pub fn new(ncomp: usize) -> Self {
        Self {
            ncomp,
            redist_radius: default_radius(),
            normalize_radius: None,
            mass_weighting: None,
            reflux: true,
        }
    }

    pub fn with_radius(mut self, radius: usize) -> Self {
        self.redist_radius = radius;
        self
    }

    pub fn with_mass_weighting(mut self, density_comp: usize, order: MassReweightOrder) -> Self {
        self.mass_weighting = Some(MassWeighting { density_comp, order });
        self
    }

    pub fn without_reflux(mut self) -> Self {
        self.reflux = false;
        self
    }

    pub fn normalize_radius(&self) -> usize {
        self.normalize_radius.unwrap_or(self.redist_radius)
    }

    pub fn validate(&self) -> RedistResult<()> {
        if self.ncomp == 0 {
            return Err(RedistError::config("ncomp must be >= 1"));
        }
        if self.redist_radius == 0 || self.normalize_radius == Some(0) {
            return Err(RedistError::config("radii must be >= 1"));
        }
        if let Some(m) = self.mass_weighting {
            if m.density_comp >= self.ncomp {
                return Err(RedistError::config(format!(
                    "density component {} out of range for {} components",
                    m.density_comp, self.ncomp
                )));
            }
        }
        Ok(())
    }

    pub fn from_json_str(s: &str) -> RedistResult<Self> {
        let cfg: RedistConfig =
            serde_json::from_str(s).map_err(|e| RedistError::config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> RedistResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RedistError::config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    pub fn write_to_dir(&self, out_dir: &Path) -> std::io::Result<()> {
        let path = out_dir.join("config.json");
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}
