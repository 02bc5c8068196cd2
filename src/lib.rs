// src/lib.rs

pub mod amr;
pub mod config;
pub mod error;
pub mod field;
pub mod geometry;
pub mod redist;

pub use config::{MassReweightOrder, MassWeighting, RedistConfig};
pub use error::{RedistError, RedistResult};
pub use field::LevelState;
pub use geometry::{CutCellGeometry, EbGeometry, FaceId, VofId};
