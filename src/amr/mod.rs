pub mod hierarchy;
pub mod layout;
pub mod orchestrator;
pub mod patch;
pub mod rect;
pub mod reflux;

pub use hierarchy::{EbHierarchy, EbLevel};
pub use layout::{LevelLayout, PatchBox, TopologyId, WorkerId};
pub use orchestrator::{LevelPhase, RefluxRedistOrchestrator};
pub use rect::{IntVect, Rect2i};
pub use reflux::{FluxCorrection, InterfaceFluxRegister, NoReflux};
