pub mod level;
pub mod normalize;
pub mod path;
pub mod register;
pub mod stencil;

pub use level::LevelRedistribution;
pub use normalize::KappaNormalizer;
pub use path::{monotone_neighborhood, monotone_neighbors};
pub use register::{Deposit, Exchange, RedistRegister, RegisterKind, SourceDeposits};
pub use stencil::{RedistStencil, StencilEntry, VofStencil};
