// src/error.rs
//
// Error kinds for the redistribution core.
//
// Every variant is a caller contract violation: corrections are deterministic
// functions of topology and accumulated data, so nothing here is retried.

use std::ops::Range;

use thiserror::Error;

use crate::geometry::VofId;

pub type RedistResult<T> = Result<T, RedistError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RedistError {
    /// Neighborhood weight sum is zero outside the explicit self fallback, or
    /// a weight is negative or not finite.
    #[error("degenerate stencil at {vof:?}: negative, non-finite or zero-sum weights (sum {sum})")]
    DegenerateStencil { vof: VofId, sum: f64 },

    /// Register used before it was defined for the current topology.
    #[error("register {register} is not defined for the current topology")]
    UndefinedRegister { register: &'static str },

    /// Requested component interval does not fit the field.
    #[error("component range {range:?} invalid for a field with {ncomp} components")]
    ComponentRangeViolation { range: Range<usize>, ncomp: usize },

    /// A cell is absent from the layout the operation targets (stale topology).
    #[error("topology mismatch on level {level}: {message}")]
    TopologyMismatch { level: usize, message: String },

    /// Phase ordering of the redistribution pipeline was broken.
    #[error("protocol violation: {message}")]
    ProtocolViolation { message: String },

    /// Configuration could not be parsed or is inconsistent.
    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl RedistError {
    pub fn topology(level: usize, message: impl Into<String>) -> Self {
        RedistError::TopologyMismatch {
            level,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        RedistError::ProtocolViolation {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        RedistError::Config {
            message: message.into(),
        }
    }
}

/// Check that `range` is a non-empty interval inside `0..ncomp`.
pub fn check_components(range: &Range<usize>, ncomp: usize) -> RedistResult<()> {
    if range.start >= range.end || range.end > ncomp {
        return Err(RedistError::ComponentRangeViolation {
            range: range.clone(),
            ncomp,
        });
    }
    Ok(())
}
