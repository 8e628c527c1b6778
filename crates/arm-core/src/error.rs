//! Error taxonomy for the arm supervision core.
//!
//! `ArmError` groups the faults the supervision core can raise on its own.
//! None of them is fatal to a running session; the category decides how the
//! caller reacts. Link failures and unparseable peer payloads belong to the
//! client layer and never reach this type.
//!
//! - **Data shape** (`DataShape`, `SizeOverflow`, `FrameTooLarge`): buffers
//!   whose lengths do not match their declared dimensions. Logged, the
//!   operation becomes a no-op.
//! - **Safety** (`LimitViolation`, `PlanNotArrived`, `ExecutionDisabled`): a
//!   candidate plan must not reach the hardware. Execution stays disabled until
//!   a fresh plan validates.
//! - **User input** (`InvalidInput`): rejected before any network call.

use thiserror::Error;

/// Convenience alias for results carrying an [`ArmError`].
pub type ArmResult<T> = std::result::Result<T, ArmError>;

/// Domain error for the supervision core.
#[derive(Error, Debug)]
pub enum ArmError {
    /// A buffer did not match its declared shape.
    #[error("Data shape mismatch in {context}: expected {expected}, got {actual}")]
    DataShape {
        /// What was being checked (e.g. "mask", "frame").
        context: &'static str,
        /// Length required by the declared dimensions.
        expected: usize,
        /// Length actually supplied.
        actual: usize,
    },

    /// A plan step puts a joint outside its travel limits.
    #[error(
        "Step {step} joint {joint} at {value} is outside limits [{min}, {max}]"
    )]
    LimitViolation {
        /// Zero-based index of the offending step.
        step: usize,
        /// Zero-based joint index.
        joint: usize,
        /// Commanded joint value.
        value: f64,
        /// Lower travel limit (inclusive).
        min: f64,
        /// Upper travel limit (inclusive).
        max: f64,
    },

    /// The planner could not reach the requested target.
    #[error("Plan did not arrive at the requested target")]
    PlanNotArrived,

    /// Execution was requested without an accepted plan.
    #[error("Execution is disabled: no validated plan is pending")]
    ExecutionDisabled,

    /// Axis moves are refused until every axis reports homed.
    #[error("Axis {axis} cannot move before the arm is homed")]
    NotHomed {
        /// Requested axis letter.
        axis: char,
    },

    /// User supplied input rejected before any network call.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Arithmetic overflow while computing a buffer size.
    #[error("Size overflow while computing {context}")]
    SizeOverflow {
        /// Which size was being computed.
        context: &'static str,
    },

    /// A frame exceeds the maximum supported payload.
    #[error("Frame size {bytes} bytes exceeds maximum {max_bytes} bytes")]
    FrameTooLarge {
        /// Requested size.
        bytes: usize,
        /// Configured ceiling.
        max_bytes: usize,
    },

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ArmError {
    /// Returns `true` for faults that must keep plan execution disabled.
    #[must_use]
    pub fn is_safety(&self) -> bool {
        matches!(
            self,
            ArmError::LimitViolation { .. } | ArmError::PlanNotArrived | ArmError::ExecutionDisabled
        )
    }
}
