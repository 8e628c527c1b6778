//! Core types and pure logic for the rust-arm supervision client.
//!
//! Nothing in this crate performs I/O. It holds the error taxonomy, shared
//! limits, joint-limit bookkeeping, frame history, candidate plan validation
//! and the G-code command builders used by the session layer.

pub mod error;
pub mod frame;
pub mod gcode;
pub mod joints;
pub mod limits;
pub mod plan;
pub mod state;

pub use error::{ArmError, ArmResult};
pub use frame::{FrameHistory, FrameRecord, LiveFrame};
pub use joints::{JointLimit, JointLimits, JOINT_COUNT};
pub use plan::{CandidatePlan, PathSegment, PlanGate, PlanVerdict};
pub use state::{HomedState, MachineSnapshot, ReadinessState};
