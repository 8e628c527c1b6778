//! Joint travel limits.
//!
//! The firmware reports `axis_minimum` / `axis_maximum` arrays in its toolhead
//! status. The first [`JOINT_COUNT`] entries are the arm joints; anything after
//! that is ignored. Limits are captured once per session from the first
//! successful detailed query and never change afterwards.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};

/// Number of actuated joints on the arm.
pub const JOINT_COUNT: usize = 6;

/// Axis letters used by the firmware, in joint order.
pub const AXIS_NAMES: [char; JOINT_COUNT] = ['X', 'Y', 'Z', 'A', 'B', 'C'];

/// Value of `toolhead.homed_axes` once every joint is homed.
pub const HOMED_ALL_AXES: &str = "xyzabc";

/// Inclusive travel range of one joint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointLimit {
    /// Lower bound.
    pub min: f64,
    /// Upper bound.
    pub max: f64,
}

impl JointLimit {
    /// Create a new limit.
    #[must_use]
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Inclusive range check. NaN is never contained.
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Pair per-axis minimum and maximum arrays into joint limits.
///
/// Only the first [`JOINT_COUNT`] pairs are kept. A shorter input yields
/// fewer limits; joints without a limit are unconstrained during validation.
#[must_use]
pub fn zip_limits(minimum: &[f64], maximum: &[f64]) -> Vec<JointLimit> {
    minimum
        .iter()
        .zip(maximum.iter())
        .take(JOINT_COUNT)
        .map(|(&min, &max)| JointLimit::new(min, max))
        .collect()
}

/// Write-once joint limits shared between the poller and the plan validator.
///
/// Cloning is cheap; every clone observes the same cell.
#[derive(Debug, Clone, Default)]
pub struct JointLimits {
    cell: Arc<OnceLock<Vec<JointLimit>>>,
}

impl JointLimits {
    /// Create an empty, not yet populated set of limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store limits if none are stored yet.
    ///
    /// Returns `true` if this call populated the cell. Later calls are no-ops
    /// and return `false`, even under concurrent writers.
    pub fn populate(&self, limits: Vec<JointLimit>) -> bool {
        self.cell.set(limits).is_ok()
    }

    /// Limits if already populated.
    #[must_use]
    pub fn get(&self) -> Option<&[JointLimit]> {
        self.cell.get().map(Vec::as_slice)
    }

    /// Limit for a given joint index, if known.
    #[must_use]
    pub fn joint(&self, index: usize) -> Option<JointLimit> {
        self.get().and_then(|limits| limits.get(index).copied())
    }

    /// Whether the first detailed query has populated the limits.
    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.cell.get().is_some()
    }
}
