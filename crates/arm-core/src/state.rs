//! Machine state derived from peer telemetry.
//!
//! Readiness comes from the `server.info` probe, homing and positions from the
//! `printer.objects.query` detailed response. Both are parsed here so the
//! client layer only routes payloads.

use crate::joints::{JOINT_COUNT, HOMED_ALL_AXES};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Whether the firmware reports itself ready to accept commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReadinessState {
    /// Firmware is starting, shut down, or in an error state.
    #[default]
    NotReady,
    /// `klippy_state == "ready"`.
    Ready,
}

impl ReadinessState {
    /// Map the firmware's `klippy_state` string.
    #[must_use]
    pub fn from_klippy_state(state: &str) -> Self {
        if state == "ready" {
            Self::Ready
        } else {
            Self::NotReady
        }
    }

    /// Extract readiness from a full `server.info` response payload.
    ///
    /// Returns `None` when the payload carries no `result.klippy_state`.
    #[must_use]
    pub fn from_probe_response(payload: &Value) -> Option<Self> {
        payload
            .pointer("/result/klippy_state")
            .and_then(Value::as_str)
            .map(Self::from_klippy_state)
    }

    /// Convenience check.
    #[must_use]
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }
}

/// Whether every joint has been homed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HomedState {
    /// At least one axis is not homed.
    #[default]
    Unhomed,
    /// All six axes report homed.
    Homed,
}

impl HomedState {
    /// Strict comparison against the full axis set. Partial homing such as
    /// `"xyz"` counts as unhomed.
    #[must_use]
    pub fn from_homed_axes(axes: &str) -> Self {
        if axes == HOMED_ALL_AXES {
            Self::Homed
        } else {
            Self::Unhomed
        }
    }

    /// Convenience check.
    #[must_use]
    pub fn is_homed(self) -> bool {
        self == Self::Homed
    }
}

/// Toolhead section of a detailed status response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ToolheadStatus {
    /// Lower-case letters of homed axes.
    pub homed_axes: String,
    /// Per-axis lower travel bound.
    pub axis_minimum: Vec<f64>,
    /// Per-axis upper travel bound.
    pub axis_maximum: Vec<f64>,
    /// Current commanded position per axis.
    pub position: Vec<f64>,
}

impl ToolheadStatus {
    /// Extract `result.status.toolhead` from a detailed query response.
    ///
    /// Returns `None` if the section is missing or not an object of the
    /// expected shape.
    #[must_use]
    pub fn from_query_response(payload: &Value) -> Option<Self> {
        let toolhead = payload.pointer("/result/status/toolhead")?;
        serde_json::from_value(toolhead.clone()).ok()
    }

    /// Homed state derived from `homed_axes`.
    #[must_use]
    pub fn homed(&self) -> HomedState {
        HomedState::from_homed_axes(&self.homed_axes)
    }

    /// First six position entries.
    #[must_use]
    pub fn joint_positions(&self) -> Vec<f64> {
        self.position.iter().copied().take(JOINT_COUNT).collect()
    }
}

/// Latest known machine state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MachineSnapshot {
    /// Probe-derived readiness.
    pub readiness: ReadinessState,
    /// Query-derived homing state.
    pub homed: HomedState,
    /// Live joint positions, empty until the first detailed response.
    pub positions: Vec<f64>,
    /// When any field last changed.
    pub last_update: Option<DateTime<Utc>>,
}
