//! Machine state observed through the heartbeat.
//!
//! Only heartbeat responses write here; everything else reads snapshots or
//! awaits changes through the watch receiver.

use arm_core::joints::zip_limits;
use arm_core::state::ToolheadStatus;
use arm_core::{HomedState, JointLimits, MachineSnapshot, ReadinessState};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Shared, observable machine state. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MachineTelemetry {
    snapshot: Arc<watch::Sender<MachineSnapshot>>,
    limits: JointLimits,
}

impl Default for MachineTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl MachineTelemetry {
    /// Not ready, unhomed, no limits.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(MachineSnapshot::default());
        Self {
            snapshot: Arc::new(tx),
            limits: JointLimits::new(),
        }
    }

    /// Receiver notified on every change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<MachineSnapshot> {
        self.snapshot.subscribe()
    }

    /// Current state.
    #[must_use]
    pub fn snapshot(&self) -> MachineSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Current readiness.
    #[must_use]
    pub fn readiness(&self) -> ReadinessState {
        self.snapshot.borrow().readiness
    }

    /// Current homing state.
    #[must_use]
    pub fn homed(&self) -> HomedState {
        self.snapshot.borrow().homed
    }

    /// Latest joint positions.
    #[must_use]
    pub fn positions(&self) -> Vec<f64> {
        self.snapshot.borrow().positions.clone()
    }

    /// Write-once joint limits shared with the plan validator.
    #[must_use]
    pub fn limits(&self) -> JointLimits {
        self.limits.clone()
    }

    /// Forget what the dropped connection reported. A restarted firmware
    /// comes back in `startup`, so readiness and homing must be earned again
    /// on the next connection. Positions and joint limits are kept.
    pub(crate) fn link_lost(&self) {
        self.snapshot.send_if_modified(|snap| {
            if snap.readiness == ReadinessState::NotReady && snap.homed == HomedState::Unhomed {
                return false;
            }
            info!("Link lost, machine state reset until the next probe");
            snap.readiness = ReadinessState::NotReady;
            snap.homed = HomedState::Unhomed;
            true
        });
    }

    /// Apply a `server.info` response.
    pub(crate) fn apply_probe(&self, payload: &Value) {
        let Some(readiness) = ReadinessState::from_probe_response(payload) else {
            warn!("Probe response without klippy_state");
            return;
        };
        self.snapshot.send_if_modified(|snap| {
            if snap.readiness == readiness {
                return false;
            }
            info!(from = ?snap.readiness, to = ?readiness, "Machine readiness changed");
            snap.readiness = readiness;
            snap.last_update = Some(Utc::now());
            true
        });
    }

    /// Apply a `printer.objects.query` response.
    pub(crate) fn apply_status(&self, payload: &Value) {
        let Some(toolhead) = ToolheadStatus::from_query_response(payload) else {
            warn!("Status response without a usable toolhead section");
            return;
        };

        if !self.limits.is_populated() {
            let limits = zip_limits(&toolhead.axis_minimum, &toolhead.axis_maximum);
            if !limits.is_empty() && self.limits.populate(limits) {
                info!(limits = ?self.limits.get(), "Joint limits captured");
            }
        }

        let homed = toolhead.homed();
        let positions = toolhead.joint_positions();
        self.snapshot.send_modify(|snap| {
            if snap.homed != homed {
                info!(from = ?snap.homed, to = ?homed, "Homing state changed");
                snap.homed = homed;
            }
            snap.positions = positions;
            snap.last_update = Some(Utc::now());
        });
        debug!("Applied toolhead status");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status(homed: &str, min: f64, max: f64, x: f64) -> Value {
        json!({"id": 101, "result": {"status": {"toolhead": {
            "homed_axes": homed,
            "axis_minimum": vec![min; 6],
            "axis_maximum": vec![max; 6],
            "position": [x, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]
        }}}})
    }

    #[test]
    fn probe_drives_readiness() {
        let telemetry = MachineTelemetry::new();
        telemetry.apply_probe(&json!({"id": 100, "result": {"klippy_state": "ready"}}));
        assert!(telemetry.readiness().is_ready());
        telemetry.apply_probe(&json!({"id": 100, "result": {"klippy_state": "shutdown"}}));
        assert_eq!(telemetry.readiness(), ReadinessState::NotReady);
    }

    #[test]
    fn status_updates_positions_every_time_but_limits_once() {
        let telemetry = MachineTelemetry::new();
        telemetry.apply_status(&status("xyz", -10.0, 10.0, 1.0));
        assert_eq!(telemetry.homed(), HomedState::Unhomed);
        assert_eq!(telemetry.positions().len(), 6);

        telemetry.apply_status(&status("xyzab", -99.0, 99.0, 1.5));
        assert_eq!(telemetry.homed(), HomedState::Unhomed);

        telemetry.apply_status(&status("xyzabc", -99.0, 99.0, 2.0));
        assert_eq!(telemetry.homed(), HomedState::Homed);
        assert_eq!(telemetry.positions()[0], 2.0);
        let limit = telemetry.limits().joint(0).unwrap();
        assert_eq!((limit.min, limit.max), (-10.0, 10.0));
    }

    #[test]
    fn link_loss_resets_readiness_but_keeps_limits() {
        let telemetry = MachineTelemetry::new();
        telemetry.apply_probe(&json!({"id": 100, "result": {"klippy_state": "ready"}}));
        telemetry.apply_status(&status("xyzabc", -10.0, 10.0, 4.0));
        assert_eq!(telemetry.homed(), HomedState::Homed);

        telemetry.link_lost();
        assert_eq!(telemetry.readiness(), ReadinessState::NotReady);
        assert_eq!(telemetry.homed(), HomedState::Unhomed);
        assert_eq!(telemetry.positions()[0], 4.0);
        assert_eq!(telemetry.limits().joint(0).unwrap().max, 10.0);

        let rx = telemetry.subscribe();
        telemetry.link_lost();
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn bad_payloads_change_nothing() {
        let telemetry = MachineTelemetry::new();
        let rx = telemetry.subscribe();
        telemetry.apply_probe(&json!({"id": 100}));
        telemetry.apply_status(&json!({"id": 101, "result": {}}));
        assert!(!rx.has_changed().unwrap());
        assert!(!telemetry.limits().is_populated());
    }

    #[tokio::test]
    async fn subscribers_are_notified() {
        let telemetry = MachineTelemetry::new();
        let mut rx = telemetry.subscribe();
        telemetry.apply_probe(&json!({"result": {"klippy_state": "ready"}}));
        rx.changed().await.unwrap();
        assert!(rx.borrow().readiness.is_ready());
    }
}
