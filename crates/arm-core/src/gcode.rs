//! G-code command builders.
//!
//! Scripts are sent verbatim through `printer.gcode.script`. Joint values are
//! formatted with `f64`'s shortest round-trip representation, except for path
//! segment moves which use a fixed three decimals.

use crate::joints::{AXIS_NAMES, JOINT_COUNT};
use crate::plan::PathSegment;

/// Named posture the arm can be sent to in one move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// Folded rest posture.
    Init,
    /// L-shaped working posture.
    LForm,
    /// Fully extended posture.
    IForm,
}

impl Preset {
    /// Every preset.
    pub const ALL: [Preset; 3] = [Preset::Init, Preset::LForm, Preset::IForm];

    /// Joint values of the posture.
    #[must_use]
    pub fn joints(self) -> [f64; JOINT_COUNT] {
        match self {
            Preset::Init => [9.42, 20.0, -42.0, 0.0, 0.0, 15.7],
            Preset::LForm => [9.42, 0.0, -16.0, -0.4, 6.0, 15.7],
            Preset::IForm => [9.42, 0.0, 0.0, 0.0, 0.0, 15.7],
        }
    }

    /// Short name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Preset::Init => "init",
            Preset::LForm => "Lform",
            Preset::IForm => "Iform",
        }
    }

    /// Look up a preset by name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }
}

/// Enable the cooling fans, then home every axis.
pub const HOME: &str = "SET_FAN_SPEED FAN=fan1 SPEED=1\nSET_FAN_SPEED FAN=fan2 SPEED=1\nG28";

/// Disable the stepper motors.
pub const POWER_DOWN: &str = "M18";

/// Gripper servo reading at 0 degrees.
const GRIPPER_STATE_MIN: f64 = 0.045;
/// Gripper servo reading at 90 degrees.
const GRIPPER_STATE_MAX: f64 = 0.125;
/// Degrees per unit of servo reading.
const GRIPPER_DEGREES_PER_UNIT: f64 = 1125.0;

/// Move a single axis, e.g. `G1 X10`.
#[must_use]
pub fn jog(axis: char, value: f64) -> String {
    format!("G1 {}{}", axis.to_ascii_uppercase(), value)
}

/// Move joints in axis order. Entries past the sixth are ignored.
#[must_use]
pub fn move_joints(joints: &[f64]) -> String {
    let axes: Vec<String> = AXIS_NAMES
        .iter()
        .zip(joints)
        .map(|(name, value)| format!("{name}{value}"))
        .collect();
    format!("G1 {}", axes.join(" "))
}

/// Move to a named posture.
#[must_use]
pub fn preset(preset: Preset) -> String {
    move_joints(&preset.joints())
}

/// Switch the camera power pin.
#[must_use]
pub fn camera_pin(enable: bool) -> String {
    format!("SET_PIN PIN=camera_en VALUE={}", u8::from(enable))
}

/// Set the gripper servo angle in degrees.
#[must_use]
pub fn gripper(angle: f64) -> String {
    format!("SET_SERVO SERVO=gripper angle={angle}")
}

/// Convert the firmware's gripper reading to a servo angle in degrees.
///
/// The reading is half the pulse width; 0.045 maps to 0 and 0.125 to 90.
#[must_use]
pub fn gripper_state_to_angle(state: f64) -> f64 {
    (state.clamp(GRIPPER_STATE_MIN, GRIPPER_STATE_MAX) - GRIPPER_STATE_MIN)
        * GRIPPER_DEGREES_PER_UNIT
}

/// Scripts for one execution segment: the move, then the gripper if set.
#[must_use]
pub fn segment(segment: &PathSegment) -> Vec<String> {
    let mut scripts = Vec::with_capacity(2);
    if !segment.positions.is_empty() {
        let axes: Vec<String> = AXIS_NAMES
            .iter()
            .zip(&segment.positions)
            .map(|(name, value)| format!("{name}{value:.3}"))
            .collect();
        scripts.push(format!("G1 {}", axes.join(" ")));
    }
    if let Some(angle) = segment.gripper {
        scripts.push(gripper(angle));
    }
    scripts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jog_single_axis() {
        assert_eq!(jog('x', 10.0), "G1 X10");
        assert_eq!(jog('C', -2.5), "G1 C-2.5");
    }

    #[test]
    fn presets_render_all_axes() {
        assert_eq!(preset(Preset::LForm), "G1 X9.42 Y0 Z-16 A-0.4 B6 C15.7");
        assert_eq!(preset(Preset::Init), "G1 X9.42 Y20 Z-42 A0 B0 C15.7");
        assert_eq!(Preset::from_name("Iform"), Some(Preset::IForm));
        assert_eq!(Preset::from_name("Zform"), None);
    }

    #[test]
    fn move_ignores_extra_joints() {
        assert_eq!(
            move_joints(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]),
            "G1 X1 Y2 Z3 A4 B5 C6"
        );
    }

    #[test]
    fn camera_pin_values() {
        assert_eq!(camera_pin(true), "SET_PIN PIN=camera_en VALUE=1");
        assert_eq!(camera_pin(false), "SET_PIN PIN=camera_en VALUE=0");
    }

    #[test]
    fn gripper_angle_is_clamped() {
        assert_eq!(gripper_state_to_angle(0.0), 0.0);
        assert_eq!(gripper_state_to_angle(1.0), (0.125 - 0.045) * 1125.0);
        assert!((gripper_state_to_angle(0.085) - 45.0).abs() < 1e-9);
    }

    #[test]
    fn segment_scripts() {
        let seg = PathSegment {
            positions: vec![1.0, 2.5, -3.0],
            gripper: Some(30.0),
        };
        assert_eq!(
            segment(&seg),
            vec![
                "G1 X1.000 Y2.500 Z-3.000".to_string(),
                "SET_SERVO SERVO=gripper angle=30".to_string()
            ]
        );
        assert!(segment(&PathSegment::positions(vec![])).is_empty());
    }
}
