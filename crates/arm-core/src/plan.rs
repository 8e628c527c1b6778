//! Candidate plans and the execution gate.
//!
//! A plan from the planning service is atomic: it either passes every limit
//! check on every step of every joint, or execution stays disabled for the
//! whole plan. [`PlanGate`] owns the pending plan and offset and is the only
//! way to build an execution request.

use crate::error::{ArmError, ArmResult};
use crate::joints::{JointLimit, JointLimits};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Body of a plan request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRequest {
    /// Current joint values.
    pub q: Vec<f64>,
    /// Requested cartesian displacement.
    pub offset: Vec<f64>,
}

/// Proposed path returned by the planning service.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CandidatePlan {
    /// One joint vector per step.
    #[serde(default)]
    pub path: Vec<Vec<f64>>,
    /// Whether the path reaches the requested target.
    #[serde(default)]
    pub arrived: bool,
}

/// One step of an execution request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSegment {
    /// Target joint values.
    pub positions: Vec<f64>,
    /// Optional gripper target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gripper: Option<f64>,
}

impl PathSegment {
    /// Position-only segment.
    #[must_use]
    pub fn positions(positions: Vec<f64>) -> Self {
        Self {
            positions,
            gripper: None,
        }
    }
}

/// Body of an execution request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Ordered segments.
    pub path: Vec<PathSegment>,
}

/// Outcome of validating a candidate plan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlanVerdict {
    /// Every constrained joint on every step is within limits.
    Accepted,
    /// The planner did not reach the target.
    NotArrived,
    /// The plan has no steps.
    Empty,
    /// First offending value found.
    LimitViolation {
        /// Step index.
        step: usize,
        /// Joint index.
        joint: usize,
        /// Offending value.
        value: f64,
        /// Limit it violates.
        limit: JointLimit,
    },
}

impl PlanVerdict {
    /// Whether execution may be enabled.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, PlanVerdict::Accepted)
    }

    /// Convert a rejection into the matching error.
    pub fn into_result(self) -> ArmResult<()> {
        match self {
            PlanVerdict::Accepted => Ok(()),
            PlanVerdict::NotArrived => Err(ArmError::PlanNotArrived),
            PlanVerdict::Empty => Err(ArmError::InvalidInput("plan has no steps".into())),
            PlanVerdict::LimitViolation {
                step,
                joint,
                value,
                limit,
            } => Err(ArmError::LimitViolation {
                step,
                joint,
                value,
                min: limit.min,
                max: limit.max,
            }),
        }
    }
}

/// Check a candidate plan against the joint limits.
///
/// Joints without a known limit are unconstrained. A non-finite value on a
/// constrained joint is a violation.
#[must_use]
pub fn validate_plan(plan: &CandidatePlan, limits: &JointLimits) -> PlanVerdict {
    if !plan.arrived {
        return PlanVerdict::NotArrived;
    }
    if plan.path.is_empty() {
        return PlanVerdict::Empty;
    }
    for (step, joints) in plan.path.iter().enumerate() {
        for (joint, &value) in joints.iter().enumerate() {
            let Some(limit) = limits.joint(joint) else {
                continue;
            };
            if !limit.contains(value) {
                return PlanVerdict::LimitViolation {
                    step,
                    joint,
                    value,
                    limit,
                };
            }
        }
    }
    PlanVerdict::Accepted
}

/// Pending offset and plan, plus the execution-enabled flag derived from them.
#[derive(Debug, Clone)]
pub struct PlanGate {
    offset: Vec<f64>,
    plan: Option<CandidatePlan>,
    enabled: bool,
}

impl Default for PlanGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanGate {
    /// Empty gate with a zero offset.
    #[must_use]
    pub fn new() -> Self {
        Self {
            offset: vec![0.0; 3],
            plan: None,
            enabled: false,
        }
    }

    /// Pending cartesian offset.
    #[must_use]
    pub fn offset(&self) -> &[f64] {
        &self.offset
    }

    /// Replace the pending offset. Any pending plan is superseded.
    pub fn set_offset(&mut self, offset: Vec<f64>) {
        self.offset = offset;
        self.plan = None;
        self.enabled = false;
    }

    /// Validate and store a new candidate, superseding the previous one.
    pub fn accept(&mut self, plan: CandidatePlan, limits: &JointLimits) -> PlanVerdict {
        let verdict = validate_plan(&plan, limits);
        self.enabled = verdict.is_accepted();
        match verdict {
            PlanVerdict::Accepted => debug!(steps = plan.path.len(), "Plan accepted"),
            other => warn!(?other, "Plan rejected, execution disabled"),
        }
        self.plan = Some(plan);
        verdict
    }

    /// Whether the pending plan may be executed.
    #[must_use]
    pub fn execution_enabled(&self) -> bool {
        self.enabled && self.plan.is_some()
    }

    /// Pending plan, valid or not.
    #[must_use]
    pub fn plan(&self) -> Option<&CandidatePlan> {
        self.plan.as_ref()
    }

    /// Build the position-only execution request for the accepted plan.
    pub fn execution_request(&self) -> ArmResult<ExecuteRequest> {
        match (&self.plan, self.enabled) {
            (Some(plan), true) => Ok(ExecuteRequest {
                path: plan
                    .path
                    .iter()
                    .cloned()
                    .map(PathSegment::positions)
                    .collect(),
            }),
            _ => Err(ArmError::ExecutionDisabled),
        }
    }

    /// Drop the plan and zero the offset.
    pub fn reset(&mut self) {
        self.offset.iter_mut().for_each(|v| *v = 0.0);
        self.plan = None;
        self.enabled = false;
    }
}
