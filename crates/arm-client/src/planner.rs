//! Motion planning collaborator and the gated executor.
//!
//! The planner proposes a joint-space path for a cartesian offset. A plan only
//! reaches `/execute` after [`PlanGate`] accepted it against the joint limits;
//! the pending offset and plan are cleared after every execution attempt,
//! whatever the outcome.

use crate::connection::join_path;
use crate::error::{ClientError, Result};
use arm_core::plan::{validate_plan, ExecuteRequest, PlanRequest};
use arm_core::{ArmError, CandidatePlan, JointLimits, PathSegment, PlanGate, PlanVerdict, JOINT_COUNT};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// HTTP client for `/plan` and `/execute`.
#[derive(Debug, Clone)]
pub struct PlannerClient {
    http: reqwest::Client,
    plan_url: Url,
    execute_url: Url,
}

impl PlannerClient {
    /// Client for the planner at `base`.
    pub fn new(http: reqwest::Client, base: &Url) -> Result<Self> {
        let join = |path| join_path(base, path).map_err(|e| ClientError::InvalidConfig(e.to_string()));
        Ok(Self {
            http,
            plan_url: join("plan")?,
            execute_url: join("execute")?,
        })
    }

    /// `POST /plan {q, offset}`.
    pub async fn request_plan(&self, current: &[f64], offset: &[f64]) -> Result<CandidatePlan> {
        let body = PlanRequest {
            q: current.to_vec(),
            offset: offset.to_vec(),
        };
        let plan: CandidatePlan = self
            .http
            .post(self.plan_url.clone())
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(steps = plan.path.len(), arrived = plan.arrived, "Plan received");
        Ok(plan)
    }

    /// `POST /execute {path}`. The acknowledgement is opaque.
    pub async fn execute(&self, request: &ExecuteRequest) -> Result<Value> {
        let response = self
            .http
            .post(self.execute_url.clone())
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body).unwrap_or(Value::Null))
    }
}

/// Plan lifecycle bound to a session's joint limits. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PlanExecutor {
    planner: PlannerClient,
    limits: JointLimits,
    gate: Arc<Mutex<PlanGate>>,
    generation: Arc<AtomicU64>,
}

impl PlanExecutor {
    /// Executor validating against `limits`.
    #[must_use]
    pub fn new(planner: PlannerClient, limits: JointLimits) -> Self {
        Self {
            planner,
            limits,
            gate: Arc::new(Mutex::new(PlanGate::new())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Pending cartesian offset.
    #[must_use]
    pub fn offset(&self) -> Vec<f64> {
        self.gate.lock().offset().to_vec()
    }

    /// Whether the pending plan may be executed.
    #[must_use]
    pub fn execution_enabled(&self) -> bool {
        self.gate.lock().execution_enabled()
    }

    /// Pending plan, valid or not.
    #[must_use]
    pub fn pending_plan(&self) -> Option<CandidatePlan> {
        self.gate.lock().plan().cloned()
    }

    /// Request a plan from `current` by `offset` and validate it.
    ///
    /// A response to a request that has since been superseded is discarded.
    pub async fn plan(&self, current: &[f64], offset: Vec<f64>) -> Result<PlanVerdict> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.gate.lock().set_offset(offset.clone());
        let plan = self.planner.request_plan(current, &offset).await?;

        let mut gate = self.gate.lock();
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "Discarding superseded plan");
            return Err(ClientError::Domain(ArmError::InvalidInput(
                "plan superseded by a newer request".into(),
            )));
        }
        Ok(gate.accept(plan, &self.limits))
    }

    /// Execute the accepted plan, then reset the offset and plan.
    pub async fn execute(&self) -> Result<Value> {
        let request = self.gate.lock().execution_request()?;
        info!(segments = request.path.len(), "Executing plan");
        let result = self.planner.execute(&request).await;
        self.reset();
        if let Err(err) = &result {
            warn!(error = %err, "Execution request failed");
        }
        result
    }

    /// Execute a policy prediction (six joints, then optional gripper) after
    /// checking the joints against the limits.
    pub async fn execute_prediction(&self, prediction: &[f64]) -> Result<Value> {
        let segment = prediction_segment(prediction)?;
        let candidate = CandidatePlan {
            path: vec![segment.positions.clone()],
            arrived: true,
        };
        validate_plan(&candidate, &self.limits).into_result()?;
        self.planner
            .execute(&ExecuteRequest {
                path: vec![segment],
            })
            .await
    }

    /// Drop the pending plan and zero the offset.
    pub fn reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.gate.lock().reset();
    }
}

/// Split a prediction vector into joints and gripper.
pub fn prediction_segment(prediction: &[f64]) -> std::result::Result<PathSegment, ArmError> {
    if prediction.len() < JOINT_COUNT {
        return Err(ArmError::DataShape {
            context: "prediction",
            expected: JOINT_COUNT + 1,
            actual: prediction.len(),
        });
    }
    Ok(PathSegment {
        positions: prediction[..JOINT_COUNT].to_vec(),
        gripper: prediction.get(JOINT_COUNT).copied(),
    })
}
