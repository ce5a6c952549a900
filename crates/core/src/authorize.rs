use serde::{Deserialize, Serialize};

use crate::domain::request::{RequestStatus, UserId};
use crate::domain::workflow::{ApprovalStep, RoleId};

/// Resolved acting identity for one authorization check. Callers pass this
/// explicitly; the core never reads ambient session state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepActor {
    pub user_id: UserId,
    pub role_id: RoleId,
    pub role_name: String,
    pub role_level: u8,
    pub is_administrator: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepDenial {
    RequestNotOpen {
        status: RequestStatus,
    },
    RoleMismatch {
        acting_role: String,
        required_role: String,
    },
    OverrideNotPermitted {
        acting_role: String,
        step_name: String,
    },
    InsufficientOverrideLevel {
        acting_level: u8,
        required_level: u8,
    },
}

impl StepDenial {
    fn reason(&self) -> String {
        match self {
            Self::RequestNotOpen { status } => {
                format!("request is no longer pending (status `{}`)", status.as_str())
            }
            Self::RoleMismatch { acting_role, required_role } => {
                format!("role `{acting_role}` does not match required role `{required_role}`")
            }
            Self::OverrideNotPermitted { acting_role, step_name } => {
                format!("step `{step_name}` does not permit override by role `{acting_role}`")
            }
            Self::InsufficientOverrideLevel { acting_level, required_level } => {
                format!("role level {acting_level} is below the override threshold {required_level}")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepAuthorization {
    pub allowed: bool,
    pub is_override: bool,
    pub reason: String,
    pub denial: Option<StepDenial>,
}

impl StepAuthorization {
    fn allow(is_override: bool, reason: impl Into<String>) -> Self {
        Self { allowed: true, is_override, reason: reason.into(), denial: None }
    }

    fn deny(denial: StepDenial) -> Self {
        Self { allowed: false, is_override: false, reason: denial.reason(), denial: Some(denial) }
    }
}

/// The capability check gating every step response, implemented once and
/// reused by all entry points.
///
/// An actor may respond to the current step when the request is still open
/// and one of the following holds, checked in order:
/// - the actor's role is an administrator role (recorded as an override),
/// - the actor's role is exactly the step's required role,
/// - the step permits override and the actor's role level meets the step's
///   minimum (recorded as an override).
pub fn authorize_step(
    request_status: &RequestStatus,
    step: &ApprovalStep,
    actor: &StepActor,
) -> StepAuthorization {
    if !request_status.is_open() {
        return StepAuthorization::deny(StepDenial::RequestNotOpen { status: *request_status });
    }

    if actor.is_administrator {
        return StepAuthorization::allow(
            true,
            format!("administrator role `{}` overrides step `{}`", actor.role_name, step.step_name),
        );
    }

    if actor.role_id == step.role_id {
        return StepAuthorization::allow(
            false,
            format!("role `{}` matches step `{}`", actor.role_name, step.step_name),
        );
    }

    if !step.can_override {
        return StepAuthorization::deny(StepDenial::RoleMismatch {
            acting_role: actor.role_name.clone(),
            required_role: step.role_name.clone(),
        });
    }

    // Template writes guarantee a threshold on overridable steps; a missing
    // one is treated as not overridable.
    let Some(required_level) = step.override_min_level else {
        return StepAuthorization::deny(StepDenial::OverrideNotPermitted {
            acting_role: actor.role_name.clone(),
            step_name: step.step_name.clone(),
        });
    };

    if actor.role_level >= required_level {
        return StepAuthorization::allow(
            true,
            format!(
                "role `{}` (level {}) overrides step `{}` at threshold {}",
                actor.role_name, actor.role_level, step.step_name, required_level
            ),
        );
    }

    StepAuthorization::deny(StepDenial::InsufficientOverrideLevel {
        acting_level: actor.role_level,
        required_level,
    })
}
