use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::request::RequestStatus;

/// Lifecycle events applied to an approval request. Step events are produced
/// by the response processor; cancel and expire arrive from callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestEvent {
    StepApproved,
    StepSkipped,
    StepRejected,
    CancelRequested,
    RequestExpired,
}

/// Snapshot of where the request stands when an event is applied.
/// `override_used` covers every response in the chain including the one
/// being recorded now.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestProgress {
    pub current_step_order: u32,
    pub step_count: u32,
    pub override_used: bool,
}

/// Follow-up work the caller must perform inside the same unit of work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// Mirror the request outcome onto the governed entity.
    SyncEntity,
    /// Close out the movement ledger row opened with the request.
    CloseMovement,
    /// Surface the next step's role to whoever delivers notifications.
    NotifyNextApprover,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTransition {
    pub from: RequestStatus,
    pub to: RequestStatus,
    pub event: RequestEvent,
    pub next_step_order: u32,
    pub actions: Vec<SyncAction>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RequestTransitionError {
    #[error("invalid transition from {status:?} using event {event:?}")]
    InvalidTransition { status: RequestStatus, event: RequestEvent },
    #[error("step pointer {current_step_order} is outside a template with {step_count} steps")]
    StepOutOfRange { current_step_order: u32, step_count: u32 },
}

/// Pure request-status transition. Persistence and entity synchronization are
/// the caller's concern; this function only decides the resulting status, the
/// next step pointer, and the actions owed.
///
/// Rejection at any step terminates the request immediately. A final-step
/// approval completes it as `Approved`, or as `Overridden` when any response
/// in the chain carried the override flag.
pub fn transition(
    current: &RequestStatus,
    event: &RequestEvent,
    progress: &RequestProgress,
) -> Result<RequestTransition, RequestTransitionError> {
    use RequestEvent::{CancelRequested, RequestExpired, StepApproved, StepRejected, StepSkipped};

    if !current.is_open() {
        return Err(RequestTransitionError::InvalidTransition { status: *current, event: *event });
    }

    let (to, next_step_order, actions) = match event {
        StepApproved | StepSkipped => {
            if progress.step_count == 0 || progress.current_step_order > progress.step_count {
                return Err(RequestTransitionError::StepOutOfRange {
                    current_step_order: progress.current_step_order,
                    step_count: progress.step_count,
                });
            }

            if progress.current_step_order == progress.step_count {
                let outcome = if progress.override_used {
                    RequestStatus::Overridden
                } else {
                    RequestStatus::Approved
                };
                (outcome, progress.step_count + 1, vec![SyncAction::SyncEntity, SyncAction::CloseMovement])
            } else {
                (
                    RequestStatus::InProgress,
                    progress.current_step_order + 1,
                    vec![SyncAction::NotifyNextApprover],
                )
            }
        }
        StepRejected => (
            RequestStatus::Rejected,
            progress.current_step_order,
            vec![SyncAction::SyncEntity, SyncAction::CloseMovement],
        ),
        CancelRequested => (
            RequestStatus::Cancelled,
            progress.current_step_order,
            vec![SyncAction::SyncEntity, SyncAction::CloseMovement],
        ),
        RequestExpired => (
            RequestStatus::Expired,
            progress.current_step_order,
            vec![SyncAction::SyncEntity, SyncAction::CloseMovement],
        ),
    };

    Ok(RequestTransition { from: *current, to, event: *event, next_step_order, actions })
}
