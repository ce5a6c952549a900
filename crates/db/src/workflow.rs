use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, Transaction};
use thiserror::Error;
use uuid::Uuid;

use keyturn_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use keyturn_core::authorize::{authorize_step, StepActor, StepDenial};
use keyturn_core::domain::property::{
    MovementDetail, MovementStatus, PropertyId, PropertyMovementId,
};
use keyturn_core::domain::request::{
    ApprovalRequest, Decision, RequestHistory, RequestId, RequestStatus, UserId,
};
use keyturn_core::domain::workflow::{
    EntityType, RoleId, TemplateId, TemplateIntegrityError, WorkflowTemplate,
};
use keyturn_core::errors::DomainError;
use keyturn_core::lifecycle::{transition, RequestEvent, RequestProgress};
use keyturn_core::sync::{self, CustodianChange, EntityEffect};

use crate::repositories::property::row_to_movement;
use crate::repositories::request::row_to_request;
use crate::repositories::workflow::row_to_step;
use crate::repositories::{
    ApprovalRequestRepository, PendingApproval, RepositoryError, SqlApprovalRequestRepository,
    SqlWorkflowTemplateRepository, WorkflowTemplateRepository,
};
use crate::DbPool;

pub(crate) fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("no approval workflow configured for `{}`", entity_type.as_str())]
    NoActiveWorkflow { entity_type: EntityType },
    #[error("approval workflow `{template}` has no steps")]
    WorkflowHasNoSteps { template: String },
    #[error("property `{property_id}` is already in an approval process")]
    EntityAlreadyInApprovalProcess { property_id: String },
    #[error("invalid entity reference: {0}")]
    InvalidEntityReference(String),
    #[error("not authorized to respond: {reason}")]
    Unauthorized { reason: String },
    #[error("comments are required when rejecting")]
    CommentsRequiredForRejection,
    #[error("step {step_order} is required and cannot be skipped")]
    StepNotSkippable { step_order: u32 },
    #[error("request `{request_id}` is no longer pending (status `{status}`)")]
    RequestNotPending { request_id: String, status: String },
    #[error("step {step_order} of request `{request_id}` was already answered")]
    StepAlreadyAnswered { request_id: String, step_order: u32 },
    #[error("request `{request_id}` cannot be cancelled (status `{status}`)")]
    RequestNotCancellable { request_id: String, status: String },
    #[error("request `{request_id}` was not found")]
    RequestNotFound { request_id: String },
    #[error("movement `{movement_id}` was not found")]
    MovementNotFound { movement_id: String },
    #[error("movement `{movement_id}` is not ready for completion (status `{status}`)")]
    MovementNotCompletable { movement_id: String, status: String },
    #[error("step {step_order} is missing from workflow template `{template_id}`")]
    MissingStepDefinition { template_id: String, step_order: u32 },
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<sqlx::Error> for WorkflowError {
    fn from(error: sqlx::Error) -> Self {
        Self::Repository(RepositoryError::Database(error))
    }
}

impl WorkflowError {
    /// Stable machine-readable discriminator for callers that branch on the
    /// error class rather than the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoActiveWorkflow { .. } => "no_active_workflow",
            Self::WorkflowHasNoSteps { .. } => "workflow_has_no_steps",
            Self::EntityAlreadyInApprovalProcess { .. } => "entity_already_in_approval_process",
            Self::InvalidEntityReference(_) => "invalid_entity_reference",
            Self::Unauthorized { .. } => "unauthorized",
            Self::CommentsRequiredForRejection => "comments_required_for_rejection",
            Self::StepNotSkippable { .. } => "step_not_skippable",
            Self::RequestNotPending { .. } => "request_not_pending",
            Self::StepAlreadyAnswered { .. } => "step_already_answered",
            Self::RequestNotCancellable { .. } => "request_not_cancellable",
            Self::RequestNotFound { .. } => "request_not_found",
            Self::MovementNotFound { .. } => "movement_not_found",
            Self::MovementNotCompletable { .. } => "movement_not_completable",
            Self::MissingStepDefinition { .. } => "missing_step_definition",
            Self::Domain(_) => "domain_violation",
            Self::Repository(_) => "persistence_failure",
        }
    }

    /// Actionable text for the person who triggered the operation.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NoActiveWorkflow { .. } => {
                "No approval workflow is configured for this transaction type. \
                 Contact your administrator."
            }
            Self::WorkflowHasNoSteps { .. } | Self::MissingStepDefinition { .. } => {
                "The approval workflow configuration is incomplete. Contact your administrator."
            }
            Self::EntityAlreadyInApprovalProcess { .. } => {
                "This property already has an approval in progress. \
                 Refresh to see its current status."
            }
            Self::InvalidEntityReference(_) => {
                "A referenced record no longer exists. Check inputs and try again."
            }
            Self::Unauthorized { .. } => "You are not authorized to act on this approval step.",
            Self::CommentsRequiredForRejection => {
                "Comments are required when rejecting an approval."
            }
            Self::StepNotSkippable { .. } => "This step is required and cannot be skipped.",
            Self::RequestNotPending { .. } | Self::StepAlreadyAnswered { .. } => {
                "This request was already handled. Refresh to see the latest progress."
            }
            Self::RequestNotCancellable { .. } => "This request can no longer be cancelled.",
            Self::RequestNotFound { .. } | Self::MovementNotFound { .. } => {
                "The requested record was not found."
            }
            Self::MovementNotCompletable { .. } => {
                "This movement is not approved yet and cannot be completed."
            }
            Self::Domain(_) => "The request could not be processed. Check inputs and try again.",
            Self::Repository(_) => "The service is temporarily unavailable. Please retry shortly.",
        }
    }
}

/// Input for opening a movement transaction under approval.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    pub property_id: PropertyId,
    pub detail: MovementDetail,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementCreated {
    pub movement_id: PropertyMovementId,
    pub request_id: RequestId,
    /// Role required by the first step, surfaced for display only.
    pub next_approver_role: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRecorded {
    pub request_id: RequestId,
    pub step_order: u32,
    pub new_status: RequestStatus,
    pub is_override: bool,
    pub next_approver_role: Option<String>,
}

/// The workflow core's public boundary. Every mutating operation runs as one
/// transaction covering the request, the governed entity, and the movement
/// ledger, so the two state machines can never be persisted out of sync.
pub struct WorkflowService<S> {
    pool: DbPool,
    audit: S,
}

impl<S> WorkflowService<S>
where
    S: AuditSink,
{
    pub fn new(pool: DbPool, audit: S) -> Self {
        Self { pool, audit }
    }

    /// Create a movement transaction together with its approval request.
    ///
    /// The movement row, the request, the property status change, and the
    /// opening ledger record are written in one transaction; if any part
    /// fails nothing is persisted.
    pub async fn create_with_approval(
        &self,
        movement: NewMovement,
        requested_by: &UserId,
        correlation_id: &str,
    ) -> Result<MovementCreated, WorkflowError> {
        let entity_type = movement.detail.entity_type();

        let templates = SqlWorkflowTemplateRepository::new(self.pool.clone());
        let template = templates
            .find_active_by_entity_type(entity_type)
            .await?
            .ok_or(WorkflowError::NoActiveWorkflow { entity_type })?;
        template.validate_steps().map_err(|error| match error {
            TemplateIntegrityError::NoSteps { template } => {
                WorkflowError::WorkflowHasNoSteps { template }
            }
            other => WorkflowError::Domain(DomainError::from(other)),
        })?;
        let next_approver_role = template
            .first_step()
            .map(|step| step.role_name.clone())
            .unwrap_or_default();

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let property_exists: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM property WHERE id = ?)")
                .bind(&movement.property_id.0)
                .fetch_one(&mut *tx)
                .await?;
        if property_exists == 0 {
            return Err(WorkflowError::InvalidEntityReference(format!(
                "property `{}` does not exist",
                movement.property_id.0
            )));
        }

        // Check-then-insert under the same transaction as the insert itself;
        // the partial unique index on open movements backs this up.
        let open_movements: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM property_movement
             WHERE property_id = ? AND status IN ('pending', 'under_review', 'approved')",
        )
        .bind(&movement.property_id.0)
        .fetch_one(&mut *tx)
        .await?;
        if open_movements > 0 {
            return Err(WorkflowError::EntityAlreadyInApprovalProcess {
                property_id: movement.property_id.0.clone(),
            });
        }

        let opened = sync::on_request_opened();
        let movement_id = PropertyMovementId(Uuid::new_v4().to_string());
        let request_id = RequestId(Uuid::new_v4().to_string());

        let detail_json = serde_json::to_string(&movement.detail)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        sqlx::query(
            "INSERT INTO property_movement
                 (id, kind, property_id, status, requested_by, detail_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&movement_id.0)
        .bind(entity_type.as_str())
        .bind(&movement.property_id.0)
        .bind(opened.movement_status.as_str())
        .bind(&requested_by.0)
        .bind(&detail_json)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO approval_request
                 (id, template_id, entity_type, entity_id, property_id, requested_by,
                  current_step_order, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, ?)",
        )
        .bind(&request_id.0)
        .bind(&template.id.0)
        .bind(entity_type.as_str())
        .bind(&movement_id.0)
        .bind(&movement.property_id.0)
        .bind(&requested_by.0)
        .bind(RequestStatus::Pending.as_str())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE property SET status = ?, updated_at = ? WHERE id = ?")
            .bind(opened.property_status.as_str())
            .bind(now.to_rfc3339())
            .bind(&movement.property_id.0)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO movement_record
                 (id, property_id, movement_id, request_id, note, opened_at, closed_at)
             VALUES (?, ?, ?, ?, ?, ?, NULL)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&movement.property_id.0)
        .bind(&movement_id.0)
        .bind(&request_id.0)
        .bind(format!("approval requested for {}", entity_type.as_str()))
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let context = AuditContext::new(
            Some(request_id.clone()),
            Some(entity_type),
            Some(movement_id.0.clone()),
            correlation_id,
            requested_by.0.clone(),
        );
        self.audit.emit(
            AuditEvent::new(&context, "request.created", AuditCategory::Workflow, AuditOutcome::Success)
                .with_metadata("template", template.name.clone())
                .with_metadata("next_approver_role", next_approver_role.clone()),
        );

        Ok(MovementCreated { movement_id, request_id, next_approver_role })
    }

    /// Record one actor's decision against the current step and advance or
    /// terminate the request.
    pub async fn respond(
        &self,
        request_id: &RequestId,
        actor: &StepActor,
        decision: Decision,
        comments: Option<String>,
        correlation_id: &str,
    ) -> Result<ResponseRecorded, WorkflowError> {
        let mut tx = self.pool.begin().await?;

        let request = fetch_request(&mut tx, request_id)
            .await?
            .ok_or_else(|| WorkflowError::RequestNotFound { request_id: request_id.0.clone() })?;
        if !request.status.is_open() {
            return Err(WorkflowError::RequestNotPending {
                request_id: request.id.0.clone(),
                status: request.status.as_str().to_string(),
            });
        }

        let template = fetch_template(&mut tx, &request.template_id).await?.ok_or_else(|| {
            WorkflowError::Domain(DomainError::InvariantViolation(format!(
                "request `{}` references missing template `{}`",
                request.id.0, request.template_id.0
            )))
        })?;

        // A dangling step pointer is a configuration fault, never skipped over.
        let step = template.step_at(request.current_step_order).ok_or_else(|| {
            WorkflowError::MissingStepDefinition {
                template_id: template.id.0.clone(),
                step_order: request.current_step_order,
            }
        })?;

        let authorization = authorize_step(&request.status, step, actor);
        if !authorization.allowed {
            let context = self.request_context(&request, correlation_id, &actor.user_id.0);
            self.audit.emit(
                AuditEvent::new(
                    &context,
                    "request.response_denied",
                    AuditCategory::Authorization,
                    AuditOutcome::Rejected,
                )
                .with_metadata("reason", authorization.reason.clone()),
            );
            return Err(match authorization.denial {
                Some(StepDenial::RequestNotOpen { status }) => WorkflowError::RequestNotPending {
                    request_id: request.id.0.clone(),
                    status: status.as_str().to_string(),
                },
                _ => WorkflowError::Unauthorized { reason: authorization.reason },
            });
        }

        let trimmed_comments = comments.map(|text| text.trim().to_string()).filter(|text| !text.is_empty());
        match decision {
            Decision::Reject if trimmed_comments.is_none() => {
                return Err(WorkflowError::CommentsRequiredForRejection);
            }
            Decision::Skip if step.is_required => {
                return Err(WorkflowError::StepNotSkippable { step_order: step.step_order });
            }
            _ => {}
        }

        let prior_override: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM approval_response WHERE request_id = ? AND is_override = 1)",
        )
        .bind(&request.id.0)
        .fetch_one(&mut *tx)
        .await?;

        let progress = RequestProgress {
            current_step_order: request.current_step_order,
            step_count: template.step_count(),
            override_used: prior_override != 0 || authorization.is_override,
        };
        let event = match decision {
            Decision::Approve => RequestEvent::StepApproved,
            Decision::Skip => RequestEvent::StepSkipped,
            Decision::Reject => RequestEvent::StepRejected,
        };
        let outcome = transition(&request.status, &event, &progress).map_err(DomainError::from)?;

        let now = Utc::now();

        // One immutable response per (request, step); the unique index turns
        // a racing duplicate into a typed conflict.
        let inserted = sqlx::query(
            "INSERT INTO approval_response
                 (id, request_id, step_order, responded_by, status, comments, is_override, responded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&request.id.0)
        .bind(i64::from(request.current_step_order))
        .bind(&actor.user_id.0)
        .bind(decision.response_status().as_str())
        .bind(trimmed_comments.as_deref())
        .bind(i64::from(authorization.is_override))
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await;
        if let Err(error) = inserted {
            if is_unique_violation(&error) {
                return Err(WorkflowError::StepAlreadyAnswered {
                    request_id: request.id.0.clone(),
                    step_order: request.current_step_order,
                });
            }
            return Err(error.into());
        }

        // Compare-and-swap on (current_step_order, status); of two racing
        // responses to the same step exactly one lands here with one row.
        let updated = sqlx::query(
            "UPDATE approval_request
             SET current_step_order = ?, status = ?, updated_at = ?
             WHERE id = ? AND current_step_order = ? AND status = ?",
        )
        .bind(i64::from(outcome.next_step_order))
        .bind(outcome.to.as_str())
        .bind(now.to_rfc3339())
        .bind(&request.id.0)
        .bind(i64::from(request.current_step_order))
        .bind(request.status.as_str())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() != 1 {
            return Err(WorkflowError::StepAlreadyAnswered {
                request_id: request.id.0.clone(),
                step_order: request.current_step_order,
            });
        }

        if let Some(effect) = sync::on_request_outcome(&outcome.to) {
            apply_entity_effect(&mut tx, &request, &effect, now).await?;
        }

        tx.commit().await?;

        let event_type = match decision {
            Decision::Approve => "request.step_approved",
            Decision::Reject => "request.step_rejected",
            Decision::Skip => "request.step_skipped",
        };
        let context = self.request_context(&request, correlation_id, &actor.user_id.0);
        self.audit.emit(
            AuditEvent::new(&context, event_type, AuditCategory::Workflow, AuditOutcome::Success)
                .with_metadata("step_order", request.current_step_order.to_string())
                .with_metadata("new_status", outcome.to.as_str())
                .with_metadata("is_override", authorization.is_override.to_string()),
        );

        let next_approver_role = if outcome.to == RequestStatus::InProgress {
            template.step_at(outcome.next_step_order).map(|next| next.role_name.clone())
        } else {
            None
        };

        Ok(ResponseRecorded {
            request_id: request.id,
            step_order: request.current_step_order,
            new_status: outcome.to,
            is_override: authorization.is_override,
            next_approver_role,
        })
    }

    /// Cancel an open request and revert the governed entity.
    pub async fn cancel(
        &self,
        request_id: &RequestId,
        actor: &UserId,
        correlation_id: &str,
    ) -> Result<RequestStatus, WorkflowError> {
        let mut tx = self.pool.begin().await?;

        let request = fetch_request(&mut tx, request_id)
            .await?
            .ok_or_else(|| WorkflowError::RequestNotFound { request_id: request_id.0.clone() })?;
        if !request.status.is_open() {
            return Err(WorkflowError::RequestNotCancellable {
                request_id: request.id.0.clone(),
                status: request.status.as_str().to_string(),
            });
        }

        let step_count = fetch_step_count(&mut tx, &request.template_id).await?;
        let progress = RequestProgress {
            current_step_order: request.current_step_order,
            step_count,
            override_used: false,
        };
        let outcome = transition(&request.status, &RequestEvent::CancelRequested, &progress)
            .map_err(DomainError::from)?;

        let now = Utc::now();
        let updated = sqlx::query(
            "UPDATE approval_request
             SET status = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(outcome.to.as_str())
        .bind(now.to_rfc3339())
        .bind(&request.id.0)
        .bind(request.status.as_str())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() != 1 {
            return Err(WorkflowError::RequestNotCancellable {
                request_id: request.id.0.clone(),
                status: request.status.as_str().to_string(),
            });
        }

        if let Some(effect) = sync::on_request_outcome(&outcome.to) {
            apply_entity_effect(&mut tx, &request, &effect, now).await?;
        }

        tx.commit().await?;

        let context = self.request_context(&request, correlation_id, &actor.0);
        self.audit.emit(AuditEvent::new(
            &context,
            "request.cancelled",
            AuditCategory::Workflow,
            AuditOutcome::Success,
        ));

        Ok(outcome.to)
    }

    /// Expire open requests created before the cutoff. This is the external
    /// time-based trigger contract; the clock lives with the caller, never in
    /// the core. Returns how many requests were expired.
    pub async fn expire_stale(
        &self,
        cutoff: DateTime<Utc>,
        correlation_id: &str,
    ) -> Result<u32, WorkflowError> {
        let stale_ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM approval_request
             WHERE status IN ('pending', 'in_progress') AND created_at < ?
             ORDER BY created_at ASC",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        let mut expired = 0;
        for id in stale_ids {
            if self.expire_one(&RequestId(id), correlation_id).await? {
                expired += 1;
            }
        }

        Ok(expired)
    }

    async fn expire_one(
        &self,
        request_id: &RequestId,
        correlation_id: &str,
    ) -> Result<bool, WorkflowError> {
        let mut tx = self.pool.begin().await?;

        let Some(request) = fetch_request(&mut tx, request_id).await? else {
            return Ok(false);
        };
        if !request.status.is_open() {
            return Ok(false);
        }

        let step_count = fetch_step_count(&mut tx, &request.template_id).await?;
        let progress = RequestProgress {
            current_step_order: request.current_step_order,
            step_count,
            override_used: false,
        };
        let outcome = transition(&request.status, &RequestEvent::RequestExpired, &progress)
            .map_err(DomainError::from)?;

        let now = Utc::now();
        let updated = sqlx::query(
            "UPDATE approval_request
             SET status = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(outcome.to.as_str())
        .bind(now.to_rfc3339())
        .bind(&request.id.0)
        .bind(request.status.as_str())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() != 1 {
            // A response or cancellation won the race; nothing to expire.
            return Ok(false);
        }

        if let Some(effect) = sync::on_request_outcome(&outcome.to) {
            apply_entity_effect(&mut tx, &request, &effect, now).await?;
        }

        tx.commit().await?;

        let context = self.request_context(&request, correlation_id, "system");
        self.audit.emit(AuditEvent::new(
            &context,
            "request.expired",
            AuditCategory::Workflow,
            AuditOutcome::Success,
        ));

        Ok(true)
    }

    /// Entity-specific completion of an approved movement: the property takes
    /// its final status and custodian per movement kind.
    pub async fn complete(
        &self,
        movement_id: &PropertyMovementId,
        actor: &UserId,
        correlation_id: &str,
    ) -> Result<MovementStatus, WorkflowError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT id, kind, property_id, status, requested_by, detail_json, created_at, updated_at
             FROM property_movement WHERE id = ?",
        )
        .bind(&movement_id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let movement = row
            .as_ref()
            .map(row_to_movement)
            .transpose()?
            .ok_or_else(|| WorkflowError::MovementNotFound { movement_id: movement_id.0.clone() })?;

        if movement.status != MovementStatus::Approved {
            return Err(WorkflowError::MovementNotCompletable {
                movement_id: movement.id.0.clone(),
                status: movement.status.as_str().to_string(),
            });
        }

        let now = Utc::now();
        let updated = sqlx::query(
            "UPDATE property_movement
             SET status = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(MovementStatus::Completed.as_str())
        .bind(now.to_rfc3339())
        .bind(&movement.id.0)
        .bind(MovementStatus::Approved.as_str())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() != 1 {
            return Err(WorkflowError::MovementNotCompletable {
                movement_id: movement.id.0.clone(),
                status: movement.status.as_str().to_string(),
            });
        }

        let completion = sync::on_completion(&movement.detail);
        match &completion.custodian {
            CustodianChange::Keep => {
                sqlx::query("UPDATE property SET status = ?, updated_at = ? WHERE id = ?")
                    .bind(completion.property_status.as_str())
                    .bind(now.to_rfc3339())
                    .bind(&movement.property_id.0)
                    .execute(&mut *tx)
                    .await?;
            }
            CustodianChange::Assign { user_id } => {
                sqlx::query(
                    "UPDATE property SET status = ?, custodian = ?, updated_at = ? WHERE id = ?",
                )
                .bind(completion.property_status.as_str())
                .bind(&user_id.0)
                .bind(now.to_rfc3339())
                .bind(&movement.property_id.0)
                .execute(&mut *tx)
                .await?;
            }
            CustodianChange::Clear => {
                sqlx::query(
                    "UPDATE property SET status = ?, custodian = NULL, updated_at = ? WHERE id = ?",
                )
                .bind(completion.property_status.as_str())
                .bind(now.to_rfc3339())
                .bind(&movement.property_id.0)
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query(
            "UPDATE movement_record SET closed_at = ? WHERE movement_id = ? AND closed_at IS NULL",
        )
        .bind(now.to_rfc3339())
        .bind(&movement.id.0)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let context = AuditContext::new(
            None,
            Some(movement.detail.entity_type()),
            Some(movement.id.0.clone()),
            correlation_id,
            actor.0.clone(),
        );
        self.audit.emit(AuditEvent::new(
            &context,
            "movement.completed",
            AuditCategory::Movement,
            AuditOutcome::Success,
        ));

        Ok(MovementStatus::Completed)
    }

    /// Read model: request with its ordered step progress and responses.
    pub async fn request_with_history(
        &self,
        request_id: &RequestId,
    ) -> Result<RequestHistory, WorkflowError> {
        let requests = SqlApprovalRequestRepository::new(self.pool.clone());
        requests
            .history(request_id)
            .await?
            .ok_or_else(|| WorkflowError::RequestNotFound { request_id: request_id.0.clone() })
    }

    /// Read model: the approver work queue for one role.
    pub async fn pending_for_role(
        &self,
        role_id: &RoleId,
        limit: u32,
    ) -> Result<Vec<PendingApproval>, WorkflowError> {
        let requests = SqlApprovalRequestRepository::new(self.pool.clone());
        Ok(requests.pending_for_role(role_id, limit).await?)
    }

    fn request_context(
        &self,
        request: &ApprovalRequest,
        correlation_id: &str,
        actor: &str,
    ) -> AuditContext {
        AuditContext::new(
            Some(request.id.clone()),
            Some(request.entity_type),
            Some(request.entity_id.0.clone()),
            correlation_id,
            actor,
        )
    }
}

async fn fetch_request(
    tx: &mut Transaction<'_, Sqlite>,
    id: &RequestId,
) -> Result<Option<ApprovalRequest>, RepositoryError> {
    let row = sqlx::query(
        "SELECT id, template_id, entity_type, entity_id, property_id, requested_by,
                current_step_order, status, created_at, updated_at
         FROM approval_request WHERE id = ?",
    )
    .bind(&id.0)
    .fetch_optional(&mut **tx)
    .await?;

    row.as_ref().map(row_to_request).transpose()
}

async fn fetch_template(
    tx: &mut Transaction<'_, Sqlite>,
    id: &TemplateId,
) -> Result<Option<WorkflowTemplate>, RepositoryError> {
    let row = sqlx::query(
        "SELECT id, name, description, entity_type, is_active, created_at, updated_at
         FROM workflow_template WHERE id = ?",
    )
    .bind(&id.0)
    .fetch_optional(&mut **tx)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };

    use sqlx::Row;
    let decode = |error: sqlx::Error| RepositoryError::Decode(error.to_string());
    let template_id: String = row.try_get("id").map_err(decode)?;
    let entity_type_raw: String = row.try_get("entity_type").map_err(decode)?;
    let entity_type = EntityType::parse(&entity_type_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown entity type `{entity_type_raw}`")))?;
    let name: String = row.try_get("name").map_err(decode)?;
    let description: String = row.try_get("description").map_err(decode)?;
    let is_active = row.try_get::<i64, _>("is_active").map_err(decode)? != 0;
    let created_at = parse_timestamp(&row.try_get::<String, _>("created_at").map_err(decode)?);
    let updated_at = parse_timestamp(&row.try_get::<String, _>("updated_at").map_err(decode)?);

    let step_rows = sqlx::query(
        "SELECT s.step_order, s.step_name, s.role_id, r.name AS role_name,
                s.is_required, s.can_override, s.override_min_level
         FROM approval_step s
         JOIN role r ON r.id = s.role_id
         WHERE s.template_id = ?
         ORDER BY s.step_order ASC",
    )
    .bind(&template_id)
    .fetch_all(&mut **tx)
    .await?;
    let steps = step_rows.iter().map(row_to_step).collect::<Result<Vec<_>, _>>()?;

    Ok(Some(WorkflowTemplate {
        id: TemplateId(template_id),
        name,
        description,
        entity_type,
        is_active,
        steps,
        created_at,
        updated_at,
    }))
}

async fn fetch_step_count(
    tx: &mut Transaction<'_, Sqlite>,
    template_id: &TemplateId,
) -> Result<u32, RepositoryError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM approval_step WHERE template_id = ?")
        .bind(&template_id.0)
        .fetch_one(&mut **tx)
        .await?;
    Ok(count as u32)
}

/// Mirror a terminal request outcome onto the movement, the property, and the
/// ledger, inside the caller's transaction.
async fn apply_entity_effect(
    tx: &mut Transaction<'_, Sqlite>,
    request: &ApprovalRequest,
    effect: &EntityEffect,
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    sqlx::query("UPDATE property_movement SET status = ?, updated_at = ? WHERE id = ?")
        .bind(effect.movement_status.as_str())
        .bind(now.to_rfc3339())
        .bind(&request.entity_id.0)
        .execute(&mut **tx)
        .await?;

    if let Some(property_id) = &request.property_id {
        sqlx::query("UPDATE property SET status = ?, updated_at = ? WHERE id = ?")
            .bind(effect.property_status.as_str())
            .bind(now.to_rfc3339())
            .bind(&property_id.0)
            .execute(&mut **tx)
            .await?;
    }

    if effect.close_movement_record {
        sqlx::query(
            "UPDATE movement_record SET closed_at = ? WHERE movement_id = ? AND closed_at IS NULL",
        )
        .bind(now.to_rfc3339())
        .bind(&request.entity_id.0)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}
