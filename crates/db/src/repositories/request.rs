use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row};

use keyturn_core::domain::property::{PropertyId, PropertyMovementId};
use keyturn_core::domain::request::{
    ApprovalRequest, ApprovalResponse, RequestHistory, RequestId, RequestStatus, ResponseId,
    ResponseStatus, UserId,
};
use keyturn_core::domain::workflow::{EntityType, RoleId, TemplateId};

use super::workflow::row_to_step;
use super::{ApprovalRequestRepository, RepositoryError};
use crate::workflow::parse_timestamp;
use crate::DbPool;

/// One row of an approver's work queue: an open request whose current step
/// requires the given role.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub request_id: RequestId,
    pub entity_type: EntityType,
    pub property_id: Option<PropertyId>,
    pub step_order: u32,
    pub step_name: String,
    pub requested_by: UserId,
    pub created_at: DateTime<Utc>,
}

pub struct SqlApprovalRequestRepository {
    pool: DbPool,
}

impl SqlApprovalRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

pub(crate) fn row_to_request(row: &SqliteRow) -> Result<ApprovalRequest, RepositoryError> {
    let entity_type_raw: String = row.try_get("entity_type").map_err(decode)?;
    let entity_type = EntityType::parse(&entity_type_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown entity type `{entity_type_raw}`")))?;

    let status_raw: String = row.try_get("status").map_err(decode)?;
    let status = RequestStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown request status `{status_raw}`")))?;

    Ok(ApprovalRequest {
        id: RequestId(row.try_get("id").map_err(decode)?),
        template_id: TemplateId(row.try_get("template_id").map_err(decode)?),
        entity_type,
        entity_id: PropertyMovementId(row.try_get("entity_id").map_err(decode)?),
        property_id: row
            .try_get::<Option<String>, _>("property_id")
            .map_err(decode)?
            .map(PropertyId),
        requested_by: UserId(row.try_get("requested_by").map_err(decode)?),
        current_step_order: row.try_get::<i64, _>("current_step_order").map_err(decode)? as u32,
        status,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at").map_err(decode)?),
        updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at").map_err(decode)?),
    })
}

pub(crate) fn row_to_response(row: &SqliteRow) -> Result<ApprovalResponse, RepositoryError> {
    let status_raw: String = row.try_get("status").map_err(decode)?;
    let status = ResponseStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown response status `{status_raw}`")))?;

    Ok(ApprovalResponse {
        id: ResponseId(row.try_get("id").map_err(decode)?),
        request_id: RequestId(row.try_get("request_id").map_err(decode)?),
        step_order: row.try_get::<i64, _>("step_order").map_err(decode)? as u32,
        responded_by: UserId(row.try_get("responded_by").map_err(decode)?),
        status,
        comments: row.try_get("comments").map_err(decode)?,
        is_override: row.try_get::<i64, _>("is_override").map_err(decode)? != 0,
        responded_at: parse_timestamp(&row.try_get::<String, _>("responded_at").map_err(decode)?),
    })
}

const REQUEST_COLUMNS: &str = "id, template_id, entity_type, entity_id, property_id, \
                               requested_by, current_step_order, status, created_at, updated_at";

#[async_trait::async_trait]
impl ApprovalRequestRepository for SqlApprovalRequestRepository {
    async fn find_by_id(&self, id: &RequestId) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM approval_request WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_request).transpose()
    }

    async fn history(&self, id: &RequestId) -> Result<Option<RequestHistory>, RepositoryError> {
        let Some(request) = self.find_by_id(id).await? else {
            return Ok(None);
        };

        let template_name: String =
            sqlx::query_scalar("SELECT name FROM workflow_template WHERE id = ?")
                .bind(&request.template_id.0)
                .fetch_one(&self.pool)
                .await?;

        let step_rows = sqlx::query(
            "SELECT s.step_order, s.step_name, s.role_id, r.name AS role_name,
                    s.is_required, s.can_override, s.override_min_level
             FROM approval_step s
             JOIN role r ON r.id = s.role_id
             WHERE s.template_id = ?
             ORDER BY s.step_order ASC",
        )
        .bind(&request.template_id.0)
        .fetch_all(&self.pool)
        .await?;
        let steps = step_rows.iter().map(row_to_step).collect::<Result<Vec<_>, _>>()?;

        let response_rows = sqlx::query(
            "SELECT id, request_id, step_order, responded_by, status, comments, is_override, responded_at
             FROM approval_response
             WHERE request_id = ?
             ORDER BY step_order ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;
        let responses = response_rows.iter().map(row_to_response).collect::<Result<Vec<_>, _>>()?;

        Ok(Some(RequestHistory { request, template_name, steps, responses }))
    }

    async fn pending_for_role(
        &self,
        role_id: &RoleId,
        limit: u32,
    ) -> Result<Vec<PendingApproval>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT q.id AS request_id, q.entity_type, q.property_id, q.current_step_order,
                    s.step_name, q.requested_by, q.created_at
             FROM approval_request q
             JOIN approval_step s
                  ON s.template_id = q.template_id AND s.step_order = q.current_step_order
             WHERE q.status IN ('pending', 'in_progress') AND s.role_id = ?
             ORDER BY q.created_at ASC
             LIMIT ?",
        )
        .bind(&role_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let entity_type_raw: String = row.try_get("entity_type").map_err(decode)?;
                let entity_type = EntityType::parse(&entity_type_raw).ok_or_else(|| {
                    RepositoryError::Decode(format!("unknown entity type `{entity_type_raw}`"))
                })?;

                Ok(PendingApproval {
                    request_id: RequestId(row.try_get("request_id").map_err(decode)?),
                    entity_type,
                    property_id: row
                        .try_get::<Option<String>, _>("property_id")
                        .map_err(decode)?
                        .map(PropertyId),
                    step_order: row.try_get::<i64, _>("current_step_order").map_err(decode)?
                        as u32,
                    step_name: row.try_get("step_name").map_err(decode)?,
                    requested_by: UserId(row.try_get("requested_by").map_err(decode)?),
                    created_at: parse_timestamp(
                        &row.try_get::<String, _>("created_at").map_err(decode)?,
                    ),
                })
            })
            .collect()
    }
}
