use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use keyturn_core::domain::property::{
    BusinessUnitId, MovementDetail, MovementRecord, MovementStatus, Property, PropertyId,
    PropertyMovement, PropertyMovementId, PropertyStatus,
};
use keyturn_core::domain::request::{RequestId, UserId};

use super::{PropertyRepository, RepositoryError};
use crate::workflow::parse_timestamp;
use crate::DbPool;

pub struct SqlPropertyRepository {
    pool: DbPool,
}

impl SqlPropertyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

pub(crate) fn row_to_property(row: &SqliteRow) -> Result<Property, RepositoryError> {
    let status_raw: String = row.try_get("status").map_err(decode)?;
    let status = PropertyStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown property status `{status_raw}`")))?;

    let acquisition_cost = row
        .try_get::<Option<String>, _>("acquisition_cost")
        .map_err(decode)?
        .map(|raw| {
            raw.parse::<Decimal>().map_err(|error| {
                RepositoryError::Decode(format!("invalid acquisition cost `{raw}`: {error}"))
            })
        })
        .transpose()?;

    Ok(Property {
        id: PropertyId(row.try_get("id").map_err(decode)?),
        tag_number: row.try_get("tag_number").map_err(decode)?,
        description: row.try_get("description").map_err(decode)?,
        status,
        business_unit_id: BusinessUnitId(row.try_get("business_unit_id").map_err(decode)?),
        custodian: row.try_get::<Option<String>, _>("custodian").map_err(decode)?.map(UserId),
        acquisition_cost,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at").map_err(decode)?),
        updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at").map_err(decode)?),
    })
}

pub(crate) fn row_to_movement(row: &SqliteRow) -> Result<PropertyMovement, RepositoryError> {
    let status_raw: String = row.try_get("status").map_err(decode)?;
    let status = MovementStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown movement status `{status_raw}`")))?;

    let detail_raw: String = row.try_get("detail_json").map_err(decode)?;
    let detail: MovementDetail = serde_json::from_str(&detail_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid movement detail: {error}")))?;

    Ok(PropertyMovement {
        id: PropertyMovementId(row.try_get("id").map_err(decode)?),
        property_id: PropertyId(row.try_get("property_id").map_err(decode)?),
        status,
        requested_by: UserId(row.try_get("requested_by").map_err(decode)?),
        detail,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at").map_err(decode)?),
        updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at").map_err(decode)?),
    })
}

fn row_to_record(row: &SqliteRow) -> Result<MovementRecord, RepositoryError> {
    Ok(MovementRecord {
        id: row.try_get("id").map_err(decode)?,
        property_id: PropertyId(row.try_get("property_id").map_err(decode)?),
        movement_id: PropertyMovementId(row.try_get("movement_id").map_err(decode)?),
        request_id: row
            .try_get::<Option<String>, _>("request_id")
            .map_err(decode)?
            .map(RequestId),
        note: row.try_get("note").map_err(decode)?,
        opened_at: parse_timestamp(&row.try_get::<String, _>("opened_at").map_err(decode)?),
        closed_at: row
            .try_get::<Option<String>, _>("closed_at")
            .map_err(decode)?
            .map(|raw| parse_timestamp(&raw)),
    })
}

#[async_trait::async_trait]
impl PropertyRepository for SqlPropertyRepository {
    async fn find_by_id(&self, id: &PropertyId) -> Result<Option<Property>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, tag_number, description, status, business_unit_id, custodian,
                    acquisition_cost, created_at, updated_at
             FROM property WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_property).transpose()
    }

    async fn save(&self, property: Property) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO property
                 (id, tag_number, description, status, business_unit_id, custodian,
                  acquisition_cost, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 tag_number = excluded.tag_number,
                 description = excluded.description,
                 status = excluded.status,
                 business_unit_id = excluded.business_unit_id,
                 custodian = excluded.custodian,
                 acquisition_cost = excluded.acquisition_cost,
                 updated_at = excluded.updated_at",
        )
        .bind(&property.id.0)
        .bind(&property.tag_number)
        .bind(&property.description)
        .bind(property.status.as_str())
        .bind(&property.business_unit_id.0)
        .bind(property.custodian.as_ref().map(|user| user.0.as_str()))
        .bind(property.acquisition_cost.map(|cost| cost.to_string()))
        .bind(property.created_at.to_rfc3339())
        .bind(property.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_movement(
        &self,
        id: &PropertyMovementId,
    ) -> Result<Option<PropertyMovement>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, kind, property_id, status, requested_by, detail_json, created_at, updated_at
             FROM property_movement WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_movement).transpose()
    }

    async fn movement_records(
        &self,
        movement_id: &PropertyMovementId,
    ) -> Result<Vec<MovementRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, property_id, movement_id, request_id, note, opened_at, closed_at
             FROM movement_record
             WHERE movement_id = ?
             ORDER BY opened_at ASC",
        )
        .bind(&movement_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }
}
