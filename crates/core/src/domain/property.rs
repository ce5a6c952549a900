use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::request::{RequestId, UserId};
use crate::domain::workflow::EntityType;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyMovementId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BusinessUnitId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessUnit {
    pub id: BusinessUnitId,
    pub code: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyStatus {
    Active,
    UnderReview,
    Released,
}

impl PropertyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::UnderReview => "under_review",
            Self::Released => "released",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "under_review" => Some(Self::UnderReview),
            "released" => Some(Self::Released),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub id: PropertyId,
    pub tag_number: String,
    pub description: String,
    pub status: PropertyStatus,
    pub business_unit_id: BusinessUnitId,
    pub custodian: Option<UserId>,
    pub acquisition_cost: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Transaction-level status of a movement. Distinct from, but driven by, the
/// bound approval request's status. A movement counts as open until it is
/// completed or reverted, which is what blocks a second approval process on
/// the same property.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementStatus {
    Pending,
    UnderReview,
    Approved,
    Completed,
    Rejected,
    Cancelled,
    Expired,
}

impl MovementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::UnderReview => "under_review",
            Self::Approved => "approved",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "under_review" => Some(Self::UnderReview),
            "approved" => Some(Self::Approved),
            "completed" => Some(Self::Completed),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::UnderReview | Self::Approved)
    }
}

/// Kind-specific payload of a movement transaction. The tag discriminates
/// which governed entity kind the movement is, one variant per entity kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MovementDetail {
    Release { recipient: String, destination: String, remarks: Option<String> },
    Turnover { incoming_custodian: UserId, remarks: Option<String> },
    Return { return_reason: String, condition: String, remarks: Option<String> },
}

impl MovementDetail {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Release { .. } => EntityType::PropertyRelease,
            Self::Turnover { .. } => EntityType::PropertyTurnover,
            Self::Return { .. } => EntityType::PropertyReturn,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyMovement {
    pub id: PropertyMovementId,
    pub property_id: PropertyId,
    pub status: MovementStatus,
    pub requested_by: UserId,
    pub detail: MovementDetail,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ledger row opened when an approval request is created for a movement and
/// closed out when the request reaches a terminal status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecord {
    pub id: String,
    pub property_id: PropertyId,
    pub movement_id: PropertyMovementId,
    pub request_id: Option<RequestId>,
    pub note: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::{MovementDetail, MovementStatus, PropertyStatus};
    use crate::domain::request::UserId;
    use crate::domain::workflow::EntityType;

    #[test]
    fn movement_status_round_trips_from_storage_encoding() {
        let cases = [
            MovementStatus::Pending,
            MovementStatus::UnderReview,
            MovementStatus::Approved,
            MovementStatus::Completed,
            MovementStatus::Rejected,
            MovementStatus::Cancelled,
            MovementStatus::Expired,
        ];

        for status in cases {
            assert_eq!(MovementStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn open_movements_block_a_second_approval_process() {
        assert!(MovementStatus::Pending.is_open());
        assert!(MovementStatus::UnderReview.is_open());
        assert!(MovementStatus::Approved.is_open());
        assert!(!MovementStatus::Completed.is_open());
        assert!(!MovementStatus::Rejected.is_open());
        assert!(!MovementStatus::Cancelled.is_open());
        assert!(!MovementStatus::Expired.is_open());
    }

    #[test]
    fn property_status_round_trips_from_storage_encoding() {
        for status in [PropertyStatus::Active, PropertyStatus::UnderReview, PropertyStatus::Released]
        {
            assert_eq!(PropertyStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn movement_detail_discriminates_entity_type() {
        let release = MovementDetail::Release {
            recipient: "Provincial Engineering Office".to_string(),
            destination: "Motor pool annex".to_string(),
            remarks: None,
        };
        let turnover = MovementDetail::Turnover {
            incoming_custodian: UserId("u-clerk".to_string()),
            remarks: None,
        };
        let ret = MovementDetail::Return {
            return_reason: "End of assignment".to_string(),
            condition: "Serviceable".to_string(),
            remarks: Some("minor scratches".to_string()),
        };

        assert_eq!(release.entity_type(), EntityType::PropertyRelease);
        assert_eq!(turnover.entity_type(), EntityType::PropertyTurnover);
        assert_eq!(ret.entity_type(), EntityType::PropertyReturn);
    }
}
