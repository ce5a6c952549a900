use serde::{Deserialize, Serialize};

use crate::domain::property::{MovementDetail, MovementStatus, PropertyStatus};
use crate::domain::request::{RequestStatus, UserId};

/// What the governed entity must become when a request transition lands.
/// Applied by the caller inside the same unit of work as the request update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityEffect {
    pub movement_status: MovementStatus,
    pub property_status: PropertyStatus,
    pub close_movement_record: bool,
}

/// Effect of opening an approval request on the governed entity: the
/// transaction and the property both enter review, and a movement ledger row
/// is opened (closing is the terminal transitions' job).
pub fn on_request_opened() -> EntityEffect {
    EntityEffect {
        movement_status: MovementStatus::UnderReview,
        property_status: PropertyStatus::UnderReview,
        close_movement_record: false,
    }
}

/// Effect of a terminal request outcome on the governed entity.
///
/// Approval (plain or overridden) promotes the transaction and leaves the
/// property in review until the entity-specific completion step. Every other
/// terminal outcome reverts the entity to its pre-request state and closes
/// the ledger row. Non-terminal statuses have no entity effect.
pub fn on_request_outcome(outcome: &RequestStatus) -> Option<EntityEffect> {
    match outcome {
        RequestStatus::Approved | RequestStatus::Overridden => Some(EntityEffect {
            movement_status: MovementStatus::Approved,
            property_status: PropertyStatus::UnderReview,
            close_movement_record: true,
        }),
        RequestStatus::Rejected => Some(revert(MovementStatus::Rejected)),
        RequestStatus::Cancelled => Some(revert(MovementStatus::Cancelled)),
        RequestStatus::Expired => Some(revert(MovementStatus::Expired)),
        RequestStatus::Pending | RequestStatus::InProgress => None,
    }
}

fn revert(movement_status: MovementStatus) -> EntityEffect {
    EntityEffect {
        movement_status,
        property_status: PropertyStatus::Active,
        close_movement_record: true,
    }
}

/// How completing an approved movement lands on the property itself. One
/// adapter arm per governed entity kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionEffect {
    pub property_status: PropertyStatus,
    pub custodian: CustodianChange,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CustodianChange {
    Keep,
    Assign { user_id: UserId },
    Clear,
}

pub fn on_completion(detail: &MovementDetail) -> CompletionEffect {
    match detail {
        MovementDetail::Release { .. } => CompletionEffect {
            property_status: PropertyStatus::Released,
            custodian: CustodianChange::Clear,
        },
        MovementDetail::Turnover { incoming_custodian, .. } => CompletionEffect {
            property_status: PropertyStatus::Active,
            custodian: CustodianChange::Assign { user_id: incoming_custodian.clone() },
        },
        MovementDetail::Return { .. } => CompletionEffect {
            property_status: PropertyStatus::Active,
            custodian: CustodianChange::Clear,
        },
    }
}
