use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::property::{PropertyId, PropertyMovementId};
use crate::domain::workflow::{ApprovalStep, EntityType, TemplateId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResponseId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

/// Request-level status. Terminal statuses accept no further responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    InProgress,
    Approved,
    Rejected,
    Cancelled,
    Overridden,
    Expired,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Overridden => "overridden",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            "overridden" => Some(Self::Overridden),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Still accepting responses.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }

    /// Terminal outcomes that count as an approval for the governed entity.
    pub fn is_approved_outcome(&self) -> bool {
        matches!(self, Self::Approved | Self::Overridden)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Approved,
    Rejected,
    UnderReview,
    Skipped,
    Expired,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::UnderReview => "under_review",
            Self::Skipped => "skipped",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "under_review" => Some(Self::UnderReview),
            "skipped" => Some(Self::Skipped),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

/// Decision an actor submits against the current step. Skip is only legal on
/// steps marked not required.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
    Skip,
}

impl Decision {
    pub fn response_status(&self) -> ResponseStatus {
        match self {
            Self::Approve => ResponseStatus::Approved,
            Self::Reject => ResponseStatus::Rejected,
            Self::Skip => ResponseStatus::Skipped,
        }
    }
}

/// A live instance of a workflow template applied to one governed entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: RequestId,
    pub template_id: TemplateId,
    pub entity_type: EntityType,
    pub entity_id: PropertyMovementId,
    pub property_id: Option<PropertyId>,
    pub requested_by: UserId,
    pub current_step_order: u32,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One recorded decision against one step of one request. Immutable once
/// written; at most one per (request, step).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub id: ResponseId,
    pub request_id: RequestId,
    pub step_order: u32,
    pub responded_by: UserId,
    pub status: ResponseStatus,
    pub comments: Option<String>,
    pub is_override: bool,
    pub responded_at: DateTime<Utc>,
}

/// Read model for rendering progress: the request, the template's ordered
/// steps, and the response history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHistory {
    pub request: ApprovalRequest,
    pub template_name: String,
    pub steps: Vec<ApprovalStep>,
    pub responses: Vec<ApprovalResponse>,
}

impl RequestHistory {
    pub fn response_for(&self, step_order: u32) -> Option<&ApprovalResponse> {
        self.responses.iter().find(|response| response.step_order == step_order)
    }

    /// Whether any response in the chain was recorded as an override.
    pub fn override_used(&self) -> bool {
        self.responses.iter().any(|response| response.is_override)
    }
}
