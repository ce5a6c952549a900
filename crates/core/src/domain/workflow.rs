use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleId(pub String);

/// Kind of business transaction a workflow template governs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    PropertyRelease,
    PropertyTurnover,
    PropertyReturn,
    RptPayment,
    DocumentApproval,
    UserAssignment,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PropertyRelease => "property_release",
            Self::PropertyTurnover => "property_turnover",
            Self::PropertyReturn => "property_return",
            Self::RptPayment => "rpt_payment",
            Self::DocumentApproval => "document_approval",
            Self::UserAssignment => "user_assignment",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "property_release" => Some(Self::PropertyRelease),
            "property_turnover" => Some(Self::PropertyTurnover),
            "property_return" => Some(Self::PropertyReturn),
            "rpt_payment" => Some(Self::RptPayment),
            "document_approval" => Some(Self::DocumentApproval),
            "user_assignment" => Some(Self::UserAssignment),
            _ => None,
        }
    }

    pub fn is_property_movement(&self) -> bool {
        matches!(self, Self::PropertyRelease | Self::PropertyTurnover | Self::PropertyReturn)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub level: u8,
    pub is_administrator: bool,
}

/// One position in a workflow template requiring sign-off from a role.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub step_order: u32,
    pub step_name: String,
    pub role_id: RoleId,
    pub role_name: String,
    pub is_required: bool,
    pub can_override: bool,
    pub override_min_level: Option<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: TemplateId,
    pub name: String,
    pub description: String,
    pub entity_type: EntityType,
    pub is_active: bool,
    pub steps: Vec<ApprovalStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TemplateIntegrityError {
    #[error("workflow template `{template}` has no steps")]
    NoSteps { template: String },
    #[error("workflow template `{template}` has duplicate step order {step_order}")]
    DuplicateStepOrder { template: String, step_order: u32 },
    #[error("workflow template `{template}` step orders are not contiguous: expected {expected}, found {found}")]
    NonContiguousStepOrder { template: String, expected: u32, found: u32 },
    #[error("workflow template `{template}` step {step_order} permits override without a minimum level")]
    MissingOverrideLevel { template: String, step_order: u32 },
}

impl WorkflowTemplate {
    pub fn step_count(&self) -> u32 {
        self.steps.len() as u32
    }

    /// Step at a given 1-based order, if it exists in this template.
    pub fn step_at(&self, step_order: u32) -> Option<&ApprovalStep> {
        self.steps.iter().find(|step| step.step_order == step_order)
    }

    pub fn first_step(&self) -> Option<&ApprovalStep> {
        self.step_at(1)
    }

    pub fn is_final_step(&self, step_order: u32) -> bool {
        step_order == self.step_count()
    }

    /// Verify the step-order invariant: orders sorted ascending form exactly
    /// the sequence 1..=N with no gaps or duplicates, N >= 1, and every
    /// overridable step carries a minimum level.
    pub fn validate_steps(&self) -> Result<(), TemplateIntegrityError> {
        if self.steps.is_empty() {
            return Err(TemplateIntegrityError::NoSteps { template: self.name.clone() });
        }

        let mut orders: Vec<u32> = self.steps.iter().map(|step| step.step_order).collect();
        orders.sort_unstable();

        let mut expected = 1;
        for window in orders.windows(2) {
            if window[0] == window[1] {
                return Err(TemplateIntegrityError::DuplicateStepOrder {
                    template: self.name.clone(),
                    step_order: window[0],
                });
            }
        }
        for order in &orders {
            if *order != expected {
                return Err(TemplateIntegrityError::NonContiguousStepOrder {
                    template: self.name.clone(),
                    expected,
                    found: *order,
                });
            }
            expected += 1;
        }

        for step in &self.steps {
            if step.can_override && step.override_min_level.is_none() {
                return Err(TemplateIntegrityError::MissingOverrideLevel {
                    template: self.name.clone(),
                    step_order: step.step_order,
                });
            }
        }

        Ok(())
    }
}

/// Recompute step orders to a dense 1..N sequence, preserving the relative
/// order of the incoming steps. Applied on every administrative write so the
/// contiguity invariant survives adds, removals, and reorders.
pub fn normalize_step_orders(steps: &mut [ApprovalStep]) {
    steps.sort_by_key(|step| step.step_order);
    for (index, step) in steps.iter_mut().enumerate() {
        step.step_order = index as u32 + 1;
    }
}
