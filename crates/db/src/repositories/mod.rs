use async_trait::async_trait;
use thiserror::Error;

use keyturn_core::domain::property::{
    MovementRecord, Property, PropertyId, PropertyMovement, PropertyMovementId,
};
use keyturn_core::domain::request::{ApprovalRequest, RequestHistory, RequestId};
use keyturn_core::domain::workflow::{EntityType, RoleId, TemplateId, WorkflowTemplate};

pub mod memory;
pub mod property;
pub mod request;
pub mod workflow;

pub use memory::InMemoryWorkflowTemplateRepository;
pub use property::SqlPropertyRepository;
pub use request::{PendingApproval, SqlApprovalRequestRepository};
pub use workflow::SqlWorkflowTemplateRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait WorkflowTemplateRepository: Send + Sync {
    async fn find_active_by_entity_type(
        &self,
        entity_type: EntityType,
    ) -> Result<Option<WorkflowTemplate>, RepositoryError>;

    async fn find_by_id(&self, id: &TemplateId)
        -> Result<Option<WorkflowTemplate>, RepositoryError>;

    /// Persist a template, renumbering its steps to a dense 1..N sequence and
    /// deactivating any other active template for the same entity type.
    /// Returns the template as stored.
    async fn save(&self, template: WorkflowTemplate)
        -> Result<WorkflowTemplate, RepositoryError>;
}

#[async_trait]
pub trait ApprovalRequestRepository: Send + Sync {
    async fn find_by_id(&self, id: &RequestId) -> Result<Option<ApprovalRequest>, RepositoryError>;

    async fn history(&self, id: &RequestId) -> Result<Option<RequestHistory>, RepositoryError>;

    async fn pending_for_role(
        &self,
        role_id: &RoleId,
        limit: u32,
    ) -> Result<Vec<PendingApproval>, RepositoryError>;
}

#[async_trait]
pub trait PropertyRepository: Send + Sync {
    async fn find_by_id(&self, id: &PropertyId) -> Result<Option<Property>, RepositoryError>;

    async fn save(&self, property: Property) -> Result<(), RepositoryError>;

    async fn find_movement(
        &self,
        id: &PropertyMovementId,
    ) -> Result<Option<PropertyMovement>, RepositoryError>;

    async fn movement_records(
        &self,
        movement_id: &PropertyMovementId,
    ) -> Result<Vec<MovementRecord>, RepositoryError>;
}
