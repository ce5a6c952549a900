pub mod audit;
pub mod authorize;
pub mod config;
pub mod domain;
pub mod errors;
pub mod lifecycle;
pub mod sync;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use authorize::{authorize_step, StepActor, StepAuthorization, StepDenial};
pub use domain::property::{
    BusinessUnit, BusinessUnitId, MovementDetail, MovementRecord, MovementStatus, Property,
    PropertyId, PropertyMovement, PropertyMovementId, PropertyStatus,
};
pub use domain::request::{
    ApprovalRequest, ApprovalResponse, Decision, RequestHistory, RequestId, RequestStatus,
    ResponseId, ResponseStatus, UserId,
};
pub use domain::workflow::{
    ApprovalStep, EntityType, Role, RoleId, TemplateId, TemplateIntegrityError, WorkflowTemplate,
};
pub use errors::DomainError;
pub use lifecycle::{
    transition, RequestEvent, RequestProgress, RequestTransition, RequestTransitionError,
    SyncAction,
};
