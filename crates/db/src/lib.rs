pub mod audit;
pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;
pub mod workflow;

pub use audit::SqlAuditSink;
pub use connection::{connect, connect_with_settings, DbPool};
pub use fixtures::{SeedDataset, SeedResult, VerificationResult};
pub use repositories::PendingApproval;
pub use workflow::{
    MovementCreated, NewMovement, ResponseRecorded, WorkflowError, WorkflowService,
};
