use thiserror::Error;

use crate::domain::workflow::TemplateIntegrityError;
use crate::lifecycle::RequestTransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Transition(#[from] RequestTransitionError),
    #[error(transparent)]
    TemplateIntegrity(#[from] TemplateIntegrityError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}
