use ulid::Ulid;

use crate::model::InvalidRange;
use crate::policy::PolicyViolation;

use super::conflict::ConflictReport;
use super::lifecycle::{ApprovalError, InvalidTransition};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    InvalidRange(#[from] InvalidRange),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("policy: {0}")]
    Policy(#[from] PolicyViolation),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    /// Approval re-validation failed; the booking is still pending.
    #[error("slot no longer available: {0}")]
    StaleConflict(ConflictReport),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    /// Stable machine-readable code, used on the wire and as a metrics label.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidRange(_) => "invalid_range",
            EngineError::InvalidRequest(_) => "invalid_request",
            EngineError::Policy(_) => "policy_violation",
            EngineError::NotFound(_) => "not_found",
            EngineError::InvalidTransition(_) => "invalid_state",
            EngineError::StaleConflict(_) => "stale_conflict",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "internal",
        }
    }
}

impl From<ApprovalError> for EngineError {
    fn from(e: ApprovalError) -> Self {
        match e {
            ApprovalError::InvalidTransition(t) => EngineError::InvalidTransition(t),
            ApprovalError::StaleConflict(report) => EngineError::StaleConflict(report),
        }
    }
}
