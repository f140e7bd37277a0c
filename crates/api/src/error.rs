//! Boundary error mapping.
//!
//! Propagation policy: `Forbidden`, `NotFound` and `InvalidArgument` surface
//! to the caller as explicit failures. A denial is deliberately generic: it
//! never reveals which precedence rule caused it, to avoid leaking
//! configuration to probing callers. `Inconsistent` and infrastructure
//! failures surface as a generic internal failure and are logged at error
//! severity for operator investigation.

use thiserror::Error;
use tracing::{debug, error};

use tourdesk_core::AccessError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Caller-facing error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Validation failures name the offending field/argument.
    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("unauthenticated")]
    Unauthenticated,

    /// Deliberately carries no detail.
    #[error("forbidden")]
    Forbidden,

    #[error("not found: {0}")]
    NotFound(String),

    /// Deliberately carries no detail; the cause is in the operator log.
    #[error("internal error")]
    Internal,
}

impl From<AccessError> for ApiError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Forbidden(detail) => {
                debug!(detail = %detail, "authorization denied");
                ApiError::Forbidden
            }
            AccessError::NotFound(what) => ApiError::NotFound(what),
            AccessError::InvalidArgument(what) => ApiError::BadRequest(what),
            AccessError::Unauthenticated => ApiError::Unauthenticated,
            AccessError::Inconsistent(detail) => {
                error!(detail = %detail, "configuration integrity failure at the boundary");
                ApiError::Internal
            }
            AccessError::Internal(detail) => {
                error!(detail = %detail, "infrastructure failure at the boundary");
                ApiError::Internal
            }
        }
    }
}

impl From<tourdesk_store::StoreError> for ApiError {
    fn from(err: tourdesk_store::StoreError) -> Self {
        ApiError::from(AccessError::from(err))
    }
}
