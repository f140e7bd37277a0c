//! Access-control error model.

use thiserror::Error;

/// Result type used across the authorization layer.
pub type AccessResult<T> = Result<T, AccessError>;

/// Access-control error.
///
/// Keep this focused on deterministic authorization outcomes. Infrastructure
/// failures (storage, serialization) belong to the store layer and are mapped
/// into `Inconsistent` only when they indicate corrupted configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// No resolvable actor for the request.
    #[error("unauthenticated")]
    Unauthenticated,

    /// Actor resolved but lacks authority (insufficient role, non-delegatable
    /// role, permission not held by delegator, context not in available set).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A referenced role/delegation/override/user does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Missing reason, empty permission set, malformed duration, bad input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// System integrity issue (e.g. cyclic role inheritance). Must be logged
    /// at error severity and never silently swallowed.
    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),

    /// Infrastructure failure (record store I/O, serialization). Not an
    /// authorization outcome; surfaced to callers as a generic failure.
    #[error("internal: {0}")]
    Internal(String),
}

impl AccessError {
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn inconsistent(msg: impl Into<String>) -> Self {
        Self::Inconsistent(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error is a normal authorization outcome (as opposed to a
    /// configuration/integrity or infrastructure failure that needs operator
    /// attention).
    pub fn is_authorization_outcome(&self) -> bool {
        !matches!(self, Self::Inconsistent(_) | Self::Internal(_))
    }
}
