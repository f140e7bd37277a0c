//! `tourdesk-authz` — role inheritance, delegation, overrides and contexts.
//!
//! Pure policy over the record-store boundary: the resolver computes the
//! effective permission set for a (user, context) pair under a fixed
//! precedence contract, and the managers mutate the grants the resolver
//! reads. Every mutating operation here leaves an audit entry.

pub mod context;
pub mod delegation;
pub mod overrides;
pub mod permission;
pub mod resolver;
pub mod role;
pub mod user;

pub use context::{
    ContextId, ContextKind, ContextSwitchManager, PermissionContext, SessionContext, SwitchOutcome,
};
pub use delegation::{DelegationManager, DelegationStatus, DelegationType, PermissionDelegation};
pub use overrides::{
    ElevationPolicy, EmergencyElevation, OverrideManager, OverrideSeverity, OverrideType,
    PermissionOverride,
};
pub use permission::{Permission, PermissionSet};
pub use resolver::{DecisionSource, PermissionExplanation, PermissionResolver};
pub use role::{Role, RoleCatalog, RoleName, RoleScope};
pub use user::User;
