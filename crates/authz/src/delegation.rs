//! Time-bounded permission delegation between actors.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use tourdesk_audit::{Actor, AuditAction, AuditRecorder, RequestMeta};
use tourdesk_core::{AccessError, AccessResult, DelegationId, UserId};
use tourdesk_store::{Filter, Record, RecordId, RecordStore, TypedStore};

use crate::context::ContextId;
use crate::permission::{Permission, PermissionSet};
use crate::resolver::PermissionResolver;
use crate::user::load_user;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegationType {
    Temporary,
    Standing,
    Conditional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegationStatus {
    Active,
    Revoked,
    Expired,
}

/// A grant of specific permissions from a delegator to a delegate.
///
/// The stored `status` can lag reality: there is no background sweep, so an
/// expired delegation may still read `active`. [`Self::is_active`] is the
/// authoritative check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionDelegation {
    pub id: DelegationId,
    pub delegator_id: UserId,
    pub delegate_id: UserId,
    pub permissions: PermissionSet,
    pub delegation_type: DelegationType,
    pub context: Option<ContextId>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    /// `None` = standing delegation.
    pub expires_at: Option<DateTime<Utc>>,
    pub status: DelegationStatus,
    pub revoked_by: Option<UserId>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revocation_reason: Option<String>,
}

impl PermissionDelegation {
    /// Active at `t`: not revoked, and `t < expires_at` (a delegation with
    /// `expires_at = t` denies at exactly `t`).
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if self.status != DelegationStatus::Active {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => now < expires_at,
            None => true,
        }
    }

    /// Context rule: an unscoped delegation applies everywhere; a scoped one
    /// only inside exactly that context.
    pub fn matches_context(&self, requested: Option<&ContextId>) -> bool {
        match &self.context {
            None => true,
            Some(ctx) => requested == Some(ctx),
        }
    }
}

impl Record for PermissionDelegation {
    const CLASS: &'static str = "PermissionDelegation";

    fn record_id(&self) -> RecordId {
        RecordId::from(self.id)
    }
}

/// Creates, revokes and lists delegations.
pub struct DelegationManager {
    store: Arc<dyn RecordStore>,
    resolver: PermissionResolver,
    recorder: Arc<AuditRecorder>,
}

impl DelegationManager {
    pub fn new(
        store: Arc<dyn RecordStore>,
        resolver: PermissionResolver,
        recorder: Arc<AuditRecorder>,
    ) -> Self {
        Self {
            store,
            resolver,
            recorder,
        }
    }

    /// Create a delegation; immediately active on success.
    ///
    /// The delegator must hold a `delegatable` role and every requested
    /// permission in their own effective set at this instant: delegation can
    /// never exceed the delegator's own grant.
    pub fn create_delegation(
        &self,
        actor: &Actor,
        meta: &RequestMeta,
        delegator_id: UserId,
        delegate_id: UserId,
        permissions: PermissionSet,
        delegation_type: DelegationType,
        duration: Option<Duration>,
        reason: &str,
        context: Option<ContextId>,
        now: DateTime<Utc>,
    ) -> AccessResult<DelegationId> {
        if reason.trim().is_empty() {
            return Err(AccessError::invalid_argument("reason must not be empty"));
        }
        if permissions.is_empty() {
            return Err(AccessError::invalid_argument(
                "permission set must not be empty",
            ));
        }
        if let Some(d) = duration {
            if d <= Duration::zero() {
                return Err(AccessError::invalid_argument("duration must be positive"));
            }
        }

        let delegator = load_user(self.store.as_ref(), delegator_id)?;
        let delegate = load_user(self.store.as_ref(), delegate_id)?;

        let catalog = self.resolver.catalog();
        let delegator_role = catalog.get(&delegator.role).ok_or_else(|| {
            AccessError::inconsistent(format!("role '{}' not in catalog", delegator.role))
        })?;

        if !delegator_role.delegatable {
            return Err(AccessError::forbidden(format!(
                "role '{}' is not delegatable",
                delegator_role.name
            )));
        }

        if delegator_role.max_delegation_level > 0 {
            let delegate_role = catalog.get(&delegate.role).ok_or_else(|| {
                AccessError::inconsistent(format!("role '{}' not in catalog", delegate.role))
            })?;
            if delegate_role.level > delegator_role.max_delegation_level {
                return Err(AccessError::forbidden(format!(
                    "delegate role level {} exceeds max delegation level {}",
                    delegate_role.level, delegator_role.max_delegation_level
                )));
            }
        }

        // Privilege-escalation guard: the delegated set must be a subset of
        // the delegator's effective permissions at creation time.
        for permission in &permissions {
            if !self
                .resolver
                .has_permission(delegator_id, permission, context.as_ref(), now)?
            {
                return Err(AccessError::forbidden(format!(
                    "delegator does not hold permission '{permission}'"
                )));
            }
        }

        let delegation = PermissionDelegation {
            id: DelegationId::new(),
            delegator_id,
            delegate_id,
            permissions,
            delegation_type,
            context,
            reason: reason.to_string(),
            created_at: now,
            expires_at: duration.map(|d| now + d),
            status: DelegationStatus::Active,
            revoked_by: None,
            revoked_at: None,
            revocation_reason: None,
        };
        self.store.save_typed(&delegation)?;

        self.recorder.record_action(
            actor,
            meta,
            AuditAction::PermissionDelegated,
            PermissionDelegation::CLASS,
            &delegation.id.to_string(),
            json!({
                "delegator_id": delegation.delegator_id,
                "delegate_id": delegation.delegate_id,
                "permissions": &delegation.permissions,
                "delegation_type": delegation.delegation_type,
                "context": &delegation.context,
                "expires_at": delegation.expires_at,
                "reason": &delegation.reason,
            }),
        );

        Ok(delegation.id)
    }

    /// Revoke a delegation. Immediate and terminal: a revoked delegation can
    /// never be reactivated; create a new one instead.
    ///
    /// Only the original delegator or an actor with administrative override
    /// authority may revoke.
    pub fn revoke_delegation(
        &self,
        actor: &Actor,
        meta: &RequestMeta,
        delegation_id: DelegationId,
        revoked_by: UserId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> AccessResult<()> {
        if reason.trim().is_empty() {
            return Err(AccessError::invalid_argument("reason must not be empty"));
        }

        let mut delegation = self
            .store
            .get_typed::<PermissionDelegation>(&RecordId::from(delegation_id))?
            .ok_or_else(|| AccessError::not_found(format!("delegation {delegation_id}")))?;

        if delegation.status == DelegationStatus::Revoked {
            return Err(AccessError::invalid_argument(
                "delegation is already revoked",
            ));
        }

        let is_delegator = delegation.delegator_id == revoked_by;
        if !is_delegator
            && !self
                .resolver
                .has_permission(revoked_by, &Permission::MANAGE_PERMISSIONS, None, now)?
        {
            return Err(AccessError::forbidden(format!(
                "user {revoked_by} may not revoke delegation {delegation_id}"
            )));
        }

        delegation.status = DelegationStatus::Revoked;
        delegation.revoked_by = Some(revoked_by);
        delegation.revoked_at = Some(now);
        delegation.revocation_reason = Some(reason.to_string());
        self.store.save_typed(&delegation)?;

        self.recorder.record_action(
            actor,
            meta,
            AuditAction::DelegationRevoked,
            PermissionDelegation::CLASS,
            &delegation.id.to_string(),
            json!({
                "delegator_id": delegation.delegator_id,
                "delegate_id": delegation.delegate_id,
                "revoked_by": revoked_by,
                "revocation_reason": reason,
            }),
        );

        Ok(())
    }

    /// Delegations granted by a delegator, active and unexpired at `now`.
    pub fn list_active_delegations(
        &self,
        delegator_id: UserId,
        now: DateTime<Utc>,
    ) -> AccessResult<Vec<PermissionDelegation>> {
        let mut delegations: Vec<PermissionDelegation> = self
            .store
            .find_typed(&Filter::field("delegator_id", delegator_id.to_string()))?;
        delegations.retain(|d| d.is_active(now));
        Ok(delegations)
    }

    /// Delegations granted to a delegate, active and unexpired at `now`.
    pub fn list_delegated_permissions(
        &self,
        delegate_id: UserId,
        now: DateTime<Utc>,
    ) -> AccessResult<Vec<PermissionDelegation>> {
        let mut delegations: Vec<PermissionDelegation> = self
            .store
            .find_typed(&Filter::field("delegate_id", delegate_id.to_string()))?;
        delegations.retain(|d| d.is_active(now));
        Ok(delegations)
    }
}
