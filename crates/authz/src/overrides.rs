//! Permission overrides and emergency elevations.
//!
//! An override is an administrator-created grant or deny for a specific
//! (user, permission) pair, bypassing normal role/delegation logic. A grant
//! override deliberately does not require the granter to hold the permission
//! themselves: it is the escape hatch for exceptional grants, which is
//! exactly why every creation is audited. Emergency elevations are
//! critical-severity grant overrides with stricter audit guarantees.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use tourdesk_audit::{Actor, AuditAction, AuditRecorder, RequestMeta};
use tourdesk_core::{AccessError, AccessResult, OverrideId, UserId};
use tourdesk_store::{Record, RecordId, RecordStore, TypedStore};

use crate::context::ContextId;
use crate::permission::{Permission, PermissionSet};
use crate::resolver::PermissionResolver;
use crate::user::load_user;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideType {
    Grant,
    Deny,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideSeverity {
    #[default]
    Normal,
    /// Marks an emergency elevation.
    Critical,
}

/// A single grant/deny override. Never mutated after creation; expiry is
/// evaluated lazily at check time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionOverride {
    pub id: OverrideId,
    pub user_id: UserId,
    pub override_type: OverrideType,
    pub permission: Permission,
    pub context: Option<ContextId>,
    pub reason: String,
    pub granted_by: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub severity: OverrideSeverity,
    /// Groups the overrides created by one emergency elevation call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation_id: Option<OverrideId>,
}

impl PermissionOverride {
    /// Active at `t`: not expired. Boundary rule: grants at any instant
    /// `< expires_at`, denies at any instant `>= expires_at`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now < expires_at,
            None => true,
        }
    }

    /// Exact permission match, or an override on the wildcard.
    pub fn matches_permission(&self, permission: &Permission) -> bool {
        &self.permission == permission || self.permission.is_wildcard()
    }

    /// Context rule: an unscoped override applies everywhere; a scoped one
    /// applies only inside exactly that context.
    pub fn matches_context(&self, requested: Option<&ContextId>) -> bool {
        match &self.context {
            None => true,
            Some(ctx) => requested == Some(ctx),
        }
    }

    pub fn is_emergency(&self) -> bool {
        self.severity == OverrideSeverity::Critical && self.override_type == OverrideType::Grant
    }
}

impl Record for PermissionOverride {
    const CLASS: &'static str = "PermissionOverride";

    fn record_id(&self) -> RecordId {
        RecordId::from(self.id)
    }
}

/// Duration bounds for emergency elevations.
#[derive(Debug, Clone)]
pub struct ElevationPolicy {
    /// Applied when the caller does not specify a duration.
    pub default_duration: Duration,
    /// Hard cap; a longer requested duration is rejected.
    pub max_duration: Option<Duration>,
}

impl Default for ElevationPolicy {
    fn default() -> Self {
        Self {
            default_duration: Duration::hours(4),
            max_duration: None,
        }
    }
}

impl ElevationPolicy {
    pub fn with_default_duration(mut self, duration: Duration) -> Self {
        self.default_duration = duration;
        self
    }

    pub fn with_max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = Some(duration);
        self
    }
}

/// A granted emergency elevation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyElevation {
    pub elevation_id: OverrideId,
    pub override_ids: Vec<OverrideId>,
    pub expires_at: DateTime<Utc>,
}

/// Creates overrides and emergency elevations.
pub struct OverrideManager {
    store: Arc<dyn RecordStore>,
    resolver: PermissionResolver,
    recorder: Arc<AuditRecorder>,
    policy: ElevationPolicy,
}

impl OverrideManager {
    pub fn new(
        store: Arc<dyn RecordStore>,
        resolver: PermissionResolver,
        recorder: Arc<AuditRecorder>,
        policy: ElevationPolicy,
    ) -> Self {
        Self {
            store,
            resolver,
            recorder,
            policy,
        }
    }

    /// Create a grant or deny override for a user.
    ///
    /// Requires administrative authority. A deny needs no subset check
    /// (administrators may always restrict); a grant does not require the
    /// granter to hold the permission.
    pub fn create_override(
        &self,
        actor: &Actor,
        meta: &RequestMeta,
        granted_by: UserId,
        user_id: UserId,
        override_type: OverrideType,
        permission: Permission,
        reason: &str,
        context: Option<ContextId>,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> AccessResult<OverrideId> {
        self.require_admin(granted_by, now)?;

        if reason.trim().is_empty() {
            return Err(AccessError::invalid_argument("reason must not be empty"));
        }
        if let Some(expiry) = expires_at {
            if expiry <= now {
                return Err(AccessError::invalid_argument(
                    "expires_at must be in the future",
                ));
            }
        }
        load_user(self.store.as_ref(), user_id)?;

        let record = PermissionOverride {
            id: OverrideId::new(),
            user_id,
            override_type,
            permission,
            context,
            reason: reason.to_string(),
            granted_by,
            created_at: now,
            expires_at,
            severity: OverrideSeverity::Normal,
            elevation_id: None,
        };
        self.store.save_typed(&record)?;

        self.recorder.record_action(
            actor,
            meta,
            AuditAction::OverrideCreated,
            PermissionOverride::CLASS,
            &record.id.to_string(),
            json!({
                "user_id": record.user_id,
                "override_type": record.override_type,
                "permission": &record.permission,
                "context": &record.context,
                "expires_at": record.expires_at,
                "granted_by": record.granted_by,
                "reason": &record.reason,
            }),
        );

        Ok(record.id)
    }

    /// Grant a critical-severity emergency elevation.
    ///
    /// The audit entry is written synchronously and confirmed before any
    /// grant is persisted, so a failed grant still leaves the attempt on
    /// record; a failed audit write fails the elevation outright.
    pub fn create_emergency_elevation(
        &self,
        actor: &Actor,
        meta: &RequestMeta,
        elevated_by: UserId,
        user_id: UserId,
        permissions: PermissionSet,
        reason: &str,
        duration: Option<Duration>,
        now: DateTime<Utc>,
    ) -> AccessResult<EmergencyElevation> {
        self.require_admin(elevated_by, now)?;

        if reason.trim().is_empty() {
            return Err(AccessError::invalid_argument("reason must not be empty"));
        }
        if permissions.is_empty() {
            return Err(AccessError::invalid_argument(
                "permission set must not be empty",
            ));
        }
        load_user(self.store.as_ref(), user_id)?;

        let duration = duration.unwrap_or(self.policy.default_duration);
        if duration <= Duration::zero() {
            return Err(AccessError::invalid_argument("duration must be positive"));
        }
        if let Some(max) = self.policy.max_duration {
            if duration > max {
                return Err(AccessError::invalid_argument(format!(
                    "duration exceeds the {max} elevation cap"
                )));
            }
        }

        let expires_at = now + duration;
        let elevation_id = OverrideId::new();

        let audit_result = self.recorder.record_action_sync(
            actor,
            meta,
            AuditAction::EmergencyPermission,
            PermissionOverride::CLASS,
            &elevation_id.to_string(),
            json!({
                "user_id": user_id,
                "permissions": &permissions,
                "expires_at": expires_at,
                "elevated_by": elevated_by,
                "reason": reason,
            }),
        );
        if let Err(e) = audit_result {
            error!(
                user_id = %user_id,
                elevated_by = %elevated_by,
                error = %e,
                "emergency elevation audit write failed, elevation refused"
            );
            return Err(AccessError::internal(
                "emergency elevation could not be audited",
            ));
        }

        let mut override_ids = Vec::with_capacity(permissions.len());
        for permission in &permissions {
            let record = PermissionOverride {
                id: OverrideId::new(),
                user_id,
                override_type: OverrideType::Grant,
                permission: permission.clone(),
                context: Some(ContextId::EMERGENCY),
                reason: reason.to_string(),
                granted_by: elevated_by,
                created_at: now,
                expires_at: Some(expires_at),
                severity: OverrideSeverity::Critical,
                elevation_id: Some(elevation_id),
            };
            self.store.save_typed(&record)?;
            override_ids.push(record.id);
        }

        Ok(EmergencyElevation {
            elevation_id,
            override_ids,
            expires_at,
        })
    }

    fn require_admin(&self, user_id: UserId, now: DateTime<Utc>) -> AccessResult<()> {
        if self
            .resolver
            .has_permission(user_id, &Permission::MANAGE_PERMISSIONS, None, now)?
        {
            Ok(())
        } else {
            Err(AccessError::forbidden(format!(
                "user {user_id} lacks administrative override authority"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tourdesk_audit::{
        Actor, AuditConfig, AuditLogEntry, AuditRecorder, AuditSeverity, AuditWriter,
        AuditWriterConfig, AuditWriterHandle,
    };
    use tourdesk_store::Filter;
    use tourdesk_store::InMemoryRecordStore;

    use crate::role::{Role, RoleCatalog, RoleScope};
    use crate::user::User;

    fn perms(names: &[&'static str]) -> PermissionSet {
        names.iter().map(|n| Permission::new(*n)).collect()
    }

    struct Fixture {
        store: Arc<dyn RecordStore>,
        resolver: PermissionResolver,
        manager: OverrideManager,
        handle: AuditWriterHandle,
        admin: UserId,
        employee: UserId,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::new());
        let catalog = Arc::new(
            RoleCatalog::from_roles(vec![
                Role::new("employee", 3, RoleScope::Operations)
                    .with_permissions(perms(&["view_own_bookings"])),
                Role::new("admin", 6, RoleScope::System)
                    .with_permissions(perms(&["manage_permissions"])),
            ])
            .unwrap(),
        );
        let resolver = PermissionResolver::new(store.clone(), catalog);

        let (writer, handle) = AuditWriter::spawn(store.clone(), AuditWriterConfig::default());
        let recorder = Arc::new(AuditRecorder::new(writer, AuditConfig::default()));

        let admin = UserId::new();
        let employee = UserId::new();
        store.save_typed(&User::new(admin, "admin", "admin")).unwrap();
        store
            .save_typed(&User::new(employee, "u1", "employee"))
            .unwrap();

        Fixture {
            store: store.clone(),
            resolver: resolver.clone(),
            manager: OverrideManager::new(store, resolver, recorder, ElevationPolicy::default()),
            handle,
            admin,
            employee,
        }
    }

    fn manage_fleet() -> Permission {
        Permission::new("manage_fleet")
    }

    #[test]
    fn only_admins_may_create_overrides() {
        let f = fixture();
        let err = f
            .manager
            .create_override(
                &Actor::system(),
                &RequestMeta::default(),
                f.employee, // not an admin
                f.employee,
                OverrideType::Grant,
                manage_fleet(),
                "self-service",
                None,
                None,
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, AccessError::Forbidden(_)));
    }

    #[test]
    fn grant_override_does_not_require_granter_to_hold_permission() {
        let f = fixture();
        let now = Utc::now();

        // The admin role does not hold manage_fleet itself; overrides are the
        // escape hatch for exceptional grants.
        assert!(
            !f.resolver
                .has_permission(f.admin, &manage_fleet(), None, now)
                .unwrap()
        );

        f.manager
            .create_override(
                &Actor::system(),
                &RequestMeta::default(),
                f.admin,
                f.employee,
                OverrideType::Grant,
                manage_fleet(),
                "fleet audit support",
                None,
                None,
                now,
            )
            .unwrap();

        assert!(
            f.resolver
                .has_permission(f.employee, &manage_fleet(), None, now)
                .unwrap()
        );

        f.handle.shutdown();
        let trail: Vec<AuditLogEntry> = f.store.find_typed(&Filter::empty()).unwrap();
        assert_eq!(
            trail
                .iter()
                .filter(|e| e.action == tourdesk_audit::AuditAction::OverrideCreated)
                .count(),
            1
        );
    }

    #[test]
    fn deny_override_restricts_role_granted_permission() {
        let f = fixture();
        let now = Utc::now();
        let view = Permission::new("view_own_bookings");

        assert!(f.resolver.has_permission(f.employee, &view, None, now).unwrap());

        f.manager
            .create_override(
                &Actor::system(),
                &RequestMeta::default(),
                f.admin,
                f.employee,
                OverrideType::Deny,
                view.clone(),
                "suspended pending investigation",
                None,
                None,
                now,
            )
            .unwrap();

        assert!(!f.resolver.has_permission(f.employee, &view, None, now).unwrap());
    }

    #[test]
    fn past_expiry_is_invalid() {
        let f = fixture();
        let now = Utc::now();
        let err = f
            .manager
            .create_override(
                &Actor::system(),
                &RequestMeta::default(),
                f.admin,
                f.employee,
                OverrideType::Grant,
                manage_fleet(),
                "late",
                None,
                Some(now - Duration::minutes(1)),
                now,
            )
            .unwrap_err();
        assert!(matches!(err, AccessError::InvalidArgument(_)));
    }

    #[test]
    fn emergency_elevation_grants_until_the_window_elapses() {
        let f = fixture();
        let now = Utc::now();

        let elevation = f
            .manager
            .create_emergency_elevation(
                &Actor::system(),
                &RequestMeta::default(),
                f.admin,
                f.employee,
                perms(&["manage_fleet"]),
                "incident response",
                None,
                now,
            )
            .unwrap();

        // Default duration applies when unspecified.
        assert_eq!(elevation.expires_at, now + Duration::hours(4));

        assert!(
            f.resolver
                .has_permission(f.employee, &manage_fleet(), None, now)
                .unwrap()
        );

        // Simulated clock past the window: denied again, lazily.
        let after = elevation.expires_at + Duration::seconds(1);
        assert!(
            !f.resolver
                .has_permission(f.employee, &manage_fleet(), None, after)
                .unwrap()
        );

        // Exactly one critical EMERGENCY_PERMISSION entry, written
        // synchronously (visible without waiting for the writer).
        let trail: Vec<AuditLogEntry> = f.store.find_typed(&Filter::empty()).unwrap();
        let emergency: Vec<_> = trail
            .iter()
            .filter(|e| e.action == tourdesk_audit::AuditAction::EmergencyPermission)
            .collect();
        assert_eq!(emergency.len(), 1);
        assert_eq!(emergency[0].severity, AuditSeverity::Critical);

        f.handle.shutdown();
    }

    #[test]
    fn elevation_duration_cap_is_enforced() {
        let f = fixture();
        let store = f.store.clone();
        let capped = OverrideManager::new(
            store,
            f.resolver.clone(),
            Arc::new(AuditRecorder::new(
                AuditWriter::spawn(f.store.clone(), AuditWriterConfig::default()).0,
                AuditConfig::default(),
            )),
            ElevationPolicy::default().with_max_duration(Duration::hours(8)),
        );

        let err = capped
            .create_emergency_elevation(
                &Actor::system(),
                &RequestMeta::default(),
                f.admin,
                f.employee,
                perms(&["manage_fleet"]),
                "too long",
                Some(Duration::hours(48)),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, AccessError::InvalidArgument(_)));
        f.handle.shutdown();
    }
}
