//! Effective-permission resolution.
//!
//! Resolution order is a hard contract, highest precedence first:
//!
//! 1. active deny override matching (user, permission, context): denies and
//!    short-circuits every other source;
//! 2. active critical emergency elevation matching (user, permission),
//!    context ignored: grants;
//! 3. active grant override matching (user, permission, context): grants;
//! 4. active delegation containing the permission whose context matches or
//!    is unset: grants;
//! 5. role base permissions along the inheritance chain (wildcard `"*"` =
//!    all permissions): grants if present;
//! 6. otherwise: deny.
//!
//! Two precedence orders produce different authorization outcomes for the
//! same audit-sensitive data, so this order must not be rearranged.
//!
//! "Active" means unrevoked and unexpired at the supplied instant. Expiry is
//! evaluated lazily at check time; there is no background job flipping
//! status, so two checks straddling an expiry boundary may legitimately
//! disagree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

use tourdesk_core::{AccessError, AccessResult, UserId};
use tourdesk_store::{Filter, RecordStore, TypedStore};

use crate::context::ContextId;
use crate::delegation::PermissionDelegation;
use crate::overrides::{OverrideType, PermissionOverride};
use crate::permission::{Permission, PermissionSet};
use crate::role::RoleCatalog;
use crate::user::load_user;

/// Which precedence source decided a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    DenyOverride,
    EmergencyElevation,
    GrantOverride,
    Delegation,
    RoleInheritance,
}

/// Admin-facing diagnostic for one permission check.
///
/// Never surfaced to ordinary callers: denial responses must not reveal
/// which precedence rule decided. This is the operator's view.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionExplanation {
    pub user_id: UserId,
    pub permission: Permission,
    pub context: Option<ContextId>,
    pub granted: bool,
    pub source: Option<DecisionSource>,
    pub reason: String,
    pub effective_permissions: PermissionSet,
}

/// Computes the effective permission set for a (user, context) pair.
#[derive(Clone)]
pub struct PermissionResolver {
    store: Arc<dyn RecordStore>,
    catalog: Arc<RoleCatalog>,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn RecordStore>, catalog: Arc<RoleCatalog>) -> Self {
        Self { store, catalog }
    }

    pub fn catalog(&self) -> &Arc<RoleCatalog> {
        &self.catalog
    }

    /// Whether the user holds the permission in the given context at `now`.
    ///
    /// Unknown user resolves to a deny carrying `NotFound`; a cyclic role
    /// chain resolves to a deny carrying `Inconsistent`, since corrupted
    /// configuration must never silently grant.
    pub fn has_permission(
        &self,
        user_id: UserId,
        permission: &Permission,
        context: Option<&ContextId>,
        now: DateTime<Utc>,
    ) -> AccessResult<bool> {
        let user = load_user(self.store.as_ref(), user_id)?;
        if !user.active {
            debug!(user_id = %user_id, "permission check for inactive user");
            return Ok(false);
        }

        let overrides = self.active_overrides(user_id, now)?;

        // 1. Deny wins over every other source.
        if overrides.iter().any(|o| {
            o.override_type == OverrideType::Deny
                && o.matches_permission(permission)
                && o.matches_context(context)
        }) {
            debug!(user_id = %user_id, permission = %permission, "denied by override");
            return Ok(false);
        }

        // 2. Emergency elevations apply regardless of the requested context.
        if overrides
            .iter()
            .any(|o| o.is_emergency() && o.matches_permission(permission))
        {
            return Ok(true);
        }

        // 3. Ordinary grant overrides are context-scoped.
        if overrides.iter().any(|o| {
            o.override_type == OverrideType::Grant
                && o.matches_permission(permission)
                && o.matches_context(context)
        }) {
            return Ok(true);
        }

        // 4. Delegations.
        if self
            .active_delegations(user_id, now)?
            .iter()
            .any(|d| d.matches_context(context) && d.permissions.allows(permission))
        {
            return Ok(true);
        }

        // 5. Role inheritance.
        let base = self.base_permissions_guarded(&user)?;
        Ok(base.allows(permission))
    }

    /// The full resolved permission set for a (user, context) pair.
    ///
    /// Union of sources 2–5, minus anything an active deny override matches
    /// (a deny on the wildcard empties the set). The boolean
    /// [`Self::has_permission`] is the authoritative check; this set view is
    /// for display and for `applied_permissions` on context switches.
    pub fn effective_permissions(
        &self,
        user_id: UserId,
        context: Option<&ContextId>,
        now: DateTime<Utc>,
    ) -> AccessResult<PermissionSet> {
        let user = load_user(self.store.as_ref(), user_id)?;
        if !user.active {
            return Ok(PermissionSet::new());
        }

        let mut set = self.base_permissions_guarded(&user)?;

        for delegation in self.active_delegations(user_id, now)? {
            if delegation.matches_context(context) {
                set.extend(&delegation.permissions);
            }
        }

        let overrides = self.active_overrides(user_id, now)?;
        for o in &overrides {
            let applies = if o.is_emergency() {
                true
            } else {
                o.matches_context(context)
            };
            if o.override_type == OverrideType::Grant && applies {
                set.insert(o.permission.clone());
            }
        }

        for o in &overrides {
            if o.override_type == OverrideType::Deny && o.matches_context(context) {
                if o.permission.is_wildcard() {
                    set.clear();
                    break;
                }
                set.remove(&o.permission);
            }
        }

        Ok(set)
    }

    /// Explain which source decides a check. Operator diagnostic only.
    pub fn explain_permission(
        &self,
        user_id: UserId,
        permission: &Permission,
        context: Option<&ContextId>,
        now: DateTime<Utc>,
    ) -> AccessResult<PermissionExplanation> {
        let user = load_user(self.store.as_ref(), user_id)?;
        let effective = self.effective_permissions(user_id, context, now)?;

        let explain = |granted, source, reason: String| PermissionExplanation {
            user_id,
            permission: permission.clone(),
            context: context.cloned(),
            granted,
            source,
            reason,
            effective_permissions: effective.clone(),
        };

        if !user.active {
            return Ok(explain(false, None, format!("user '{}' is inactive", user.username)));
        }

        let overrides = self.active_overrides(user_id, now)?;

        if let Some(o) = overrides.iter().find(|o| {
            o.override_type == OverrideType::Deny
                && o.matches_permission(permission)
                && o.matches_context(context)
        }) {
            return Ok(explain(
                false,
                Some(DecisionSource::DenyOverride),
                format!("deny override created by {} ({})", o.granted_by, o.reason),
            ));
        }

        if let Some(o) = overrides
            .iter()
            .find(|o| o.is_emergency() && o.matches_permission(permission))
        {
            return Ok(explain(
                true,
                Some(DecisionSource::EmergencyElevation),
                format!("emergency elevation granted by {} ({})", o.granted_by, o.reason),
            ));
        }

        if let Some(o) = overrides.iter().find(|o| {
            o.override_type == OverrideType::Grant
                && o.matches_permission(permission)
                && o.matches_context(context)
        }) {
            return Ok(explain(
                true,
                Some(DecisionSource::GrantOverride),
                format!("grant override created by {} ({})", o.granted_by, o.reason),
            ));
        }

        if let Some(d) = self
            .active_delegations(user_id, now)?
            .iter()
            .find(|d| d.matches_context(context) && d.permissions.allows(permission))
        {
            return Ok(explain(
                true,
                Some(DecisionSource::Delegation),
                format!("delegated by {} ({})", d.delegator_id, d.reason),
            ));
        }

        let base = self.base_permissions_guarded(&user)?;
        if base.allows(permission) {
            return Ok(explain(
                true,
                Some(DecisionSource::RoleInheritance),
                format!("granted by role '{}'", user.role),
            ));
        }

        Ok(explain(false, None, "no source grants this permission".to_string()))
    }

    fn active_overrides(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> AccessResult<Vec<PermissionOverride>> {
        let mut overrides: Vec<PermissionOverride> = self
            .store
            .find_typed(&Filter::field("user_id", user_id.to_string()))?;
        overrides.retain(|o| o.is_active(now));
        Ok(overrides)
    }

    fn active_delegations(
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

    fn base_permissions_guarded(&self, user: &crate::user::User) -> AccessResult<PermissionSet> {
        self.catalog
            .effective_base_permissions(&user.role)
            .inspect_err(|e| {
                if let AccessError::Inconsistent(msg) = e {
                    error!(
                        user_id = %user.id,
                        role = %user.role,
                        detail = %msg,
                        "role configuration integrity error during permission check"
                    );
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    use tourdesk_core::{DelegationId, OverrideId};
    use tourdesk_store::InMemoryRecordStore;

    use crate::delegation::{DelegationStatus, DelegationType};
    use crate::overrides::OverrideSeverity;
    use crate::role::{Role, RoleScope};
    use crate::user::User;

    const MANAGE_FLEET: &str = "manage_fleet";

    fn perms(names: &[&'static str]) -> PermissionSet {
        names.iter().map(|n| Permission::new(*n)).collect()
    }

    struct Fixture {
        store: Arc<dyn RecordStore>,
        resolver: PermissionResolver,
        employee: UserId,
        manager: UserId,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::new());
        let catalog = Arc::new(
            RoleCatalog::from_roles(vec![
                Role::new("employee", 3, RoleScope::Operations)
                    .with_permissions(perms(&["view_own_bookings"])),
                Role::new("department_manager", 5, RoleScope::Department)
                    .with_permissions(perms(&["approve_team_bookings"]))
                    .inheriting("employee")
                    .delegatable(),
            ])
            .unwrap(),
        );

        let employee = UserId::new();
        let manager = UserId::new();
        store
            .save_typed(&User::new(employee, "u1", "employee"))
            .unwrap();
        store
            .save_typed(&User::new(manager, "m1", "department_manager"))
            .unwrap();

        Fixture {
            store: store.clone(),
            resolver: PermissionResolver::new(store, catalog),
            employee,
            manager,
        }
    }

    fn override_record(
        user_id: UserId,
        override_type: OverrideType,
        permission: &'static str,
        context: Option<ContextId>,
        severity: OverrideSeverity,
        expires_at: Option<DateTime<Utc>>,
    ) -> PermissionOverride {
        PermissionOverride {
            id: OverrideId::new(),
            user_id,
            override_type,
            permission: Permission::new(permission),
            context,
            reason: "test".to_string(),
            granted_by: UserId::new(),
            created_at: Utc::now(),
            expires_at,
            severity,
            elevation_id: None,
        }
    }

    fn delegation_record(
        delegator_id: UserId,
        delegate_id: UserId,
        permissions: PermissionSet,
        context: Option<ContextId>,
        expires_at: Option<DateTime<Utc>>,
    ) -> PermissionDelegation {
        PermissionDelegation {
            id: DelegationId::new(),
            delegator_id,
            delegate_id,
            permissions,
            delegation_type: DelegationType::Temporary,
            context,
            reason: "test".to_string(),
            created_at: Utc::now(),
            expires_at,
            status: DelegationStatus::Active,
            revoked_by: None,
            revoked_at: None,
            revocation_reason: None,
        }
    }

    #[test]
    fn role_inheritance_grants_and_denies() {
        let f = fixture();
        let now = Utc::now();

        assert!(
            f.resolver
                .has_permission(f.manager, &Permission::new("view_own_bookings"), None, now)
                .unwrap()
        );
        assert!(
            !f.resolver
                .has_permission(f.employee, &Permission::new(MANAGE_FLEET), None, now)
                .unwrap()
        );
    }

    #[test]
    fn unknown_user_denies_with_not_found() {
        let f = fixture();
        let err = f
            .resolver
            .has_permission(UserId::new(), &Permission::new(MANAGE_FLEET), None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, AccessError::NotFound(_)));
    }

    #[test]
    fn inactive_user_denies_without_error() {
        let f = fixture();
        let inactive = UserId::new();
        f.store
            .save_typed(&User::new(inactive, "ghost", "employee").inactive())
            .unwrap();

        assert!(
            !f.resolver
                .has_permission(inactive, &Permission::new("view_own_bookings"), None, Utc::now())
                .unwrap()
        );
    }

    #[test]
    fn deny_override_beats_role_grant_and_emergency() {
        let f = fixture();
        let now = Utc::now();
        let permission = Permission::new("view_own_bookings");

        // Emergency + grant override + role all say yes; one deny wins.
        f.store
            .save_typed(&override_record(
                f.employee,
                OverrideType::Grant,
                "view_own_bookings",
                None,
                OverrideSeverity::Critical,
                None,
            ))
            .unwrap();
        f.store
            .save_typed(&override_record(
                f.employee,
                OverrideType::Deny,
                "view_own_bookings",
                None,
                OverrideSeverity::Normal,
                None,
            ))
            .unwrap();

        assert!(!f.resolver.has_permission(f.employee, &permission, None, now).unwrap());
        assert!(
            !f.resolver
                .effective_permissions(f.employee, None, now)
                .unwrap()
                .contains(&permission)
        );
    }

    #[test]
    fn wildcard_deny_empties_the_effective_set() {
        let f = fixture();
        let now = Utc::now();

        f.store
            .save_typed(&override_record(
                f.manager,
                OverrideType::Deny,
                "*",
                None,
                OverrideSeverity::Normal,
                None,
            ))
            .unwrap();

        assert!(
            f.resolver
                .effective_permissions(f.manager, None, now)
                .unwrap()
                .is_empty()
        );
        assert!(
            !f.resolver
                .has_permission(f.manager, &Permission::new("approve_team_bookings"), None, now)
                .unwrap()
        );
    }

    #[test]
    fn emergency_elevation_ignores_requested_context() {
        let f = fixture();
        let now = Utc::now();
        let permission = Permission::new(MANAGE_FLEET);

        f.store
            .save_typed(&override_record(
                f.employee,
                OverrideType::Grant,
                MANAGE_FLEET,
                Some(ContextId::EMERGENCY),
                OverrideSeverity::Critical,
                Some(now + Duration::hours(4)),
            ))
            .unwrap();

        let dept = ContextId::new("dept:fleet");
        assert!(f.resolver.has_permission(f.employee, &permission, Some(&dept), now).unwrap());
        assert!(f.resolver.has_permission(f.employee, &permission, None, now).unwrap());
    }

    #[test]
    fn scoped_grant_override_applies_only_in_its_context() {
        let f = fixture();
        let now = Utc::now();
        let permission = Permission::new(MANAGE_FLEET);
        let dept = ContextId::new("dept:fleet");

        f.store
            .save_typed(&override_record(
                f.employee,
                OverrideType::Grant,
                MANAGE_FLEET,
                Some(dept.clone()),
                OverrideSeverity::Normal,
                None,
            ))
            .unwrap();

        assert!(f.resolver.has_permission(f.employee, &permission, Some(&dept), now).unwrap());
        assert!(!f.resolver.has_permission(f.employee, &permission, None, now).unwrap());
        assert!(
            !f.resolver
                .has_permission(f.employee, &permission, Some(&ContextId::new("dept:sales")), now)
                .unwrap()
        );
    }

    #[test]
    fn delegation_expiry_is_lazy_and_boundary_consistent() {
        let f = fixture();
        let expires_at = Utc::now() + Duration::hours(24);
        let permission = Permission::new("approve_team_bookings");

        f.store
            .save_typed(&delegation_record(
                f.manager,
                f.employee,
                perms(&["approve_team_bookings"]),
                None,
                Some(expires_at),
            ))
            .unwrap();

        // Grants strictly before the boundary, denies at and after it.
        let just_before = expires_at - Duration::seconds(1);
        let just_after = expires_at + Duration::seconds(1);
        assert!(f.resolver.has_permission(f.employee, &permission, None, just_before).unwrap());
        assert!(!f.resolver.has_permission(f.employee, &permission, None, expires_at).unwrap());
        assert!(!f.resolver.has_permission(f.employee, &permission, None, just_after).unwrap());
    }

    #[test]
    fn revoked_delegation_is_immediately_dead() {
        let f = fixture();
        let now = Utc::now();
        let permission = Permission::new("approve_team_bookings");

        let mut delegation = delegation_record(
            f.manager,
            f.employee,
            perms(&["approve_team_bookings"]),
            None,
            None,
        );
        f.store.save_typed(&delegation).unwrap();
        assert!(f.resolver.has_permission(f.employee, &permission, None, now).unwrap());

        delegation.status = DelegationStatus::Revoked;
        f.store.save_typed(&delegation).unwrap();
        assert!(!f.resolver.has_permission(f.employee, &permission, None, now).unwrap());
    }

    #[test]
    fn runtime_cycle_is_inconsistent_never_a_grant() {
        let store: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::new());
        let catalog = Arc::new(RoleCatalog::from_roles_unvalidated(vec![
            Role::new("a", 1, RoleScope::Public)
                .with_permissions(perms(&["view_own_bookings"]))
                .inheriting("b"),
            Role::new("b", 2, RoleScope::Public).inheriting("a"),
        ]));
        let resolver = PermissionResolver::new(store.clone(), catalog);

        let user = UserId::new();
        store.save_typed(&User::new(user, "u", "a")).unwrap();

        let err = resolver
            .has_permission(user, &Permission::new("view_own_bookings"), None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, AccessError::Inconsistent(_)));

        let err = resolver.effective_permissions(user, None, Utc::now()).unwrap_err();
        assert!(matches!(err, AccessError::Inconsistent(_)));
    }

    #[test]
    fn explanation_names_the_deciding_source() {
        let f = fixture();
        let now = Utc::now();

        let by_role = f
            .resolver
            .explain_permission(f.manager, &Permission::new("approve_team_bookings"), None, now)
            .unwrap();
        assert!(by_role.granted);
        assert_eq!(by_role.source, Some(DecisionSource::RoleInheritance));

        f.store
            .save_typed(&override_record(
                f.manager,
                OverrideType::Deny,
                "approve_team_bookings",
                None,
                OverrideSeverity::Normal,
                None,
            ))
            .unwrap();

        let denied = f
            .resolver
            .explain_permission(f.manager, &Permission::new("approve_team_bookings"), None, now)
            .unwrap();
        assert!(!denied.granted);
        assert_eq!(denied.source, Some(DecisionSource::DenyOverride));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: a matching active deny override forces a denial no
        /// matter which combination of grant sources also matches.
        #[test]
        fn deny_always_wins(
            role_grants in any::<bool>(),
            delegation_grants in any::<bool>(),
            override_grants in any::<bool>(),
            emergency_grants in any::<bool>(),
        ) {
            let store: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::new());
            let base = if role_grants {
                perms(&[MANAGE_FLEET])
            } else {
                PermissionSet::new()
            };
            let catalog = Arc::new(
                RoleCatalog::from_roles(vec![
                    Role::new("employee", 3, RoleScope::Operations).with_permissions(base),
                ])
                .unwrap(),
            );
            let resolver = PermissionResolver::new(store.clone(), catalog);

            let user = UserId::new();
            let delegator = UserId::new();
            store.save_typed(&User::new(user, "u", "employee")).unwrap();

            if delegation_grants {
                store
                    .save_typed(&delegation_record(
                        delegator,
                        user,
                        perms(&[MANAGE_FLEET]),
                        None,
                        None,
                    ))
                    .unwrap();
            }
            if override_grants {
                store
                    .save_typed(&override_record(
                        user,
                        OverrideType::Grant,
                        MANAGE_FLEET,
                        None,
                        OverrideSeverity::Normal,
                        None,
                    ))
                    .unwrap();
            }
            if emergency_grants {
                store
                    .save_typed(&override_record(
                        user,
                        OverrideType::Grant,
                        MANAGE_FLEET,
                        None,
                        OverrideSeverity::Critical,
                        None,
                    ))
                    .unwrap();
            }
            store
                .save_typed(&override_record(
                    user,
                    OverrideType::Deny,
                    MANAGE_FLEET,
                    None,
                    OverrideSeverity::Normal,
                    None,
                ))
                .unwrap();

            let now = Utc::now();
            let permission = Permission::new(MANAGE_FLEET);
            prop_assert!(!resolver.has_permission(user, &permission, None, now).unwrap());
            prop_assert!(
                !resolver
                    .effective_permissions(user, None, now)
                    .unwrap()
                    .contains(&permission)
            );
        }

        /// Property: expiry boundaries are exact for any offset.
        #[test]
        fn expiry_boundary_is_exact(offset_secs in 1i64..86_400) {
            let f = fixture();
            let expires_at = Utc::now() + Duration::hours(1);
            let permission = Permission::new("approve_team_bookings");

            f.store
                .save_typed(&delegation_record(
                    f.manager,
                    f.employee,
                    perms(&["approve_team_bookings"]),
                    None,
                    Some(expires_at),
                ))
                .unwrap();

            let before = expires_at - Duration::seconds(offset_secs);
            let after = expires_at + Duration::seconds(offset_secs);
            prop_assert!(f.resolver.has_permission(f.employee, &permission, None, before).unwrap());
            prop_assert!(!f.resolver.has_permission(f.employee, &permission, None, expires_at).unwrap());
            prop_assert!(!f.resolver.has_permission(f.employee, &permission, None, after).unwrap());
        }
    }
}
