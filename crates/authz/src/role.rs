//! Role catalog: named roles with levels, base permissions and inheritance.
//!
//! Roles are owned by system configuration: the catalog is built once at
//! startup from seed documents and validated up front, so typos in role
//! names and inheritance cycles are caught at load time instead of during a
//! permission check.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::error;

use tourdesk_core::{AccessError, AccessResult};

use crate::permission::PermissionSet;

/// Role identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleName(String);

impl RoleName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RoleName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoleName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RoleName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Scope a role operates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleScope {
    System,
    Organization,
    Department,
    Operations,
    Public,
}

/// A named role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub name: RoleName,
    /// Position in the total order of roles. Levels are not required to be
    /// monotone along an inheritance chain.
    pub level: i32,
    pub scope: RoleScope,
    pub organization: Option<String>,
    pub base_permissions: PermissionSet,
    pub inherits_from: Option<RoleName>,
    pub delegatable: bool,
    /// Highest role level this role may delegate to (0 = unrestricted).
    pub max_delegation_level: i32,
    #[serde(default)]
    pub conditions: BTreeMap<String, JsonValue>,
    pub is_system_role: bool,
    pub active: bool,
}

impl Role {
    /// Minimal constructor for seeds and tests; everything else defaults.
    pub fn new(name: impl Into<RoleName>, level: i32, scope: RoleScope) -> Self {
        Self {
            name: name.into(),
            level,
            scope,
            organization: None,
            base_permissions: PermissionSet::new(),
            inherits_from: None,
            delegatable: false,
            max_delegation_level: 0,
            conditions: BTreeMap::new(),
            is_system_role: false,
            active: true,
        }
    }

    pub fn with_permissions(mut self, permissions: PermissionSet) -> Self {
        self.base_permissions = permissions;
        self
    }

    pub fn inheriting(mut self, parent: impl Into<RoleName>) -> Self {
        self.inherits_from = Some(parent.into());
        self
    }

    pub fn delegatable(mut self) -> Self {
        self.delegatable = true;
        self
    }

    pub fn with_max_delegation_level(mut self, level: i32) -> Self {
        self.max_delegation_level = level;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Statically validated role lookup table.
#[derive(Debug, Clone)]
pub struct RoleCatalog {
    roles: HashMap<RoleName, Role>,
}

impl RoleCatalog {
    /// Build and validate the catalog.
    ///
    /// Rejects duplicate names (`InvalidArgument`), dangling `inherits_from`
    /// targets and inheritance cycles (`Inconsistent`, logged: corrupted
    /// configuration, not a normal authorization outcome).
    pub fn from_roles(roles: Vec<Role>) -> AccessResult<Self> {
        let mut table: HashMap<RoleName, Role> = HashMap::with_capacity(roles.len());
        for role in roles {
            if table.contains_key(&role.name) {
                return Err(AccessError::invalid_argument(format!(
                    "duplicate role '{}'",
                    role.name
                )));
            }
            table.insert(role.name.clone(), role);
        }

        let catalog = Self { roles: table };

        for role in catalog.roles.values() {
            if let Some(parent) = &role.inherits_from {
                if !catalog.roles.contains_key(parent) {
                    error!(role = %role.name, parent = %parent, "role inherits from unknown role");
                    return Err(AccessError::inconsistent(format!(
                        "role '{}' inherits from unknown role '{}'",
                        role.name, parent
                    )));
                }
            }
            // Walking every chain at load time surfaces cycles before any
            // permission check can hit them.
            catalog.inheritance_chain(&role.name)?;
        }

        Ok(catalog)
    }

    /// Build the catalog from a seed document (a JSON array of roles).
    pub fn from_seed(seed: &JsonValue) -> AccessResult<Self> {
        let roles: Vec<Role> = serde_json::from_value(seed.clone()).map_err(|e| {
            AccessError::invalid_argument(format!("malformed role seed: {e}"))
        })?;
        Self::from_roles(roles)
    }

    /// Build without validation.
    ///
    /// Exists so tests can exercise the runtime cycle guard that protects
    /// against configuration edited behind the catalog's back.
    #[doc(hidden)]
    pub fn from_roles_unvalidated(roles: Vec<Role>) -> Self {
        Self {
            roles: roles.into_iter().map(|r| (r.name.clone(), r)).collect(),
        }
    }

    pub fn get(&self, name: &RoleName) -> Option<&Role> {
        self.roles.get(name)
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// The role and its ancestors, child first.
    ///
    /// A revisited name means a cycle: abort with `Inconsistent`. This must
    /// never silently grant (or loop forever).
    pub fn inheritance_chain(&self, name: &RoleName) -> AccessResult<Vec<&Role>> {
        let mut chain = Vec::new();
        let mut visited: HashSet<&RoleName> = HashSet::new();
        let mut current = Some(name);

        while let Some(role_name) = current {
            let role = self.roles.get(role_name).ok_or_else(|| {
                AccessError::not_found(format!("role '{role_name}' not in catalog"))
            })?;

            if !visited.insert(&role.name) {
                error!(role = %name, at = %role.name, "cyclic role inheritance detected");
                return Err(AccessError::inconsistent(format!(
                    "cyclic role inheritance at '{}'",
                    role.name
                )));
            }

            chain.push(role);
            current = role.inherits_from.as_ref();
        }

        Ok(chain)
    }

    /// Union of `base_permissions` along the inheritance chain.
    ///
    /// Inactive roles contribute nothing but do not break the chain.
    pub fn effective_base_permissions(&self, name: &RoleName) -> AccessResult<PermissionSet> {
        let mut permissions = PermissionSet::new();
        for role in self.inheritance_chain(name)? {
            if role.active {
                permissions.extend(&role.base_permissions);
            }
        }
        Ok(permissions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::Permission;

    fn perms(names: &[&'static str]) -> PermissionSet {
        names.iter().map(|n| Permission::new(*n)).collect()
    }

    #[test]
    fn permissions_union_up_the_chain() {
        let catalog = RoleCatalog::from_roles(vec![
            Role::new("employee", 3, RoleScope::Operations)
                .with_permissions(perms(&["view_own_bookings"])),
            Role::new("department_manager", 5, RoleScope::Department)
                .with_permissions(perms(&["approve_team_bookings"]))
                .inheriting("employee"),
        ])
        .unwrap();

        let effective = catalog
            .effective_base_permissions(&RoleName::new("department_manager"))
            .unwrap();
        assert!(effective.allows(&Permission::new("view_own_bookings")));
        assert!(effective.allows(&Permission::new("approve_team_bookings")));
    }

    #[test]
    fn cycle_is_rejected_at_load_time() {
        let err = RoleCatalog::from_roles(vec![
            Role::new("a", 1, RoleScope::Public).inheriting("b"),
            Role::new("b", 2, RoleScope::Public).inheriting("a"),
        ])
        .unwrap_err();

        assert!(matches!(err, AccessError::Inconsistent(_)));
    }

    #[test]
    fn self_cycle_is_rejected() {
        let err = RoleCatalog::from_roles(vec![
            Role::new("a", 1, RoleScope::Public).inheriting("a"),
        ])
        .unwrap_err();
        assert!(matches!(err, AccessError::Inconsistent(_)));
    }

    #[test]
    fn dangling_parent_is_inconsistent() {
        let err = RoleCatalog::from_roles(vec![
            Role::new("a", 1, RoleScope::Public).inheriting("ghost"),
        ])
        .unwrap_err();
        assert!(matches!(err, AccessError::Inconsistent(_)));
    }

    #[test]
    fn duplicate_role_is_invalid() {
        let err = RoleCatalog::from_roles(vec![
            Role::new("a", 1, RoleScope::Public),
            Role::new("a", 2, RoleScope::Public),
        ])
        .unwrap_err();
        assert!(matches!(err, AccessError::InvalidArgument(_)));
    }

    #[test]
    fn inactive_roles_contribute_nothing() {
        let catalog = RoleCatalog::from_roles(vec![
            Role::new("base", 1, RoleScope::Public)
                .with_permissions(perms(&["view_public_tours"]))
                .inactive(),
            Role::new("agent", 2, RoleScope::Operations)
                .with_permissions(perms(&["create_quotes"]))
                .inheriting("base"),
        ])
        .unwrap();

        let effective = catalog
            .effective_base_permissions(&RoleName::new("agent"))
            .unwrap();
        assert!(effective.allows(&Permission::new("create_quotes")));
        assert!(!effective.allows(&Permission::new("view_public_tours")));
    }

    #[test]
    fn unknown_role_is_not_found() {
        let catalog = RoleCatalog::from_roles(vec![]).unwrap();
        let err = catalog
            .effective_base_permissions(&RoleName::new("ghost"))
            .unwrap_err();
        assert!(matches!(err, AccessError::NotFound(_)));
    }

    #[test]
    fn catalog_loads_from_a_seed_document() {
        let seed = serde_json::json!([
            {
                "name": "employee",
                "level": 3,
                "scope": "operations",
                "organization": null,
                "base_permissions": ["view_own_bookings"],
                "inherits_from": null,
                "delegatable": false,
                "max_delegation_level": 0,
                "is_system_role": false,
                "active": true
            }
        ]);

        let catalog = RoleCatalog::from_seed(&seed).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(
            catalog
                .effective_base_permissions(&RoleName::new("employee"))
                .unwrap()
                .allows(&Permission::new("view_own_bookings"))
        );

        let err = RoleCatalog::from_seed(&serde_json::json!({"not": "an array"})).unwrap_err();
        assert!(matches!(err, AccessError::InvalidArgument(_)));
    }
}
