//! Permission contexts and session context switching.
//!
//! A context is a named scope a user can be "inside" (a department, a
//! corporate tenant, the emergency scope). A user has at most one active
//! context per session; switching replaces the session's active context and
//! nothing is precomputed or cached across the switch. The resolver simply
//! sees the new context on its next evaluation.

use std::borrow::Cow;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;

use tourdesk_audit::{Actor, AuditAction, AuditRecorder, RequestMeta};
use tourdesk_core::{AccessError, AccessResult, SessionId, UserId};
use tourdesk_store::{Filter, Record, RecordId, RecordStore, TypedStore};

use crate::permission::PermissionSet;
use crate::resolver::PermissionResolver;
use crate::role::RoleName;
use crate::user::load_user;

/// Context identifier (e.g. `"dept:fleet"`, `"tenant:acme"`, `"emergency"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(Cow<'static, str>);

impl ContextId {
    /// The scope emergency elevations are granted in.
    pub const EMERGENCY: ContextId = ContextId(Cow::Borrowed("emergency"));

    pub fn new(id: impl Into<Cow<'static, str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ContextId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for ContextId {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

/// What kind of scope a context names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContextKind {
    Department,
    CorporateTenant,
    Emergency,
    Default,
}

/// A named permission scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionContext {
    pub id: ContextId,
    pub kind: ContextKind,
    /// Roles (anywhere in a user's inheritance chain) admitted to this
    /// context.
    #[serde(default)]
    pub allowed_roles: Vec<RoleName>,
    /// Explicit per-user grants; these bypass the organization constraint.
    #[serde(default)]
    pub allowed_user_ids: Vec<UserId>,
    /// When set, role-derived access additionally requires the user to be in
    /// this organization.
    pub organization: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, JsonValue>,
}

impl PermissionContext {
    pub fn new(id: impl Into<ContextId>, kind: ContextKind) -> Self {
        Self {
            id: id.into(),
            kind,
            allowed_roles: Vec::new(),
            allowed_user_ids: Vec::new(),
            organization: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn allowing_roles(mut self, roles: impl IntoIterator<Item = RoleName>) -> Self {
        self.allowed_roles.extend(roles);
        self
    }

    pub fn allowing_users(mut self, users: impl IntoIterator<Item = UserId>) -> Self {
        self.allowed_user_ids.extend(users);
        self
    }

    pub fn in_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }
}

impl Record for PermissionContext {
    const CLASS: &'static str = "PermissionContext";

    fn record_id(&self) -> RecordId {
        RecordId::new(self.id.as_str())
    }
}

/// The active context of one session. Excluded from auditing (the switch
/// itself is what gets audited, not the bookkeeping record).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub context_id: ContextId,
    pub switched_at: DateTime<Utc>,
}

impl Record for SessionContext {
    const CLASS: &'static str = "SessionContext";

    fn record_id(&self) -> RecordId {
        RecordId::from(self.session_id)
    }
}

/// Result of a successful context switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchOutcome {
    pub previous_context: Option<ContextId>,
    pub applied_permissions: PermissionSet,
}

/// Validates and performs context switches.
pub struct ContextSwitchManager {
    store: Arc<dyn RecordStore>,
    resolver: PermissionResolver,
    recorder: Arc<AuditRecorder>,
}

impl ContextSwitchManager {
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

    /// Contexts the user is authorized to enter: default contexts, explicit
    /// per-user grants, and role-admitted contexts within the user's
    /// organization.
    pub fn available_contexts(&self, user_id: UserId) -> AccessResult<Vec<PermissionContext>> {
        let user = load_user(self.store.as_ref(), user_id)?;
        let chain = self.resolver.catalog().inheritance_chain(&user.role)?;
        let chain_names: Vec<&RoleName> = chain.iter().map(|r| &r.name).collect();

        let contexts: Vec<PermissionContext> = self.store.find_typed(&Filter::empty())?;

        Ok(contexts
            .into_iter()
            .filter(|ctx| {
                if ctx.allowed_user_ids.contains(&user.id) {
                    return true;
                }
                if ctx.kind == ContextKind::Default {
                    return true;
                }

                let role_admitted = ctx
                    .allowed_roles
                    .iter()
                    .any(|allowed| chain_names.contains(&allowed));
                let org_ok = match &ctx.organization {
                    Some(org) => user.organization.as_deref() == Some(org.as_str()),
                    None => true,
                };
                role_admitted && org_ok
            })
            .collect())
    }

    /// Replace the session's active context.
    ///
    /// Fails with `Forbidden` when the target is not in the user's available
    /// set (including when it does not exist; existence is not leaked).
    pub fn switch_context(
        &self,
        actor: &Actor,
        meta: &RequestMeta,
        user_id: UserId,
        context_id: &ContextId,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> AccessResult<SwitchOutcome> {
        let available = self.available_contexts(user_id)?;
        if !available.iter().any(|ctx| &ctx.id == context_id) {
            return Err(AccessError::forbidden(format!(
                "context '{context_id}' not available to user {user_id}"
            )));
        }

        let previous = self
            .store
            .get_typed::<SessionContext>(&RecordId::from(session_id))?
            .map(|s| s.context_id);

        let session = SessionContext {
            session_id,
            user_id,
            context_id: context_id.clone(),
            switched_at: now,
        };
        self.store.save_typed(&session)?;

        let applied = self
            .resolver
            .effective_permissions(user_id, Some(context_id), now)?;

        self.recorder.record_action(
            actor,
            meta,
            AuditAction::ContextSwitched,
            SessionContext::CLASS,
            &session_id.to_string(),
            json!({
                "previous_context": &previous,
                "new_context": context_id,
                "user_id": user_id,
            }),
        );

        Ok(SwitchOutcome {
            previous_context: previous,
            applied_permissions: applied,
        })
    }

    /// The session's currently active context, if any.
    pub fn active_context(&self, session_id: SessionId) -> AccessResult<Option<ContextId>> {
        Ok(self
            .store
            .get_typed::<SessionContext>(&RecordId::from(session_id))?
            .map(|s| s.context_id))
    }
}
