//! The access service facade.
//!
//! Wires the resolver, managers, recorder and reporter together over one
//! record store. Each operation resolves the acting user from the request
//! environment (never from ambient state), stamps `Utc::now()`, and maps
//! errors per the boundary policy.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use tourdesk_audit::{
    Actor, AuditConfig, AuditRecorder, AuditWriter, AuditWriterConfig, AuditWriterHandle,
    AuditedStore, ComplianceReporter, RequestEnv, resolve_actor,
};
use tourdesk_authz::{
    ContextId, ContextSwitchManager, DelegationManager, ElevationPolicy, OverrideManager,
    Permission, PermissionResolver, PermissionSet, RoleCatalog,
};
use tourdesk_core::UserId;
use tourdesk_store::RecordStore;

use crate::dto::*;
use crate::error::{ApiError, ApiResult};

/// Synchronous authorization & audit boundary.
pub struct AccessService {
    store: Arc<dyn RecordStore>,
    resolver: PermissionResolver,
    delegations: DelegationManager,
    overrides: OverrideManager,
    contexts: ContextSwitchManager,
    reporter: ComplianceReporter,
    recorder: Arc<AuditRecorder>,
}

impl AccessService {
    /// Build the full subsystem over a record store and a validated role
    /// catalog. Returns the service plus the audit writer handle the process
    /// owner shuts down on exit.
    pub fn new(
        store: Arc<dyn RecordStore>,
        catalog: Arc<RoleCatalog>,
        audit_config: AuditConfig,
        elevation_policy: ElevationPolicy,
    ) -> (Self, AuditWriterHandle) {
        let (writer, handle) = AuditWriter::spawn(store.clone(), AuditWriterConfig::default());
        let recorder = Arc::new(AuditRecorder::new(writer, audit_config));
        let resolver = PermissionResolver::new(store.clone(), catalog);

        let service = Self {
            delegations: DelegationManager::new(store.clone(), resolver.clone(), recorder.clone()),
            overrides: OverrideManager::new(
                store.clone(),
                resolver.clone(),
                recorder.clone(),
                elevation_policy,
            ),
            contexts: ContextSwitchManager::new(store.clone(), resolver.clone(), recorder.clone()),
            reporter: ComplianceReporter::new(store.clone()),
            resolver,
            recorder,
            store,
        };
        (service, handle)
    }

    /// An audited view of the record store for business CRUD, bound to the
    /// request's resolved actor. All mutations and sensitive single reads
    /// through it land on the audit trail.
    pub fn audited_store(&self, env: &RequestEnv) -> AuditedStore<Arc<dyn RecordStore>> {
        let actor = resolve_actor(env, self.store.as_ref());
        AuditedStore::new(
            self.store.clone(),
            self.recorder.clone(),
            actor,
            env.request_meta(),
        )
    }

    // -------------------------
    // Permission checks
    // -------------------------

    pub fn check_permission(&self, req: CheckPermissionRequest) -> ApiResult<CheckPermissionResponse> {
        self.check_permission_at(req, Utc::now())
    }

    /// Clock-explicit variant; the public operation stamps `Utc::now()`.
    pub fn check_permission_at(
        &self,
        req: CheckPermissionRequest,
        now: DateTime<Utc>,
    ) -> ApiResult<CheckPermissionResponse> {
        let has_permission = self.resolver.has_permission(
            req.user_id,
            &Permission::new(req.permission),
            req.context.map(ContextId::new).as_ref(),
            now,
        )?;
        Ok(CheckPermissionResponse { has_permission })
    }

    pub fn get_effective_permissions(
        &self,
        req: EffectivePermissionsRequest,
    ) -> ApiResult<EffectivePermissionsResponse> {
        self.get_effective_permissions_at(req, Utc::now())
    }

    pub fn get_effective_permissions_at(
        &self,
        req: EffectivePermissionsRequest,
        now: DateTime<Utc>,
    ) -> ApiResult<EffectivePermissionsResponse> {
        let permissions = self.resolver.effective_permissions(
            req.user_id,
            req.context.map(ContextId::new).as_ref(),
            now,
        )?;
        Ok(EffectivePermissionsResponse {
            permissions: permission_names(&permissions),
        })
    }

    /// Operator diagnostic: which precedence source decides a check.
    /// Requires administrative authority, since this is exactly the detail
    /// ordinary denial responses must not leak.
    pub fn explain_permission(
        &self,
        env: &RequestEnv,
        req: ExplainPermissionRequest,
    ) -> ApiResult<ExplainPermissionResponse> {
        let now = Utc::now();
        let caller = self.require_user(env)?;
        if !self
            .resolver
            .has_permission(caller, &Permission::MANAGE_PERMISSIONS, None, now)?
        {
            return Err(ApiError::Forbidden);
        }

        let explanation = self.resolver.explain_permission(
            req.user_id,
            &Permission::new(req.permission),
            req.context.map(ContextId::new).as_ref(),
            now,
        )?;
        Ok(ExplainPermissionResponse { explanation })
    }

    // -------------------------
    // Delegations
    // -------------------------

    pub fn create_delegation(
        &self,
        env: &RequestEnv,
        req: CreateDelegationRequest,
    ) -> ApiResult<CreateDelegationResponse> {
        let now = Utc::now();
        let actor = resolve_actor(env, self.store.as_ref());

        let delegation_id = self.delegations.create_delegation(
            &actor,
            &env.request_meta(),
            req.delegator_id,
            req.delegate_id,
            permission_set(req.permissions),
            req.delegation_type,
            duration_from_secs(req.duration_secs)?,
            &req.reason,
            req.context.map(ContextId::new),
            now,
        )?;
        Ok(CreateDelegationResponse { delegation_id })
    }

    /// The revoking user is the authenticated caller.
    pub fn revoke_delegation(
        &self,
        env: &RequestEnv,
        req: RevokeDelegationRequest,
    ) -> ApiResult<RevokeDelegationResponse> {
        let now = Utc::now();
        let revoked_by = self.require_user(env)?;
        let actor = resolve_actor(env, self.store.as_ref());

        self.delegations.revoke_delegation(
            &actor,
            &env.request_meta(),
            req.delegation_id,
            revoked_by,
            &req.reason,
            now,
        )?;
        Ok(RevokeDelegationResponse { revoked: true })
    }

    pub fn list_active_delegations(&self, delegator_id: UserId) -> ApiResult<DelegationListResponse> {
        let delegations = self
            .delegations
            .list_active_delegations(delegator_id, Utc::now())?;
        Ok(DelegationListResponse { delegations })
    }

    pub fn list_delegated_permissions(&self, delegate_id: UserId) -> ApiResult<DelegationListResponse> {
        let delegations = self
            .delegations
            .list_delegated_permissions(delegate_id, Utc::now())?;
        Ok(DelegationListResponse { delegations })
    }

    // -------------------------
    // Overrides & elevations
    // -------------------------

    /// The granting user is the authenticated caller.
    pub fn create_override(
        &self,
        env: &RequestEnv,
        req: CreateOverrideRequest,
    ) -> ApiResult<CreateOverrideResponse> {
        let now = Utc::now();
        let granted_by = self.require_user(env)?;
        let actor = resolve_actor(env, self.store.as_ref());

        let override_id = self.overrides.create_override(
            &actor,
            &env.request_meta(),
            granted_by,
            req.user_id,
            req.override_type,
            Permission::new(req.permission),
            &req.reason,
            req.context.map(ContextId::new),
            req.expires_at,
            now,
        )?;
        Ok(CreateOverrideResponse { override_id })
    }

    pub fn create_emergency_elevation(
        &self,
        env: &RequestEnv,
        req: CreateEmergencyElevationRequest,
    ) -> ApiResult<CreateEmergencyElevationResponse> {
        let now = Utc::now();
        let elevated_by = self.require_user(env)?;
        let actor = resolve_actor(env, self.store.as_ref());

        let elevation = self.overrides.create_emergency_elevation(
            &actor,
            &env.request_meta(),
            elevated_by,
            req.user_id,
            permission_set(req.permissions),
            &req.reason,
            duration_from_secs(req.duration_secs)?,
            now,
        )?;
        Ok(CreateEmergencyElevationResponse {
            elevation_id: elevation.elevation_id,
            expires_at: elevation.expires_at,
        })
    }

    // -------------------------
    // Contexts
    // -------------------------

    pub fn get_available_contexts(&self, user_id: UserId) -> ApiResult<AvailableContextsResponse> {
        let contexts = self.contexts.available_contexts(user_id)?;
        Ok(AvailableContextsResponse { contexts })
    }

    pub fn switch_context(
        &self,
        env: &RequestEnv,
        req: SwitchContextRequest,
    ) -> ApiResult<SwitchContextResponse> {
        let now = Utc::now();
        let actor = resolve_actor(env, self.store.as_ref());

        let outcome = self.contexts.switch_context(
            &actor,
            &env.request_meta(),
            req.user_id,
            &ContextId::new(req.context_id),
            req.session_id,
            now,
        )?;
        Ok(SwitchContextResponse {
            previous_context: outcome.previous_context.map(|c| c.to_string()),
            applied_permissions: permission_names(&outcome.applied_permissions),
        })
    }

    // -------------------------
    // Compliance
    // -------------------------

    pub fn get_compliance_report(
        &self,
        req: ComplianceReportRequest,
    ) -> ApiResult<ComplianceReportResponse> {
        if req.end_date <= req.start_date {
            return Err(ApiError::BadRequest(
                "end_date must be after start_date".to_string(),
            ));
        }
        let report = self.reporter.generate_report(
            req.start_date,
            req.end_date,
            req.user_id,
            req.framework,
            req.include_metadata,
            req.format,
        )?;
        Ok(ComplianceReportResponse { report })
    }

    pub fn get_audit_statistics(
        &self,
        req: AuditStatisticsRequest,
    ) -> ApiResult<AuditStatisticsResponse> {
        let stats = self
            .reporter
            .audit_statistics(req.time_frame, req.framework, Utc::now())?;
        Ok(AuditStatisticsResponse { stats })
    }

    fn require_user(&self, env: &RequestEnv) -> ApiResult<UserId> {
        let actor: Actor = resolve_actor(env, self.store.as_ref());
        actor.user_id.ok_or(ApiError::Unauthenticated)
    }
}

fn permission_set(names: Vec<String>) -> PermissionSet {
    names.into_iter().map(Permission::new).collect()
}

fn permission_names(set: &PermissionSet) -> Vec<String> {
    set.iter().map(|p| p.as_str().to_string()).collect()
}

fn duration_from_secs(secs: Option<i64>) -> ApiResult<Option<Duration>> {
    match secs {
        None => Ok(None),
        Some(s) if s > 0 => Ok(Some(Duration::seconds(s))),
        Some(_) => Err(ApiError::BadRequest("duration must be positive".to_string())),
    }
}
