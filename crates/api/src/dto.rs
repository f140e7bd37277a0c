//! Boundary request/response DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tourdesk_audit::{
    AuditStatistics, ComplianceFramework, ComplianceReport, ReportFormat, TimeFrame,
};
use tourdesk_authz::{
    DelegationType, OverrideType, PermissionContext, PermissionDelegation, PermissionExplanation,
};
use tourdesk_core::{DelegationId, OverrideId, SessionId, UserId};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CheckPermissionRequest {
    pub user_id: UserId,
    pub permission: String,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EffectivePermissionsRequest {
    pub user_id: UserId,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDelegationRequest {
    pub delegator_id: UserId,
    pub delegate_id: UserId,
    pub permissions: Vec<String>,
    pub delegation_type: DelegationType,
    pub reason: String,
    /// Converted to an absolute `expires_at`; `None` = standing.
    pub duration_secs: Option<i64>,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RevokeDelegationRequest {
    pub delegation_id: DelegationId,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOverrideRequest {
    pub user_id: UserId,
    pub override_type: OverrideType,
    pub permission: String,
    pub reason: String,
    pub context: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateEmergencyElevationRequest {
    pub user_id: UserId,
    pub permissions: Vec<String>,
    pub reason: String,
    pub duration_secs: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwitchContextRequest {
    pub user_id: UserId,
    pub context_id: String,
    pub session_id: SessionId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComplianceReportRequest {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub user_id: Option<UserId>,
    pub framework: ComplianceFramework,
    #[serde(default)]
    pub include_metadata: bool,
    pub format: ReportFormat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditStatisticsRequest {
    pub time_frame: TimeFrame,
    pub framework: ComplianceFramework,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExplainPermissionRequest {
    pub user_id: UserId,
    pub permission: String,
    pub context: Option<String>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Clone, Serialize)]
pub struct CheckPermissionResponse {
    pub has_permission: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EffectivePermissionsResponse {
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateDelegationResponse {
    pub delegation_id: DelegationId,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevokeDelegationResponse {
    pub revoked: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DelegationListResponse {
    pub delegations: Vec<PermissionDelegation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateOverrideResponse {
    pub override_id: OverrideId,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateEmergencyElevationResponse {
    pub elevation_id: OverrideId,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SwitchContextResponse {
    pub previous_context: Option<String>,
    pub applied_permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailableContextsResponse {
    pub contexts: Vec<PermissionContext>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReportResponse {
    pub report: ComplianceReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditStatisticsResponse {
    pub stats: AuditStatistics,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExplainPermissionResponse {
    pub explanation: PermissionExplanation,
}
