//! Audit log entry model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use tourdesk_core::{AuditEntryId, UserId};
use tourdesk_store::{Record, RecordId};

/// Class name audit entries are stored under. Always excluded from auditing
/// itself (writing the log must not recurse into the log).
pub const AUDIT_LOG_CLASS: &str = "AuditLog";

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Read,
    ContextSwitched,
    PermissionDelegated,
    DelegationRevoked,
    OverrideCreated,
    EmergencyPermission,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Read => "READ",
            Self::ContextSwitched => "CONTEXT_SWITCHED",
            Self::PermissionDelegated => "PERMISSION_DELEGATED",
            Self::DelegationRevoked => "DELEGATION_REVOKED",
            Self::OverrideCreated => "OVERRIDE_CREATED",
            Self::EmergencyPermission => "EMERGENCY_PERMISSION",
        }
    }
}

impl core::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry severity. Critical entries (emergency elevations) must be written
/// synchronously and confirmed before the triggering call returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    #[default]
    Normal,
    Critical,
}

/// Request-scoped transport facts attached to every entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMeta {
    pub ip: Option<String>,
    pub method: Option<String>,
}

/// Entry metadata: transport facts plus the write timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditMetadata {
    pub ip: Option<String>,
    pub method: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditMetadata {
    pub fn from_request(meta: &RequestMeta, timestamp: DateTime<Utc>) -> Self {
        Self {
            ip: meta.ip.clone(),
            method: meta.method.clone(),
            timestamp,
        }
    }
}

/// One immutable audit trail entry.
///
/// `changes` is action-specific: a `{field: {from, to}}` map for UPDATE, the
/// full scrubbed document for CREATE/DELETE, `{"accessed": true}` for READ,
/// and an operation payload for the authorization actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: AuditEntryId,
    pub user_id: Option<UserId>,
    pub username: String,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    pub entity_name: Option<String>,
    pub changes: JsonValue,
    pub severity: AuditSeverity,
    pub metadata: AuditMetadata,
    pub active: bool,
    pub exists: bool,
}

impl AuditLogEntry {
    pub fn new(
        user_id: Option<UserId>,
        username: impl Into<String>,
        action: AuditAction,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        changes: JsonValue,
        metadata: AuditMetadata,
    ) -> Self {
        Self {
            id: AuditEntryId::new(),
            user_id,
            username: username.into(),
            action,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            entity_name: None,
            changes,
            severity: AuditSeverity::Normal,
            metadata,
            active: true,
            exists: true,
        }
    }

    pub fn with_entity_name(mut self, name: Option<String>) -> Self {
        self.entity_name = name;
        self
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }
}

impl Record for AuditLogEntry {
    const CLASS: &'static str = AUDIT_LOG_CLASS;

    fn record_id(&self) -> RecordId {
        RecordId::from(self.id)
    }
}
