//! `tourdesk-audit` — immutable compliance-audit trail.
//!
//! Captures every mutating operation and every single-record read of a
//! sensitive class, resolves the acting user, and persists entries without
//! blocking the triggering operation. Audit entries are never updated or
//! deleted through this crate's surface.

pub mod actor;
pub mod audited;
pub mod diff;
pub mod entry;
pub mod recorder;
pub mod reporter;
pub mod writer;

pub use actor::{
    Actor, ActorSource, AuthenticatedCaller, PropagatedIdentity, RequestEnv, TrustHeaders,
    resolve_actor,
};
pub use audited::AuditedStore;
pub use entry::{
    AUDIT_LOG_CLASS, AuditAction, AuditLogEntry, AuditMetadata, AuditSeverity, RequestMeta,
};
pub use recorder::{AuditConfig, AuditRecorder};
pub use reporter::{
    AuditStatistics, ComplianceFramework, ComplianceReport, ComplianceReporter, ReportFormat,
    TimeFrame,
};
pub use writer::{AuditWriter, AuditWriterConfig, AuditWriterHandle, WriterStats};
