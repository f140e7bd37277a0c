//! Audit entry construction and routing.

use std::collections::HashSet;

use chrono::Utc;
use serde_json::{Value as JsonValue, json};

use tourdesk_store::StoreError;

use crate::actor::Actor;
use crate::diff::scrub;
use crate::entry::{
    AUDIT_LOG_CLASS, AuditAction, AuditLogEntry, AuditMetadata, AuditSeverity, RequestMeta,
};
use crate::writer::AuditWriter;

/// Which classes get read-auditing and which are never audited at all.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Classes whose individual-record reads must be audited.
    pub sensitive_classes: HashSet<String>,
    /// Classes never audited (the log itself, session records): prevents
    /// recursion and noise.
    pub excluded_classes: HashSet<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        let sensitive = ["User", "Client", "PaymentProfile"];
        let excluded = [AUDIT_LOG_CLASS, crate::actor::SESSION_CLASS, "SessionContext"];

        Self {
            sensitive_classes: sensitive.iter().map(|s| s.to_string()).collect(),
            excluded_classes: excluded.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl AuditConfig {
    pub fn with_sensitive_class(mut self, class: impl Into<String>) -> Self {
        self.sensitive_classes.insert(class.into());
        self
    }

    pub fn with_excluded_class(mut self, class: impl Into<String>) -> Self {
        self.excluded_classes.insert(class.into());
        self
    }
}

/// Builds audit entries from trigger points and hands them to the writer.
pub struct AuditRecorder {
    writer: AuditWriter,
    config: AuditConfig,
}

impl AuditRecorder {
    pub fn new(writer: AuditWriter, config: AuditConfig) -> Self {
        Self { writer, config }
    }

    pub fn is_sensitive(&self, class: &str) -> bool {
        self.config.sensitive_classes.contains(class)
    }

    pub fn is_excluded(&self, class: &str) -> bool {
        self.config.excluded_classes.contains(class)
    }

    /// CREATE: the payload is the full created document, minus denylisted
    /// fields.
    pub fn record_create(
        &self,
        actor: &Actor,
        meta: &RequestMeta,
        class: &str,
        entity_id: &str,
        doc: &JsonValue,
    ) {
        let entry = self
            .build(actor, meta, AuditAction::Create, class, entity_id, scrub(doc))
            .with_entity_name(entity_name_of(doc));
        self.writer.enqueue(entry);
    }

    /// UPDATE: the payload is the dirty-field diff, or a generic marker when
    /// per-field diffing was unavailable at the trigger point.
    pub fn record_update(
        &self,
        actor: &Actor,
        meta: &RequestMeta,
        class: &str,
        entity_id: &str,
        changes: serde_json::Map<String, JsonValue>,
        doc: &JsonValue,
    ) {
        let payload = if changes.is_empty() {
            json!({"updated": true})
        } else {
            JsonValue::Object(changes)
        };

        let entry = self
            .build(actor, meta, AuditAction::Update, class, entity_id, payload)
            .with_entity_name(entity_name_of(doc));
        self.writer.enqueue(entry);
    }

    /// DELETE: recorded before the record is removed, payload is the full
    /// pre-deletion document minus denylisted fields.
    pub fn record_delete(
        &self,
        actor: &Actor,
        meta: &RequestMeta,
        class: &str,
        entity_id: &str,
        doc: &JsonValue,
    ) {
        let entry = self
            .build(actor, meta, AuditAction::Delete, class, entity_id, scrub(doc))
            .with_entity_name(entity_name_of(doc));
        self.writer.enqueue(entry);
    }

    /// READ of exactly one record of a sensitive class.
    pub fn record_read(
        &self,
        actor: &Actor,
        meta: &RequestMeta,
        class: &str,
        entity_id: &str,
        doc: &JsonValue,
    ) {
        let entry = self
            .build(actor, meta, AuditAction::Read, class, entity_id, json!({"accessed": true}))
            .with_entity_name(entity_name_of(doc));
        self.writer.enqueue(entry);
    }

    /// Authorization-lifecycle action (delegation, override, context switch),
    /// fire-and-forget.
    pub fn record_action(
        &self,
        actor: &Actor,
        meta: &RequestMeta,
        action: AuditAction,
        entity_type: &str,
        entity_id: &str,
        payload: JsonValue,
    ) {
        let entry = self.build(actor, meta, action, entity_type, entity_id, payload);
        self.writer.enqueue(entry);
    }

    /// Critical-severity action whose audit write must be confirmed before
    /// the triggering call returns. Never suppressed, rate-limited or
    /// batched.
    pub fn record_action_sync(
        &self,
        actor: &Actor,
        meta: &RequestMeta,
        action: AuditAction,
        entity_type: &str,
        entity_id: &str,
        payload: JsonValue,
    ) -> Result<(), StoreError> {
        let entry = self
            .build(actor, meta, action, entity_type, entity_id, payload)
            .with_severity(AuditSeverity::Critical);
        self.writer.write_sync(&entry)
    }

    fn build(
        &self,
        actor: &Actor,
        meta: &RequestMeta,
        action: AuditAction,
        entity_type: &str,
        entity_id: &str,
        payload: JsonValue,
    ) -> AuditLogEntry {
        AuditLogEntry::new(
            actor.user_id,
            actor.username.clone(),
            action,
            entity_type,
            entity_id,
            payload,
            AuditMetadata::from_request(meta, Utc::now()),
        )
    }
}

/// Best-effort human label for the touched record.
fn entity_name_of(doc: &JsonValue) -> Option<String> {
    for field in ["name", "username", "title", "label"] {
        if let Some(value) = doc.get(field).and_then(|v| v.as_str()) {
            return Some(value.to_string());
        }
    }
    None
}
