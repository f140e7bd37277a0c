//! Compliance reporting over the audit trail.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use tourdesk_core::UserId;
use tourdesk_store::{Filter, RecordStore, StoreError, TypedStore};

use crate::entry::{AuditLogEntry, AuditMetadata, AuditSeverity};

/// Compliance framework a report is tagged with. A closed set so report
/// consumers never see a typo'd framework string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComplianceFramework {
    PciDss,
    Soc2,
    Gdpr,
}

/// How much of the trail the report carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Counts only.
    Summary,
    /// Counts plus the filtered raw entries.
    Detailed,
}

/// Rolling window for dashboard statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeFrame {
    Last7Days,
    Last30Days,
    Last90Days,
}

impl TimeFrame {
    pub fn days(&self) -> i64 {
        match self {
            Self::Last7Days => 7,
            Self::Last30Days => 30,
            Self::Last90Days => 90,
        }
    }
}

/// An audit entry as it appears inside a detailed report: metadata stripped
/// unless explicitly requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportedEntry {
    pub username: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub entity_name: Option<String>,
    pub changes: serde_json::Value,
    pub severity: AuditSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AuditMetadata>,
}

impl ReportedEntry {
    fn from_entry(entry: AuditLogEntry, include_metadata: bool) -> Self {
        Self {
            username: entry.username,
            action: entry.action.to_string(),
            entity_type: entry.entity_type,
            entity_id: entry.entity_id,
            entity_name: entry.entity_name,
            changes: entry.changes,
            severity: entry.severity,
            metadata: include_metadata.then_some(entry.metadata),
        }
    }
}

/// Framework-tagged aggregate over a time window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub framework: ComplianceFramework,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub user_id: Option<UserId>,
    pub total_entries: u64,
    pub by_action: BTreeMap<String, u64>,
    pub by_entity_type: BTreeMap<String, u64>,
    pub critical_entries: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<ReportedEntry>>,
}

/// Rolling-window statistics for dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStatistics {
    pub framework: ComplianceFramework,
    pub time_frame: TimeFrame,
    pub window_start: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub total_entries: u64,
    pub by_action: BTreeMap<String, u64>,
    pub by_entity_type: BTreeMap<String, u64>,
    pub critical_entries: u64,
}

/// Aggregates audit entries into reports and statistics.
///
/// The store contract only offers field-equality filters, so time-window and
/// user filtering happen in memory over the scanned class.
pub struct ComplianceReporter {
    store: Arc<dyn RecordStore>,
}

impl ComplianceReporter {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub fn generate_report(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        user_id: Option<UserId>,
        framework: ComplianceFramework,
        include_metadata: bool,
        format: ReportFormat,
    ) -> Result<ComplianceReport, StoreError> {
        let entries = self.scan(start, end, user_id)?;
        let (by_action, by_entity_type, critical) = tally(&entries);

        let total = entries.len() as u64;
        let detailed = match format {
            ReportFormat::Summary => None,
            ReportFormat::Detailed => Some(
                entries
                    .into_iter()
                    .map(|e| ReportedEntry::from_entry(e, include_metadata))
                    .collect(),
            ),
        };

        Ok(ComplianceReport {
            framework,
            start,
            end,
            user_id,
            total_entries: total,
            by_action,
            by_entity_type,
            critical_entries: critical,
            entries: detailed,
        })
    }

    pub fn audit_statistics(
        &self,
        time_frame: TimeFrame,
        framework: ComplianceFramework,
        now: DateTime<Utc>,
    ) -> Result<AuditStatistics, StoreError> {
        let window_start = now - Duration::days(time_frame.days());
        let entries = self.scan(window_start, now, None)?;
        let (by_action, by_entity_type, critical) = tally(&entries);

        Ok(AuditStatistics {
            framework,
            time_frame,
            window_start,
            generated_at: now,
            total_entries: entries.len() as u64,
            by_action,
            by_entity_type,
            critical_entries: critical,
        })
    }

    fn scan(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        user_id: Option<UserId>,
    ) -> Result<Vec<AuditLogEntry>, StoreError> {
        let mut entries: Vec<AuditLogEntry> = self.store.find_typed(&Filter::empty())?;
        entries.retain(|e| {
            e.metadata.timestamp >= start
                && e.metadata.timestamp < end
                && user_id.is_none_or(|u| e.user_id == Some(u))
        });
        entries.sort_by_key(|e| e.metadata.timestamp);
        Ok(entries)
    }
}

fn tally(entries: &[AuditLogEntry]) -> (BTreeMap<String, u64>, BTreeMap<String, u64>, u64) {
    let mut by_action = BTreeMap::new();
    let mut by_entity_type = BTreeMap::new();
    let mut critical = 0u64;

    for entry in entries {
        *by_action.entry(entry.action.to_string()).or_insert(0) += 1;
        *by_entity_type.entry(entry.entity_type.clone()).or_insert(0) += 1;
        if entry.severity == AuditSeverity::Critical {
            critical += 1;
        }
    }

    (by_action, by_entity_type, critical)
}
