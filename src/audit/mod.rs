use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::error;
use uuid::Uuid;

use crate::domain::case::{CaseId, CaseStatus, RightsOperation, SubtaskState};
use crate::domain::decision::Effect;

/// What an audit entry records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent {
    /// One access decision, whether freshly computed or served from cache.
    Decision {
        effect: Effect,
        rule_id: String,
        resource_type: String,
        action: String,
        consulted_keys: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
        policy_version: String,
        cache_hit: bool,
    },
    CaseOpened {
        case_id: CaseId,
        subject_id: String,
        operation: RightsOperation,
    },
    CaseClosed {
        case_id: CaseId,
        status: CaseStatus,
    },
    SubtaskOutcome {
        case_id: CaseId,
        service: String,
        state: SubtaskState,
        attempts: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Append-only audit record. Entries are never updated or deleted here;
/// compliance tooling consumes them downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub recorded_at: DateTime<Utc>,
    /// Acting principal (user id of the requester, or "system").
    pub actor: String,
    pub event: AuditEvent,
}

impl AuditEntry {
    pub fn new(actor: impl Into<String>, event: AuditEvent) -> Self {
        AuditEntry {
            id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            actor: actor.into(),
            event,
        }
    }
}

/// Append-only audit sink.
///
/// Recording is infallible from the caller's view: a sink that cannot
/// persist must log and drop rather than fail the decision path.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

/// In-memory sink for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        MemoryAuditSink::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: AuditEntry) {
        self.entries.lock().push(entry);
    }
}

/// File-backed sink: one JSON object per line, append + flush per entry.
pub struct JsonlAuditSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlAuditSink {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(JsonlAuditSink {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, entry: AuditEntry) {
        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "failed to serialize audit entry");
                return;
            }
        };

        let mut writer = self.writer.lock();
        if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
            error!(error = %e, "failed to append audit entry");
        }
    }
}
