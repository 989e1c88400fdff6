use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Unique rights-case identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(pub Uuid);

impl CaseId {
    pub fn new() -> Self {
        CaseId(Uuid::new_v4())
    }
}

impl Default for CaseId {
    fn default() -> Self {
        CaseId::new()
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Data-subject-rights operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RightsOperation {
    Export,
    Erase,
}

impl RightsOperation {
    /// Action type used when authorizing the case.
    pub fn action_type(&self) -> &'static str {
        match self {
            RightsOperation::Export => "export",
            RightsOperation::Erase => "erase",
        }
    }
}

impl fmt::Display for RightsOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RightsOperation::Export => write!(f, "EXPORT"),
            RightsOperation::Erase => write!(f, "ERASE"),
        }
    }
}

/// Lifecycle of a rights case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    Pending,
    Authorizing,
    InProgress,
    Completed,
    PartiallyFailed,
    Denied,
}

impl CaseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CaseStatus::Completed | CaseStatus::PartiallyFailed | CaseStatus::Denied
        )
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CaseStatus::Pending => "PENDING",
            CaseStatus::Authorizing => "AUTHORIZING",
            CaseStatus::InProgress => "IN_PROGRESS",
            CaseStatus::Completed => "COMPLETED",
            CaseStatus::PartiallyFailed => "PARTIALLY_FAILED",
            CaseStatus::Denied => "DENIED",
        };
        f.write_str(s)
    }
}

/// Per-collaborator subtask state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubtaskState {
    Pending,
    Ok,
    Failed,
}

/// Outcome record for one collaborator service within a case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskRecord {
    pub service: String,
    pub state: SubtaskState,
    /// Attempts consumed so far, across retries of the case.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubtaskRecord {
    pub fn pending(service: impl Into<String>) -> Self {
        SubtaskRecord {
            service: service.into(),
            state: SubtaskState::Pending,
            attempts: 0,
            error: None,
        }
    }
}

/// Merged export payload, keyed by collaborator service name.
///
/// A failed subtask yields an entry in `missing` instead of a fabricated
/// section, so partial exports are explicit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportPayload {
    pub subject_id: String,
    pub sections: BTreeMap<String, Vec<u8>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

impl ExportPayload {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// One in-flight (or archived) export/erasure workflow for a data subject.
///
/// Owned exclusively by the orchestrator; callers observe it through
/// cloned snapshots from the case store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RightsCase {
    pub id: CaseId,
    pub subject_id: String,
    pub operation: RightsOperation,
    pub status: CaseStatus,
    pub subtasks: Vec<SubtaskRecord>,

    /// Set by cancellation; stops new subtask attempts from being scheduled.
    #[serde(default)]
    pub cancelled: bool,

    /// Deciding rule id when the case was denied at authorization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denied_by: Option<String>,

    /// Export result, present once an export case leaves IN_PROGRESS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<ExportPayload>,

    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl RightsCase {
    pub fn new(
        subject_id: impl Into<String>,
        operation: RightsOperation,
        services: impl IntoIterator<Item = String>,
    ) -> Self {
        RightsCase {
            id: CaseId::new(),
            subject_id: subject_id.into(),
            operation,
            status: CaseStatus::Pending,
            subtasks: services.into_iter().map(SubtaskRecord::pending).collect(),
            cancelled: false,
            denied_by: None,
            export: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn subtask(&self, service: &str) -> Option<&SubtaskRecord> {
        self.subtasks.iter().find(|s| s.service == service)
    }

    pub fn subtask_mut(&mut self, service: &str) -> Option<&mut SubtaskRecord> {
        self.subtasks.iter_mut().find(|s| s.service == service)
    }

    /// Terminal status implied by the current subtask outcomes.
    pub fn implied_outcome(&self) -> CaseStatus {
        if self
            .subtasks
            .iter()
            .all(|s| s.state == SubtaskState::Ok)
        {
            CaseStatus::Completed
        } else {
            CaseStatus::PartiallyFailed
        }
    }
}
