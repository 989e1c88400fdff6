use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by a collaborator service handler.
///
/// Transient failures are retried within the subtask's retry budget;
/// permanent ones mark the subtask failed immediately.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("transient collaborator failure: {0}")]
    Transient(String),

    #[error("collaborator rejected request: {0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, HandlerError::Transient(_))
    }
}

/// Per-service personal-data handler.
///
/// Both operations are required to be idempotent: re-invoking erase for an
/// already-erased subject is a no-op success, so retries after a partial
/// failure are safe.
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Stable service name, used as the export section key and the subtask
    /// identifier within a case.
    fn name(&self) -> &str;

    /// Export every record held for the subject as an opaque payload.
    async fn export_subject(&self, subject_id: &str) -> Result<Vec<u8>, HandlerError>;

    /// Erase every record held for the subject.
    async fn erase_subject(&self, subject_id: &str) -> Result<(), HandlerError>;
}
