use crate::progress::TaskStatus;
use crate::protocol::ProtocolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploaderError {
    #[error("No files to upload")]
    EmptyQueue,

    #[error("{0}")]
    SessionCreate(#[source] ProtocolError),

    #[error("Files were uploaded but could not be recorded: {0}")]
    SessionComplete(#[source] ProtocolError),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task {id} cannot be removed while {status:?}")]
    TaskNotRemovable { id: String, status: TaskStatus },

    #[error("Upload already in progress")]
    AlreadyRunning,

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// A collaborator panicked during the pass
    #[error("Unexpected upload failure: {0}")]
    Unhandled(String),
}

impl UploaderError {
    /// Bytes reached storage but the server never recorded them
    pub fn is_unreconciled(&self) -> bool {
        matches!(self, UploaderError::SessionComplete(_))
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, UploaderError::SessionCreate(e) if e.is_quota_exceeded())
    }
}

pub type UploaderResult<T> = Result<T, UploaderError>;
