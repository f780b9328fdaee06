use thiserror::Error;
use super::types::{FileId, FileStatus};
use super::validation::ValidationError;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Cannot {action} file {id} in state {status}")]
    InvalidTransition {
        id: FileId,
        status: FileStatus,
        action: &'static str,
    },

    #[error("Queue is full: at most {max_files} files allowed")]
    QueueFull {
        max_files: usize,
    },

    #[error("Upload requires at least {min_files} pending file(s)")]
    NotEnoughFiles {
        min_files: usize,
    },

    #[error("Upload engine error: {0}")]
    Engine(String),

    #[error("Queue worker shut down")]
    ManagerShutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    pub fn invalid_transition(id: FileId, status: FileStatus, action: &'static str) -> Self {
        Self::InvalidTransition { id, status, action }
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

/// Error alias
pub type Result<T, E = QueueError> = std::result::Result<T, E>;
