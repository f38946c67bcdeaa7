//! Queue errors

use thiserror::Error;

/// Errors returned by queue construction and shutdown
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// Deadline passed before the backlog drained
    #[error("graceful stop timed out with {pending} jobs still queued or running")]
    StopTimeout { pending: usize },

    /// Caller cancelled the stop before the backlog drained
    #[error("graceful stop cancelled with {pending} jobs still queued or running")]
    StopCancelled { pending: usize },

    /// Configuration rejected by validation
    #[error("invalid queue configuration: {0}")]
    InvalidConfig(String),

    /// Queue was built outside a tokio runtime
    #[error("queue must be created inside a tokio runtime")]
    NoRuntime,
}

impl QueueError {
    /// Check whether this error means the drain did not finish
    pub fn is_incomplete_stop(&self) -> bool {
        matches!(
            self,
            QueueError::StopTimeout { .. } | QueueError::StopCancelled { .. }
        )
    }
}
