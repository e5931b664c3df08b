//! Error types for schedule operations.

use thiserror::Error;

use chime_substrate::EntityError;

use crate::ScheduleStatus;

/// Errors a schedule operation can surface to its caller.
///
/// All variants leave the schedule state unmodified; validation runs before
/// any mutation so failures are atomic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// Create called on a schedule that already has a configuration.
    #[error("schedule already exists: {0}")]
    AlreadyExists(String),

    /// Operation on a schedule with no configuration.
    #[error("schedule not found: {0}")]
    NotFound(String),

    /// Requested transition is not in the allowed table.
    #[error("invalid state for {operation}: {status}")]
    InvalidState {
        operation: String,
        status: ScheduleStatus,
    },

    /// Configuration rejected before any state mutation.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl From<ScheduleError> for EntityError {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::AlreadyExists(id) => EntityError::AlreadyExists(id),
            ScheduleError::NotFound(id) => EntityError::NotFound(id),
            ScheduleError::InvalidState { operation, status } => EntityError::InvalidState {
                operation,
                status: status.to_string(),
            },
            ScheduleError::InvalidConfiguration(msg) => EntityError::InvalidConfiguration(msg),
        }
    }
}
