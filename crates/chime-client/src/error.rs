//! Error types for the client facade.

use thiserror::Error;

use chime_substrate::{EntityError, SubstrateError};

/// Caller-visible failures of schedule management calls.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The schedule already exists; use update instead.
    #[error("schedule already exists: {0}")]
    AlreadyExists(String),

    /// No such schedule.
    #[error("schedule not found: {0}")]
    NotFound(String),

    /// The schedule's lifecycle state does not allow the operation.
    #[error("invalid schedule state: {0}")]
    InvalidState(String),

    /// The supplied configuration was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Anything else from the substrate (delivery, serialization, paging).
    #[error(transparent)]
    Substrate(SubstrateError),
}

impl From<SubstrateError> for ClientError {
    fn from(err: SubstrateError) -> Self {
        match err {
            SubstrateError::Operation(EntityError::AlreadyExists(id)) => {
                ClientError::AlreadyExists(id)
            }
            SubstrateError::Operation(EntityError::NotFound(id)) => ClientError::NotFound(id),
            SubstrateError::Operation(EntityError::InvalidState { operation, status }) => {
                ClientError::InvalidState(format!("{operation} while {status}"))
            }
            SubstrateError::Operation(EntityError::InvalidConfiguration(msg)) => {
                ClientError::InvalidConfiguration(msg)
            }
            other => ClientError::Substrate(other),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Substrate(SubstrateError::Serialization(err))
    }
}
