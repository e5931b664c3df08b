//! Error types for the substrate boundary.

use thiserror::Error;

/// Failure vocabulary for entity operations.
///
/// Entities speak this taxonomy across the substrate boundary (status-code
/// style) so callers can react to operation outcomes without downcasting
/// through the delivery layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityError {
    /// The entity already holds a configuration; create is not applicable.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// No such entity, or the entity holds no configuration.
    #[error("not found: {0}")]
    NotFound(String),

    /// The requested lifecycle transition is not in the allowed table.
    #[error("invalid state for {operation}: {status}")]
    InvalidState { operation: String, status: String },

    /// The supplied configuration was rejected before any state mutation.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Unclassified operation failure.
    #[error("entity operation failed: {0}")]
    Internal(String),
}

/// Errors from the substrate itself (delivery, queues, state storage).
#[derive(Debug, Error)]
pub enum SubstrateError {
    /// An entity operation invoked via `call_entity` failed.
    #[error(transparent)]
    Operation(#[from] EntityError),

    /// No handler registered for the entity kind.
    #[error("no handler registered for entity kind: {0}")]
    UnknownEntityKind(String),

    /// Stored entity state or a signal payload failed to (de)serialize.
    #[error("state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transient substrate failure; safe to retry after a delay.
    #[error("transient substrate failure: {0}")]
    Transient(String),
}
