//! Substrate traits and wire-adjacent value types.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use crate::{EntityError, SubstrateError};

/// Identity of a stateful entity: a kind (handler namespace) plus a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId {
    pub kind: String,
    pub key: String,
}

impl EntityId {
    pub fn new(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.key)
    }
}

/// A pending operation delivery to an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub entity_id: EntityId,
    pub operation: String,
    pub payload: Value,
    /// Earliest delivery time; `None` means deliver as soon as possible.
    pub deliver_at: Option<DateTime<Utc>>,
}

/// A request to enqueue a new job instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStart {
    pub job_name: String,
    pub input: Value,
    /// Explicit instance id; `None` lets the substrate mint one.
    pub instance_id: Option<String>,
}

/// A unit of job execution pulled by the dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Lease id for complete/abandon/release calls.
    pub id: String,
    pub job_name: String,
    pub instance_id: String,
    pub input: Value,
    /// Delivery attempt, starting at 1. Incremented on abandon.
    pub attempt: u32,
}

/// One page of an entity listing.
#[derive(Debug, Clone, Default)]
pub struct EntityPage {
    /// `(key, state)` pairs for entities of the requested kind.
    pub entities: Vec<(String, Value)>,
    /// Opaque token resuming the listing after this page; `None` at the end.
    pub continuation: Option<String>,
}

/// Client surface of the durable entity substrate.
#[async_trait]
pub trait EntityClient: Send + Sync {
    /// Invoke an operation and wait for its outcome.
    ///
    /// The operation runs serialized with every other operation against the
    /// same entity; its error (if any) surfaces to the caller.
    async fn call_entity(
        &self,
        entity_id: &EntityId,
        operation: &str,
        payload: Value,
    ) -> Result<(), SubstrateError>;

    /// Enqueue an operation for at-least-once, possibly delayed delivery.
    ///
    /// Fire-and-forget: delivery failures are handled by the substrate's
    /// redelivery, never reported here. A pending delivery cannot be
    /// unscheduled; invalidation must be logical (generation tokens).
    async fn signal_entity(&self, signal: Signal) -> Result<(), SubstrateError>;

    /// Point-in-time read of durable entity state.
    async fn get_entity_state(&self, entity_id: &EntityId)
    -> Result<Option<Value>, SubstrateError>;

    /// Remove an entity and its state. Removing an absent entity is a no-op.
    async fn delete_entity(&self, entity_id: &EntityId) -> Result<(), SubstrateError>;

    /// Page through entities of one kind, ordered by key.
    ///
    /// The continuation token is an exclusive lower bound on the key, so a
    /// listing resumes correctly even if the boundary entity has been
    /// deleted since the prior page.
    async fn list_entities(
        &self,
        kind: &str,
        page_size: usize,
        continuation: Option<String>,
    ) -> Result<EntityPage, SubstrateError>;
}

/// Work-item side of the substrate, consumed by the dispatch loop.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Enqueue a new job instance and return its instance id.
    ///
    /// An explicit `instance_id` is last-writer-wins: a queued item with the
    /// same id is replaced rather than duplicated.
    async fn start_job(&self, start: JobStart) -> Result<String, SubstrateError>;

    /// Blocking pull of the next work item.
    ///
    /// Waits until an item is available, `shutdown` flips to `true`, or the
    /// substrate reports a failure. Returns `None` on shutdown.
    async fn fetch_work_item(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<WorkItem>, SubstrateError>;

    /// Acknowledge successful execution; the item will not be redelivered.
    async fn complete_work_item(&self, item: &WorkItem) -> Result<(), SubstrateError>;

    /// Return the item for redelivery with an incremented attempt count.
    async fn abandon_work_item(&self, item: &WorkItem) -> Result<(), SubstrateError>;

    /// Release the item's lease. Best-effort; called after complete/abandon.
    async fn release_work_item_lock(&self, item: &WorkItem) -> Result<(), SubstrateError>;
}

/// Mutable view of one entity handed to an operation.
///
/// State writes and emitted effects (self-signals, job starts) are buffered
/// and committed only if the operation returns `Ok`; a failed operation
/// leaves the entity exactly as it was.
#[derive(Debug)]
pub struct OperationContext {
    entity_id: EntityId,
    state: Option<Value>,
    signals: Vec<Signal>,
    jobs: Vec<JobStart>,
}

impl OperationContext {
    /// Build a context over the entity's current durable state.
    pub fn new(entity_id: EntityId, state: Option<Value>) -> Self {
        Self {
            entity_id,
            state,
            signals: Vec::new(),
            jobs: Vec::new(),
        }
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    /// Deserialize the entity's durable state, if any.
    pub fn load_state<T: DeserializeOwned>(&self) -> Result<Option<T>, EntityError> {
        match &self.state {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| EntityError::Internal(format!("corrupt entity state: {e}"))),
            None => Ok(None),
        }
    }

    /// Stage a new durable state for commit.
    pub fn save_state<T: Serialize>(&mut self, state: &T) -> Result<(), EntityError> {
        self.state = Some(
            serde_json::to_value(state)
                .map_err(|e| EntityError::Internal(format!("unserializable state: {e}")))?,
        );
        Ok(())
    }

    /// Stage a signal to this same entity, optionally delayed.
    pub fn signal_self(&mut self, operation: &str, payload: Value, deliver_at: Option<DateTime<Utc>>) {
        self.signals.push(Signal {
            entity_id: self.entity_id.clone(),
            operation: operation.to_string(),
            payload,
            deliver_at,
        });
    }

    /// Stage a job start.
    pub fn start_job(&mut self, start: JobStart) {
        self.jobs.push(start);
    }

    /// Staged outbound signals (visible for tests and commit).
    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    /// Staged job starts (visible for tests and commit).
    pub fn jobs(&self) -> &[JobStart] {
        &self.jobs
    }

    /// Consume the context into `(state, signals, jobs)` for commit.
    pub fn into_parts(self) -> (Option<Value>, Vec<Signal>, Vec<JobStart>) {
        (self.state, self.signals, self.jobs)
    }
}

/// A stateful entity's operation handler.
///
/// The substrate guarantees operations against one entity id run serialized;
/// handlers therefore never need internal locking over entity state.
#[async_trait]
pub trait EntityHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &mut OperationContext,
        operation: &str,
        payload: Value,
    ) -> Result<(), EntityError>;
}
