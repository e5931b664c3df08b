//! Deterministic in-memory substrate.
//!
//! Used by tests and local embedding. Signals are held in a pending set and
//! delivered by [`MemorySubstrate::deliver_due`], so callers control exactly
//! how far "time" progresses between deliveries. Entity operations run
//! serialized per entity id, matching the single-writer guarantee a durable
//! engine provides.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Notify, watch};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::{
    Clock, EntityClient, EntityHandler, EntityId, EntityPage, JobStart, OperationContext, Signal,
    SubstrateError, WorkItem, WorkQueue,
};

/// Delivery passes before `deliver_due` gives up and reports a cycle.
const MAX_DELIVERY_PASSES: usize = 1_000;

/// Record of a job start, kept for observability and test assertions.
#[derive(Debug, Clone)]
pub struct StartedJob {
    pub job_name: String,
    pub instance_id: String,
    pub input: Value,
    pub started_at: DateTime<Utc>,
}

/// In-memory implementation of [`EntityClient`] and [`WorkQueue`].
pub struct MemorySubstrate {
    clock: Arc<dyn Clock>,
    handlers: DashMap<String, Arc<dyn EntityHandler>>,
    states: DashMap<String, Value>,
    entity_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    pending: Mutex<Vec<Signal>>,
    queue: Mutex<VecDeque<WorkItem>>,
    leases: DashMap<String, WorkItem>,
    started: Mutex<Vec<StartedJob>>,
    queue_notify: Notify,
    item_seq: AtomicU64,
}

impl MemorySubstrate {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            handlers: DashMap::new(),
            states: DashMap::new(),
            entity_locks: DashMap::new(),
            pending: Mutex::new(Vec::new()),
            queue: Mutex::new(VecDeque::new()),
            leases: DashMap::new(),
            started: Mutex::new(Vec::new()),
            queue_notify: Notify::new(),
            item_seq: AtomicU64::new(0),
        }
    }

    /// Register the operation handler for an entity kind.
    pub fn register_handler(&self, kind: impl Into<String>, handler: Arc<dyn EntityHandler>) {
        self.handlers.insert(kind.into(), handler);
    }

    /// Deliver every pending signal whose delivery time has been reached.
    ///
    /// Loops until no due signal remains, so immediate self-signals staged by
    /// a delivered operation are processed in the same call. Operation
    /// failures during delivery are logged and dropped; a durable engine
    /// would redeliver instead.
    pub async fn deliver_due(&self) {
        for _ in 0..MAX_DELIVERY_PASSES {
            let now = self.clock.now();
            let due: Vec<Signal> = {
                let mut pending = self.pending.lock().expect("pending lock poisoned");
                let mut due: Vec<Signal> = Vec::new();
                pending.retain(|signal| {
                    if signal.deliver_at.is_none_or(|at| at <= now) {
                        due.push(signal.clone());
                        false
                    } else {
                        true
                    }
                });
                due.sort_by_key(|s| s.deliver_at);
                due
            };

            if due.is_empty() {
                return;
            }

            for signal in due {
                if let Err(e) = self.invoke(&signal).await {
                    warn!(
                        entity_id = %signal.entity_id,
                        operation = %signal.operation,
                        error = %e,
                        "dropping failed signal delivery"
                    );
                }
            }
        }
        warn!("deliver_due exceeded {MAX_DELIVERY_PASSES} passes; pending signals remain");
    }

    /// Count of signals not yet delivered.
    pub fn pending_signals(&self) -> usize {
        self.pending.lock().expect("pending lock poisoned").len()
    }

    /// Every job started so far, in start order.
    pub fn started_jobs(&self) -> Vec<StartedJob> {
        self.started.lock().expect("started lock poisoned").clone()
    }

    /// Run one operation against an entity, serialized with its peers, and
    /// commit staged state/effects only on success.
    async fn invoke(&self, signal: &Signal) -> Result<(), SubstrateError> {
        let handler = self
            .handlers
            .get(&signal.entity_id.kind)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| SubstrateError::UnknownEntityKind(signal.entity_id.kind.clone()))?;

        let key = signal.entity_id.to_string();
        let lock = self
            .entity_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let state = self.states.get(&key).map(|s| s.value().clone());
        let mut ctx = OperationContext::new(signal.entity_id.clone(), state);
        handler
            .handle(&mut ctx, &signal.operation, signal.payload.clone())
            .await?;

        let (state, signals, jobs) = ctx.into_parts();
        if let Some(state) = state {
            self.states.insert(key, state);
        }
        for outbound in signals {
            trace!(
                entity_id = %outbound.entity_id,
                operation = %outbound.operation,
                deliver_at = ?outbound.deliver_at,
                "staging signal"
            );
            self.pending
                .lock()
                .expect("pending lock poisoned")
                .push(outbound);
        }
        for job in jobs {
            self.enqueue_job(job);
        }
        Ok(())
    }

    fn enqueue_job(&self, start: JobStart) -> String {
        let explicit = start.instance_id.is_some();
        let instance_id = start
            .instance_id
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let item = WorkItem {
            id: format!("wi-{}", self.item_seq.fetch_add(1, Ordering::Relaxed)),
            job_name: start.job_name.clone(),
            instance_id: instance_id.clone(),
            input: start.input.clone(),
            attempt: 1,
        };

        {
            let mut queue = self.queue.lock().expect("queue lock poisoned");
            if explicit {
                // Last-writer-wins for a repeated explicit instance id.
                queue.retain(|queued| queued.instance_id != instance_id);
            }
            queue.push_back(item);
        }
        self.started.lock().expect("started lock poisoned").push(StartedJob {
            job_name: start.job_name,
            instance_id: instance_id.clone(),
            input: start.input,
            started_at: self.clock.now(),
        });
        self.queue_notify.notify_waiters();
        debug!(instance_id = %instance_id, "job enqueued");
        instance_id
    }
}

#[async_trait]
impl EntityClient for MemorySubstrate {
    async fn call_entity(
        &self,
        entity_id: &EntityId,
        operation: &str,
        payload: Value,
    ) -> Result<(), SubstrateError> {
        self.invoke(&Signal {
            entity_id: entity_id.clone(),
            operation: operation.to_string(),
            payload,
            deliver_at: None,
        })
        .await
    }

    async fn signal_entity(&self, signal: Signal) -> Result<(), SubstrateError> {
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .push(signal);
        Ok(())
    }

    async fn get_entity_state(
        &self,
        entity_id: &EntityId,
    ) -> Result<Option<Value>, SubstrateError> {
        Ok(self
            .states
            .get(&entity_id.to_string())
            .map(|s| s.value().clone()))
    }

    async fn delete_entity(&self, entity_id: &EntityId) -> Result<(), SubstrateError> {
        let key = entity_id.to_string();
        self.states.remove(&key);
        self.entity_locks.remove(&key);
        // Pending signals for a deleted entity would hit an uninitialized
        // state on delivery; drop them here instead.
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .retain(|signal| signal.entity_id != *entity_id);
        Ok(())
    }

    async fn list_entities(
        &self,
        kind: &str,
        page_size: usize,
        continuation: Option<String>,
    ) -> Result<EntityPage, SubstrateError> {
        let prefix = format!("{kind}/");
        let mut keys: Vec<String> = self
            .states
            .iter()
            .filter_map(|entry| entry.key().strip_prefix(&prefix).map(str::to_string))
            .collect();
        keys.sort();

        // The token is an exclusive lower bound, not a live entity: if the
        // boundary entity was deleted between pages, resume at the insertion
        // point so the listing stays restartable.
        let start = match continuation {
            Some(token) => match keys.binary_search(&token) {
                Ok(idx) => idx + 1,
                Err(idx) => idx,
            },
            None => 0,
        };

        let page_keys: Vec<String> = keys.into_iter().skip(start).take(page_size).collect();
        let continuation = if page_keys.len() == page_size {
            page_keys.last().cloned()
        } else {
            None
        };

        let mut entities = Vec::with_capacity(page_keys.len());
        for key in page_keys {
            if let Some(state) = self.states.get(&format!("{prefix}{key}")) {
                entities.push((key, state.value().clone()));
            }
        }

        Ok(EntityPage {
            entities,
            continuation,
        })
    }
}

#[async_trait]
impl WorkQueue for MemorySubstrate {
    async fn start_job(&self, start: JobStart) -> Result<String, SubstrateError> {
        Ok(self.enqueue_job(start))
    }

    async fn fetch_work_item(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<WorkItem>, SubstrateError> {
        loop {
            if *shutdown.borrow() {
                return Ok(None);
            }

            // Arm the notification before checking the queue so an enqueue
            // between the check and the await is not lost.
            let notified = self.queue_notify.notified();

            let item = self.queue.lock().expect("queue lock poisoned").pop_front();
            if let Some(item) = item {
                self.leases.insert(item.id.clone(), item.clone());
                return Ok(Some(item));
            }

            tokio::select! {
                _ = shutdown.changed() => {}
                _ = notified => {}
            }
        }
    }

    async fn complete_work_item(&self, item: &WorkItem) -> Result<(), SubstrateError> {
        self.leases.remove(&item.id);
        Ok(())
    }

    async fn abandon_work_item(&self, item: &WorkItem) -> Result<(), SubstrateError> {
        self.leases.remove(&item.id);
        let mut requeued = item.clone();
        requeued.attempt += 1;
        self.queue
            .lock()
            .expect("queue lock poisoned")
            .push_back(requeued);
        self.queue_notify.notify_waiters();
        Ok(())
    }

    async fn release_work_item_lock(&self, item: &WorkItem) -> Result<(), SubstrateError> {
        self.leases.remove(&item.id);
        Ok(())
    }
}
