//! Durable signal/entity substrate boundary for Chime.
//!
//! This crate defines the interfaces the schedule actor and the dispatch
//! loop consume:
//! - at-least-once, optionally delayed delivery of named operations to
//!   named stateful entities,
//! - durable per-entity state with single-writer semantics,
//! - a work-item queue with lease/complete/abandon/release,
//! - an abstracted clock so time-based logic is testable.
//!
//! `MemorySubstrate` is a deterministic in-memory implementation used by
//! tests and local embedding. A production deployment substitutes a real
//! durable engine behind the same traits.

mod clock;
mod error;
mod memory;
mod substrate;

pub use clock::{Clock, SimulatedClock, SystemClock};
pub use error::{EntityError, SubstrateError};
pub use memory::{MemorySubstrate, StartedJob};
pub use substrate::{
    EntityClient, EntityHandler, EntityId, EntityPage, JobStart, OperationContext, Signal,
    WorkItem, WorkQueue,
};
