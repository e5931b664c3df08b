//! Recurring schedule actor for Chime.
//!
//! This crate implements the schedule state machine:
//! - versioned configuration with sparse, presence-tracked updates,
//! - an explicit lifecycle transition table (Uninitialized/Active/Paused),
//! - the token-guarded `run_tick` chain: each tick computes the next fire
//!   time, starts the target job when due, and schedules its own successor
//!   as a delayed self-signal,
//! - catch-up collapsing: missed interval boundaries are skipped, never
//!   replayed as a burst.
//!
//! Pause/update/resume regenerate the execution token so in-flight tick
//! signals from an older generation become no-ops; the substrate cannot
//! unschedule a pending delivery, so cancellation is logical.

mod config;
mod entity;
mod error;
mod state;

pub use config::{FieldPatch, PatchOutcome, ScheduleConfig, ScheduleConfigPatch};
pub use entity::{SCHEDULE_ENTITY_KIND, ScheduleEntity, TickSignal, ops};
pub use error::ScheduleError;
pub use state::{ScheduleState, ScheduleStatus, transition_allowed};
