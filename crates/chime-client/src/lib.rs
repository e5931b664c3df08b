//! Schedule management facade for Chime.
//!
//! Thin translation layer between callers and the schedule entity: each
//! call becomes an operation against the schedule actor, and reads decode
//! the actor's durable state into a [`ScheduleDescription`]. No scheduling
//! logic lives here.

mod client;
mod error;
mod types;

pub use client::ScheduleClient;
pub use error::ClientError;
pub use types::{CreateScheduleOptions, ListFilter, ScheduleDescription, SchedulePage};
