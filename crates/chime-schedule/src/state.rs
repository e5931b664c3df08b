//! Durable schedule state and the lifecycle transition table.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ScheduleConfig, ScheduleError};

/// Lifecycle status of a schedule.
///
/// Deletion is not modeled here; a deleted schedule is an absent entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    #[default]
    Uninitialized,
    Active,
    Paused,
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScheduleStatus::Uninitialized => "uninitialized",
            ScheduleStatus::Active => "active",
            ScheduleStatus::Paused => "paused",
        };
        f.write_str(s)
    }
}

/// Allowed lifecycle transitions. Self-transitions cover in-place update.
const ALLOWED_TRANSITIONS: &[(ScheduleStatus, ScheduleStatus)] = &[
    (ScheduleStatus::Uninitialized, ScheduleStatus::Active),
    (ScheduleStatus::Active, ScheduleStatus::Paused),
    (ScheduleStatus::Paused, ScheduleStatus::Active),
    (ScheduleStatus::Active, ScheduleStatus::Active),
    (ScheduleStatus::Paused, ScheduleStatus::Paused),
];

/// Whether `from -> to` is in the transition table.
pub fn transition_allowed(from: ScheduleStatus, to: ScheduleStatus) -> bool {
    ALLOWED_TRANSITIONS.contains(&(from, to))
}

/// Durable, single-writer state of one schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleState {
    pub status: ScheduleStatus,
    /// Generation token; ticks carrying an older token are no-ops.
    pub execution_token: String,
    /// Current configuration; `None` until created.
    pub config: Option<ScheduleConfig>,
    /// Set once by create.
    pub created_at: Option<DateTime<Utc>>,
    /// Most recent tick that actually started a job.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Next nominal fire time; `None` forces recomputation on the next tick.
    pub next_run_at: Option<DateTime<Utc>>,
}

impl Default for ScheduleState {
    fn default() -> Self {
        Self {
            status: ScheduleStatus::Uninitialized,
            execution_token: fresh_token(),
            config: None,
            created_at: None,
            last_run_at: None,
            next_run_at: None,
        }
    }
}

impl ScheduleState {
    /// Move to `to`, failing with `InvalidState` when the table forbids it.
    pub fn transition(&mut self, to: ScheduleStatus, operation: &str) -> Result<(), ScheduleError> {
        if !transition_allowed(self.status, to) {
            return Err(ScheduleError::InvalidState {
                operation: operation.to_string(),
                status: self.status,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Regenerate the execution token, invalidating every in-flight tick.
    pub fn refresh_token(&mut self) {
        self.execution_token = fresh_token();
    }
}

/// Random 128-bit hex token.
fn fresh_token() -> String {
    Uuid::new_v4().simple().to_string()
}
