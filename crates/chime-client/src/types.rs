//! Read models and request options for the client facade.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use chime_schedule::{ScheduleConfig, ScheduleState, ScheduleStatus};

/// Optional fields of a create call; required ones are call arguments.
#[derive(Debug, Clone, Default)]
pub struct CreateScheduleOptions {
    pub job_input: Value,
    pub job_instance_id: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub start_immediately_if_late: bool,
}

/// Point-in-time description of one schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleDescription {
    pub schedule_id: String,
    pub status: ScheduleStatus,
    pub config: ScheduleConfig,
    pub created_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub execution_token: String,
}

impl ScheduleDescription {
    /// Build from the actor's durable state; `None` if never created.
    pub(crate) fn from_state(schedule_id: &str, state: ScheduleState) -> Option<Self> {
        let config = state.config?;
        Some(Self {
            schedule_id: schedule_id.to_string(),
            status: state.status,
            config,
            created_at: state.created_at,
            last_run_at: state.last_run_at,
            next_run_at: state.next_run_at,
            execution_token: state.execution_token,
        })
    }
}

/// Server-side-style filter for listings; all conditions are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status_equals: Option<ScheduleStatus>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub id_prefix: Option<String>,
}

impl ListFilter {
    pub(crate) fn matches(&self, description: &ScheduleDescription) -> bool {
        if let Some(status) = self.status_equals
            && description.status != status
        {
            return false;
        }
        if let Some(from) = self.created_from
            && description.created_at.is_none_or(|at| at < from)
        {
            return false;
        }
        if let Some(to) = self.created_to
            && description.created_at.is_none_or(|at| at > to)
        {
            return false;
        }
        if let Some(prefix) = &self.id_prefix
            && !description.schedule_id.starts_with(prefix.as_str())
        {
            return false;
        }
        true
    }
}

/// One page of a listing; `continuation` resumes after the page.
#[derive(Debug, Clone, Default)]
pub struct SchedulePage {
    pub schedules: Vec<ScheduleDescription>,
    pub continuation: Option<String>,
}
