//! The schedule management client.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info};

use chime_schedule::{ScheduleConfig, ScheduleConfigPatch, ScheduleEntity, ScheduleState, ops};
use chime_substrate::{Clock, EntityClient};

use crate::{ClientError, CreateScheduleOptions, ListFilter, ScheduleDescription, SchedulePage};

/// Facade over the schedule entity.
///
/// Translates management calls into entity operations and decodes entity
/// state for reads. Operation errors surface synchronously; "not found" on
/// reads is an empty result, not an error.
pub struct ScheduleClient {
    substrate: Arc<dyn EntityClient>,
    clock: Arc<dyn Clock>,
}

impl ScheduleClient {
    pub fn new(substrate: Arc<dyn EntityClient>, clock: Arc<dyn Clock>) -> Self {
        Self { substrate, clock }
    }

    /// Create a new recurring schedule.
    pub async fn create(
        &self,
        schedule_id: &str,
        job_name: &str,
        interval: Duration,
        options: CreateScheduleOptions,
    ) -> Result<(), ClientError> {
        let config = ScheduleConfig {
            schedule_id: schedule_id.to_string(),
            job_name: job_name.to_string(),
            job_input: options.job_input,
            job_instance_id: options.job_instance_id,
            start_at: options.start_at,
            end_at: options.end_at,
            interval,
            start_immediately_if_late: options.start_immediately_if_late,
        };

        self.substrate
            .call_entity(
                &ScheduleEntity::entity_id(schedule_id),
                ops::CREATE,
                serde_json::to_value(&config)?,
            )
            .await?;
        info!(schedule_id = %schedule_id, job_name = %job_name, "schedule create accepted");
        Ok(())
    }

    /// Apply a sparse configuration update.
    pub async fn update(
        &self,
        schedule_id: &str,
        patch: ScheduleConfigPatch,
    ) -> Result<(), ClientError> {
        self.substrate
            .call_entity(
                &ScheduleEntity::entity_id(schedule_id),
                ops::UPDATE,
                serde_json::to_value(&patch)?,
            )
            .await?;
        Ok(())
    }

    pub async fn pause(&self, schedule_id: &str) -> Result<(), ClientError> {
        self.substrate
            .call_entity(
                &ScheduleEntity::entity_id(schedule_id),
                ops::PAUSE,
                serde_json::Value::Null,
            )
            .await?;
        Ok(())
    }

    pub async fn resume(&self, schedule_id: &str) -> Result<(), ClientError> {
        self.substrate
            .call_entity(
                &ScheduleEntity::entity_id(schedule_id),
                ops::RESUME,
                serde_json::Value::Null,
            )
            .await?;
        Ok(())
    }

    /// Delete the schedule entity. Deleting an absent schedule is a no-op.
    pub async fn delete(&self, schedule_id: &str) -> Result<(), ClientError> {
        self.substrate
            .delete_entity(&ScheduleEntity::entity_id(schedule_id))
            .await?;
        info!(schedule_id = %schedule_id, "schedule deleted");
        Ok(())
    }

    /// Describe one schedule; `None` when absent or expired.
    ///
    /// A schedule observed past its `end_at` is cleaned up here: the actor
    /// only goes dormant, expiry deletion is caller-level policy.
    pub async fn describe(
        &self,
        schedule_id: &str,
    ) -> Result<Option<ScheduleDescription>, ClientError> {
        let entity_id = ScheduleEntity::entity_id(schedule_id);
        let Some(value) = self.substrate.get_entity_state(&entity_id).await? else {
            return Ok(None);
        };
        let state: ScheduleState = serde_json::from_value(value)?;

        if self.is_expired(&state) {
            debug!(schedule_id = %schedule_id, "schedule past end_at; cleaning up");
            self.substrate.delete_entity(&entity_id).await?;
            return Ok(None);
        }

        Ok(ScheduleDescription::from_state(schedule_id, state))
    }

    /// One page of schedule descriptions matching `filter`.
    ///
    /// The sequence is lazy and restartable: each call fetches a single
    /// substrate page; pass the returned continuation to resume. A page may
    /// come back shorter than `page_size` after filtering.
    pub async fn list(
        &self,
        filter: &ListFilter,
        page_size: usize,
        continuation: Option<String>,
    ) -> Result<SchedulePage, ClientError> {
        let page = self
            .substrate
            .list_entities(chime_schedule::SCHEDULE_ENTITY_KIND, page_size, continuation)
            .await?;

        let mut schedules = Vec::new();
        for (schedule_id, value) in page.entities {
            let state: ScheduleState = serde_json::from_value(value)?;
            if self.is_expired(&state) {
                continue;
            }
            if let Some(description) = ScheduleDescription::from_state(&schedule_id, state)
                && filter.matches(&description)
            {
                schedules.push(description);
            }
        }

        Ok(SchedulePage {
            schedules,
            continuation: page.continuation,
        })
    }

    fn is_expired(&self, state: &ScheduleState) -> bool {
        state
            .config
            .as_ref()
            .and_then(|config| config.end_at)
            .is_some_and(|end| self.clock.now() >= end)
    }
}
