//! Schedule configuration and sparse update patches.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ScheduleError;

/// Immutable-per-version description of a recurring job.
///
/// Replaced wholesale on update; the actor never mutates a stored
/// configuration in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Unique identity of the schedule; immutable once created.
    pub schedule_id: String,
    /// Name of the job to start on each tick.
    pub job_name: String,
    /// Opaque payload forwarded verbatim to each job instance.
    #[serde(default)]
    pub job_input: Value,
    /// Fixed instance id for every tick's job (last-writer-wins on the
    /// substrate). `None` derives a fresh id per fire time.
    #[serde(default)]
    pub job_instance_id: Option<String>,
    /// Inclusive earliest fire time; absent means fire on activation.
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    /// Exclusive latest fire time; once passed, the schedule goes dormant.
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
    /// Spacing between nominal fire times. Strictly positive.
    #[serde(with = "duration_millis")]
    pub interval: Duration,
    /// If the first computed fire time has already passed, fire now instead
    /// of waiting for the next boundary. Only the most recent missed tick
    /// fires; there is no burst catch-up either way.
    #[serde(default)]
    pub start_immediately_if_late: bool,
}

impl ScheduleConfig {
    /// Reject invalid configurations before any state mutation.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.interval <= Duration::zero() {
            return Err(ScheduleError::InvalidConfiguration(format!(
                "interval must be positive, got {}ms",
                self.interval.num_milliseconds()
            )));
        }
        if let (Some(start), Some(end)) = (self.start_at, self.end_at)
            && end <= start
        {
            return Err(ScheduleError::InvalidConfiguration(format!(
                "end_at ({end}) must be after start_at ({start})"
            )));
        }
        Ok(())
    }
}

/// Edit marker for an optional configuration field.
///
/// Distinguishes "leave as is" from "set to a value" from "explicitly
/// clear" — a zero/empty value is never treated as absence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldPatch<T> {
    #[default]
    Keep,
    Set(T),
    Clear,
}

impl<T> FieldPatch<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, FieldPatch::Keep)
    }
}

/// Sparse update request: only supplied fields are merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfigPatch {
    #[serde(default)]
    pub job_name: Option<String>,
    /// `Some` replaces the payload, including with an explicitly empty one.
    #[serde(default)]
    pub job_input: Option<Value>,
    #[serde(default)]
    pub job_instance_id: FieldPatch<String>,
    #[serde(default)]
    pub start_at: FieldPatch<DateTime<Utc>>,
    #[serde(default)]
    pub end_at: FieldPatch<DateTime<Utc>>,
    #[serde(default, with = "opt_duration_millis")]
    pub interval: Option<Duration>,
    #[serde(default)]
    pub start_immediately_if_late: Option<bool>,
}

/// What a patch application actually changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchOutcome {
    /// Any field took a new value.
    pub changed: bool,
    /// `start_at` or `interval` took a new value; the cached next-run time
    /// can no longer be trusted.
    pub timing_changed: bool,
}

impl ScheduleConfigPatch {
    pub fn is_empty(&self) -> bool {
        self.job_name.is_none()
            && self.job_input.is_none()
            && self.job_instance_id.is_keep()
            && self.start_at.is_keep()
            && self.end_at.is_keep()
            && self.interval.is_none()
            && self.start_immediately_if_late.is_none()
    }

    /// Merge supplied fields into `config`, reporting which changed.
    ///
    /// Change tracking compares values: setting a field to the value it
    /// already holds does not count as a change.
    pub fn apply(&self, config: &mut ScheduleConfig) -> PatchOutcome {
        let mut outcome = PatchOutcome::default();

        if let Some(job_name) = &self.job_name
            && *job_name != config.job_name
        {
            config.job_name = job_name.clone();
            outcome.changed = true;
        }
        if let Some(job_input) = &self.job_input
            && *job_input != config.job_input
        {
            config.job_input = job_input.clone();
            outcome.changed = true;
        }
        if apply_field(&self.job_instance_id, &mut config.job_instance_id) {
            outcome.changed = true;
        }
        if apply_field(&self.start_at, &mut config.start_at) {
            outcome.changed = true;
            outcome.timing_changed = true;
        }
        if apply_field(&self.end_at, &mut config.end_at) {
            outcome.changed = true;
        }
        if let Some(interval) = self.interval
            && interval != config.interval
        {
            config.interval = interval;
            outcome.changed = true;
            outcome.timing_changed = true;
        }
        if let Some(flag) = self.start_immediately_if_late
            && flag != config.start_immediately_if_late
        {
            config.start_immediately_if_late = flag;
            outcome.changed = true;
        }

        outcome
    }
}

/// Apply one optional-field edit; returns whether the target changed.
fn apply_field<T: Clone + PartialEq>(patch: &FieldPatch<T>, target: &mut Option<T>) -> bool {
    match patch {
        FieldPatch::Keep => false,
        FieldPatch::Set(value) => {
            if target.as_ref() != Some(value) {
                *target = Some(value.clone());
                true
            } else {
                false
            }
        }
        FieldPatch::Clear => {
            if target.is_some() {
                *target = None;
                true
            } else {
                false
            }
        }
    }
}

/// Serialize `chrono::Duration` as integer milliseconds.
mod duration_millis {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.num_milliseconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        i64::deserialize(deserializer).map(Duration::milliseconds)
    }
}

/// `Option<Duration>` as optional integer milliseconds.
mod opt_duration_millis {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.num_milliseconds()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<i64>::deserialize(deserializer)?.map(Duration::milliseconds))
    }
}
