//! Shared testbed: schedule entity wired to the in-memory substrate.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use chime_client::ScheduleClient;
use chime_schedule::{SCHEDULE_ENTITY_KIND, ScheduleEntity};
use chime_substrate::{MemorySubstrate, SimulatedClock};

pub struct TestBed {
    pub clock: Arc<SimulatedClock>,
    pub substrate: Arc<MemorySubstrate>,
    pub client: ScheduleClient,
    pub t0: DateTime<Utc>,
}

pub fn testbed() -> TestBed {
    let t0: DateTime<Utc> = "2026-01-01T00:00:00Z".parse().unwrap();
    let clock = Arc::new(SimulatedClock::new(t0));
    let substrate = Arc::new(MemorySubstrate::new(clock.clone()));
    substrate.register_handler(
        SCHEDULE_ENTITY_KIND,
        Arc::new(ScheduleEntity::new(clock.clone())),
    );
    let client = ScheduleClient::new(substrate.clone(), clock.clone());
    TestBed {
        clock,
        substrate,
        client,
        t0,
    }
}

impl TestBed {
    /// Step simulated time forward, delivering due signals at each step.
    pub async fn run_for(&self, total: Duration, step: Duration) {
        let mut elapsed = Duration::zero();
        while elapsed < total {
            self.clock.advance(step);
            self.substrate.deliver_due().await;
            elapsed += step;
        }
    }

    /// Millisecond offsets from t0 at which jobs started.
    pub fn fire_offsets_ms(&self) -> Vec<i64> {
        self.substrate
            .started_jobs()
            .iter()
            .map(|job| (job.started_at - self.t0).num_milliseconds())
            .collect()
    }
}
