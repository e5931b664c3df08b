//! Work-item pull/execute loop.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use chime_substrate::{SubstrateError, WorkItem, WorkQueue};

/// Type alias for the work-item executor function.
pub type WorkExecutor =
    Arc<dyn Fn(WorkItem) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync>;

/// External backpressure collaborator consulted by the admission gate.
pub trait TrafficSignal: Send + Sync {
    fn is_ready(&self) -> bool;
}

/// Traffic signal that never blocks admission.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReady;

impl TrafficSignal for AlwaysReady {
    fn is_ready(&self) -> bool {
        true
    }
}

/// Tuning knobs for a dispatch loop.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Work items executing at once.
    pub max_concurrency: usize,
    /// Bounded sleep between admission-gate checks and drain polls.
    pub poll_interval: Duration,
    /// How often to log while the admission gate stays blocked.
    pub stall_log_interval: Duration,
    /// Delay after a transient fetch failure.
    pub transient_retry_delay: Duration,
    /// Delay after an unclassified fetch failure.
    pub fetch_failure_delay: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            poll_interval: Duration::from_millis(50),
            stall_log_interval: Duration::from_secs(60),
            transient_retry_delay: Duration::from_secs(1),
            fetch_failure_delay: Duration::from_secs(5),
        }
    }
}

/// Sequence for dispatcher identities; logging only, never load-bearing.
static DISPATCHER_SEQ: AtomicU64 = AtomicU64::new(0);

/// The dispatch loop.
pub struct Dispatcher {
    name: String,
    queue: Arc<dyn WorkQueue>,
    executor: WorkExecutor,
    traffic: Arc<dyn TrafficSignal>,
    options: DispatchOptions,
    active: Arc<AtomicUsize>,
}

impl Dispatcher {
    /// Create a dispatcher with default options and no traffic signal.
    pub fn new(queue: Arc<dyn WorkQueue>, executor: WorkExecutor) -> Self {
        Self::with_options(queue, executor, DispatchOptions::default())
    }

    pub fn with_options(
        queue: Arc<dyn WorkQueue>,
        executor: WorkExecutor,
        options: DispatchOptions,
    ) -> Self {
        let seq = DISPATCHER_SEQ.fetch_add(1, Ordering::Relaxed);
        Self {
            name: format!("dispatcher-{seq}"),
            queue,
            executor,
            traffic: Arc::new(AlwaysReady),
            options,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Replace the admission traffic signal.
    pub fn with_traffic_signal(mut self, traffic: Arc<dyn TrafficSignal>) -> Self {
        self.traffic = traffic;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Work items currently executing.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Run until `shutdown_rx` flips to `true`, then drain in-flight work.
    ///
    /// The fetch loop stops admitting new items first; `run` returns only
    /// once every admitted item has finished and released its lease.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(dispatcher = %self.name, max_concurrency = self.options.max_concurrency, "dispatch loop starting");

        'fetch: loop {
            if *shutdown_rx.borrow() {
                break;
            }

            // Admission gate: both concurrency headroom and the traffic
            // signal must clear before fetching.
            let mut last_stall_log = Instant::now();
            while self.active() >= self.options.max_concurrency || !self.traffic.is_ready() {
                if *shutdown_rx.borrow() {
                    break 'fetch;
                }
                if last_stall_log.elapsed() >= self.options.stall_log_interval {
                    info!(
                        dispatcher = %self.name,
                        active = self.active(),
                        traffic_ready = self.traffic.is_ready(),
                        "admission gate blocked"
                    );
                    last_stall_log = Instant::now();
                }
                tokio::select! {
                    _ = shutdown_rx.changed() => {}
                    _ = sleep(self.options.poll_interval) => {}
                }
            }

            match self.queue.fetch_work_item(&mut shutdown_rx).await {
                Ok(Some(item)) => {
                    self.active.fetch_add(1, Ordering::SeqCst);
                    debug!(
                        dispatcher = %self.name,
                        instance_id = %item.instance_id,
                        attempt = item.attempt,
                        "work item fetched"
                    );
                    // Execution must not block the fetch loop; that overlap
                    // is what achieves the configured concurrency.
                    tokio::spawn(execute(
                        self.name.clone(),
                        Arc::clone(&self.queue),
                        Arc::clone(&self.executor),
                        Arc::clone(&self.active),
                        item,
                    ));
                }
                Ok(None) => {
                    // Shutdown or an empty poll; the loop top re-checks.
                }
                Err(e) => {
                    let delay = self.fetch_retry_delay(&e);
                    warn!(
                        dispatcher = %self.name,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "work item fetch failed"
                    );
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = shutdown_rx.changed() => {}
                            _ = sleep(delay) => {}
                        }
                    }
                }
            }
        }

        info!(dispatcher = %self.name, active = self.active(), "fetch loop stopped; draining in-flight work");
        let mut last_stall_log = Instant::now();
        while self.active() > 0 {
            if last_stall_log.elapsed() >= self.options.stall_log_interval {
                info!(dispatcher = %self.name, active = self.active(), "still draining");
                last_stall_log = Instant::now();
            }
            sleep(self.options.poll_interval).await;
        }
        info!(dispatcher = %self.name, "dispatch loop stopped");
    }

    /// Classify a fetch failure into a retry delay.
    fn fetch_retry_delay(&self, error: &SubstrateError) -> Duration {
        match error {
            SubstrateError::Transient(_) => self.options.transient_retry_delay,
            _ => self.options.fetch_failure_delay,
        }
    }
}

/// Execute one work item: abandon on failure, always attempt to release the
/// lease, and decrement the active count only after release.
async fn execute(
    dispatcher: String,
    queue: Arc<dyn WorkQueue>,
    executor: WorkExecutor,
    active: Arc<AtomicUsize>,
    item: WorkItem,
) {
    match executor(item.clone()).await {
        Ok(()) => {
            if let Err(e) = queue.complete_work_item(&item).await {
                warn!(dispatcher = %dispatcher, instance_id = %item.instance_id, error = %e, "failed to complete work item");
            } else {
                debug!(dispatcher = %dispatcher, instance_id = %item.instance_id, "work item completed");
            }
        }
        Err(error) => {
            warn!(
                dispatcher = %dispatcher,
                instance_id = %item.instance_id,
                attempt = item.attempt,
                error = %error,
                "work item failed; abandoning for redelivery"
            );
            if let Err(e) = queue.abandon_work_item(&item).await {
                warn!(dispatcher = %dispatcher, instance_id = %item.instance_id, error = %e, "failed to abandon work item");
            }
        }
    }

    // Best-effort: a release failure is logged, never propagated.
    if let Err(e) = queue.release_work_item_lock(&item).await {
        warn!(dispatcher = %dispatcher, instance_id = %item.instance_id, error = %e, "failed to release work item lock");
    }

    active.fetch_sub(1, Ordering::SeqCst);
}
