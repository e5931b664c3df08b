//! Concurrency-bounded work dispatch loop for Chime.
//!
//! A [`Dispatcher`] continuously pulls work items from a
//! [`chime_substrate::WorkQueue`] and executes them on spawned tasks:
//! - an admission gate holds fetching while the configured concurrency is
//!   saturated or an external traffic signal reports "not ready",
//! - failed items are abandoned for redelivery, never dropped,
//! - item leases are released best-effort after execution,
//! - shutdown stops fetching first, then drains in-flight work to zero.
//!
//! The loop never propagates errors; it runs until told to stop.

mod dispatcher;

pub use dispatcher::{AlwaysReady, DispatchOptions, Dispatcher, TrafficSignal, WorkExecutor};
