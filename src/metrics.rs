//! Prometheus metrics for the run.
//!
//! [`Metrics`] owns a private registry with the `rpr_` metric family and
//! implements [`EventHandler`], so wiring it into a run is just passing it
//! as the event hook. Rendering snapshots the registry; nothing here holds
//! a reference into runner state.

use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::events::{Event, EventHandler};

/// Histogram buckets for attempt durations, in seconds.
const DURATION_BUCKETS: &[f64] = &[0.001, 0.01, 0.1, 1.0, 10.0, 60.0, 300.0];

/// Registry and instruments for one process.
pub struct Metrics {
    registry: Registry,
    executions: IntCounterVec,
    duration: Histogram,
    interval: Gauge,
    rate_limit: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let executions = IntCounterVec::new(
            Opts::new("rpr_executions_total", "Command executions by outcome"),
            &["status"],
        )
        .expect("executions counter");
        let duration = Histogram::with_opts(
            HistogramOpts::new(
                "rpr_execution_duration_seconds",
                "Wall time of command attempts",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
        )
        .expect("duration histogram");
        let interval = Gauge::new(
            "rpr_scheduler_interval_seconds",
            "Current scheduler interval",
        )
        .expect("interval gauge");
        let rate_limit = IntCounterVec::new(
            Opts::new("rpr_rate_limit_total", "Rate limiter admission decisions"),
            &["result"],
        )
        .expect("rate limit counter");

        registry
            .register(Box::new(executions.clone()))
            .expect("register executions");
        registry
            .register(Box::new(duration.clone()))
            .expect("register duration");
        registry
            .register(Box::new(interval.clone()))
            .expect("register interval");
        registry
            .register(Box::new(rate_limit.clone()))
            .expect("register rate limit");

        Metrics {
            registry,
            executions,
            duration,
            interval,
            rate_limit,
        }
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        if TextEncoder::new().encode(&families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for Metrics {
    fn on_event(&self, event: Event) {
        match event {
            Event::AttemptEnd {
                success, duration, ..
            } => {
                let status = if success { "success" } else { "failure" };
                self.executions.with_label_values(&[status]).inc();
                self.duration.observe(duration.as_secs_f64());
            }
            Event::IntervalChanged { interval } => {
                self.interval.set(interval.as_secs_f64());
            }
            Event::RateLimitDecision { allowed } => {
                let result = if allowed { "allowed" } else { "hit" };
                self.rate_limit.with_label_values(&[result]).inc();
            }
            Event::AttemptStart { .. } | Event::CircuitTransition { .. } => {}
        }
    }
}
