//! Scheduling disciplines behind one contract.
//!
//! Every discipline implements [`Scheduler`]: `next()` resolves when the
//! next tick is due (or the scheduler has stopped), `stop()` is idempotent,
//! and feedback-consuming disciplines override `update_result()`. The
//! closed set of disciplines is [`ScheduleSpec`]; [`build_scheduler`] is
//! the factory the CLI drives.
//!
//! Cancellation is uniform: every sleep races a [`StopSignal`], so a stop
//! (or run cancellation, which is the same signal) unblocks any wait.

pub mod adaptive;
pub mod circuit;
pub mod cron;
pub mod http_aware;
pub mod interval;
pub mod load;
pub mod ratelimit;
pub mod retry;
pub mod strategy;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::Result;
use crate::events::EventHandler;
use crate::executor::ExecutionResult;
use crate::http::HttpAwareConfig;

pub use adaptive::{AimdConfig, AimdScheduler};
pub use circuit::{BayesianCircuit, CircuitConfig, CircuitState};
pub use cron::{CronConfig, CronScheduler};
pub use http_aware::HttpAwareScheduler;
pub use interval::{IntervalConfig, IntervalScheduler};
pub use load::{LoadAdaptiveConfig, LoadAdaptiveScheduler};
pub use ratelimit::{RateLimitConfig, RateLimitScheduler, RateLimiter, RateLimiterStats};
pub use retry::StrategyScheduler;
pub use strategy::{RetryStrategy, StrategyConfig, StrategyKind};

/// Object-safe contract over all scheduling disciplines.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Wait until the next tick is due.
    ///
    /// Returns `true` when the caller should execute an attempt now, and
    /// `false` when the scheduler has stopped (terminal state, `stop()`, or
    /// cancellation). Once `false` is returned, every later call returns
    /// `false` as well: ticks are never emitted after stop.
    async fn next(&self) -> bool;

    /// Stop the scheduler. Idempotent. Pending `next()` waiters observe the
    /// stop promptly instead of hanging.
    fn stop(&self);

    /// Feedback from the attempt that just completed. The runner delivers
    /// the result for attempt N before requesting the tick for N+1.
    /// Default: ignored.
    fn update_result(&self, _result: &ExecutionResult) {}

    /// Discipline name (for logs).
    fn name(&self) -> &'static str;
}

/// One-way stop/cancellation latch shared between a scheduler (or run) and
/// its waiters.
///
/// Clones observe the same latch. `stop()` is idempotent; `sleep()` races
/// a timer against the latch so cancelled waits unblock immediately.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        StopSignal { tx: Arc::new(tx) }
    }

    /// Trip the latch. Safe to call any number of times.
    pub fn stop(&self) {
        // send_replace never fails even with no subscribers.
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the latch has been tripped.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleep for `duration` unless stopped first. Returns `true` when the
    /// full duration elapsed, `false` when the latch tripped.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.stopped() => false,
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// The closed set of scheduling disciplines, keyed by subcommand.
#[derive(Debug, Clone)]
pub enum ScheduleSpec {
    /// Fixed interval with optional jitter (`interval`, `count`, `duration`).
    Interval(IntervalConfig),
    /// Cron expression with optional timezone (`cron`).
    Cron(CronConfig),
    /// AIMD interval control with circuit breaking (`adaptive`).
    Adaptive(AimdConfig),
    /// System-load-scaled interval (`load-adaptive`).
    LoadAdaptive(LoadAdaptiveConfig),
    /// Windowed admission with retry pattern (`rate-limit`).
    RateLimit(RateLimitConfig),
    /// Retry-until-success with a mathematical strategy (`exponential`,
    /// `linear`, `polynomial`, `fibonacci`, `decorrelated-jitter`).
    Retry(StrategyConfig),
}

/// Build the scheduler for a spec, wrapping it in the HTTP-aware layer when
/// that is configured. Validation failures surface as config errors here,
/// before any tick is produced.
pub fn build_scheduler(
    spec: &ScheduleSpec,
    http_aware: Option<&HttpAwareConfig>,
    events: Option<Arc<dyn EventHandler>>,
) -> Result<Box<dyn Scheduler>> {
    let base: Box<dyn Scheduler> = match spec {
        ScheduleSpec::Interval(config) => Box::new(IntervalScheduler::new(config.clone())?),
        ScheduleSpec::Cron(config) => Box::new(CronScheduler::new(config.clone())?),
        ScheduleSpec::Adaptive(config) => {
            Box::new(AimdScheduler::new(config.clone(), events.clone())?)
        }
        ScheduleSpec::LoadAdaptive(config) => Box::new(LoadAdaptiveScheduler::new(config.clone())?),
        ScheduleSpec::RateLimit(config) => {
            Box::new(RateLimitScheduler::new(config.clone(), events.clone())?)
        }
        ScheduleSpec::Retry(config) => Box::new(StrategyScheduler::new(config)?),
    };
    Ok(match http_aware {
        Some(config) => Box::new(HttpAwareScheduler::new(base, config.clone())),
        None => base,
    })
}
