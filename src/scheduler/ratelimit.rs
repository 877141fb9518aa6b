//! Sliding-window rate limiting with retry patterns.
//!
//! Admission is a constraint check, not a token count: every admitted
//! start implies a whole pattern of future attempts (the caller's own
//! retry schedule), and a candidate is admitted only if no window of the
//! configured length would ever hold more than the limit across all
//! attempts, past and future. Statistics count every admission decision.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::info;

use super::{Scheduler, StopSignal};
use crate::error::Result;
use crate::events::{emit, Event, EventHandler};
use crate::parsing::RateSpec;

/// Forward-search horizon for [`RateLimiter::next_allowed_time`].
const SEARCH_HORIZON: Duration = Duration::from_secs(3600);

/// Forward-search step.
const SEARCH_STEP: Duration = Duration::from_secs(1);

/// Configuration for [`RateLimitScheduler`].
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Budget: at most `spec.limit` attempts per `spec.window`.
    pub spec: RateSpec,
    /// Offsets of the caller's retry schedule. Empty behaves as `{0}`.
    pub retry_pattern: Vec<Duration>,
    /// Log the computed wait when a slot is denied.
    pub show_next: bool,
}

/// Admission counters, copied out for observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimiterStats {
    pub total: u64,
    pub allowed: u64,
    pub denied: u64,
}

/// Windowed admission controller.
///
/// The scheduled-start set is only touched under the internal mutex; the
/// counters are atomics so `stats()` never has to take it.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    pattern: Vec<Duration>,
    scheduled: Mutex<Vec<Instant>>,
    total: AtomicU64,
    allowed: AtomicU64,
    denied: AtomicU64,
}

impl RateLimiter {
    pub fn new(spec: RateSpec, retry_pattern: Vec<Duration>) -> Self {
        let mut pattern = retry_pattern;
        if pattern.is_empty() {
            pattern.push(Duration::ZERO);
        }
        pattern.sort();
        pattern.dedup();
        RateLimiter {
            limit: spec.limit,
            window: spec.window,
            pattern,
            scheduled: Mutex::new(Vec::new()),
            total: AtomicU64::new(0),
            allowed: AtomicU64::new(0),
            denied: AtomicU64::new(0),
        }
    }

    /// Try to admit a request starting now. Records the decision either way.
    pub fn allow(&self) -> bool {
        self.admit_at(Instant::now())
    }

    fn admit_at(&self, t: Instant) -> bool {
        let mut scheduled = self.scheduled.lock().unwrap_or_else(|e| e.into_inner());
        self.prune(&mut scheduled, t);
        let admitted = self.can_schedule_at(&scheduled, t);
        if admitted {
            scheduled.push(t);
            self.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.denied.fetch_add(1, Ordering::Relaxed);
        }
        self.total.fetch_add(1, Ordering::Relaxed);
        admitted
    }

    /// How long from now until a start could be admitted, searching forward
    /// in 1-second steps. `None` when nothing inside the horizon fits.
    pub fn next_allowed_time(&self) -> Option<Duration> {
        self.next_allowed_from(Instant::now())
    }

    fn next_allowed_from(&self, now: Instant) -> Option<Duration> {
        let mut scheduled = self.scheduled.lock().unwrap_or_else(|e| e.into_inner());
        self.prune(&mut scheduled, now);
        let mut offset = Duration::ZERO;
        while offset <= SEARCH_HORIZON {
            if self.can_schedule_at(&scheduled, now + offset) {
                return Some(offset);
            }
            offset += SEARCH_STEP;
        }
        None
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            total: self.total.load(Ordering::Relaxed),
            allowed: self.allowed.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
        }
    }

    /// Drop starts whose latest derived attempt can no longer intersect any
    /// window containing `now` or later.
    fn prune(&self, scheduled: &mut Vec<Instant>, now: Instant) {
        let max_offset = *self.pattern.last().unwrap_or(&Duration::ZERO);
        if let Some(cutoff) = now.checked_sub(self.window) {
            scheduled.retain(|start| *start + max_offset >= cutoff);
        }
    }

    /// Whether starting at `t` keeps every window within the limit.
    ///
    /// Checks every window anchored at any attempt (existing or candidate):
    /// if one of them would hold more than `limit` attempts, the candidate
    /// is rejected. Quadratic in attempts, which stays small because starts
    /// are pruned as their patterns age out.
    fn can_schedule_at(&self, scheduled: &[Instant], t: Instant) -> bool {
        let attempts: Vec<Instant> = scheduled
            .iter()
            .chain(std::iter::once(&t))
            .flat_map(|start| self.pattern.iter().map(move |offset| *start + *offset))
            .collect();

        for &anchor in &attempts {
            let end = anchor + self.window;
            let in_window = attempts.iter().filter(|a| **a >= anchor && **a < end).count();
            if in_window > self.limit as usize {
                return false;
            }
        }
        true
    }
}

/// Tick stream over a [`RateLimiter`]: emit when admitted, otherwise sleep
/// until the next admissible start and try again.
pub struct RateLimitScheduler {
    limiter: RateLimiter,
    show_next: bool,
    stop: StopSignal,
    events: Option<Arc<dyn EventHandler>>,
}

impl RateLimitScheduler {
    pub fn new(config: RateLimitConfig, events: Option<Arc<dyn EventHandler>>) -> Result<Self> {
        Ok(RateLimitScheduler {
            limiter: RateLimiter::new(config.spec, config.retry_pattern),
            show_next: config.show_next,
            stop: StopSignal::new(),
            events,
        })
    }

    /// Admission counters for the stats report.
    pub fn stats(&self) -> RateLimiterStats {
        self.limiter.stats()
    }
}

#[async_trait]
impl Scheduler for RateLimitScheduler {
    async fn next(&self) -> bool {
        loop {
            if self.stop.is_stopped() {
                return false;
            }
            if self.limiter.allow() {
                emit(&self.events, Event::RateLimitDecision { allowed: true });
                return true;
            }
            emit(&self.events, Event::RateLimitDecision { allowed: false });
            let wait = self.limiter.next_allowed_time().unwrap_or(SEARCH_HORIZON);
            if self.show_next {
                info!(wait = ?wait, "rate limit reached, next slot");
            }
            if !self.stop.sleep(wait).await {
                return false;
            }
        }
    }

    fn stop(&self) {
        self.stop.stop();
    }

    fn name(&self) -> &'static str {
        "rate-limit"
    }
}
