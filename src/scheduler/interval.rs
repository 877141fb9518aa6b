//! Fixed-interval scheduling with optional jitter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{Scheduler, StopSignal};
use crate::error::{RepeaterError, Result};

/// Configuration for [`IntervalScheduler`].
#[derive(Debug, Clone)]
pub struct IntervalConfig {
    /// Spacing between ticks.
    pub every: Duration,
    /// Jitter fraction in `[0, 1]`: each gap is drawn from
    /// `every ± jitter * every`.
    pub jitter: f64,
    /// Emit the first tick immediately instead of after one interval.
    pub immediate: bool,
}

impl IntervalConfig {
    /// Plain periodic ticks, no jitter, first tick after one interval.
    pub fn new(every: Duration) -> Self {
        IntervalConfig {
            every,
            jitter: 0.0,
            immediate: false,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }
}

/// Periodic ticks at a fixed interval, optionally jittered.
///
/// Each instance owns its jitter RNG: independent runs never share a random
/// sequence, which is what keeps a fleet of pollers from synchronizing.
pub struct IntervalScheduler {
    config: IntervalConfig,
    first: AtomicBool,
    rng: Mutex<fastrand::Rng>,
    stop: StopSignal,
}

impl IntervalScheduler {
    pub fn new(config: IntervalConfig) -> Result<Self> {
        if config.every.is_zero() {
            return Err(RepeaterError::config("every", "interval must be positive"));
        }
        if !(0.0..=1.0).contains(&config.jitter) {
            return Err(RepeaterError::config(
                "jitter",
                "jitter must be between 0.0 and 1.0",
            ));
        }
        Ok(IntervalScheduler {
            config,
            first: AtomicBool::new(true),
            rng: Mutex::new(fastrand::Rng::new()),
            stop: StopSignal::new(),
        })
    }

    /// Next gap: `every` shifted by a uniform draw in `±jitter * every`,
    /// clamped to stay positive.
    fn next_gap(&self) -> Duration {
        if self.config.jitter == 0.0 {
            return self.config.every;
        }
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let offset = self.config.jitter * (rng.f64() * 2.0 - 1.0);
        let secs = self.config.every.as_secs_f64() * (1.0 + offset);
        Duration::from_secs_f64(secs.max(0.001))
    }
}

#[async_trait]
impl Scheduler for IntervalScheduler {
    async fn next(&self) -> bool {
        if self.stop.is_stopped() {
            return false;
        }
        if self.first.swap(false, Ordering::AcqRel) && self.config.immediate {
            return true;
        }
        self.stop.sleep(self.next_gap()).await
    }

    fn stop(&self) {
        self.stop.stop();
    }

    fn name(&self) -> &'static str {
        "interval"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn test_rejects_zero_interval() {
        assert!(IntervalScheduler::new(IntervalConfig::new(Duration::ZERO)).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_jitter() {
        let config = IntervalConfig::new(Duration::from_secs(1)).with_jitter(1.5);
        assert!(IntervalScheduler::new(config).is_err());
        let config = IntervalConfig::new(Duration::from_secs(1)).with_jitter(-0.1);
        assert!(IntervalScheduler::new(config).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_first_tick() {
        let config = IntervalConfig::new(Duration::from_secs(10)).with_immediate(true);
        let scheduler = IntervalScheduler::new(config).unwrap();

        let before = Instant::now();
        assert!(scheduler.next().await);
        assert_eq!(Instant::now() - before, Duration::ZERO);

        // Second tick waits a full interval.
        let before = Instant::now();
        assert!(scheduler.next().await);
        assert_eq!(Instant::now() - before, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_waits_without_immediate() {
        let config = IntervalConfig::new(Duration::from_secs(5));
        let scheduler = IntervalScheduler::new(config).unwrap();

        let before = Instant::now();
        assert!(scheduler.next().await);
        assert_eq!(Instant::now() - before, Duration::from_secs(5));
    }

    #[test]
    fn test_jittered_gap_stays_in_band() {
        let config = IntervalConfig::new(Duration::from_secs(10)).with_jitter(0.5);
        let scheduler = IntervalScheduler::new(config).unwrap();
        for _ in 0..200 {
            let gap = scheduler.next_gap();
            assert!(gap >= Duration::from_secs(5), "gap {:?} below band", gap);
            assert!(gap <= Duration::from_secs(15), "gap {:?} above band", gap);
        }
    }

    #[test]
    fn test_full_jitter_gap_stays_positive() {
        let config = IntervalConfig::new(Duration::from_millis(1)).with_jitter(1.0);
        let scheduler = IntervalScheduler::new(config).unwrap();
        for _ in 0..200 {
            assert!(scheduler.next_gap() > Duration::ZERO);
        }
    }

    #[tokio::test]
    async fn test_no_tick_after_stop() {
        let config = IntervalConfig::new(Duration::from_secs(1)).with_immediate(true);
        let scheduler = IntervalScheduler::new(config).unwrap();
        scheduler.stop();
        assert!(!scheduler.next().await);
        scheduler.stop(); // idempotent
        assert!(!scheduler.next().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_unblocks_pending_next() {
        let config = IntervalConfig::new(Duration::from_secs(3600));
        let scheduler = std::sync::Arc::new(IntervalScheduler::new(config).unwrap());
        let waiter = scheduler.clone();
        let handle = tokio::spawn(async move { waiter.next().await });
        tokio::task::yield_now().await;
        scheduler.stop();
        assert!(!handle.await.unwrap());
    }
}
