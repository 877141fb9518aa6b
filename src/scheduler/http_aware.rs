//! HTTP-aware scheduling wrapper.
//!
//! Wraps any base scheduler and watches the last command output. When that
//! output is a captured HTTP response advertising retry timing, the
//! server's timing overrides the base schedule for the next tick; in every
//! other case the wrapper delegates to the base scheduler untouched.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use super::{Scheduler, StopSignal};
use crate::executor::ExecutionResult;
use crate::http::{extract_timing, looks_like_http, HttpAwareConfig, TimingInfo};

/// Decorates a base scheduler with server-advertised retry timing.
///
/// Composition, not inheritance: the wrapper owns the base scheduler and
/// forwards `stop`/`update_result` to it. The most recent [`TimingInfo`]
/// (or its absence) is surfaced for inspection after every tick decision.
pub struct HttpAwareScheduler {
    inner: Box<dyn Scheduler>,
    config: HttpAwareConfig,
    /// Most recent command stdout, consumed by the next tick decision.
    last_output: Mutex<Option<String>>,
    last_timing: Mutex<Option<TimingInfo>>,
    stop: StopSignal,
}

impl HttpAwareScheduler {
    pub fn new(inner: Box<dyn Scheduler>, config: HttpAwareConfig) -> Self {
        HttpAwareScheduler {
            inner,
            config,
            last_output: Mutex::new(None),
            last_timing: Mutex::new(None),
            stop: StopSignal::new(),
        }
    }

    /// Timing extracted for the most recent tick decision, if any.
    pub fn last_timing(&self) -> Option<TimingInfo> {
        *self.last_timing.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Consume the buffered output and extract timing from it, clamped to
    /// the configured delay band.
    fn take_timing(&self) -> Option<TimingInfo> {
        let output = self
            .last_output
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()?;
        let timing = if looks_like_http(&output) {
            extract_timing(&output, &self.config).map(|mut timing| {
                timing.delay = timing.delay.clamp(self.config.min_delay, self.config.max_delay);
                timing
            })
        } else {
            None
        };
        *self.last_timing.lock().unwrap_or_else(|e| e.into_inner()) = timing;
        timing
    }
}

#[async_trait]
impl Scheduler for HttpAwareScheduler {
    async fn next(&self) -> bool {
        if self.stop.is_stopped() {
            return false;
        }
        match self.take_timing() {
            Some(timing) => {
                debug!(
                    delay = ?timing.delay,
                    source = timing.source.as_str(),
                    confidence = timing.confidence,
                    "using server-advertised timing"
                );
                self.stop.sleep(timing.delay).await
            }
            None => self.inner.next().await,
        }
    }

    fn stop(&self) {
        self.stop.stop();
        self.inner.stop();
    }

    fn update_result(&self, result: &ExecutionResult) {
        // Buffer before forwarding: the stored response must be visible to
        // the delay computation that follows this feedback.
        *self.last_output.lock().unwrap_or_else(|e| e.into_inner()) = Some(result.stdout.clone());
        self.inner.update_result(result);
    }

    fn name(&self) -> &'static str {
        "http-aware"
    }
}
