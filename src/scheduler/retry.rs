//! Retry-until-success driver over a [`RetryStrategy`].
//!
//! The first attempt fires immediately. Each failure schedules the next
//! attempt at the strategy's delay; a success, or exhausting the attempt
//! budget, moves the scheduler to its terminal state and later `next()`
//! calls stop emitting.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{Scheduler, StopSignal, StrategyConfig};
use crate::error::Result;
use crate::executor::ExecutionResult;

struct RetryState {
    strategy: super::RetryStrategy,
    /// Completed attempts so far.
    completed: u32,
    /// Delay before the next emitted tick.
    pending_delay: Duration,
    /// Set when success or exhaustion makes the scheduler terminal.
    terminal: bool,
    /// Set when the terminal state was reached by a success.
    succeeded: bool,
}

/// Drives a mathematical retry strategy until success or exhaustion.
pub struct StrategyScheduler {
    state: Mutex<RetryState>,
    max_attempts: u32,
    stop: StopSignal,
}

impl StrategyScheduler {
    pub fn new(config: &StrategyConfig) -> Result<Self> {
        let strategy = config.build()?;
        Ok(StrategyScheduler {
            state: Mutex::new(RetryState {
                strategy,
                completed: 0,
                pending_delay: Duration::ZERO,
                terminal: false,
                succeeded: false,
            }),
            max_attempts: config.max_attempts,
            stop: StopSignal::new(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RetryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the scheduler observed a success (vs stopping by exhaustion
    /// or cancellation).
    pub fn succeeded(&self) -> bool {
        self.lock().succeeded
    }
}

#[async_trait]
impl Scheduler for StrategyScheduler {
    async fn next(&self) -> bool {
        // Copy the delay out; the lock is never held across the sleep.
        let delay = {
            let state = self.lock();
            if state.terminal || self.stop.is_stopped() {
                return false;
            }
            state.pending_delay
        };
        self.stop.sleep(delay).await
    }

    fn stop(&self) {
        self.stop.stop();
    }

    fn update_result(&self, result: &ExecutionResult) {
        let mut state = self.lock();
        if state.terminal {
            return;
        }
        state.completed += 1;
        if result.success {
            state.terminal = true;
            state.succeeded = true;
            self.stop.stop();
            return;
        }
        if state.completed >= self.max_attempts {
            state.terminal = true;
            self.stop.stop();
            return;
        }
        let completed = state.completed;
        state.pending_delay = state.strategy.next_delay(completed, result.duration);
    }

    fn name(&self) -> &'static str {
        "retry"
    }
}
