//! AIMD interval control with EWMA response smoothing.
//!
//! Borrowed from congestion control: slow responses push the polling
//! interval up additively, fast successes pull it down multiplicatively,
//! and failures are treated as congestion favoring shorter retries. A
//! [`BayesianCircuit`] rides along in the same state guard; when it opens,
//! tick admission pauses for a cooldown derived from the maximum interval.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use super::circuit::{BayesianCircuit, CircuitConfig, Gate};
use super::{Scheduler, StopSignal};
use crate::error::{RepeaterError, Result};
use crate::events::{emit, Event, EventHandler};
use crate::executor::ExecutionResult;

/// Configuration for [`AimdScheduler`].
#[derive(Debug, Clone)]
pub struct AimdConfig {
    pub base_interval: Duration,
    pub min_interval: Duration,
    pub max_interval: Duration,
    /// EWMA smoothing factor in `(0, 1]`.
    pub ewma_alpha: f64,
    /// Added to the interval on slow successes.
    pub additive_increase: Duration,
    /// Interval multiplier in `(0, 1)` for fast successes and failures.
    pub multiplicative_decrease: f64,
    /// A response is slow when the EWMA exceeds `slow_factor * base`.
    pub slow_factor: f64,
    /// A response is fast when the EWMA is below `fast_factor * base`.
    pub fast_factor: f64,
    /// Circuit breaker settings. The cooldown is overridden to track
    /// `max_interval` so it stays deterministic for a given config.
    pub circuit: CircuitConfig,
}

impl AimdConfig {
    pub fn new(base_interval: Duration) -> Self {
        AimdConfig {
            base_interval,
            min_interval: Duration::from_millis(100),
            max_interval: base_interval.saturating_mul(30),
            ewma_alpha: 0.3,
            additive_increase: Duration::from_millis(500),
            multiplicative_decrease: 0.5,
            slow_factor: 2.0,
            fast_factor: 0.5,
            circuit: CircuitConfig::default(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.base_interval.is_zero() {
            return Err(RepeaterError::config("base-interval", "must be positive"));
        }
        if self.min_interval > self.base_interval || self.base_interval > self.max_interval {
            return Err(RepeaterError::config(
                "base-interval",
                "intervals must satisfy min <= base <= max",
            ));
        }
        if !(self.ewma_alpha > 0.0 && self.ewma_alpha <= 1.0) {
            return Err(RepeaterError::config("ewma-alpha", "must be in (0, 1]"));
        }
        if self.additive_increase.is_zero() {
            return Err(RepeaterError::config("additive-increase", "must be positive"));
        }
        if !(self.multiplicative_decrease > 0.0 && self.multiplicative_decrease < 1.0) {
            return Err(RepeaterError::config(
                "multiplicative-decrease",
                "must be in (0, 1)",
            ));
        }
        if self.slow_factor < 0.0 || self.fast_factor < 0.0 {
            return Err(RepeaterError::config(
                "slow-factor",
                "speed factors must be non-negative",
            ));
        }
        Ok(())
    }
}

struct AimdState {
    current: Duration,
    ewma: Option<Duration>,
    circuit: BayesianCircuit,
}

/// Adaptive scheduler: AIMD on the interval, EWMA on response time,
/// Bayesian circuit on the outcome stream.
///
/// Interval, EWMA, and circuit share one `RwLock`: they are a single
/// consistency domain, updated together per attempt.
pub struct AimdScheduler {
    config: AimdConfig,
    state: RwLock<AimdState>,
    stop: StopSignal,
    events: Option<Arc<dyn EventHandler>>,
}

impl AimdScheduler {
    pub fn new(config: AimdConfig, events: Option<Arc<dyn EventHandler>>) -> Result<Self> {
        config.validate()?;
        // Open-circuit cooldown tracks the configured ceiling.
        let circuit_config = CircuitConfig {
            cooldown: config.max_interval,
            ..config.circuit.clone()
        };
        let circuit = BayesianCircuit::new(circuit_config)?;
        Ok(AimdScheduler {
            state: RwLock::new(AimdState {
                current: config.base_interval,
                ewma: None,
                circuit,
            }),
            config,
            stop: StopSignal::new(),
            events,
        })
    }

    /// Current polling interval.
    pub fn current_interval(&self) -> Duration {
        self.read().current
    }

    /// Smoothed response time, once at least one sample has arrived.
    pub fn ewma(&self) -> Option<Duration> {
        self.read().ewma
    }

    /// Current circuit state.
    pub fn circuit_state(&self) -> super::CircuitState {
        self.read().circuit.state()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, AimdState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, AimdState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Scheduler for AimdScheduler {
    async fn next(&self) -> bool {
        loop {
            if self.stop.is_stopped() {
                return false;
            }
            // Resolve the gate under the lock, then sleep outside it.
            let gate = {
                let mut state = self.write();
                let (gate, transition) = state.circuit.gate(Instant::now());
                if let Some((from, to)) = transition {
                    emit(
                        &self.events,
                        Event::CircuitTransition {
                            from: from.as_str(),
                            to: to.as_str(),
                        },
                    );
                }
                gate
            };
            match gate {
                Gate::Pass => {
                    let delay = self.read().current;
                    return self.stop.sleep(delay).await;
                }
                Gate::Wait(wait) => {
                    debug!(wait = ?wait, "circuit open, holding ticks");
                    // Re-check the gate after the cooldown wait.
                    if !self.stop.sleep(wait).await {
                        return false;
                    }
                }
            }
        }
    }

    fn stop(&self) {
        self.stop.stop();
    }

    fn update_result(&self, result: &ExecutionResult) {
        let mut state = self.write();

        let ewma = match state.ewma {
            None => result.duration,
            Some(avg) => {
                let alpha = self.config.ewma_alpha;
                Duration::from_secs_f64(
                    alpha * result.duration.as_secs_f64() + (1.0 - alpha) * avg.as_secs_f64(),
                )
            }
        };
        state.ewma = Some(ewma);

        let base = self.config.base_interval.as_secs_f64();
        let avg = ewma.as_secs_f64();
        let slow = avg > self.config.slow_factor * base;
        let fast = avg < self.config.fast_factor * base;

        let current = state.current;
        let adjusted = if !result.success {
            // Congestion-like signal: retry sooner.
            current.mul_f64(self.config.multiplicative_decrease)
        } else if slow {
            current.saturating_add(self.config.additive_increase)
        } else if fast {
            current.mul_f64(self.config.multiplicative_decrease)
        } else {
            current
        };
        let clamped = adjusted.clamp(self.config.min_interval, self.config.max_interval);
        if clamped != current {
            state.current = clamped;
            emit(&self.events, Event::IntervalChanged { interval: clamped });
            debug!(interval = ?clamped, slow, fast, success = result.success, "interval adjusted");
        }

        if let Some((from, to)) = state.circuit.record(result.success, Instant::now()) {
            emit(
                &self.events,
                Event::CircuitTransition {
                    from: from.as_str(),
                    to: to.as_str(),
                },
            );
        }
    }

    fn name(&self) -> &'static str {
        "adaptive"
    }
}
