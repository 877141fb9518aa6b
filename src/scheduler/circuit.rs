//! Bayesian circuit breaker.
//!
//! Keeps a Beta(α, β) belief over the command's success probability,
//! decayed on every observation so old evidence fades like a sliding
//! window. The circuit opens when the believed failure probability crosses
//! the failure threshold, probes after a cooldown, and closes again once
//! enough consecutive probes succeed and the belief has recovered.

use std::time::Duration;

// tokio's Instant, not std's: identical at runtime, but it follows the
// virtual clock under `tokio::time::pause`, which the cooldown tests need.
use tokio::time::Instant;

use crate::error::{RepeaterError, Result};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Requests are rejected until the cooldown elapses.
    Open,
    /// A bounded probe is allowed through.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

/// Configuration for [`BayesianCircuit`].
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Prior Beta parameters. The uniform prior (1, 1) means "no opinion".
    pub prior_alpha: f64,
    pub prior_beta: f64,
    /// Per-observation decay in `(0, 1]`; lower forgets faster.
    pub decay: f64,
    /// Open when `1 - success_probability >= failure_threshold`.
    pub failure_threshold: f64,
    /// Required belief to close from half-open.
    pub recovery_threshold: f64,
    /// Observations required before the belief overrides the prior.
    pub min_samples: u32,
    /// Consecutive successful probes required to close from half-open.
    pub probe_target: u32,
    /// How long an open circuit waits before probing.
    pub cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        CircuitConfig {
            prior_alpha: 1.0,
            prior_beta: 1.0,
            decay: 0.95,
            failure_threshold: 0.5,
            recovery_threshold: 0.8,
            min_samples: 5,
            probe_target: 3,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl CircuitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.prior_alpha < 0.0 || self.prior_beta < 0.0 {
            return Err(RepeaterError::config(
                "circuit-prior",
                "prior parameters must be non-negative",
            ));
        }
        if self.prior_alpha + self.prior_beta == 0.0 {
            return Err(RepeaterError::config(
                "circuit-prior",
                "prior parameters must not both be zero",
            ));
        }
        if !(self.decay > 0.0 && self.decay <= 1.0) {
            return Err(RepeaterError::config(
                "circuit-decay",
                "decay must be in (0, 1]",
            ));
        }
        for (field, value) in [
            ("failure-threshold", self.failure_threshold),
            ("recovery-threshold", self.recovery_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(RepeaterError::config(field, "must be between 0 and 1"));
            }
        }
        if self.probe_target == 0 {
            return Err(RepeaterError::config("probe-target", "must be positive"));
        }
        Ok(())
    }
}

/// What the circuit currently allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Admit the request.
    Pass,
    /// Reject; retry after the given wait.
    Wait(Duration),
}

/// Beta-belief circuit breaker. Not internally synchronized: the adaptive
/// scheduler owns it inside its own state guard, keeping both in one
/// consistency domain.
#[derive(Debug)]
pub struct BayesianCircuit {
    config: CircuitConfig,
    alpha: f64,
    beta: f64,
    observations: u64,
    state: CircuitState,
    opened_at: Option<Instant>,
    probe_successes: u32,
}

impl BayesianCircuit {
    pub fn new(config: CircuitConfig) -> Result<Self> {
        config.validate()?;
        Ok(BayesianCircuit {
            alpha: config.prior_alpha,
            beta: config.prior_beta,
            config,
            observations: 0,
            state: CircuitState::Closed,
            opened_at: None,
            probe_successes: 0,
        })
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Believed success probability: the posterior mean once enough samples
    /// have arrived, the prior mean before that.
    pub fn success_probability(&self) -> f64 {
        if self.observations < u64::from(self.config.min_samples) {
            self.config.prior_alpha / (self.config.prior_alpha + self.config.prior_beta)
        } else {
            self.alpha / (self.alpha + self.beta)
        }
    }

    /// Whether a request may proceed at `now`. An open circuit whose
    /// cooldown has elapsed transitions to half-open and admits one probe.
    /// Returns the gate decision plus any state transition taken.
    pub fn gate(&mut self, now: Instant) -> (Gate, Option<(CircuitState, CircuitState)>) {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => (Gate::Pass, None),
            CircuitState::Open => {
                let opened_at = self.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed >= self.config.cooldown {
                    let transition = self.transition(CircuitState::HalfOpen);
                    (Gate::Pass, transition)
                } else {
                    (Gate::Wait(self.config.cooldown - elapsed), None)
                }
            }
        }
    }

    /// Fold one outcome into the belief and drive the state machine.
    /// Returns the state transition taken, if any.
    pub fn record(
        &mut self,
        success: bool,
        now: Instant,
    ) -> Option<(CircuitState, CircuitState)> {
        let decay = self.config.decay;
        if success {
            self.alpha = decay * self.alpha + 1.0;
            self.beta = decay * self.beta;
        } else {
            self.alpha = decay * self.alpha;
            self.beta = decay * self.beta + 1.0;
        }
        self.observations += 1;

        match self.state {
            CircuitState::Closed => {
                let failure_probability = 1.0 - self.success_probability();
                if self.observations >= u64::from(self.config.min_samples)
                    && failure_probability >= self.config.failure_threshold
                {
                    self.opened_at = Some(now);
                    return self.transition(CircuitState::Open);
                }
                None
            }
            CircuitState::HalfOpen => {
                if success {
                    self.probe_successes += 1;
                    if self.probe_successes >= self.config.probe_target
                        && self.success_probability() >= self.config.recovery_threshold
                    {
                        return self.transition(CircuitState::Closed);
                    }
                    None
                } else {
                    self.opened_at = Some(now);
                    return self.transition(CircuitState::Open);
                }
            }
            CircuitState::Open => None,
        }
    }

    fn transition(&mut self, to: CircuitState) -> Option<(CircuitState, CircuitState)> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        self.probe_successes = 0;
        Some((from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn circuit(config: CircuitConfig) -> BayesianCircuit {
        BayesianCircuit::new(config).unwrap()
    }

    fn default_circuit() -> BayesianCircuit {
        circuit(CircuitConfig::default())
    }

    #[test]
    fn test_prior_mean_before_min_samples() {
        let mut c = default_circuit();
        assert_eq!(c.success_probability(), 0.5);
        c.record(true, Instant::now());
        // Still below min_samples: the prior holds.
        assert_eq!(c.success_probability(), 0.5);
    }

    #[test]
    fn test_probability_monotone_under_successes() {
        let mut c = circuit(CircuitConfig {
            min_samples: 1,
            ..CircuitConfig::default()
        });
        let now = Instant::now();
        let mut last = 0.0;
        for _ in 0..50 {
            c.record(true, now);
            let p = c.success_probability();
            assert!(p >= last, "probability regressed: {} < {}", p, last);
            last = p;
        }
        assert!(last > 0.9);
    }

    #[test]
    fn test_probability_monotone_under_failures() {
        let mut c = circuit(CircuitConfig {
            min_samples: 1,
            failure_threshold: 1.1, // never open; isolate the belief
            ..CircuitConfig::default()
        });
        let now = Instant::now();
        c.record(false, now);
        let mut last = c.success_probability();
        for _ in 0..50 {
            c.record(false, now);
            let p = c.success_probability();
            assert!(p <= last, "probability rose under failures");
            last = p;
        }
    }

    #[test]
    fn test_opens_on_failure_streak() {
        let mut c = circuit(CircuitConfig {
            failure_threshold: 0.3,
            ..CircuitConfig::default()
        });
        let now = Instant::now();
        let mut transitioned = None;
        for _ in 0..20 {
            if let Some(t) = c.record(false, now) {
                transitioned = Some(t);
                break;
            }
        }
        assert_eq!(transitioned, Some((CircuitState::Closed, CircuitState::Open)));
        assert_eq!(c.state(), CircuitState::Open);
    }

    #[test]
    fn test_open_gate_waits_then_probes() {
        let mut c = circuit(CircuitConfig {
            failure_threshold: 0.3,
            cooldown: Duration::from_secs(10),
            ..CircuitConfig::default()
        });
        let start = Instant::now();
        for _ in 0..20 {
            c.record(false, start);
        }
        assert_eq!(c.state(), CircuitState::Open);

        let (gate, transition) = c.gate(start);
        assert!(matches!(gate, Gate::Wait(_)), "fresh open must wait");
        assert!(transition.is_none());

        let (gate, transition) = c.gate(start + Duration::from_secs(10));
        assert_eq!(gate, Gate::Pass);
        assert_eq!(transition, Some((CircuitState::Open, CircuitState::HalfOpen)));
        assert_eq!(c.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let mut c = circuit(CircuitConfig {
            failure_threshold: 0.3,
            cooldown: Duration::ZERO,
            ..CircuitConfig::default()
        });
        let now = Instant::now();
        for _ in 0..20 {
            c.record(false, now);
        }
        c.gate(now);
        assert_eq!(c.state(), CircuitState::HalfOpen);

        let transition = c.record(false, now);
        assert_eq!(transition, Some((CircuitState::HalfOpen, CircuitState::Open)));
    }

    #[test]
    fn test_recovery_path_closed_open_closed() {
        // 20 failures, then successes with a fast decay: the circuit must
        // traverse Closed -> Open -> HalfOpen and end Closed or HalfOpen.
        let mut c = circuit(CircuitConfig {
            failure_threshold: 0.3,
            recovery_threshold: 0.8,
            decay: 0.9,
            cooldown: Duration::ZERO,
            ..CircuitConfig::default()
        });
        let now = Instant::now();
        for _ in 0..20 {
            c.record(false, now);
        }
        assert_eq!(c.state(), CircuitState::Open);

        let mut closed = false;
        for _ in 0..30 {
            let (gate, _) = c.gate(now);
            assert_eq!(gate, Gate::Pass);
            c.record(true, now);
            if c.state() == CircuitState::Closed {
                closed = true;
                break;
            }
        }
        assert!(closed, "circuit never recovered: {:?}", c.state());
        assert!(c.success_probability() >= 0.8);
    }

    #[test]
    fn test_config_validation() {
        let bad = CircuitConfig {
            decay: 0.0,
            ..CircuitConfig::default()
        };
        assert!(BayesianCircuit::new(bad).is_err());

        let bad = CircuitConfig {
            failure_threshold: 1.5,
            ..CircuitConfig::default()
        };
        assert!(BayesianCircuit::new(bad).is_err());

        let bad = CircuitConfig {
            prior_alpha: -1.0,
            ..CircuitConfig::default()
        };
        assert!(BayesianCircuit::new(bad).is_err());

        let bad = CircuitConfig {
            probe_target: 0,
            ..CircuitConfig::default()
        };
        assert!(BayesianCircuit::new(bad).is_err());
    }
}
