//! Mathematical retry-delay strategies.
//!
//! All five strategies share one contract: `next_delay(attempt, last)` with
//! a 1-based attempt number, capped at the configured maximum (zero cap
//! means unbounded). The decorrelated jitter strategy is stateful and owns
//! its RNG, so independent instances never converge on the same delay
//! sequence.

use std::time::Duration;

use crate::error::{RepeaterError, Result};

/// Which delay formula to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// `base * multiplier^(attempt-1)`.
    Exponential,
    /// `attempt * increment`.
    Linear,
    /// `base * attempt^exponent`.
    Polynomial,
    /// `base * F(attempt)` with `F(1) = F(2) = 1`.
    Fibonacci,
    /// AWS decorrelated jitter: `U(base, previous * multiplier)`.
    DecorrelatedJitter,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Exponential => "exponential",
            StrategyKind::Linear => "linear",
            StrategyKind::Polynomial => "polynomial",
            StrategyKind::Fibonacci => "fibonacci",
            StrategyKind::DecorrelatedJitter => "decorrelated-jitter",
        }
    }
}

/// Configuration for a retry strategy and its driving scheduler.
///
/// `increment` only matters for Linear, `multiplier` for Exponential and
/// DecorrelatedJitter, `exponent` for Polynomial. `max_delay` of zero means
/// "no cap". Validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct StrategyConfig {
    pub kind: StrategyKind,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Attempt budget enforced by the strategy scheduler. Must be positive.
    pub max_attempts: u32,
    pub multiplier: f64,
    pub increment: Duration,
    pub exponent: f64,
}

impl StrategyConfig {
    /// Defaults for a kind: 1s base, 10 attempts, no cap, multiplier 2,
    /// increment 1s, exponent 2.
    pub fn new(kind: StrategyKind) -> Self {
        StrategyConfig {
            kind,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::ZERO,
            max_attempts: 10,
            multiplier: 2.0,
            increment: Duration::from_secs(1),
            exponent: 2.0,
        }
    }

    /// Validate and build the strategy.
    pub fn build(&self) -> Result<RetryStrategy> {
        if self.base_delay.is_zero() {
            return Err(RepeaterError::config("base-delay", "must be positive"));
        }
        if self.max_attempts == 0 {
            return Err(RepeaterError::config("max-attempts", "must be positive"));
        }
        if !self.max_delay.is_zero() && self.max_delay < self.base_delay {
            return Err(RepeaterError::config(
                "max-delay",
                "must be zero (uncapped) or at least base-delay",
            ));
        }
        match self.kind {
            StrategyKind::Exponential | StrategyKind::DecorrelatedJitter => {
                if !(self.multiplier > 1.0 && self.multiplier <= 10.0) {
                    return Err(RepeaterError::config(
                        "multiplier",
                        "must be greater than 1 and at most 10",
                    ));
                }
            }
            StrategyKind::Linear => {
                if self.increment.is_zero() {
                    return Err(RepeaterError::config("increment", "must be positive"));
                }
            }
            StrategyKind::Polynomial => {
                if !(self.exponent > 0.0 && self.exponent <= 10.0) {
                    return Err(RepeaterError::config(
                        "exponent",
                        "must be greater than 0 and at most 10",
                    ));
                }
            }
            StrategyKind::Fibonacci => {}
        }
        Ok(match self.kind {
            StrategyKind::Exponential => RetryStrategy::Exponential {
                base: self.base_delay,
                multiplier: self.multiplier,
                max: self.max_delay,
            },
            StrategyKind::Linear => RetryStrategy::Linear {
                increment: self.increment,
                max: self.max_delay,
            },
            StrategyKind::Polynomial => RetryStrategy::Polynomial {
                base: self.base_delay,
                exponent: self.exponent,
                max: self.max_delay,
            },
            StrategyKind::Fibonacci => RetryStrategy::Fibonacci {
                base: self.base_delay,
                max: self.max_delay,
            },
            StrategyKind::DecorrelatedJitter => RetryStrategy::DecorrelatedJitter {
                base: self.base_delay,
                multiplier: self.multiplier,
                max: self.max_delay,
                previous: None,
                rng: fastrand::Rng::new(),
            },
        })
    }
}

/// A retry-delay formula. The closed set of variants mirrors the
/// subcommands that select them.
#[derive(Debug)]
pub enum RetryStrategy {
    Exponential {
        base: Duration,
        multiplier: f64,
        max: Duration,
    },
    Linear {
        increment: Duration,
        max: Duration,
    },
    Polynomial {
        base: Duration,
        exponent: f64,
        max: Duration,
    },
    Fibonacci {
        base: Duration,
        max: Duration,
    },
    DecorrelatedJitter {
        base: Duration,
        multiplier: f64,
        max: Duration,
        /// Last emitted delay; `None` before the first call.
        previous: Option<Duration>,
        rng: fastrand::Rng,
    },
}

impl RetryStrategy {
    /// Delay before the next attempt after `attempt` completed attempts
    /// (1-based). `last_duration` is the wall time of the attempt that just
    /// finished; the fixed formulas ignore it, but it is part of the
    /// contract so adaptive callers can pass it uniformly.
    pub fn next_delay(&mut self, attempt: u32, _last_duration: Duration) -> Duration {
        let attempt = attempt.max(1);
        match self {
            RetryStrategy::Exponential {
                base,
                multiplier,
                max,
            } => {
                let secs = base.as_secs_f64() * multiplier.powi(attempt as i32 - 1);
                cap(Duration::from_secs_f64(secs.min(MAX_DELAY_SECS)), *max)
            }
            RetryStrategy::Linear { increment, max } => {
                cap(increment.saturating_mul(attempt), *max)
            }
            RetryStrategy::Polynomial {
                base,
                exponent,
                max,
            } => {
                let secs = base.as_secs_f64() * f64::from(attempt).powf(*exponent);
                cap(Duration::from_secs_f64(secs.min(MAX_DELAY_SECS)), *max)
            }
            RetryStrategy::Fibonacci { base, max } => {
                cap(base.saturating_mul(fibonacci(attempt)), *max)
            }
            RetryStrategy::DecorrelatedJitter {
                base,
                multiplier,
                max,
                previous,
                rng,
            } => {
                let delay = match *previous {
                    None => *base,
                    Some(prev) => {
                        let lo = base.as_secs_f64();
                        let hi = (prev.as_secs_f64() * *multiplier).min(MAX_DELAY_SECS);
                        let secs = lo + rng.f64() * (hi - lo).max(0.0);
                        let drawn = Duration::from_secs_f64(secs);
                        cap(drawn.max(*base), *max)
                    }
                };
                *previous = Some(delay);
                delay
            }
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            RetryStrategy::Exponential { .. } => StrategyKind::Exponential,
            RetryStrategy::Linear { .. } => StrategyKind::Linear,
            RetryStrategy::Polynomial { .. } => StrategyKind::Polynomial,
            RetryStrategy::Fibonacci { .. } => StrategyKind::Fibonacci,
            RetryStrategy::DecorrelatedJitter { .. } => StrategyKind::DecorrelatedJitter,
        }
    }
}

/// Guard against `Duration::from_secs_f64` overflowing on runaway growth.
const MAX_DELAY_SECS: f64 = 86_400.0 * 365.0;

fn cap(delay: Duration, max: Duration) -> Duration {
    if max.is_zero() {
        delay
    } else {
        delay.min(max)
    }
}

/// Iterative Fibonacci with `F(1) = F(2) = 1`, saturating on overflow.
fn fibonacci(n: u32) -> u32 {
    let (mut a, mut b) = (1u32, 1u32);
    for _ in 2..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    if n <= 2 {
        1
    } else {
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(kind: StrategyKind) -> RetryStrategy {
        StrategyConfig::new(kind).build().unwrap()
    }

    #[test]
    fn test_exponential_doubles_uncapped() {
        let mut strategy = build(StrategyKind::Exponential);
        let mut last = strategy.next_delay(1, Duration::ZERO);
        assert_eq!(last, Duration::from_secs(1));
        for attempt in 2..=10 {
            let delay = strategy.next_delay(attempt, Duration::ZERO);
            assert_eq!(delay, last * 2, "attempt {attempt}");
            last = delay;
        }
    }

    #[test]
    fn test_linear_first_delay_is_increment() {
        let mut config = StrategyConfig::new(StrategyKind::Linear);
        config.increment = Duration::from_millis(250);
        let mut strategy = config.build().unwrap();
        assert_eq!(strategy.next_delay(1, Duration::ZERO), Duration::from_millis(250));
        assert_eq!(strategy.next_delay(4, Duration::ZERO), Duration::from_secs(1));
    }

    #[test]
    fn test_polynomial_first_delay_is_base() {
        let mut strategy = build(StrategyKind::Polynomial);
        assert_eq!(strategy.next_delay(1, Duration::ZERO), Duration::from_secs(1));
        // attempt^2 with base 1s
        assert_eq!(strategy.next_delay(3, Duration::ZERO), Duration::from_secs(9));
    }

    #[test]
    fn test_fibonacci_additivity_before_cap() {
        let mut strategy = build(StrategyKind::Fibonacci);
        let delays: Vec<Duration> = (1..=10)
            .map(|k| strategy.next_delay(k, Duration::ZERO))
            .collect();
        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::from_secs(1));
        for k in 0..8 {
            assert_eq!(delays[k + 2], delays[k + 1] + delays[k], "F({})", k + 3);
        }
    }

    #[test]
    fn test_decorrelated_first_delay_is_base_deterministically() {
        for _ in 0..20 {
            let mut strategy = build(StrategyKind::DecorrelatedJitter);
            assert_eq!(strategy.next_delay(1, Duration::ZERO), Duration::from_secs(1));
        }
    }

    #[test]
    fn test_decorrelated_stays_within_bounds() {
        let mut config = StrategyConfig::new(StrategyKind::DecorrelatedJitter);
        config.max_delay = Duration::from_secs(30);
        config.multiplier = 3.0;
        let mut strategy = config.build().unwrap();
        for attempt in 1..=100 {
            let delay = strategy.next_delay(attempt, Duration::ZERO);
            assert!(delay >= Duration::from_secs(1), "below base: {:?}", delay);
            assert!(delay <= Duration::from_secs(30), "above cap: {:?}", delay);
        }
    }

    #[test]
    fn test_decorrelated_instances_diverge() {
        let mut a = build(StrategyKind::DecorrelatedJitter);
        let mut b = build(StrategyKind::DecorrelatedJitter);
        let seq_a: Vec<Duration> = (1..=20).map(|k| a.next_delay(k, Duration::ZERO)).collect();
        let seq_b: Vec<Duration> = (1..=20).map(|k| b.next_delay(k, Duration::ZERO)).collect();
        // Independent RNGs: 19 post-base draws agreeing exactly would mean
        // the instances share a random sequence.
        assert_ne!(seq_a[1..], seq_b[1..]);
    }

    #[test]
    fn test_every_strategy_respects_cap() {
        for kind in [
            StrategyKind::Exponential,
            StrategyKind::Linear,
            StrategyKind::Polynomial,
            StrategyKind::Fibonacci,
            StrategyKind::DecorrelatedJitter,
        ] {
            let mut config = StrategyConfig::new(kind);
            config.max_delay = Duration::from_secs(5);
            let mut strategy = config.build().unwrap();
            for attempt in 1..=50 {
                let delay = strategy.next_delay(attempt, Duration::ZERO);
                assert!(
                    delay <= Duration::from_secs(5),
                    "{:?} attempt {} exceeded cap: {:?}",
                    kind,
                    attempt,
                    delay
                );
            }
        }
    }

    #[test]
    fn test_validation_bounds() {
        let mut config = StrategyConfig::new(StrategyKind::Exponential);
        config.base_delay = Duration::ZERO;
        assert!(config.build().is_err());

        let mut config = StrategyConfig::new(StrategyKind::Exponential);
        config.max_attempts = 0;
        assert!(config.build().is_err());

        let mut config = StrategyConfig::new(StrategyKind::Exponential);
        config.multiplier = 1.0;
        assert!(config.build().is_err());
        config.multiplier = 11.0;
        assert!(config.build().is_err());

        let mut config = StrategyConfig::new(StrategyKind::Linear);
        config.increment = Duration::ZERO;
        assert!(config.build().is_err());

        let mut config = StrategyConfig::new(StrategyKind::Polynomial);
        config.exponent = 0.0;
        assert!(config.build().is_err());
        config.exponent = 10.5;
        assert!(config.build().is_err());

        let mut config = StrategyConfig::new(StrategyKind::Fibonacci);
        config.max_delay = Duration::from_millis(500);
        assert!(config.build().is_err(), "cap below base must be rejected");
    }

    #[test]
    fn test_fibonacci_sequence_values() {
        assert_eq!(fibonacci(1), 1);
        assert_eq!(fibonacci(2), 1);
        assert_eq!(fibonacci(3), 2);
        assert_eq!(fibonacci(4), 3);
        assert_eq!(fibonacci(5), 5);
        assert_eq!(fibonacci(10), 55);
    }
}
