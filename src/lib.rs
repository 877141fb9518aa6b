//! # Repeater
//!
//! Run a command repeatedly under a chosen scheduling discipline, classify
//! each attempt, and adapt timing from what comes back.
//!
//! The `rpr` binary is a thin shell over this library. The moving parts:
//!
//! - **[`Scheduler`]** -- one contract over all disciplines: fixed
//!   [`interval`](scheduler::IntervalScheduler) with jitter, cron,
//!   mathematical retry strategies, AIMD [`adaptive`](scheduler::AimdScheduler)
//!   control with a Bayesian circuit breaker, host-load scaling, and
//!   sliding-window [`rate limiting`](scheduler::RateLimitScheduler).
//! - **[`HttpAwareScheduler`](scheduler::HttpAwareScheduler)** -- wraps any
//!   base discipline and lets a server's `Retry-After` (or JSON retry hint)
//!   captured in command output override the local schedule.
//! - **[`PatternMatcher`]** -- regex success/failure classification on top
//!   of the exit code.
//! - **[`Runner`]** -- the execution loop: awaits ticks, runs the command
//!   with a per-attempt timeout, feeds verdicts back into the scheduler,
//!   and stops on attempt/duration budgets, terminal schedules, or
//!   cancellation.
//! - **[`Metrics`]** and the [`health`] endpoints observe a run without
//!   touching its state.
//!
//! ## Quick start
//!
//! ```no_run
//! use repeater::config::RunnerConfig;
//! use repeater::runner::Runner;
//! use repeater::scheduler::{IntervalConfig, ScheduleSpec, StopSignal};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let schedule = ScheduleSpec::Interval(
//!         IntervalConfig::new(Duration::from_secs(10)).with_immediate(true),
//!     );
//!     let mut config = RunnerConfig::new(
//!         vec!["curl".into(), "-s".into(), "https://example.com/health".into()],
//!         schedule,
//!     );
//!     config.max_attempts = Some(5);
//!
//!     let runner = Runner::new(config, None)?;
//!     let outcome = runner.run(StopSignal::new()).await;
//!     println!("{} attempts, exited {}", outcome.stats.total(), outcome.exit_code);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod health;
pub mod http;
pub mod matcher;
pub mod metrics;
pub mod parsing;
pub mod runner;
pub mod scheduler;
pub mod stats;

pub use config::RunnerConfig;
pub use error::{RepeaterError, Result};
pub use events::{Event, EventHandler};
pub use executor::{CommandExecutor, ExecutionResult, Executor, ScriptedExecutor};
pub use http::{HttpAwareConfig, TimingInfo, TimingSource};
pub use matcher::PatternMatcher;
pub use metrics::Metrics;
pub use runner::{RunOutcome, Runner, TerminationKind};
pub use scheduler::{build_scheduler, ScheduleSpec, Scheduler, StopSignal};
pub use stats::{ExecutionStats, StatsSnapshot};
