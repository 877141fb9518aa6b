//! The execution loop: drive a scheduler, run the command, classify,
//! feed back, and stop when a stop condition fires.
//!
//! Ordering matters here. Feedback for attempt N is always delivered to
//! the scheduler before the tick for attempt N+1 is requested, so adaptive
//! disciplines never compute a delay from stale outcomes. Cancellation is
//! checked ahead of every suspension point and wins races against ticks
//! and in-flight executions; a cancelled execution's outcome is dropped,
//! not recorded.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::config::RunnerConfig;
use crate::error::Result;
use crate::events::{emit, Event, EventHandler};
use crate::executor::{CommandExecutor, Executor};
use crate::matcher::PatternMatcher;
use crate::scheduler::{build_scheduler, ScheduleSpec, Scheduler, StopSignal};
use crate::stats::{ExecutionStats, StatsSnapshot};

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationKind {
    /// Attempt budget reached (the runner's or a retry strategy's).
    MaxAttempts,
    /// Wall-clock budget reached.
    DurationElapsed,
    /// Retry semantics observed a success.
    Succeeded,
    /// The scheduler ran out of ticks (e.g. a cron schedule with no
    /// further occurrences).
    SchedulerExhausted,
    /// External cancellation or run-wide timeout.
    Cancelled,
    /// The loop hit a fatal internal failure; stats are partial.
    Internal(String),
}

impl std::fmt::Display for TerminationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationKind::MaxAttempts => write!(f, "max attempts"),
            TerminationKind::DurationElapsed => write!(f, "duration elapsed"),
            TerminationKind::Succeeded => write!(f, "success"),
            TerminationKind::SchedulerExhausted => write!(f, "schedule exhausted"),
            TerminationKind::Cancelled => write!(f, "cancelled"),
            TerminationKind::Internal(message) => write!(f, "internal error: {message}"),
        }
    }
}

/// Result of a completed run.
#[derive(Debug)]
pub struct RunOutcome {
    pub stats: ExecutionStats,
    pub termination: TerminationKind,
    /// Process exit code implied by the outcome.
    pub exit_code: i32,
}

/// Owns one run: scheduler, matcher, executor, stats.
pub struct Runner {
    config: RunnerConfig,
    scheduler: Box<dyn Scheduler>,
    matcher: PatternMatcher,
    executor: Arc<dyn Executor>,
    events: Option<Arc<dyn EventHandler>>,
    retry_semantics: bool,
    snapshot: watch::Sender<StatsSnapshot>,
}

impl Runner {
    /// Build a runner over the real command executor.
    pub fn new(config: RunnerConfig, events: Option<Arc<dyn EventHandler>>) -> Result<Self> {
        Self::with_executor(config, Arc::new(CommandExecutor::new()), events)
    }

    /// Build a runner over a custom executor (tests use the scripted one).
    pub fn with_executor(
        config: RunnerConfig,
        executor: Arc<dyn Executor>,
        events: Option<Arc<dyn EventHandler>>,
    ) -> Result<Self> {
        config.validate()?;
        let matcher = PatternMatcher::new(
            config.success_pattern.as_deref(),
            config.failure_pattern.as_deref(),
            config.case_insensitive,
        )?;
        let scheduler = build_scheduler(&config.schedule, config.http_aware.as_ref(), events.clone())?;
        let retry_semantics = matches!(config.schedule, ScheduleSpec::Retry(_));
        let (snapshot, _) = watch::channel(StatsSnapshot::default());
        Ok(Runner {
            config,
            scheduler,
            matcher,
            executor,
            events,
            retry_semantics,
            snapshot,
        })
    }

    /// Observe live run counters (health endpoints subscribe here).
    pub fn subscribe_stats(&self) -> watch::Receiver<StatsSnapshot> {
        self.snapshot.subscribe()
    }

    /// Run to completion. Never fails: fatal conditions are folded into
    /// the termination kind with whatever stats accumulated.
    pub async fn run(&self, cancel: StopSignal) -> RunOutcome {
        let mut stats = ExecutionStats::new();
        let started = tokio::time::Instant::now();
        let mut last_success = false;

        let termination = loop {
            if let Some(max) = self.config.max_attempts {
                if stats.total() >= max {
                    break TerminationKind::MaxAttempts;
                }
            }
            if let Some(max) = self.config.max_duration {
                if started.elapsed() >= max {
                    break TerminationKind::DurationElapsed;
                }
            }
            if cancel.is_stopped() {
                break TerminationKind::Cancelled;
            }

            let ticked = tokio::select! {
                biased;
                _ = cancel.stopped() => break TerminationKind::Cancelled,
                ticked = self.scheduler.next() => ticked,
            };
            if !ticked {
                break if cancel.is_stopped() {
                    TerminationKind::Cancelled
                } else if self.retry_semantics {
                    if last_success {
                        TerminationKind::Succeeded
                    } else {
                        TerminationKind::MaxAttempts
                    }
                } else {
                    TerminationKind::SchedulerExhausted
                };
            }

            let attempt = stats.total() + 1;
            emit(&self.events, Event::AttemptStart { attempt });
            debug!(attempt, command = ?self.config.command, "executing");

            let executed = tokio::select! {
                biased;
                _ = cancel.stopped() => break TerminationKind::Cancelled,
                executed = self.executor.execute(&self.config.command, self.config.timeout) => executed,
            };
            let mut result = match executed {
                Ok(result) => result,
                Err(e) => {
                    error!(error = %e, "execution failed");
                    break TerminationKind::Internal(e.to_string());
                }
            };
            result.success = self
                .matcher
                .classify(&result.stdout, &result.stderr, result.exit_code);
            last_success = result.success;

            if self.config.show_output {
                print!("{}", result.stdout);
                eprint!("{}", result.stderr);
            }
            debug!(
                attempt,
                exit_code = result.exit_code,
                success = result.success,
                timed_out = result.timed_out,
                duration = ?result.duration,
                "attempt finished"
            );

            stats.record(&result);
            self.snapshot.send_replace(stats.snapshot());
            emit(
                &self.events,
                Event::AttemptEnd {
                    attempt,
                    success: result.success,
                    duration: result.duration,
                    exit_code: result.exit_code,
                },
            );

            // Feedback for attempt N precedes the tick request for N+1.
            self.scheduler.update_result(&result);
        };

        self.scheduler.stop();
        stats.finish();
        self.snapshot.send_replace(stats.snapshot());
        info!(
            total = stats.total(),
            successful = stats.successful(),
            failed = stats.failed(),
            termination = %termination,
            "run finished"
        );

        let exit_code = self.exit_code(&stats, &termination);
        RunOutcome {
            stats,
            termination,
            exit_code,
        }
    }

    fn exit_code(&self, stats: &ExecutionStats, termination: &TerminationKind) -> i32 {
        match termination {
            TerminationKind::Internal(_) => 1,
            TerminationKind::Cancelled if stats.total() == 0 => 1,
            _ if self.retry_semantics && stats.successful() == 0 => 1,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecutionResult, ScriptedExecutor};
    use crate::scheduler::{IntervalConfig, StrategyConfig, StrategyKind};
    use std::time::Duration;

    fn interval_config(every_ms: u64, immediate: bool) -> ScheduleSpec {
        ScheduleSpec::Interval(
            IntervalConfig::new(Duration::from_millis(every_ms)).with_immediate(immediate),
        )
    }

    fn exponential_config(base_ms: u64, max_attempts: u32) -> ScheduleSpec {
        let mut config = StrategyConfig::new(StrategyKind::Exponential);
        config.base_delay = Duration::from_millis(base_ms);
        config.max_attempts = max_attempts;
        ScheduleSpec::Retry(config)
    }

    fn runner(schedule: ScheduleSpec, results: Vec<ExecutionResult>) -> Runner {
        let config = RunnerConfig::new(vec!["probe".to_string()], schedule);
        Runner::with_executor(config, Arc::new(ScriptedExecutor::new(results)), None).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_spacing_and_kind() {
        // Exponential base=100ms, 3 attempts, always failing: ticks at
        // 0 / +100ms / +200ms, then "max attempts".
        let runner = runner(exponential_config(100, 3), vec![ExecutionResult::failed()]);
        let before = tokio::time::Instant::now();
        let outcome = runner.run(StopSignal::new()).await;

        assert_eq!(outcome.termination, TerminationKind::MaxAttempts);
        assert_eq!(outcome.stats.total(), 3);
        assert_eq!(outcome.stats.failed(), 3);
        assert_eq!(
            tokio::time::Instant::now() - before,
            Duration::from_millis(300)
        );
        assert_eq!(outcome.exit_code, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_on_second_attempt() {
        let runner = runner(
            exponential_config(100, 5),
            vec![ExecutionResult::failed(), ExecutionResult::succeeded()],
        );
        let before = tokio::time::Instant::now();
        let outcome = runner.run(StopSignal::new()).await;

        assert_eq!(outcome.termination, TerminationKind::Succeeded);
        assert_eq!(outcome.stats.total(), 2);
        assert_eq!(outcome.stats.successful(), 1);
        // Second attempt lands one base delay after the immediate first.
        assert_eq!(
            tokio::time::Instant::now() - before,
            Duration::from_millis(100)
        );
        assert_eq!(outcome.exit_code, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_attempts_stop_condition() {
        let mut config = RunnerConfig::new(vec!["probe".to_string()], interval_config(10, true));
        config.max_attempts = Some(3);
        let runner = Runner::with_executor(
            config,
            Arc::new(ScriptedExecutor::fixed(ExecutionResult::succeeded())),
            None,
        )
        .unwrap();

        let outcome = runner.run(StopSignal::new()).await;
        assert_eq!(outcome.termination, TerminationKind::MaxAttempts);
        assert_eq!(outcome.stats.total(), 3);
        assert_eq!(outcome.exit_code, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_duration_stop_condition() {
        let mut config = RunnerConfig::new(vec!["probe".to_string()], interval_config(50, true));
        config.max_duration = Some(Duration::from_millis(120));
        let runner = Runner::with_executor(
            config,
            Arc::new(ScriptedExecutor::fixed(ExecutionResult::succeeded())),
            None,
        )
        .unwrap();

        let outcome = runner.run(StopSignal::new()).await;
        assert_eq!(outcome.termination, TerminationKind::DurationElapsed);
        // Ticks land at 0 / 50 / 100 / 150ms. The deadline is evaluated at
        // iteration start, so the tick already delivered at 150ms still
        // executes before the check trips.
        assert_eq!(outcome.stats.total(), 4);
    }

    #[tokio::test]
    async fn test_cancellation_before_first_tick() {
        let runner = runner(
            interval_config(5_000, false),
            vec![ExecutionResult::succeeded()],
        );
        let cancel = StopSignal::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.stop();
            })
        };

        let outcome = runner.run(cancel).await;
        handle.await.unwrap();
        assert_eq!(outcome.termination, TerminationKind::Cancelled);
        assert_eq!(outcome.stats.total(), 0);
        assert_eq!(outcome.exit_code, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pattern_verdict_overrides_exit_code() {
        let mut config = RunnerConfig::new(vec!["probe".to_string()], interval_config(10, true));
        config.max_attempts = Some(1);
        config.failure_pattern = Some("ERROR".to_string());
        let result = ExecutionResult::succeeded().with_stdout("ERROR: degraded");
        let runner =
            Runner::with_executor(config, Arc::new(ScriptedExecutor::fixed(result)), None).unwrap();

        let outcome = runner.run(StopSignal::new()).await;
        assert_eq!(outcome.stats.failed(), 1);
        assert_eq!(outcome.stats.successful(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_channel_publishes_progress() {
        let mut config = RunnerConfig::new(vec!["probe".to_string()], interval_config(10, true));
        config.max_attempts = Some(2);
        let runner = Runner::with_executor(
            config,
            Arc::new(ScriptedExecutor::fixed(ExecutionResult::succeeded())),
            None,
        )
        .unwrap();
        let receiver = runner.subscribe_stats();

        runner.run(StopSignal::new()).await;
        let snapshot = *receiver.borrow();
        assert_eq!(snapshot.total, 2);
        assert_eq!(snapshot.successful, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_emitted_per_attempt() {
        use std::sync::atomic::{AtomicU64, Ordering};

        struct Counter(AtomicU64, AtomicU64);
        impl EventHandler for Counter {
            fn on_event(&self, event: Event) {
                match event {
                    Event::AttemptStart { .. } => self.0.fetch_add(1, Ordering::Relaxed),
                    Event::AttemptEnd { .. } => self.1.fetch_add(1, Ordering::Relaxed),
                    _ => 0,
                };
            }
        }

        let counter = Arc::new(Counter(AtomicU64::new(0), AtomicU64::new(0)));
        let mut config = RunnerConfig::new(vec!["probe".to_string()], interval_config(10, true));
        config.max_attempts = Some(3);
        let runner = Runner::with_executor(
            config,
            Arc::new(ScriptedExecutor::fixed(ExecutionResult::succeeded())),
            Some(counter.clone()),
        )
        .unwrap();

        runner.run(StopSignal::new()).await;
        assert_eq!(counter.0.load(Ordering::Relaxed), 3);
        assert_eq!(counter.1.load(Ordering::Relaxed), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_aware_runner_defers_to_server_timing() {
        let mut config = RunnerConfig::new(vec!["probe".to_string()], interval_config(15_000, true));
        config.max_attempts = Some(2);
        config.http_aware = Some(crate::http::HttpAwareConfig::default());
        let result = ExecutionResult::failed()
            .with_stdout("HTTP/1.1 503 Service Unavailable\r\nRetry-After: 45\r\n\r\n");
        let runner =
            Runner::with_executor(config, Arc::new(ScriptedExecutor::fixed(result)), None).unwrap();

        let before = tokio::time::Instant::now();
        let outcome = runner.run(StopSignal::new()).await;
        assert_eq!(outcome.stats.total(), 2);
        // First tick immediate, second delayed by the server's 45s.
        assert_eq!(tokio::time::Instant::now() - before, Duration::from_secs(45));
    }

    #[tokio::test(start_paused = true)]
    async fn test_internal_error_returns_partial_stats() {
        // Spawn failure surfaces as an internal termination, not a panic.
        let config = RunnerConfig::new(
            vec!["definitely-not-a-real-binary-7f3a".to_string()],
            interval_config(10, true),
        );
        let runner = Runner::new(config, None).unwrap();
        let outcome = runner.run(StopSignal::new()).await;
        assert!(matches!(outcome.termination, TerminationKind::Internal(_)));
        assert_eq!(outcome.stats.total(), 0);
        assert_eq!(outcome.exit_code, 1);
    }
}
