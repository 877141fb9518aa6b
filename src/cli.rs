//! Command-line surface.
//!
//! One subcommand per scheduling discipline, all sharing the common
//! options (timeout, patterns, observability ports, HTTP-aware group) and
//! the trailing command after `--`. Parsing produces an [`Invocation`]:
//! the validated [`RunnerConfig`] plus the process-level settings that
//! live outside the run itself.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::{FileConfig, RunnerConfig, DEFAULT_TIMEOUT};
use crate::error::{RepeaterError, Result};
use crate::http::HttpAwareConfig;
use crate::parsing::{parse_duration, parse_retry_pattern, RateSpec};
use crate::scheduler::{
    AimdConfig, CronConfig, IntervalConfig, LoadAdaptiveConfig, RateLimitConfig, ScheduleSpec,
    StrategyConfig, StrategyKind,
};

/// `rpr` -- run a command repeatedly on a schedule.
#[derive(Debug, Parser)]
#[command(
    name = "rpr",
    version,
    about = "Run a command repeatedly: fixed intervals, cron, adaptive and rate-limited schedules, or retry-until-success backoff"
)]
pub struct Cli {
    #[command(subcommand)]
    pub schedule: ScheduleCommand,
}

#[derive(Debug, Subcommand)]
pub enum ScheduleCommand {
    /// Run at a fixed interval.
    Interval(IntervalArgs),
    /// Run a fixed number of times.
    Count(CountArgs),
    /// Run for a fixed length of wall time.
    Duration(DurationArgs),
    /// Run on a cron schedule.
    Cron(CronArgs),
    /// Adapt the interval to response times and outcomes (AIMD).
    Adaptive(AdaptiveArgs),
    /// Keep request starts within a sliding-window budget.
    RateLimit(RateLimitArgs),
    /// Adapt the interval to host CPU, memory, and load.
    LoadAdaptive(LoadAdaptiveArgs),
    /// Retry with exponentially growing delays until success.
    Exponential(StrategyArgs),
    /// Retry with Fibonacci delays until success.
    Fibonacci(StrategyArgs),
    /// Retry with linearly growing delays until success.
    Linear(StrategyArgs),
    /// Retry with polynomially growing delays until success.
    Polynomial(StrategyArgs),
    /// Retry with AWS-style decorrelated jitter until success.
    DecorrelatedJitter(StrategyArgs),
}

/// Options shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct CommonOpts {
    /// Per-attempt timeout (e.g. 30s, 5m).
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Regex marking an attempt successful regardless of exit code.
    #[arg(long)]
    pub success_pattern: Option<String>,

    /// Regex marking an attempt failed regardless of exit code.
    #[arg(long)]
    pub failure_pattern: Option<String>,

    /// Match patterns case-insensitively.
    #[arg(long)]
    pub case_insensitive: bool,

    /// Stream each attempt's stdout/stderr through.
    #[arg(long)]
    pub show_output: bool,

    /// Serve /health, /ready, /live (and /metrics) on this port.
    #[arg(long)]
    pub health_port: Option<u16>,

    /// Serve Prometheus /metrics (and health endpoints) on this port.
    #[arg(long)]
    pub metrics_port: Option<u16>,

    /// TOML config file; explicit flags win over file values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Honor Retry-After headers and JSON retry hints found in captured
    /// HTTP responses.
    #[arg(long)]
    pub http_aware: bool,

    /// Lower clamp for server-advertised delays.
    #[arg(long, value_parser = parse_duration)]
    pub http_min_delay: Option<Duration>,

    /// Upper clamp for server-advertised delays.
    #[arg(long, value_parser = parse_duration)]
    pub http_max_delay: Option<Duration>,

    /// Do not look for timing in JSON bodies.
    #[arg(long)]
    pub http_no_json: bool,

    /// Do not look for timing in response headers.
    #[arg(long)]
    pub http_no_headers: bool,

    /// Extract timing from 4xx statuses other than 429/403 too.
    #[arg(long)]
    pub trust_client_errors: bool,

    /// Extra top-level JSON field to check for retry timing (repeatable).
    #[arg(long = "http-json-field")]
    pub http_json_fields: Vec<String>,

    /// Extra header name to check for retry timing (repeatable).
    #[arg(long = "http-header")]
    pub http_headers: Vec<String>,

    /// Suppress the end-of-run summary.
    #[arg(short, long)]
    pub quiet: bool,

    /// More logging (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Command to run, after `--`.
    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[derive(Debug, Args)]
pub struct IntervalArgs {
    /// Interval between runs.
    #[arg(short, long, value_parser = parse_duration)]
    pub every: Duration,

    /// Jitter fraction in [0, 1] applied to each interval.
    #[arg(long)]
    pub jitter: Option<f64>,

    /// Run immediately instead of waiting one interval first.
    #[arg(long)]
    pub immediate: bool,

    #[command(flatten)]
    pub common: CommonOpts,
}

#[derive(Debug, Args)]
pub struct CountArgs {
    /// How many times to run.
    #[arg(short, long)]
    pub times: u64,

    /// Interval between runs.
    #[arg(short, long, value_parser = parse_duration, default_value = "1s")]
    pub every: Duration,

    #[command(flatten)]
    pub common: CommonOpts,
}

#[derive(Debug, Args)]
pub struct DurationArgs {
    /// How long to keep running.
    #[arg(short = 'f', long = "for", value_parser = parse_duration)]
    pub duration: Duration,

    /// Interval between runs.
    #[arg(short, long, value_parser = parse_duration, default_value = "1s")]
    pub every: Duration,

    #[command(flatten)]
    pub common: CommonOpts,
}

#[derive(Debug, Args)]
pub struct CronArgs {
    /// Cron expression (seconds-first form, e.g. "0 */5 * * * *").
    #[arg(value_name = "EXPRESSION")]
    pub expression: String,

    /// Named timezone for the expression (e.g. Europe/Berlin).
    #[arg(long)]
    pub timezone: Option<String>,

    #[command(flatten)]
    pub common: CommonOpts,
}

#[derive(Debug, Args)]
pub struct AdaptiveArgs {
    /// Starting interval.
    #[arg(long, value_parser = parse_duration)]
    pub base_interval: Duration,

    /// Interval floor.
    #[arg(long, value_parser = parse_duration)]
    pub min_interval: Option<Duration>,

    /// Interval ceiling.
    #[arg(long, value_parser = parse_duration)]
    pub max_interval: Option<Duration>,

    /// Responses slower than this multiple of the base interval count as slow.
    #[arg(long)]
    pub slow_factor: Option<f64>,

    /// Responses faster than this multiple of the base interval count as fast.
    #[arg(long)]
    pub fast_factor: Option<f64>,

    /// Believed failure probability that opens the circuit.
    #[arg(long)]
    pub failure_threshold: Option<f64>,

    /// EWMA smoothing factor in (0, 1].
    #[arg(long)]
    pub ewma_alpha: Option<f64>,

    #[command(flatten)]
    pub common: CommonOpts,
}

#[derive(Debug, Args)]
pub struct RateLimitArgs {
    /// Budget as <count>/<window>, e.g. 10/1m.
    #[arg(value_name = "RATE")]
    pub rate: RateSpec,

    /// Retry offsets the limiter must account for, e.g. "0,10m,30m".
    #[arg(long)]
    pub retry_pattern: Option<String>,

    /// Log the wait until the next admissible slot when denied.
    #[arg(long)]
    pub show_next: bool,

    #[command(flatten)]
    pub common: CommonOpts,
}

#[derive(Debug, Args)]
pub struct LoadAdaptiveArgs {
    /// Interval when the host sits exactly at its targets.
    #[arg(long, value_parser = parse_duration)]
    pub base_interval: Duration,

    /// Interval floor.
    #[arg(long, value_parser = parse_duration)]
    pub min_interval: Option<Duration>,

    /// Interval ceiling.
    #[arg(long, value_parser = parse_duration)]
    pub max_interval: Option<Duration>,

    /// Target CPU utilization percentage.
    #[arg(long)]
    pub target_cpu: Option<f64>,

    /// Target memory utilization percentage.
    #[arg(long)]
    pub target_memory: Option<f64>,

    /// Target one-minute load average per core.
    #[arg(long)]
    pub target_load: Option<f64>,

    #[command(flatten)]
    pub common: CommonOpts,
}

#[derive(Debug, Args)]
pub struct StrategyArgs {
    /// Initial delay.
    #[arg(long, value_parser = parse_duration, default_value = "1s")]
    pub base_delay: Duration,

    /// Per-attempt delay growth (linear strategy).
    #[arg(long, value_parser = parse_duration)]
    pub increment: Option<Duration>,

    /// Growth multiplier (exponential and decorrelated-jitter strategies).
    #[arg(long)]
    pub multiplier: Option<f64>,

    /// Attempt exponent (polynomial strategy).
    #[arg(long)]
    pub exponent: Option<f64>,

    /// Cap on any single delay.
    #[arg(long, value_parser = parse_duration)]
    pub max_delay: Option<Duration>,

    /// Give up after this many attempts.
    #[arg(long, default_value_t = 10)]
    pub max_attempts: u32,

    #[command(flatten)]
    pub common: CommonOpts,
}

/// A fully resolved invocation: the run itself plus process-level settings.
#[derive(Debug)]
pub struct Invocation {
    pub runner: RunnerConfig,
    pub metrics_port: Option<u16>,
    pub health_port: Option<u16>,
    pub quiet: bool,
    pub verbose: u8,
}

impl Cli {
    /// Resolve flags and the optional config file into a validated config.
    pub fn into_invocation(self) -> Result<Invocation> {
        let (spec, max_attempts, max_duration, common) = self.schedule.resolve()?;

        let file = match &common.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };

        let mut runner = RunnerConfig::new(common.command.clone(), spec);
        runner.timeout = match common.timeout {
            Some(t) => t,
            None => file.parsed_timeout()?.unwrap_or(DEFAULT_TIMEOUT),
        };
        runner.max_attempts = max_attempts;
        runner.max_duration = max_duration;
        runner.success_pattern = common
            .success_pattern
            .clone()
            .or_else(|| file.success_pattern.clone());
        runner.failure_pattern = common
            .failure_pattern
            .clone()
            .or_else(|| file.failure_pattern.clone());
        runner.case_insensitive = common.case_insensitive || file.case_insensitive.unwrap_or(false);
        runner.show_output = common.show_output || file.show_output.unwrap_or(false);
        runner.http_aware = resolve_http_aware(&common, &file)?;
        runner.validate()?;

        Ok(Invocation {
            runner,
            metrics_port: common.metrics_port.or(file.metrics_port),
            health_port: common.health_port.or(file.health_port),
            quiet: common.quiet,
            verbose: common.verbose,
        })
    }
}

impl ScheduleCommand {
    /// Turn the subcommand into a schedule spec plus the runner-level stop
    /// conditions it implies.
    #[allow(clippy::type_complexity)]
    fn resolve(self) -> Result<(ScheduleSpec, Option<u64>, Option<Duration>, CommonOpts)> {
        Ok(match self {
            ScheduleCommand::Interval(args) => {
                let config = IntervalConfig::new(args.every)
                    .with_jitter(args.jitter.unwrap_or(0.0))
                    .with_immediate(args.immediate);
                (ScheduleSpec::Interval(config), None, None, args.common)
            }
            ScheduleCommand::Count(args) => {
                let config = IntervalConfig::new(args.every).with_immediate(true);
                (
                    ScheduleSpec::Interval(config),
                    Some(args.times),
                    None,
                    args.common,
                )
            }
            ScheduleCommand::Duration(args) => {
                let config = IntervalConfig::new(args.every).with_immediate(true);
                (
                    ScheduleSpec::Interval(config),
                    None,
                    Some(args.duration),
                    args.common,
                )
            }
            ScheduleCommand::Cron(args) => (
                ScheduleSpec::Cron(CronConfig {
                    expression: args.expression,
                    timezone: args.timezone,
                }),
                None,
                None,
                args.common,
            ),
            ScheduleCommand::Adaptive(args) => {
                let mut config = AimdConfig::new(args.base_interval);
                if let Some(min) = args.min_interval {
                    config.min_interval = min;
                }
                if let Some(max) = args.max_interval {
                    config.max_interval = max;
                }
                if let Some(slow) = args.slow_factor {
                    config.slow_factor = slow;
                }
                if let Some(fast) = args.fast_factor {
                    config.fast_factor = fast;
                }
                if let Some(threshold) = args.failure_threshold {
                    config.circuit.failure_threshold = threshold;
                }
                if let Some(alpha) = args.ewma_alpha {
                    config.ewma_alpha = alpha;
                }
                (ScheduleSpec::Adaptive(config), None, None, args.common)
            }
            ScheduleCommand::RateLimit(args) => {
                let retry_pattern = match &args.retry_pattern {
                    None => Vec::new(),
                    Some(pattern) => parse_retry_pattern(pattern)
                        .map_err(|e| RepeaterError::config("retry-pattern", e))?,
                };
                (
                    ScheduleSpec::RateLimit(RateLimitConfig {
                        spec: args.rate,
                        retry_pattern,
                        show_next: args.show_next,
                    }),
                    None,
                    None,
                    args.common,
                )
            }
            ScheduleCommand::LoadAdaptive(args) => {
                let mut config = LoadAdaptiveConfig::new(args.base_interval);
                if let Some(min) = args.min_interval {
                    config.min_interval = min;
                }
                if let Some(max) = args.max_interval {
                    config.max_interval = max;
                }
                if let Some(cpu) = args.target_cpu {
                    config.target_cpu = cpu;
                }
                if let Some(memory) = args.target_memory {
                    config.target_memory = memory;
                }
                if let Some(load) = args.target_load {
                    config.target_load = load;
                }
                (ScheduleSpec::LoadAdaptive(config), None, None, args.common)
            }
            ScheduleCommand::Exponential(args) => strategy(StrategyKind::Exponential, args),
            ScheduleCommand::Fibonacci(args) => strategy(StrategyKind::Fibonacci, args),
            ScheduleCommand::Linear(args) => strategy(StrategyKind::Linear, args),
            ScheduleCommand::Polynomial(args) => strategy(StrategyKind::Polynomial, args),
            ScheduleCommand::DecorrelatedJitter(args) => {
                strategy(StrategyKind::DecorrelatedJitter, args)
            }
        })
    }
}

fn strategy(
    kind: StrategyKind,
    args: StrategyArgs,
) -> (ScheduleSpec, Option<u64>, Option<Duration>, CommonOpts) {
    let mut config = StrategyConfig::new(kind);
    config.base_delay = args.base_delay;
    config.max_attempts = args.max_attempts;
    if let Some(increment) = args.increment {
        config.increment = increment;
    }
    if let Some(multiplier) = args.multiplier {
        config.multiplier = multiplier;
    }
    if let Some(exponent) = args.exponent {
        config.exponent = exponent;
    }
    if let Some(max_delay) = args.max_delay {
        config.max_delay = max_delay;
    }
    (ScheduleSpec::Retry(config), None, None, args.common)
}

/// Fold CLI flags over file settings into the HTTP-aware config, or `None`
/// when the feature is off everywhere.
fn resolve_http_aware(common: &CommonOpts, file: &FileConfig) -> Result<Option<HttpAwareConfig>> {
    let file_http = file.http_aware.as_ref();
    let enabled = common.http_aware || file_http.and_then(|h| h.enabled).unwrap_or(false);
    if !enabled {
        return Ok(None);
    }

    let mut config = match file_http {
        Some(section) => section.resolve()?,
        None => HttpAwareConfig::default(),
    };
    if let Some(min) = common.http_min_delay {
        config.min_delay = min;
    }
    if let Some(max) = common.http_max_delay {
        config.max_delay = max;
    }
    if common.http_no_json {
        config.parse_json = false;
    }
    if common.http_no_headers {
        config.parse_headers = false;
    }
    if common.trust_client_errors {
        config.trust_client_errors = true;
    }
    config
        .json_fields
        .extend(common.http_json_fields.iter().cloned());
    config
        .header_names
        .extend(common.http_headers.iter().cloned());
    Ok(Some(config))
}
