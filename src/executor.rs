//! Command execution behind an object-safe trait.
//!
//! [`CommandExecutor`] runs one attempt of the configured command via
//! `tokio::process`, capturing output and enforcing the per-attempt timeout.
//! [`ScriptedExecutor`] returns canned results in order, allowing downstream
//! consumers to write deterministic tests against this crate.

use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;

use crate::error::{RepeaterError, Result};

/// Cap on captured bytes per stream. Output beyond this is dropped.
const OUTPUT_CAP: usize = 64 * 1024;

/// Exit code reported for attempts that never produced one (timeout, signal).
pub const EXIT_UNKNOWN: i32 = -1;

/// Outcome of a single command attempt.
///
/// Produced by an [`Executor`], then classified by the pattern matcher: the
/// executor initializes `success` from the exit code and the runner
/// overwrites it with the matcher's verdict.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Process exit code, or [`EXIT_UNKNOWN`] when none was observed.
    pub exit_code: i32,
    /// Captured standard output (lossy UTF-8, truncated).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8, truncated).
    pub stderr: String,
    /// Wall time of the attempt.
    pub duration: Duration,
    /// Whether the attempt counts as a success.
    pub success: bool,
    /// Whether the attempt was killed by the per-attempt timeout.
    pub timed_out: bool,
    /// Wall-clock time at attempt start.
    pub started_at: SystemTime,
}

impl ExecutionResult {
    /// A synthetic successful result, for tests and scripted runs.
    pub fn succeeded() -> Self {
        Self::with_exit(0)
    }

    /// A synthetic failed result, for tests and scripted runs.
    pub fn failed() -> Self {
        Self::with_exit(1)
    }

    /// A synthetic result with the given exit code and empty output.
    pub fn with_exit(exit_code: i32) -> Self {
        ExecutionResult {
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::ZERO,
            success: exit_code == 0,
            timed_out: false,
            started_at: SystemTime::now(),
        }
    }

    /// Builder-style stdout for synthetic results.
    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    /// Builder-style duration for synthetic results.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// Object-safe trait over command execution.
///
/// The production implementation is [`CommandExecutor`]; tests substitute
/// [`ScriptedExecutor`]. Implementations are stateless or per-run private,
/// never shared across runs.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run one attempt of `command` (argv form: program then args), bounded
    /// by `timeout`. A timed-out attempt is reported as a failed result,
    /// not an error; only spawn failures are errors.
    async fn execute(&self, command: &[String], timeout: Duration) -> Result<ExecutionResult>;

    /// Implementation name (for logging/debugging).
    fn name(&self) -> &'static str;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor;

impl CommandExecutor {
    pub fn new() -> Self {
        CommandExecutor
    }
}

fn truncate_lossy(bytes: &[u8]) -> String {
    let end = bytes.len().min(OUTPUT_CAP);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[async_trait]
impl Executor for CommandExecutor {
    async fn execute(&self, command: &[String], timeout: Duration) -> Result<ExecutionResult> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| RepeaterError::Internal("empty command".into()))?;

        let started_at = SystemTime::now();
        let started = Instant::now();

        let child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(RepeaterError::Spawn)?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output.map_err(RepeaterError::Spawn)?;
                let exit_code = output.status.code().unwrap_or(EXIT_UNKNOWN);
                Ok(ExecutionResult {
                    exit_code,
                    stdout: truncate_lossy(&output.stdout),
                    stderr: truncate_lossy(&output.stderr),
                    duration: started.elapsed(),
                    success: output.status.success(),
                    timed_out: false,
                    started_at,
                })
            }
            // Dropping the wait future kills the child (kill_on_drop).
            Err(_) => Ok(ExecutionResult {
                exit_code: EXIT_UNKNOWN,
                stdout: String::new(),
                stderr: String::new(),
                duration: started.elapsed(),
                success: false,
                timed_out: true,
                started_at,
            }),
        }
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

/// A test executor that returns canned results in order.
///
/// Cycles back to the beginning when all results have been consumed.
#[derive(Debug)]
pub struct ScriptedExecutor {
    results: Vec<ExecutionResult>,
    index: AtomicUsize,
}

impl ScriptedExecutor {
    /// Create a scripted executor with the given results, returned in order.
    pub fn new(results: Vec<ExecutionResult>) -> Self {
        assert!(
            !results.is_empty(),
            "ScriptedExecutor requires at least one result"
        );
        Self {
            results,
            index: AtomicUsize::new(0),
        }
    }

    /// Create a scripted executor that always returns the same result.
    pub fn fixed(result: ExecutionResult) -> Self {
        Self::new(vec![result])
    }

    /// Number of attempts executed so far.
    pub fn calls(&self) -> usize {
        self.index.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute(&self, _command: &[String], _timeout: Duration) -> Result<ExecutionResult> {
        let idx = self.index.fetch_add(1, Ordering::Relaxed) % self.results.len();
        let mut result = self.results[idx].clone();
        result.started_at = SystemTime::now();
        Ok(result)
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
