//! Per-run execution statistics.
//!
//! The runner is the single writer: it appends one [`AttemptRecord`] per
//! attempt and bumps the counters. Observers (health endpoints, the final
//! report) never see the live struct, only [`StatsSnapshot`] copies.

use std::time::{Duration, Instant, SystemTime};

use serde::Serialize;

use crate::executor::ExecutionResult;

/// One completed attempt, as recorded in run statistics.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    /// 1-based attempt ordinal.
    pub attempt: u64,
    pub exit_code: i32,
    pub success: bool,
    pub duration: Duration,
    pub timed_out: bool,
    /// Wall-clock time at attempt start.
    pub started_at: SystemTime,
}

/// Statistics accumulated over a single run. Append-only within the run.
#[derive(Debug)]
pub struct ExecutionStats {
    records: Vec<AttemptRecord>,
    successful: u64,
    failed: u64,
    started_wall: SystemTime,
    started: Instant,
    total_duration: Option<Duration>,
}

impl ExecutionStats {
    pub fn new() -> Self {
        ExecutionStats {
            records: Vec::new(),
            successful: 0,
            failed: 0,
            started_wall: SystemTime::now(),
            started: Instant::now(),
            total_duration: None,
        }
    }

    /// Record one completed attempt.
    pub fn record(&mut self, result: &ExecutionResult) {
        let attempt = self.records.len() as u64 + 1;
        self.records.push(AttemptRecord {
            attempt,
            exit_code: result.exit_code,
            success: result.success,
            duration: result.duration,
            timed_out: result.timed_out,
            started_at: result.started_at,
        });
        if result.success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
    }

    /// Freeze the total duration. Idempotent; later calls keep the first value.
    pub fn finish(&mut self) {
        if self.total_duration.is_none() {
            self.total_duration = Some(self.started.elapsed());
        }
    }

    pub fn total(&self) -> u64 {
        self.records.len() as u64
    }

    pub fn successful(&self) -> u64 {
        self.successful
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// Wall-clock elapsed since the run started (or the frozen total after
    /// [`finish`](Self::finish)).
    pub fn elapsed(&self) -> Duration {
        self.total_duration.unwrap_or_else(|| self.started.elapsed())
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_wall
    }

    /// Ordered attempt records.
    pub fn records(&self) -> &[AttemptRecord] {
        &self.records
    }

    /// Copy the counters out for observers.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total: self.total(),
            successful: self.successful,
            failed: self.failed,
            elapsed_seconds: self.elapsed().as_secs_f64(),
        }
    }
}

impl Default for ExecutionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the run counters, safe to hand to observers.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatsSnapshot {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub elapsed_seconds: f64,
}
