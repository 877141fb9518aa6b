//! System-load-adaptive scheduling.
//!
//! Polls faster when the host is idle and backs off as CPU, memory, or
//! load average push past their targets. The interval scales with the
//! worst overload ratio, clamped to the configured band.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sysinfo::System;
use tracing::debug;

use super::{Scheduler, StopSignal};
use crate::error::{RepeaterError, Result};

/// Configuration for [`LoadAdaptiveScheduler`].
#[derive(Debug, Clone)]
pub struct LoadAdaptiveConfig {
    pub base_interval: Duration,
    pub min_interval: Duration,
    pub max_interval: Duration,
    /// Target CPU utilization percentage.
    pub target_cpu: f64,
    /// Target memory utilization percentage.
    pub target_memory: f64,
    /// Target one-minute load average per core.
    pub target_load: f64,
}

impl LoadAdaptiveConfig {
    pub fn new(base_interval: Duration) -> Self {
        LoadAdaptiveConfig {
            base_interval,
            min_interval: Duration::from_millis(100),
            max_interval: base_interval.saturating_mul(10),
            target_cpu: 70.0,
            target_memory: 80.0,
            target_load: 1.0,
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
        for (field, value) in [
            ("target-cpu", self.target_cpu),
            ("target-memory", self.target_memory),
            ("target-load", self.target_load),
        ] {
            if value <= 0.0 {
                return Err(RepeaterError::config(field, "must be positive"));
            }
        }
        Ok(())
    }
}

/// One snapshot of host utilization.
#[derive(Debug, Clone, Copy)]
pub struct Load {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub load_per_core: f64,
}

/// Source of [`Load`] snapshots. The production implementation reads
/// `sysinfo`; tests substitute a scripted one.
pub trait LoadSampler: Send {
    fn sample(&mut self) -> Load;
}

/// `sysinfo`-backed sampler.
///
/// CPU usage is measured between consecutive refreshes, so the very first
/// sample reads as idle; it converges from the second tick on.
pub struct SystemSampler {
    system: System,
}

impl SystemSampler {
    pub fn new() -> Self {
        SystemSampler {
            system: System::new(),
        }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadSampler for SystemSampler {
    fn sample(&mut self) -> Load {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let cpu_percent = f64::from(self.system.global_cpu_usage());
        let total = self.system.total_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            self.system.used_memory() as f64 / total as f64 * 100.0
        };
        let cores = self.system.cpus().len().max(1);
        let load_per_core = System::load_average().one / cores as f64;

        Load {
            cpu_percent,
            memory_percent,
            load_per_core,
        }
    }
}

/// Interval scaled by how far the worst metric sits above (or below) its
/// target, clamped to the configured band.
fn scaled_interval(config: &LoadAdaptiveConfig, load: Load) -> Duration {
    let ratio = (load.cpu_percent / config.target_cpu)
        .max(load.memory_percent / config.target_memory)
        .max(load.load_per_core / config.target_load);
    config
        .base_interval
        .mul_f64(ratio.max(0.0))
        .clamp(config.min_interval, config.max_interval)
}

/// Scheduler whose interval tracks host utilization.
pub struct LoadAdaptiveScheduler {
    config: LoadAdaptiveConfig,
    sampler: Mutex<Box<dyn LoadSampler>>,
    stop: StopSignal,
}

impl LoadAdaptiveScheduler {
    pub fn new(config: LoadAdaptiveConfig) -> Result<Self> {
        Self::with_sampler(config, Box::new(SystemSampler::new()))
    }

    pub fn with_sampler(config: LoadAdaptiveConfig, sampler: Box<dyn LoadSampler>) -> Result<Self> {
        config.validate()?;
        Ok(LoadAdaptiveScheduler {
            config,
            sampler: Mutex::new(sampler),
            stop: StopSignal::new(),
        })
    }
}

#[async_trait]
impl Scheduler for LoadAdaptiveScheduler {
    async fn next(&self) -> bool {
        if self.stop.is_stopped() {
            return false;
        }
        let load = self
            .sampler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sample();
        let interval = scaled_interval(&self.config, load);
        debug!(
            cpu = load.cpu_percent,
            memory = load.memory_percent,
            load = load.load_per_core,
            interval = ?interval,
            "load sample"
        );
        self.stop.sleep(interval).await
    }

    fn stop(&self) {
        self.stop.stop();
    }

    fn name(&self) -> &'static str {
        "load-adaptive"
    }
}
